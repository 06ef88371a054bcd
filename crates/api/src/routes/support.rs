//! Staff chat routes
//!
//! Session queue management for support staff, plus the agent directory
//! which is restricted to admins.

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use livedesk_shared::{
    AgentId, AgentUpdate, ChatMessage, ChatSession, SessionId, SessionPriority, SessionQuery,
    SessionSort, SessionStatus, SortOrder, SupportAgent,
};
use serde::{Deserialize, Serialize};

use crate::{
    auth::{require_agent_like, require_elevated, AuthUser},
    chat::{ChatStats, NewAgent, SessionDetails},
    error::{ApiError, ApiResult},
    routes::chat::SendMessageRequest,
    state::AppState,
    websocket::Closer,
};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSessionsQuery {
    pub status: Option<SessionStatus>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort_by: Option<SessionSort>,
    pub order: Option<SortOrder>,
}

impl From<ListSessionsQuery> for SessionQuery {
    fn from(query: ListSessionsQuery) -> Self {
        let defaults = SessionQuery::default();
        SessionQuery {
            status: query.status,
            page: query.page.unwrap_or(defaults.page),
            limit: query.limit.unwrap_or(defaults.limit),
            sort_by: query.sort_by.unwrap_or(defaults.sort_by),
            order: query.order.unwrap_or(defaults.order),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: i64,
}

#[derive(Debug, Serialize)]
pub struct SessionsListResponse {
    pub sessions: Vec<ChatSession>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<ChatSession>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    /// Defaults to the caller's own agent profile
    pub agent_id: Option<AgentId>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePriorityRequest {
    pub priority: SessionPriority,
}

#[derive(Debug, Serialize)]
pub struct AgentsResponse {
    pub agents: Vec<SupportAgent>,
}

// =============================================================================
// Session queue (staff)
// =============================================================================

pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<ListSessionsQuery>,
) -> ApiResult<Json<SessionsListResponse>> {
    require_agent_like(&auth_user)?;

    let query = SessionQuery::from(query);
    let (sessions, total) = state.router.engine().list(&query).await?;
    let limit = i64::from(query.limit);

    Ok(Json(SessionsListResponse {
        sessions,
        pagination: Pagination {
            page: query.page,
            limit: query.limit,
            total,
            total_pages: (total + limit - 1) / limit,
        },
    }))
}

pub async fn list_sessions_by_status(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(status): Path<String>,
) -> ApiResult<Json<SessionsResponse>> {
    require_agent_like(&auth_user)?;

    let status: SessionStatus = status
        .parse()
        .map_err(|e: livedesk_shared::ParseEnumError| ApiError::Validation(e.to_string()))?;
    let sessions = state.router.engine().list_by_status(status).await?;
    Ok(Json(SessionsResponse { sessions }))
}

pub async fn get_session_details(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<Json<SessionDetails>> {
    require_agent_like(&auth_user)?;
    let details = state.router.engine().get_details(session_id).await?;
    Ok(Json(details))
}

pub async fn assign_session(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(session_id): Path<SessionId>,
    body: Option<Json<AssignRequest>>,
) -> ApiResult<Json<ChatSession>> {
    require_agent_like(&auth_user)?;

    let req = body.map(|Json(req)| req).unwrap_or_default();
    let agent_id = match req.agent_id {
        Some(agent_id) => agent_id,
        None => state.router.agent_id_for(&auth_user).await?,
    };
    let session = state.router.assign(session_id, agent_id).await?;
    Ok(Json(session))
}

pub async fn unassign_session(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<Json<ChatSession>> {
    require_agent_like(&auth_user)?;

    let agent_id = state.router.agent_id_for(&auth_user).await?;
    let session = state.router.unassign(session_id, agent_id).await?;
    Ok(Json(session))
}

pub async fn update_priority(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(session_id): Path<SessionId>,
    Json(req): Json<UpdatePriorityRequest>,
) -> ApiResult<Json<ChatSession>> {
    require_agent_like(&auth_user)?;
    let session = state
        .router
        .update_priority(session_id, req.priority)
        .await?;
    Ok(Json(session))
}

pub async fn send_support_message(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(session_id): Path<SessionId>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<(StatusCode, Json<ChatMessage>)> {
    require_agent_like(&auth_user)?;

    let agent_id = state.router.agent_id_for(&auth_user).await?;
    let message = state
        .router
        .send_support_message(agent_id, session_id, &req.message)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn agent_close_session(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<Json<ChatSession>> {
    require_agent_like(&auth_user)?;

    let agent_id = state.router.agent_id_for(&auth_user).await?;
    let session = state
        .router
        .close(session_id, Closer::Agent(agent_id))
        .await?;
    Ok(Json(session))
}

pub async fn get_stats(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<ChatStats>> {
    require_agent_like(&auth_user)?;
    let stats = state.router.stats().snapshot().await?;
    Ok(Json(stats))
}

pub async fn list_active_agents(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<AgentsResponse>> {
    require_agent_like(&auth_user)?;
    let agents = state.router.capacity().list_active().await?;
    Ok(Json(AgentsResponse { agents }))
}

// =============================================================================
// Agent directory (admins)
// =============================================================================

pub async fn list_agents(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<AgentsResponse>> {
    require_elevated(&auth_user)?;
    let agents = state.router.agents().list().await?;
    Ok(Json(AgentsResponse { agents }))
}

pub async fn create_agent(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<NewAgent>,
) -> ApiResult<(StatusCode, Json<SupportAgent>)> {
    require_elevated(&auth_user)?;
    let agent = state.router.agents().create(req).await?;

    tracing::info!(
        agent_id = %agent.id,
        created_by = %auth_user.user_id,
        "Support agent registered"
    );
    Ok((StatusCode::CREATED, Json(agent)))
}

pub async fn get_agent(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(agent_id): Path<AgentId>,
) -> ApiResult<Json<SupportAgent>> {
    require_elevated(&auth_user)?;
    let agent = state.router.agents().get(agent_id).await?;
    Ok(Json(agent))
}

pub async fn update_agent(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(agent_id): Path<AgentId>,
    Json(req): Json<AgentUpdate>,
) -> ApiResult<Json<SupportAgent>> {
    require_elevated(&auth_user)?;
    let agent = state.router.agents().update(agent_id, req).await?;
    Ok(Json(agent))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_query_defaults() {
        let query = SessionQuery::from(ListSessionsQuery::default());
        assert_eq!(query, SessionQuery::default());
    }

    #[test]
    fn test_list_query_overrides() {
        let query = SessionQuery::from(ListSessionsQuery {
            status: Some(SessionStatus::Pending),
            page: Some(3),
            limit: Some(50),
            sort_by: Some(SessionSort::Priority),
            order: Some(SortOrder::Asc),
        });
        assert_eq!(query.offset(), 100);
        assert_eq!(query.sort_by, SessionSort::Priority);
    }
}
