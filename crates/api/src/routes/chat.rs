//! Chat routes for end users
//!
//! Every authenticated role may call these. Sending a message from a staff
//! account posts it as a support reply.

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use livedesk_shared::{ChatMessage, ChatSession, SessionId, SessionPriority};
use serde::{Deserialize, Serialize};

use crate::{
    auth::AuthUser,
    error::ApiResult,
    state::AppState,
    websocket::Closer,
};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    pub priority: Option<SessionPriority>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub message: String,
}

/// A session with its messages, oldest first
#[derive(Debug, Serialize)]
pub struct SessionHistory {
    pub session: Option<ChatSession>,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadResponse {
    pub session_id: SessionId,
    pub marked: u64,
}

// =============================================================================
// Handlers
// =============================================================================

/// The caller's pending or active session, if any
pub async fn get_active_session(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<SessionHistory>> {
    let open = state
        .router
        .engine()
        .open_session(auth_user.user_id)
        .await?;

    Ok(Json(match open {
        Some((session, messages)) => SessionHistory {
            session: Some(session),
            messages,
        },
        None => SessionHistory {
            session: None,
            messages: Vec::new(),
        },
    }))
}

pub async fn create_session(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    body: Option<Json<CreateSessionRequest>>,
) -> ApiResult<(StatusCode, Json<ChatSession>)> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let session = state
        .router
        .create_session(auth_user.user_id, req.priority)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<Json<SessionHistory>> {
    let (session, messages) = state
        .router
        .engine()
        .history(session_id, &auth_user)
        .await?;
    Ok(Json(SessionHistory {
        session: Some(session),
        messages,
    }))
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(session_id): Path<SessionId>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<(StatusCode, Json<ChatMessage>)> {
    let message = if auth_user.role.is_agent_like() {
        let agent_id = state.router.agent_id_for(&auth_user).await?;
        state
            .router
            .send_support_message(agent_id, session_id, &req.message)
            .await?
    } else {
        state
            .router
            .send_user_message(auth_user.user_id, session_id, &req.message)
            .await?
    };
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn close_session(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<Json<ChatSession>> {
    let session = state
        .router
        .close(session_id, Closer::User(auth_user.user_id))
        .await?;
    Ok(Json(session))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<Json<MarkReadResponse>> {
    let marked = state
        .router
        .mark_read(auth_user.user_id, session_id)
        .await?;
    Ok(Json(MarkReadResponse { session_id, marked }))
}
