//! Bearer-token authentication for REST routes

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use livedesk_shared::Identity;

use crate::error::ApiError;
use crate::state::AppState;

/// Authenticated caller, inserted as a request extension by [`require_auth`]
pub type AuthUser = Identity;

/// Reject requests without a valid `Authorization: Bearer` token
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let identity = state.jwt.authenticate(token).map_err(|e| {
        tracing::debug!(error = %e, "Rejected bearer token");
        ApiError::InvalidToken
    })?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

/// Staff-only guard used inside handlers
pub fn require_agent_like(user: &AuthUser) -> Result<(), ApiError> {
    if user.role.is_agent_like() {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

/// Admin-only guard used inside handlers
pub fn require_elevated(user: &AuthUser) -> Result<(), ApiError> {
    if user.role.is_elevated() {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}
