//! REST surface tests driven through the full router

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use livedesk_api::{
    config::{ChatLimits, Config},
    routes::create_router,
    AppState,
};
use livedesk_shared::{MemorySessionStore, Role, UserId};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn setup() -> (Router, AppState) {
    let config = Config {
        bind_address: "127.0.0.1:0".to_string(),
        frontend_url: "http://localhost:3000".to_string(),
        database_url: "postgres://unused".to_string(),
        database_max_connections: 1,
        jwt_secret: "test-jwt-secret-must-be-at-least-32-characters-long".to_string(),
        chat_limits: ChatLimits::default(),
        auto_assign: false,
        stats_interval_secs: 0,
        auto_close_inactive_hours: 0,
    };
    let state = AppState::new(config, Arc::new(MemorySessionStore::new()));
    (create_router(state.clone()), state)
}

fn token(state: &AppState, user_id: UserId, role: Role) -> String {
    state.jwt.generate_token(user_id, role).unwrap()
}

async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn test_health_endpoints() {
    let (app, _state) = setup();

    let (status, body) = call(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["connections"], 0);

    let (status, _) = call(&app, Method::GET, "/health/live", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, Method::GET, "/health/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_requests_without_token_are_rejected() {
    let (app, _state) = setup();

    let (status, body) = call(&app, Method::POST, "/api/chat/session", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/chat/session",
        Some("not-a-token"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "INVALID_TOKEN");
}

#[tokio::test]
async fn test_websocket_without_token_is_unauthorized() {
    let (app, _state) = setup();
    let (status, _) = call(&app, Method::GET, "/api/chat/ws", None, None).await;
    // Missing upgrade headers or missing token; either way no socket is opened
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_user_session_flow() {
    let (app, state) = setup();
    let user = token(&state, UserId::new(), Role::User);

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/chat/session",
        Some(&user),
        Some(json!({"priority": "high"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["priority"], "high");
    let session_id = body["id"].as_str().unwrap().to_string();

    // A second open session is a conflict
    let (status, body) =
        call(&app, Method::POST, "/api/chat/session", Some(&user), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/api/chat/session/{session_id}/messages"),
        Some(&user),
        Some(json!({"message": "hello"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["message"], "hello");
    assert_eq!(body["sender"], "user");

    let (status, body) = call(
        &app,
        Method::GET,
        "/api/chat/session/active",
        Some(&user),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["status"], "active");
    assert_eq!(body["messages"].as_array().unwrap().len(), 1);

    let (status, body) = call(
        &app,
        Method::PATCH,
        &format!("/api/chat/session/{session_id}/close"),
        Some(&user),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "closed");

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/api/chat/session/{session_id}/messages"),
        Some(&user),
        Some(json!({"message": "still there?"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "INVALID_STATE");
}

#[tokio::test]
async fn test_overlong_message_is_validation_error() {
    let (app, state) = setup();
    let user = token(&state, UserId::new(), Role::User);
    let (_, body) = call(&app, Method::POST, "/api/chat/session", Some(&user), None).await;
    let session_id = body["id"].as_str().unwrap().to_string();

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/api/chat/session/{session_id}/messages"),
        Some(&user),
        Some(json!({"message": "x".repeat(1001)})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_role_gates() {
    let (app, state) = setup();
    let user = token(&state, UserId::new(), Role::User);
    let support = token(&state, UserId::new(), Role::Support);

    let (status, _) = call(&app, Method::GET, "/api/chat/sessions", Some(&user), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) =
        call(&app, Method::GET, "/api/chat/sessions", Some(&support), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["total"], 0);

    let (status, _) = call(&app, Method::GET, "/api/chat/agents", Some(&support), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_registers_agent_who_takes_a_session() {
    let (app, state) = setup();
    let admin = token(&state, UserId::new(), Role::Admin);
    let agent_user = UserId::new();
    let agent = token(&state, agent_user, Role::Support);
    let user = token(&state, UserId::new(), Role::User);

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/chat/agents",
        Some(&admin),
        Some(json!({
            "userId": agent_user.to_string(),
            "name": "Carla",
            "email": "carla@example.com",
            "maxConcurrentChats": 1
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["currentActiveChats"], 0);

    let (_, body) = call(&app, Method::POST, "/api/chat/session", Some(&user), None).await;
    let session_id = body["id"].as_str().unwrap().to_string();

    // Without an explicit agent the caller's own profile is used
    let (status, body) = call(
        &app,
        Method::PATCH,
        &format!("/api/chat/session/{session_id}/assign"),
        Some(&agent),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "active");

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/api/chat/session/{session_id}/support-message"),
        Some(&agent),
        Some(json!({"message": "how can I help?"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["sender"], "support");

    let (status, body) = call(&app, Method::GET, "/api/chat/agents/active", Some(&agent), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["agents"][0]["currentActiveChats"], 1);

    let (status, body) = call(
        &app,
        Method::PATCH,
        &format!("/api/chat/session/{session_id}/agent-close"),
        Some(&agent),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "closed");

    let (_, body) = call(&app, Method::GET, "/api/chat/stats", Some(&agent), None).await;
    assert_eq!(body["closedSessions"], 1);
    assert_eq!(body["totalSessions"], 1);
}

#[tokio::test]
async fn test_staff_without_profile_cannot_take_sessions() {
    let (app, state) = setup();
    let support = token(&state, UserId::new(), Role::Support);
    let user = token(&state, UserId::new(), Role::User);
    let (_, body) = call(&app, Method::POST, "/api/chat/session", Some(&user), None).await;
    let session_id = body["id"].as_str().unwrap().to_string();

    let (status, body) = call(
        &app,
        Method::PATCH,
        &format!("/api/chat/session/{session_id}/assign"),
        Some(&support),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_invalid_status_filter() {
    let (app, state) = setup();
    let support = token(&state, UserId::new(), Role::Support);
    let (status, body) = call(
        &app,
        Method::GET,
        "/api/chat/sessions/status/archived",
        Some(&support),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}
