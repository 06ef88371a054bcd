//! Livedesk API Library
//!
//! Realtime support chat: the chat core, websocket transport and REST routes.

pub mod auth;
pub mod chat;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod tasks;
pub mod websocket;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
