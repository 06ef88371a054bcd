//! Shared application state

use livedesk_shared::SessionStore;
use std::sync::Arc;

use crate::auth::JwtManager;
use crate::chat::{AgentDirectory, CapacityManager, SessionEngine, StatsAggregator};
use crate::config::Config;
use crate::websocket::{ConnectionRegistry, RealtimeRouter};

/// Lifetime of tokens minted by [`JwtManager::generate_token`]; verification ignores it
const TOKEN_EXPIRY_HOURS: i64 = 24;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub jwt: JwtManager,
    pub store: Arc<dyn SessionStore>,
    pub router: RealtimeRouter,
}

impl AppState {
    /// Wire the chat core on top of `store`
    pub fn new(config: Config, store: Arc<dyn SessionStore>) -> Self {
        let limits = config.chat_limits;
        let router = RealtimeRouter::new(
            SessionEngine::new(store.clone(), limits),
            CapacityManager::new(store.clone()),
            AgentDirectory::new(store.clone(), limits),
            StatsAggregator::new(store.clone()),
            ConnectionRegistry::new(),
            config.auto_assign,
        );

        Self {
            jwt: JwtManager::new(&config.jwt_secret, TOKEN_EXPIRY_HOURS),
            config: Arc::new(config),
            store,
            router,
        }
    }
}
