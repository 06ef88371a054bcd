//! Support agent directory

use livedesk_shared::{
    AgentId, AgentUpdate, ChatError, ChatResult, SessionStore, StoreError, SupportAgent, UserId,
};
use serde::Deserialize;
use std::sync::Arc;
use time::OffsetDateTime;

use crate::config::ChatLimits;

/// Request to register an account as a support agent
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAgent {
    pub user_id: UserId,
    pub name: String,
    pub email: String,
    pub max_concurrent_chats: Option<i32>,
}

#[derive(Clone)]
pub struct AgentDirectory {
    store: Arc<dyn SessionStore>,
    limits: ChatLimits,
}

impl AgentDirectory {
    pub fn new(store: Arc<dyn SessionStore>, limits: ChatLimits) -> Self {
        Self { store, limits }
    }

    fn validate_max(&self, max: i32) -> ChatResult<()> {
        if max < 1 || max > self.limits.max_concurrent_chats_ceiling {
            return Err(ChatError::Validation(format!(
                "maxConcurrentChats must be between 1 and {}",
                self.limits.max_concurrent_chats_ceiling
            )));
        }
        Ok(())
    }

    pub async fn create(&self, request: NewAgent) -> ChatResult<SupportAgent> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(ChatError::Validation("Agent name is required".to_string()));
        }
        let max = request
            .max_concurrent_chats
            .unwrap_or(self.limits.default_max_concurrent_chats);
        self.validate_max(max)?;

        let agent = SupportAgent {
            id: AgentId::new(),
            user_id: request.user_id,
            name: name.to_string(),
            email: request.email.trim().to_string(),
            is_active: true,
            max_concurrent_chats: max,
            current_active_chats: 0,
            created_at: OffsetDateTime::now_utc(),
        };

        match self.store.insert_agent(&agent).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                return Err(ChatError::Conflict(
                    "This user is already a support agent".to_string(),
                ))
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(agent_id = %agent.id, user_id = %agent.user_id, max, "Support agent created");
        Ok(agent)
    }

    pub async fn get(&self, agent_id: AgentId) -> ChatResult<SupportAgent> {
        self.store
            .find_agent(agent_id)
            .await?
            .ok_or_else(|| ChatError::not_found("Support agent not found"))
    }

    /// Agent profile of an account, if it has one
    pub async fn for_user(&self, user_id: UserId) -> ChatResult<Option<SupportAgent>> {
        Ok(self.store.find_agent_by_user(user_id).await?)
    }

    pub async fn list(&self) -> ChatResult<Vec<SupportAgent>> {
        Ok(self.store.list_agents().await?)
    }

    /// Apply a partial update.
    ///
    /// Lowering the maximum below the agent's current load is a conflict.
    pub async fn update(&self, agent_id: AgentId, update: AgentUpdate) -> ChatResult<SupportAgent> {
        if let Some(max) = update.max_concurrent_chats {
            self.validate_max(max)?;
        }
        if matches!(&update.name, Some(name) if name.trim().is_empty()) {
            return Err(ChatError::Validation("Agent name cannot be empty".to_string()));
        }

        let agent = match self.store.update_agent(agent_id, &update).await {
            Ok(agent) => agent,
            Err(StoreError::Conflict(_)) => {
                return Err(ChatError::Conflict(
                    "maxConcurrentChats cannot be lower than the agent's active chats".to_string(),
                ))
            }
            Err(e) => return Err(e.into()),
        };
        let agent = agent.ok_or_else(|| ChatError::not_found("Support agent not found"))?;

        tracing::info!(agent_id = %agent_id, is_active = agent.is_active, "Support agent updated");
        Ok(agent)
    }
}
