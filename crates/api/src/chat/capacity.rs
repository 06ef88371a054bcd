//! Agent capacity manager
//!
//! Assignment reserves a slot on the agent with the store's conditional
//! increment before the session is touched. The reservation is the only
//! admission check, so concurrent assigners can never push an agent past
//! `max_concurrent_chats`. A reservation that cannot be used is released
//! before returning.

use livedesk_shared::{
    AgentId, ChatError, ChatResult, ChatSession, SessionId, SessionStatus, SessionStore,
    SupportAgent,
};
use std::sync::Arc;
use time::OffsetDateTime;

/// Result of a successful assignment
#[derive(Debug, Clone)]
pub struct Assignment {
    pub session: ChatSession,
    pub agent: SupportAgent,
    /// Agent the session was taken from, if it was reassigned
    pub previous_agent: Option<AgentId>,
}

#[derive(Clone)]
pub struct CapacityManager {
    store: Arc<dyn SessionStore>,
}

impl CapacityManager {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Assign `session_id` to `agent_id`, reserving one of the agent's slots.
    ///
    /// - `NotFound` if the session or an active agent does not exist
    /// - `InvalidState` if the session is closed
    /// - `Conflict` if the agent is at capacity or the session changed hands concurrently
    pub async fn assign(&self, session_id: SessionId, agent_id: AgentId) -> ChatResult<Assignment> {
        let agent = match self.store.find_agent(agent_id).await? {
            Some(agent) if agent.is_active => agent,
            _ => return Err(ChatError::not_found("Support agent not found or inactive")),
        };

        let session = self
            .store
            .find_session(session_id)
            .await?
            .ok_or_else(|| ChatError::not_found("Chat session not found"))?;
        if session.status == SessionStatus::Closed {
            return Err(ChatError::InvalidState(
                "Cannot assign a closed session".to_string(),
            ));
        }
        if session.support_agent_id == Some(agent_id) {
            return Ok(Assignment {
                session,
                agent,
                previous_agent: None,
            });
        }

        let reserved = match self.store.try_increment_agent_load(agent_id).await? {
            Some(agent) => agent,
            None => {
                tracing::debug!(agent_id = %agent_id, "Agent at capacity, assignment refused");
                return Err(ChatError::Conflict(
                    "Support agent has reached the maximum number of concurrent chats".to_string(),
                ));
            }
        };

        let previous_agent = session.support_agent_id;
        let assigned = match self
            .store
            .assign_session(session_id, agent_id, previous_agent, OffsetDateTime::now_utc())
            .await
        {
            Ok(Some(session)) => session,
            Ok(None) => {
                self.release(agent_id).await?;
                return Err(self.assignment_lost(session_id).await?);
            }
            Err(e) => {
                self.release(agent_id).await?;
                return Err(e.into());
            }
        };

        if let Some(previous) = previous_agent {
            self.release(previous).await?;
        }

        tracing::info!(
            session_id = %session_id,
            agent_id = %agent_id,
            load = reserved.current_active_chats,
            max = reserved.max_concurrent_chats,
            reassigned_from = ?previous_agent,
            "Chat session assigned"
        );

        Ok(Assignment {
            session: assigned,
            agent: reserved,
            previous_agent,
        })
    }

    /// Explain why the conditional assign did not apply
    async fn assignment_lost(&self, session_id: SessionId) -> ChatResult<ChatError> {
        Ok(match self.store.find_session(session_id).await? {
            None => ChatError::not_found("Chat session not found"),
            Some(s) if s.status == SessionStatus::Closed => {
                ChatError::InvalidState("Cannot assign a closed session".to_string())
            }
            Some(_) => ChatError::Conflict(
                "Chat session was assigned concurrently".to_string(),
            ),
        })
    }

    /// Give one slot back to `agent_id`
    pub async fn release(&self, agent_id: AgentId) -> ChatResult<()> {
        match self.store.decrement_agent_load(agent_id).await? {
            Some(agent) => {
                tracing::debug!(
                    agent_id = %agent_id,
                    load = agent.current_active_chats,
                    "Released agent capacity"
                );
            }
            None => {
                tracing::warn!(agent_id = %agent_id, "Tried to release capacity of unknown agent");
            }
        }
        Ok(())
    }

    /// Return the session to pending and release the agent's slot
    pub async fn unassign(
        &self,
        session_id: SessionId,
        agent_id: AgentId,
    ) -> ChatResult<ChatSession> {
        match self.store.unassign_session(session_id, agent_id).await? {
            Some(session) => {
                self.release(agent_id).await?;
                tracing::info!(session_id = %session_id, agent_id = %agent_id, "Chat session unassigned");
                Ok(session)
            }
            None => match self.store.find_session(session_id).await? {
                Some(s) if s.status == SessionStatus::Closed => Err(ChatError::InvalidState(
                    "Cannot unassign a closed session".to_string(),
                )),
                _ => Err(ChatError::not_found(
                    "Chat session not found or not assigned to this agent",
                )),
            },
        }
    }

    /// Active agents, least loaded first
    pub async fn list_active(&self) -> ChatResult<Vec<SupportAgent>> {
        Ok(self.store.list_active_agents().await?)
    }

    /// Try agents from least to most loaded until one accepts the session.
    ///
    /// Returns `None` when every candidate is full.
    pub async fn auto_assign(&self, session_id: SessionId) -> ChatResult<Option<Assignment>> {
        let candidates = self.list_active().await?;
        for agent in candidates.into_iter().filter(SupportAgent::has_spare_capacity) {
            match self.assign(session_id, agent.id).await {
                Ok(assignment) => return Ok(Some(assignment)),
                // Filled up since the listing; try the next one
                Err(ChatError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        tracing::debug!(session_id = %session_id, "No agent with spare capacity for auto-assign");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livedesk_shared::{MemorySessionStore, SessionPriority, UserId};

    async fn agent_with_capacity(store: &MemorySessionStore, max: i32) -> SupportAgent {
        let agent = SupportAgent {
            id: AgentId::new(),
            user_id: UserId::new(),
            name: "Ana".to_string(),
            email: "ana@example.com".to_string(),
            is_active: true,
            max_concurrent_chats: max,
            current_active_chats: 0,
            created_at: OffsetDateTime::now_utc(),
        };
        store.insert_agent(&agent).await.unwrap();
        agent
    }

    async fn pending_session(store: &MemorySessionStore) -> ChatSession {
        let session = ChatSession::new_pending(
            UserId::new(),
            SessionPriority::Medium,
            OffsetDateTime::now_utc(),
        );
        store.insert_session(&session).await.unwrap();
        session
    }

    #[tokio::test]
    async fn test_assign_reserves_and_close_releases() {
        let store = Arc::new(MemorySessionStore::new());
        let manager = CapacityManager::new(store.clone());
        let agent = agent_with_capacity(&store, 1).await;
        let session = pending_session(&store).await;

        let assignment = manager.assign(session.id, agent.id).await.unwrap();
        assert_eq!(assignment.session.status, SessionStatus::Active);
        assert_eq!(assignment.session.support_agent_id, Some(agent.id));
        assert!(assignment.session.assigned_at.is_some());
        assert_eq!(assignment.agent.current_active_chats, 1);

        let other = pending_session(&store).await;
        let full = manager.assign(other.id, agent.id).await;
        assert!(matches!(full, Err(ChatError::Conflict(_))));

        // The refused session is untouched
        let other = store.find_session(other.id).await.unwrap().unwrap();
        assert_eq!(other.status, SessionStatus::Pending);
        assert_eq!(other.support_agent_id, None);

        manager.release(agent.id).await.unwrap();
        let agent = store.find_agent(agent.id).await.unwrap().unwrap();
        assert_eq!(agent.current_active_chats, 0);
    }

    #[tokio::test]
    async fn test_closed_session_cannot_be_assigned() {
        let store = Arc::new(MemorySessionStore::new());
        let manager = CapacityManager::new(store.clone());
        let agent = agent_with_capacity(&store, 3).await;
        let session = pending_session(&store).await;
        store.close_session(session.id).await.unwrap();

        let result = manager.assign(session.id, agent.id).await;
        assert!(matches!(result, Err(ChatError::InvalidState(_))));

        let agent = store.find_agent(agent.id).await.unwrap().unwrap();
        assert_eq!(agent.current_active_chats, 0);
    }

    #[tokio::test]
    async fn test_inactive_agent_is_not_found() {
        let store = Arc::new(MemorySessionStore::new());
        let manager = CapacityManager::new(store.clone());
        let agent = agent_with_capacity(&store, 3).await;
        store
            .update_agent(
                agent.id,
                &livedesk_shared::AgentUpdate {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let session = pending_session(&store).await;

        let result = manager.assign(session.id, agent.id).await;
        assert!(matches!(result, Err(ChatError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_reassignment_moves_the_slot() {
        let store = Arc::new(MemorySessionStore::new());
        let manager = CapacityManager::new(store.clone());
        let first = agent_with_capacity(&store, 2).await;
        let second = agent_with_capacity(&store, 2).await;
        let session = pending_session(&store).await;

        manager.assign(session.id, first.id).await.unwrap();
        let moved = manager.assign(session.id, second.id).await.unwrap();
        assert_eq!(moved.previous_agent, Some(first.id));

        let first = store.find_agent(first.id).await.unwrap().unwrap();
        let second = store.find_agent(second.id).await.unwrap().unwrap();
        assert_eq!(first.current_active_chats, 0);
        assert_eq!(second.current_active_chats, 1);
    }

    #[tokio::test]
    async fn test_assigning_same_agent_twice_is_idempotent() {
        let store = Arc::new(MemorySessionStore::new());
        let manager = CapacityManager::new(store.clone());
        let agent = agent_with_capacity(&store, 2).await;
        let session = pending_session(&store).await;

        manager.assign(session.id, agent.id).await.unwrap();
        manager.assign(session.id, agent.id).await.unwrap();

        let agent = store.find_agent(agent.id).await.unwrap().unwrap();
        assert_eq!(agent.current_active_chats, 1);
    }

    #[tokio::test]
    async fn test_unassign_returns_session_to_pending() {
        let store = Arc::new(MemorySessionStore::new());
        let manager = CapacityManager::new(store.clone());
        let agent = agent_with_capacity(&store, 2).await;
        let session = pending_session(&store).await;
        manager.assign(session.id, agent.id).await.unwrap();

        let session = manager.unassign(session.id, agent.id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Pending);
        assert_eq!(session.support_agent_id, None);

        let agent_after = store.find_agent(agent.id).await.unwrap().unwrap();
        assert_eq!(agent_after.current_active_chats, 0);

        let again = manager.unassign(session.id, agent.id).await;
        assert!(matches!(again, Err(ChatError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_auto_assign_picks_least_loaded() {
        let store = Arc::new(MemorySessionStore::new());
        let manager = CapacityManager::new(store.clone());
        let busy = agent_with_capacity(&store, 5).await;
        let idle = agent_with_capacity(&store, 5).await;
        let warmup = pending_session(&store).await;
        manager.assign(warmup.id, busy.id).await.unwrap();

        let session = pending_session(&store).await;
        let assignment = manager.auto_assign(session.id).await.unwrap().unwrap();
        assert_eq!(assignment.agent.id, idle.id);
    }

    #[tokio::test]
    async fn test_auto_assign_without_capacity_returns_none() {
        let store = Arc::new(MemorySessionStore::new());
        let manager = CapacityManager::new(store.clone());
        let agent = agent_with_capacity(&store, 1).await;
        let first = pending_session(&store).await;
        manager.assign(first.id, agent.id).await.unwrap();

        let second = pending_session(&store).await;
        assert!(manager.auto_assign(second.id).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_assignments_never_exceed_capacity() {
        let store = Arc::new(MemorySessionStore::new());
        let manager = CapacityManager::new(store.clone());
        let agent = agent_with_capacity(&store, 1).await;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let session = pending_session(&store).await;
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                manager.assign(session.id, agent.id).await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(ChatError::Conflict(_)) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(successes, 1);

        let agent = store.find_agent(agent.id).await.unwrap().unwrap();
        assert_eq!(agent.current_active_chats, 1);
    }
}
