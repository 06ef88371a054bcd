//! Session state engine
//!
//! Owns the lifecycle rules of chat sessions and their messages:
//!
//! - a user has at most one pending/active session
//! - a user message to a pending session activates it
//! - closed sessions accept no messages and stay closed
//! - closing twice is a successful no-op
//!
//! No networking happens here; the realtime router decides who hears about
//! each change.

use livedesk_shared::{
    AgentId, AppendedMessage, ChatError, ChatMessage, ChatResult, ChatSession, Identity, MessageSender,
    SessionId, SessionPriority, SessionQuery, SessionStatus, SessionStore, StoreError,
    SupportAgent, UserId,
};
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;

use crate::config::ChatLimits;

/// Outcome of a close request
#[derive(Debug, Clone)]
pub struct SessionClose {
    pub session: ChatSession,
    /// False when the session was already closed before this call
    pub transitioned: bool,
}

/// Session with its history and assigned agent
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetails {
    pub session: ChatSession,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    pub id: AgentId,
    pub name: String,
}

impl From<&SupportAgent> for AgentSummary {
    fn from(agent: &SupportAgent) -> Self {
        Self {
            id: agent.id,
            name: agent.name.clone(),
        }
    }
}

fn session_not_found() -> ChatError {
    ChatError::not_found("Chat session not found")
}

fn session_closed() -> ChatError {
    ChatError::InvalidState("Cannot send messages to a closed session".to_string())
}

/// Business rules for chat sessions and messages
#[derive(Clone)]
pub struct SessionEngine {
    store: Arc<dyn SessionStore>,
    limits: ChatLimits,
}

impl SessionEngine {
    pub fn new(store: Arc<dyn SessionStore>, limits: ChatLimits) -> Self {
        Self { store, limits }
    }

    /// Reject empty bodies and bodies longer than the configured limit
    pub fn validate_body(&self, body: &str) -> ChatResult<()> {
        if body.trim().is_empty() {
            return Err(ChatError::Validation(
                "Message cannot be empty".to_string(),
            ));
        }
        let length = body.chars().count();
        if length > self.limits.max_message_length {
            return Err(ChatError::Validation(format!(
                "Message cannot exceed {} characters (got {})",
                self.limits.max_message_length, length
            )));
        }
        Ok(())
    }

    /// Open a new pending session for `user_id`
    pub async fn create_session(
        &self,
        user_id: UserId,
        priority: Option<SessionPriority>,
    ) -> ChatResult<ChatSession> {
        if self.store.find_open_session_for_user(user_id).await?.is_some() {
            return Err(ChatError::Conflict(
                "You already have an open chat session".to_string(),
            ));
        }

        let session = ChatSession::new_pending(
            user_id,
            priority.unwrap_or_default(),
            OffsetDateTime::now_utc(),
        );
        // A concurrent create can still slip past the check above; the store's
        // uniqueness rule decides the winner.
        match self.store.insert_session(&session).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                return Err(ChatError::Conflict(
                    "You already have an open chat session".to_string(),
                ))
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            session_id = %session.id,
            user_id = %user_id,
            priority = %session.priority,
            "Chat session created"
        );
        Ok(session)
    }

    /// The user's pending or active session together with its messages
    pub async fn open_session(
        &self,
        user_id: UserId,
    ) -> ChatResult<Option<(ChatSession, Vec<ChatMessage>)>> {
        match self.store.find_open_session_for_user(user_id).await? {
            Some(session) => {
                let messages = self.store.list_messages(session.id).await?;
                Ok(Some((session, messages)))
            }
            None => Ok(None),
        }
    }

    /// Load a session that must belong to `user_id`
    pub async fn owned_session(
        &self,
        session_id: SessionId,
        user_id: UserId,
    ) -> ChatResult<ChatSession> {
        match self.store.find_session(session_id).await? {
            Some(session) if session.user_id == user_id => Ok(session),
            _ => Err(session_not_found()),
        }
    }

    /// Load a session that must currently be assigned to `agent_id`
    pub async fn assigned_session(
        &self,
        session_id: SessionId,
        agent_id: AgentId,
    ) -> ChatResult<ChatSession> {
        match self.store.find_session(session_id).await? {
            Some(session) if session.support_agent_id == Some(agent_id) => Ok(session),
            _ => Err(ChatError::not_found(
                "Chat session not found or not assigned to this agent",
            )),
        }
    }

    /// Load any session by ID
    pub async fn session(&self, session_id: SessionId) -> ChatResult<ChatSession> {
        self.store
            .find_session(session_id)
            .await?
            .ok_or_else(session_not_found)
    }

    /// Session and message history visible to `identity`.
    ///
    /// Users only see their own sessions; staff may read any session.
    pub async fn history(
        &self,
        session_id: SessionId,
        identity: &Identity,
    ) -> ChatResult<(ChatSession, Vec<ChatMessage>)> {
        let session = if identity.role.is_agent_like() {
            self.session(session_id).await?
        } else {
            self.owned_session(session_id, identity.user_id).await?
        };
        let messages = self.store.list_messages(session_id).await?;
        Ok((session, messages))
    }

    /// Persist a user message; activates a pending session
    pub async fn append_user_message(
        &self,
        session_id: SessionId,
        user_id: UserId,
        body: &str,
    ) -> ChatResult<AppendedMessage> {
        self.validate_body(body)?;
        let session = self.owned_session(session_id, user_id).await?;
        if session.status == SessionStatus::Closed {
            return Err(session_closed());
        }

        // None here means the session was closed between the read and the append
        let appended = self
            .store
            .append_message(session_id, MessageSender::User, body)
            .await?
            .ok_or_else(session_closed)?;

        if appended.previous_status == SessionStatus::Pending {
            tracing::info!(session_id = %session_id, "Chat session activated by first user message");
        }
        Ok(appended)
    }

    /// Persist a support message from the session's assigned agent
    pub async fn append_support_message(
        &self,
        session_id: SessionId,
        agent_id: AgentId,
        body: &str,
    ) -> ChatResult<AppendedMessage> {
        self.validate_body(body)?;
        let session = self.assigned_session(session_id, agent_id).await?;
        if session.status == SessionStatus::Closed {
            return Err(session_closed());
        }

        self.store
            .append_message(session_id, MessageSender::Support, body)
            .await?
            .ok_or_else(session_closed)
    }

    /// Close a session owned by `user_id`
    pub async fn close_session(
        &self,
        session_id: SessionId,
        user_id: UserId,
    ) -> ChatResult<SessionClose> {
        let session = self.owned_session(session_id, user_id).await?;
        self.close(session).await
    }

    /// Close a session assigned to `agent_id`
    pub async fn close_session_as_agent(
        &self,
        session_id: SessionId,
        agent_id: AgentId,
    ) -> ChatResult<SessionClose> {
        let session = self.assigned_session(session_id, agent_id).await?;
        self.close(session).await
    }

    /// Close a session without an ownership check (inactivity sweep)
    pub async fn close_session_unchecked(&self, session_id: SessionId) -> ChatResult<SessionClose> {
        let session = self.session(session_id).await?;
        self.close(session).await
    }

    async fn close(&self, current: ChatSession) -> ChatResult<SessionClose> {
        match self.store.close_session(current.id).await? {
            Some(session) => {
                tracing::info!(
                    session_id = %session.id,
                    agent_id = ?session.support_agent_id,
                    "Chat session closed"
                );
                Ok(SessionClose {
                    session,
                    transitioned: true,
                })
            }
            None => {
                // Already closed: report the stored state unchanged
                let session = self
                    .store
                    .find_session(current.id)
                    .await?
                    .unwrap_or(current);
                Ok(SessionClose {
                    session,
                    transitioned: false,
                })
            }
        }
    }

    /// Mark every unread support message as read for the session owner. Idempotent.
    pub async fn mark_read(&self, session_id: SessionId, user_id: UserId) -> ChatResult<u64> {
        self.owned_session(session_id, user_id).await?;
        let changed = self.store.mark_support_messages_read(session_id).await?;
        tracing::debug!(session_id = %session_id, changed, "Marked support messages read");
        Ok(changed)
    }

    pub async fn list_by_status(&self, status: SessionStatus) -> ChatResult<Vec<ChatSession>> {
        Ok(self.store.list_sessions_by_status(status).await?)
    }

    pub async fn list(&self, query: &SessionQuery) -> ChatResult<(Vec<ChatSession>, i64)> {
        if query.page == 0 || query.limit == 0 || query.limit > 100 {
            return Err(ChatError::Validation(
                "page must be >= 1 and limit between 1 and 100".to_string(),
            ));
        }
        Ok(self.store.list_sessions(query).await?)
    }

    pub async fn get_details(&self, session_id: SessionId) -> ChatResult<SessionDetails> {
        let session = self.session(session_id).await?;
        let messages = self.store.list_messages(session_id).await?;
        let agent = match session.support_agent_id {
            Some(agent_id) => self
                .store
                .find_agent(agent_id)
                .await?
                .as_ref()
                .map(AgentSummary::from),
            None => None,
        };
        Ok(SessionDetails {
            session,
            messages,
            agent,
        })
    }

    pub async fn update_priority(
        &self,
        session_id: SessionId,
        priority: SessionPriority,
    ) -> ChatResult<ChatSession> {
        self.store
            .update_priority(session_id, priority)
            .await?
            .ok_or_else(session_not_found)
    }

    /// Open sessions with no activity since `before`
    pub async fn idle_sessions(&self, before: OffsetDateTime) -> ChatResult<Vec<ChatSession>> {
        Ok(self.store.list_idle_open_sessions(before).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livedesk_shared::{MemorySessionStore, MessageSender, Role};

    fn engine() -> SessionEngine {
        SessionEngine::new(Arc::new(MemorySessionStore::new()), ChatLimits::default())
    }

    #[tokio::test]
    async fn test_second_open_session_conflicts() {
        let engine = engine();
        let user = UserId::new();

        let first = engine.create_session(user, None).await.unwrap();
        assert_eq!(first.status, SessionStatus::Pending);
        assert_eq!(first.priority, SessionPriority::Medium);

        let second = engine.create_session(user, Some(SessionPriority::High)).await;
        assert!(matches!(second, Err(ChatError::Conflict(_))));

        // After closing, a new session is allowed
        engine.close_session(first.id, user).await.unwrap();
        assert!(engine.create_session(user, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_user_message_activates_pending_session() {
        let engine = engine();
        let user = UserId::new();
        let session = engine.create_session(user, None).await.unwrap();

        let appended = engine
            .append_user_message(session.id, user, "hello")
            .await
            .unwrap();

        assert_eq!(appended.previous_status, SessionStatus::Pending);
        assert_eq!(appended.session.status, SessionStatus::Active);
        assert_eq!(appended.message.sender, MessageSender::User);
        assert_eq!(appended.session.last_message_at, appended.message.timestamp);
    }

    #[tokio::test]
    async fn test_message_to_closed_session_is_invalid_state() {
        let engine = engine();
        let user = UserId::new();
        let session = engine.create_session(user, None).await.unwrap();
        engine.close_session(session.id, user).await.unwrap();

        let result = engine.append_user_message(session.id, user, "anyone?").await;
        assert!(matches!(result, Err(ChatError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_foreign_session_is_not_found() {
        let engine = engine();
        let owner = UserId::new();
        let session = engine.create_session(owner, None).await.unwrap();

        let stranger = UserId::new();
        let result = engine.append_user_message(session.id, stranger, "hi").await;
        assert!(matches!(result, Err(ChatError::NotFound(_))));
        assert!(matches!(
            engine.mark_read(session.id, stranger).await,
            Err(ChatError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_overlong_message_rejected_and_not_persisted() {
        let engine = engine();
        let user = UserId::new();
        let session = engine.create_session(user, None).await.unwrap();

        let body = "x".repeat(1001);
        let result = engine.append_user_message(session.id, user, &body).await;
        assert!(matches!(result, Err(ChatError::Validation(_))));

        let identity = Identity {
            user_id: user,
            role: Role::User,
        };
        let (_, messages) = engine.history(session.id, &identity).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_limit_counts_characters_not_bytes() {
        let engine = engine();
        assert!(engine.validate_body(&"é".repeat(1000)).is_ok());
        assert!(engine.validate_body("   ").is_err());
    }

    #[tokio::test]
    async fn test_support_message_requires_assignment() {
        let engine = engine();
        let user = UserId::new();
        let session = engine.create_session(user, None).await.unwrap();

        let result = engine
            .append_support_message(session.id, AgentId::new(), "hi")
            .await;
        assert!(matches!(result, Err(ChatError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_double_close_is_noop() {
        let engine = engine();
        let user = UserId::new();
        let session = engine.create_session(user, None).await.unwrap();
        engine
            .append_user_message(session.id, user, "bye")
            .await
            .unwrap();

        let first = engine.close_session(session.id, user).await.unwrap();
        assert!(first.transitioned);
        let second = engine.close_session(session.id, user).await.unwrap();
        assert!(!second.transitioned);
        assert_eq!(second.session.status, SessionStatus::Closed);

        let details = engine.get_details(session.id).await.unwrap();
        assert_eq!(details.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_users_cannot_read_foreign_history_but_staff_can() {
        let engine = engine();
        let owner = UserId::new();
        let session = engine.create_session(owner, None).await.unwrap();

        let stranger = Identity {
            user_id: UserId::new(),
            role: Role::User,
        };
        assert!(engine.history(session.id, &stranger).await.is_err());

        let staff = Identity {
            user_id: UserId::new(),
            role: Role::Support,
        };
        assert!(engine.history(session.id, &staff).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_priority_missing_session() {
        let engine = engine();
        let result = engine
            .update_priority(SessionId::new(), SessionPriority::High)
            .await;
        assert!(matches!(result, Err(ChatError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_rejects_bad_paging() {
        let engine = engine();
        let query = SessionQuery {
            limit: 500,
            ..SessionQuery::default()
        };
        assert!(matches!(
            engine.list(&query).await,
            Err(ChatError::Validation(_))
        ));
    }
}
