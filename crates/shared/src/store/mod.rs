//! Session store abstraction
//!
//! The chat core talks to durable storage only through [`SessionStore`].
//! Two backends ship with the crate:
//!
//! - [`PgSessionStore`]: PostgreSQL via sqlx, used by the server
//! - [`MemorySessionStore`]: a mutex-guarded in-process store for tests and local runs
//!
//! # Atomicity
//!
//! Every method is a single linearizable step against the backend. The
//! conditional methods (`try_increment_agent_load`, `assign_session`,
//! `append_message`, `close_session`) check their precondition and apply the
//! write in the same step, so callers never need read-compare-write sequences.

mod memory;
mod postgres;

pub use memory::MemorySessionStore;
pub use postgres::PgSessionStore;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::StoreResult;
use crate::types::{
    AgentId, AgentUpdate, ChatMessage, ChatSession, MessageSender, SessionCounts, SessionId,
    SessionPriority, SessionQuery, SessionStatus, StatsWindows, SupportAgent, UserId,
};

/// Result of a successful conditional append
#[derive(Debug, Clone)]
pub struct AppendedMessage {
    pub message: ChatMessage,
    /// Session state after the append
    pub session: ChatSession,
    /// Status the session had before the append
    pub previous_status: SessionStatus,
}

/// Durable CRUD for sessions, messages and agents.
#[async_trait]
pub trait SessionStore: Send + Sync {
    // ---- sessions ----

    /// Insert a new session.
    ///
    /// Fails with `StoreError::Conflict` if the user already has a pending or active session.
    async fn insert_session(&self, session: &ChatSession) -> StoreResult<()>;

    /// Load a session by ID.
    async fn find_session(&self, id: SessionId) -> StoreResult<Option<ChatSession>>;

    /// The user's pending or active session, if any.
    async fn find_open_session_for_user(&self, user_id: UserId)
        -> StoreResult<Option<ChatSession>>;

    /// All sessions with `status`, most recent activity first.
    async fn list_sessions_by_status(&self, status: SessionStatus)
        -> StoreResult<Vec<ChatSession>>;

    /// One page of sessions plus the total matching count.
    async fn list_sessions(&self, query: &SessionQuery) -> StoreResult<(Vec<ChatSession>, i64)>;

    /// Open sessions whose last activity is older than `before`.
    async fn list_idle_open_sessions(&self, before: OffsetDateTime)
        -> StoreResult<Vec<ChatSession>>;

    /// Set the priority. Returns `None` if the session does not exist.
    async fn update_priority(
        &self,
        id: SessionId,
        priority: SessionPriority,
    ) -> StoreResult<Option<ChatSession>>;

    /// Attach `agent_id` to the session and mark it active.
    ///
    /// Applies only if the session is not closed and its current agent still
    /// equals `expected_agent`. Returns `None` when the condition fails.
    async fn assign_session(
        &self,
        id: SessionId,
        agent_id: AgentId,
        expected_agent: Option<AgentId>,
        at: OffsetDateTime,
    ) -> StoreResult<Option<ChatSession>>;

    /// Detach `agent_id` and return the session to pending.
    ///
    /// Applies only if the session is open and currently assigned to `agent_id`.
    async fn unassign_session(
        &self,
        id: SessionId,
        agent_id: AgentId,
    ) -> StoreResult<Option<ChatSession>>;

    /// Close the session if it is not already closed.
    ///
    /// Returns the closed session when this call performed the transition,
    /// `None` if it was already closed or does not exist.
    async fn close_session(&self, id: SessionId) -> StoreResult<Option<ChatSession>>;

    // ---- messages ----

    /// Append a message to a session that is not closed.
    ///
    /// The backend stamps the message time so messages in one session are
    /// stored in non-decreasing timestamp order. Updates `last_message_at` and,
    /// for user messages, moves a pending session to active. Returns `None` if
    /// the session is closed or missing.
    async fn append_message(
        &self,
        session_id: SessionId,
        sender: MessageSender,
        body: &str,
    ) -> StoreResult<Option<AppendedMessage>>;

    /// All messages in the session, oldest first.
    async fn list_messages(&self, session_id: SessionId) -> StoreResult<Vec<ChatMessage>>;

    /// Mark every unread support message in the session as read. Returns the number changed.
    async fn mark_support_messages_read(&self, session_id: SessionId) -> StoreResult<u64>;

    // ---- agents ----

    /// Insert an agent. Fails with `StoreError::Conflict` if the account already has one.
    async fn insert_agent(&self, agent: &SupportAgent) -> StoreResult<()>;

    async fn find_agent(&self, id: AgentId) -> StoreResult<Option<SupportAgent>>;

    async fn find_agent_by_user(&self, user_id: UserId) -> StoreResult<Option<SupportAgent>>;

    /// All agents, newest first.
    async fn list_agents(&self) -> StoreResult<Vec<SupportAgent>>;

    /// Active agents, least loaded first, ties broken by creation time.
    async fn list_active_agents(&self) -> StoreResult<Vec<SupportAgent>>;

    async fn update_agent(
        &self,
        id: AgentId,
        update: &AgentUpdate,
    ) -> StoreResult<Option<SupportAgent>>;

    /// Increment the agent's load only if it is active and below its ceiling.
    ///
    /// Returns the updated agent, or `None` when the condition fails.
    async fn try_increment_agent_load(&self, id: AgentId) -> StoreResult<Option<SupportAgent>>;

    /// Decrement the agent's load, floored at zero. Returns `None` if the agent does not exist.
    async fn decrement_agent_load(&self, id: AgentId) -> StoreResult<Option<SupportAgent>>;

    // ---- stats ----

    /// Cheap round trip proving the backend is reachable.
    async fn health_check(&self) -> StoreResult<()>;

    /// Status counts, creation counts for each window and the first-response average.
    async fn session_counts(&self, windows: &StatsWindows) -> StoreResult<SessionCounts>;
}
