//! Realtime router
//!
//! Drives the chat core from websocket events and REST calls, then fans the
//! resulting events out through the connection registry. Every state change
//! is persisted first and notified second; delivery is best-effort and never
//! affects the outcome of the write.
//!
//! Writes to one session are serialized by a per-session lock held across
//! persist and notify, so every room sees that session's messages in the
//! order they were stored. Unrelated sessions never wait on each other.

use livedesk_shared::{
    AgentId, ChatError, ChatMessage, ChatResult, ChatSession, Identity, MessageSender, SessionId,
    SessionPriority, SessionStatus, UserId,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use time::OffsetDateTime;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};

use super::connection::Connection;
use super::events::{ClientEvent, ServerEvent};
use super::registry::ConnectionRegistry;
use crate::chat::{
    AgentDirectory, Assignment, CapacityManager, ChatStats, SessionClose, SessionEngine,
    StatsAggregator,
};

type LockMap = Arc<StdMutex<HashMap<SessionId, Arc<Mutex<()>>>>>;

fn lock_map(locks: &LockMap) -> MutexGuard<'_, HashMap<SessionId, Arc<Mutex<()>>>> {
    // The map is never left half-updated, so a poisoned lock is still usable
    locks.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-session write locks.
///
/// An entry lives only while some caller holds or waits on it.
#[derive(Clone, Default)]
struct SessionLocks {
    locks: LockMap,
}

impl SessionLocks {
    async fn acquire(&self, session_id: SessionId) -> SessionGuard {
        let lock = Arc::clone(lock_map(&self.locks).entry(session_id).or_default());
        // Registered before waiting so a cancelled wait still cleans up
        let entry = LockEntry {
            session_id,
            lock: Some(Arc::clone(&lock)),
            locks: Arc::clone(&self.locks),
        };
        let guard = lock.lock_owned().await;
        SessionGuard {
            _guard: guard,
            _entry: entry,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        lock_map(&self.locks).len()
    }
}

/// Holds a session lock; fields drop in order, releasing the lock first
struct SessionGuard {
    _guard: OwnedMutexGuard<()>,
    _entry: LockEntry,
}

struct LockEntry {
    session_id: SessionId,
    lock: Option<Arc<Mutex<()>>>,
    locks: LockMap,
}

impl Drop for LockEntry {
    fn drop(&mut self) {
        drop(self.lock.take());
        let mut locks = lock_map(&self.locks);
        // Only the map's own reference left: nobody holds or waits on it
        let unused = locks
            .get(&self.session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if unused {
            locks.remove(&self.session_id);
        }
    }
}

/// Who is closing a session
#[derive(Debug, Clone, Copy)]
pub enum Closer {
    User(UserId),
    Agent(AgentId),
    /// Inactivity sweep
    System,
}

#[derive(Clone)]
pub struct RealtimeRouter {
    engine: SessionEngine,
    capacity: CapacityManager,
    agents: AgentDirectory,
    stats: StatsAggregator,
    registry: ConnectionRegistry,
    auto_assign: bool,
    locks: SessionLocks,
}

impl RealtimeRouter {
    pub fn new(
        engine: SessionEngine,
        capacity: CapacityManager,
        agents: AgentDirectory,
        stats: StatsAggregator,
        registry: ConnectionRegistry,
        auto_assign: bool,
    ) -> Self {
        Self {
            engine,
            capacity,
            agents,
            stats,
            registry,
            auto_assign,
            locks: SessionLocks::default(),
        }
    }

    pub fn engine(&self) -> &SessionEngine {
        &self.engine
    }

    pub fn capacity(&self) -> &CapacityManager {
        &self.capacity
    }

    pub fn agents(&self) -> &AgentDirectory {
        &self.agents
    }

    pub fn stats(&self) -> &StatsAggregator {
        &self.stats
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Register an authenticated connection and send its greeting.
    ///
    /// Staff join the support room and receive the pending queue.
    pub async fn connect(
        &self,
        identity: Identity,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> Arc<Connection> {
        let agent_id = if identity.role.is_agent_like() {
            match self.agents.for_user(identity.user_id).await {
                Ok(agent) => agent.map(|a| a.id),
                Err(e) => {
                    tracing::error!(error = %e, user_id = %identity.user_id, "Failed to load agent profile");
                    None
                }
            }
        } else {
            None
        };

        let conn = self
            .registry
            .register(Connection::new(identity, agent_id, sender))
            .await;

        let _ = conn.send(ServerEvent::Connected {
            user_id: identity.user_id,
            role: identity.role,
        });

        if conn.is_agent_like() {
            match self.engine.list_by_status(SessionStatus::Pending).await {
                Ok(sessions) => {
                    let _ = conn.send(ServerEvent::PendingSessions { sessions });
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to load pending sessions");
                    let _ = conn.send(ServerEvent::Error {
                        message: "Failed to load pending sessions".to_string(),
                    });
                }
            }
        }

        conn
    }

    /// Local cleanup only; nothing is sent to anyone
    pub async fn disconnect(&self, conn: &Connection) {
        self.registry.unregister(conn.id).await;
    }

    // =========================================================================
    // Client events
    // =========================================================================

    /// Handle one client event. Failures become an `error` event on the caller.
    pub async fn handle_event(&self, conn: &Arc<Connection>, event: ClientEvent) {
        let result = match event {
            ClientEvent::JoinSession { session_id } => self.join_session(conn, session_id).await,
            ClientEvent::SendMessage {
                session_id,
                message,
            } => self.send_from_connection(conn, session_id, &message).await,
            ClientEvent::Typing {
                session_id,
                is_typing,
            } => {
                self.registry
                    .send_to_session_room(
                        session_id,
                        ServerEvent::UserTyping {
                            session_id,
                            user_id: conn.user_id(),
                            is_typing,
                        },
                        Some(conn.id),
                    )
                    .await;
                Ok(())
            }
            ClientEvent::MarkRead { session_id } => self
                .engine
                .mark_read(session_id, conn.user_id())
                .await
                .map(|count| {
                    let _ = conn.send(ServerEvent::MessagesMarkedRead { session_id, count });
                }),
            ClientEvent::Ping => {
                let _ = conn.send(ServerEvent::Pong);
                Ok(())
            }
        };

        if let Err(e) = result {
            match &e {
                ChatError::Store(_) => {
                    tracing::error!(connection_id = %conn.id, error = %e, "Event handling failed")
                }
                _ => tracing::debug!(connection_id = %conn.id, code = e.code(), error = %e, "Event rejected"),
            }
            let _ = conn.send(ServerEvent::Error {
                message: e.to_string(),
            });
        }
    }

    async fn join_session(&self, conn: &Connection, session_id: SessionId) -> ChatResult<()> {
        let (session, messages) = self.engine.history(session_id, &conn.identity).await?;
        self.registry.join_session_room(conn.id, session_id).await;
        let _ = conn.send(ServerEvent::SessionJoined { session, messages });
        Ok(())
    }

    async fn send_from_connection(
        &self,
        conn: &Connection,
        session_id: SessionId,
        body: &str,
    ) -> ChatResult<()> {
        match conn.identity.role.sender() {
            MessageSender::Support => {
                let agent_id = match conn.agent_id {
                    Some(agent_id) => agent_id,
                    None => self.agent_id_for(&conn.identity).await?,
                };
                self.send_support_message(agent_id, session_id, body).await?;
            }
            MessageSender::User => {
                self.send_user_message(conn.user_id(), session_id, body)
                    .await?;
            }
        }
        Ok(())
    }

    /// Agent profile of a staff identity
    pub async fn agent_id_for(&self, identity: &Identity) -> ChatResult<AgentId> {
        self.agents
            .for_user(identity.user_id)
            .await?
            .map(|agent| agent.id)
            .ok_or_else(|| ChatError::not_found("No support agent profile for this account"))
    }

    // =========================================================================
    // State changes with notifications
    // =========================================================================

    /// Open a session and announce it to the support room
    pub async fn create_session(
        &self,
        user_id: UserId,
        priority: Option<SessionPriority>,
    ) -> ChatResult<ChatSession> {
        let session = self.engine.create_session(user_id, priority).await?;
        let _guard = self.locks.acquire(session.id).await;

        self.registry
            .send_to_support_room(ServerEvent::NewPendingSession {
                session_id: session.id,
                user_id,
                timestamp: session.created_at,
            })
            .await;

        if !self.auto_assign {
            return Ok(session);
        }
        // The session exists regardless of whether an agent is found
        match self.capacity.auto_assign(session.id).await {
            Ok(Some(assignment)) => {
                let assigned = assignment.session.clone();
                self.notify_assignment(&assignment).await;
                Ok(assigned)
            }
            Ok(None) => Ok(session),
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "Auto-assign failed");
                Ok(session)
            }
        }
    }

    pub async fn send_user_message(
        &self,
        user_id: UserId,
        session_id: SessionId,
        body: &str,
    ) -> ChatResult<ChatMessage> {
        let _guard = self.locks.acquire(session_id).await;
        let appended = self
            .engine
            .append_user_message(session_id, user_id, body)
            .await?;
        let message = appended.message;

        self.registry
            .send_to_session_room(
                session_id,
                ServerEvent::NewMessage {
                    message: message.clone(),
                },
                None,
            )
            .await;
        self.registry
            .send_to_support_room(ServerEvent::NewUserMessage {
                session_id,
                user_id,
                message: message.clone(),
            })
            .await;
        if appended.previous_status != appended.session.status {
            self.registry
                .send_to_support_room(ServerEvent::SessionStatusChanged {
                    session_id,
                    status: appended.session.status,
                })
                .await;
        }

        Ok(message)
    }

    pub async fn send_support_message(
        &self,
        agent_id: AgentId,
        session_id: SessionId,
        body: &str,
    ) -> ChatResult<ChatMessage> {
        let _guard = self.locks.acquire(session_id).await;
        let appended = self
            .engine
            .append_support_message(session_id, agent_id, body)
            .await?;
        let message = appended.message;

        self.registry
            .send_to_session_room(
                session_id,
                ServerEvent::NewMessage {
                    message: message.clone(),
                },
                None,
            )
            .await;
        self.registry
            .send_to_user(
                appended.session.user_id,
                ServerEvent::NewSupportMessage {
                    session_id,
                    message: message.clone(),
                },
            )
            .await;

        Ok(message)
    }

    /// Mark support messages read and acknowledge to the user's latest connection
    pub async fn mark_read(&self, user_id: UserId, session_id: SessionId) -> ChatResult<u64> {
        let count = self.engine.mark_read(session_id, user_id).await?;
        self.registry
            .send_to_user(
                user_id,
                ServerEvent::MessagesMarkedRead { session_id, count },
            )
            .await;
        Ok(count)
    }

    pub async fn assign(&self, session_id: SessionId, agent_id: AgentId) -> ChatResult<ChatSession> {
        let _guard = self.locks.acquire(session_id).await;
        let assignment = self.capacity.assign(session_id, agent_id).await?;
        self.notify_assignment(&assignment).await;
        Ok(assignment.session)
    }

    async fn notify_assignment(&self, assignment: &Assignment) {
        let session_id = assignment.session.id;
        let event = ServerEvent::SessionAssigned { session_id };
        // Staff whose profile was created after they connected are only known by account
        if !self
            .registry
            .send_to_agent(assignment.agent.id, event.clone())
            .await
        {
            self.registry
                .send_to_user(assignment.agent.user_id, event)
                .await;
        }
        self.notify_status(session_id, assignment.session.status)
            .await;
    }

    async fn notify_status(&self, session_id: SessionId, status: SessionStatus) {
        let event = ServerEvent::SessionStatusChanged { session_id, status };
        self.registry
            .send_to_session_room(session_id, event.clone(), None)
            .await;
        self.registry.send_to_support_room(event).await;
    }

    /// Hand a session back to the pending queue
    pub async fn unassign(&self, session_id: SessionId, agent_id: AgentId) -> ChatResult<ChatSession> {
        let _guard = self.locks.acquire(session_id).await;
        let session = self.capacity.unassign(session_id, agent_id).await?;

        self.notify_status(session_id, session.status).await;
        self.registry
            .send_to_support_room(ServerEvent::NewPendingSession {
                session_id,
                user_id: session.user_id,
                timestamp: OffsetDateTime::now_utc(),
            })
            .await;
        Ok(session)
    }

    /// Close a session, release its agent's slot and notify both rooms.
    ///
    /// Closing an already closed session succeeds without side effects.
    pub async fn close(&self, session_id: SessionId, closer: Closer) -> ChatResult<ChatSession> {
        let guard = self.locks.acquire(session_id).await;
        let SessionClose {
            session,
            transitioned,
        } = match closer {
            Closer::User(user_id) => self.engine.close_session(session_id, user_id).await?,
            Closer::Agent(agent_id) => {
                self.engine
                    .close_session_as_agent(session_id, agent_id)
                    .await?
            }
            Closer::System => self.engine.close_session_unchecked(session_id).await?,
        };
        if !transitioned {
            return Ok(session);
        }

        if let Some(agent_id) = session.support_agent_id {
            // The close is committed; a failed release is logged, not surfaced
            if let Err(e) = self.capacity.release(agent_id).await {
                tracing::error!(session_id = %session_id, agent_id = %agent_id, error = %e, "Failed to release agent capacity");
            }
        }

        self.registry
            .send_to_session_room(
                session_id,
                ServerEvent::SessionClosed {
                    session_id,
                    user_id: None,
                },
                None,
            )
            .await;
        self.registry
            .send_to_support_room(ServerEvent::SessionClosed {
                session_id,
                user_id: Some(session.user_id),
            })
            .await;

        drop(guard);
        tracing::debug!(session_id = %session_id, closer = ?closer, "Session close notified");
        Ok(session)
    }

    pub async fn update_priority(
        &self,
        session_id: SessionId,
        priority: SessionPriority,
    ) -> ChatResult<ChatSession> {
        let _guard = self.locks.acquire(session_id).await;
        let session = self.engine.update_priority(session_id, priority).await?;

        let event = ServerEvent::SessionPriorityChanged {
            session_id,
            priority,
        };
        self.registry
            .send_to_session_room(session_id, event.clone(), None)
            .await;
        self.registry.send_to_support_room(event).await;
        Ok(session)
    }

    /// Push a stats snapshot to the support room
    pub async fn broadcast_stats(&self) -> ChatResult<ChatStats> {
        let stats = self.stats.snapshot().await?;
        let recipients = self
            .registry
            .send_to_support_room(ServerEvent::StatsUpdate(stats.clone()))
            .await;
        tracing::debug!(recipients, "Stats update broadcast");
        Ok(stats)
    }

    /// Close open sessions idle since `before`. Returns how many were closed.
    pub async fn close_idle_sessions(&self, before: OffsetDateTime) -> ChatResult<usize> {
        let idle = self.engine.idle_sessions(before).await?;
        let mut closed = 0;
        for session in idle {
            match self.close(session.id, Closer::System).await {
                Ok(_) => closed += 1,
                Err(e) => {
                    tracing::warn!(session_id = %session.id, error = %e, "Failed to auto-close idle session")
                }
            }
        }
        if closed > 0 {
            tracing::info!(closed, "Idle session sweep finished");
        }
        Ok(closed)
    }
}
