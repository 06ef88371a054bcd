//! Connection registry
//!
//! Process-local bookkeeping of live connections: who is connected, which
//! session room each connection is in, and which connections form the
//! support room. All maps live behind one lock so a registration or removal
//! is never observed half-applied.

use livedesk_shared::{AgentId, SessionId, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::connection::{Connection, ConnectionId};
use super::events::ServerEvent;

#[derive(Default)]
struct RegistryInner {
    /// All active connections indexed by connection ID
    connections: HashMap<ConnectionId, Arc<Connection>>,
    /// Latest connection of each user
    users: HashMap<UserId, ConnectionId>,
    /// Latest connection of each agent
    agents: HashMap<AgentId, ConnectionId>,
    /// Session room each connection is in
    rooms_by_connection: HashMap<ConnectionId, SessionId>,
    /// Members of each session room
    session_rooms: HashMap<SessionId, HashSet<ConnectionId>>,
    /// Connected staff
    support_room: HashSet<ConnectionId>,
}

impl RegistryInner {
    fn leave_session_room(&mut self, conn_id: ConnectionId) -> Option<SessionId> {
        let session_id = self.rooms_by_connection.remove(&conn_id)?;
        if let Some(members) = self.session_rooms.get_mut(&session_id) {
            members.remove(&conn_id);
            // Clean up empty rooms
            if members.is_empty() {
                self.session_rooms.remove(&session_id);
            }
        }
        Some(session_id)
    }

    fn members<'a>(
        &'a self,
        ids: impl IntoIterator<Item = &'a ConnectionId>,
    ) -> Vec<Arc<Connection>> {
        ids.into_iter()
            .filter_map(|id| self.connections.get(id).cloned())
            .collect()
    }
}

/// Statistics about WebSocket connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub connections: usize,
    pub users: usize,
    pub agents: usize,
    pub session_rooms: usize,
    pub support_room: usize,
}

/// Shared registry of live connections
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under its user, and under its agent profile if it has one.
    ///
    /// A reconnecting identity replaces its previous mapping; the older
    /// connection stays open and keeps its room memberships.
    pub async fn register(&self, conn: Connection) -> Arc<Connection> {
        let conn = Arc::new(conn);
        let mut inner = self.inner.write().await;
        inner.connections.insert(conn.id, Arc::clone(&conn));
        inner.users.insert(conn.user_id(), conn.id);
        if let Some(agent_id) = conn.agent_id {
            inner.agents.insert(agent_id, conn.id);
        }
        if conn.is_agent_like() {
            inner.support_room.insert(conn.id);
        }

        tracing::info!(
            connection_id = %conn.id,
            user_id = %conn.user_id(),
            role = %conn.identity.role,
            agent_id = ?conn.agent_id,
            total_connections = inner.connections.len(),
            "WebSocket connection registered"
        );
        conn
    }

    /// Remove every mapping that points at `conn_id`. Unknown handles are a no-op.
    pub async fn unregister(&self, conn_id: ConnectionId) {
        let mut inner = self.inner.write().await;
        let Some(conn) = inner.connections.remove(&conn_id) else {
            return;
        };

        if inner.users.get(&conn.user_id()) == Some(&conn_id) {
            inner.users.remove(&conn.user_id());
        }
        if let Some(agent_id) = conn.agent_id {
            if inner.agents.get(&agent_id) == Some(&conn_id) {
                inner.agents.remove(&agent_id);
            }
        }
        inner.leave_session_room(conn_id);
        inner.support_room.remove(&conn_id);

        tracing::info!(
            connection_id = %conn_id,
            user_id = %conn.user_id(),
            remaining_connections = inner.connections.len(),
            "WebSocket connection removed"
        );
    }

    /// Move a connection into `session_id`'s room, leaving any previous room.
    ///
    /// Returns false if the connection is not registered.
    pub async fn join_session_room(&self, conn_id: ConnectionId, session_id: SessionId) -> bool {
        let mut inner = self.inner.write().await;
        if !inner.connections.contains_key(&conn_id) {
            return false;
        }
        let previous = inner.leave_session_room(conn_id);
        inner.rooms_by_connection.insert(conn_id, session_id);
        let members = inner.session_rooms.entry(session_id).or_default();
        members.insert(conn_id);

        tracing::debug!(
            connection_id = %conn_id,
            session_id = %session_id,
            previous_session = ?previous,
            room_size = members.len(),
            "Connection joined session room"
        );
        true
    }

    /// Session room the connection is currently in
    pub async fn current_room(&self, conn_id: ConnectionId) -> Option<SessionId> {
        let inner = self.inner.read().await;
        inner.rooms_by_connection.get(&conn_id).copied()
    }

    pub async fn resolve_user(&self, user_id: UserId) -> Option<Arc<Connection>> {
        let inner = self.inner.read().await;
        let conn_id = inner.users.get(&user_id)?;
        inner.connections.get(conn_id).cloned()
    }

    pub async fn resolve_agent(&self, agent_id: AgentId) -> Option<Arc<Connection>> {
        let inner = self.inner.read().await;
        let conn_id = inner.agents.get(&agent_id)?;
        inner.connections.get(conn_id).cloned()
    }

    pub async fn session_room_members(&self, session_id: SessionId) -> Vec<Arc<Connection>> {
        let inner = self.inner.read().await;
        match inner.session_rooms.get(&session_id) {
            Some(ids) => inner.members(ids),
            None => Vec::new(),
        }
    }

    pub async fn support_room_members(&self) -> Vec<Arc<Connection>> {
        let inner = self.inner.read().await;
        inner.members(&inner.support_room)
    }

    /// Broadcast to a session room, optionally skipping one connection.
    ///
    /// Returns the number of connections the event was queued for.
    pub async fn send_to_session_room(
        &self,
        session_id: SessionId,
        event: ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let members = self.session_room_members(session_id).await;
        let targets = members
            .iter()
            .filter(|c| Some(c.id) != exclude)
            .map(Arc::as_ref);
        deliver(targets, &event, "session room")
    }

    /// Broadcast to every connected staff member
    pub async fn send_to_support_room(&self, event: ServerEvent) -> usize {
        let members = self.support_room_members().await;
        deliver(members.iter().map(Arc::as_ref), &event, "support room")
    }

    /// Send to a user's latest connection. Returns false if the user is offline.
    pub async fn send_to_user(&self, user_id: UserId, event: ServerEvent) -> bool {
        match self.resolve_user(user_id).await {
            Some(conn) => deliver(std::iter::once(conn.as_ref()), &event, "user") > 0,
            None => {
                tracing::debug!(user_id = %user_id, event = event.name(), "User offline, event dropped");
                false
            }
        }
    }

    /// Send to an agent's latest connection. Returns false if the agent is offline.
    pub async fn send_to_agent(&self, agent_id: AgentId, event: ServerEvent) -> bool {
        match self.resolve_agent(agent_id).await {
            Some(conn) => deliver(std::iter::once(conn.as_ref()), &event, "agent") > 0,
            None => {
                tracing::debug!(agent_id = %agent_id, event = event.name(), "Agent offline, event dropped");
                false
            }
        }
    }

    pub async fn connection_count(&self) -> usize {
        let inner = self.inner.read().await;
        inner.connections.len()
    }

    pub async fn stats(&self) -> RegistryStats {
        let inner = self.inner.read().await;
        RegistryStats {
            connections: inner.connections.len(),
            users: inner.users.len(),
            agents: inner.agents.len(),
            session_rooms: inner.session_rooms.len(),
            support_room: inner.support_room.len(),
        }
    }
}

/// Queue `event` on each connection, ignoring closed ones.
///
/// Closed connections are cleaned up by their own disconnect path.
fn deliver<'a>(
    targets: impl Iterator<Item = &'a Connection>,
    event: &ServerEvent,
    target: &'static str,
) -> usize {
    let mut success_count = 0;
    let mut failed_count = 0;

    for conn in targets {
        match conn.send(event.clone()) {
            Ok(()) => success_count += 1,
            Err(_) => {
                failed_count += 1;
                tracing::warn!(
                    connection_id = %conn.id,
                    event = event.name(),
                    "Failed to send event to connection (likely closed)"
                );
            }
        }
    }

    tracing::debug!(
        target_kind = target,
        event = event.name(),
        recipients = success_count,
        failed = failed_count,
        "Delivered event"
    );
    success_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use livedesk_shared::{Identity, Role};
    use tokio::sync::mpsc;

    fn connection(
        role: Role,
        agent_id: Option<AgentId>,
    ) -> (Connection, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let identity = Identity {
            user_id: UserId::new(),
            role,
        };
        (Connection::new(identity, agent_id, tx), rx)
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let registry = ConnectionRegistry::new();
        let agent_id = AgentId::new();
        let (conn, _rx) = connection(Role::Support, Some(agent_id));
        let conn = registry.register(conn).await;

        assert!(registry.resolve_user(conn.user_id()).await.is_some());
        assert!(registry.resolve_agent(agent_id).await.is_some());
        assert_eq!(registry.support_room_members().await.len(), 1);

        registry.unregister(conn.id).await;
        let stats = registry.stats().await;
        assert_eq!(
            stats,
            RegistryStats {
                connections: 0,
                users: 0,
                agents: 0,
                session_rooms: 0,
                support_room: 0,
            }
        );

        // Second unregister is a no-op
        registry.unregister(conn.id).await;
    }

    #[tokio::test]
    async fn test_reconnect_is_last_write_wins() {
        let registry = ConnectionRegistry::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let identity = Identity {
            user_id: UserId::new(),
            role: Role::User,
        };

        let first = registry.register(Connection::new(identity, None, tx1)).await;
        let second = registry.register(Connection::new(identity, None, tx2)).await;
        let resolved = registry.resolve_user(identity.user_id).await.unwrap();
        assert_eq!(resolved.id, second.id);

        // Dropping the stale connection keeps the newer mapping
        registry.unregister(first.id).await;
        let resolved = registry.resolve_user(identity.user_id).await.unwrap();
        assert_eq!(resolved.id, second.id);
    }

    #[tokio::test]
    async fn test_joining_a_room_leaves_the_previous_one() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = connection(Role::User, None);
        let conn = registry.register(conn).await;
        let first = SessionId::new();
        let second = SessionId::new();

        assert!(registry.join_session_room(conn.id, first).await);
        assert!(registry.join_session_room(conn.id, second).await);

        assert!(registry.session_room_members(first).await.is_empty());
        assert_eq!(registry.session_room_members(second).await.len(), 1);
        assert_eq!(registry.current_room(conn.id).await, Some(second));
        assert_eq!(registry.stats().await.session_rooms, 1);
    }

    #[tokio::test]
    async fn test_unknown_connection_cannot_join() {
        let registry = ConnectionRegistry::new();
        assert!(
            !registry
                .join_session_room(ConnectionId::new_v4(), SessionId::new())
                .await
        );
    }

    #[tokio::test]
    async fn test_room_broadcast_excludes_sender() {
        let registry = ConnectionRegistry::new();
        let session_id = SessionId::new();
        let (a, mut rx_a) = connection(Role::User, None);
        let (b, mut rx_b) = connection(Role::Support, None);
        let a = registry.register(a).await;
        let b = registry.register(b).await;
        registry.join_session_room(a.id, session_id).await;
        registry.join_session_room(b.id, session_id).await;

        let sent = registry
            .send_to_session_room(session_id, ServerEvent::Pong, Some(a.id))
            .await;
        assert_eq!(sent, 1);
        assert!(rx_a.try_recv().is_err());
        assert!(matches!(rx_b.try_recv(), Ok(ServerEvent::Pong)));
    }

    #[tokio::test]
    async fn test_offline_recipient_is_skipped() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.send_to_user(UserId::new(), ServerEvent::Pong).await);
        assert!(!registry.send_to_agent(AgentId::new(), ServerEvent::Pong).await);
        assert_eq!(registry.send_to_support_room(ServerEvent::Pong).await, 0);
    }

    #[tokio::test]
    async fn test_closed_receiver_counts_as_failed() {
        let registry = ConnectionRegistry::new();
        let (conn, rx) = connection(Role::Admin, None);
        registry.register(conn).await;
        drop(rx);
        assert_eq!(registry.send_to_support_room(ServerEvent::Pong).await, 0);
    }
}
