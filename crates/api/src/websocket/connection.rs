//! WebSocket connection handle
//!
//! Represents an authenticated WebSocket connection. Events are queued on an
//! unbounded channel drained by the socket's send task.

use livedesk_shared::{AgentId, Identity, UserId};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::events::ServerEvent;

/// Opaque handle identifying one live connection
pub type ConnectionId = Uuid;

/// Represents an active WebSocket connection
#[derive(Debug)]
pub struct Connection {
    /// Unique ID for this connection
    pub id: ConnectionId,

    /// Authenticated caller
    pub identity: Identity,

    /// Agent profile of a staff caller, if the account has one
    pub agent_id: Option<AgentId>,

    /// Channel to send events to this connection
    pub sender: mpsc::UnboundedSender<ServerEvent>,
}

impl Connection {
    /// Create a new connection
    pub fn new(
        identity: Identity,
        agent_id: Option<AgentId>,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity,
            agent_id,
            sender,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.identity.user_id
    }

    /// Staff connections join the support room
    pub fn is_agent_like(&self) -> bool {
        self.identity.role.is_agent_like()
    }

    /// Send an event to this connection
    ///
    /// Returns Ok(()) if sent successfully, Err if connection is closed
    #[allow(clippy::result_large_err)] // Error type is from tokio mpsc, containing the failed event
    pub fn send(&self, event: ServerEvent) -> Result<(), mpsc::error::SendError<ServerEvent>> {
        self.sender.send(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livedesk_shared::Role;

    #[tokio::test]
    async fn test_send_after_receiver_dropped_fails() {
        let (tx, rx) = mpsc::unbounded_channel();
        let identity = Identity {
            user_id: UserId::new(),
            role: Role::User,
        };
        let conn = Connection::new(identity, None, tx);
        assert!(!conn.is_agent_like());
        assert!(conn.send(ServerEvent::Pong).is_ok());

        drop(rx);
        assert!(conn.send(ServerEvent::Pong).is_err());
    }
}
