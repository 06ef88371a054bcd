//! WebSocket event types and serialization
//!
//! Frames are JSON objects tagged by `type` with kebab-case event names and
//! camelCase payload fields.

use livedesk_shared::{
    ChatMessage, ChatSession, Role, SessionId, SessionPriority, SessionStatus, UserId,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::chat::ChatStats;

// =============================================================================
// Client-to-Server Events
// =============================================================================

/// Events sent from client to server
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// Enter a session room and fetch its history
    JoinSession { session_id: SessionId },

    /// Send a message; the sender is derived from the connection's role
    SendMessage {
        session_id: SessionId,
        message: String,
    },

    /// Typing indicator, not persisted
    Typing {
        session_id: SessionId,
        #[serde(default = "default_is_typing")]
        is_typing: bool,
    },

    /// Mark all support messages in the session as read
    MarkRead { session_id: SessionId },

    /// Heartbeat ping to keep connection alive
    Ping,
}

fn default_is_typing() -> bool {
    true
}

// =============================================================================
// Server-to-Client Events
// =============================================================================

/// Events sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Connection acknowledged
    Connected { user_id: UserId, role: Role },

    /// Caller joined a session room
    SessionJoined {
        session: ChatSession,
        messages: Vec<ChatMessage>,
    },

    /// Message posted in a session room
    NewMessage { message: ChatMessage },

    /// User message, for the support room
    NewUserMessage {
        session_id: SessionId,
        user_id: UserId,
        message: ChatMessage,
    },

    /// Support reply, sent directly to the session's user
    NewSupportMessage {
        session_id: SessionId,
        message: ChatMessage,
    },

    UserTyping {
        session_id: SessionId,
        user_id: UserId,
        is_typing: bool,
    },

    MessagesMarkedRead { session_id: SessionId, count: u64 },

    /// Session handed to the receiving agent
    SessionAssigned { session_id: SessionId },

    /// A session entered the pending queue
    NewPendingSession {
        session_id: SessionId,
        user_id: UserId,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },

    SessionClosed {
        session_id: SessionId,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
    },

    SessionStatusChanged {
        session_id: SessionId,
        status: SessionStatus,
    },

    SessionPriorityChanged {
        session_id: SessionId,
        priority: SessionPriority,
    },

    /// Pending queue, sent to agents on connect
    PendingSessions { sessions: Vec<ChatSession> },

    /// Dashboard snapshot for the support room
    StatsUpdate(ChatStats),

    /// Heartbeat response
    Pong,

    /// Error message
    Error { message: String },
}

impl ServerEvent {
    /// Event name as it appears in the `type` field
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::SessionJoined { .. } => "session-joined",
            ServerEvent::NewMessage { .. } => "new-message",
            ServerEvent::NewUserMessage { .. } => "new-user-message",
            ServerEvent::NewSupportMessage { .. } => "new-support-message",
            ServerEvent::UserTyping { .. } => "user-typing",
            ServerEvent::MessagesMarkedRead { .. } => "messages-marked-read",
            ServerEvent::SessionAssigned { .. } => "session-assigned",
            ServerEvent::NewPendingSession { .. } => "new-pending-session",
            ServerEvent::SessionClosed { .. } => "session-closed",
            ServerEvent::SessionStatusChanged { .. } => "session-status-changed",
            ServerEvent::SessionPriorityChanged { .. } => "session-priority-changed",
            ServerEvent::PendingSessions { .. } => "pending-sessions",
            ServerEvent::StatsUpdate(_) => "stats-update",
            ServerEvent::Pong => "pong",
            ServerEvent::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_client_event_deserialization() {
        let json = r#"{"type":"send-message","sessionId":"550e8400-e29b-41d4-a716-446655440000","message":"hello"}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        match event {
            ClientEvent::SendMessage {
                session_id,
                message,
            } => {
                assert_eq!(
                    session_id.to_string(),
                    "550e8400-e29b-41d4-a716-446655440000"
                );
                assert_eq!(message, "hello");
            }
            _ => panic!("Expected SendMessage event"),
        }
    }

    #[test]
    fn test_typing_defaults_to_true() {
        let json = r#"{"type":"typing","sessionId":"550e8400-e29b-41d4-a716-446655440000"}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, ClientEvent::Typing { is_typing: true, .. }));
    }

    #[test]
    fn test_unknown_event_rejected() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"type":"subscribe"}"#).is_err());
    }

    #[test]
    fn test_server_event_serialization() {
        let event = ServerEvent::Pong;
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"pong"}"#);
    }

    #[test]
    fn test_session_closed_omits_missing_user() {
        let session_id = SessionId::new();
        let value = serde_json::to_value(ServerEvent::SessionClosed {
            session_id,
            user_id: None,
        })
        .unwrap();
        assert_eq!(
            value,
            json!({"type": "session-closed", "sessionId": session_id.to_string()})
        );
    }

    #[test]
    fn test_stats_update_is_flat() {
        let stats = ChatStats {
            total_sessions: 3,
            active_sessions: 1,
            pending_sessions: 1,
            closed_sessions: 1,
            average_response_time: None,
            sessions_today: 3,
            sessions_this_week: 3,
            sessions_this_month: 3,
            generated_at: OffsetDateTime::UNIX_EPOCH,
        };
        let value: Value = serde_json::to_value(ServerEvent::StatsUpdate(stats)).unwrap();
        assert_eq!(value["type"], "stats-update");
        assert_eq!(value["totalSessions"], 3);
        assert!(value["averageResponseTime"].is_null());
    }

    #[test]
    fn test_names_match_wire_tags() {
        let events = [
            ServerEvent::Pong,
            ServerEvent::SessionAssigned {
                session_id: SessionId::new(),
            },
            ServerEvent::Error {
                message: "oops".to_string(),
            },
        ];
        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["type"], event.name());
        }
    }
}
