//! Common types used across Livedesk

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// ID Wrappers
// =============================================================================

macro_rules! id_wrapper {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

id_wrapper!(
    /// Account ID of an end user or staff member
    UserId
);
id_wrapper!(
    /// Chat session ID
    SessionId
);
id_wrapper!(
    /// Chat message ID
    MessageId
);
id_wrapper!(
    /// Support agent profile ID (distinct from the agent's account ID)
    AgentId
);

// =============================================================================
// Enums
// =============================================================================

/// Error returned when a stored or submitted enum value is not recognised
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ParseEnumError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

/// Lifecycle state of a chat session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Active,
    Closed,
}

text_enum!(SessionStatus, "session status", {
    Pending => "pending",
    Active => "active",
    Closed => "closed",
});

impl SessionStatus {
    /// Pending and active sessions count toward the one-open-session-per-user rule
    pub fn is_open(&self) -> bool {
        !matches!(self, SessionStatus::Closed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPriority {
    Low,
    #[default]
    Medium,
    High,
}

text_enum!(SessionPriority, "session priority", {
    Low => "low",
    Medium => "medium",
    High => "high",
});

impl SessionPriority {
    /// Numeric rank used when sorting by priority
    pub fn rank(&self) -> u8 {
        match self {
            SessionPriority::Low => 0,
            SessionPriority::Medium => 1,
            SessionPriority::High => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSender {
    User,
    Support,
}

text_enum!(MessageSender, "message sender", {
    User => "user",
    Support => "support",
});

/// Role carried by an authenticated identity
///
/// Behavior branches on this tag; there is no separate type per kind of account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Support,
    Admin,
    SuperAdmin,
}

text_enum!(Role, "role", {
    User => "user",
    Support => "support",
    Admin => "admin",
    SuperAdmin => "superadmin",
});

impl Role {
    /// Staff roles that act as support agents in chats
    pub fn is_agent_like(&self) -> bool {
        !matches!(self, Role::User)
    }

    /// Roles allowed to administer the agent directory
    pub fn is_elevated(&self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }

    /// Sender tag used for messages written by this role
    pub fn sender(&self) -> MessageSender {
        if self.is_agent_like() {
            MessageSender::Support
        } else {
            MessageSender::User
        }
    }
}

/// Verified identity handed to the core by the authentication layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: UserId,
    pub role: Role,
}

// =============================================================================
// Chat Types
// =============================================================================

/// One conversation thread between a user and support
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: SessionId,
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub support_agent_id: Option<AgentId>,
    pub status: SessionStatus,
    pub priority: SessionPriority,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub assigned_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_message_at: OffsetDateTime,
}

impl ChatSession {
    /// A fresh pending session for `user_id`
    pub fn new_pending(user_id: UserId, priority: SessionPriority, now: OffsetDateTime) -> Self {
        Self {
            id: SessionId::new(),
            user_id,
            support_agent_id: None,
            status: SessionStatus::Pending,
            priority,
            created_at: now,
            assigned_at: None,
            last_message_at: now,
        }
    }
}

/// A single message in a session. Append-only apart from `is_read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub session_id: SessionId,
    #[serde(rename = "message")]
    pub body: String,
    pub sender: MessageSender,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub is_read: bool,
}

/// A staff member able to take chats
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportAgent {
    pub id: AgentId,
    pub user_id: UserId,
    pub name: String,
    pub email: String,
    pub is_active: bool,
    pub max_concurrent_chats: i32,
    pub current_active_chats: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl SupportAgent {
    pub fn has_spare_capacity(&self) -> bool {
        self.current_active_chats < self.max_concurrent_chats
    }
}

/// Partial update applied to an agent profile
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub is_active: Option<bool>,
    pub max_concurrent_chats: Option<i32>,
}

// =============================================================================
// Queries
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionSort {
    CreatedAt,
    #[default]
    LastMessageAt,
    Priority,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Filter, ordering and paging for staff session listings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionQuery {
    pub status: Option<SessionStatus>,
    pub page: u32,
    pub limit: u32,
    pub sort_by: SessionSort,
    pub order: SortOrder,
}

impl Default for SessionQuery {
    fn default() -> Self {
        Self {
            status: None,
            page: 1,
            limit: 20,
            sort_by: SessionSort::default(),
            order: SortOrder::default(),
        }
    }
}

impl SessionQuery {
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

/// Time windows used when counting recently created sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsWindows {
    pub day_start: OffsetDateTime,
    pub week_start: OffsetDateTime,
    pub month_start: OffsetDateTime,
}

/// Raw aggregate numbers read from the store in one pass
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionCounts {
    pub total: i64,
    pub active: i64,
    pub pending: i64,
    pub closed: i64,
    pub created_today: i64,
    pub created_this_week: i64,
    pub created_this_month: i64,
    pub avg_first_response_secs: Option<f64>,
}
