//! PostgreSQL session store

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{AppendedMessage, SessionStore};
use crate::error::{StoreError, StoreResult};
use crate::types::{
    AgentId, AgentUpdate, ChatMessage, ChatSession, MessageId, MessageSender, SessionCounts,
    SessionId, SessionPriority, SessionQuery, SessionSort, SessionStatus, SortOrder, StatsWindows,
    SupportAgent, UserId,
};

macro_rules! session_columns {
    () => {
        "id, user_id, support_agent_id, status, priority, created_at, assigned_at, last_message_at"
    };
}

macro_rules! agent_columns {
    () => {
        "id, user_id, name, email, is_active, max_concurrent_chats, current_active_chats, created_at"
    };
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(Debug, FromRow)]
struct SessionRow {
    id: Uuid,
    user_id: Uuid,
    support_agent_id: Option<Uuid>,
    status: String,
    priority: String,
    created_at: OffsetDateTime,
    assigned_at: Option<OffsetDateTime>,
    last_message_at: OffsetDateTime,
}

impl TryFrom<SessionRow> for ChatSession {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(ChatSession {
            id: row.id.into(),
            user_id: row.user_id.into(),
            support_agent_id: row.support_agent_id.map(AgentId::from),
            status: row.status.parse()?,
            priority: row.priority.parse()?,
            created_at: row.created_at,
            assigned_at: row.assigned_at,
            last_message_at: row.last_message_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: Uuid,
    session_id: Uuid,
    message: String,
    sender: String,
    sent_at: OffsetDateTime,
    is_read: bool,
}

impl TryFrom<MessageRow> for ChatMessage {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(ChatMessage {
            id: row.id.into(),
            session_id: row.session_id.into(),
            body: row.message,
            sender: row.sender.parse()?,
            timestamp: row.sent_at,
            is_read: row.is_read,
        })
    }
}

#[derive(Debug, FromRow)]
struct AgentRow {
    id: Uuid,
    user_id: Uuid,
    name: String,
    email: String,
    is_active: bool,
    max_concurrent_chats: i32,
    current_active_chats: i32,
    created_at: OffsetDateTime,
}

impl From<AgentRow> for SupportAgent {
    fn from(row: AgentRow) -> Self {
        SupportAgent {
            id: row.id.into(),
            user_id: row.user_id.into(),
            name: row.name,
            email: row.email,
            is_active: row.is_active,
            max_concurrent_chats: row.max_concurrent_chats,
            current_active_chats: row.current_active_chats,
            created_at: row.created_at,
        }
    }
}

fn sessions_from_rows(rows: Vec<SessionRow>) -> StoreResult<Vec<ChatSession>> {
    rows.into_iter().map(ChatSession::try_from).collect()
}

fn session_from_row(row: Option<SessionRow>) -> StoreResult<Option<ChatSession>> {
    row.map(ChatSession::try_from).transpose()
}

// =============================================================================
// Store
// =============================================================================

/// [`SessionStore`] backed by PostgreSQL
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn insert_session(&self, session: &ChatSession) -> StoreResult<()> {
        // chat_sessions_one_open_per_user turns a duplicate into a unique violation
        sqlx::query(
            r#"
            INSERT INTO chat_sessions
                (id, user_id, support_agent_id, status, priority, created_at, assigned_at, last_message_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(session.id.0)
        .bind(session.user_id.0)
        .bind(session.support_agent_id.map(|a| a.0))
        .bind(session.status.as_str())
        .bind(session.priority.as_str())
        .bind(session.created_at)
        .bind(session.assigned_at)
        .bind(session.last_message_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_session(&self, id: SessionId) -> StoreResult<Option<ChatSession>> {
        let row: Option<SessionRow> = sqlx::query_as(concat!(
            "SELECT ",
            session_columns!(),
            " FROM chat_sessions WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        session_from_row(row)
    }

    async fn find_open_session_for_user(
        &self,
        user_id: UserId,
    ) -> StoreResult<Option<ChatSession>> {
        let row: Option<SessionRow> = sqlx::query_as(concat!(
            "SELECT ",
            session_columns!(),
            " FROM chat_sessions WHERE user_id = $1 AND status IN ('pending', 'active')"
        ))
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        session_from_row(row)
    }

    async fn list_sessions_by_status(
        &self,
        status: SessionStatus,
    ) -> StoreResult<Vec<ChatSession>> {
        let rows: Vec<SessionRow> = sqlx::query_as(concat!(
            "SELECT ",
            session_columns!(),
            " FROM chat_sessions WHERE status = $1 ORDER BY last_message_at DESC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        sessions_from_rows(rows)
    }

    async fn list_sessions(&self, query: &SessionQuery) -> StoreResult<(Vec<ChatSession>, i64)> {
        let sort_column = match query.sort_by {
            SessionSort::CreatedAt => "created_at",
            SessionSort::LastMessageAt => "last_message_at",
            SessionSort::Priority => {
                "CASE priority WHEN 'low' THEN 0 WHEN 'medium' THEN 1 ELSE 2 END"
            }
        };
        let direction = match query.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let sql = format!(
            "SELECT {} FROM chat_sessions WHERE ($1::text IS NULL OR status = $1) \
             ORDER BY {} {}, id LIMIT $2 OFFSET $3",
            session_columns!(),
            sort_column,
            direction
        );
        let status = query.status.map(|s| s.as_str());

        let rows: Vec<SessionRow> = sqlx::query_as(&sql)
            .bind(status)
            .bind(i64::from(query.limit))
            .bind(query.offset() as i64)
            .fetch_all(&self.pool)
            .await?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chat_sessions WHERE ($1::text IS NULL OR status = $1)",
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        Ok((sessions_from_rows(rows)?, total))
    }

    async fn list_idle_open_sessions(
        &self,
        before: OffsetDateTime,
    ) -> StoreResult<Vec<ChatSession>> {
        let rows: Vec<SessionRow> = sqlx::query_as(concat!(
            "SELECT ",
            session_columns!(),
            " FROM chat_sessions WHERE status IN ('pending', 'active') AND last_message_at < $1"
        ))
        .bind(before)
        .fetch_all(&self.pool)
        .await?;

        sessions_from_rows(rows)
    }

    async fn update_priority(
        &self,
        id: SessionId,
        priority: SessionPriority,
    ) -> StoreResult<Option<ChatSession>> {
        let row: Option<SessionRow> = sqlx::query_as(concat!(
            "UPDATE chat_sessions SET priority = $2, updated_at = NOW() WHERE id = $1 RETURNING ",
            session_columns!()
        ))
        .bind(id.0)
        .bind(priority.as_str())
        .fetch_optional(&self.pool)
        .await?;

        session_from_row(row)
    }

    async fn assign_session(
        &self,
        id: SessionId,
        agent_id: AgentId,
        expected_agent: Option<AgentId>,
        at: OffsetDateTime,
    ) -> StoreResult<Option<ChatSession>> {
        let row: Option<SessionRow> = sqlx::query_as(concat!(
            r#"
            UPDATE chat_sessions
            SET support_agent_id = $2, assigned_at = $3, status = 'active', updated_at = NOW()
            WHERE id = $1
              AND status <> 'closed'
              AND support_agent_id IS NOT DISTINCT FROM $4
            RETURNING "#,
            session_columns!()
        ))
        .bind(id.0)
        .bind(agent_id.0)
        .bind(at)
        .bind(expected_agent.map(|a| a.0))
        .fetch_optional(&self.pool)
        .await?;

        session_from_row(row)
    }

    async fn unassign_session(
        &self,
        id: SessionId,
        agent_id: AgentId,
    ) -> StoreResult<Option<ChatSession>> {
        let row: Option<SessionRow> = sqlx::query_as(concat!(
            r#"
            UPDATE chat_sessions
            SET support_agent_id = NULL, assigned_at = NULL, status = 'pending', updated_at = NOW()
            WHERE id = $1 AND status <> 'closed' AND support_agent_id = $2
            RETURNING "#,
            session_columns!()
        ))
        .bind(id.0)
        .bind(agent_id.0)
        .fetch_optional(&self.pool)
        .await?;

        session_from_row(row)
    }

    async fn close_session(&self, id: SessionId) -> StoreResult<Option<ChatSession>> {
        let row: Option<SessionRow> = sqlx::query_as(concat!(
            "UPDATE chat_sessions SET status = 'closed', updated_at = NOW() \
             WHERE id = $1 AND status <> 'closed' RETURNING ",
            session_columns!()
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        session_from_row(row)
    }

    async fn append_message(
        &self,
        session_id: SessionId,
        sender: MessageSender,
        body: &str,
    ) -> StoreResult<Option<AppendedMessage>> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes appends per session so timestamps never go backwards
        let previous: Option<String> =
            sqlx::query_scalar("SELECT status FROM chat_sessions WHERE id = $1 FOR UPDATE")
                .bind(session_id.0)
                .fetch_optional(&mut *tx)
                .await?;
        let previous_status: SessionStatus = match previous {
            Some(status) => status.parse()?,
            None => return Ok(None),
        };
        if !previous_status.is_open() {
            return Ok(None);
        }

        let row: SessionRow = sqlx::query_as(concat!(
            r#"
            UPDATE chat_sessions
            SET last_message_at = GREATEST(clock_timestamp(), last_message_at),
                status = CASE WHEN $2 = 'user' AND status = 'pending' THEN 'active' ELSE status END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING "#,
            session_columns!()
        ))
        .bind(session_id.0)
        .bind(sender.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let session = ChatSession::try_from(row)?;

        let message: MessageRow = sqlx::query_as(
            r#"
            INSERT INTO chat_messages (id, session_id, message, sender, sent_at, is_read)
            VALUES ($1, $2, $3, $4, $5, false)
            RETURNING id, session_id, message, sender, sent_at, is_read
            "#,
        )
        .bind(MessageId::new().0)
        .bind(session_id.0)
        .bind(body)
        .bind(sender.as_str())
        .bind(session.last_message_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(AppendedMessage {
            message: message.try_into()?,
            session,
            previous_status,
        }))
    }

    async fn list_messages(&self, session_id: SessionId) -> StoreResult<Vec<ChatMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, message, sender, sent_at, is_read
            FROM chat_messages
            WHERE session_id = $1
            ORDER BY sent_at ASC, id ASC
            "#,
        )
        .bind(session_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ChatMessage::try_from).collect()
    }

    async fn mark_support_messages_read(&self, session_id: SessionId) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE chat_messages SET is_read = true \
             WHERE session_id = $1 AND sender = 'support' AND is_read = false",
        )
        .bind(session_id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn insert_agent(&self, agent: &SupportAgent) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO support_agents
                (id, user_id, name, email, is_active, max_concurrent_chats, current_active_chats, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(agent.id.0)
        .bind(agent.user_id.0)
        .bind(&agent.name)
        .bind(&agent.email)
        .bind(agent.is_active)
        .bind(agent.max_concurrent_chats)
        .bind(agent.current_active_chats)
        .bind(agent.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_agent(&self, id: AgentId) -> StoreResult<Option<SupportAgent>> {
        let row: Option<AgentRow> = sqlx::query_as(concat!(
            "SELECT ",
            agent_columns!(),
            " FROM support_agents WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn find_agent_by_user(&self, user_id: UserId) -> StoreResult<Option<SupportAgent>> {
        let row: Option<AgentRow> = sqlx::query_as(concat!(
            "SELECT ",
            agent_columns!(),
            " FROM support_agents WHERE user_id = $1"
        ))
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn list_agents(&self) -> StoreResult<Vec<SupportAgent>> {
        let rows: Vec<AgentRow> = sqlx::query_as(concat!(
            "SELECT ",
            agent_columns!(),
            " FROM support_agents ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_active_agents(&self) -> StoreResult<Vec<SupportAgent>> {
        let rows: Vec<AgentRow> = sqlx::query_as(concat!(
            "SELECT ",
            agent_columns!(),
            " FROM support_agents WHERE is_active ORDER BY current_active_chats ASC, created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update_agent(
        &self,
        id: AgentId,
        update: &AgentUpdate,
    ) -> StoreResult<Option<SupportAgent>> {
        let row: Option<AgentRow> = sqlx::query_as(concat!(
            r#"
            UPDATE support_agents
            SET name = COALESCE($2, name),
                email = COALESCE($3, email),
                is_active = COALESCE($4, is_active),
                max_concurrent_chats = COALESCE($5, max_concurrent_chats),
                updated_at = NOW()
            WHERE id = $1
            RETURNING "#,
            agent_columns!()
        ))
        .bind(id.0)
        .bind(update.name.as_deref())
        .bind(update.email.as_deref())
        .bind(update.is_active)
        .bind(update.max_concurrent_chats)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn try_increment_agent_load(&self, id: AgentId) -> StoreResult<Option<SupportAgent>> {
        // Check and increment in one statement; concurrent callers re-evaluate
        // the WHERE clause against the committed row.
        let row: Option<AgentRow> = sqlx::query_as(concat!(
            r#"
            UPDATE support_agents
            SET current_active_chats = current_active_chats + 1, updated_at = NOW()
            WHERE id = $1 AND is_active AND current_active_chats < max_concurrent_chats
            RETURNING "#,
            agent_columns!()
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn decrement_agent_load(&self, id: AgentId) -> StoreResult<Option<SupportAgent>> {
        let row: Option<AgentRow> = sqlx::query_as(concat!(
            r#"
            UPDATE support_agents
            SET current_active_chats = GREATEST(current_active_chats - 1, 0), updated_at = NOW()
            WHERE id = $1
            RETURNING "#,
            agent_columns!()
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn session_counts(&self, windows: &StatsWindows) -> StoreResult<SessionCounts> {
        // EXTRACT returns NUMERIC, so cast the average to float8
        let stats: (i64, i64, i64, i64, i64, i64, i64, Option<f64>) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) as total_sessions,
                COUNT(*) FILTER (WHERE status = 'active') as active_sessions,
                COUNT(*) FILTER (WHERE status = 'pending') as pending_sessions,
                COUNT(*) FILTER (WHERE status = 'closed') as closed_sessions,
                COUNT(*) FILTER (WHERE created_at >= $1) as sessions_today,
                COUNT(*) FILTER (WHERE created_at >= $2) as sessions_this_week,
                COUNT(*) FILTER (WHERE created_at >= $3) as sessions_this_month,
                (
                    SELECT AVG(EXTRACT(EPOCH FROM (r.first_reply - s.created_at)))::float8
                    FROM chat_sessions s
                    JOIN LATERAL (
                        SELECT MIN(m.sent_at) AS first_reply
                        FROM chat_messages m
                        WHERE m.session_id = s.id AND m.sender = 'support'
                    ) r ON r.first_reply IS NOT NULL
                ) as avg_first_response_secs
            FROM chat_sessions
            "#,
        )
        .bind(windows.day_start)
        .bind(windows.week_start)
        .bind(windows.month_start)
        .fetch_one(&self.pool)
        .await?;

        Ok(SessionCounts {
            total: stats.0,
            active: stats.1,
            pending: stats.2,
            closed: stats.3,
            created_today: stats.4,
            created_this_week: stats.5,
            created_this_month: stats.6,
            avg_first_response_secs: stats.7,
        })
    }
}
