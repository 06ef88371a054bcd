//! In-process session store
//!
//! All state sits behind one async mutex, so each trait method is trivially
//! atomic. Used as the store double in tests.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use super::{AppendedMessage, SessionStore};
use crate::error::{StoreError, StoreResult};
use crate::types::{
    AgentId, AgentUpdate, ChatMessage, ChatSession, MessageId, MessageSender, SessionCounts,
    SessionId, SessionPriority, SessionQuery, SessionSort, SessionStatus, SortOrder, StatsWindows,
    SupportAgent, UserId,
};

#[derive(Default)]
struct MemoryState {
    sessions: HashMap<SessionId, ChatSession>,
    messages: HashMap<SessionId, Vec<ChatMessage>>,
    agents: HashMap<AgentId, SupportAgent>,
}

/// Mutex-guarded in-memory implementation of [`SessionStore`]
#[derive(Default)]
pub struct MemorySessionStore {
    state: Mutex<MemoryState>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn compare_sessions(a: &ChatSession, b: &ChatSession, sort: SessionSort) -> Ordering {
    match sort {
        SessionSort::CreatedAt => a.created_at.cmp(&b.created_at),
        SessionSort::LastMessageAt => a.last_message_at.cmp(&b.last_message_at),
        SessionSort::Priority => a.priority.rank().cmp(&b.priority.rank()),
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert_session(&self, session: &ChatSession) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let has_open = state
            .sessions
            .values()
            .any(|s| s.user_id == session.user_id && s.status.is_open());
        if session.status.is_open() && has_open {
            return Err(StoreError::Conflict(format!(
                "user {} already has an open session",
                session.user_id
            )));
        }
        state.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn find_session(&self, id: SessionId) -> StoreResult<Option<ChatSession>> {
        let state = self.state.lock().await;
        Ok(state.sessions.get(&id).cloned())
    }

    async fn find_open_session_for_user(
        &self,
        user_id: UserId,
    ) -> StoreResult<Option<ChatSession>> {
        let state = self.state.lock().await;
        Ok(state
            .sessions
            .values()
            .find(|s| s.user_id == user_id && s.status.is_open())
            .cloned())
    }

    async fn list_sessions_by_status(
        &self,
        status: SessionStatus,
    ) -> StoreResult<Vec<ChatSession>> {
        let state = self.state.lock().await;
        let mut sessions: Vec<ChatSession> = state
            .sessions
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        Ok(sessions)
    }

    async fn list_sessions(&self, query: &SessionQuery) -> StoreResult<(Vec<ChatSession>, i64)> {
        let state = self.state.lock().await;
        let mut sessions: Vec<ChatSession> = state
            .sessions
            .values()
            .filter(|s| query.status.map_or(true, |status| s.status == status))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| {
            let ord = compare_sessions(a, b, query.sort_by);
            match query.order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });
        let total = sessions.len() as i64;
        let page = sessions
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn list_idle_open_sessions(
        &self,
        before: OffsetDateTime,
    ) -> StoreResult<Vec<ChatSession>> {
        let state = self.state.lock().await;
        Ok(state
            .sessions
            .values()
            .filter(|s| s.status.is_open() && s.last_message_at < before)
            .cloned()
            .collect())
    }

    async fn update_priority(
        &self,
        id: SessionId,
        priority: SessionPriority,
    ) -> StoreResult<Option<ChatSession>> {
        let mut state = self.state.lock().await;
        Ok(state.sessions.get_mut(&id).map(|s| {
            s.priority = priority;
            s.clone()
        }))
    }

    async fn assign_session(
        &self,
        id: SessionId,
        agent_id: AgentId,
        expected_agent: Option<AgentId>,
        at: OffsetDateTime,
    ) -> StoreResult<Option<ChatSession>> {
        let mut state = self.state.lock().await;
        match state.sessions.get_mut(&id) {
            Some(s) if s.status.is_open() && s.support_agent_id == expected_agent => {
                s.support_agent_id = Some(agent_id);
                s.assigned_at = Some(at);
                s.status = SessionStatus::Active;
                Ok(Some(s.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn unassign_session(
        &self,
        id: SessionId,
        agent_id: AgentId,
    ) -> StoreResult<Option<ChatSession>> {
        let mut state = self.state.lock().await;
        match state.sessions.get_mut(&id) {
            Some(s) if s.status.is_open() && s.support_agent_id == Some(agent_id) => {
                s.support_agent_id = None;
                s.assigned_at = None;
                s.status = SessionStatus::Pending;
                Ok(Some(s.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn close_session(&self, id: SessionId) -> StoreResult<Option<ChatSession>> {
        let mut state = self.state.lock().await;
        match state.sessions.get_mut(&id) {
            Some(s) if s.status.is_open() => {
                s.status = SessionStatus::Closed;
                Ok(Some(s.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn append_message(
        &self,
        session_id: SessionId,
        sender: MessageSender,
        body: &str,
    ) -> StoreResult<Option<AppendedMessage>> {
        let mut state = self.state.lock().await;
        let Some(session) = state.sessions.get_mut(&session_id) else {
            return Ok(None);
        };
        if !session.status.is_open() {
            return Ok(None);
        }

        let previous_status = session.status;
        // Never step backwards even if the wall clock does
        let timestamp = OffsetDateTime::now_utc().max(session.last_message_at);
        session.last_message_at = timestamp;
        if sender == MessageSender::User && session.status == SessionStatus::Pending {
            session.status = SessionStatus::Active;
        }
        let session = session.clone();

        let message = ChatMessage {
            id: MessageId::new(),
            session_id,
            body: body.to_string(),
            sender,
            timestamp,
            is_read: false,
        };
        state
            .messages
            .entry(session_id)
            .or_default()
            .push(message.clone());

        Ok(Some(AppendedMessage {
            message,
            session,
            previous_status,
        }))
    }

    async fn list_messages(&self, session_id: SessionId) -> StoreResult<Vec<ChatMessage>> {
        let state = self.state.lock().await;
        Ok(state.messages.get(&session_id).cloned().unwrap_or_default())
    }

    async fn mark_support_messages_read(&self, session_id: SessionId) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        let mut changed = 0;
        if let Some(messages) = state.messages.get_mut(&session_id) {
            for msg in messages
                .iter_mut()
                .filter(|m| m.sender == MessageSender::Support && !m.is_read)
            {
                msg.is_read = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn insert_agent(&self, agent: &SupportAgent) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if state.agents.values().any(|a| a.user_id == agent.user_id) {
            return Err(StoreError::Conflict(format!(
                "user {} already has an agent profile",
                agent.user_id
            )));
        }
        state.agents.insert(agent.id, agent.clone());
        Ok(())
    }

    async fn find_agent(&self, id: AgentId) -> StoreResult<Option<SupportAgent>> {
        let state = self.state.lock().await;
        Ok(state.agents.get(&id).cloned())
    }

    async fn find_agent_by_user(&self, user_id: UserId) -> StoreResult<Option<SupportAgent>> {
        let state = self.state.lock().await;
        Ok(state.agents.values().find(|a| a.user_id == user_id).cloned())
    }

    async fn list_agents(&self) -> StoreResult<Vec<SupportAgent>> {
        let state = self.state.lock().await;
        let mut agents: Vec<SupportAgent> = state.agents.values().cloned().collect();
        agents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(agents)
    }

    async fn list_active_agents(&self) -> StoreResult<Vec<SupportAgent>> {
        let state = self.state.lock().await;
        let mut agents: Vec<SupportAgent> =
            state.agents.values().filter(|a| a.is_active).cloned().collect();
        agents.sort_by(|a, b| {
            a.current_active_chats
                .cmp(&b.current_active_chats)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(agents)
    }

    async fn update_agent(
        &self,
        id: AgentId,
        update: &AgentUpdate,
    ) -> StoreResult<Option<SupportAgent>> {
        let mut state = self.state.lock().await;
        let Some(agent) = state.agents.get_mut(&id) else {
            return Ok(None);
        };
        // Mirrors the `current_active_chats <= max_concurrent_chats` check constraint
        if let Some(max) = update.max_concurrent_chats {
            if max < agent.current_active_chats {
                return Err(StoreError::Conflict(format!(
                    "agent {} has {} active chats, above the requested maximum {}",
                    id, agent.current_active_chats, max
                )));
            }
        }
        if let Some(name) = &update.name {
            agent.name = name.clone();
        }
        if let Some(email) = &update.email {
            agent.email = email.clone();
        }
        if let Some(is_active) = update.is_active {
            agent.is_active = is_active;
        }
        if let Some(max) = update.max_concurrent_chats {
            agent.max_concurrent_chats = max;
        }
        Ok(Some(agent.clone()))
    }

    async fn try_increment_agent_load(&self, id: AgentId) -> StoreResult<Option<SupportAgent>> {
        let mut state = self.state.lock().await;
        match state.agents.get_mut(&id) {
            Some(agent) if agent.is_active && agent.has_spare_capacity() => {
                agent.current_active_chats += 1;
                Ok(Some(agent.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn decrement_agent_load(&self, id: AgentId) -> StoreResult<Option<SupportAgent>> {
        let mut state = self.state.lock().await;
        Ok(state.agents.get_mut(&id).map(|agent| {
            agent.current_active_chats = (agent.current_active_chats - 1).max(0);
            agent.clone()
        }))
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn session_counts(&self, windows: &StatsWindows) -> StoreResult<SessionCounts> {
        let state = self.state.lock().await;
        let mut counts = SessionCounts::default();
        let mut response_total = 0f64;
        let mut responded = 0u32;

        for session in state.sessions.values() {
            counts.total += 1;
            match session.status {
                SessionStatus::Active => counts.active += 1,
                SessionStatus::Pending => counts.pending += 1,
                SessionStatus::Closed => counts.closed += 1,
            }
            if session.created_at >= windows.day_start {
                counts.created_today += 1;
            }
            if session.created_at >= windows.week_start {
                counts.created_this_week += 1;
            }
            if session.created_at >= windows.month_start {
                counts.created_this_month += 1;
            }

            let first_reply = state.messages.get(&session.id).and_then(|msgs| {
                msgs.iter()
                    .find(|m| m.sender == MessageSender::Support)
                    .map(|m| m.timestamp)
            });
            if let Some(replied_at) = first_reply {
                response_total += (replied_at - session.created_at).as_seconds_f64();
                responded += 1;
            }
        }

        if responded > 0 {
            counts.avg_first_response_secs = Some(response_total / f64::from(responded));
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(max: i32) -> SupportAgent {
        SupportAgent {
            id: AgentId::new(),
            user_id: UserId::new(),
            name: "Ana".into(),
            email: "ana@example.com".into(),
            is_active: true,
            max_concurrent_chats: max,
            current_active_chats: 0,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn test_second_open_session_conflicts() {
        let store = MemorySessionStore::new();
        let user = UserId::new();
        let now = OffsetDateTime::now_utc();

        store
            .insert_session(&ChatSession::new_pending(user, SessionPriority::Medium, now))
            .await
            .unwrap();
        let second = store
            .insert_session(&ChatSession::new_pending(user, SessionPriority::High, now))
            .await;
        assert!(matches!(second, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_increment_stops_at_ceiling_and_decrement_floors() {
        let store = MemorySessionStore::new();
        let a = agent(1);
        store.insert_agent(&a).await.unwrap();

        assert!(store.try_increment_agent_load(a.id).await.unwrap().is_some());
        assert!(store.try_increment_agent_load(a.id).await.unwrap().is_none());

        let after = store.decrement_agent_load(a.id).await.unwrap().unwrap();
        assert_eq!(after.current_active_chats, 0);
        let after = store.decrement_agent_load(a.id).await.unwrap().unwrap();
        assert_eq!(after.current_active_chats, 0);
    }

    #[tokio::test]
    async fn test_append_rejected_after_close() {
        let store = MemorySessionStore::new();
        let session =
            ChatSession::new_pending(UserId::new(), SessionPriority::Low, OffsetDateTime::now_utc());
        store.insert_session(&session).await.unwrap();

        assert!(store.close_session(session.id).await.unwrap().is_some());
        // second close performs no transition
        assert!(store.close_session(session.id).await.unwrap().is_none());

        let appended = store
            .append_message(session.id, MessageSender::User, "late")
            .await
            .unwrap();
        assert!(appended.is_none());
        assert!(store.list_messages(session.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_sessions_pages_and_sorts() {
        let store = MemorySessionStore::new();
        let base = OffsetDateTime::now_utc();
        for i in 0..5 {
            let mut s = ChatSession::new_pending(UserId::new(), SessionPriority::Low, base);
            s.created_at = base + time::Duration::minutes(i);
            store.insert_session(&s).await.unwrap();
        }

        let query = SessionQuery {
            page: 2,
            limit: 2,
            sort_by: SessionSort::CreatedAt,
            order: SortOrder::Asc,
            ..SessionQuery::default()
        };
        let (page, total) = store.list_sessions(&query).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].created_at, base + time::Duration::minutes(2));
    }
}
