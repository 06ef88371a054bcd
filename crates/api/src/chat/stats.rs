//! Stats aggregator

use livedesk_shared::{ChatResult, SessionCounts, SessionStore, StatsWindows};
use serde::Serialize;
use std::sync::Arc;
use time::{Duration, OffsetDateTime, Time};

/// Dashboard snapshot pushed to staff
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatStats {
    pub total_sessions: i64,
    pub active_sessions: i64,
    pub pending_sessions: i64,
    pub closed_sessions: i64,
    /// Mean time from session creation to the first support reply, in minutes
    pub average_response_time: Option<f64>,
    pub sessions_today: i64,
    pub sessions_this_week: i64,
    pub sessions_this_month: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
}

impl ChatStats {
    fn from_counts(counts: SessionCounts, generated_at: OffsetDateTime) -> Self {
        Self {
            total_sessions: counts.total,
            active_sessions: counts.active,
            pending_sessions: counts.pending,
            closed_sessions: counts.closed,
            average_response_time: counts
                .avg_first_response_secs
                .map(|secs| (secs / 60.0 * 100.0).round() / 100.0),
            sessions_today: counts.created_today,
            sessions_this_week: counts.created_this_week,
            sessions_this_month: counts.created_this_month,
            generated_at,
        }
    }
}

/// Window boundaries for `now` (UTC): calendar day, trailing seven days, calendar month
pub fn windows_at(now: OffsetDateTime) -> StatsWindows {
    let now = now.to_offset(time::UtcOffset::UTC);
    let day_start = now.replace_time(Time::MIDNIGHT);
    StatsWindows {
        day_start,
        week_start: now - Duration::days(7),
        // Day 1 exists in every month
        month_start: day_start.replace_day(1).unwrap_or(day_start),
    }
}

#[derive(Clone)]
pub struct StatsAggregator {
    store: Arc<dyn SessionStore>,
}

impl StatsAggregator {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    pub async fn snapshot(&self) -> ChatResult<ChatStats> {
        self.snapshot_at(OffsetDateTime::now_utc()).await
    }

    pub async fn snapshot_at(&self, now: OffsetDateTime) -> ChatResult<ChatStats> {
        let counts = self.store.session_counts(&windows_at(now)).await?;
        Ok(ChatStats::from_counts(counts, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livedesk_shared::{MemorySessionStore, SessionPriority, UserId};
    use livedesk_shared::ChatSession;
    use time::macros::datetime;

    #[test]
    fn test_windows() {
        let windows = windows_at(datetime!(2025-03-18 15:42:10 UTC));
        assert_eq!(windows.day_start, datetime!(2025-03-18 00:00:00 UTC));
        assert_eq!(windows.week_start, datetime!(2025-03-11 15:42:10 UTC));
        assert_eq!(windows.month_start, datetime!(2025-03-01 00:00:00 UTC));
    }

    #[test]
    fn test_windows_normalize_offset() {
        let windows = windows_at(datetime!(2025-03-01 01:00:00 +03:00));
        assert_eq!(windows.day_start, datetime!(2025-02-28 00:00:00 UTC));
        assert_eq!(windows.month_start, datetime!(2025-02-01 00:00:00 UTC));
    }

    #[test]
    fn test_average_in_minutes() {
        let counts = SessionCounts {
            avg_first_response_secs: Some(90.0),
            ..SessionCounts::default()
        };
        let stats = ChatStats::from_counts(counts, OffsetDateTime::now_utc());
        assert_eq!(stats.average_response_time, Some(1.5));
    }

    #[tokio::test]
    async fn test_snapshot_counts_by_status() {
        let store = Arc::new(MemorySessionStore::new());
        let now = OffsetDateTime::now_utc();
        for _ in 0..3 {
            let session = ChatSession::new_pending(UserId::new(), SessionPriority::Low, now);
            store.insert_session(&session).await.unwrap();
        }
        let closed = ChatSession::new_pending(UserId::new(), SessionPriority::Low, now);
        store.insert_session(&closed).await.unwrap();
        store.close_session(closed.id).await.unwrap();

        let stats = StatsAggregator::new(store).snapshot_at(now).await.unwrap();
        assert_eq!(stats.total_sessions, 4);
        assert_eq!(stats.pending_sessions, 3);
        assert_eq!(stats.closed_sessions, 1);
        assert_eq!(stats.active_sessions, 0);
        assert_eq!(stats.sessions_today, 4);
        assert_eq!(stats.average_response_time, None);
    }
}
