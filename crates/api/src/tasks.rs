//! Background jobs: periodic stats broadcast and the idle-session sweep

use time::{Duration as TimeDuration, OffsetDateTime};
use tokio::sync::broadcast;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::websocket::RealtimeRouter;

/// How often the idle-session sweep runs
pub const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Push a stats snapshot to the support room every `interval_secs`
pub async fn run_stats_broadcast_loop(
    router: RealtimeRouter,
    interval_secs: u64,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval(Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(interval_secs, "Stats broadcast loop started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Nobody to tell
                if router.registry().support_room_members().await.is_empty() {
                    continue;
                }
                if let Err(e) = router.broadcast_stats().await {
                    tracing::error!(error = %e, "Stats broadcast failed");
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Stats broadcast loop shutting down");
                break;
            }
        }
    }
}

/// Close sessions with no activity for `inactive_hours`
pub async fn run_idle_close_loop(
    router: RealtimeRouter,
    inactive_hours: u64,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval(IDLE_SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // Capped at ten years so the cutoff never underflows
    let max_idle = TimeDuration::hours(inactive_hours.min(87_600) as i64);

    tracing::info!(inactive_hours, "Idle session sweep started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let cutoff = OffsetDateTime::now_utc() - max_idle;
                match router.close_idle_sessions(cutoff).await {
                    Ok(closed) if closed > 0 => {
                        tracing::info!(closed, "Closed idle chat sessions");
                    }
                    Ok(_) => tracing::debug!("No idle chat sessions"),
                    Err(e) => tracing::error!(error = %e, "Idle session sweep failed"),
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Idle session sweep shutting down");
                break;
            }
        }
    }
}
