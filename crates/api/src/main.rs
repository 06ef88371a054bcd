use anyhow::Context;
use livedesk_api::{routes::create_router, tasks, AppState, Config};
use livedesk_shared::{create_pool, run_migrations, PgSessionStore, SessionStore};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("livedesk_api=info,tower_http=info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (production uses real env vars)
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env().context("Failed to load configuration")?;

    let pool = create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("Failed to connect to database")?;
    run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Database ready");

    let store: Arc<dyn SessionStore> = Arc::new(PgSessionStore::new(pool));
    let bind_address = config.bind_address.clone();
    let stats_interval_secs = config.stats_interval_secs;
    let auto_close_inactive_hours = config.auto_close_inactive_hours;
    let state = AppState::new(config, store);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    if stats_interval_secs > 0 {
        tokio::spawn(tasks::run_stats_broadcast_loop(
            state.router.clone(),
            stats_interval_secs,
            shutdown_tx.subscribe(),
        ));
    }
    if auto_close_inactive_hours > 0 {
        tokio::spawn(tasks::run_idle_close_loop(
            state.router.clone(),
            auto_close_inactive_hours,
            shutdown_tx.subscribe(),
        ));
    }

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {bind_address}"))?;
    tracing::info!(address = %bind_address, "Livedesk API listening");

    let mut server_shutdown = shutdown_tx.subscribe();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received");
                let _ = shutdown_tx.send(());
            }
            Err(e) => {
                // Keep the sender alive so the server is not shut down by accident
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await
        .context("Server error")?;

    Ok(())
}
