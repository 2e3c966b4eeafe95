use anyhow::Result;
use axum::Router;
use file_gateway::{
    config::AppConfig,
    routes::routes::routes,
    services::metadata_index::{open_pool, run_migrations},
    state::{AppState, ensure_sqlite_parent},
};
use std::{io::ErrorKind, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Upper bound on how often the stale-session reaper runs.
const MAX_REAP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting file-gateway with config: {:?}", cfg);

    // --- Handle migration mode ---
    if migrate {
        ensure_sqlite_parent(&cfg.database_url)?;
        let db = open_pool(&cfg.database_url).await?;
        run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize services ---
    let state = AppState::from_config(&cfg).await?;

    if let Some(ttl_secs) = cfg.session_ttl_secs {
        let ttl = Duration::from_secs(ttl_secs);
        let every = ttl.min(MAX_REAP_INTERVAL).max(Duration::from_secs(1));
        state.uploads.spawn_reaper(ttl, every);
        tracing::info!("Reaping upload sessions older than {}s", ttl_secs);
    }

    // --- Build router ---
    let app: Router = routes(cfg.max_upload_bytes).with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
