//! services/api/src/bin/api.rs

use sqlx::postgres::PgPoolOptions;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use unisphere_api::{
    adapters::{DbAdapter, LocalFileStore},
    config::Config,
    error::ApiError,
    identity::IdentityService,
    realtime::{Hub, HubConfig, MessageHandler},
    web::{build_router, AppState, Repositories},
};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool.clone(), config.db_query_timeout));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. File Store, Hub and Message Handler ---
    tokio::fs::create_dir_all(&config.storage_root).await?;
    let blobs = Arc::new(LocalFileStore::new(
        config.storage_root.clone(),
        config.public_base_url.clone(),
    ));
    let repos = Repositories::from_store(db_adapter, blobs);

    let shutdown = CancellationToken::new();
    let (hub, hub_task) = Hub::spawn(HubConfig::default(), shutdown.child_token());
    let handler_task = MessageHandler::new(repos.messages.clone(), hub.clone())
        .spawn(config.hub_listener_capacity)
        .await;

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState::new(config.clone(), repos, hub.clone(), shutdown.clone()));
    let sweep_task = spawn_refresh_sweep(
        app_state.identity.clone(),
        config.refresh_sweep_interval,
        config.revoked_token_retention,
        shutdown.clone(),
    );

    // --- 5. Create the Web Router ---
    let app = build_router(app_state)?;

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;

    let signal_token = shutdown.clone();
    let signal_hub = hub.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown signal received, draining connections...");
            signal_token.cancel();
            signal_hub.shutdown();
        })
        .into_future();
    let mut server = std::pin::pin!(server);

    // --- 7. Wind Down Within One Budget ---
    // The budget starts at the signal and covers both the connection drain
    // and the background tasks.
    let deadline = tokio::select! {
        served = &mut server => {
            served?;
            Instant::now() + config.shutdown_timeout
        }
        deadline = drain_deadline(&shutdown, config.shutdown_timeout) => {
            match timeout_at(deadline, &mut server).await {
                Ok(served) => served?,
                Err(_) => warn!(
                    timeout_secs = config.shutdown_timeout.as_secs(),
                    "connections still open at the deadline, abandoning them"
                ),
            }
            deadline
        }
    };

    shutdown.cancel();
    let drained = timeout_at(deadline, async {
        let tasks = [
            ("hub", hub_task),
            ("message handler", handler_task),
            ("refresh sweep", sweep_task),
        ];
        for (name, task) in tasks {
            if let Err(e) = task.await {
                warn!(task = name, error = %e, "background task ended abnormally");
            }
        }
    })
    .await;
    if drained.is_err() {
        warn!(
            timeout_secs = config.shutdown_timeout.as_secs(),
            "background tasks did not stop in time"
        );
    }

    db_pool.close().await;
    info!("Server stopped.");
    Ok(())
}

/// Periodically drops refresh tokens that are expired or long revoked.
fn spawn_refresh_sweep(
    identity: Arc<IdentityService>,
    every: Duration,
    retention: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => match identity.purge_refresh_tokens(retention).await {
                    Ok(0) => {}
                    Ok(purged) => info!(purged, "refresh tokens purged"),
                    Err(e) => error!(error = %e, "refresh token sweep failed"),
                },
            }
        }
    })
}

/// Resolves once shutdown starts, to the instant the wind-down must end by.
async fn drain_deadline(shutdown: &CancellationToken, budget: Duration) -> Instant {
    shutdown.cancelled().await;
    Instant::now() + budget
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
