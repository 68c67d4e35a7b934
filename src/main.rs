//! Pool Orchestrator - cross-chain liquidity pool lifecycle and deposits
//!
//! Runs one orchestrator for the local chain: restores its state from
//! PostgreSQL, accepts pool and deposit requests and relay deliveries over
//! HTTP, and transacts on the local chain through the configured contracts.

use anyhow::{Context, Result};
use pool_orchestrator::api::{self, AppState};
use pool_orchestrator::chain::LocalChain;
use pool_orchestrator::config::Settings;
use pool_orchestrator::messaging::MessagingGateway;
use pool_orchestrator::metrics::MetricsServer;
use pool_orchestrator::state::StateManager;
use pool_orchestrator::tx::TransactionSender;
use pool_orchestrator::Orchestrator;
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("Starting Pool Orchestrator v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load()?;
    info!(
        "Loaded configuration for local chain {} with {} remote chains",
        settings.orchestrator.local_chain_id,
        settings.remote_chains().len()
    );

    let state_manager = Arc::new(StateManager::new(&settings.database).await?);
    info!("Database connection established");

    state_manager.run_migrations().await?;
    info!("Database migrations complete");

    let wallet = TransactionSender::load_wallet(settings.wallet.private_key_env.as_deref())?;
    let chain = Arc::new(LocalChain::connect(&settings, wallet)?);
    info!("Local chain connection initialized");

    let gateway = MessagingGateway::new(chain.relay(&settings)?, settings.orchestrator.quote_token);
    let orchestrator = Arc::new(
        Orchestrator::new(
            settings.orchestrator.clone(),
            gateway,
            chain.collaborators(&settings)?,
        )
        .with_store(state_manager.clone()),
    );
    orchestrator
        .restore()
        .await
        .context("Failed to restore orchestrator state")?;
    info!(
        "Orchestrator state restored: {} known ledgers",
        orchestrator.known_ledgers().await.len()
    );

    seed_registry(&settings, &orchestrator).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let state = AppState {
            orchestrator: orchestrator.clone(),
            state_manager: Some(state_manager.clone()),
            chain: Some(chain.clone()),
            admin_token: settings.api.admin_token.clone(),
            operator_token: settings.api.operator_token.clone(),
            relay_token: settings.api.relay_token.clone(),
            started: Instant::now(),
        };
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    let monitor_handle = tokio::spawn({
        let chain = chain.clone();
        let state_manager = state_manager.clone();
        let interval = settings.orchestrator.health_check_interval_secs;
        let shutdown = shutdown_rx.clone();
        async move {
            tokio::join!(
                chain.monitor(interval, shutdown.clone()),
                watch_database(state_manager, interval, shutdown)
            );
        }
    });

    info!("Pool Orchestrator is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // No subscribers is fine
    let _ = shutdown_tx.send(true);
    api_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }
    if let Err(e) = monitor_handle.await {
        warn!("Monitor task ended abnormally: {}", e);
    }

    info!("Pool Orchestrator stopped");
    Ok(())
}

/// Register configured peers and selectors the restored state does not have yet
async fn seed_registry(settings: &Settings, orchestrator: &Orchestrator) -> Result<()> {
    let admin = settings.orchestrator.admin;

    for (name, chain) in settings.remote_chains() {
        if let Some(peer) = chain.peer {
            match orchestrator.peer(chain.chain_id).await {
                None => orchestrator
                    .register_peer(admin, chain.chain_id, peer)
                    .await
                    .with_context(|| format!("Failed to register peer for {}", name))?,
                Some(existing) if existing != peer => warn!(
                    "Chain {} peer {:?} differs from registered {:?}, keeping registered",
                    name, peer, existing
                ),
                Some(_) => {}
            }
        }

        match orchestrator.selector(chain.chain_id).await {
            None => orchestrator
                .register_selector(admin, chain.chain_id, chain.selector)
                .await
                .with_context(|| format!("Failed to register selector for {}", name))?,
            Some(existing) if existing != chain.selector => warn!(
                "Chain {} selector {} differs from registered {}, keeping registered",
                name, chain.selector, existing
            ),
            Some(_) => {}
        }
    }

    Ok(())
}

async fn watch_database(state_manager: Arc<StateManager>, interval_secs: u64, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = state_manager.health_check().await {
                    warn!("Database health check failed: {}", e);
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,pool_orchestrator=debug,sqlx=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
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
