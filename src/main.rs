use anyhow::Context;
use rwa_indexer::chain::ChainClient;
use rwa_indexer::engine::run_periodic_sync;
use rwa_indexer::{
    api, config::Config, db::init_db, AccountLayout, AssetSyncService, EventProcessor, Listener,
    ListenerConfig, Repository, SolanaRpcClient,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("Configuration error")?;
    let port = config.port;

    let pool = init_db(&config.database_path)
        .await
        .with_context(|| format!("Failed to initialize database at {}", config.database_path))?;

    let repo = Arc::new(Repository::new(pool));
    let chain: Arc<dyn ChainClient> = Arc::new(
        SolanaRpcClient::new(config.solana_rpc_url.clone(), config.solana_ws_url.clone())
            .with_max_elapsed(config.event_retry_max_elapsed),
    );

    let sync = Arc::new(AssetSyncService::new(
        chain.clone(),
        repo.clone(),
        config.registry_program.clone(),
    ));
    match sync.sync_assets().await {
        Ok(report) => tracing::info!(inserted = report.inserted, updated = report.updated, "Initial asset sync done"),
        Err(e) => tracing::warn!(error = %e, "Initial asset sync failed, continuing"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener = Listener::new(
        chain.clone(),
        Arc::new(EventProcessor::new(repo.clone())),
        repo.clone(),
        AccountLayout::for_version(config.account_layout),
        vec![config.market_program.clone(), config.registry_program.clone()],
        ListenerConfig {
            retry_max_elapsed: config.event_retry_max_elapsed,
            ..ListenerConfig::default()
        },
    );
    let listener_rx = shutdown_rx.clone();
    let listener_task = tokio::spawn(async move { listener.run(listener_rx).await });

    let sync_task = config
        .asset_sync_interval
        .map(|interval| tokio::spawn(run_periodic_sync(sync.clone(), interval, shutdown_rx.clone())));

    // Create router
    let app = api::create_router(api::AppState::new(repo.reader(), sync));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let tcp = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(tcp, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = listener_task.await {
        tracing::error!(error = %e, "Listener task failed");
    }
    if let Some(task) = sync_task {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Asset sync task failed");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
