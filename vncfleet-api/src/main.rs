use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use vncfleet_api::{build_state, create_router};
use vncfleet_core::{logging, Config};
use vncfleet_discovery::EndpointWatcher;

#[derive(Debug, Parser)]
#[command(name = "vncfleet", about = "VNC fleet control plane")]
struct Cli {
    /// Configuration file (TOML). Defaults to ./config.toml when present.
    #[arg(short, long, env = "VNCFLEET_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration
    let config = Config::load(cli.config.as_deref())?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("VNC fleet control plane starting...");
    info!("HTTP address: {}", config.http_address());

    // 3. Wire discovery, quality and resilience components
    let state = build_state(&config).await?;

    // 4. Prime the registry before serving
    let count = state.registry.refresh_discovery().await;
    info!(instances = count, "Initial discovery refresh complete");

    // 5. Supervised endpoint watch; any event triggers a registry refresh
    let watcher = EndpointWatcher::new(state.registry.discovery().client(), &config.discovery);
    let watch_registry = state.registry.clone();
    let watch_handle = watcher.start(Arc::new(move |_event| {
        let registry = watch_registry.clone();
        tokio::spawn(async move {
            registry.refresh_discovery().await;
        });
    }));

    // 6. Periodic out-of-band refresh, in case watch events are missed
    let refresh_registry = state.registry.clone();
    let refresh_interval = Duration::from_secs(config.discovery.refresh_interval_secs);
    let refresh_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(refresh_interval);
        ticker.tick().await; // first tick fires immediately, already primed
        loop {
            ticker.tick().await;
            refresh_registry.refresh_discovery().await;
        }
    });

    // 7. Start the quality monitor loop
    state.monitor.start();

    // 8. Serve HTTP until ctrl-c
    let router = create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(config.http_address()).await?;
    info!("HTTP server listening on {}", config.http_address());

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 9. Tear down background work
    info!("Shutting down...");
    state.monitor.stop();
    watcher.shutdown();
    refresh_handle.abort();
    if let Err(e) = watch_handle.await {
        if !e.is_cancelled() {
            error!("Watcher task failed during shutdown: {}", e);
        }
    }
    state.breakers.shutdown();
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
}
