//! Tablewatch discovery engine process entrypoint.
//!
//! Wires the Dispatch Scheduler, Notification Fan-out, and Retention jobs
//! onto independent timers and runs them until shutdown. No HTTP API is
//! served here (out of scope); this binary exists to demonstrate the engine
//! runs end to end against a real Postgres instance.

use std::sync::Arc;
use tablewatch_core::clock::{Clock, SystemClock};
use tablewatch_core::config::Config;
use tablewatch_engine::{run_retention_daily, Scheduler};
use tablewatch_notify::FanoutJob;
use tablewatch_providers::{HttpProviderAdapter, ProviderAdapter};
use tablewatch_runtime::metrics::MetricsServer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tablewatch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting tablewatch discovery engine");

    let config = Arc::new(Config::from_env()?);
    tracing::info!(
        window_days = config.window_days,
        max_concurrent_buckets = config.max_concurrent_buckets,
        "configuration loaded"
    );

    let pool = tablewatch_store::connect(&config.database_url, config.database_max_connections).await?;
    let stores = Arc::new(tablewatch_store::Stores::new(pool));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    if let Ok(addr) = std::env::var("METRICS_ADDR") {
        let socket_addr = addr.parse()?;
        let mut server = MetricsServer::new(socket_addr);
        server.start()?;
    }

    let providers = Arc::new(build_providers());
    let scheduler = Arc::new(Scheduler::new(stores.clone(), clock.clone(), config.clone(), build_providers()));

    let fanout = Arc::new(FanoutJob::new(
        stores.clone(),
        clock.clone(),
        chrono::Duration::from_std(config.push_window).unwrap_or(chrono::Duration::minutes(15)),
        None,
        None,
        None,
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let scheduler_task = {
        let scheduler = scheduler.clone();
        let cancel = cancel_future(shutdown_rx.clone());
        tokio::spawn(async move { scheduler.run(cancel).await })
    };
    let fanout_task = {
        let config = config.clone();
        let cancel = cancel_future(shutdown_rx.clone());
        tokio::spawn(async move { fanout.run_periodic(config, cancel).await })
    };
    let retention_task = {
        let stores = stores.clone();
        let clock = clock.clone();
        let config = config.clone();
        let providers = providers.clone();
        let cancel = cancel_future(shutdown_rx.clone());
        tokio::spawn(async move { run_retention_daily(stores, clock, config, providers, cancel).await })
    };

    let _ = tokio::join!(scheduler_task, fanout_task, retention_task);
    tracing::info!("tablewatch discovery engine stopped");
    Ok(())
}

/// Builds the registered provider adapters. Concrete Resy/OpenTable wire
/// protocols are out of scope (see `providers::http`); `DISCOVERY_PROVIDERS`
/// is a comma-separated `id@base_url` list, defaulting to a single
/// illustrative `resy` adapter.
fn build_providers() -> Vec<Box<dyn ProviderAdapter>> {
    let raw = std::env::var("DISCOVERY_PROVIDERS")
        .unwrap_or_else(|_| "resy@https://example.invalid/resy/search".to_string());

    raw.split(',')
        .filter_map(|entry| entry.split_once('@'))
        .map(|(id, base_url)| Box::new(HttpProviderAdapter::new(id, base_url)) as Box<dyn ProviderAdapter>)
        .collect()
}

/// Resolves once `rx` observes `true`, sent by the shutdown-signal task.
async fn cancel_future(mut rx: tokio::sync::watch::Receiver<bool>) {
    let _ = rx.wait_for(|shutting_down| *shutting_down).await;
}

/// Waits for Ctrl+C (SIGINT) or, on Unix, SIGTERM.
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C, shutting down gracefully"),
        () = terminate => tracing::info!("received SIGTERM, shutting down gracefully"),
    }
}
