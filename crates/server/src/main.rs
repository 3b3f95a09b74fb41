use std::path::PathBuf;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use argus_shared::config::{ConfigLoader, LoggingConfig};
use argus_shared::topics;

mod bootstrap;

use bootstrap::Pipeline;

/// Grace period for in-flight work on shutdown. In-flight batches are not
/// force-closed: their TTL-bounded keys guarantee a fresh process resumes
/// sweep duties without leaks.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
    if config.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigLoader::new(Some(PathBuf::from(".env"))).load()?;
    init_tracing(&config.logging);
    info!("starting argus pipeline server");

    let pipeline = Pipeline::build(config)?;
    pipeline.start_workers().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let monitor = {
        let supervisor = pipeline.supervisor.clone();
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { supervisor.run_monitor(shutdown_rx).await })
    };

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining workers");

    let _ = shutdown_tx.send(true);
    pipeline.supervisor.shutdown_all(SHUTDOWN_GRACE).await;
    if let Err(e) = monitor.await {
        error!(error = %e, "supervisor monitor ended abnormally");
    }

    // Stuck work survives the restart in the store; make it visible now.
    match pipeline
        .dlq
        .stats(&[topics::DETECTION_QUEUE, topics::ANALYSIS_QUEUE])
        .await
    {
        Ok(stats) => {
            for entry in stats.iter().filter(|s| s.count > 0) {
                warn!(queue = %entry.queue, stuck = entry.count, "dead-lettered items remain");
            }
        }
        Err(e) => warn!(error = %e, "could not read DLQ stats at shutdown"),
    }

    info!("argus pipeline server stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            signal::unix::signal(signal::unix::SignalKind::terminate()).expect("signal handler");
        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}
