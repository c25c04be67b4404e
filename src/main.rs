//! Weaver - automated trading control plane
//!
//! Boots the control plane: configuration, logging, the event log backend,
//! and the run machinery, then serves until interrupted. The HTTP/SSE
//! transport attaches to the assembled [`weaver::Weaver`] handle.

use tracing::info;

use weaver::config::AppConfig;
use weaver::logging::init_logging;
use weaver::system::Weaver;

fn config_path() -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    std::env::var("WEAVER_CONFIG").ok()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match config_path() {
        Some(path) => AppConfig::from_file(&path)?,
        None => AppConfig::from_env(),
    };

    let _log_guard = init_logging(&config.logging);
    info!(
        git_hash = env!("GIT_HASH"),
        backend = ?config.event_log.backend,
        port = config.server.port,
        "Starting weaver"
    );

    let weaver = Weaver::build(config).await?;

    // Reconcile live fills in the background until shutdown.
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let poller = weaver.spawn_fill_poller(stop_rx);

    info!("Control plane ready");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let _ = stop_tx.send(true);
    weaver.shutdown().await;
    let _ = poller.await;

    info!("Goodbye");
    Ok(())
}
