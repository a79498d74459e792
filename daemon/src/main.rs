//! Binary entry point (headless-client analog): parse args, load config,
//! install logging, wire every component, then run until signalled.

use anyhow::Context as _;
use clap::Parser;
use intel_daemon::{config::DaemonConfig, signals, wiring};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(author, version, about = "Network intelligence core daemon")]
struct Cli {
    /// Path to a JSON configuration file.
    #[arg(short, long, env = "INTEL_DAEMON_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _bootstrap = intel_logging::init_bootstrap();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => DaemonConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => {
            tracing::warn!("no --config given, running with defaults (empty resolver list)");
            DaemonConfig::default()
        }
    };
    drop(_bootstrap);

    intel_logging::init(&config.log_directives, config.log_json)?;

    let cancel = CancellationToken::new();
    let (_handles, tasks) = wiring::run(config, cancel.clone()).await?;

    signals::wait_and_cancel(cancel).await?;

    for task in tasks {
        let _ = task.await;
    }

    Ok(())
}
