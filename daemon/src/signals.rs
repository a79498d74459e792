//! Graceful shutdown (grounded on `headless-client/src/signals.rs`), ported
//! to a `CancellationToken` since every worker in this workspace already
//! takes one instead of a bespoke `recv().await`.

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Waits for SIGINT or SIGTERM, then fires `cancel`.
pub async fn wait_and_cancel(cancel: CancellationToken) -> anyhow::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        _ = cancel.cancelled() => {}
    }

    cancel.cancel();
    Ok(())
}
