//! Operator interrupt handling

use tracing::{info, warn};

/// Resolve on Ctrl-C, or SIGTERM on Unix
///
/// If a handler cannot be installed that signal is simply never observed.
/// Only the first signal is consumed: a second Ctrl-C while the tools drain
/// their DISCONNECT (up to `DISCONNECT_TIMEOUT`, 5 s) is ignored.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received interrupt"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
