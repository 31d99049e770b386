//! OS signal handling.
//!
//! SIGINT and SIGTERM both trigger a graceful shutdown; a second signal
//! while draining exits immediately.

use crate::lifecycle::shutdown::Shutdown;

/// Wait for SIGINT or SIGTERM and return its name.
pub async fn wait_for_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => "SIGINT",
                    _ = term.recv() => "SIGTERM",
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT"
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "SIGINT"
    }
}

/// Trigger `shutdown` on the first signal; exit the process on the second.
pub fn install(shutdown: Shutdown) {
    tokio::spawn(async move {
        let name = wait_for_signal().await;
        tracing::info!(signal = name, "Shutdown signal received");
        shutdown.trigger();

        let name = wait_for_signal().await;
        tracing::warn!(signal = name, "Second signal received, exiting immediately");
        std::process::exit(1);
    });
}
