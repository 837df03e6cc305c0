//! Stop requests.
//!
//! A single operator interrupt (SIGINT or SIGTERM) is the only way a mission
//! ends. It is turned into a [`StopHandle`] request that every sampling loop
//! and the supervisor observe at their next suspension point.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

/// A cloneable stop flag that async code can wait on.
#[derive(Debug, Clone)]
pub struct StopHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StopHandle {
    /// Create a handle with no stop requested.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Request a stop. Idempotent.
    pub fn stop(&self) {
        self.sender.send_replace(true);
    }

    /// Check if a stop has been requested.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        *self.sender.borrow()
    }

    /// Wait until a stop is requested.
    ///
    /// Returns immediately if one already was.
    pub async fn stopped(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = receiver.wait_for(|stop| *stop).await;
    }
}

/// Wait for SIGINT or SIGTERM.
///
/// If the signal handlers cannot be installed this only returns on ctrl-c
/// delivered through the portable handler.
pub async fn wait_for_interrupt() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => info!("received SIGINT"),
                    _ = sigterm.recv() => info!("received SIGTERM"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "failed to install signal handlers, falling back to ctrl-c");
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("received interrupt");
}

/// Spawn a task that requests `stop` on the first interrupt.
pub fn install_interrupt_handler(stop: StopHandle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_interrupt().await;
        stop.stop();
    })
}
