//! Signal handling for SIGTERM and SIGINT.
//!
//! An operator signal cancels the pipeline's token; the runner then kills
//! the in-flight engine child, releases the repository lock, and exits
//! without starting further steps.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shutdown coordinator translating signals into cancellation
pub struct ShutdownCoordinator {
    cancel: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
        }
    }

    /// Token observed by the runner and the engine
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Install signal handlers for the lifetime of the pipeline
    pub fn spawn_signal_listener(&self) -> tokio::task::JoinHandle<()> {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            cancel.cancel();
        })
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for SIGTERM or SIGINT
async fn wait_for_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), cancelling the running pipeline...");
        }
        _ = terminate => {
            info!("Received SIGTERM, cancelling the running pipeline...");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_reaches_subscribers() {
        let coordinator = ShutdownCoordinator::new();
        let token = coordinator.cancel_token();
        assert!(!token.is_cancelled());

        coordinator.cancel.cancel();
        assert!(token.is_cancelled());
        token.cancelled().await;
    }
}
