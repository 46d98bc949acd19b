//! Graceful shutdown plumbing shared by the HTTP and admin servers.

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Cloneable handle passed into every server task; fires when the process
/// receives SIGTERM/SIGINT or another task calls [`ShutdownTrigger::shutdown_now`].
#[derive(Clone)]
pub struct ShutdownTrigger {
    token: CancellationToken,
    done_tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn new() -> Self {
        let (done_tx, _) = watch::channel(false);
        Self {
            token: CancellationToken::new(),
            done_tx,
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Waits for `ctrl_c` or SIGTERM (unix) and cancels the shared token.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };

        #[cfg(unix)]
        let terminate = async {
            let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
            sigterm.recv().await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
        self.shutdown_now();
    }

    pub fn shutdown_now(&self) {
        self.token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Awaits cancellation, bounded by `timeout` — used by callers that need
    /// a best-effort drain window before forcing an exit.
    pub async fn wait_with_timeout(&self, timeout: std::time::Duration) {
        let _ = tokio::time::timeout(timeout, self.token.cancelled()).await;
    }

    pub fn mark_done(&self) {
        let _ = self.done_tx.send(true);
    }

    pub fn subscribe_done(&self) -> watch::Receiver<bool> {
        self.done_tx.subscribe()
    }
}

impl Default for ShutdownTrigger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_now_cancels_token() {
        let trigger = ShutdownTrigger::new();
        assert!(!trigger.is_shutting_down());
        trigger.shutdown_now();
        assert!(trigger.is_shutting_down());
        trigger.token().cancelled().await;
    }

    #[tokio::test]
    async fn wait_with_timeout_returns_without_signal() {
        let trigger = ShutdownTrigger::new();
        trigger.wait_with_timeout(std::time::Duration::from_millis(10)).await;
        assert!(!trigger.is_shutting_down());
    }
}
