use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Manages graceful shutdown via CancellationToken.
/// Listens for SIGTERM and Ctrl-C and cancels the token.
#[derive(Debug)]
pub struct ShutdownGuard {
    token: CancellationToken,
}

impl ShutdownGuard {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// The cancellation token that all tasks should monitor.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn a background task that listens for OS signals and triggers cancellation.
    /// The task ends on its own once the token is cancelled.
    pub fn spawn_signal_listener(&self) {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = terminate() => {
                    tracing::info!("received SIGTERM, initiating shutdown");
                }
                res = signal::ctrl_c() => {
                    if let Err(e) = res {
                        tracing::warn!(error = %e, "failed to listen for Ctrl+C");
                        return;
                    }
                    tracing::info!("received Ctrl+C, initiating shutdown");
                }
            }
            token.cancel();
        });
    }
}

impl Default for ShutdownGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            let _ = sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to register SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_reaches_every_clone() {
        let guard = ShutdownGuard::new();
        let a = guard.token();
        let b = guard.token();
        guard.spawn_signal_listener();
        guard.token().cancel();
        a.cancelled().await;
        assert!(b.is_cancelled());
    }

    #[tokio::test]
    async fn listener_exits_once_cancelled() {
        let guard = ShutdownGuard::new();
        guard.spawn_signal_listener();
        guard.token().cancel();
        // a fresh guard is unaffected
        assert!(!ShutdownGuard::default().token().is_cancelled());
        assert!(guard.token().is_cancelled());
    }
}
