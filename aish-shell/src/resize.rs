//! Window size propagation.

use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Per-session `SIGWINCH` subscription.
///
/// Every listener owns its own signal stream, so concurrent sessions each see
/// every notification.
pub struct ResizeListener {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ResizeListener {
    /// Call `apply` once now and again after every window size change, until
    /// stopped or until `parent` is cancelled.
    pub fn spawn<F>(parent: &CancellationToken, apply: F) -> std::io::Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let mut winch = signal(SignalKind::window_change())?;
        let token = parent.child_token();
        let cancelled = token.clone();

        let handle = tokio::spawn(async move {
            apply();
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    received = winch.recv() => {
                        if received.is_none() {
                            warn!("window size signal stream ended");
                            break;
                        }
                        trace!("window size changed");
                        apply();
                    }
                }
            }
            debug!("resize listener stopped");
        });

        Ok(Self { token, handle })
    }

    /// Cancel the listener and wait for it to finish.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            warn!("resize listener failed: {}", e);
        }
    }
}
