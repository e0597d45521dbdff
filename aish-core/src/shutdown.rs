//! Process-wide cancellation.
//!
//! [`Shutdown`] is the only cancellation primitive in aish. Firing it is
//! idempotent and terminal: there is no way to "un-cancel" a session.

use std::future::Future;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type PreExitHook = Box<dyn Fn() + Send + Sync>;

/// Cancellation handle shared by every component of a session.
pub struct Shutdown {
    token: CancellationToken,
    last_signal: AtomicI32,
    /// Run before force-exiting, e.g. to restore the terminal mode.
    pre_exit_hook: Mutex<Option<PreExitHook>>,
}

impl std::fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shutdown")
            .field("token", &self.token)
            .field("last_signal", &self.last_signal)
            .finish_non_exhaustive()
    }
}

impl Shutdown {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            token: CancellationToken::new(),
            last_signal: AtomicI32::new(0),
            pre_exit_hook: Mutex::new(None),
        })
    }

    /// Fire cancellation. Calling this more than once is harmless.
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            debug!("shutdown requested");
        }
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// A clone of the root token, cancelled together with this handle.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// A token that is cancelled when this handle fires, but can also be
    /// cancelled on its own without affecting the rest of the process.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Register what must run before a forced exit, replacing any previous hook.
    pub fn set_pre_exit_hook<F: Fn() + Send + Sync + 'static>(&self, hook: F) {
        *self
            .pre_exit_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(hook));
    }

    pub fn clear_pre_exit_hook(&self) {
        self.pre_exit_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn run_pre_exit_hook(&self) {
        let slot = self
            .pre_exit_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(hook) = slot.as_ref() {
            debug!("running pre-exit hook");
            hook();
        }
    }

    /// Run `fut` until it completes or shutdown fires, whichever is first.
    /// Completion of `fut` fires shutdown as well.
    pub async fn shutdown_when_done<Fut, T>(self: &Arc<Self>, fut: Fut) -> Option<T>
    where
        Fut: Future<Output = T>,
    {
        if self.is_cancelled() {
            return None;
        }
        tokio::pin!(fut);
        let result = tokio::select! {
            res = &mut fut => Some(res),
            _ = self.token.cancelled() => None,
        };
        self.shutdown();
        result
    }

    /// Turn SIGTERM and SIGHUP into a graceful shutdown. A second signal
    /// runs the pre-exit hook and exits the process immediately.
    ///
    /// SIGINT is left alone: in a wrapped session Ctrl-C arrives as a byte on
    /// the raw terminal and belongs to the child shell.
    pub fn install_signals(self: &Arc<Self>) {
        let shutdown = Arc::clone(self);

        tokio::spawn(async move {
            let (mut sigterm, mut sighup) =
                match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
                    (Ok(term), Ok(hup)) => (term, hup),
                    (Err(e), _) | (_, Err(e)) => {
                        warn!("failed to install signal handlers: {}", e);
                        return;
                    }
                };

            loop {
                let received = tokio::select! {
                    _ = sigterm.recv() => libc::SIGTERM,
                    _ = sighup.recv() => libc::SIGHUP,
                };

                if shutdown.last_signal.load(Ordering::Relaxed) != 0 {
                    info!("received second signal, forcing exit");
                    shutdown.exit_process();
                }

                info!("received signal {}, shutting down", received);
                shutdown.last_signal.store(received, Ordering::Relaxed);
                shutdown.shutdown();
            }
        });
    }

    /// The last signal that triggered shutdown, if any.
    pub fn last_signal(&self) -> Option<i32> {
        match self.last_signal.load(Ordering::Relaxed) {
            0 => None,
            n => Some(n),
        }
    }

    /// Run the pre-exit hook and terminate with the conventional `128 + signo`.
    pub fn exit_process(&self) -> ! {
        self.run_pre_exit_hook();
        let signo = self.last_signal().unwrap_or(libc::SIGTERM);
        std::process::exit(128 + signo);
    }
}
