//! Terminal utilities.
//!
//! Raw mode handling for the operator's terminal.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Check if stdin is a TTY.
pub fn is_tty() -> bool {
    unsafe { libc::isatty(io::stdin().as_raw_fd()) == 1 }
}

/// Raw terminal mode guard.
///
/// Entering saves the terminal's settings and switches it to raw mode. The
/// saved settings are written back exactly once, either by [`restore`], by a
/// [`restorer`] closure, or when the guard is dropped.
///
/// [`restore`]: RawModeGuard::restore
/// [`restorer`]: RawModeGuard::restorer
pub struct RawModeGuard {
    saved: Arc<SavedMode>,
}

struct SavedMode {
    fd: RawFd,
    original: Mutex<Option<libc::termios>>,
}

impl SavedMode {
    fn restore(&self) -> bool {
        let original = self
            .original
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(original) = original else {
            return false;
        };
        if unsafe { libc::tcsetattr(self.fd, libc::TCSANOW, &original) } != 0 {
            warn!(
                "failed to restore terminal mode: {}",
                io::Error::last_os_error()
            );
        } else {
            debug!("restored terminal mode on fd {}", self.fd);
        }
        true
    }
}

impl RawModeGuard {
    /// Put stdin into raw mode.
    pub fn stdin() -> io::Result<Self> {
        Self::enter(io::stdin().as_raw_fd())
    }

    /// Put `fd` into raw mode.
    ///
    /// If `fd` is not a TTY (e.g., in CI or tests), this is a no-op.
    pub fn enter(fd: RawFd) -> io::Result<Self> {
        if unsafe { libc::isatty(fd) } == 0 {
            debug!("fd {} is not a tty, skipping raw mode", fd);
            return Ok(Self::saved(fd, None));
        }

        let mut termios: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(fd, &mut termios) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let original = termios;

        unsafe { libc::cfmakeraw(&mut termios) };
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &termios) } != 0 {
            return Err(io::Error::last_os_error());
        }
        debug!("entered raw mode on fd {}", fd);

        Ok(Self::saved(fd, Some(original)))
    }

    fn saved(fd: RawFd, original: Option<libc::termios>) -> Self {
        Self {
            saved: Arc::new(SavedMode {
                fd,
                original: Mutex::new(original),
            }),
        }
    }

    /// Whether the saved settings are still waiting to be restored.
    pub fn is_active(&self) -> bool {
        self.saved
            .original
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Write the saved settings back. Returns `false` if there was nothing
    /// left to restore.
    pub fn restore(&mut self) -> bool {
        self.saved.restore()
    }

    /// A closure that restores the saved settings, for exit paths that skip
    /// destructors such as [`std::process::exit`]. It shares the guard's
    /// once-only restore.
    pub fn restorer(&self) -> impl Fn() + Send + Sync + 'static {
        let saved = Arc::clone(&self.saved);
        move || {
            saved.restore();
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        self.saved.restore();
    }
}
