//! PTY (pseudo-terminal) management.
//!
//! Wraps a portable-pty pair and the child running on its slave side. The
//! reader and writer are handed out once to the producers and the
//! multiplexer; the master stays here for resizing.

use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use std::io::{self, Read, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum PtyError {
    #[error("failed to create PTY: {0}")]
    Create(String),
    #[error("failed to spawn command: {0}")]
    Spawn(String),
    #[error("failed to clone reader: {0}")]
    CloneReader(String),
    #[error("failed to get writer: {0}")]
    Writer(String),
    #[error("failed to resize PTY: {0}")]
    Resize(String),
    #[error("PTY is closed")]
    Closed,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub struct Pty {
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    reader: Mutex<Option<Box<dyn Read + Send>>>,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    pid: Option<u32>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Pty {
    /// Allocate a pty of `size` and start `cmd` on its slave side.
    pub fn spawn(cmd: CommandBuilder, size: PtySize) -> Result<Self, PtyError> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(size)
            .map_err(|e| PtyError::Create(e.to_string()))?;

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::Spawn(e.to_string()))?;
        // The master only sees end of stream once no slave handle is left open.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::CloneReader(e.to_string()))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::Writer(e.to_string()))?;

        let pid = child.process_id();
        debug!("spawned pty child {:?}", pid);

        Ok(Self {
            master: Mutex::new(Some(pair.master)),
            child: Mutex::new(child),
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            pid,
        })
    }

    pub fn process_id(&self) -> Option<u32> {
        self.pid
    }

    /// Take the output side. Only the first call succeeds.
    pub fn take_reader(&self) -> Result<Box<dyn Read + Send>, PtyError> {
        lock(&self.reader).take().ok_or(PtyError::Closed)
    }

    /// Take the input side. Only the first call succeeds.
    pub fn take_writer(&self) -> Result<Box<dyn Write + Send>, PtyError> {
        lock(&self.writer).take().ok_or(PtyError::Closed)
    }

    pub fn resize(&self, size: PtySize) -> Result<(), PtyError> {
        let master = lock(&self.master);
        let master = master.as_ref().ok_or(PtyError::Closed)?;
        master
            .resize(size)
            .map_err(|e| PtyError::Resize(e.to_string()))
    }

    /// Try to wait for the child process without blocking.
    pub fn try_wait(&self) -> Result<Option<u32>, PtyError> {
        let mut child = lock(&self.child);
        let status = child.try_wait()?;
        Ok(status.map(|s| s.exit_code()))
    }

    /// Block until the child exits and return its exit code.
    pub fn wait(&self) -> Result<u32, PtyError> {
        let mut child = lock(&self.child);
        let status = child.wait()?;
        Ok(status.exit_code())
    }

    pub fn kill(&self) -> Result<(), PtyError> {
        let mut child = lock(&self.child);
        child.kill()?;
        Ok(())
    }

    /// Release the input side and the master. Safe to call more than once.
    pub fn close(&self) {
        if lock(&self.writer).take().is_some() {
            debug!("closed pty writer");
        }
        if lock(&self.master).take().is_some() {
            debug!("closed pty master");
        }
    }
}

impl Drop for Pty {
    fn drop(&mut self) {
        self.close();
    }
}

/// Size of the controlling terminal, or 80x24 when there is none.
pub fn terminal_size() -> PtySize {
    let (cols, rows) = crossterm::terminal::size().unwrap_or((80, 24));
    PtySize {
        rows: rows.max(1),
        cols: cols.max(1),
        pixel_width: 0,
        pixel_height: 0,
    }
}
