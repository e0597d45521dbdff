use crate::cli::LogFormat;
use miette::{IntoDiagnostic, Result, WrapErr};
use std::fs::{self, File, OpenOptions};
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, prelude::*};

#[derive(Default, Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Level {
    Silent,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl Level {
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        match (verbose, quiet) {
            (true, _) => Level::Debug,
            (_, true) => Level::Silent,
            _ => Level::default(),
        }
    }
}

impl From<Level> for LevelFilter {
    fn from(level: Level) -> LevelFilter {
        match level {
            Level::Silent => LevelFilter::OFF,
            Level::Error => LevelFilter::ERROR,
            Level::Warn => LevelFilter::WARN,
            Level::Info => LevelFilter::INFO,
            Level::Debug => LevelFilter::DEBUG,
        }
    }
}

/// Where log lines go.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    /// Required while the terminal is in raw mode and owned by a child.
    File(PathBuf),
}

/// `$XDG_STATE_HOME/aish/aish.log`, or a file in the temp dir.
pub fn default_log_file() -> PathBuf {
    xdg::BaseDirectories::with_prefix("aish")
        .map(|dirs| dirs.get_state_home().join("aish.log"))
        .unwrap_or_else(|_| std::env::temp_dir().join("aish.log"))
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to create log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to open log file {}", path.display()))
}

pub fn init_tracing(level: Level, log_format: LogFormat, target: &LogTarget) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from(level).into())
        .from_env_lossy();

    match target {
        LogTarget::Stderr => {
            let ansi = io::stderr().is_terminal();
            match log_format {
                LogFormat::Full => tracing_subscriber::registry()
                    .with(filter)
                    .with(
                        tracing_subscriber::fmt::layer()
                            .with_writer(io::stderr)
                            .with_ansi(ansi),
                    )
                    .init(),
                LogFormat::Json => tracing_subscriber::registry()
                    .with(filter)
                    .with(
                        tracing_subscriber::fmt::layer()
                            .json()
                            .with_writer(io::stderr),
                    )
                    .init(),
            }
        }
        LogTarget::File(path) => {
            let file = Mutex::new(open_log_file(path)?);
            match log_format {
                LogFormat::Full => tracing_subscriber::registry()
                    .with(filter)
                    .with(
                        tracing_subscriber::fmt::layer()
                            .with_writer(file)
                            .with_ansi(false),
                    )
                    .init(),
                LogFormat::Json => tracing_subscriber::registry()
                    .with(filter)
                    .with(tracing_subscriber::fmt::layer().json().with_writer(file))
                    .init(),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_from_flags() {
        assert_eq!(Level::from_flags(true, false), Level::Debug);
        assert_eq!(Level::from_flags(false, true), Level::Silent);
        assert_eq!(Level::from_flags(false, false), Level::Info);
    }

    #[test]
    fn test_open_log_file_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("aish.log");
        open_log_file(&path).unwrap();
        assert!(path.exists());
    }
}
