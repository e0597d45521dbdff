//! `aish.yaml` configuration file.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const CONFIG_FILE: &str = "aish.yaml";
const PREFIX: &str = "aish";
const SOCKET_FILE: &str = "aish.sock";
const PROMPT_FILE: &str = "prompts.yaml";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("must provide either an API token or an assistant client")]
    NoAssistant,
    #[error("must provide either an API token or an assistant client, not both")]
    ConflictingAssistants,
    #[error("failed to read {path}: {message}")]
    Read { path: PathBuf, message: String },
    #[error("invalid configuration file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Settings read from `aish.yaml`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct Config {
    pub verbose: bool,
    /// Console socket shared by wrappers and the console.
    pub socket_path: Option<PathBuf>,
    pub prompt_library_path: Option<PathBuf>,
    /// Shell wrapped when no command is given.
    pub shell: Option<String>,
    pub api_token: Option<String>,
}

impl Config {
    /// Load the config at `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&raw).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    fn parse(raw: &str) -> Result<Self, String> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).map_err(|e| e.to_string())
    }

    /// `$XDG_CONFIG_HOME/aish/aish.yaml`, if it exists.
    pub fn default_path() -> Option<PathBuf> {
        xdg::BaseDirectories::with_prefix(PREFIX)
            .ok()?
            .find_config_file(CONFIG_FILE)
    }

    pub fn socket_path(&self) -> PathBuf {
        self.socket_path.clone().unwrap_or_else(default_socket_path)
    }

    pub fn prompt_library_path(&self) -> PathBuf {
        match &self.prompt_library_path {
            Some(path) => expand_home(path),
            None => xdg::BaseDirectories::with_prefix(PREFIX)
                .ok()
                .map(|dirs| dirs.get_config_home().join(PROMPT_FILE))
                .unwrap_or_else(|| env::temp_dir().join(PREFIX).join(PROMPT_FILE)),
        }
    }

    /// The shell to wrap: configured, then `$SHELL`, then `/bin/sh`.
    pub fn shell(&self) -> String {
        self.shell
            .clone()
            .or_else(|| env::var("SHELL").ok().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| "/bin/sh".to_string())
    }
}

/// `$XDG_RUNTIME_DIR/aish.sock`, or a per-user file in the temp dir.
pub fn default_socket_path() -> PathBuf {
    if let Ok(dirs) = xdg::BaseDirectories::new()
        && let Ok(runtime) = dirs.get_runtime_directory()
    {
        return runtime.join(SOCKET_FILE);
    }
    let user = env::var("USER").unwrap_or_else(|_| "default".to_string());
    env::temp_dir().join(format!("aish-{user}.sock"))
}

/// Expand a leading `~` to `$HOME`.
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(
            "verbose: true\nsocketPath: /tmp/x.sock\npromptLibraryPath: ~/p.yaml\nshell: zsh\napiToken: sk\n",
        )
        .unwrap();
        assert_eq!(
            config,
            Config {
                verbose: true,
                socket_path: Some(PathBuf::from("/tmp/x.sock")),
                prompt_library_path: Some(PathBuf::from("~/p.yaml")),
                shell: Some("zsh".into()),
                api_token: Some("sk".into()),
            }
        );
    }

    #[test]
    fn test_parse_empty_is_default() {
        assert_eq!(Config::parse("").unwrap(), Config::default());
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        assert!(Config::parse("colour: red\n").is_err());
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_reports_path_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "verbose: [").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { path: p, .. } if p == path));
    }

    #[test]
    fn test_configured_shell_wins() {
        let config = Config {
            shell: Some("fish".into()),
            ..Default::default()
        };
        assert_eq!(config.shell(), "fish");
    }

    #[test]
    fn test_configured_socket_path_wins() {
        let config = Config {
            socket_path: Some(PathBuf::from("/run/custom.sock")),
            ..Default::default()
        };
        assert_eq!(config.socket_path(), PathBuf::from("/run/custom.sock"));
    }

    #[test]
    fn test_expand_home_leaves_absolute_paths() {
        assert_eq!(
            expand_home(Path::new("/etc/aish.yaml")),
            PathBuf::from("/etc/aish.yaml")
        );
    }
}
