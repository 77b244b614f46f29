//! Client configuration
//!
//! Loaded from a TOML file, either an explicit path or the platform
//! config directory.

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine a config directory for this platform")]
    NoConfigDir,
    #[error("Could not read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Connection and identity settings for the chat client
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// REST base, e.g. `http://localhost:8145/api`
    pub rest_url: String,
    /// WebSocket endpoint, e.g. `ws://localhost:8145/ws`
    pub ws_url: String,
    /// Bearer credential attached to REST requests and the channel handshake
    pub token: String,
    pub user_id: i64,
    pub user_name: String,
    /// Group to open when none is given on the command line
    #[serde(default)]
    pub group_id: Option<i64>,
}

impl Config {
    /// Load from `path`, or from the default location when `path` is `None`
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };
        let text = fs::read_to_string(&path)?;
        Ok(toml::from_str(&text)?)
    }

    fn default_path() -> Result<PathBuf, ConfigError> {
        let dirs = ProjectDirs::from("dev", "cohort", "cohort").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let cfg: Config = toml::from_str(
            r#"
            rest_url = "http://localhost:8145/api"
            ws_url = "ws://localhost:8145/ws"
            token = "abc"
            user_id = 42
            user_name = "alice"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.user_id, 42);
        assert!(cfg.group_id.is_none());
    }

    #[test]
    fn test_parse_config_with_group() {
        let cfg: Config = toml::from_str(
            r#"
            rest_url = "http://localhost:8145/api"
            ws_url = "ws://localhost:8145/ws"
            token = "abc"
            user_id = 42
            user_name = "alice"
            group_id = 7
            "#,
        )
        .unwrap();
        assert_eq!(cfg.group_id, Some(7));
    }
}
