//! Connection configuration and the credentials file.

use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an alternative credentials file.
pub const CREDENTIALS_ENV: &str = "MREQ_CREDENTIALS";

/// Credentials file name looked up in the working directory.
const CREDENTIALS_FILE: &str = "credentials.json";

/// Default read/write timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default delay between render job polls in milliseconds.
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// How to reach and authenticate against one server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// host:port of the server
    pub server: String,

    pub user: String,

    /// API token or password
    pub token: String,

    /// Public base URL used to build file links (default: http://<server>)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl ConnectionConfig {
    /// Create config with default timeouts.
    pub fn new(server: impl Into<String>, user: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            user: user.into(),
            token: token.into(),
            base_url: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Base URL for links, without a trailing slash.
    pub fn base_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}", self.server),
        }
    }
}

/// The credentials file: connection key to connection config.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Credentials {
    connections: BTreeMap<String, ConnectionConfig>,
}

impl Credentials {
    /// Load a credentials file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        serde_json::from_str(&contents)
            .map_err(|e| ClientError::Config(format!("invalid credentials in {}: {}", path.display(), e)))
    }

    /// Look up one connection by key.
    pub fn get(&self, key: &str) -> Result<&ConnectionConfig> {
        self.connections
            .get(key)
            .ok_or_else(|| ClientError::Config(format!("no connection named '{}' in credentials", key)))
    }

    pub fn insert(&mut self, key: impl Into<String>, config: ConnectionConfig) {
        self.connections.insert(key.into(), config);
    }

    pub fn keys(&self) -> Vec<&str> {
        self.connections.keys().map(String::as_str).collect()
    }

    /// Write the credentials file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| ClientError::Config(e.to_string()))?;
        fs::write(path, json).map_err(|e| ClientError::Config(format!("cannot write {}: {}", path.display(), e)))
    }
}

/// Where to find the credentials file when none is given explicitly.
///
/// `MREQ_CREDENTIALS`, then `./credentials.json`, then
/// `<config dir>/mreq/credentials.json`.
pub fn default_credentials_path() -> PathBuf {
    if let Ok(path) = std::env::var(CREDENTIALS_ENV) {
        return PathBuf::from(path);
    }
    let local = PathBuf::from(CREDENTIALS_FILE);
    if local.exists() {
        return local;
    }
    dirs::config_dir()
        .map(|dir| dir.join("mreq").join(CREDENTIALS_FILE))
        .unwrap_or(local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_applies_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("credentials.json");
        fs::write(
            &path,
            r#"{"clouds5": {"server": "clouds5.example.com:5150", "user": "alice", "token": "t0k"}}"#,
        )
        .unwrap();

        let credentials = Credentials::load(&path).unwrap();
        let config = credentials.get("clouds5").unwrap();
        assert_eq!(config.user, "alice");
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.base_url(), "http://clouds5.example.com:5150");
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let credentials = Credentials::default();
        assert!(matches!(credentials.get("clouds5"), Err(ClientError::Config(_))));
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("credentials.json");
        let mut credentials = Credentials::default();
        let mut config = ConnectionConfig::new("localhost:5150", "demo", "demo");
        config.base_url = Some("https://reqs.example.com/".to_string());
        credentials.insert("local", config);
        credentials.save(&path).unwrap();

        let loaded = Credentials::load(&path).unwrap();
        assert_eq!(loaded, credentials);
        assert_eq!(loaded.get("local").unwrap().base_url(), "https://reqs.example.com");
        assert_eq!(loaded.keys(), vec!["local"]);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("credentials.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(Credentials::load(&path), Err(ClientError::Config(_))));
    }
}
