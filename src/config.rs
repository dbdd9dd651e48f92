//! Configuration loading and persistence.
//!
//! Reads `config.json` from the platform config directory and layers
//! `PHARMADESK_*` environment variables on top. The bearer token is only
//! ever taken from the environment (or set in memory by the caller) and is
//! never written to disk.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;
use std::{fs, path::Path, path::PathBuf};

use crate::constants::{
    DEFAULT_API_URL, DEFAULT_CHAT_HUB_PATH, DEFAULT_KEEP_ALIVE, DEFAULT_NOTIFICATION_HUB_PATH,
    DEFAULT_RECONNECT_DELAYS_MS, DEFAULT_SERVER_TIMEOUT,
};

/// Configuration for the real-time client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Base URL of the backend API (e.g. `https://api.example.com`).
    pub api_url: String,
    /// Bearer token - NOT serialized to disk.
    #[serde(skip)]
    pub token: String,
    /// Chat hub path relative to `api_url`.
    pub hub_path: String,
    /// Notification hub path relative to `api_url`.
    pub notification_hub_path: String,
    /// Connect the WebSocket directly, without the negotiate round-trip.
    pub skip_negotiation: bool,
    /// Reconnect delays in milliseconds, one per attempt.
    pub reconnect_delays_ms: Vec<u64>,
    /// Client ping interval in seconds.
    pub keep_alive_secs: u64,
    /// Silence in seconds before the connection is considered lost.
    pub server_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            token: String::new(),
            hub_path: DEFAULT_CHAT_HUB_PATH.to_string(),
            notification_hub_path: DEFAULT_NOTIFICATION_HUB_PATH.to_string(),
            skip_negotiation: false,
            reconnect_delays_ms: DEFAULT_RECONNECT_DELAYS_MS.to_vec(),
            keep_alive_secs: DEFAULT_KEEP_ALIVE.as_secs(),
            server_timeout_secs: DEFAULT_SERVER_TIMEOUT.as_secs(),
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `PHARMADESK_CONFIG_DIR` overrides the platform config directory.
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("PHARMADESK_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("pharmadesk")
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    ///
    /// A missing file falls back to defaults; a file that exists but cannot
    /// be read or parsed is an error. In test mode (`PHARMADESK_ENV=test`)
    /// the file is not consulted at all.
    pub fn load() -> Result<Self> {
        let mut config = if crate::env::is_test_mode() {
            Self::default()
        } else {
            Self::load_or_default(&Self::config_dir()?.join("config.json"))?
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Reads `path`, or returns defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("[Config] No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from_file(path)
    }

    /// Reads a config file without applying environment overrides.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Apply `PHARMADESK_*` overrides using `lookup` to resolve variables.
    ///
    /// Unparseable numeric/boolean values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(api_url) = lookup("PHARMADESK_API_URL") {
            self.api_url = api_url.trim_end_matches('/').to_string();
        }

        if let Some(token) = lookup("PHARMADESK_TOKEN") {
            self.token = token;
        }

        if let Some(hub_path) = lookup("PHARMADESK_HUB_PATH") {
            self.hub_path = hub_path;
        }

        if let Some(skip) = lookup("PHARMADESK_SKIP_NEGOTIATION") {
            match skip.as_str() {
                "1" | "true" => self.skip_negotiation = true,
                "0" | "false" => self.skip_negotiation = false,
                other => log::warn!("[Config] Ignoring PHARMADESK_SKIP_NEGOTIATION={}", other),
            }
        }

        if let Some(keep_alive) = lookup("PHARMADESK_KEEP_ALIVE_SECS") {
            if let Ok(secs) = keep_alive.parse::<u64>() {
                self.keep_alive_secs = secs;
            }
        }
    }

    /// Persists the current configuration to `path`.
    ///
    /// The token is skipped by serde and never reaches the file.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        #[cfg(unix)]
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Persists the configuration to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_dir()?.join("config.json"))
    }

    /// Returns `true` if a non-blank token is configured.
    pub fn has_token(&self) -> bool {
        !self.token.trim().is_empty()
    }

    /// Full URL of the chat hub.
    pub fn hub_url(&self) -> String {
        join_url(&self.api_url, &self.hub_path)
    }

    /// Full URL of the notification hub.
    pub fn notification_hub_url(&self) -> String {
        join_url(&self.api_url, &self.notification_hub_path)
    }

    /// Reconnect schedule as durations.
    pub fn reconnect_delays(&self) -> Vec<Duration> {
        self.reconnect_delays_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect()
    }

    /// Client ping interval. Zero disables pings.
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Inbound silence window before the connection is declared lost.
    pub fn server_timeout(&self) -> Duration {
        Duration::from_secs(self.server_timeout_secs)
    }

    /// Copy with the token masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.has_token() {
            copy.token = "<redacted>".to_string();
        }
        copy
    }
}

/// Join a base URL and a path with exactly one slash between them.
fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
