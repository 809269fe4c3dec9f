//! Configuration.
//!
//! Layered the usual way: defaults, then an optional TOML file, then
//! `TETHER_`-prefixed environment variables (`TETHER_RELAY__URL` and
//! friends, `__` separating nesting levels).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use tether_id::{DeviceId, DeviceKind};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub relay: RelaySettings,
    pub agent: AgentSettings,
    pub storage: StorageSettings,
    pub debounce: DebounceSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Websocket endpoint of the relay.
    pub url: String,
    /// Deployment environment packed into the device identity (0..=2).
    pub env: u8,
    /// This hub's host index (1-based).
    pub host_index: u8,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8787/ws".to_string(),
            env: 0,
            host_index: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Agent binary spoken to over JSON lines.
    pub command: String,
    /// Extra arguments placed before the per-session flags.
    pub args: Vec<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            command: "claude-agent".to_string(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Data directory; `~` expands. Defaults to the platform data dir.
    pub data_dir: Option<String>,
}

impl StorageSettings {
    pub fn resolve_data_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => PathBuf::from(shellexpand::tilde(dir).into_owned()),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("tether"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceSettings {
    /// Debounce for status/unread/activation saves, in milliseconds.
    pub status_ms: u64,
    /// Debounce for history saves, in milliseconds.
    pub history_ms: u64,
}

impl Default for DebounceSettings {
    fn default() -> Self {
        Self {
            status_ms: 500,
            history_ms: 1000,
        }
    }
}

impl Settings {
    /// Load settings from `path` (or the default location) plus the
    /// environment. A missing file is fine; defaults apply.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        let path = path.map(PathBuf::from).or_else(default_config_path);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder
            .add_source(config::Environment::with_prefix("TETHER").separator("__"))
            .build()
            .context("build configuration")?
            .try_deserialize()
            .context("parse configuration")
    }

    /// This hub's packed device identity.
    pub fn device_id(&self) -> Result<DeviceId> {
        DeviceId::new(self.relay.env, DeviceKind::Host, self.relay.host_index)
            .context("invalid device identity in [relay] configuration")
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tether").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.relay.url, "ws://127.0.0.1:8787/ws");
        assert_eq!(settings.relay.host_index, 1);
        assert_eq!(settings.debounce.status_ms, 500);
        assert_eq!(settings.debounce.history_ms, 1000);
        assert!(settings.device_id().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[relay]\nurl = \"ws://relay.example:9000/ws\"\nhost_index = 3\n\n\
             [agent]\ncommand = \"my-agent\"\n\n[debounce]\nstatus_ms = 250"
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.relay.url, "ws://relay.example:9000/ws");
        assert_eq!(settings.relay.host_index, 3);
        assert_eq!(settings.agent.command, "my-agent");
        assert_eq!(settings.debounce.status_ms, 250);
        // Untouched sections keep defaults.
        assert_eq!(settings.debounce.history_ms, 1000);
    }

    #[test]
    fn test_data_dir_expansion() {
        let storage = StorageSettings {
            data_dir: Some("~/tether-data".to_string()),
        };
        let resolved = storage.resolve_data_dir();
        assert!(!resolved.to_string_lossy().contains('~'));
    }
}
