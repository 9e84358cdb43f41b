use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "XLBRIDGE_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub rtd: RtdConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
    /// How long shutdown waits for cancelled tasks to report completion.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_thread_name() -> String {
    "xlbridge-loop".into()
}
fn default_shutdown_grace_ms() -> u64 {
    2000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            thread_name: default_thread_name(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RtdConfig {
    /// Capacity of the topic-update broadcast channel.
    #[serde(default = "default_update_capacity")]
    pub update_capacity: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_update_capacity() -> usize {
    1024
}
fn default_poll_interval_ms() -> u64 {
    4000
}
fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for RtdConfig {
    fn default() -> Self {
        Self {
            update_capacity: default_update_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl RtdConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl BridgeConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// `~/.xlbridge/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".xlbridge").join("config.toml"))
    }

    /// Pick the config file: an explicit path, then the environment
    /// override, then the default location.
    pub fn resolve_path(explicit: Option<&Path>, env_override: Option<String>) -> Option<PathBuf> {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| env_override.filter(|s| !s.is_empty()).map(PathBuf::from))
            .or_else(Self::default_path)
    }

    /// Load from the resolved path. A missing default file yields the
    /// defaults; a missing explicit file is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let env_override = std::env::var(CONFIG_ENV).ok();
        let is_default = explicit.is_none() && env_override.as_deref().is_none_or(str::is_empty);
        match Self::resolve_path(explicit, env_override) {
            Some(path) if !is_default || path.exists() => {
                tracing::debug!(path = %path.display(), "Loading config");
                Self::from_file(&path)
            }
            _ => Ok(Self::default()),
        }
    }
}
