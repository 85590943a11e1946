//! Runtime configuration, loadable from TOML.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure loading a [`SyncConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("reading config: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid TOML for [`SyncConfig`].
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Tunables for the queue, dispatcher, and history engine.
///
/// Missing keys fall back to [`SyncConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Quiet period after the last enqueue before the queue is sent.
    pub debounce_ms: u64,
    /// Fixed period of the retry tick; failed batches wait for it.
    pub retry_interval_secs: u64,
    /// Client-side timeout for data fetches outside the queue.
    pub request_timeout_ms: u64,
    /// Undo depth; the oldest patch set is evicted beyond it.
    pub max_patch_sets: usize,
    /// Per-operation statuses that are retried rather than dropped.
    pub non_critical_statuses: Vec<u16>,
    /// Consecutive non-critical failures of one operation before the
    /// could-not-save indicator is raised.
    pub repeated_failure_threshold: u32,
    /// Capacity of the rejected-operation holding area.
    pub max_rejected: usize,
    /// Bound of the runtime command channel.
    pub command_channel_bound: usize,
    /// Capacity of the runtime event broadcast channel.
    pub event_channel_bound: usize,
    /// Base URL of the remote API.
    pub base_url: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            retry_interval_secs: 60,
            request_timeout_ms: 40_000,
            max_patch_sets: 30,
            non_critical_statuses: vec![400, 401, 404, 409, 422],
            repeated_failure_threshold: 3,
            max_rejected: 100,
            command_channel_bound: 256,
            event_channel_bound: 1024,
            base_url: "http://localhost:3000".to_string(),
        }
    }
}

impl SyncConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// [`Self::debounce_ms`] as a duration.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// [`Self::retry_interval_secs`] as a duration.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    /// [`Self::request_timeout_ms`] as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// True when a per-operation failure with `status` should be retried.
    pub fn is_non_critical(&self, status: u16) -> bool {
        self.non_critical_statuses.contains(&status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = SyncConfig::from_toml_str(
            r#"
            debounce_ms = 50
            non_critical_statuses = [404]
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.debounce(), Duration::from_millis(50));
        assert!(cfg.is_non_critical(404));
        assert!(!cfg.is_non_critical(400));
        assert_eq!(cfg.max_patch_sets, 30);
        assert_eq!(cfg.retry_interval(), Duration::from_secs(60));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = SyncConfig::from_toml_str("debounce_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
