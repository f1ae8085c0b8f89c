//! Sync tuning knobs, with serde defaults and optional YAML file loading.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::error::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("config file not found: {0}")]
  NotFound(PathBuf),
  #[error("failed to read config: {0}")]
  Io(#[from] std::io::Error),
  #[error("failed to parse config: {0}")]
  Parse(#[from] serde_yaml::Error),
}

/// Staleness, eviction, timeout and retry settings.
///
/// Every field has a usable default; a config file only needs the keys it
/// wants to override.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// How long a cached value is served without a refetch.
  pub stale_after_secs: u64,
  /// How long an unused entry survives before eviction.
  pub evict_after_secs: u64,
  /// Bound on a single network request; expiry classifies as `network`.
  pub request_timeout_secs: u64,
  pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  pub max_network_retries: u32,
  pub backoff_base_ms: u64,
  pub backoff_multiplier: f64,
  pub max_conflict_retries: u32,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      stale_after_secs: 300,
      evict_after_secs: 24 * 60 * 60,
      request_timeout_secs: 10,
      retry: RetryConfig::default(),
    }
  }
}

impl Default for RetryConfig {
  fn default() -> Self {
    let policy = RetryPolicy::default();
    Self {
      max_network_retries: policy.max_network_retries,
      backoff_base_ms: policy.backoff_base.as_millis() as u64,
      backoff_multiplier: policy.backoff_multiplier,
      max_conflict_retries: policy.max_conflict_retries,
    }
  }
}

impl SyncConfig {
  /// Load configuration.
  ///
  /// Search order:
  /// 1. Explicit path if provided (missing file is an error)
  /// 2. ./ledgersync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/ledgersync/config.yaml
  ///
  /// With no file found anywhere, the defaults apply.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
    if let Some(p) = explicit_path {
      if !p.exists() {
        return Err(ConfigError::NotFound(p.to_path_buf()));
      }
      return Self::load_from_path(p);
    }
    match Self::find_config_file() {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("ledgersync.yaml");
    if local.exists() {
      return Some(local);
    }
    let in_config_dir = dirs::config_dir()?.join("ledgersync").join("config.yaml");
    if in_config_dir.exists() {
      return Some(in_config_dir);
    }
    None
  }

  fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&contents)?)
  }

  pub fn stale_after(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.stale_after_secs as i64)
  }

  pub fn evict_after(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.evict_after_secs as i64)
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }

  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy {
      max_network_retries: self.retry.max_network_retries,
      backoff_base: Duration::from_millis(self.retry.backoff_base_ms),
      backoff_multiplier: self.retry.backoff_multiplier,
      max_conflict_retries: self.retry.max_conflict_retries,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn defaults_match_the_retry_policy() {
    let config = SyncConfig::default();
    assert_eq!(config.retry_policy(), RetryPolicy::default());
    assert_eq!(config.stale_after(), chrono::Duration::minutes(5));
  }

  #[test]
  fn partial_yaml_overrides_only_named_keys() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "stale_after_secs: 60\nretry:\n  max_network_retries: 2").unwrap();

    let config = SyncConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.stale_after_secs, 60);
    assert_eq!(config.retry.max_network_retries, 2);
    // Untouched keys keep their defaults.
    assert_eq!(config.request_timeout_secs, 10);
    assert_eq!(config.retry.max_conflict_retries, 2);
  }

  #[test]
  fn explicit_missing_path_is_an_error() {
    let err = SyncConfig::load(Some(Path::new("/nonexistent/ledgersync.yaml"))).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound(_)));
  }
}
