//! Configuration for the controller loop.
//!
//! Loaded from a TOML file, then overridden by `TMPLSYNC_*` environment
//! variables and finally by command-line flags.
//!
//! ```toml
//! workers = 4
//! backoff_base_secs = 1
//! backoff_max_secs = 300
//! resync_secs = 600
//! watch_capacity = 1024
//! log_level = "info"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tmplsync_core::Error as CoreError;
use tracing::warn;

use crate::error::{Error, Result};
use crate::store::DEFAULT_WATCH_CAPACITY;

/// Configuration for the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Number of concurrent reconcile workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// First requeue delay after a failed run.
    #[serde(
        rename = "backoff_base_secs",
        with = "duration_secs",
        default = "default_backoff_base"
    )]
    pub backoff_base: Duration,

    /// Upper bound for the requeue delay.
    #[serde(
        rename = "backoff_max_secs",
        with = "duration_secs",
        default = "default_backoff_max"
    )]
    pub backoff_max: Duration,

    /// Re-enqueue every known record this often. Disabled when absent.
    #[serde(
        rename = "resync_secs",
        with = "option_duration_secs",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub resync_interval: Option<Duration>,

    /// Buffered change notifications before a watcher falls behind.
    #[serde(default = "default_watch_capacity")]
    pub watch_capacity: usize,

    /// Default tracing filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            backoff_base: default_backoff_base(),
            backoff_max: default_backoff_max(),
            resync_interval: None,
            watch_capacity: default_watch_capacity(),
            log_level: default_log_level(),
        }
    }
}

impl ControllerConfig {
    /// Set the number of workers.
    #[must_use]
    pub const fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the requeue backoff bounds.
    #[must_use]
    pub const fn backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    /// Set the resync interval.
    #[must_use]
    pub const fn resync_interval(mut self, interval: Option<Duration>) -> Self {
        self.resync_interval = interval;
        self
    }

    /// Set the log level.
    #[must_use]
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `FileReadFailed` or `TomlParseFailed`.
    pub fn from_file(path: &Path) -> tmplsync_core::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::file_read_failed(path, e.to_string()))?;
        toml::from_str(&content)
            .map_err(|e| CoreError::toml_parse_failed(format!("{}: {e}", path.display())))
    }

    /// Apply `TMPLSYNC_*` overrides from the process environment.
    #[must_use]
    pub fn with_env(self) -> Self {
        self.with_env_from(|name| std::env::var(name).ok())
    }

    /// Apply `TMPLSYNC_*` overrides read through `lookup`.
    ///
    /// Unparseable values are logged and ignored.
    #[must_use]
    pub fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(workers) = parse_var(&lookup, "TMPLSYNC_WORKERS") {
            self.workers = workers;
        }
        if let Some(secs) = parse_var(&lookup, "TMPLSYNC_BACKOFF_BASE_SECS") {
            self.backoff_base = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&lookup, "TMPLSYNC_BACKOFF_MAX_SECS") {
            self.backoff_max = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "TMPLSYNC_RESYNC_SECS") {
            self.resync_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(level) = lookup("TMPLSYNC_LOG") {
            self.log_level = level;
        }
        self
    }

    /// Check the configuration for values the controller cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` describing the first bad value.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::invalid_config("workers must be at least 1"));
        }
        if self.backoff_base.is_zero() {
            return Err(Error::invalid_config("backoff_base_secs must be positive"));
        }
        if self.backoff_max < self.backoff_base {
            return Err(Error::invalid_config(
                "backoff_max_secs must not be smaller than backoff_base_secs",
            ));
        }
        if self.resync_interval.is_some_and(|d| d.is_zero()) {
            return Err(Error::invalid_config("resync_secs must be positive"));
        }
        if self.watch_capacity == 0 {
            return Err(Error::invalid_config("watch_capacity must be at least 1"));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    raw.trim().parse().map_or_else(
        |_| {
            warn!(variable = name, value = %raw, "Ignoring unparseable environment override");
            None
        },
        Some,
    )
}

const fn default_workers() -> usize {
    4
}

const fn default_backoff_base() -> Duration {
    Duration::from_secs(1)
}

const fn default_backoff_max() -> Duration {
    Duration::from_secs(300) // 5 minutes
}

const fn default_watch_capacity() -> usize {
    DEFAULT_WATCH_CAPACITY
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Serialization helper for Duration as seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serialization helper for an optional Duration as seconds.
mod option_duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        duration.map(|d| d.as_secs()).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = ControllerConfig::default();
        assert_eq!(config.workers, 4);
        assert_eq!(config.backoff_base, Duration::from_secs(1));
        assert_eq!(config.backoff_max, Duration::from_secs(300));
        assert!(config.resync_interval.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tmplsync.toml");
        std::fs::write(&path, "workers = 2\nresync_secs = 60\nlog_level = \"debug\"\n").unwrap();

        let config = ControllerConfig::from_file(&path).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.resync_interval, Some(Duration::from_secs(60)));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.backoff_max, Duration::from_secs(300));
    }

    #[test]
    fn test_from_file_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "workers = \"many\"").unwrap();

        let result = ControllerConfig::from_file(&path);
        assert!(matches!(result, Err(CoreError::TomlParseFailed { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TMPLSYNC_WORKERS", "8"),
            ("TMPLSYNC_BACKOFF_MAX_SECS", "30"),
            ("TMPLSYNC_RESYNC_SECS", "0"),
            ("TMPLSYNC_BACKOFF_BASE_SECS", "soon"),
        ]
        .into_iter()
        .collect();

        let config = ControllerConfig::default()
            .resync_interval(Some(Duration::from_secs(10)))
            .with_env_from(|name| vars.get(name).map(ToString::to_string));

        assert_eq!(config.workers, 8);
        assert_eq!(config.backoff_max, Duration::from_secs(30));
        assert_eq!(config.backoff_base, Duration::from_secs(1));
        assert!(config.resync_interval.is_none());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ControllerConfig::default().workers(0).validate().is_err());
        assert!(
            ControllerConfig::default()
                .backoff(Duration::from_secs(10), Duration::from_secs(1))
                .validate()
                .is_err()
        );
        assert!(
            ControllerConfig::default()
                .resync_interval(Some(Duration::ZERO))
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let config = ControllerConfig::default().resync_interval(Some(Duration::from_secs(90)));
        let rendered = toml::to_string(&config).unwrap();
        assert!(rendered.contains("resync_secs = 90"));
        let parsed: ControllerConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
