//! Sync engine configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::window::check_period;
use epgsync_common::{Error, Result, HOUR_MS};

/// Default recurrence of periodic syncs.
pub const DEFAULT_SYNC_INTERVAL_MS: i64 = 12 * HOUR_MS;
/// Default window length of periodic syncs.
pub const DEFAULT_PERIODIC_WINDOW_MS: i64 = 48 * HOUR_MS;
/// Default window length of immediate syncs.
pub const DEFAULT_IMMEDIATE_WINDOW_MS: i64 = HOUR_MS;

/// Configuration for the sync scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Time between periodic syncs of an input.
    pub sync_interval_ms: i64,
    /// Window length requested by periodic syncs.
    pub periodic_window_ms: i64,
    /// Window length requested by immediate syncs.
    pub immediate_window_ms: i64,
    /// Pending requests before callers wait for the worker.
    pub request_queue_capacity: usize,
    /// Undelivered status events kept per subscriber.
    pub status_channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval_ms: DEFAULT_SYNC_INTERVAL_MS,
            periodic_window_ms: DEFAULT_PERIODIC_WINDOW_MS,
            immediate_window_ms: DEFAULT_IMMEDIATE_WINDOW_MS,
            request_queue_capacity: 100,
            status_channel_capacity: 64,
        }
    }
}

impl SyncConfig {
    /// Recurrence of periodic syncs as a `Duration`.
    ///
    /// # Errors
    /// - `InvalidInput` if the interval is not positive
    pub fn sync_interval(&self) -> Result<Duration> {
        positive_duration("sync_interval_ms", self.sync_interval_ms)
    }

    /// Check every field for a usable value.
    pub fn validate(&self) -> Result<()> {
        self.sync_interval()?;
        check_period(self.periodic_window_ms)?;
        check_period(self.immediate_window_ms)?;
        if self.request_queue_capacity == 0 || self.status_channel_capacity == 0 {
            return Err(Error::InvalidInput(
                "Channel capacities must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

/// Convert a positive millisecond count into a `Duration`.
pub(crate) fn positive_duration(name: &str, ms: i64) -> Result<Duration> {
    if ms <= 0 {
        return Err(Error::InvalidInput(format!(
            "{} must be positive, got {}",
            name, ms
        )));
    }
    Ok(Duration::from_millis(ms as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.sync_interval().unwrap(), Duration::from_secs(12 * 3600));
        assert_eq!(config.periodic_window_ms, 48 * HOUR_MS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = SyncConfig::from_json(r#"{"immediate_window_ms": 7200000}"#).unwrap();
        assert_eq!(config.immediate_window_ms, 2 * HOUR_MS);
        assert_eq!(config.request_queue_capacity, 100);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(SyncConfig::from_json(r#"{"sync_interval_ms": 0}"#).is_err());
        assert!(SyncConfig::from_json(r#"{"status_channel_capacity": 0}"#).is_err());
        assert!(matches!(
            SyncConfig::from_json("not json"),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let config = SyncConfig {
            sync_interval_ms: HOUR_MS,
            ..SyncConfig::default()
        };
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_json().unwrap().as_bytes()).unwrap();

        let loaded = SyncConfig::load(file.path()).unwrap();
        assert_eq!(loaded, config);
    }
}
