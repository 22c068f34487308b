use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::events::CapturePolicy;

/// Upper bound for every interval, window and retention (10,000 years),
/// well inside what `DateTime<Utc>` and `tokio::time::Instant` can represent.
pub const MAX_DURATION_SECS: u64 = 10_000 * 366 * 24 * 60 * 60;

/// Relay cadence, lookback and retention, owned by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// How often the relay worker scans for unpublished rows.
    pub relay_interval_secs: u64,
    /// Lookback of each scan. Older unpublished rows are left alone.
    pub relay_window_secs: u64,
    /// Maximum rows published per tick.
    pub max_batch: usize,
    pub janitor_interval_secs: u64,
    /// Published rows older than this are deleted by the janitor.
    pub retention_secs: u64,
    pub capture_policy: CapturePolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            relay_interval_secs: 60,
            relay_window_secs: 24 * 60 * 60,
            max_batch: 1000,
            janitor_interval_secs: 24 * 60 * 60,
            retention_secs: 3 * 24 * 60 * 60,
            capture_policy: CapturePolicy::Warn,
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("relay_interval_secs", self.relay_interval_secs == 0),
            ("relay_window_secs", self.relay_window_secs == 0),
            ("max_batch", self.max_batch == 0),
            ("janitor_interval_secs", self.janitor_interval_secs == 0),
            ("retention_secs", self.retention_secs == 0),
        ];
        if let Some((field, _)) = checks.into_iter().find(|(_, is_zero)| *is_zero) {
            return Err(ConfigError::MustBePositive(field));
        }

        let bounded = [
            ("relay_interval_secs", self.relay_interval_secs),
            ("relay_window_secs", self.relay_window_secs),
            ("janitor_interval_secs", self.janitor_interval_secs),
            ("retention_secs", self.retention_secs),
        ];
        match bounded
            .into_iter()
            .find(|(_, secs)| *secs > MAX_DURATION_SECS)
        {
            Some((field, _)) => Err(ConfigError::TooLarge {
                field,
                max: MAX_DURATION_SECS,
            }),
            None => Ok(()),
        }
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `RELAY_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        override_from_env("RELAY_INTERVAL_SECS", &mut config.relay_interval_secs);
        override_from_env("RELAY_WINDOW_SECS", &mut config.relay_window_secs);
        override_from_env("RELAY_MAX_BATCH", &mut config.max_batch);
        override_from_env("RELAY_JANITOR_INTERVAL_SECS", &mut config.janitor_interval_secs);
        override_from_env("RELAY_RETENTION_SECS", &mut config.retention_secs);
        if let Ok(policy) = std::env::var("RELAY_CAPTURE_POLICY") {
            match policy.to_ascii_lowercase().as_str() {
                "warn" => config.capture_policy = CapturePolicy::Warn,
                "silent" => config.capture_policy = CapturePolicy::Silent,
                other => tracing::warn!(value = other, "Ignoring unknown RELAY_CAPTURE_POLICY"),
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn relay_interval(&self) -> Duration {
        Duration::from_secs(self.relay_interval_secs.min(MAX_DURATION_SECS))
    }

    pub fn relay_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(clamp_secs(self.relay_window_secs))
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_secs.min(MAX_DURATION_SECS))
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(clamp_secs(self.retention_secs))
    }
}

// Unvalidated configs still get a representable duration.
fn clamp_secs(secs: u64) -> i64 {
    i64::try_from(secs.min(MAX_DURATION_SECS)).unwrap_or(i64::MAX)
}

fn override_from_env<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(name) {
        match raw.parse() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!(variable = name, value = %raw, "Ignoring unparsable override"),
        }
    }
}
