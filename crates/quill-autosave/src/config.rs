//! Scheduler configuration
//!
//! All fields have defaults so a partial TOML file (or none at all) is valid:
//!
//! ```toml
//! default_delay_ms = 1000
//! drain_gap_ms = 50
//! persist_timeout_ms = 5000
//!
//! [keys.outline]
//! delay_ms = 2000
//! ```

use crate::error::ConfigError;
use crate::request::duration_millis;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Autosave configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutosaveConfig {
    /// Debounce quiet period in milliseconds
    pub default_delay_ms: u64,
    /// Pause between successive executions for one key
    pub drain_gap_ms: u64,
    /// Optional watchdog on a single persist call
    pub persist_timeout_ms: Option<u64>,
    /// Buffer size of the lifecycle event channel
    pub event_capacity: usize,
    /// Per-key overrides
    pub keys: BTreeMap<String, KeyConfig>,
}

/// Per-key configuration override
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// Debounce quiet period for this key
    pub delay_ms: Option<u64>,
}

impl AutosaveConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from TOML text and validate
    ///
    /// # Errors
    /// - `ConfigError::Parse` for malformed TOML
    /// - `ConfigError::Invalid` if validation fails
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file and validate
    ///
    /// # Errors
    /// - `ConfigError::Io` if the file cannot be read
    /// - see [`AutosaveConfig::from_toml_str`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check values are usable
    ///
    /// # Errors
    /// - `ConfigError::Invalid` for a zero event capacity, a zero watchdog or
    ///   a blank key name
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        if self.persist_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "persist_timeout_ms must be positive when set".to_string(),
            ));
        }
        if let Some(name) = self.keys.keys().find(|name| name.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "key override with blank name: {name:?}"
            )));
        }
        Ok(())
    }

    /// With default debounce delay
    #[inline]
    #[must_use]
    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay_ms = duration_millis(delay);
        self
    }

    /// With gap between executions
    #[inline]
    #[must_use]
    pub fn with_drain_gap(mut self, gap: Duration) -> Self {
        self.drain_gap_ms = duration_millis(gap);
        self
    }

    /// With persist watchdog
    #[inline]
    #[must_use]
    pub fn with_persist_timeout(mut self, timeout: Duration) -> Self {
        self.persist_timeout_ms = Some(duration_millis(timeout));
        self
    }

    /// With event channel capacity
    #[inline]
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// With a per-key debounce override
    #[must_use]
    pub fn with_key_delay(mut self, key: impl Into<String>, delay: Duration) -> Self {
        self.keys.entry(key.into()).or_default().delay_ms = Some(duration_millis(delay));
        self
    }

    /// Default debounce delay
    #[inline]
    #[must_use]
    pub fn default_delay(&self) -> Duration {
        Duration::from_millis(self.default_delay_ms)
    }

    /// Gap between executions
    #[inline]
    #[must_use]
    pub fn drain_gap(&self) -> Duration {
        Duration::from_millis(self.drain_gap_ms)
    }

    /// Persist watchdog, if enabled
    #[inline]
    #[must_use]
    pub fn persist_timeout(&self) -> Option<Duration> {
        self.persist_timeout_ms.map(Duration::from_millis)
    }

    /// Debounce delay for `key`: per-key override, else the default
    #[must_use]
    pub fn delay_for(&self, key: &str) -> Duration {
        self.keys
            .get(key)
            .and_then(|k| k.delay_ms)
            .map_or_else(|| self.default_delay(), Duration::from_millis)
    }
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            default_delay_ms: 1000,
            drain_gap_ms: 50,
            persist_timeout_ms: None,
            event_capacity: 256,
            keys: BTreeMap::new(),
        }
    }
}
