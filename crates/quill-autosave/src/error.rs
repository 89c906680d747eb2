//! Error types for the autosave scheduler
//!
//! Covers:
//! - Caller misuse (empty keys, use after shutdown)
//! - Persistence failures reported by a sink
//! - Configuration loading and validation

use crate::request::SaveKey;

/// Main autosave error type
#[derive(Debug, thiserror::Error)]
pub enum AutosaveError {
    /// Key was empty or whitespace only
    #[error("save key must not be empty")]
    EmptyKey,

    /// Scheduler no longer accepts submissions
    #[error("autosave scheduler has been shut down")]
    ShutDown,

    /// The authoritative save for the key failed
    #[error("save failed for {key}: {message}")]
    Persist {
        /// Key whose save failed
        key: SaveKey,
        /// Error reported by the sink
        message: String,
    },

    /// The awaited request never became authoritative
    ///
    /// It was displaced by a higher-priority request or cancelled before
    /// executing.
    #[error("save for {key} was discarded before it executed")]
    Discarded {
        /// Key whose request was discarded
        key: SaveKey,
    },

    /// Key was torn down while a caller was waiting on it
    #[error("key {key} was removed while awaiting its save")]
    KeyRemoved {
        /// Removed key
        key: SaveKey,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl AutosaveError {
    /// Check if re-submitting the same payload may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persist { .. })
    }

    /// Key this error refers to, if any
    #[must_use]
    pub fn key(&self) -> Option<&SaveKey> {
        match self {
            Self::Persist { key, .. } | Self::Discarded { key } | Self::KeyRemoved { key } => {
                Some(key)
            }
            _ => None,
        }
    }
}

/// Errors raised by a persistence sink
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Backend could not be reached
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Backend refused the payload
    #[error("write rejected: {0}")]
    Rejected(String),

    /// Watchdog fired before the sink settled
    #[error("persist timed out after {after_ms}ms")]
    TimedOut {
        /// Configured watchdog in milliseconds
        after_ms: u64,
    },

    /// I/O failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload could not be encoded
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML for the schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values parsed but are unusable
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_persist_failures_are_retryable() {
        let key = SaveKey::new("outline").unwrap();
        let persist = AutosaveError::Persist {
            key: key.clone(),
            message: "disk full".into(),
        };
        assert!(persist.is_retryable());
        assert!(!AutosaveError::ShutDown.is_retryable());
        assert!(!AutosaveError::EmptyKey.is_retryable());
        assert!(!AutosaveError::Discarded { key }.is_retryable());
    }

    #[test]
    fn errors_expose_their_key() {
        let key = SaveKey::new("characters").unwrap();
        let err = AutosaveError::KeyRemoved { key: key.clone() };
        assert_eq!(err.key(), Some(&key));
        assert_eq!(AutosaveError::ShutDown.key(), None);
    }

    #[test]
    fn persist_error_message_names_the_key() {
        let err = AutosaveError::Persist {
            key: SaveKey::new("beats-sceneA").unwrap(),
            message: "quota exceeded".into(),
        };
        assert_eq!(err.to_string(), "save failed for beats-sceneA: quota exceeded");
    }

    #[test]
    fn sink_timeout_message() {
        let err = SinkError::TimedOut { after_ms: 250 };
        assert_eq!(err.to_string(), "persist timed out after 250ms");
    }
}
