//! Save request model
//!
//! - [`SaveKey`]: validated identity of a savable resource
//! - [`Timestamp`]: monotonic submission time in milliseconds
//! - [`MonotonicClock`]: issues strictly increasing timestamps
//! - [`SaveRequest`]: immutable record handed from the gate to the queue

use crate::error::AutosaveError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;

/// Logical identity of a savable resource (e.g. `"outline"`, `"beats-sceneA"`)
///
/// All queueing and ordering guarantees are scoped to one key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SaveKey(String);

impl SaveKey {
    /// Create a key, rejecting empty or whitespace-only names
    ///
    /// # Errors
    /// - `AutosaveError::EmptyKey` if `name` has no visible characters
    pub fn new(name: impl Into<String>) -> Result<Self, AutosaveError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(AutosaveError::EmptyKey);
        }
        Ok(Self(name))
    }

    /// Key as string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SaveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SaveKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for SaveKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl FromStr for SaveKey {
    type Err = AutosaveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SaveKey {
    type Error = AutosaveError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for SaveKey {
    type Error = AutosaveError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SaveKey> for String {
    fn from(key: SaveKey) -> Self {
        key.0
    }
}

/// Monotonic submission time in milliseconds since the clock was created
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Source of strictly increasing timestamps
///
/// Reads the tokio clock, so paused-time tests see virtual milliseconds.
/// Two reads within the same millisecond are separated by bumping the
/// second one forward.
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
    last: Mutex<Option<u64>>,
}

impl MonotonicClock {
    /// Start a clock at the current instant
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last: Mutex::new(None),
        }
    }

    /// Next timestamp, strictly greater than every one issued before
    pub fn now(&self) -> Timestamp {
        let elapsed = self.elapsed_millis();
        let mut last = self.last.lock();
        let next = match *last {
            Some(prev) if elapsed <= prev => prev.saturating_add(1),
            _ => elapsed,
        };
        *last = Some(next);
        Timestamp(next)
    }

    /// Milliseconds since the origin without issuing a timestamp
    #[must_use]
    pub fn elapsed_millis(&self) -> u64 {
        duration_millis(self.origin.elapsed())
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Whole milliseconds in `d`, saturating at `u64::MAX`
pub(crate) fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Per-call submission overrides
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Debounce quiet period; falls back to the key override, then the default
    pub delay: Option<Duration>,
    /// Higher executes before lower within the same key
    pub priority: i32,
}

impl SubmitOptions {
    /// Options with no overrides
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With a debounce delay
    #[inline]
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// With a priority
    #[inline]
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// An immutable request to persist one payload for one key
#[derive(Debug, Clone, PartialEq)]
pub struct SaveRequest<T> {
    /// Resource being saved
    pub key: SaveKey,
    /// Opaque value handed to the sink
    pub payload: T,
    /// Assigned when the request leaves the debounce gate
    pub submitted_at: Timestamp,
    /// Higher wins over lower while both are pending
    pub priority: i32,
}

impl<T> SaveRequest<T> {
    /// Create a new request
    #[inline]
    #[must_use]
    pub fn new(key: SaveKey, payload: T, submitted_at: Timestamp, priority: i32) -> Self {
        Self {
            key,
            payload,
            submitted_at,
            priority,
        }
    }

    /// Selection order: higher priority first, then newer submission
    #[must_use]
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then(self.submitted_at.cmp(&other.submitted_at))
    }

    /// True if this request was submitted after `ts`
    #[inline]
    #[must_use]
    pub fn is_newer_than(&self, ts: Timestamp) -> bool {
        self.submitted_at > ts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_rejects_blank_names() {
        assert!(matches!(SaveKey::new(""), Err(AutosaveError::EmptyKey)));
        assert!(matches!(SaveKey::new("   "), Err(AutosaveError::EmptyKey)));
        assert_eq!(SaveKey::new("outline").unwrap().as_str(), "outline");
    }

    #[test]
    fn key_parses_and_deserializes_with_validation() {
        let key: SaveKey = "beats-sceneA".parse().unwrap();
        assert_eq!(key.to_string(), "beats-sceneA");

        let ok: Result<SaveKey, _> = serde_json::from_str("\"characters\"");
        assert!(ok.is_ok());
        let bad: Result<SaveKey, _> = serde_json::from_str("\"\"");
        assert!(bad.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn clock_is_strictly_increasing_within_one_millisecond() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        let b = clock.now();
        let c = clock.now();
        assert!(a < b && b < c);
    }

    #[tokio::test(start_paused = true)]
    async fn clock_tracks_virtual_time() {
        let clock = MonotonicClock::new();
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(clock.now(), Timestamp(1200));
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_reading_does_not_issue_timestamps() {
        let clock = MonotonicClock::new();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(clock.elapsed_millis(), 40);
        assert_eq!(clock.elapsed_millis(), 40);
        assert_eq!(clock.now(), Timestamp(40));
    }

    #[test]
    fn duration_millis_truncates_and_saturates() {
        assert_eq!(duration_millis(Duration::from_micros(2_999)), 2);
        assert_eq!(duration_millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn rank_prefers_priority_then_recency() {
        let key = SaveKey::new("outline").unwrap();
        let old_high = SaveRequest::new(key.clone(), "a", Timestamp(1), 5);
        let new_low = SaveRequest::new(key.clone(), "b", Timestamp(9), 0);
        let newer_low = SaveRequest::new(key, "c", Timestamp(10), 0);

        assert_eq!(old_high.rank_cmp(&new_low), Ordering::Greater);
        assert_eq!(newer_low.rank_cmp(&new_low), Ordering::Greater);
        assert!(newer_low.is_newer_than(Timestamp(9)));
        assert!(!new_low.is_newer_than(Timestamp(9)));
    }

    #[test]
    fn submit_options_builder() {
        let opts = SubmitOptions::new()
            .with_delay(Duration::from_millis(250))
            .with_priority(3);
        assert_eq!(opts.delay, Some(Duration::from_millis(250)));
        assert_eq!(opts.priority, 3);
    }
}
