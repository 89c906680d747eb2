//! Status registry
//!
//! One `watch` channel per key carries the current [`SaveStatus`]. Readers
//! either take a snapshot or subscribe and are woken on change, so nothing
//! needs to poll.
//!
//! # Invariant
//!
//! `last_outcome` for a key only moves forward in submission time. An
//! outcome for an older request is refused even if it arrives later.

use crate::request::{SaveKey, Timestamp};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::watch;

/// Result of the most recent authoritative execution for a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveOutcome {
    /// Key
    pub key: SaveKey,
    /// Timestamp of the request this outcome reflects
    pub submitted_at: Timestamp,
    /// Whether the sink succeeded
    pub success: bool,
    /// Sink error message on failure
    pub error: Option<String>,
    /// Clock reading when the execution settled
    pub completed_at: Timestamp,
}

impl SaveOutcome {
    /// Successful outcome
    #[must_use]
    pub fn succeeded(key: SaveKey, submitted_at: Timestamp, completed_at: Timestamp) -> Self {
        Self {
            key,
            submitted_at,
            success: true,
            error: None,
            completed_at,
        }
    }

    /// Failed outcome
    #[must_use]
    pub fn failed(
        key: SaveKey,
        submitted_at: Timestamp,
        completed_at: Timestamp,
        error: impl Into<String>,
    ) -> Self {
        Self {
            key,
            submitted_at,
            success: false,
            error: Some(error.into()),
            completed_at,
        }
    }
}

/// Current save state of one key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SaveStatus {
    /// A sink call is outstanding
    pub is_saving: bool,
    /// Requests waiting in the queue
    pub queued_count: usize,
    /// A debounce timer is armed
    pub debounce_pending: bool,
    /// Most recent authoritative outcome
    pub last_outcome: Option<SaveOutcome>,
}

impl SaveStatus {
    /// Nothing executing and nothing queued
    ///
    /// A payload still waiting in the debounce gate does not count; it has
    /// not been scheduled yet.
    #[inline]
    #[must_use]
    pub fn is_idle(&self) -> bool {
        !self.is_saving && self.queued_count == 0
    }

    /// Timestamp of the recorded outcome, if any
    #[inline]
    #[must_use]
    pub fn outcome_timestamp(&self) -> Option<Timestamp> {
        self.last_outcome.as_ref().map(|o| o.submitted_at)
    }
}

/// Activity fields written by the scheduler on every transition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Activity {
    /// A sink call is outstanding
    pub is_saving: bool,
    /// Requests waiting in the queue
    pub queued_count: usize,
    /// A debounce timer is armed
    pub debounce_pending: bool,
}

/// Per-key status channels
#[derive(Debug, Default)]
pub struct StatusRegistry {
    channels: HashMap<SaveKey, watch::Sender<SaveStatus>>,
}

impl StatusRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of `key`'s status; the default for unknown keys
    #[must_use]
    pub fn status(&self, key: &SaveKey) -> SaveStatus {
        self.channels
            .get(key)
            .map(|tx| tx.borrow().clone())
            .unwrap_or_default()
    }

    /// Watch `key`'s status, creating its channel if needed
    pub fn subscribe(&mut self, key: &SaveKey) -> watch::Receiver<SaveStatus> {
        self.channel(key).subscribe()
    }

    /// Write the activity fields for `key`
    pub fn set_activity(&mut self, key: &SaveKey, activity: Activity) {
        self.channel(key).send_if_modified(|status| {
            let changed = status.is_saving != activity.is_saving
                || status.queued_count != activity.queued_count
                || status.debounce_pending != activity.debounce_pending;
            status.is_saving = activity.is_saving;
            status.queued_count = activity.queued_count;
            status.debounce_pending = activity.debounce_pending;
            changed
        });
    }

    /// Record an outcome together with the activity that follows it
    ///
    /// Returns false, leaving the outcome untouched, if the recorded outcome
    /// reflects a newer request. Activity is written either way.
    pub fn record_outcome(&mut self, outcome: SaveOutcome, activity: Activity) -> bool {
        let mut accepted = false;
        self.channel(&outcome.key.clone()).send_modify(|status| {
            status.is_saving = activity.is_saving;
            status.queued_count = activity.queued_count;
            status.debounce_pending = activity.debounce_pending;
            if status
                .outcome_timestamp()
                .map_or(true, |current| outcome.submitted_at >= current)
            {
                status.last_outcome = Some(outcome);
                accepted = true;
            }
        });
        accepted
    }

    /// Forget `key`; its subscribers observe the channel closing
    pub fn remove(&mut self, key: &SaveKey) -> bool {
        self.channels.remove(key).is_some()
    }

    /// True if `key` has a channel
    #[inline]
    #[must_use]
    pub fn contains(&self, key: &SaveKey) -> bool {
        self.channels.contains_key(key)
    }

    fn channel(&mut self, key: &SaveKey) -> &watch::Sender<SaveStatus> {
        self.channels
            .entry(key.clone())
            .or_insert_with(|| watch::channel(SaveStatus::default()).0)
    }
}
