//! Lifecycle events and counters
//!
//! Events are broadcast to any number of observers. A slow observer only
//! loses its own backlog; scheduling never waits on it.

use crate::request::{SaveKey, Timestamp};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Something that happened to a save request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SaveEvent {
    /// Debounce timer armed (or re-armed) for a key
    Scheduled {
        /// Key
        key: SaveKey,
        /// Quiet period in milliseconds
        delay_ms: u64,
    },
    /// A request left the gate and entered the queue
    Enqueued {
        /// Key
        key: SaveKey,
        /// Assigned timestamp
        submitted_at: Timestamp,
        /// Request priority
        priority: i32,
    },
    /// A pending request was discarded in favour of a better one
    Superseded {
        /// Key
        key: SaveKey,
        /// Timestamp of the discarded request
        submitted_at: Timestamp,
    },
    /// The sink was invoked
    Started {
        /// Key
        key: SaveKey,
        /// Timestamp of the executing request
        submitted_at: Timestamp,
    },
    /// An execution settled and its outcome was recorded
    Completed {
        /// Key
        key: SaveKey,
        /// Timestamp of the executed request
        submitted_at: Timestamp,
        /// Whether the sink succeeded
        success: bool,
    },
    /// An execution settled after a newer request arrived; result discarded
    Stale {
        /// Key
        key: SaveKey,
        /// Timestamp of the stale request
        submitted_at: Timestamp,
        /// Whether the discarded execution had succeeded
        success: bool,
    },
    /// Pending work for a key was dropped by the caller
    Cancelled {
        /// Key
        key: SaveKey,
        /// Number of queued requests dropped (debounced payload excluded)
        dropped: usize,
    },
}

impl SaveEvent {
    /// Key the event refers to
    #[must_use]
    pub fn key(&self) -> &SaveKey {
        match self {
            Self::Scheduled { key, .. }
            | Self::Enqueued { key, .. }
            | Self::Superseded { key, .. }
            | Self::Started { key, .. }
            | Self::Completed { key, .. }
            | Self::Stale { key, .. }
            | Self::Cancelled { key, .. } => key,
        }
    }
}

/// Counter snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Calls to `submit`
    pub submissions: u64,
    /// Submissions that replaced a payload still waiting in the gate
    pub debounce_collapses: u64,
    /// Requests that entered a queue
    pub enqueued: u64,
    /// Queued requests discarded without executing
    pub superseded: u64,
    /// Sink invocations
    pub executions: u64,
    /// Executions whose result was discarded as stale
    pub stale: u64,
    /// Executions that failed (stale failures included)
    pub failures: u64,
    /// Explicit cancellations
    pub cancellations: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    submissions: AtomicU64,
    debounce_collapses: AtomicU64,
    enqueued: AtomicU64,
    superseded: AtomicU64,
    executions: AtomicU64,
    stale: AtomicU64,
    failures: AtomicU64,
    cancellations: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Counter {
    Submission,
    DebounceCollapse,
    Enqueued,
    Superseded,
    Execution,
    Stale,
    Failure,
    Cancellation,
}

impl Counters {
    pub(crate) fn bump(&self, counter: Counter) {
        let cell = match counter {
            Counter::Submission => &self.submissions,
            Counter::DebounceCollapse => &self.debounce_collapses,
            Counter::Enqueued => &self.enqueued,
            Counter::Superseded => &self.superseded,
            Counter::Execution => &self.executions,
            Counter::Stale => &self.stale,
            Counter::Failure => &self.failures,
            Counter::Cancellation => &self.cancellations,
        };
        cell.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            submissions: self.submissions.load(Ordering::Relaxed),
            debounce_collapses: self.debounce_collapses.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            executions: self.executions.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
        }
    }
}
