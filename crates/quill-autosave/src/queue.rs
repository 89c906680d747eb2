//! Per-key save queue
//!
//! Each key retains at most one pending request: the best by
//! (priority, then newest timestamp) among everything enqueued since the last
//! dequeue. Anything else is discarded and never executes.

use crate::request::{SaveKey, SaveRequest, Timestamp};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Outcome of an enqueue
#[derive(Debug)]
pub enum Admission<T> {
    /// The new request is now the retained one; the previous one, if any,
    /// was discarded
    Retained {
        /// Request displaced by the new one
        displaced: Option<SaveRequest<T>>,
    },
    /// An already-queued request ranks higher; the new one was discarded
    Rejected {
        /// The discarded new request
        request: SaveRequest<T>,
    },
}

impl<T> Admission<T> {
    /// The request that lost the selection, if any
    #[must_use]
    pub fn discarded(&self) -> Option<&SaveRequest<T>> {
        match self {
            Self::Retained { displaced } => displaced.as_ref(),
            Self::Rejected { request } => Some(request),
        }
    }

    /// True if the enqueued request is the retained one
    #[inline]
    #[must_use]
    pub fn is_retained(&self) -> bool {
        matches!(self, Self::Retained { .. })
    }
}

/// Pending requests for all keys
#[derive(Debug)]
pub struct SaveQueue<T> {
    pending: HashMap<SaveKey, SaveRequest<T>>,
}

impl<T> SaveQueue<T> {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    /// Insert `request` and keep only the best pending request for its key
    pub fn enqueue(&mut self, request: SaveRequest<T>) -> Admission<T> {
        match self.pending.get_mut(&request.key) {
            None => {
                self.pending.insert(request.key.clone(), request);
                Admission::Retained { displaced: None }
            }
            Some(current) => {
                if request.rank_cmp(current) == Ordering::Greater {
                    let displaced = std::mem::replace(current, request);
                    Admission::Retained {
                        displaced: Some(displaced),
                    }
                } else {
                    Admission::Rejected { request }
                }
            }
        }
    }

    /// Remove and return the retained request for `key`
    pub fn dequeue_best(&mut self, key: &SaveKey) -> Option<SaveRequest<T>> {
        self.pending.remove(key)
    }

    /// Drop everything pending for `key`, returning how many were dropped
    pub fn cancel_all(&mut self, key: &SaveKey) -> usize {
        usize::from(self.pending.remove(key).is_some())
    }

    /// Retained request for `key`
    #[inline]
    #[must_use]
    pub fn peek(&self, key: &SaveKey) -> Option<&SaveRequest<T>> {
        self.pending.get(key)
    }

    /// True if a request submitted after `ts` is waiting for `key`
    #[must_use]
    pub fn has_newer_than(&self, key: &SaveKey, ts: Timestamp) -> bool {
        self.pending
            .get(key)
            .is_some_and(|pending| pending.is_newer_than(ts))
    }

    /// Number of pending requests for `key` (zero or one)
    #[inline]
    #[must_use]
    pub fn queued_count(&self, key: &SaveKey) -> usize {
        usize::from(self.pending.contains_key(key))
    }

    /// Keys with a pending request
    #[must_use]
    pub fn keys(&self) -> Vec<SaveKey> {
        self.pending.keys().cloned().collect()
    }

    /// Total pending requests
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True if nothing is pending for any key
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop everything for every key
    pub fn clear(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }
}

impl<T> Default for SaveQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(name: &str) -> SaveKey {
        SaveKey::new(name).unwrap()
    }

    fn req(name: &str, payload: &'static str, ts: u64, priority: i32) -> SaveRequest<&'static str> {
        SaveRequest::new(key(name), payload, Timestamp(ts), priority)
    }

    #[test]
    fn newest_replaces_older_at_equal_priority() {
        let mut queue = SaveQueue::new();
        assert!(queue.enqueue(req("outline", "v1", 10, 0)).is_retained());

        let admission = queue.enqueue(req("outline", "v2", 20, 0));
        assert!(admission.is_retained());
        assert_eq!(admission.discarded().map(|r| r.payload), Some("v1"));

        assert_eq!(queue.queued_count(&key("outline")), 1);
        assert_eq!(queue.dequeue_best(&key("outline")).map(|r| r.payload), Some("v2"));
        assert!(queue.dequeue_best(&key("outline")).is_none());
    }

    #[test]
    fn higher_priority_survives_newer_lower_priority() {
        let mut queue = SaveQueue::new();
        queue.enqueue(req("outline", "forced", 10, 5));

        let admission = queue.enqueue(req("outline", "typed", 20, 0));
        assert!(!admission.is_retained());
        assert_eq!(admission.discarded().map(|r| r.payload), Some("typed"));
        assert_eq!(queue.peek(&key("outline")).map(|r| r.payload), Some("forced"));
    }

    #[test]
    fn older_arrival_never_displaces_newer() {
        let mut queue = SaveQueue::new();
        queue.enqueue(req("outline", "new", 20, 0));
        let admission = queue.enqueue(req("outline", "old", 10, 0));
        assert!(!admission.is_retained());
        assert_eq!(queue.peek(&key("outline")).map(|r| r.payload), Some("new"));
    }

    #[test]
    fn cancel_all_is_scoped_to_key() {
        let mut queue = SaveQueue::new();
        queue.enqueue(req("outline", "o", 1, 0));
        queue.enqueue(req("characters", "c", 2, 0));

        assert_eq!(queue.cancel_all(&key("outline")), 1);
        assert_eq!(queue.cancel_all(&key("outline")), 0);
        assert_eq!(queue.len(), 1);
        assert!(queue.peek(&key("characters")).is_some());
    }

    #[test]
    fn newer_check_compares_timestamps() {
        let mut queue = SaveQueue::new();
        assert!(!queue.has_newer_than(&key("beats"), Timestamp(0)));
        queue.enqueue(req("beats", "b", 500, 0));
        assert!(queue.has_newer_than(&key("beats"), Timestamp(0)));
        assert!(!queue.has_newer_than(&key("beats"), Timestamp(500)));
    }

    proptest! {
        #[test]
        fn prop_retains_best_by_priority_then_time(
            entries in proptest::collection::vec((-3i32..3, 0u64..1000), 1..40)
        ) {
            let mut queue = SaveQueue::new();
            // Distinct timestamps, as the clock guarantees.
            for (i, (priority, ts)) in entries.iter().enumerate() {
                let stamp = ts * 100 + i as u64;
                queue.enqueue(SaveRequest::new(key("k"), stamp, Timestamp(stamp), *priority));
            }

            let best = entries
                .iter()
                .enumerate()
                .map(|(i, (p, ts))| (*p, ts * 100 + i as u64))
                .max()
                .unwrap();

            let retained = queue.dequeue_best(&key("k")).unwrap();
            prop_assert_eq!((retained.priority, retained.submitted_at.0), best);
            prop_assert!(queue.is_empty());
        }
    }
}
