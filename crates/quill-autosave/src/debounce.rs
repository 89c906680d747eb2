//! Debounce gate
//!
//! Holds the latest unsaved payload per key and the handle of the timer that
//! will release it. Every submission replaces the payload, aborts the armed
//! timer and issues a fresh generation; a timer may only release the payload
//! of the generation it was armed for, so a timer that already woke up when
//! it was superseded releases nothing.
//!
//! The gate does no I/O and never fails. Arming the timer task itself is the
//! scheduler's job (see [`crate::Autosave`]).

use crate::request::SaveKey;
use std::collections::HashMap;
use tokio::task::AbortHandle;

/// Latest payload released by the gate
#[derive(Debug, Clone, PartialEq)]
pub struct Released<T> {
    /// Value to enqueue
    pub payload: T,
    /// Priority of the submission that produced it
    pub priority: i32,
}

/// Result of recording a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Armed {
    /// Generation the new timer must present when it fires
    pub generation: u64,
    /// True if an unreleased payload was replaced
    pub collapsed: bool,
}

#[derive(Debug)]
struct Slot<T> {
    payload: T,
    priority: i32,
    generation: u64,
    timer: Option<AbortHandle>,
}

impl<T> Slot<T> {
    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Per-key debounce state
#[derive(Debug)]
pub struct DebounceGate<T> {
    slots: HashMap<SaveKey, Slot<T>>,
    next_generation: u64,
}

impl<T> DebounceGate<T> {
    /// Create an empty gate
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            next_generation: 1,
        }
    }

    /// Record `payload` as the latest value for `key`
    ///
    /// Aborts any timer armed for an earlier submission.
    pub fn submit(&mut self, key: &SaveKey, payload: T, priority: i32) -> Armed {
        let generation = self.next_generation;
        self.next_generation += 1;

        let collapsed = match self.slots.get_mut(key) {
            Some(slot) => {
                slot.disarm();
                slot.payload = payload;
                slot.priority = priority;
                slot.generation = generation;
                true
            }
            None => {
                self.slots.insert(
                    key.clone(),
                    Slot {
                        payload,
                        priority,
                        generation,
                        timer: None,
                    },
                );
                false
            }
        };

        Armed {
            generation,
            collapsed,
        }
    }

    /// Attach the timer armed for `generation`
    ///
    /// Returns false (and aborts `timer`) if that generation is no longer
    /// current.
    pub fn attach_timer(&mut self, key: &SaveKey, generation: u64, timer: AbortHandle) -> bool {
        match self.slots.get_mut(key) {
            Some(slot) if slot.generation == generation => {
                slot.disarm();
                slot.timer = Some(timer);
                true
            }
            _ => {
                timer.abort();
                false
            }
        }
    }

    /// Release the payload for a timer that fired for `generation`
    ///
    /// Returns `None` if a newer submission, a flush or a cancel got there
    /// first.
    pub fn take_fired(&mut self, key: &SaveKey, generation: u64) -> Option<Released<T>> {
        if self.slots.get(key)?.generation != generation {
            return None;
        }
        self.slots.remove(key).map(|slot| Released {
            payload: slot.payload,
            priority: slot.priority,
        })
    }

    /// Cancel the timer and release the latest payload immediately
    pub fn flush_now(&mut self, key: &SaveKey) -> Option<Released<T>> {
        let mut slot = self.slots.remove(key)?;
        slot.disarm();
        Some(Released {
            payload: slot.payload,
            priority: slot.priority,
        })
    }

    /// Cancel the timer and drop the latest payload
    ///
    /// Returns true if something was pending.
    pub fn cancel(&mut self, key: &SaveKey) -> bool {
        match self.slots.remove(key) {
            Some(mut slot) => {
                slot.disarm();
                true
            }
            None => false,
        }
    }

    /// Cancel every key, returning how many payloads were dropped
    pub fn cancel_all(&mut self) -> usize {
        let count = self.slots.len();
        for (_, mut slot) in self.slots.drain() {
            slot.disarm();
        }
        count
    }

    /// True if a payload is waiting for `key`
    #[inline]
    #[must_use]
    pub fn is_pending(&self, key: &SaveKey) -> bool {
        self.slots.contains_key(key)
    }

    /// Keys with a waiting payload
    #[must_use]
    pub fn pending_keys(&self) -> Vec<SaveKey> {
        self.slots.keys().cloned().collect()
    }

    /// Number of keys with a waiting payload
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True if nothing is waiting
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<T> Default for DebounceGate<T> {
    fn default() -> Self {
        Self::new()
    }
}
