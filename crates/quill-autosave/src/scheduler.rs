//! Autosave scheduler
//!
//! Wires the debounce gate, the per-key queue and the status registry
//! together and drives execution against the persistence sink.
//!
//! # Execution model
//!
//! All bookkeeping lives behind one mutex that is never held across an
//! `.await`; the only suspension point is the sink call. Each key has at most
//! one driver task. A driver pops the best pending request, persists it, then
//! reconciles:
//!
//! - if a newer request was enqueued meanwhile, the settlement is **stale**
//!   and its result is dropped;
//! - otherwise its outcome becomes the key's `last_outcome`.
//!
//! It then loops until the queue for its key is empty. Keys never wait on
//! each other.

use crate::config::AutosaveConfig;
use crate::debounce::{DebounceGate, Released};
use crate::error::{AutosaveError, SinkError};
use crate::events::{Counter, Counters, SaveEvent, SchedulerStats};
use crate::queue::{Admission, SaveQueue};
use crate::registry::{Activity, SaveOutcome, SaveStatus, StatusRegistry};
use crate::request::{
    duration_millis, MonotonicClock, SaveKey, SaveRequest, SubmitOptions, Timestamp,
};
use crate::sink::PersistenceSink;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Handle to an autosave scheduler
///
/// Cheap to clone; all clones share the same state. Every method that arms a
/// timer or starts a save spawns onto the current Tokio runtime.
pub struct Autosave<T: Send + 'static> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Clone for Autosave<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> std::fmt::Debug for Autosave<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Autosave")
            .field("config", &self.shared.config)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

struct Shared<T: Send + 'static> {
    config: AutosaveConfig,
    clock: MonotonicClock,
    default_sink: Arc<dyn PersistenceSink<T>>,
    sinks: DashMap<SaveKey, Arc<dyn PersistenceSink<T>>>,
    state: Mutex<State<T>>,
    events: broadcast::Sender<SaveEvent>,
    counters: Counters,
    closed: AtomicBool,
}

/// Driver bookkeeping for one key; present while a drain task runs
///
/// `detached` marks an execution that started before the key was removed.
/// Its settlement is dropped, and it is invisible to the key's new status.
#[derive(Debug, Default)]
struct Driver {
    executing: Option<Timestamp>,
    detached: bool,
}

impl Driver {
    fn attached_execution(&self) -> Option<Timestamp> {
        self.executing.filter(|_| !self.detached)
    }
}

struct State<T> {
    gate: DebounceGate<T>,
    queue: SaveQueue<T>,
    drivers: HashMap<SaveKey, Driver>,
    registry: StatusRegistry,
}

impl<T> State<T> {
    fn activity(&self, key: &SaveKey) -> Activity {
        Activity {
            is_saving: self
                .drivers
                .get(key)
                .is_some_and(|driver| driver.attached_execution().is_some()),
            queued_count: self.queue.queued_count(key),
            debounce_pending: self.gate.is_pending(key),
        }
    }

    /// Publish activity, creating the key's channel on first use
    fn publish(&mut self, key: &SaveKey) {
        let activity = self.activity(key);
        self.registry.set_activity(key, activity);
    }

    /// Publish activity only if the key was not torn down
    fn publish_existing(&mut self, key: &SaveKey) {
        if self.registry.contains(key) {
            self.publish(key);
        }
    }

    /// Newest request known to be queued or executing for `key`
    fn newest_scheduled(&self, key: &SaveKey) -> Option<Timestamp> {
        let executing = self.drivers.get(key).and_then(Driver::attached_execution);
        let queued = self.queue.peek(key).map(|request| request.submitted_at);
        executing.max(queued)
    }
}

impl<T: Send + 'static> Autosave<T> {
    /// Create a scheduler persisting through `sink`
    ///
    /// A zero event capacity is raised to one.
    pub fn new(config: AutosaveConfig, sink: impl PersistenceSink<T> + 'static) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                config,
                clock: MonotonicClock::new(),
                default_sink: Arc::new(sink),
                sinks: DashMap::new(),
                state: Mutex::new(State {
                    gate: DebounceGate::new(),
                    queue: SaveQueue::new(),
                    drivers: HashMap::new(),
                    registry: StatusRegistry::new(),
                }),
                events,
                counters: Counters::default(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Create with validated configuration
    ///
    /// # Errors
    /// - `AutosaveError::Config` if `config` fails validation
    pub fn try_new(
        config: AutosaveConfig,
        sink: impl PersistenceSink<T> + 'static,
    ) -> Result<Self, AutosaveError> {
        config.validate()?;
        Ok(Self::new(config, sink))
    }

    /// Create with default configuration
    pub fn with_sink(sink: impl PersistenceSink<T> + 'static) -> Self {
        Self::new(AutosaveConfig::default(), sink)
    }

    /// Route saves for `key` to `sink` instead of the default sink
    ///
    /// Applies to executions that start after the call.
    ///
    /// # Errors
    /// - `AutosaveError::EmptyKey` for a blank key
    pub fn register_sink(
        &self,
        key: &str,
        sink: impl PersistenceSink<T> + 'static,
    ) -> Result<(), AutosaveError> {
        let key = SaveKey::new(key)?;
        self.shared.sinks.insert(key, Arc::new(sink));
        Ok(())
    }

    /// Revert `key` to the default sink
    ///
    /// # Errors
    /// - `AutosaveError::EmptyKey` for a blank key
    pub fn unregister_sink(&self, key: &str) -> Result<bool, AutosaveError> {
        let key = SaveKey::new(key)?;
        Ok(self.shared.sinks.remove(&key).is_some())
    }

    /// Submit `payload` as the latest value for `key`
    ///
    /// Restarts the key's debounce timer. When the timer fires without a
    /// further submission, the payload is enqueued and saved.
    ///
    /// # Errors
    /// - `AutosaveError::EmptyKey` for a blank key
    /// - `AutosaveError::ShutDown` after [`Autosave::shutdown`]
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn submit(&self, key: &str, payload: T, options: SubmitOptions) -> Result<(), AutosaveError> {
        let key = SaveKey::new(key)?;
        let delay = options
            .delay
            .unwrap_or_else(|| self.shared.config.delay_for(key.as_str()));

        let mut state = self.shared.state.lock();
        // Checked under the lock so a racing shutdown cannot leave a timer armed.
        if self.is_shut_down() {
            return Err(AutosaveError::ShutDown);
        }
        self.shared.counters.bump(Counter::Submission);
        let armed = state.gate.submit(&key, payload, options.priority);
        if armed.collapsed {
            self.shared.counters.bump(Counter::DebounceCollapse);
        }

        let shared = Arc::clone(&self.shared);
        let timer_key = key.clone();
        let generation = armed.generation;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.fire(&timer_key, generation);
        });
        state
            .gate
            .attach_timer(&key, generation, timer.abort_handle());
        state.publish(&key);

        let delay_ms = duration_millis(delay);
        tracing::trace!(key = %key, delay_ms, collapsed = armed.collapsed, "debounce armed");
        self.shared.emit(SaveEvent::Scheduled { key, delay_ms });
        Ok(())
    }

    /// Submit with default options
    ///
    /// # Errors
    /// See [`Autosave::submit`].
    pub fn submit_default(&self, key: &str, payload: T) -> Result<(), AutosaveError> {
        self.submit(key, payload, SubmitOptions::default())
    }

    /// Skip the debounce wait for `key` and await the resulting save
    ///
    /// Resolves once an outcome at least as new as the flushed request is
    /// recorded. If nothing is pending, queued or executing, resolves
    /// immediately.
    ///
    /// # Errors
    /// - `AutosaveError::EmptyKey` for a blank key
    /// - `AutosaveError::Persist` if the authoritative save failed
    /// - `AutosaveError::Discarded` if the request lost to a higher-priority
    ///   one or was cancelled
    /// - `AutosaveError::KeyRemoved` if the key was torn down meanwhile
    pub async fn save_now(&self, key: &str) -> Result<(), AutosaveError> {
        let key = SaveKey::new(key)?;
        self.shared.save_key_now(key).await
    }

    /// Force-save every key with pending or in-progress work
    ///
    /// Waits for all of them and reports the first failure.
    ///
    /// # Errors
    /// First error returned by the per-key saves.
    pub async fn save_all(&self) -> Result<(), AutosaveError> {
        let keys: BTreeSet<SaveKey> = {
            let state = self.shared.state.lock();
            state
                .gate
                .pending_keys()
                .into_iter()
                .chain(state.queue.keys())
                .chain(state.drivers.keys().cloned())
                .collect()
        };
        tracing::debug!(keys = keys.len(), "saving all pending keys");

        let results = futures::future::join_all(
            keys.into_iter().map(|key| self.shared.save_key_now(key)),
        )
        .await;
        results.into_iter().collect()
    }

    /// Drop anything not yet executing for `key`
    ///
    /// An execution already in flight is left to finish.
    ///
    /// # Errors
    /// - `AutosaveError::EmptyKey` for a blank key
    pub fn cancel_pending(&self, key: &str) -> Result<(), AutosaveError> {
        let key = SaveKey::new(key)?;
        let mut state = self.shared.state.lock();
        let had_payload = state.gate.cancel(&key);
        let dropped = state.queue.cancel_all(&key);
        state.publish_existing(&key);

        if had_payload || dropped > 0 {
            self.shared.counters.bump(Counter::Cancellation);
            tracing::debug!(key = %key, dropped, "pending save cancelled");
            self.shared.emit(SaveEvent::Cancelled { key, dropped });
        }
        Ok(())
    }

    /// Snapshot of `key`'s save status
    ///
    /// Unknown or blank keys report an idle default.
    #[must_use]
    pub fn status(&self, key: &str) -> SaveStatus {
        SaveKey::new(key)
            .map(|key| self.shared.state.lock().registry.status(&key))
            .unwrap_or_default()
    }

    /// Watch `key`'s status
    ///
    /// # Errors
    /// - `AutosaveError::EmptyKey` for a blank key
    pub fn subscribe(&self, key: &str) -> Result<watch::Receiver<SaveStatus>, AutosaveError> {
        let key = SaveKey::new(key)?;
        Ok(self.shared.state.lock().registry.subscribe(&key))
    }

    /// Lifecycle events for all keys
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<SaveEvent> {
        self.shared.events.subscribe()
    }

    /// Tear down all bookkeeping for `key`
    ///
    /// Cancels pending work, closes its status channel and forgets its sink.
    /// An in-flight execution finishes but its outcome is not recorded, even
    /// if the key is submitted to again before it settles.
    /// Returns false if the key was unknown.
    ///
    /// # Errors
    /// - `AutosaveError::EmptyKey` for a blank key
    pub fn remove_key(&self, key: &str) -> Result<bool, AutosaveError> {
        let key = SaveKey::new(key)?;
        let known = {
            let mut state = self.shared.state.lock();
            let had_payload = state.gate.cancel(&key);
            let dropped = state.queue.cancel_all(&key);
            let had_channel = state.registry.remove(&key);
            if let Some(driver) = state.drivers.get_mut(&key) {
                driver.detached = true;
            }
            had_payload || dropped > 0 || had_channel
        };
        let had_sink = self.shared.sinks.remove(&key).is_some();
        tracing::debug!(key = %key, "key removed");
        Ok(known || had_sink)
    }

    /// Stop accepting submissions and drop everything not yet executing
    ///
    /// Executions already in flight run to completion. Call
    /// [`Autosave::save_all`] first for a graceful stop.
    pub fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.shared.state.lock();
        let mut touched: BTreeSet<SaveKey> = state.gate.pending_keys().into_iter().collect();
        touched.extend(state.queue.keys());

        let payloads = state.gate.cancel_all();
        let requests = state.queue.clear();
        for key in &touched {
            state.publish_existing(key);
        }
        tracing::info!(payloads, requests, "autosave shut down");
    }

    /// True after [`Autosave::shutdown`]
    #[inline]
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Keys whose payload is still waiting out its debounce delay
    #[must_use]
    pub fn pending_keys(&self) -> Vec<SaveKey> {
        let mut keys = self.shared.state.lock().gate.pending_keys();
        keys.sort();
        keys
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.shared.counters.snapshot()
    }

    /// Configuration in effect
    #[inline]
    #[must_use]
    pub fn config(&self) -> &AutosaveConfig {
        &self.shared.config
    }
}

impl<T: Send + 'static> Shared<T> {
    fn emit(&self, event: SaveEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn sink_for(&self, key: &SaveKey) -> Arc<dyn PersistenceSink<T>> {
        self.sinks
            .get(key)
            .map_or_else(|| Arc::clone(&self.default_sink), |entry| Arc::clone(entry.value()))
    }

    /// Debounce timer for `generation` elapsed
    fn fire(self: &Arc<Self>, key: &SaveKey, generation: u64) {
        let mut state = self.state.lock();
        if let Some(released) = state.gate.take_fired(key, generation) {
            self.enqueue_locked(&mut state, key, released);
        }
    }

    /// Turn a released payload into a request, enqueue it and make sure a
    /// driver is running. Returns the request's timestamp.
    fn enqueue_locked(
        self: &Arc<Self>,
        state: &mut State<T>,
        key: &SaveKey,
        released: Released<T>,
    ) -> Timestamp {
        let submitted_at = self.clock.now();
        let priority = released.priority;
        let request = SaveRequest::new(key.clone(), released.payload, submitted_at, priority);

        self.counters.bump(Counter::Enqueued);
        self.emit(SaveEvent::Enqueued {
            key: key.clone(),
            submitted_at,
            priority,
        });

        match state.queue.enqueue(request) {
            Admission::Retained { displaced: None } => {}
            Admission::Retained {
                displaced: Some(old),
            }
            | Admission::Rejected { request: old } => {
                self.counters.bump(Counter::Superseded);
                tracing::debug!(key = %key, superseded = %old.submitted_at, "pending save superseded");
                self.emit(SaveEvent::Superseded {
                    key: key.clone(),
                    submitted_at: old.submitted_at,
                });
            }
        }

        self.kick_locked(state, key);
        state.publish(key);
        submitted_at
    }

    /// Spawn a driver for `key` unless one is already draining it
    fn kick_locked(self: &Arc<Self>, state: &mut State<T>, key: &SaveKey) {
        if state.drivers.contains_key(key) || state.queue.peek(key).is_none() {
            return;
        }
        state.drivers.insert(key.clone(), Driver::default());
        let shared = Arc::clone(self);
        let key = key.clone();
        tokio::spawn(async move { shared.drive(key).await });
    }

    /// Drain `key`'s queue one request at a time
    async fn drive(self: Arc<Self>, key: SaveKey) {
        let gap = self.config.drain_gap();
        loop {
            let (request, sink) = {
                let mut state = self.state.lock();
                let Some(request) = state.queue.dequeue_best(&key) else {
                    state.drivers.remove(&key);
                    state.publish_existing(&key);
                    return;
                };
                if let Some(driver) = state.drivers.get_mut(&key) {
                    driver.executing = Some(request.submitted_at);
                    driver.detached = false;
                }
                state.publish_existing(&key);
                self.emit(SaveEvent::Started {
                    key: key.clone(),
                    submitted_at: request.submitted_at,
                });
                (request, self.sink_for(&key))
            };

            self.counters.bump(Counter::Execution);
            let executing = request.submitted_at;
            tracing::debug!(key = %key, submitted_at = %executing, "persisting");
            let result = self.persist(sink.as_ref(), &key, request.payload).await;

            let more_waiting = self.reconcile(&key, executing, result);
            if more_waiting && !gap.is_zero() {
                tokio::time::sleep(gap).await;
            }
        }
    }

    /// Call the sink, applying the watchdog and containing panics
    async fn persist(
        &self,
        sink: &dyn PersistenceSink<T>,
        key: &SaveKey,
        payload: T,
    ) -> Result<(), SinkError> {
        let call = AssertUnwindSafe(sink.persist(key, payload)).catch_unwind();
        let settled = match self.config.persist_timeout() {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(settled) => settled,
                Err(_) => {
                    return Err(SinkError::TimedOut {
                        after_ms: duration_millis(limit),
                    })
                }
            },
            None => call.await,
        };
        settled.unwrap_or_else(|_| Err(SinkError::Other("sink panicked".to_string())))
    }

    /// Apply a settlement; returns true if another request is waiting
    fn reconcile(&self, key: &SaveKey, executing: Timestamp, result: Result<(), SinkError>) -> bool {
        let completed_at = Timestamp(self.clock.elapsed_millis());
        let success = result.is_ok();
        if !success {
            self.counters.bump(Counter::Failure);
        }

        let mut state = self.state.lock();
        let detached = state.drivers.get_mut(key).is_some_and(|driver| {
            driver.executing = None;
            std::mem::take(&mut driver.detached)
        });

        if detached {
            tracing::debug!(key = %key, submitted_at = %executing, success, "settled after removal; outcome dropped");
        } else if state.queue.has_newer_than(key, executing) {
            self.counters.bump(Counter::Stale);
            tracing::debug!(key = %key, submitted_at = %executing, success, "stale settlement discarded");
            state.publish_existing(key);
            self.emit(SaveEvent::Stale {
                key: key.clone(),
                submitted_at: executing,
                success,
            });
        } else {
            let outcome = match result {
                Ok(()) => SaveOutcome::succeeded(key.clone(), executing, completed_at),
                Err(err) => {
                    tracing::warn!(key = %key, submitted_at = %executing, error = %err, "save failed");
                    SaveOutcome::failed(key.clone(), executing, completed_at, err.to_string())
                }
            };
            let activity = state.activity(key);
            if state.registry.record_outcome(outcome, activity) {
                self.emit(SaveEvent::Completed {
                    key: key.clone(),
                    submitted_at: executing,
                    success,
                });
            } else {
                self.counters.bump(Counter::Stale);
                self.emit(SaveEvent::Stale {
                    key: key.clone(),
                    submitted_at: executing,
                    success,
                });
            }
        }

        state.queue.peek(key).is_some()
    }

    async fn save_key_now(self: &Arc<Self>, key: SaveKey) -> Result<(), AutosaveError> {
        let (target, mut rx) = {
            let mut state = self.state.lock();
            let target = match state.gate.flush_now(&key) {
                Some(released) => Some(self.enqueue_locked(&mut state, &key, released)),
                None => state.newest_scheduled(&key),
            };
            let Some(target) = target else {
                return Ok(());
            };
            (target, state.registry.subscribe(&key))
        };
        tracing::debug!(key = %key, target = %target, "awaiting forced save");

        let settled = rx
            .wait_for(|status| {
                status.outcome_timestamp().is_some_and(|ts| ts >= target) || status.is_idle()
            })
            .await
            .map_err(|_| AutosaveError::KeyRemoved { key: key.clone() })?
            .clone();

        match settled.last_outcome {
            Some(outcome) if outcome.submitted_at >= target => {
                if outcome.success {
                    Ok(())
                } else {
                    Err(AutosaveError::Persist {
                        key,
                        message: outcome.error.unwrap_or_default(),
                    })
                }
            }
            _ => Err(AutosaveError::Discarded { key }),
        }
    }
}
