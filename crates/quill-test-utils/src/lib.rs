//! Testing utilities for the Quill workspace
//!
//! Shared sinks and helpers for exercising the autosave scheduler.

#![allow(missing_docs)]

use parking_lot::Mutex;
use quill_autosave::{AutosaveConfig, PersistenceSink, SaveEvent, SaveKey, SinkError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// How a scripted sink call behaves
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Step {
    pub latency: Duration,
    pub failure: Option<String>,
}

impl Step {
    pub fn ok_after(latency: Duration) -> Self {
        Self {
            latency,
            failure: None,
        }
    }

    pub fn fail_after(latency: Duration, message: &str) -> Self {
        Self {
            latency,
            failure: Some(message.to_string()),
        }
    }
}

/// One sink invocation as observed by [`ScriptedSink`]
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord<T> {
    pub key: String,
    pub payload: T,
    /// Milliseconds since the sink was created
    pub started_ms: u64,
    pub finished_ms: Option<u64>,
    pub succeeded: Option<bool>,
}

type Behavior<T> = dyn Fn(&SaveKey, &T) -> Step + Send + Sync;

struct Inner<T> {
    origin: Instant,
    behavior: Box<Behavior<T>>,
    calls: Mutex<Vec<CallRecord<T>>>,
    in_flight: Mutex<HashMap<String, usize>>,
    max_per_key: Mutex<HashMap<String, usize>>,
}

/// Recording sink with scripted latency and failures
///
/// Clones share their recordings.
pub struct ScriptedSink<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ScriptedSink<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> ScriptedSink<T> {
    /// Succeeds immediately for every call
    pub fn new() -> Self {
        Self::with_behavior(|_, _| Step::default())
    }

    /// Succeeds after a fixed latency
    pub fn with_latency(latency: Duration) -> Self {
        Self::with_behavior(move |_, _| Step::ok_after(latency))
    }

    /// Behaviour chosen per call from key and payload
    pub fn with_behavior(behavior: impl Fn(&SaveKey, &T) -> Step + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                origin: Instant::now(),
                behavior: Box::new(behavior),
                calls: Mutex::new(Vec::new()),
                in_flight: Mutex::new(HashMap::new()),
                max_per_key: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn calls(&self) -> Vec<CallRecord<T>> {
        self.inner.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.inner.calls.lock().len()
    }

    pub fn payloads_for(&self, key: &str) -> Vec<T> {
        self.inner
            .calls
            .lock()
            .iter()
            .filter(|call| call.key == key)
            .map(|call| call.payload.clone())
            .collect()
    }

    /// Highest number of simultaneous calls seen for `key`
    pub fn max_concurrent_for(&self, key: &str) -> usize {
        self.inner.max_per_key.lock().get(key).copied().unwrap_or(0)
    }

    /// Highest number of simultaneous calls seen for any single key
    pub fn max_concurrent_any_key(&self) -> usize {
        self.inner.max_per_key.lock().values().copied().max().unwrap_or(0)
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.inner.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

impl<T: Clone + Send + Sync + 'static> Default for ScriptedSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl<T: Clone + Send + Sync + 'static> PersistenceSink<T> for ScriptedSink<T> {
    async fn persist(&self, key: &SaveKey, payload: T) -> Result<(), SinkError> {
        let step = (self.inner.behavior)(key, &payload);
        let name = key.to_string();

        let index = {
            let mut calls = self.inner.calls.lock();
            calls.push(CallRecord {
                key: name.clone(),
                payload,
                started_ms: self.elapsed_ms(),
                finished_ms: None,
                succeeded: None,
            });
            calls.len() - 1
        };
        {
            let mut in_flight = self.inner.in_flight.lock();
            let current = in_flight.entry(name.clone()).or_insert(0);
            *current += 1;
            let mut max = self.inner.max_per_key.lock();
            let seen = max.entry(name.clone()).or_insert(0);
            *seen = (*seen).max(*current);
        }

        if !step.latency.is_zero() {
            tokio::time::sleep(step.latency).await;
        }

        if let Some(current) = self.inner.in_flight.lock().get_mut(&name) {
            *current -= 1;
        }
        let succeeded = step.failure.is_none();
        if let Some(call) = self.inner.calls.lock().get_mut(index) {
            call.finished_ms = Some(self.elapsed_ms());
            call.succeeded = Some(succeeded);
        }

        match step.failure {
            Some(message) => Err(SinkError::Unavailable(message)),
            None => Ok(()),
        }
    }
}

/// Config with the documented debounce delay and no drain gap
pub fn test_config() -> AutosaveConfig {
    AutosaveConfig::new().with_drain_gap(Duration::ZERO)
}

/// Drain every event currently buffered in `rx`
pub fn drain_events(rx: &mut broadcast::Receiver<SaveEvent>) -> Vec<SaveEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Advance paused time by `ms` and let spawned tasks run
pub async fn advance_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

pub fn key(name: &str) -> SaveKey {
    SaveKey::new(name).unwrap()
}
