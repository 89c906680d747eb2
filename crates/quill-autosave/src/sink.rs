//! Persistence sink boundary
//!
//! The scheduler never stores anything itself. It hands each authoritative
//! payload to a [`PersistenceSink`] and only reconciles the result.

use crate::error::SinkError;
use crate::request::SaveKey;
use std::future::Future;
use std::sync::Arc;

/// Durable storage for payloads of type `T`
///
/// The scheduler guarantees at most one outstanding call per key, but a sink
/// is called for many keys concurrently and must not assume global
/// exclusivity. Failures must be reported through `Err`, never a success
/// carrying an error flag.
#[async_trait::async_trait]
pub trait PersistenceSink<T: Send + 'static>: Send + Sync {
    /// Persist `payload` as the current value of `key`
    async fn persist(&self, key: &SaveKey, payload: T) -> Result<(), SinkError>;
}

#[async_trait::async_trait]
impl<T, S> PersistenceSink<T> for Arc<S>
where
    T: Send + 'static,
    S: PersistenceSink<T> + ?Sized,
{
    async fn persist(&self, key: &SaveKey, payload: T) -> Result<(), SinkError> {
        (**self).persist(key, payload).await
    }
}

/// Sink backed by an async closure
///
/// Created with [`sink_fn`].
#[derive(Clone)]
pub struct FnSink<F> {
    f: F,
}

impl<F> std::fmt::Debug for FnSink<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnSink").finish_non_exhaustive()
    }
}

/// Wrap an async closure as a [`PersistenceSink`]
///
/// ```rust,ignore
/// let sink = sink_fn(|key: SaveKey, text: String| async move {
///     storage.write(key.as_str(), &text).await.map_err(SinkError::from)
/// });
/// ```
#[must_use]
pub fn sink_fn<T, F, Fut>(f: F) -> FnSink<F>
where
    T: Send + 'static,
    F: Fn(SaveKey, T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), SinkError>> + Send,
{
    FnSink { f }
}

#[async_trait::async_trait]
impl<T, F, Fut> PersistenceSink<T> for FnSink<F>
where
    T: Send + 'static,
    F: Fn(SaveKey, T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), SinkError>> + Send,
{
    async fn persist(&self, key: &SaveKey, payload: T) -> Result<(), SinkError> {
        (self.f)(key.clone(), payload).await
    }
}
