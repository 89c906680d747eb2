//! Quill Autosave - per-key debounced save scheduling
//!
//! Accepts an unbounded stream of "persist this value" submissions (one per
//! keystroke, across many editors) and guarantees that, for every key, the
//! most recent value is the one that ends up stored and reported:
//!
//! - Bursts collapse in the [`DebounceGate`] until a quiet period elapses
//! - The [`SaveQueue`] retains one best pending request per key
//! - The [`Autosave`] scheduler runs at most one save per key at a time and
//!   discards settlements that a newer request has overtaken
//! - The [`StatusRegistry`] publishes per-key status over `watch` channels
//!
//! # Example
//!
//! ```rust,ignore
//! use quill_autosave::{Autosave, AutosaveConfig, SubmitOptions};
//!
//! let autosave = Autosave::new(AutosaveConfig::default(), store);
//!
//! // Every keystroke
//! autosave.submit("outline", text.clone(), SubmitOptions::default())?;
//!
//! // Navigating away
//! autosave.save_now("outline").await?;
//!
//! let status = autosave.status("outline");
//! if let Some(outcome) = status.last_outcome {
//!     println!("saved: {}", outcome.success);
//! }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod config;
pub mod debounce;
pub mod error;
pub mod events;
pub mod queue;
pub mod registry;
pub mod request;
pub mod scheduler;
pub mod sink;

// Re-exports
pub use config::{AutosaveConfig, KeyConfig};
pub use debounce::{Armed, DebounceGate, Released};
pub use error::{AutosaveError, ConfigError, SinkError};
pub use events::{SaveEvent, SchedulerStats};
pub use queue::{Admission, SaveQueue};
pub use registry::{Activity, SaveOutcome, SaveStatus, StatusRegistry};
pub use request::{MonotonicClock, SaveKey, SaveRequest, SubmitOptions, Timestamp};
pub use scheduler::Autosave;
pub use sink::{sink_fn, FnSink, PersistenceSink};

/// Common imports
pub mod prelude {
    //! Common imports for producers and sink implementors
    pub use crate::{
        Autosave, AutosaveConfig, AutosaveError, PersistenceSink, SaveKey, SaveOutcome,
        SaveStatus, SinkError, SubmitOptions,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
