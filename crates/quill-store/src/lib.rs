//! Quill Store - persistence sinks for the autosave scheduler
//!
//! - [`MemoryStore`]: in-process map, used by the simulator and tests
//! - [`JsonFileStore`]: one JSON document per key, written atomically
//!
//! Both implement [`quill_autosave::PersistenceSink`] and can be handed
//! straight to [`quill_autosave::Autosave::new`].

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod error;
pub mod json_file;
pub mod memory;

pub use error::StoreError;
pub use json_file::JsonFileStore;
pub use memory::MemoryStore;
