//! Update-time index for automat.
//!
//! This crate provides a trait-based index of asset partition updates, with an
//! in-memory implementation and a JSON file implementation. The scheduler
//! reads the index through immutable [`IndexSnapshot`]s.

#![warn(missing_docs)]

pub mod trait_;
pub mod snapshot;
mod state;
pub mod memory;
pub mod json_storage;

pub use trait_::{UpdateIndex, StorageError, Result};
pub use snapshot::IndexSnapshot;
pub use state::{HISTORY_LIMIT, TICK_LIMIT};
pub use memory::MemoryIndex;
pub use json_storage::JsonIndex;
