//! Execution errors.

use automat_core::DefinitionError;
use automat_storage::StorageError;
use thiserror::Error;

/// Errors raised while running a tick.
#[derive(Debug, Error)]
pub enum TickError {
    /// Index read or write failed; the next tick stays scheduled
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Invariant violated; the binding is disabled
    #[error("fatal: {0}")]
    Fatal(String),
}

impl TickError {
    /// Whether the binding must stop ticking.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TickError::Fatal(_))
    }
}

/// Errors raised while loading a definitions document.
#[derive(Debug, Error)]
pub enum LoadError {
    /// File could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Document is not valid JSON for the definitions schema
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Definitions are inconsistent
    #[error("invalid definitions: {0}")]
    Definition(#[from] DefinitionError),
}
