//! Coordinator errors.

use thiserror::Error;

use waypoint_core::CoreError;

/// Document store errors.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// A unique index rejected the write; another writer got there first.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// The record to update does not exist.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// The store could not be reached or failed the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Wait/notify delivery failure.
#[derive(Debug, Error)]
#[error("Notify failed for '{key}': {reason}")]
pub struct NotifyError {
    pub key: String,
    pub reason: String,
}

/// Delegate assignment errors.
#[derive(Debug, Error)]
pub enum AssignError {
    /// A delegate carries a scope rule that constrains nothing.
    #[error(transparent)]
    InvalidScope(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Barrier engine errors.
#[derive(Debug, Error)]
pub enum BarrierError {
    /// The same barrier identifier occurs twice within one concurrent track.
    #[error("Barrier '{name}': barriers not running concurrently")]
    NotRunningConcurrently { name: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}
