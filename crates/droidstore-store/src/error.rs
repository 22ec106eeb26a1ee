//! Storage errors.

use thiserror::Error;

use droidstore_core::{CoreError, RunId, TaskId};

/// Errors surfaced by a [`crate::Store`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No run with this id.
    #[error("run <{0}> is not found")]
    RunNotFound(RunId),

    /// No task with this id.
    #[error("task <{0}> is not found")]
    TaskNotFound(TaskId),

    /// A concurrent transaction holds the candidate row. Transient; the
    /// caller retries with backoff.
    #[error("failed to update a task due to a row lock; please retry")]
    Contention,

    /// A patch application failed its domain rules.
    #[error(transparent)]
    Domain(#[from] CoreError),

    /// The backend itself failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
