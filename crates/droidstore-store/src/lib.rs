//! Droidstore persistence.
//!
//! The [`Store`] trait is the only seam between the HTTP surface and
//! durable state. Two implementations exist: [`PgStore`] (PostgreSQL, the
//! production backend, whose row locks back the checkout algorithm) and
//! [`MemoryStore`] (a mutex-guarded map used by tests and for local
//! development).
//!
//! All cross-droid coordination is mediated by the backend's transaction
//! isolation; nothing in this crate holds a lock across a caller's
//! think-time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use droidstore_core::{NewRun, Run, RunId, RunPatch, RunStatus, Task, TaskDraft, TaskId, TaskPatch};

pub mod error;
pub mod memory;
pub mod postgres;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Outcome of a checkout call. Exhaustion is a valid terminal outcome for
/// a polling droid, distinct from every error.
#[derive(Debug, Clone, PartialEq)]
pub enum Checkout {
    /// One task moved from `initialized` to `scheduled` for this caller.
    Claimed(Task),
    /// No eligible task remains under the run.
    Exhausted,
}

/// Filters for listing runs. All fields combine with AND; results are
/// ordered by creation time, newest first.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    /// Exact owner match.
    pub owner: Option<String>,
    /// Substring match against the stored `details` text.
    pub product: Option<String>,
    /// Created at or before this instant.
    pub before: Option<DateTime<Utc>>,
    /// Created at or after this instant.
    pub after: Option<DateTime<Utc>>,
    /// Rows to skip from the top.
    pub skip: Option<i64>,
    /// Maximum rows to return.
    pub last: Option<i64>,
}

/// Durable storage for runs and their tasks.
#[async_trait]
pub trait Store: Send + Sync {
    /// Persist a new run and assign its id.
    async fn create_run(&self, new_run: NewRun) -> Result<Run, StoreError>;

    /// Fetch one run.
    async fn get_run(&self, id: RunId) -> Result<Run, StoreError>;

    /// List runs, newest first, honoring the filter.
    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>, StoreError>;

    /// Apply a validated patch to a run.
    async fn update_run(&self, id: RunId, patch: RunPatch) -> Result<Run, StoreError>;

    /// Force a run's status, bypassing the forward-only rule. Reserved
    /// for dedicated lifecycle operations (restart).
    async fn set_run_status(&self, id: RunId, status: RunStatus) -> Result<Run, StoreError>;

    /// Delete a run and every task it owns. Returns false when the run
    /// did not exist.
    async fn delete_run(&self, id: RunId) -> Result<bool, StoreError>;

    /// Persist one new task under a run.
    async fn create_task(&self, run_id: RunId, draft: TaskDraft) -> Result<Task, StoreError>;

    /// Persist a batch of tasks under a run. Returns how many were added.
    async fn create_tasks(&self, run_id: RunId, drafts: Vec<TaskDraft>)
        -> Result<usize, StoreError>;

    /// List every task belonging to a run.
    async fn list_tasks(&self, run_id: RunId) -> Result<Vec<Task>, StoreError>;

    /// Fetch one task.
    async fn get_task(&self, id: TaskId) -> Result<Task, StoreError>;

    /// Apply a validated patch to a task.
    async fn update_task(&self, id: TaskId, patch: TaskPatch) -> Result<Task, StoreError>;

    /// Atomically claim one `initialized` task of the run for the caller.
    ///
    /// Each task is handed out by at most one successful checkout across
    /// any number of concurrent callers. A caller that loses a row race
    /// gets [`StoreError::Contention`] and must retry after backing off;
    /// no task is ever skipped because of contention.
    async fn checkout(&self, run_id: RunId) -> Result<Checkout, StoreError>;
}
