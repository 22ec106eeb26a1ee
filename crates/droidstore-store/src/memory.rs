//! In-memory store backend.
//!
//! Backs tests and local development. One mutex guards all state, so
//! checkout calls are serialized: the exactly-once claim property holds
//! trivially and [`StoreError::Contention`] is never produced here.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use droidstore_core::{
    NewRun, Run, RunId, RunPatch, RunStatus, Task, TaskDraft, TaskId, TaskPatch, TaskStatus,
};

use crate::{Checkout, RunFilter, Store, StoreError};

/// Mutex-guarded map-backed store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    runs: BTreeMap<i64, Run>,
    tasks: BTreeMap<i64, Task>,
    next_run_id: i64,
    next_task_id: i64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Inner {
    fn insert_task(&mut self, run_id: RunId, draft: TaskDraft) -> Task {
        self.next_task_id += 1;
        let task = Task {
            id: TaskId::new(self.next_task_id),
            name: draft.name,
            annotation: draft.annotation,
            settings: draft.settings,
            status: draft.status,
            result: draft.result,
            result_details: draft.result_details,
            duration: draft.duration,
            run_id,
        };
        self.tasks.insert(task.id.value(), task.clone());
        task
    }

    fn require_run(&self, id: RunId) -> Result<&Run, StoreError> {
        self.runs.get(&id.value()).ok_or(StoreError::RunNotFound(id))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_run(&self, new_run: NewRun) -> Result<Run, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.next_run_id += 1;
        let run = Run {
            id: RunId::new(inner.next_run_id),
            name: new_run.name,
            owner: new_run.owner,
            settings: new_run.settings,
            details: new_run.details,
            creation: new_run.creation,
            status: new_run.status,
        };
        inner.runs.insert(run.id.value(), run.clone());
        Ok(run)
    }

    async fn get_run(&self, id: RunId) -> Result<Run, StoreError> {
        let inner = self.inner.lock().await;
        inner.require_run(id).cloned()
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>, StoreError> {
        let inner = self.inner.lock().await;
        let mut runs: Vec<Run> = inner
            .runs
            .values()
            .filter(|r| match &filter.owner {
                Some(owner) => r.owner.as_deref() == Some(owner.as_str()),
                None => true,
            })
            .filter(|r| match &filter.product {
                Some(product) => r
                    .details
                    .as_ref()
                    .is_some_and(|d| d.to_stored().contains(product.as_str())),
                None => true,
            })
            .filter(|r| filter.before.map_or(true, |t| r.creation <= t))
            .filter(|r| filter.after.map_or(true, |t| r.creation >= t))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.creation.cmp(&a.creation).then(b.id.cmp(&a.id)));

        let skip = filter.skip.unwrap_or(0).max(0) as usize;
        let last = filter.last.map_or(usize::MAX, |n| n.max(0) as usize);
        Ok(runs.into_iter().skip(skip).take(last).collect())
    }

    async fn update_run(&self, id: RunId, patch: RunPatch) -> Result<Run, StoreError> {
        let mut inner = self.inner.lock().await;
        let run = inner
            .runs
            .get_mut(&id.value())
            .ok_or(StoreError::RunNotFound(id))?;
        patch.apply(run)?;
        Ok(run.clone())
    }

    async fn set_run_status(&self, id: RunId, status: RunStatus) -> Result<Run, StoreError> {
        let mut inner = self.inner.lock().await;
        let run = inner
            .runs
            .get_mut(&id.value())
            .ok_or(StoreError::RunNotFound(id))?;
        run.status = status;
        Ok(run.clone())
    }

    async fn delete_run(&self, id: RunId) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let removed = inner.runs.remove(&id.value()).is_some();
        if removed {
            inner.tasks.retain(|_, t| t.run_id != id);
        }
        Ok(removed)
    }

    async fn create_task(&self, run_id: RunId, draft: TaskDraft) -> Result<Task, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.require_run(run_id)?;
        Ok(inner.insert_task(run_id, draft))
    }

    async fn create_tasks(
        &self,
        run_id: RunId,
        drafts: Vec<TaskDraft>,
    ) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.require_run(run_id)?;
        let count = drafts.len();
        for draft in drafts {
            inner.insert_task(run_id, draft);
        }
        Ok(count)
    }

    async fn list_tasks(&self, run_id: RunId) -> Result<Vec<Task>, StoreError> {
        let inner = self.inner.lock().await;
        inner.require_run(run_id)?;
        Ok(inner
            .tasks
            .values()
            .filter(|t| t.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn get_task(&self, id: TaskId) -> Result<Task, StoreError> {
        let inner = self.inner.lock().await;
        inner
            .tasks
            .get(&id.value())
            .cloned()
            .ok_or(StoreError::TaskNotFound(id))
    }

    async fn update_task(&self, id: TaskId, patch: TaskPatch) -> Result<Task, StoreError> {
        let mut inner = self.inner.lock().await;
        let task = inner
            .tasks
            .get_mut(&id.value())
            .ok_or(StoreError::TaskNotFound(id))?;
        patch.apply(task);
        Ok(task.clone())
    }

    async fn checkout(&self, run_id: RunId) -> Result<Checkout, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.require_run(run_id)?;
        let candidate = inner
            .tasks
            .values_mut()
            .find(|t| t.run_id == run_id && t.status == TaskStatus::Initialized);
        match candidate {
            Some(task) => {
                task.status = TaskStatus::Scheduled;
                Ok(Checkout::Claimed(task.clone()))
            }
            None => Ok(Checkout::Exhausted),
        }
    }
}
