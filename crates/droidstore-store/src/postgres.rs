//! PostgreSQL store backend.
//!
//! Queries are bound at runtime and rows mapped by hand; value bags are
//! persisted as TEXT and decoded lazily on read. Checkout relies on
//! `FOR UPDATE NOWAIT`: the candidate row is locked without waiting, a
//! concurrent holder makes the statement fail with `55P03`, and that
//! failure is surfaced as [`StoreError::Contention`] for the caller to
//! retry. Losing a race never skips a task.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::debug;

use droidstore_core::{
    NewRun, Run, RunId, RunPatch, RunStatus, Task, TaskDraft, TaskId, TaskPatch, TaskStatus,
    ValueBag,
};

use crate::{Checkout, RunFilter, Store, StoreError};

/// Postgres error code for "lock not available" (NOWAIT lost the race).
const LOCK_NOT_AVAILABLE: &str = "55P03";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
    id       BIGSERIAL PRIMARY KEY,
    name     TEXT,
    owner    TEXT,
    settings TEXT,
    details  TEXT,
    creation TIMESTAMPTZ NOT NULL,
    status   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tasks (
    id             BIGSERIAL PRIMARY KEY,
    name           TEXT NOT NULL,
    annotation     TEXT,
    settings       TEXT,
    status         TEXT NOT NULL,
    result         TEXT,
    result_details TEXT,
    duration       BIGINT,
    run_id         BIGINT NOT NULL REFERENCES runs(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_tasks_run_status ON tasks (run_id, status);
"#;

const RUN_COLUMNS: &str = "id, name, owner, settings, details, creation, status";
const TASK_COLUMNS: &str =
    "id, name, annotation, settings, status, result, result_details, duration, run_id";

/// PostgreSQL-backed store.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to the database.
    pub async fn connect(uri: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new().max_connections(16).connect(uri).await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the schema when it does not exist yet.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

fn run_from_row(row: &PgRow) -> Result<Run, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(Run {
        id: RunId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        owner: row.try_get("owner")?,
        settings: row
            .try_get::<Option<String>, _>("settings")?
            .map(|s| ValueBag::from_stored(&s)),
        details: row
            .try_get::<Option<String>, _>("details")?
            .map(|s| ValueBag::from_stored(&s)),
        creation: row.try_get("creation")?,
        status: status
            .parse()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
    })
}

fn task_from_row(row: &PgRow) -> Result<Task, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let result: Option<String> = row.try_get("result")?;
    Ok(Task {
        id: TaskId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        annotation: row.try_get("annotation")?,
        settings: row
            .try_get::<Option<String>, _>("settings")?
            .map(|s| ValueBag::from_stored(&s)),
        status: status
            .parse()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        result: result
            .map(|r| r.parse())
            .transpose()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        result_details: row
            .try_get::<Option<String>, _>("result_details")?
            .map(|s| ValueBag::from_stored(&s)),
        duration: row.try_get("duration")?,
        run_id: RunId::new(row.try_get("run_id")?),
    })
}

fn stored(bag: &Option<ValueBag>) -> Option<String> {
    bag.as_ref().map(ValueBag::to_stored)
}

#[async_trait]
impl Store for PgStore {
    async fn create_run(&self, new_run: NewRun) -> Result<Run, StoreError> {
        let row = sqlx::query(
            "INSERT INTO runs (name, owner, settings, details, creation, status) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
        )
        .bind(&new_run.name)
        .bind(&new_run.owner)
        .bind(stored(&new_run.settings))
        .bind(stored(&new_run.details))
        .bind(new_run.creation)
        .bind(new_run.status.as_str())
        .fetch_one(&self.pool)
        .await?;

        let id = RunId::new(row.try_get("id")?);
        debug!(run_id = %id, "run created");
        Ok(Run {
            id,
            name: new_run.name,
            owner: new_run.owner,
            settings: new_run.settings,
            details: new_run.details,
            creation: new_run.creation,
            status: new_run.status,
        })
    }

    async fn get_run(&self, id: RunId) -> Result<Run, StoreError> {
        let row = sqlx::query(&format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = $1"))
            .bind(id.value())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::RunNotFound(id))?;
        Ok(run_from_row(&row)?)
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>, StoreError> {
        let mut query: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {RUN_COLUMNS} FROM runs WHERE TRUE"));
        if let Some(owner) = &filter.owner {
            query.push(" AND owner = ").push_bind(owner.clone());
        }
        if let Some(product) = &filter.product {
            query
                .push(" AND details LIKE ")
                .push_bind(format!("%{product}%"));
        }
        if let Some(before) = filter.before {
            query.push(" AND creation <= ").push_bind(before);
        }
        if let Some(after) = filter.after {
            query.push(" AND creation >= ").push_bind(after);
        }
        query.push(" ORDER BY creation DESC, id DESC");
        if let Some(last) = filter.last {
            query.push(" LIMIT ").push_bind(last);
        }
        if let Some(skip) = filter.skip {
            query.push(" OFFSET ").push_bind(skip);
        }

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| run_from_row(row).map_err(StoreError::from))
            .collect()
    }

    async fn update_run(&self, id: RunId, patch: RunPatch) -> Result<Run, StoreError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.value())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::RunNotFound(id))?;

        let mut run = run_from_row(&row)?;
        patch.apply(&mut run)?;

        sqlx::query("UPDATE runs SET name = $1, owner = $2, details = $3, status = $4 WHERE id = $5")
            .bind(&run.name)
            .bind(&run.owner)
            .bind(stored(&run.details))
            .bind(run.status.as_str())
            .bind(id.value())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(run)
    }

    async fn set_run_status(&self, id: RunId, status: RunStatus) -> Result<Run, StoreError> {
        let rows = sqlx::query("UPDATE runs SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id.value())
            .execute(&self.pool)
            .await?
            .rows_affected();
        if rows == 0 {
            return Err(StoreError::RunNotFound(id));
        }
        self.get_run(id).await
    }

    async fn delete_run(&self, id: RunId) -> Result<bool, StoreError> {
        // tasks go with the run via ON DELETE CASCADE
        let rows = sqlx::query("DELETE FROM runs WHERE id = $1")
            .bind(id.value())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(rows > 0)
    }

    async fn create_task(&self, run_id: RunId, draft: TaskDraft) -> Result<Task, StoreError> {
        let mut tx = self.pool.begin().await?;
        ensure_run_exists(&mut tx, run_id).await?;
        let task = insert_task(&mut tx, run_id, draft).await?;
        tx.commit().await?;
        Ok(task)
    }

    async fn create_tasks(
        &self,
        run_id: RunId,
        drafts: Vec<TaskDraft>,
    ) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        ensure_run_exists(&mut tx, run_id).await?;
        let count = drafts.len();
        for draft in drafts {
            insert_task(&mut tx, run_id, draft).await?;
        }
        tx.commit().await?;
        Ok(count)
    }

    async fn list_tasks(&self, run_id: RunId) -> Result<Vec<Task>, StoreError> {
        let mut tx = self.pool.begin().await?;
        ensure_run_exists(&mut tx, run_id).await?;
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE run_id = $1 ORDER BY id"
        ))
        .bind(run_id.value())
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;
        rows.iter()
            .map(|row| task_from_row(row).map_err(StoreError::from))
            .collect()
    }

    async fn get_task(&self, id: TaskId) -> Result<Task, StoreError> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
            .bind(id.value())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::TaskNotFound(id))?;
        Ok(task_from_row(&row)?)
    }

    async fn update_task(&self, id: TaskId, patch: TaskPatch) -> Result<Task, StoreError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.value())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::TaskNotFound(id))?;

        let mut task = task_from_row(&row)?;
        patch.apply(&mut task);

        sqlx::query(
            "UPDATE tasks SET status = $1, result = $2, result_details = $3, duration = $4 \
             WHERE id = $5",
        )
        .bind(task.status.as_str())
        .bind(task.result.map(|r| r.as_str()))
        .bind(stored(&task.result_details))
        .bind(task.duration)
        .bind(id.value())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(task)
    }

    async fn checkout(&self, run_id: RunId) -> Result<Checkout, StoreError> {
        let mut tx = self.pool.begin().await?;
        ensure_run_exists(&mut tx, run_id).await?;

        // Lock one eligible row without waiting. A concurrent holder makes
        // this fail fast (55P03) instead of queuing; which eligible task
        // comes back first is deliberately unspecified.
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE run_id = $1 AND status = 'initialized' \
             LIMIT 1 FOR UPDATE NOWAIT"
        ))
        .bind(run_id.value())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_lock_error)?;

        let Some(row) = row else {
            return Ok(Checkout::Exhausted);
        };
        let mut task = task_from_row(&row)?;

        sqlx::query("UPDATE tasks SET status = 'scheduled' WHERE id = $1")
            .bind(task.id.value())
            .execute(&mut *tx)
            .await?;
        tx.commit().await.map_err(map_lock_error)?;

        task.status = TaskStatus::Scheduled;
        debug!(run_id = %run_id, task_id = %task.id, "task checked out");
        Ok(Checkout::Claimed(task))
    }
}

async fn ensure_run_exists(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    run_id: RunId,
) -> Result<(), StoreError> {
    sqlx::query("SELECT 1 FROM runs WHERE id = $1")
        .bind(run_id.value())
        .fetch_optional(&mut **tx)
        .await?
        .map(|_| ())
        .ok_or(StoreError::RunNotFound(run_id))
}

async fn insert_task(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    run_id: RunId,
    draft: TaskDraft,
) -> Result<Task, StoreError> {
    let row = sqlx::query(
        "INSERT INTO tasks (name, annotation, settings, status, result, result_details, duration, run_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING id",
    )
    .bind(&draft.name)
    .bind(&draft.annotation)
    .bind(stored(&draft.settings))
    .bind(draft.status.as_str())
    .bind(draft.result.map(|r| r.as_str()))
    .bind(stored(&draft.result_details))
    .bind(draft.duration)
    .bind(run_id.value())
    .fetch_one(&mut **tx)
    .await?;

    Ok(Task {
        id: TaskId::new(row.try_get("id")?),
        name: draft.name,
        annotation: draft.annotation,
        settings: draft.settings,
        status: draft.status,
        result: draft.result,
        result_details: draft.result_details,
        duration: draft.duration,
        run_id,
    })
}

fn map_lock_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some(LOCK_NOT_AVAILABLE) {
            return StoreError::Contention;
        }
    }
    StoreError::Database(e)
}
