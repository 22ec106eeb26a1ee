//! The Task entity: one unit of work within a run, claimed and executed
//! by exactly one droid.

use serde_json::{json, Value};
use std::str::FromStr;

use crate::error::CoreError;
use crate::ids::{RunId, TaskId};
use crate::status::{TaskResult, TaskStatus};
use crate::value_bag::ValueBag;

/// A test task.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    /// Unique id, assigned by the store.
    pub id: TaskId,

    /// Display name. Immutable after creation.
    pub name: String,

    /// Free-form classification string used to query tasks fast, e.g. a
    /// container image reference. Immutable after creation.
    pub annotation: Option<String>,

    /// Immutable settings describing how to execute the task.
    pub settings: Option<ValueBag>,

    /// Governs checkout eligibility.
    pub status: TaskStatus,

    /// Verdict reported by the droid.
    pub result: Option<TaskResult>,

    /// Mutable value bag for logs, duration breakdown, and the like.
    pub result_details: Option<ValueBag>,

    /// Execution duration in milliseconds.
    pub duration: Option<i64>,

    /// The owning run. Immutable for the task's entire lifetime.
    pub run_id: RunId,
}

impl Task {
    /// The canonical external representation.
    pub fn digest(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "settings": self.settings,
            "annotation": self.annotation,
            "status": self.status,
            "duration": self.duration,
            "result": self.result,
            "result_details": self.result_details,
            "run_id": self.run_id,
        })
    }
}

/// A task as submitted for creation, before the store assigns an id.
#[derive(Debug, Clone)]
pub struct TaskDraft {
    pub name: String,
    pub annotation: Option<String>,
    pub settings: Option<ValueBag>,
    pub status: TaskStatus,
    pub result: Option<TaskResult>,
    pub result_details: Option<ValueBag>,
    pub duration: Option<i64>,
}

impl TaskDraft {
    /// Build a draft from a partial external representation. `name` is
    /// required; `status` defaults to `initialized`; unknown keys are
    /// ignored.
    pub fn from_request(data: &Value) -> Result<Self, CoreError> {
        let map = data.as_object().ok_or(CoreError::InvalidField {
            field: "body",
            reason: "expected a JSON object".to_string(),
        })?;

        let name = map
            .get("name")
            .and_then(Value::as_str)
            .ok_or(CoreError::MissingField("name"))?
            .to_string();

        Ok(Self {
            name,
            annotation: map
                .get("annotation")
                .and_then(Value::as_str)
                .map(str::to_string),
            settings: map.get("settings").cloned().map(ValueBag::from_input),
            status: parse_enum::<TaskStatus>(map.get("status"), "status")?.unwrap_or_default(),
            result: parse_enum::<TaskResult>(map.get("result"), "result")?,
            result_details: map
                .get("result_details")
                .cloned()
                .map(ValueBag::from_input),
            duration: map.get("duration").and_then(Value::as_i64),
        })
    }
}

/// Partial update of a task. The immutable set is `id`, `name`,
/// `annotation`, `settings`, and `run_id`; writes to them are rejected
/// when the patch is parsed.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub result: Option<TaskResult>,
    pub result_details: Option<ValueBag>,
    pub duration: Option<i64>,
}

impl TaskPatch {
    const IMMUTABLE: [&'static str; 5] = ["id", "name", "annotation", "settings", "run_id"];

    /// Parse a patch from a partial external representation. Unknown keys
    /// are ignored; immutable keys are an error.
    pub fn from_value(data: &Value) -> Result<Self, CoreError> {
        let map = data.as_object().ok_or(CoreError::InvalidField {
            field: "body",
            reason: "expected a JSON object".to_string(),
        })?;

        for field in Self::IMMUTABLE {
            if map.contains_key(field) {
                return Err(CoreError::ImmutableField(field));
            }
        }

        Ok(Self {
            status: parse_enum::<TaskStatus>(map.get("status"), "status")?,
            result: parse_enum::<TaskResult>(map.get("result"), "result")?,
            result_details: map
                .get("result_details")
                .cloned()
                .map(ValueBag::from_input),
            duration: map.get("duration").and_then(Value::as_i64),
        })
    }

    /// Apply the patch to a task.
    pub fn apply(self, task: &mut Task) {
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(result) = self.result {
            task.result = Some(result);
        }
        if let Some(details) = self.result_details {
            task.result_details = Some(details);
        }
        if let Some(duration) = self.duration {
            task.duration = Some(duration);
        }
    }
}

fn parse_enum<T>(value: Option<&Value>, field: &'static str) -> Result<Option<T>, CoreError>
where
    T: FromStr<Err = CoreError>,
{
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => {
            let text = v.as_str().ok_or_else(|| CoreError::InvalidField {
                field,
                reason: "expected a string".to_string(),
            })?;
            text.parse().map(Some)
        }
    }
}
