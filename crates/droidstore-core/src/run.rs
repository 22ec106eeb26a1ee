//! The Run entity: a batch of related test tasks sharing immutable
//! settings and mutable presentation details.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::error::CoreError;
use crate::ids::RunId;
use crate::provenance::RESERVED_CREATOR;
use crate::status::RunStatus;
use crate::value_bag::ValueBag;

/// Timestamp wire form used by digests.
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// A test run.
#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    /// Unique id, assigned by the store.
    pub id: RunId,

    /// Display name.
    pub name: Option<String>,

    /// Identity of the creator: a user id for a human, a service-principal
    /// name for a service.
    pub owner: Option<String>,

    /// Immutable settings established at creation. Must not contain
    /// secrets, only references to secret locations.
    pub settings: Option<ValueBag>,

    /// Mutable value bag for presentation/analysis metadata.
    pub details: Option<ValueBag>,

    /// Creation time, set once.
    pub creation: DateTime<Utc>,

    /// Stage of execution.
    pub status: RunStatus,
}

impl Run {
    /// The canonical external representation.
    pub fn digest(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "owner": self.owner,
            "status": self.status,
            "creation": self.creation.format(TIME_FORMAT).to_string(),
            "details": self.details,
            "settings": self.settings,
        })
    }
}

/// A run as submitted for creation, before the store assigns an id.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub name: Option<String>,
    pub owner: Option<String>,
    pub settings: Option<ValueBag>,
    pub details: Option<ValueBag>,
    pub creation: DateTime<Utc>,
    pub status: RunStatus,
}

impl NewRun {
    /// Build a run from a partial external representation.
    ///
    /// Permissive on read: unknown keys are ignored, absent fields get
    /// defaults (`creation` = now, `status` = Initialized). The owner is
    /// back-filled from the reserved creator key when not given
    /// explicitly.
    pub fn from_request(data: &Value) -> Result<Self, CoreError> {
        let map = data.as_object().ok_or(CoreError::InvalidField {
            field: "body",
            reason: "expected a JSON object".to_string(),
        })?;

        let details = map.get("details").cloned().map(ValueBag::from_input);
        let owner = map
            .get("owner")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                details
                    .as_ref()
                    .and_then(|d| d.get_str(RESERVED_CREATOR))
                    .map(str::to_string)
            });

        Ok(Self {
            name: map.get("name").and_then(Value::as_str).map(str::to_string),
            owner,
            settings: map.get("settings").cloned().map(ValueBag::from_input),
            details,
            creation: Utc::now(),
            status: parse_status(map.get("status"))?.unwrap_or_default(),
        })
    }
}

/// Partial update of a run. `id`, `settings`, and `creation` are
/// immutable; an attempt to write them is rejected when the patch is
/// parsed, before anything touches the store.
#[derive(Debug, Clone, Default)]
pub struct RunPatch {
    pub name: Option<String>,
    pub owner: Option<String>,
    pub details: Option<ValueBag>,
    pub status: Option<RunStatus>,
}

impl RunPatch {
    const IMMUTABLE: [&'static str; 3] = ["id", "settings", "creation"];

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
            name: map.get("name").and_then(Value::as_str).map(str::to_string),
            owner: map.get("owner").and_then(Value::as_str).map(str::to_string),
            details: map.get("details").cloned().map(ValueBag::from_input),
            status: parse_status(map.get("status"))?,
        })
    }

    /// Apply the patch. Status may only stay put or move forward.
    pub fn apply(self, run: &mut Run) -> Result<(), CoreError> {
        if let Some(next) = self.status {
            if !run.status.can_advance_to(next) {
                return Err(CoreError::BackwardStatus {
                    from: run.status,
                    to: next,
                });
            }
            run.status = next;
        }
        if let Some(name) = self.name {
            run.name = Some(name);
        }
        if let Some(owner) = self.owner {
            run.owner = Some(owner);
        }
        if let Some(details) = self.details {
            run.details = Some(details);
        }
        Ok(())
    }
}

fn parse_status(value: Option<&Value>) -> Result<Option<RunStatus>, CoreError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => {
            let text = v.as_str().ok_or_else(|| CoreError::InvalidField {
                field: "status",
                reason: "expected a string".to_string(),
            })?;
            text.parse().map(Some)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::RESERVED_CREATOR;
    use serde_json::json;

    fn sample_run() -> Run {
        Run {
            id: RunId::new(1),
            name: Some("nightly".to_string()),
            owner: Some("alice".to_string()),
            settings: Some(ValueBag::from_stored(r#"{"image":"x"}"#)),
            details: None,
            creation: Utc::now(),
            status: RunStatus::Initialized,
        }
    }

    #[test]
    fn from_request_fills_defaults_and_backfills_owner() {
        let body = json!({
            "name": "nightly",
            "details": {RESERVED_CREATOR: "alice"},
            "unknown_key": true,
        });
        let new_run = NewRun::from_request(&body).unwrap();
        assert_eq!(new_run.name.as_deref(), Some("nightly"));
        assert_eq!(new_run.owner.as_deref(), Some("alice"));
        assert_eq!(new_run.status, RunStatus::Initialized);
    }

    #[test]
    fn explicit_owner_wins_over_creator() {
        let body = json!({
            "owner": "svc-principal",
            "details": {RESERVED_CREATOR: "alice"},
        });
        let new_run = NewRun::from_request(&body).unwrap();
        assert_eq!(new_run.owner.as_deref(), Some("svc-principal"));
    }

    #[test]
    fn patch_rejects_immutable_fields() {
        for field in ["id", "settings", "creation"] {
            let body = json!({ field: "anything" });
            assert!(matches!(
                RunPatch::from_value(&body),
                Err(CoreError::ImmutableField(f)) if f == field
            ));
        }
    }

    #[test]
    fn patch_ignores_unknown_keys() {
        let patch = RunPatch::from_value(&json!({"name": "renamed", "color": "teal"})).unwrap();
        assert_eq!(patch.name.as_deref(), Some("renamed"));
    }

    #[test]
    fn patch_enforces_forward_status() {
        let mut run = sample_run();
        run.status = RunStatus::Running;

        let forward = RunPatch::from_value(&json!({"status": "Completed"})).unwrap();
        forward.apply(&mut run).unwrap();
        assert_eq!(run.status, RunStatus::Completed);

        let backward = RunPatch::from_value(&json!({"status": "Initialized"})).unwrap();
        assert!(matches!(
            backward.apply(&mut run),
            Err(CoreError::BackwardStatus { .. })
        ));
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[test]
    fn digest_formats_creation_without_subseconds() {
        let run = sample_run();
        let digest = run.digest();
        let creation = digest["creation"].as_str().unwrap();
        assert!(creation.ends_with('Z'));
        assert!(!creation.contains('.'));
        assert_eq!(digest["settings"], json!({"image": "x"}));
    }
}
