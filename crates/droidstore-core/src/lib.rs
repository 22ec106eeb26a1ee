//! Droidstore Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/HTTP
//! - Database
//! - Runtime specifics
//!
//! All types here represent the core business domain of Droidstore: runs,
//! the tasks they own, and the rules for reading and mutating them.

pub mod error;
pub mod ids;
pub mod provenance;
pub mod run;
pub mod status;
pub mod task;
pub mod value_bag;

// Re-export commonly used types
pub use error::CoreError;
pub use ids::{RunId, TaskId};
pub use provenance::ClientVersion;
pub use run::{NewRun, Run, RunPatch};
pub use status::{RunStatus, TaskResult, TaskStatus};
pub use task::{Task, TaskDraft, TaskPatch};
pub use value_bag::ValueBag;
