//! Core domain errors.

use thiserror::Error;

use crate::status::RunStatus;

/// Core domain errors for Droidstore.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The request body is missing the `details` value bag.
    #[error("the body of the request misses the \"details\" dictionary")]
    MissingDetails,

    /// A reserved provenance key is absent from `details`.
    #[error("the \"{0}\" property is missing from the \"details\"; the request was sent from an older version of the client, please upgrade")]
    MissingReservedKey(&'static str),

    /// The client identity string could not be parsed into a version.
    #[error("cannot parse a client version out of {0:?}")]
    MalformedClientVersion(String),

    /// The client is older than the minimum supported version.
    #[error("minimal client requirement is \"{min}\", got \"{found}\"; please upgrade your client")]
    UnsupportedClient {
        min: crate::ClientVersion,
        found: crate::ClientVersion,
    },

    /// A required field is absent from the request.
    #[error("the \"{0}\" property is required")]
    MissingField(&'static str),

    /// An update attempted to write an immutable field.
    #[error("property \"{0}\" is immutable")]
    ImmutableField(&'static str),

    /// A run status update attempted to move backward in the lifecycle.
    #[error("run status cannot move backward from {from} to {to}")]
    BackwardStatus { from: RunStatus, to: RunStatus },

    /// A field carried a value of the wrong shape.
    #[error("the \"{field}\" property cannot be parsed: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// An enum column carried an unknown value.
    #[error("unknown {kind} value: {value:?}")]
    UnknownEnum { kind: &'static str, value: String },
}
