//! Reserved value-bag keys and creation provenance checks.
//!
//! A handful of keys in the `settings` and `details` bags are reserved for
//! the store itself: they carry the creator identity, the client identity
//! string, and the parameters of the supervising compute job. Everything
//! else in a bag is application-defined and never inspected.

use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::value_bag::ValueBag;

/// Creator identity (user id or service-principal name), in `details`.
pub const RESERVED_CREATOR: &str = "droidstore.reserved.creator";
/// Client identity string `"<client> <version>"`, in `details`.
pub const RESERVED_CLIENT: &str = "droidstore.reserved.client";
/// `"True"` when the run executes against live resources, in `settings`.
pub const RESERVED_LIVEMODE: &str = "droidstore.reserved.livemode";
/// Container image reference for the supervising job, in `settings`.
pub const RESERVED_IMAGENAME: &str = "droidstore.reserved.imagename";
/// Agent bundle version mounted into the supervising job, in `settings`.
pub const RESERVED_AGENTVER: &str = "droidstore.reserved.agentver";
/// Specific worker job name recorded by the controller, in `details`.
pub const RESERVED_JOBNAME: &str = "droidstore.reserved.jobname";

/// Oldest client allowed to create runs.
pub const MIN_CLIENT_VERSION: ClientVersion = ClientVersion {
    major: 0,
    minor: 15,
    patch: 0,
};

/// A `major.minor.patch` client version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClientVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl fmt::Display for ClientVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ClientVersion {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || CoreError::MalformedClientVersion(s.to_string());
        let mut parts = s.trim().splitn(3, '.');
        let mut next = |required: bool| -> Result<u64, CoreError> {
            match parts.next() {
                Some(part) => part.parse().map_err(|_| malformed()),
                None if required => Err(malformed()),
                None => Ok(0),
            }
        };
        Ok(Self {
            major: next(true)?,
            minor: next(true)?,
            patch: next(false)?,
        })
    }
}

/// Validate the provenance a run-creation request must carry: a `details`
/// bag holding the creator identity and a client identity string whose
/// version is at least [`MIN_CLIENT_VERSION`].
pub fn validate_new_run(details: Option<&ValueBag>) -> Result<(), CoreError> {
    let details = details.ok_or(CoreError::MissingDetails)?;

    if details.get_str(RESERVED_CREATOR).is_none() {
        return Err(CoreError::MissingReservedKey(RESERVED_CREATOR));
    }

    let client = details
        .get_str(RESERVED_CLIENT)
        .ok_or(CoreError::MissingReservedKey(RESERVED_CLIENT))?;

    // The client identity string is "<client> <version>".
    let version_token = client
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| CoreError::MalformedClientVersion(client.to_string()))?;
    let found: ClientVersion = version_token.parse()?;

    if found < MIN_CLIENT_VERSION {
        return Err(CoreError::UnsupportedClient {
            min: MIN_CLIENT_VERSION,
            found,
        });
    }

    Ok(())
}
