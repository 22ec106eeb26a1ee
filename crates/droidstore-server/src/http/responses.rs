//! Query and response shapes shared by the handlers.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use droidstore_store::RunFilter;

use crate::http::error::ApiError;

/// Query parameters accepted by the run listing.
#[derive(Debug, Default, Deserialize)]
pub struct ListRunsQuery {
    pub owner: Option<String>,
    pub product: Option<String>,
    pub before: Option<String>,
    pub after: Option<String>,
    pub skip: Option<i64>,
    pub last: Option<i64>,
}

impl ListRunsQuery {
    pub fn into_filter(self) -> Result<RunFilter, ApiError> {
        Ok(RunFilter {
            owner: self.owner,
            product: self.product,
            before: self.before.as_deref().map(parse_instant).transpose()?,
            after: self.after.as_deref().map(parse_instant).transpose()?,
            skip: self.skip,
            last: self.last,
        })
    }
}

/// Parse a timestamp filter. Accepts RFC 3339, a bare date-time, or a
/// bare date (taken as midnight UTC).
fn parse_instant(raw: &str) -> Result<DateTime<Utc>, ApiError> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Ok(t.and_utc());
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(t) = d.and_hms_opt(0, 0, 0) {
            return Ok(t.and_utc());
        }
    }
    Err(ApiError::Validation(format!(
        "cannot parse timestamp \"{raw}\""
    )))
}

/// Plain status acknowledgment.
#[derive(Debug, Serialize)]
pub struct StatusBody {
    pub status: &'static str,
}

impl StatusBody {
    pub fn removed() -> Self {
        Self { status: "removed" }
    }
}

/// Acknowledgment for a batch task insert.
#[derive(Debug, Serialize)]
pub struct BatchAdded {
    pub status: &'static str,
    pub added: usize,
}

impl BatchAdded {
    pub fn new(added: usize) -> Self {
        Self {
            status: "success",
            added,
        }
    }
}
