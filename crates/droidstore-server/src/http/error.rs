//! API error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use droidstore_core::CoreError;
use droidstore_store::StoreError;

use crate::auth::AuthError;
use crate::orchestrator::OrchestratorError;

/// One error type for every handler, carrying the message the client sees.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Malformed(String),

    #[error("failed to update a task due to a row lock; please retry")]
    Contention,

    #[error("cluster operation failed: {0}")]
    Orchestrator(String),

    #[error("internal error")]
    Internal,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) | ApiError::Malformed(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Contention | ApiError::Orchestrator(_) | ApiError::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(%status, error = %self, "request failed");
        } else {
            warn!(%status, error = %self, "request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::RunNotFound(_) | StoreError::TaskNotFound(_) => {
                ApiError::NotFound(e.to_string())
            }
            StoreError::Contention => ApiError::Contention,
            StoreError::Domain(inner) => inner.into(),
            StoreError::Database(inner) => {
                error!(error = %inner, "database failure");
                ApiError::Internal
            }
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        ApiError::Validation(e.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Malformed => ApiError::Malformed(e.to_string()),
            AuthError::KeyFetch(_) => {
                error!(error = %e, "signing key refresh failed");
                ApiError::Internal
            }
            AuthError::MissingCredential | AuthError::Expired | AuthError::InvalidToken => {
                ApiError::Unauthorized(e.to_string())
            }
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        match e {
            OrchestratorError::MissingSetting(_) => ApiError::Validation(e.to_string()),
            _ => ApiError::Orchestrator(e.to_string()),
        }
    }
}
