use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use droidstore_core::run::TIME_FORMAT;

/// Liveness probe. The only route outside the access gate.
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "time": Utc::now().format(TIME_FORMAT).to_string(),
    }))
}
