//! HTTP handlers for the server.

pub mod device;
pub mod label;

use axum::{Json, http::StatusCode};
use serde_json::{Value, json};

/// JSON error body shared by all handlers.
pub(super) fn error_response(status: StatusCode, message: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "success": false, "error": message })))
}
