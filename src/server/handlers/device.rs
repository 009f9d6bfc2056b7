//! Printer status handlers.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::{Value, json};
use std::sync::Arc;

use super::super::state::AppState;
use super::error_response;

/// Handle GET /api/status - connection state, loaded label, last job.
///
/// Never connects; the label is only queried on a live session.
pub async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let session = state.session();

    let label = if session.is_connected() {
        match session.get_device_status(state.config.query_timeout).await {
            Ok(label) => json!(label),
            Err(e) => json!({ "error": e.to_string() }),
        }
    } else {
        Value::Null
    };

    let idle_ms = session
        .last_activity()
        .await
        .map(|t| t.elapsed().as_millis() as u64);

    let job = state.coordinator.subscribe().borrow().as_ref().map(|p| {
        json!({
            "job_id": p.job_id,
            "state": p.state.name(),
            "rows_sent": p.rows_sent,
            "rows_total": p.rows_total,
        })
    });

    let last_auto_print = state
        .auto
        .as_ref()
        .and_then(|auto| auto.last_printed())
        .map(|day| day.to_string());

    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "state": session.state(),
            "address": session.address().await,
            "idle_ms": idle_ms,
            "label": label,
            "last_job": job,
            "last_auto_print": last_auto_print,
        })),
    )
}

/// Handle POST /api/heartbeat - connect if needed and probe the printer.
pub async fn heartbeat(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if let Err(e) = state.ensure_connected().await {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            &format!("Printer unavailable: {}", e),
        );
    }

    match state.session().heartbeat(state.config.query_timeout).await {
        Ok(status) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "Printer is alive",
                "status": status,
            })),
        ),
        Err(e) => error_response(
            StatusCode::GATEWAY_TIMEOUT,
            &format!("Heartbeat failed: {}", e),
        ),
    }
}
