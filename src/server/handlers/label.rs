//! Label printing handler.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use crate::autoprint::{LabelDate, date_label};
use crate::error::SessionError;
use crate::printer::{CancelToken, JobFailure, JobOptions, LabelContent, PrintResult};

use super::super::state::AppState;
use super::error_response;

/// Body of `POST /api/print`.
#[derive(Debug, Default, Deserialize)]
pub struct PrintRequest {
    /// Literal label text; takes precedence over `date`
    pub text: Option<String>,
    /// Print a date label (default: today)
    pub date: Option<LabelDate>,
    /// Label code for width lookup
    pub barcode: Option<String>,
    /// Label height in rows
    pub height: Option<u32>,
    /// Read the label code from the loaded roll (default: true without a barcode)
    pub query_label: Option<bool>,
}

/// Handle POST /api/print - print a text or date label.
pub async fn print(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PrintRequest>,
) -> impl IntoResponse {
    let text = match &request.text {
        Some(text) if text.trim().is_empty() => {
            return error_response(StatusCode::BAD_REQUEST, "Text cannot be empty");
        }
        Some(text) => text.trim().to_string(),
        None => date_label(request.date.unwrap_or(LabelDate::Today).resolve()),
    };

    if let Err(e) = state.ensure_connected().await {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            &format!("Printer unavailable: {}", e),
        );
    }

    let options = JobOptions {
        query_label: request.query_label.unwrap_or(request.barcode.is_none()),
        barcode: request.barcode,
        height: request.height,
    };

    // The job runs on its own task so a dropped request cannot abandon a
    // page mid-row.
    let coordinator = state.coordinator.clone();
    let content = LabelContent::Text(text.clone());
    let job = tokio::spawn(async move {
        coordinator
            .print(content, &options, &CancelToken::new())
            .await
    });
    let result = match job.await {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "print task failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Print task failed");
        }
    };

    match result {
        PrintResult::Success { job_id, rows } => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": format!("Label \"{}\" printed", text),
                "job_id": job_id,
                "rows": rows,
            })),
        ),
        PrintResult::Failure { reason, .. } => {
            error_response(failure_status(&reason), &format!("Print failed: {}", reason))
        }
    }
}

fn failure_status(reason: &JobFailure) -> StatusCode {
    match reason {
        JobFailure::WidthUnresolved(_) => StatusCode::UNPROCESSABLE_ENTITY,
        JobFailure::InvalidDimensions | JobFailure::Encode(_) => StatusCode::BAD_REQUEST,
        JobFailure::Session(e) if e.is_disconnect() => StatusCode::SERVICE_UNAVAILABLE,
        JobFailure::Session(SessionError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        JobFailure::Session(_) | JobFailure::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
