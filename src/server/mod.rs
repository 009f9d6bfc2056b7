//! # HTTP Server for Label Printing
//!
//! A small JSON API that triggers print jobs and queries the printer.
//!
//! ## Usage
//!
//! ```bash
//! labelwire serve --listen 0.0.0.0:8080 --device 03:00:00:12:34:56 --auto-print
//! ```
//!
//! ## Routes
//!
//! | Method | Path | Body | Action |
//! |--------|------|------|--------|
//! | POST | `/api/print` | `{text?, date?, barcode?, height?, query_label?}` | print a label |
//! | GET | `/api/status` | | session state, loaded label, last job |
//! | POST | `/api/heartbeat` | | connect if needed, probe |
//!
//! Every response is JSON with a `success` flag; failures carry `error`.

mod handlers;
mod state;

pub use handlers::label::PrintRequest;
pub use state::{AppState, ServerConfig};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tracing::info;

use crate::error::LabelwireError;

/// Build the API router over shared state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/print", post(handlers::label::print))
        .route("/api/status", get(handlers::device::status))
        .route("/api/heartbeat", post(handlers::device::heartbeat))
        .with_state(state)
}

/// Start the HTTP server, and the auto printer if the state carries one.
pub async fn serve(state: Arc<AppState>) -> Result<(), LabelwireError> {
    let listen_addr = state.config.listen_addr.clone();

    if let Some(auto) = state.auto.clone() {
        tokio::spawn(async move { auto.run().await });
    }

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .map_err(|e| {
            LabelwireError::Transport(format!("Failed to bind to {}: {}", listen_addr, e))
        })?;

    info!(
        listen = %listen_addr,
        device = %state.config.device_address,
        auto_print = state.auto.is_some(),
        "labelwire HTTP server listening"
    );

    axum::serve(listener, router(state))
        .await
        .map_err(|e| LabelwireError::Transport(format!("Server error: {}", e)))?;

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
