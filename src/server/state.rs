//! Server state and configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::autoprint::AutoPrinter;
use crate::error::ConnectError;
use crate::printer::{PrintJobCoordinator, PrinterSession};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Printer address: MAC or RFCOMM device path
    pub device_address: String,
    /// Address to listen on (e.g., "0.0.0.0:8080")
    pub listen_addr: String,
    /// Timeout for status and heartbeat queries
    pub query_timeout: Duration,
}

impl ServerConfig {
    pub fn new(device_address: impl Into<String>, listen_addr: impl Into<String>) -> Self {
        Self {
            device_address: device_address.into(),
            listen_addr: listen_addr.into(),
            query_timeout: Duration::from_secs(2),
        }
    }
}

/// Application state shared across handlers.
pub struct AppState {
    pub config: ServerConfig,
    pub coordinator: Arc<PrintJobCoordinator>,
    /// Background date printer, when enabled
    pub auto: Option<Arc<AutoPrinter>>,
}

impl AppState {
    pub fn new(config: ServerConfig, coordinator: Arc<PrintJobCoordinator>) -> Self {
        Self {
            config,
            coordinator,
            auto: None,
        }
    }

    pub fn with_auto_print(mut self, auto: Arc<AutoPrinter>) -> Self {
        self.auto = Some(auto);
        self
    }

    pub fn session(&self) -> &Arc<PrinterSession> {
        self.coordinator.session()
    }

    /// Connect to the configured printer unless already connected.
    pub async fn ensure_connected(&self) -> Result<(), ConnectError> {
        self.session().connect(&self.config.device_address).await
    }
}
