//! # Auto Print
//!
//! A background poller that prints one date label per day as soon as the
//! printer is reachable.
//!
//! ## Tick
//!
//! ```text
//! every interval (15s):
//!   printed today? ──yes──► sleep
//!        │no
//!        ▼
//!   connected? ──no──► connect ──fail──► sleep
//!        │yes                │ok
//!        ▼◄──────────────────┘
//!   heartbeat ──fail──► sleep
//!        │ok
//!        ▼
//!   print "Fri Oct 16" ──ok──► remember today
//! ```
//!
//! The day is only remembered after a successful print, so a failed attempt
//! is retried on the next tick.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use serde::Deserialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ConnectError, SessionError};
use crate::printer::job::{CancelToken, JobFailure, JobOptions, LabelContent, PrintResult};
use crate::printer::PrintJobCoordinator;

/// Date label format, e.g. `Fri Oct 16`
pub const DATE_FORMAT: &str = "%a %b %-d";

/// Format `date` as a label.
pub fn date_label(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Which day a date label shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelDate {
    Today,
    Tomorrow,
}

impl LabelDate {
    /// Resolve against the local calendar.
    pub fn resolve(self) -> NaiveDate {
        self.relative_to(Local::now().date_naive())
    }

    pub fn relative_to(self, today: NaiveDate) -> NaiveDate {
        match self {
            LabelDate::Today => today,
            LabelDate::Tomorrow => today.succ_opt().unwrap_or(today),
        }
    }
}

impl FromStr for LabelDate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "today" => Ok(LabelDate::Today),
            "tomorrow" => Ok(LabelDate::Tomorrow),
            other => Err(format!("unknown date '{}', expected today or tomorrow", other)),
        }
    }
}

impl fmt::Display for LabelDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelDate::Today => write!(f, "today"),
            LabelDate::Tomorrow => write!(f, "tomorrow"),
        }
    }
}

/// Auto-print settings.
#[derive(Debug, Clone)]
pub struct AutoPrintConfig {
    /// Printer address to (re)connect to
    pub address: String,

    /// Time between checks
    pub interval: Duration,

    /// Heartbeat timeout before printing
    pub heartbeat_timeout: Duration,

    /// Options for the date label job
    pub options: JobOptions,
}

impl AutoPrintConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            interval: Duration::from_secs(15),
            heartbeat_timeout: Duration::from_secs(2),
            options: JobOptions {
                query_label: true,
                ..JobOptions::default()
            },
        }
    }
}

/// What one check did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    AlreadyPrinted,
    Printed(Uuid),
    ConnectFailed(ConnectError),
    HeartbeatFailed(SessionError),
    PrintFailed(JobFailure),
}

type Clock = Box<dyn Fn() -> NaiveDate + Send + Sync>;

/// # Auto Printer
///
/// The last printed day is private to the poller; observers read it through
/// [`subscribe`](Self::subscribe).
pub struct AutoPrinter {
    coordinator: Arc<PrintJobCoordinator>,
    config: AutoPrintConfig,
    today: Clock,
    last_printed: watch::Sender<Option<NaiveDate>>,
}

impl AutoPrinter {
    pub fn new(coordinator: Arc<PrintJobCoordinator>, config: AutoPrintConfig) -> Self {
        Self {
            coordinator,
            config,
            today: Box::new(|| Local::now().date_naive()),
            last_printed: watch::channel(None).0,
        }
    }

    /// Replace the local calendar (tests, fixed dates).
    pub fn with_clock(mut self, today: impl Fn() -> NaiveDate + Send + Sync + 'static) -> Self {
        self.today = Box::new(today);
        self
    }

    pub fn last_printed(&self) -> Option<NaiveDate> {
        *self.last_printed.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<NaiveDate>> {
        self.last_printed.subscribe()
    }

    /// Run one check.
    pub async fn tick(&self) -> TickOutcome {
        let today = (self.today)();
        if self.last_printed() == Some(today) {
            debug!(%today, "date label already printed");
            return TickOutcome::AlreadyPrinted;
        }

        let session = self.coordinator.session();
        if !session.is_connected()
            && let Err(e) = session.connect(&self.config.address).await
        {
            debug!(error = %e, "printer not reachable");
            return TickOutcome::ConnectFailed(e);
        }

        if let Err(e) = session.heartbeat(self.config.heartbeat_timeout).await {
            warn!(error = %e, "heartbeat failed, skipping auto print");
            return TickOutcome::HeartbeatFailed(e);
        }

        let label = date_label(today);
        info!(label = %label, "auto printing date label");
        match self
            .coordinator
            .print(
                LabelContent::Text(label),
                &self.config.options,
                &CancelToken::new(),
            )
            .await
        {
            PrintResult::Success { job_id, .. } => {
                self.last_printed.send_replace(Some(today));
                TickOutcome::Printed(job_id)
            }
            PrintResult::Failure { reason, .. } => TickOutcome::PrintFailed(reason),
        }
    }

    /// Check every interval, forever. Abort the task to stop.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(every = ?self.config.interval, address = %self.config.address, "auto print started");

        loop {
            interval.tick().await;
            self.tick().await;
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
