//! # Print Jobs
//!
//! [`PrintJobCoordinator`] turns one label into a complete print on the
//! device, through the shared [`PrinterSession`].
//!
//! ## Job Pipeline
//!
//! ```text
//! resolve width ──► render/rasterize ──► encode rows ──► begin ──► rows ──► finalize
//!  (RFID, cache,      (Pending →           (pure)        density    0..N-1   end page
//!   cloud lookup)      Rasterized)                       type       in order end print
//!                                                        start      (retry)  (poll)
//!                                                        page
//!                                                        dimension
//! ```
//!
//! Everything up to "begin" sends no print commands, so width, size and
//! encoding failures never leave the printer mid-page.
//!
//! ## Job States
//!
//! `Pending → Rasterized → Sending → Completed | Failed(reason)`. The current
//! job's progress is published on a `watch` channel.
//!
//! ## Cancellation
//!
//! A [`CancelToken`] is checked before each row. The row in flight always
//! finishes (response or timeout), so a cancelled job leaves no partial frame
//! on the wire and the session stays connected.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use image::DynamicImage;
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::PrinterConfig;
use super::session::PrinterSession;
use crate::error::{RasterError, SessionError};
use crate::protocol::row::{RowPayload, encode_rows};
use crate::render::raster::{self, MonoRow};
use crate::render::text::{BitmapFontRenderer, LabelRenderer};
use crate::width::WidthResolver;

// ============================================================================
// JOB TYPES
// ============================================================================

/// What to print.
#[derive(Debug, Clone)]
pub enum LabelContent {
    /// Rendered with the coordinator's [`LabelRenderer`]
    Text(String),
    /// Resampled to the label size
    Bitmap(DynamicImage),
}

/// Per-job choices.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    /// Label code to resolve the width from
    pub barcode: Option<String>,

    /// Read the label code from the loaded roll's RFID tag
    pub query_label: bool,

    /// Label height in rows (defaults to the printer's)
    pub height: Option<u32>,
}

/// Timing and retry policy shared by all jobs.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub printer: PrinterConfig,

    /// Timeout for setup and finalize commands
    pub command_timeout: Duration,

    /// Timeout for each row acknowledgement
    pub row_timeout: Duration,

    /// Extra attempts for a row that timed out or came back corrupt
    pub row_retries: u32,

    /// End-print polls before giving up on the device finishing
    pub finalize_attempts: u32,

    /// Pause between end-print polls
    pub finalize_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            printer: PrinterConfig::default(),
            command_timeout: Duration::from_secs(2),
            row_timeout: Duration::from_secs(1),
            row_retries: 2,
            finalize_attempts: 10,
            finalize_interval: Duration::from_millis(200),
        }
    }
}

/// Why a job ended without printing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobFailure {
    #[error("label width could not be resolved: {0}")]
    WidthUnresolved(String),

    #[error("invalid label dimensions")]
    InvalidDimensions,

    #[error("row encoding failed: {0}")]
    Encode(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("print job cancelled")]
    Cancelled,
}

impl From<RasterError> for JobFailure {
    fn from(e: RasterError) -> Self {
        match e {
            RasterError::InvalidDimensions { .. } => JobFailure::InvalidDimensions,
            RasterError::Font(_) => JobFailure::Encode(e.to_string()),
        }
    }
}

/// Lifecycle of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Rasterized,
    Sending,
    Completed,
    Failed(JobFailure),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Rasterized => "rasterized",
            JobState::Sending => "sending",
            JobState::Completed => "completed",
            JobState::Failed(_) => "failed",
        }
    }
}

/// Terminal outcome of [`PrintJobCoordinator::print`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrintResult {
    Success { job_id: Uuid, rows: usize },
    Failure { job_id: Uuid, reason: JobFailure },
}

impl PrintResult {
    pub fn job_id(&self) -> Uuid {
        match self {
            PrintResult::Success { job_id, .. } | PrintResult::Failure { job_id, .. } => *job_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PrintResult::Success { .. })
    }
}

/// Snapshot of the most recent job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobProgress {
    pub job_id: Uuid,
    pub state: JobState,
    pub rows_sent: usize,
    pub rows_total: usize,
}

/// One print request, owned by the coordinator until it terminates.
#[derive(Debug)]
pub struct PrintJob {
    pub id: Uuid,
    pub content: LabelContent,
    pub resolved_width: u32,
    pub resolved_height: u32,
    pub rows: Vec<MonoRow>,
    pub state: JobState,
}

impl PrintJob {
    pub fn new(content: LabelContent) -> Self {
        Self {
            id: Uuid::new_v4(),
            content,
            resolved_width: 0,
            resolved_height: 0,
            rows: Vec::new(),
            state: JobState::Pending,
        }
    }

    /// Render (for text) and threshold the content at the resolved size.
    fn rasterize(
        &mut self,
        renderer: &dyn LabelRenderer,
        width: u32,
        height: u32,
    ) -> Result<(), JobFailure> {
        let rendered;
        let source = match &self.content {
            LabelContent::Text(text) => {
                rendered = renderer.render(text, width, height)?;
                &rendered
            }
            LabelContent::Bitmap(image) => image,
        };

        self.rows = raster::rasterize(source, width, height)?;
        self.resolved_width = width;
        self.resolved_height = height;
        self.state = JobState::Rasterized;
        Ok(())
    }
}

/// Cooperative cancellation flag for a job.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// COORDINATOR
// ============================================================================

/// # Print Job Coordinator
///
/// Jobs run one at a time, in arrival order: a second job waits until the
/// first reaches a terminal state, so their pages never interleave.
pub struct PrintJobCoordinator {
    session: Arc<PrinterSession>,
    resolver: Arc<dyn WidthResolver>,
    renderer: Arc<dyn LabelRenderer>,
    config: CoordinatorConfig,
    turn: Mutex<()>,
    progress: watch::Sender<Option<JobProgress>>,
}

impl PrintJobCoordinator {
    pub fn new(
        session: Arc<PrinterSession>,
        resolver: Arc<dyn WidthResolver>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            session,
            resolver,
            renderer: Arc::new(BitmapFontRenderer),
            config,
            turn: Mutex::new(()),
            progress: watch::channel(None).0,
        }
    }

    /// Replace the text renderer.
    pub fn with_renderer(mut self, renderer: Arc<dyn LabelRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn session(&self) -> &Arc<PrinterSession> {
        &self.session
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Watch the most recent job's progress.
    pub fn subscribe(&self) -> watch::Receiver<Option<JobProgress>> {
        self.progress.subscribe()
    }

    /// Run one job to a terminal state.
    pub async fn print(
        &self,
        content: LabelContent,
        options: &JobOptions,
        cancel: &CancelToken,
    ) -> PrintResult {
        let _turn = self.turn.lock().await;
        let mut job = PrintJob::new(content);
        info!(job_id = %job.id, "print job started");
        self.publish(&job, 0);

        match self.run(&mut job, options, cancel).await {
            Ok(()) => {
                job.state = JobState::Completed;
                self.publish(&job, job.rows.len());
                info!(job_id = %job.id, rows = job.rows.len(), "print job completed");
                PrintResult::Success {
                    job_id: job.id,
                    rows: job.rows.len(),
                }
            }
            Err(reason) => {
                warn!(job_id = %job.id, reason = %reason, "print job failed");
                job.state = JobState::Failed(reason.clone());
                let sent = self.progress.borrow().as_ref().map_or(0, |p| p.rows_sent);
                self.publish(&job, sent);
                PrintResult::Failure {
                    job_id: job.id,
                    reason,
                }
            }
        }
    }

    async fn run(
        &self,
        job: &mut PrintJob,
        options: &JobOptions,
        cancel: &CancelToken,
    ) -> Result<(), JobFailure> {
        let width = self.resolve_width(options).await?;
        let height = options
            .height
            .unwrap_or(self.config.printer.default_height_dots);
        let (Ok(width_u16), Ok(height_u16)) = (u16::try_from(width), u16::try_from(height)) else {
            return Err(JobFailure::InvalidDimensions);
        };

        job.rasterize(self.renderer.as_ref(), width, height)?;
        debug!(job_id = %job.id, width, height, "rasterized");
        self.publish(job, 0);

        let payloads = encode_rows(&job.rows).map_err(|e| JobFailure::Encode(e.to_string()))?;

        if cancel.is_cancelled() {
            return Err(JobFailure::Cancelled);
        }
        if !self.session.is_connected() {
            return Err(SessionError::NotConnected.into());
        }

        job.state = JobState::Sending;
        self.publish(job, 0);

        let sent = self
            .transmit(job, &payloads, height_u16, width_u16, cancel)
            .await;
        if sent.is_err() {
            self.abandon_page().await;
        }
        sent
    }

    /// Pick the label width in dots.
    async fn resolve_width(&self, options: &JobOptions) -> Result<u32, JobFailure> {
        let code = match &options.barcode {
            Some(code) => Some(code.clone()),
            None if options.query_label => self
                .session
                .get_device_status(self.config.command_timeout)
                .await
                .map_err(|e| {
                    if e.is_disconnect() {
                        JobFailure::Session(e)
                    } else {
                        JobFailure::WidthUnresolved(format!("label query failed: {}", e))
                    }
                })?
                .map(|info| info.barcode),
            None => None,
        };

        let Some(code) = code else {
            return Ok(self.config.printer.default_width_dots);
        };

        let mm = self
            .resolver
            .resolve_width(&code)
            .await
            .map_err(|e| JobFailure::WidthUnresolved(e.to_string()))?;
        let dots = self.config.printer.mm_to_dots(mm).ok_or_else(|| {
            JobFailure::WidthUnresolved(format!("label width {}mm out of range", mm))
        })?;
        debug!(code = %code, mm, dots, "label width resolved");
        Ok(dots)
    }

    async fn transmit(
        &self,
        job: &PrintJob,
        payloads: &[RowPayload],
        height: u16,
        width: u16,
        cancel: &CancelToken,
    ) -> Result<(), JobFailure> {
        let t = self.config.command_timeout;
        let printer = &self.config.printer;

        self.session.set_label_density(printer.density, t).await?;
        self.session.set_label_type(printer.label_type, t).await?;
        self.session.start_print(t).await?;
        self.session.start_page_print(t).await?;
        self.session.set_dimension(height, width, t).await?;

        for (sent, payload) in payloads.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(job_id = %job.id, row = payload.row_index, "print job cancelled");
                return Err(JobFailure::Cancelled);
            }
            self.send_row(payload).await?;
            self.publish(job, sent + 1);
        }

        self.finalize(job).await
    }

    /// Send one row, retrying timeouts and corrupt acknowledgements.
    async fn send_row(&self, payload: &RowPayload) -> Result<(), SessionError> {
        let mut attempt = 0;
        loop {
            match self
                .session
                .print_row(payload, self.config.row_timeout)
                .await
            {
                Ok(()) => return Ok(()),
                Err(e)
                    if attempt < self.config.row_retries
                        && is_retryable(&e)
                        && self.session.is_connected() =>
                {
                    attempt += 1;
                    warn!(row = payload.row_index, attempt, error = %e, "row failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn finalize(&self, job: &PrintJob) -> Result<(), JobFailure> {
        let t = self.config.command_timeout;
        self.session.end_page_print(t).await?;

        let attempts = self.config.finalize_attempts.max(1);
        for attempt in 1..=attempts {
            if self.session.end_print(t).await? {
                return Ok(());
            }
            debug!(job_id = %job.id, attempt, "printer still busy");
            if attempt < attempts {
                tokio::time::sleep(self.config.finalize_interval).await;
            }
        }

        warn!(job_id = %job.id, attempts, "printer never reported the print finished");
        Err(SessionError::Timeout(self.config.finalize_interval * attempts).into())
    }

    /// Best-effort end of a print that failed after it began.
    async fn abandon_page(&self) {
        if !self.session.is_connected() {
            return;
        }
        if let Err(e) = self.session.end_print(self.config.command_timeout).await {
            debug!(error = %e, "end print after failure did not complete");
        }
    }

    fn publish(&self, job: &PrintJob, rows_sent: usize) {
        self.progress.send_replace(Some(JobProgress {
            job_id: job.id,
            state: job.state.clone(),
            rows_sent,
            rows_total: job.rows.len(),
        }));
    }
}

fn is_retryable(error: &SessionError) -> bool {
    matches!(
        error,
        SessionError::Timeout(_) | SessionError::Corrupt(_) | SessionError::Unexpected { .. }
    )
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WidthError;
    use crate::printer::session::{SessionConfig, SessionState};
    use crate::protocol::commands::{Command, RESPONSE_ERROR, RfidInfo};
    use crate::protocol::packet::Packet;
    use crate::transport::loopback::{LoopbackConnector, LoopbackDevice, Reply};
    use crate::width::FixedWidth;
    use async_trait::async_trait;
    use image::{GrayImage, Luma};

    struct FailingResolver;

    #[async_trait]
    impl WidthResolver for FailingResolver {
        async fn resolve_width(&self, code: &str) -> Result<u32, WidthError> {
            Err(WidthError::NotFound(code.to_string()))
        }
    }

    fn black(width: u32, height: u32) -> LabelContent {
        LabelContent::Bitmap(DynamicImage::ImageLuma8(GrayImage::from_pixel(
            width,
            height,
            Luma([0]),
        )))
    }

    fn fast_config() -> CoordinatorConfig {
        CoordinatorConfig {
            command_timeout: Duration::from_millis(200),
            row_timeout: Duration::from_millis(100),
            finalize_interval: Duration::from_millis(10),
            ..CoordinatorConfig::default()
        }
    }

    async fn setup(resolver: Arc<dyn WidthResolver>) -> (PrintJobCoordinator, LoopbackDevice) {
        let device = LoopbackDevice::new();
        let session = Arc::new(PrinterSession::new(
            LoopbackConnector::new(device.clone()),
            SessionConfig::default(),
        ));
        session.connect("loopback").await.unwrap();
        (
            PrintJobCoordinator::new(session, resolver, fast_config()),
            device,
        )
    }

    const BEGIN: [u8; 5] = [0x21, 0x23, 0x01, 0x03, 0x13];

    // ========== Happy path ==========

    #[tokio::test]
    async fn test_command_order() {
        let (coordinator, device) = setup(Arc::new(FixedWidth(12))).await;
        let result = coordinator
            .print(black(240, 96), &JobOptions::default(), &CancelToken::new())
            .await;
        assert!(matches!(result, PrintResult::Success { rows: 96, .. }));

        let commands = device.commands();
        assert_eq!(&commands[..5], &BEGIN);
        assert!(commands[5..101].iter().all(|&c| c == 0x85));
        assert_eq!(&commands[101..], &[0xE3, 0xF3]);
        assert_eq!(device.row_indices(), (0..96).collect::<Vec<u16>>());
        // height 96, width 96
        assert_eq!(device.received()[4].payload, vec![0x00, 0x60, 0x00, 0x60]);
    }

    #[tokio::test]
    async fn test_barcode_resolves_width() {
        let (coordinator, device) = setup(Arc::new(FixedWidth(30))).await;
        let options = JobOptions {
            barcode: Some("6972842743596".to_string()),
            height: Some(40),
            ..JobOptions::default()
        };
        let result = coordinator
            .print(black(10, 10), &options, &CancelToken::new())
            .await;
        assert!(matches!(result, PrintResult::Success { rows: 40, .. }));
        assert_eq!(device.received()[4].payload, vec![0x00, 0x28, 0x00, 0xF0]);
        // 240 dots pack into 30 bytes after the 6-byte row header
        assert_eq!(device.received()[5].payload.len(), 36);
    }

    #[tokio::test]
    async fn test_query_label_reads_rfid() {
        let (coordinator, device) = setup(Arc::new(FixedWidth(15))).await;
        device.set_rfid(Some(RfidInfo {
            uuid: "881d2f3a0000a001".to_string(),
            barcode: "6975746631397".to_string(),
            serial: "S1".to_string(),
            used_len: 0,
            total_len: 100,
            label_type: 1,
        }));
        let options = JobOptions {
            query_label: true,
            ..JobOptions::default()
        };
        let result = coordinator
            .print(LabelContent::Text("Fri Oct 16".into()), &options, &CancelToken::new())
            .await;
        assert!(result.is_success());
        assert_eq!(device.commands()[0], 0x1A);
        assert_eq!(device.received()[5].payload, vec![0x00, 0x60, 0x00, 0x78]);
    }

    #[tokio::test]
    async fn test_finalize_polls_until_done() {
        let (coordinator, device) = setup(Arc::new(FixedWidth(12))).await;
        device.set_end_print_busy(3);
        let result = coordinator
            .print(black(8, 8), &JobOptions { height: Some(4), ..Default::default() }, &CancelToken::new())
            .await;
        assert!(result.is_success());
        let end_prints = device.commands().iter().filter(|&&c| c == 0xF3).count();
        assert_eq!(end_prints, 4);
    }

    #[tokio::test]
    async fn test_finalize_gives_up() {
        let (coordinator, device) = setup(Arc::new(FixedWidth(12))).await;
        device.set_end_print_busy(100);
        let result = coordinator
            .print(black(8, 8), &JobOptions { height: Some(2), ..Default::default() }, &CancelToken::new())
            .await;
        assert!(matches!(
            result,
            PrintResult::Failure { reason: JobFailure::Session(SessionError::Timeout(_)), .. }
        ));
        assert!(coordinator.session().is_connected());
    }

    // ========== Failures before sending ==========

    #[tokio::test]
    async fn test_width_failure_sends_nothing() {
        let (coordinator, device) = setup(Arc::new(FailingResolver)).await;
        let options = JobOptions {
            barcode: Some("unknown".to_string()),
            ..JobOptions::default()
        };
        let result = coordinator
            .print(black(240, 96), &options, &CancelToken::new())
            .await;
        assert!(matches!(
            result,
            PrintResult::Failure { reason: JobFailure::WidthUnresolved(_), .. }
        ));
        assert!(device.raw_bytes().is_empty());
    }

    #[tokio::test]
    async fn test_width_overflow_is_unresolved() {
        let (coordinator, device) = setup(Arc::new(FixedWidth(u32::MAX))).await;
        let options = JobOptions {
            barcode: Some("6972842743596".to_string()),
            ..JobOptions::default()
        };
        let result = coordinator
            .print(black(240, 96), &options, &CancelToken::new())
            .await;
        assert!(matches!(
            result,
            PrintResult::Failure { reason: JobFailure::WidthUnresolved(_), .. }
        ));
        assert!(device.raw_bytes().is_empty());
    }

    #[tokio::test]
    async fn test_label_query_failure_is_unresolved() {
        let (coordinator, device) = setup(Arc::new(FixedWidth(12))).await;
        device.script(
            Command::GetRfid,
            Reply::Packet(Packet::new(RESPONSE_ERROR, vec![0x01]).unwrap()),
        );
        let options = JobOptions {
            query_label: true,
            ..JobOptions::default()
        };
        let result = coordinator
            .print(black(8, 8), &options, &CancelToken::new())
            .await;
        assert!(matches!(
            result,
            PrintResult::Failure { reason: JobFailure::WidthUnresolved(_), .. }
        ));
        // only the label query went out
        assert_eq!(device.commands(), vec![Command::GetRfid.id()]);
        assert!(coordinator.session().is_connected());
    }

    #[tokio::test]
    async fn test_label_query_while_disconnected() {
        let (coordinator, _device) = setup(Arc::new(FixedWidth(12))).await;
        coordinator.session().disconnect().await;
        let options = JobOptions {
            query_label: true,
            ..JobOptions::default()
        };
        let result = coordinator
            .print(black(8, 8), &options, &CancelToken::new())
            .await;
        assert!(matches!(
            result,
            PrintResult::Failure { reason: JobFailure::Session(SessionError::NotConnected), .. }
        ));
    }

    #[test]
    fn test_font_error_is_encode_failure() {
        let failure = JobFailure::from(RasterError::Font("spleen 6x12 glyph table".into()));
        assert_eq!(
            failure,
            JobFailure::Encode("unreadable font: spleen 6x12 glyph table".to_string())
        );
        assert_eq!(
            JobFailure::from(RasterError::InvalidDimensions { width: 0, height: 1 }),
            JobFailure::InvalidDimensions
        );
    }

    #[tokio::test]
    async fn test_zero_height_is_invalid() {
        let (coordinator, device) = setup(Arc::new(FixedWidth(12))).await;
        let options = JobOptions {
            height: Some(0),
            ..JobOptions::default()
        };
        let result = coordinator
            .print(black(8, 8), &options, &CancelToken::new())
            .await;
        assert!(matches!(
            result,
            PrintResult::Failure { reason: JobFailure::InvalidDimensions, .. }
        ));
        assert!(device.raw_bytes().is_empty());
    }

    #[tokio::test]
    async fn test_row_too_wide_is_encode_failure() {
        // 300mm at 8 dots/mm is wider than a row payload can carry
        let (coordinator, device) = setup(Arc::new(FixedWidth(300))).await;
        let options = JobOptions {
            barcode: Some("wide".to_string()),
            height: Some(2),
            ..JobOptions::default()
        };
        let result = coordinator
            .print(black(8, 8), &options, &CancelToken::new())
            .await;
        assert!(matches!(
            result,
            PrintResult::Failure { reason: JobFailure::Encode(_), .. }
        ));
        assert!(device.raw_bytes().is_empty());
    }

    #[tokio::test]
    async fn test_not_connected() {
        let (coordinator, device) = setup(Arc::new(FixedWidth(12))).await;
        coordinator.session().disconnect().await;
        let result = coordinator
            .print(black(8, 8), &JobOptions::default(), &CancelToken::new())
            .await;
        assert_eq!(
            result,
            PrintResult::Failure {
                job_id: result.job_id(),
                reason: JobFailure::Session(SessionError::NotConnected),
            }
        );
        assert!(device.raw_bytes().is_empty());
    }

    // ========== Rows ==========

    #[tokio::test(start_paused = true)]
    async fn test_row_retry_recovers() {
        let (coordinator, device) = setup(Arc::new(FixedWidth(12))).await;
        device.script(Command::PrintBitmapRow, Reply::Ack(true));
        device.script(Command::PrintBitmapRow, Reply::Silent);
        let result = coordinator
            .print(black(8, 8), &JobOptions { height: Some(3), ..Default::default() }, &CancelToken::new())
            .await;
        assert!(result.is_success());
        assert_eq!(device.row_indices(), vec![0, 1, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_row_retries_exhausted() {
        let (coordinator, device) = setup(Arc::new(FixedWidth(12))).await;
        for _ in 0..3 {
            device.script(Command::PrintBitmapRow, Reply::Silent);
        }
        let result = coordinator
            .print(black(8, 8), &JobOptions { height: Some(3), ..Default::default() }, &CancelToken::new())
            .await;
        assert!(matches!(
            result,
            PrintResult::Failure { reason: JobFailure::Session(SessionError::Timeout(_)), .. }
        ));
        // three straight timeouts trip the session's failure limit
        assert_eq!(device.row_indices(), vec![0, 0, 0]);
        assert_eq!(coordinator.session().state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_mid_job() {
        let (coordinator, device) = setup(Arc::new(FixedWidth(12))).await;
        device.script(Command::PrintBitmapRow, Reply::Ack(true));
        device.script(Command::PrintBitmapRow, Reply::Hangup);
        let result = coordinator
            .print(black(8, 8), &JobOptions { height: Some(5), ..Default::default() }, &CancelToken::new())
            .await;
        assert!(matches!(
            result,
            PrintResult::Failure { reason: JobFailure::Session(SessionError::ChannelClosed(_)), .. }
        ));
        assert_eq!(device.row_indices(), vec![0, 1]);
    }

    // ========== Cancellation ==========

    #[tokio::test]
    async fn test_cancel_before_start() {
        let (coordinator, device) = setup(Arc::new(FixedWidth(12))).await;
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = coordinator
            .print(black(8, 8), &JobOptions::default(), &cancel)
            .await;
        assert!(matches!(
            result,
            PrintResult::Failure { reason: JobFailure::Cancelled, .. }
        ));
        assert!(device.raw_bytes().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_between_rows() {
        let (coordinator, device) = setup(Arc::new(FixedWidth(12))).await;
        let coordinator = Arc::new(coordinator);
        let cancel = CancelToken::new();
        let mut requests = device.subscribe_requests();

        let job = {
            let coordinator = coordinator.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                coordinator
                    .print(black(96, 96), &JobOptions::default(), &cancel)
                    .await
            })
        };

        // five setup commands, then cancel once row 10 has been sent
        requests.wait_for(|&n| n >= 5 + 10).await.unwrap();
        cancel.cancel();
        let result = job.await.unwrap();

        assert!(matches!(
            result,
            PrintResult::Failure { reason: JobFailure::Cancelled, .. }
        ));
        let rows = device.row_indices();
        assert!(rows.len() >= 10 && rows.len() < 96);
        assert_eq!(rows, (0..rows.len() as u16).collect::<Vec<_>>());
        assert_eq!(device.commands().last(), Some(&0xF3));
        assert_eq!(coordinator.session().state(), SessionState::Connected);
    }

    // ========== Progress ==========

    #[tokio::test]
    async fn test_progress_snapshot() {
        let (coordinator, _device) = setup(Arc::new(FixedWidth(12))).await;
        let progress = coordinator.subscribe();
        assert!(progress.borrow().is_none());

        let result = coordinator
            .print(black(8, 8), &JobOptions { height: Some(6), ..Default::default() }, &CancelToken::new())
            .await;
        let snapshot = progress.borrow().clone().unwrap();
        assert_eq!(snapshot.job_id, result.job_id());
        assert_eq!(snapshot.state, JobState::Completed);
        assert_eq!((snapshot.rows_sent, snapshot.rows_total), (6, 6));
    }

    #[tokio::test]
    async fn test_jobs_do_not_interleave() {
        let (coordinator, device) = setup(Arc::new(FixedWidth(12))).await;
        let coordinator = Arc::new(coordinator);
        let a = {
            let c = coordinator.clone();
            tokio::spawn(async move {
                c.print(black(8, 8), &JobOptions { height: Some(4), ..Default::default() }, &CancelToken::new())
                    .await
            })
        };
        let b = {
            let c = coordinator.clone();
            tokio::spawn(async move {
                c.print(black(8, 8), &JobOptions { height: Some(4), ..Default::default() }, &CancelToken::new())
                    .await
            })
        };
        assert!(a.await.unwrap().is_success());
        assert!(b.await.unwrap().is_success());

        let job: Vec<u8> = BEGIN
            .iter()
            .copied()
            .chain([0x85; 4])
            .chain([0xE3, 0xF3])
            .collect();
        assert_eq!(device.commands(), [job.clone(), job].concat());
        assert_eq!(device.row_indices(), vec![0, 1, 2, 3, 0, 1, 2, 3]);
    }
}
