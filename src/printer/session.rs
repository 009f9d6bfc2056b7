//! # Printer Session
//!
//! The single owner of the connection to one printer. Every command from
//! every task (interactive prints, the auto-print poller, status queries)
//! goes through one [`PrinterSession`].
//!
//! ## State Machine
//!
//! ```text
//!                 connect()                 channel opened
//! Disconnected ─────────────► Connecting ─────────────────► Connected
//!      ▲                          │                             │
//!      │      connect error       │                             │
//!      ├──────────────────────────┘                             │
//!      │   disconnect(), I/O error, end of stream,              │
//!      └──── torn write, too many consecutive failures ─────────┘
//! ```
//!
//! There is no implicit reconnection: callers watch [`SessionState`] and call
//! [`PrinterSession::connect`] again.
//!
//! ## Single Flight
//!
//! An exchange (write request, read until its response or deadline) runs
//! under an async FIFO mutex, so waiting callers queue in arrival order and
//! bytes of two commands never interleave on the wire.
//!
//! ## Failure Handling
//!
//! | Event | Command result | Session |
//! |-------|----------------|---------|
//! | read/write I/O error, end of stream | `ChannelClosed` | disconnected |
//! | write not finished by the deadline | `Timeout` | disconnected |
//! | future dropped mid-write | (none) | disconnected |
//! | no response by the deadline | `Timeout` | stays, counts a failure |
//! | corrupt response | `Corrupt` | stays, counts a failure |
//! | device error packet | `Unexpected` | stays |
//! | packet answering another request | (skipped) | stays |
//!
//! After a corrupt frame the session keeps reading until the deadline, since
//! the device may resend. A header marker that turns out to be noise (its
//! frame never completes or fails to decode while a valid frame follows it)
//! is skipped so the real response is not swallowed. `max_consecutive_failures` failures in a row (any
//! good response resets the count) force a disconnect.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{CodecError, ConnectError, SessionError};
use crate::protocol::commands::{
    self, Command, HeartbeatStatus, QUERY, RESPONSE_ERROR, RESPONSE_UNSUPPORTED, RfidInfo,
};
use crate::protocol::packet::{self, Packet};
use crate::protocol::row::RowPayload;
use crate::transport::{Channel, Connector};

/// Connection lifecycle as observed from outside the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Timeouts and corrupt responses tolerated in a row before disconnecting
    pub max_consecutive_failures: u32,

    /// Bytes requested per channel read
    pub read_chunk: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            read_chunk: 512,
        }
    }
}

/// Everything guarded by the single-flight lock.
#[derive(Default)]
struct Link {
    channel: Option<Box<dyn Channel>>,
    rx: Vec<u8>,
    address: Option<String>,
    last_activity: Option<Instant>,
    consecutive_failures: u32,
}

/// Publishes `Disconnected` if dropped before [`disarm`](Self::disarm).
///
/// Armed across every await that could leave the link half-used, so a
/// cancelled caller can never leave the session `Connected` with a torn
/// frame on the wire.
struct DisconnectOnDrop<'a> {
    state: &'a watch::Sender<SessionState>,
    armed: bool,
}

impl<'a> DisconnectOnDrop<'a> {
    fn new(state: &'a watch::Sender<SessionState>) -> Self {
        Self { state, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for DisconnectOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.send_replace(SessionState::Disconnected);
        }
    }
}

/// How a decoded packet relates to the request in flight.
enum Received {
    Response(Packet),
    DeviceError(Packet),
    Stale(Packet),
}

/// # Printer Session
///
/// Share it behind an `Arc`; all methods take `&self`.
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use std::time::Duration;
/// use labelwire::printer::{PrinterSession, SessionConfig, SessionState};
/// use labelwire::transport::{LoopbackConnector, LoopbackDevice};
///
/// let session = PrinterSession::new(
///     LoopbackConnector::new(LoopbackDevice::new()),
///     SessionConfig::default(),
/// );
/// session.connect("03:00:00:12:34:56").await.unwrap();
/// assert_eq!(session.state(), SessionState::Connected);
///
/// let status = session.get_device_status(Duration::from_secs(2)).await.unwrap();
/// assert!(status.is_none()); // no label roll loaded
///
/// session.disconnect().await;
/// assert_eq!(session.state(), SessionState::Disconnected);
/// # }
/// ```
pub struct PrinterSession {
    connector: Box<dyn Connector>,
    config: SessionConfig,
    link: Mutex<Link>,
    state: watch::Sender<SessionState>,
}

impl PrinterSession {
    pub fn new(connector: impl Connector + 'static, config: SessionConfig) -> Self {
        Self {
            connector: Box::new(connector),
            config,
            link: Mutex::new(Link::default()),
            state: watch::channel(SessionState::Disconnected).0,
        }
    }

    /// Current state snapshot.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receive every state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Time of the last good response. Waits for any exchange in flight.
    pub async fn last_activity(&self) -> Option<Instant> {
        self.link.lock().await.last_activity
    }

    /// Address of the current (or last) connection.
    pub async fn address(&self) -> Option<String> {
        self.link.lock().await.address.clone()
    }

    // ========================================================================
    // CONNECTION LIFECYCLE
    // ========================================================================

    /// Open the channel. A no-op when already connected.
    pub async fn connect(&self, address: &str) -> Result<(), ConnectError> {
        let mut link = self.link.lock().await;
        if self.live(&mut link) {
            return Ok(());
        }

        info!(address, "connecting to printer");
        self.state.send_replace(SessionState::Connecting);
        let guard = DisconnectOnDrop::new(&self.state);
        let result = self.connector.connect(address).await;
        guard.disarm();

        match result {
            Ok(channel) => {
                *link = Link {
                    channel: Some(channel),
                    address: Some(address.to_string()),
                    last_activity: Some(Instant::now()),
                    ..Link::default()
                };
                self.state.send_replace(SessionState::Connected);
                info!(address, "printer connected");
                Ok(())
            }
            Err(e) => {
                self.state.send_replace(SessionState::Disconnected);
                warn!(address, error = %e, "connect failed");
                Err(e)
            }
        }
    }

    /// Close the channel. Idempotent; waits for an exchange in flight.
    pub async fn disconnect(&self) {
        let mut link = self.link.lock().await;
        self.close_link(&mut link, "disconnect requested").await;
    }

    /// True if the link holds a channel the published state still trusts.
    /// Drops a channel abandoned by a cancelled caller.
    fn live(&self, link: &mut Link) -> bool {
        if self.state() == SessionState::Connected && link.channel.is_some() {
            return true;
        }
        if link.channel.take().is_some() {
            debug!("dropping abandoned channel");
            link.rx.clear();
        }
        false
    }

    async fn close_link(&self, link: &mut Link, reason: &str) {
        if let Some(mut channel) = link.channel.take() {
            if let Err(e) = channel.close().await {
                debug!(error = %e, "error while closing channel");
            }
            info!(reason, "printer disconnected");
        }
        link.rx.clear();
        link.consecutive_failures = 0;
        self.state.send_replace(SessionState::Disconnected);
    }

    /// Count a timeout or corrupt response. Returns true if this disconnected.
    async fn record_failure(&self, link: &mut Link) -> bool {
        link.consecutive_failures += 1;
        if link.consecutive_failures >= self.config.max_consecutive_failures {
            warn!(
                failures = link.consecutive_failures,
                "too many consecutive failures, dropping connection"
            );
            self.close_link(link, "consecutive failure limit").await;
            return true;
        }
        false
    }

    // ========================================================================
    // COMMAND EXCHANGE
    // ========================================================================

    /// Send one command and wait for its response.
    ///
    /// The response is the first valid packet carrying the command's
    /// response code. Commands without one take any packet that does not
    /// answer another known request.
    pub async fn send_command(
        &self,
        command: Command,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Packet, SessionError> {
        let frame = packet::encode(command.id(), payload).map_err(SessionError::Encode)?;

        let mut link = self.link.lock().await;
        if !self.live(&mut link) {
            return Err(SessionError::NotConnected);
        }
        let deadline = Instant::now() + timeout;

        if !link.rx.is_empty() {
            debug!(bytes = link.rx.len(), "discarding stale receive bytes");
            link.rx.clear();
        }

        debug!(command = ?command, len = payload.len(), "tx");
        let written = {
            let guard = DisconnectOnDrop::new(&self.state);
            let Some(channel) = link.channel.as_mut() else {
                guard.disarm();
                return Err(SessionError::NotConnected);
            };
            let result = tokio::time::timeout_at(deadline, channel.write_all(&frame)).await;
            guard.disarm();
            result
        };
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.close_link(&mut link, "write failed").await;
                return Err(SessionError::ChannelClosed(e.to_string()));
            }
            Err(_) => {
                self.close_link(&mut link, "write timed out").await;
                return Err(SessionError::Timeout(timeout));
            }
        }

        self.await_response(&mut link, command, deadline, timeout).await
    }

    async fn await_response(
        &self,
        link: &mut Link,
        command: Command,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<Packet, SessionError> {
        let mut buf = vec![0u8; self.config.read_chunk.max(packet::OVERHEAD)];
        let mut last_corrupt: Option<CodecError> = None;

        loop {
            while let Some(frame) = take_frame(&mut link.rx) {
                let decoded = match packet::decode(&frame) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(command = ?command, error = %e, "corrupt response");
                        if self.record_failure(link).await {
                            return Err(SessionError::Corrupt(e));
                        }
                        last_corrupt = Some(e);
                        continue;
                    }
                };

                match classify(command, decoded) {
                    Received::Response(p) => {
                        debug!(command = format_args!("0x{:02x}", p.command), len = p.payload.len(), "rx");
                        link.consecutive_failures = 0;
                        link.last_activity = Some(Instant::now());
                        return Ok(p);
                    }
                    Received::DeviceError(p) => {
                        link.consecutive_failures = 0;
                        link.last_activity = Some(Instant::now());
                        return Err(SessionError::Unexpected {
                            command: command.id(),
                            detail: format!(
                                "device answered 0x{:02x} {:02x?}",
                                p.command, p.payload
                            ),
                        });
                    }
                    Received::Stale(p) => {
                        warn!(
                            command = ?command,
                            got = format_args!("0x{:02x}", p.command),
                            "skipping packet for another request"
                        );
                    }
                }
            }

            let Some(channel) = link.channel.as_mut() else {
                return Err(SessionError::NotConnected);
            };
            match tokio::time::timeout_at(deadline, channel.read(&mut buf)).await {
                Ok(Ok(0)) => {
                    self.close_link(link, "end of stream").await;
                    return Err(SessionError::ChannelClosed("end of stream".to_string()));
                }
                Ok(Ok(n)) => link.rx.extend_from_slice(&buf[..n]),
                Ok(Err(e)) => {
                    self.close_link(link, "read failed").await;
                    return Err(SessionError::ChannelClosed(e.to_string()));
                }
                Err(_) => {
                    return Err(match last_corrupt {
                        // already counted when the frame arrived
                        Some(e) => SessionError::Corrupt(e),
                        None => {
                            warn!(command = ?command, ?timeout, "response timed out");
                            self.record_failure(link).await;
                            SessionError::Timeout(timeout)
                        }
                    });
                }
            }
        }
    }

    /// Send a command whose response is a one-byte boolean ack.
    async fn acknowledged(
        &self,
        command: Command,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<(), SessionError> {
        let response = self.send_command(command, payload, timeout).await?;
        if response.is_ack() {
            Ok(())
        } else {
            Err(SessionError::Rejected(command.id()))
        }
    }

    // ========================================================================
    // COMMANDS
    // ========================================================================

    /// Transmit one bitmap row.
    pub async fn print_row(&self, row: &RowPayload, timeout: Duration) -> Result<(), SessionError> {
        self.send_command(Command::PrintBitmapRow, &row.to_bytes(), timeout)
            .await
            .map(|_| ())
    }

    /// Read the loaded label's RFID tag. `None` when no tag is readable.
    pub async fn get_device_status(
        &self,
        timeout: Duration,
    ) -> Result<Option<RfidInfo>, SessionError> {
        let response = self.send_command(Command::GetRfid, &QUERY, timeout).await?;
        commands::parse_rfid(&response.payload).map_err(|detail| SessionError::Unexpected {
            command: Command::GetRfid.id(),
            detail,
        })
    }

    /// Liveness probe.
    pub async fn heartbeat(&self, timeout: Duration) -> Result<HeartbeatStatus, SessionError> {
        let response = self.send_command(Command::Heartbeat, &QUERY, timeout).await?;
        Ok(commands::parse_heartbeat(&response.payload))
    }

    pub async fn set_label_density(&self, density: u8, timeout: Duration) -> Result<(), SessionError> {
        self.acknowledged(
            Command::SetLabelDensity,
            &commands::set_label_density(density),
            timeout,
        )
        .await
    }

    pub async fn set_label_type(&self, label_type: u8, timeout: Duration) -> Result<(), SessionError> {
        self.acknowledged(
            Command::SetLabelType,
            &commands::set_label_type(label_type),
            timeout,
        )
        .await
    }

    pub async fn start_print(&self, timeout: Duration) -> Result<(), SessionError> {
        self.acknowledged(Command::StartPrint, &QUERY, timeout).await
    }

    pub async fn start_page_print(&self, timeout: Duration) -> Result<(), SessionError> {
        self.acknowledged(Command::StartPagePrint, &QUERY, timeout).await
    }

    /// Announce the page size: `height` rows of `width` dots.
    pub async fn set_dimension(
        &self,
        height: u16,
        width: u16,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        self.acknowledged(
            Command::SetDimension,
            &commands::set_dimension(height, width),
            timeout,
        )
        .await
    }

    pub async fn end_page_print(&self, timeout: Duration) -> Result<(), SessionError> {
        self.acknowledged(Command::EndPagePrint, &QUERY, timeout).await
    }

    /// Close the print. `Ok(false)` means the device is still printing.
    pub async fn end_print(&self, timeout: Duration) -> Result<bool, SessionError> {
        let response = self.send_command(Command::EndPrint, &QUERY, timeout).await?;
        Ok(response.is_ack())
    }
}

fn classify(command: Command, packet: Packet) -> Received {
    if packet.command == RESPONSE_ERROR || packet.command == RESPONSE_UNSUPPORTED {
        return Received::DeviceError(packet);
    }
    match command.response_code() {
        Some(code) if code == packet.command => Received::Response(packet),
        Some(_) => Received::Stale(packet),
        // late answer to an earlier request that timed out
        None => match Command::answered_by(packet.command) {
            Some(other) if other != command => Received::Stale(packet),
            _ => Received::Response(packet),
        },
    }
}

/// Cut the next complete frame out of a receive buffer.
///
/// Bytes before a header marker are dropped. Returns `None` until a whole
/// frame (as announced by its length byte) is buffered. A leading frame that
/// is incomplete or invalid gives way to a valid frame buffered after it.
fn take_frame(rx: &mut Vec<u8>) -> Option<Vec<u8>> {
    match packet::find_header(rx) {
        Some(0) => {}
        Some(start) => {
            debug!(bytes = start, "skipping noise before header");
            rx.drain(..start);
        }
        None => {
            // keep a trailing 0x55, it may start the next header
            let keep = usize::from(rx.last() == Some(&packet::HEADER[0]));
            let drop_len = rx.len() - keep;
            if drop_len > 0 {
                debug!(bytes = drop_len, "skipping noise");
                rx.drain(..drop_len);
            }
            return None;
        }
    }

    let complete = packet::frame_len(rx).filter(|&len| rx.len() >= len);
    if let Some(len) = complete
        && packet::decode(&rx[..len]).is_ok()
    {
        return Some(rx.drain(..len).collect());
    }

    if let Some((start, len)) = later_frame(rx) {
        debug!(bytes = start, "resyncing past a false header");
        rx.drain(..start);
        return Some(rx.drain(..len).collect());
    }

    // hand back a corrupt frame so it is counted
    complete.map(|len| rx.drain(..len).collect())
}

/// Offset and length of the first valid frame starting after position 0.
fn later_frame(rx: &[u8]) -> Option<(usize, usize)> {
    let mut from = 1;
    while let Some(offset) = rx.get(from..).and_then(packet::find_header) {
        let start = from + offset;
        if let Some(len) = packet::frame_len(&rx[start..])
            && rx.len() - start >= len
            && packet::decode(&rx[start..start + len]).is_ok()
        {
            return Some((start, len));
        }
        from = start + 1;
    }
    None
}

// ============================================================================
// TESTS
// ============================================================================
