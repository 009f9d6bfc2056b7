//! # Loopback Printer
//!
//! An in-memory [`Channel`] backed by an emulated printer. Requests written
//! to the channel are decoded, recorded, and answered the way a real device
//! would answer them, unless a scripted [`Reply`] says otherwise.
//!
//! Used by the test suite and by `labelwire print --dry-run`.
//!
//! ## Example
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use std::time::Duration;
//! use labelwire::printer::{PrinterSession, SessionConfig};
//! use labelwire::transport::{LoopbackConnector, LoopbackDevice};
//!
//! let device = LoopbackDevice::new();
//! let session = PrinterSession::new(LoopbackConnector::new(device.clone()), SessionConfig::default());
//! session.connect("loopback").await.unwrap();
//! session.heartbeat(Duration::from_secs(1)).await.unwrap();
//!
//! assert_eq!(device.received().len(), 1);
//! # }
//! ```
//!
//! ## Default Answers
//!
//! | Request | Answer |
//! |---------|--------|
//! | Get RFID | configured tag, or `00` (no tag) |
//! | Heartbeat | 13-byte status, power level 4 |
//! | End print | `00` while "still printing" polls remain, then `01` |
//! | Print row | `01` on `0x86` |
//! | Anything else | `01` on the command's response code |

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;

use super::{Channel, Connector};
use crate::error::ConnectError;
use crate::protocol::commands::{Command, RfidInfo};
use crate::protocol::packet::{self, Packet};

/// Scripted answer to one request.
#[derive(Debug, Clone)]
pub enum Reply {
    /// One-byte boolean ack on the request's response code
    Ack(bool),
    /// Custom payload on the request's response code
    Payload(Vec<u8>),
    /// Arbitrary packet, regardless of the request
    Packet(Packet),
    /// Raw bytes, e.g. noise or a corrupted frame
    Raw(Vec<u8>),
    /// No answer at all
    Silent,
    /// Answer after a delay
    Delayed(Duration, Box<Reply>),
    /// Several answers back to back
    Sequence(Vec<Reply>),
    /// Close the stream; reads return end-of-stream
    Hangup,
}

impl Reply {
    /// A frame of `command`/`payload` with its first payload byte flipped, so
    /// the checksum fails.
    pub fn corrupt(command: u8, payload: &[u8]) -> Self {
        let mut bytes = packet::encode(command, payload).unwrap_or_default();
        if bytes.len() > packet::OVERHEAD {
            bytes[packet::PREFIX_LEN] ^= 0xFF;
        }
        Reply::Raw(bytes)
    }
}

#[derive(Debug, Default)]
struct DeviceState {
    received: Vec<Packet>,
    raw: Vec<u8>,
    scripted: HashMap<u8, VecDeque<Reply>>,
    rfid: Option<RfidInfo>,
    end_print_busy: u32,
    connect_error: Option<ConnectError>,
    fail_writes: bool,
    connections: u32,
}

/// Shared handle to the emulated printer.
#[derive(Debug, Clone)]
pub struct LoopbackDevice {
    state: Arc<Mutex<DeviceState>>,
    requests: Arc<watch::Sender<usize>>,
}

impl Default for LoopbackDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackDevice {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState::default())),
            requests: Arc::new(watch::channel(0).0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        // A panicking test thread must not hide the recorded traffic.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a scripted reply for the next `command` request.
    pub fn script(&self, command: Command, reply: Reply) {
        self.lock()
            .scripted
            .entry(command.id())
            .or_default()
            .push_back(reply);
    }

    /// Label tag reported by RFID queries.
    pub fn set_rfid(&self, rfid: Option<RfidInfo>) {
        self.lock().rfid = rfid;
    }

    /// Answer the next `polls` end-print requests with "still printing".
    pub fn set_end_print_busy(&self, polls: u32) {
        self.lock().end_print_busy = polls;
    }

    /// Refuse new connections with `error`.
    pub fn set_connect_error(&self, error: Option<ConnectError>) {
        self.lock().connect_error = error;
    }

    /// Make every write fail with a broken pipe.
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Every request decoded so far, in arrival order.
    pub fn received(&self) -> Vec<Packet> {
        self.lock().received.clone()
    }

    /// Every byte written so far.
    pub fn raw_bytes(&self) -> Vec<u8> {
        self.lock().raw.clone()
    }

    /// Commands of all decoded requests.
    pub fn commands(&self) -> Vec<u8> {
        self.lock().received.iter().map(|p| p.command).collect()
    }

    /// Row indices of all print-row requests, in arrival order.
    pub fn row_indices(&self) -> Vec<u16> {
        self.lock()
            .received
            .iter()
            .filter(|p| p.command == Command::PrintBitmapRow.id() && p.payload.len() >= 2)
            .map(|p| u16::from_be_bytes([p.payload[0], p.payload[1]]))
            .collect()
    }

    /// Number of successful connects.
    pub fn connections(&self) -> u32 {
        self.lock().connections
    }

    /// Watch the number of decoded requests.
    pub fn subscribe_requests(&self) -> watch::Receiver<usize> {
        self.requests.subscribe()
    }

    /// Record one request and decide the answer.
    fn handle(&self, request: Packet) -> Reply {
        let mut state = self.lock();
        state.received.push(request.clone());
        let count = state.received.len();

        let reply = match state
            .scripted
            .get_mut(&request.command)
            .and_then(VecDeque::pop_front)
        {
            Some(reply) => reply,
            None => default_reply(&mut state, &request),
        };
        drop(state);

        self.requests.send_replace(count);
        reply
    }
}

fn default_reply(state: &mut DeviceState, request: &Packet) -> Reply {
    match Command::from_id(request.command) {
        Some(Command::GetRfid) => match &state.rfid {
            Some(info) => Reply::Payload(rfid_payload(info)),
            None => Reply::Payload(vec![0x00]),
        },
        Some(Command::Heartbeat) => {
            Reply::Payload(vec![0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 4, 0, 1])
        }
        Some(Command::EndPrint) if state.end_print_busy > 0 => {
            state.end_print_busy -= 1;
            Reply::Ack(false)
        }
        _ => Reply::Ack(true),
    }
}

/// Serialize a tag the way the device reports it.
pub fn rfid_payload(info: &RfidInfo) -> Vec<u8> {
    let mut uuid = [0u8; 8];
    for (i, byte) in uuid.iter_mut().enumerate() {
        *byte = info
            .uuid
            .get(i * 2..i * 2 + 2)
            .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            .unwrap_or(0);
    }
    if uuid[0] == 0 {
        // a leading zero byte means "no tag" on the wire
        uuid[0] = 0x01;
    }

    let mut p = uuid.to_vec();
    p.push(info.barcode.len() as u8);
    p.extend(info.barcode.as_bytes());
    p.push(info.serial.len() as u8);
    p.extend(info.serial.as_bytes());
    p.extend(&info.total_len.to_be_bytes());
    p.extend(&info.used_len.to_be_bytes());
    p.push(info.label_type);
    p
}

/// Opens [`LoopbackChannel`]s onto one emulated device.
#[derive(Debug, Clone)]
pub struct LoopbackConnector {
    device: LoopbackDevice,
}

impl LoopbackConnector {
    pub fn new(device: LoopbackDevice) -> Self {
        Self { device }
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self, _address: &str) -> Result<Box<dyn Channel>, ConnectError> {
        let mut state = self.device.lock();
        if let Some(err) = &state.connect_error {
            return Err(err.clone());
        }
        state.connections += 1;
        drop(state);

        Ok(Box::new(LoopbackChannel {
            device: self.device.clone(),
            inbound: Vec::new(),
            outbound: VecDeque::new(),
            hangup_at: None,
        }))
    }
}

/// Bytes queued for the host, released at `ready_at`.
#[derive(Debug)]
struct Outgoing {
    ready_at: Instant,
    bytes: Vec<u8>,
}

/// One connection to a [`LoopbackDevice`].
#[derive(Debug)]
pub struct LoopbackChannel {
    device: LoopbackDevice,
    inbound: Vec<u8>,
    outbound: VecDeque<Outgoing>,
    hangup_at: Option<Instant>,
}

impl LoopbackChannel {
    fn queue(&mut self, reply: Reply, request: &Packet, at: Instant) {
        let respond = |payload: Vec<u8>| {
            let code = Command::from_id(request.command)
                .and_then(Command::response_code)
                .unwrap_or(request.command.wrapping_add(1));
            packet::encode(code, &payload).unwrap_or_default()
        };

        match reply {
            Reply::Ack(ok) => self.push(at, respond(vec![u8::from(ok)])),
            Reply::Payload(payload) => self.push(at, respond(payload)),
            Reply::Packet(p) => self.push(at, p.to_bytes().unwrap_or_default()),
            Reply::Raw(bytes) => self.push(at, bytes),
            Reply::Silent => {}
            Reply::Delayed(delay, inner) => self.queue(*inner, request, at + delay),
            Reply::Sequence(replies) => {
                for reply in replies {
                    self.queue(reply, request, at);
                }
            }
            Reply::Hangup => self.hangup_at = Some(at),
        }
    }

    fn push(&mut self, ready_at: Instant, bytes: Vec<u8>) {
        self.outbound.push_back(Outgoing { ready_at, bytes });
        self.outbound.make_contiguous().sort_by_key(|o| o.ready_at);
    }
}

#[async_trait]
impl Channel for LoopbackChannel {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        {
            let mut state = self.device.lock();
            if state.fail_writes {
                return Err(io::ErrorKind::BrokenPipe.into());
            }
            state.raw.extend_from_slice(data);
        }

        self.inbound.extend_from_slice(data);
        while let Some(start) = packet::find_header(&self.inbound) {
            self.inbound.drain(..start);
            let Some(len) = packet::frame_len(&self.inbound) else {
                break;
            };
            if self.inbound.len() < len {
                break;
            }
            let frame: Vec<u8> = self.inbound.drain(..len).collect();
            if let Ok(request) = packet::decode(&frame) {
                let reply = self.device.handle(request.clone());
                self.queue(reply, &request, Instant::now());
            }
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let next = self.outbound.front().map(|o| o.ready_at);
            match (next, self.hangup_at) {
                (Some(ready), hangup) if hangup.is_none_or(|h| ready <= h) => {
                    tokio::time::sleep_until(ready).await;
                    let Some(front) = self.outbound.front_mut() else {
                        continue;
                    };
                    let n = front.bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&front.bytes[..n]);
                    front.bytes.drain(..n);
                    if front.bytes.is_empty() {
                        self.outbound.pop_front();
                    }
                    if n > 0 {
                        return Ok(n);
                    }
                }
                (_, Some(hangup)) => {
                    tokio::time::sleep_until(hangup).await;
                    return Ok(0);
                }
                (None, None) => std::future::pending::<()>().await,
                (Some(_), None) => unreachable!("guard above always holds without a hangup"),
            }
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        self.outbound.clear();
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::commands::{parse_rfid, QUERY};

    async fn open(device: &LoopbackDevice) -> Box<dyn Channel> {
        LoopbackConnector::new(device.clone())
            .connect("loopback")
            .await
            .unwrap()
    }

    async fn read_frame(channel: &mut Box<dyn Channel>) -> Packet {
        let mut buf = vec![0u8; 300];
        let n = channel.read(&mut buf).await.unwrap();
        packet::decode(&buf[..n]).unwrap()
    }

    #[tokio::test]
    async fn test_default_ack() {
        let device = LoopbackDevice::new();
        let mut channel = open(&device).await;
        channel
            .write_all(&packet::encode(Command::StartPrint.id(), &QUERY).unwrap())
            .await
            .unwrap();
        let reply = read_frame(&mut channel).await;
        assert_eq!(reply.command, 0x02);
        assert_eq!(reply.payload, vec![0x01]);
        assert_eq!(device.commands(), vec![0x01]);
    }

    #[tokio::test]
    async fn test_split_writes_reassembled() {
        let device = LoopbackDevice::new();
        let mut channel = open(&device).await;
        let frame = packet::encode(Command::Heartbeat.id(), &QUERY).unwrap();
        channel.write_all(&frame[..3]).await.unwrap();
        assert!(device.received().is_empty());
        channel.write_all(&frame[3..]).await.unwrap();
        assert_eq!(device.commands(), vec![0xDC]);
    }

    #[tokio::test]
    async fn test_rfid_payload_parses_back() {
        let info = RfidInfo {
            uuid: "881d2f3a0000a001".to_string(),
            barcode: "6972842743596".to_string(),
            serial: "PZ1G3021".to_string(),
            used_len: 3,
            total_len: 160,
            label_type: 1,
        };
        assert_eq!(parse_rfid(&rfid_payload(&info)), Ok(Some(info)));
    }

    #[tokio::test]
    async fn test_connect_error() {
        let device = LoopbackDevice::new();
        device.set_connect_error(Some(ConnectError::NotPaired));
        let err = LoopbackConnector::new(device.clone())
            .connect("x")
            .await
            .err()
            .unwrap();
        assert_eq!(err, ConnectError::NotPaired);
        assert_eq!(device.connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_reply() {
        let device = LoopbackDevice::new();
        device.script(
            Command::Heartbeat,
            Reply::Delayed(Duration::from_millis(500), Box::new(Reply::Ack(true))),
        );
        let mut channel = open(&device).await;
        let start = Instant::now();
        channel
            .write_all(&packet::encode(Command::Heartbeat.id(), &QUERY).unwrap())
            .await
            .unwrap();
        read_frame(&mut channel).await;
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_hangup_reads_eof() {
        let device = LoopbackDevice::new();
        device.script(Command::Heartbeat, Reply::Hangup);
        let mut channel = open(&device).await;
        channel
            .write_all(&packet::encode(Command::Heartbeat.id(), &QUERY).unwrap())
            .await
            .unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(channel.read(&mut buf).await.unwrap(), 0);
    }
}
