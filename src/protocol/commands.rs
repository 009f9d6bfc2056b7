//! # Label Printer Command Set
//!
//! Command identifiers, request payload builders and response parsers for
//! Niimbot-style label printers.
//!
//! ## Request / Response Pairing
//!
//! Every request is answered by a packet carrying a different command byte.
//! The offset is fixed per command:
//!
//! | Command | Request | Response | Payload |
//! |---------|---------|----------|---------|
//! | Start print | `0x01` | `0x02` | `01` |
//! | Start page | `0x03` | `0x04` | `01` |
//! | Set dimension | `0x13` | `0x14` | `h:2 w:2` (big-endian) |
//! | Get RFID | `0x1A` | `0x1B` | `01` |
//! | Set label density | `0x21` | `0x31` | `n` |
//! | Set label type | `0x23` | `0x33` | `n` |
//! | Print bitmap row | `0x85` | any | row payload |
//! | Heartbeat | `0xDC` | `0xDD` | `01` |
//! | End page | `0xE3` | `0xE4` | `01` |
//! | End print | `0xF3` | `0xF4` | `01` |
//!
//! Two response codes are never valid answers:
//!
//! - `0xDB`: the device reports an error
//! - `0x00`: the device does not implement the request

// ============================================================================
// COMMAND IDENTIFIERS
// ============================================================================

/// Response code the device uses to report an error
pub const RESPONSE_ERROR: u8 = 0xDB;

/// Response code for unimplemented requests
pub const RESPONSE_UNSUPPORTED: u8 = 0x00;

/// Request commands understood by the printer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    StartPrint = 0x01,
    StartPagePrint = 0x03,
    SetDimension = 0x13,
    GetRfid = 0x1A,
    SetLabelDensity = 0x21,
    SetLabelType = 0x23,
    PrintBitmapRow = 0x85,
    Heartbeat = 0xDC,
    EndPagePrint = 0xE3,
    EndPrint = 0xF3,
}

impl Command {
    /// Every request the printer understands
    pub const ALL: [Command; 10] = [
        Command::StartPrint,
        Command::StartPagePrint,
        Command::SetDimension,
        Command::GetRfid,
        Command::SetLabelDensity,
        Command::SetLabelType,
        Command::PrintBitmapRow,
        Command::Heartbeat,
        Command::EndPagePrint,
        Command::EndPrint,
    ];

    /// Wire identifier
    #[inline]
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Command byte of the matching response.
    ///
    /// `None` means any well-formed packet acknowledges the request.
    pub fn response_code(self) -> Option<u8> {
        match self {
            Command::PrintBitmapRow => None,
            Command::SetLabelDensity | Command::SetLabelType => Some(self.id() + 0x10),
            other => Some(other.id() + 1),
        }
    }

    /// The request whose responses carry `code`, if any.
    ///
    /// ```
    /// use labelwire::protocol::Command;
    ///
    /// assert_eq!(Command::answered_by(0xDD), Some(Command::Heartbeat));
    /// assert_eq!(Command::answered_by(0x86), None);
    /// ```
    pub fn answered_by(code: u8) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.response_code() == Some(code))
    }

    /// Look up a command by its wire identifier.
    pub fn from_id(id: u8) -> Option<Self> {
        Some(match id {
            0x01 => Command::StartPrint,
            0x03 => Command::StartPagePrint,
            0x13 => Command::SetDimension,
            0x1A => Command::GetRfid,
            0x21 => Command::SetLabelDensity,
            0x23 => Command::SetLabelType,
            0x85 => Command::PrintBitmapRow,
            0xDC => Command::Heartbeat,
            0xE3 => Command::EndPagePrint,
            0xF3 => Command::EndPrint,
            _ => return None,
        })
    }
}

// ============================================================================
// REQUEST PAYLOADS
// ============================================================================

/// Payload for the parameterless requests (start/end print, RFID, heartbeat).
pub const QUERY: [u8; 1] = [0x01];

/// # Set Dimension (0x13)
///
/// Label height and width in dots, both big-endian `u16`. Height comes first.
///
/// ```
/// use labelwire::protocol::commands::set_dimension;
///
/// assert_eq!(set_dimension(96, 240), vec![0x00, 0x60, 0x00, 0xF0]);
/// ```
pub fn set_dimension(height: u16, width: u16) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4);
    payload.extend_from_slice(&height.to_be_bytes());
    payload.extend_from_slice(&width.to_be_bytes());
    payload
}

/// # Set Label Density (0x21)
///
/// Print darkness, 1 (lightest) to 5 (darkest). Values are clamped.
pub fn set_label_density(density: u8) -> Vec<u8> {
    vec![density.clamp(1, 5)]
}

/// # Set Label Type (0x23)
///
/// 1 = gap labels, 2 = black mark, 3 = continuous.
pub fn set_label_type(label_type: u8) -> Vec<u8> {
    vec![label_type.clamp(1, 3)]
}

// ============================================================================
// RESPONSE PARSERS
// ============================================================================

/// Metadata read from the RFID tag of the loaded label roll.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RfidInfo {
    /// Tag UUID as lowercase hex
    pub uuid: String,
    /// Roll barcode; identifies the label template (and its width)
    pub barcode: String,
    pub serial: String,
    pub used_len: u16,
    pub total_len: u16,
    pub label_type: u8,
}

/// Parse a `0x1B` RFID response.
///
/// ## Layout
///
/// ```text
/// uuid:8 | barcode_len:1 | barcode | serial_len:1 | serial | total:2 | used:2 | type:1
/// ```
///
/// Returns `Ok(None)` when the first byte is zero (no tag readable) and
/// `Err` with a description when the payload is truncated.
pub fn parse_rfid(payload: &[u8]) -> Result<Option<RfidInfo>, String> {
    match payload.first() {
        None | Some(0) => return Ok(None),
        Some(_) => {}
    }

    let mut cursor = Cursor::new(payload);
    let uuid = cursor
        .take(8)?
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>();
    let barcode = cursor.take_string()?;
    let serial = cursor.take_string()?;
    let total_len = cursor.take_u16()?;
    let used_len = cursor.take_u16()?;
    let label_type = cursor.take(1)?[0];

    Ok(Some(RfidInfo {
        uuid,
        barcode,
        serial,
        used_len,
        total_len,
        label_type,
    }))
}

/// Device state reported by a heartbeat.
///
/// Firmware revisions answer with different payload lengths, so each field
/// is only present when the length carries it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct HeartbeatStatus {
    pub closing_state: Option<u8>,
    pub power_level: Option<u8>,
    pub paper_state: Option<u8>,
    pub rfid_read_state: Option<u8>,
}

/// Parse a `0xDD` heartbeat response.
pub fn parse_heartbeat(payload: &[u8]) -> HeartbeatStatus {
    let at = |i: usize| payload.get(i).copied();
    match payload.len() {
        20 => HeartbeatStatus {
            paper_state: at(18),
            rfid_read_state: at(19),
            ..Default::default()
        },
        19 => HeartbeatStatus {
            closing_state: at(15),
            power_level: at(16),
            paper_state: at(17),
            rfid_read_state: at(18),
        },
        13 => HeartbeatStatus {
            closing_state: at(9),
            power_level: at(10),
            paper_state: at(11),
            rfid_read_state: at(12),
        },
        10 => HeartbeatStatus {
            closing_state: at(8),
            power_level: at(9),
            rfid_read_state: at(8),
            ..Default::default()
        },
        9 => HeartbeatStatus {
            closing_state: at(8),
            ..Default::default()
        },
        _ => HeartbeatStatus::default(),
    }
}

/// Forward-only reader over a response payload.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        let end = self.pos + n;
        let slice = self.data.get(self.pos..end).ok_or_else(|| {
            format!(
                "payload truncated: need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.data.len()
            )
        })?;
        self.pos = end;
        Ok(slice)
    }

    fn take_u16(&mut self) -> Result<u16, String> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn take_string(&mut self) -> Result<String, String> {
        let len = self.take(1)?[0] as usize;
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }
}

// ============================================================================
// TESTS
// ============================================================================
