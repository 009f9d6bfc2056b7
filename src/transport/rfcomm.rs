//! # Bluetooth RFCOMM Transport
//!
//! This module provides communication with label printers over Bluetooth
//! Serial Port Profile (SPP) via RFCOMM.
//!
//! ## Bluetooth Setup (Linux)
//!
//! The printer must be paired and bound to an RFCOMM device before
//! connecting:
//!
//! ```bash
//! # 1. Pair with the printer
//! $ bluetoothctl
//! [bluetooth]# pair 03:00:00:XX:XX:XX
//!
//! # 2. Bind to RFCOMM device
//! $ sudo rfcomm bind 0 03:00:00:XX:XX:XX 1
//! # This creates /dev/rfcomm0
//! ```
//!
//! [`RfcommConnector::connect`] accepts either the MAC address (the bound
//! device is looked up) or the device path directly.
//!
//! ## TTY Configuration
//!
//! The RFCOMM device is opened non-blocking and in raw mode so binary data
//! is transmitted without modification:
//!
//! - **No input processing**: Disable IGNBRK, BRKINT, PARMRK, ISTRIP, etc.
//! - **No output processing**: Disable OPOST (no CR/LF translation)
//! - **8-bit characters**: CS8 (8 data bits, no parity)
//! - **No echo**: Disable ECHO, ECHONL
//! - **Non-canonical mode**: Disable ICANON (no line buffering)
//!
//! Readiness is driven by tokio's [`AsyncFd`], which keeps reads cancel-safe.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use async_trait::async_trait;
use tokio::io::unix::AsyncFd;
use tokio::process::Command;
use tracing::{debug, info};

use super::{Channel, Connector};
use crate::error::ConnectError;

/// Default RFCOMM device path
pub const DEFAULT_DEVICE: &str = "/dev/rfcomm0";

/// Where the kernel lists Bluetooth adapters
const ADAPTER_CLASS_DIR: &str = "/sys/class/bluetooth";

/// Where the kernel lists RFCOMM bindings
const RFCOMM_PROC: &str = "/proc/net/rfcomm";

/// Opens RFCOMM TTYs by MAC address or device path.
#[derive(Debug, Clone, Default)]
pub struct RfcommConnector;

#[async_trait]
impl Connector for RfcommConnector {
    async fn connect(&self, address: &str) -> Result<Box<dyn Channel>, ConnectError> {
        let device = if is_valid_mac(address) {
            if !adapter_present().await {
                return Err(ConnectError::AdapterOff);
            }
            find_rfcomm_for_mac(address)
                .await
                .ok_or(ConnectError::NotPaired)?
        } else {
            address.to_string()
        };

        info!(device = %device, "opening rfcomm channel");
        let channel = RfcommChannel::open(&device)?;
        Ok(Box::new(channel))
    }
}

/// # RFCOMM Channel
///
/// A raw, non-blocking TTY registered with the tokio reactor.
pub struct RfcommChannel {
    fd: AsyncFd<File>,
}

impl RfcommChannel {
    /// Open and configure the device.
    ///
    /// ## Errors
    ///
    /// - [`ConnectError::PermissionDenied`]: EACCES (may need the dialout group)
    /// - [`ConnectError::ChannelUnavailable`]: missing device, TTY setup failed
    pub fn open<P: AsRef<Path>>(device: P) -> Result<Self, ConnectError> {
        let path = device.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_NOCTTY)
            .open(path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::PermissionDenied => ConnectError::PermissionDenied,
                _ => ConnectError::ChannelUnavailable(format!(
                    "failed to open {}: {}",
                    path.display(),
                    e
                )),
            })?;

        configure_tty_raw(file.as_raw_fd()).map_err(|e| {
            ConnectError::ChannelUnavailable(format!("{}: {}", path.display(), e))
        })?;

        let fd = AsyncFd::new(file)
            .map_err(|e| ConnectError::ChannelUnavailable(format!("reactor: {}", e)))?;
        Ok(Self { fd })
    }
}

#[async_trait]
impl Channel for RfcommChannel {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut written = 0;
        while written < data.len() {
            let mut guard = self.fd.writable().await?;
            match guard.try_io(|inner| {
                let mut file = inner.get_ref();
                file.write(&data[written..])
            }) {
                Ok(Ok(0)) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(Ok(n)) => written += n,
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| {
                let mut file = inner.get_ref();
                file.read(buf)
            }) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        debug!("closing rfcomm channel");
        // The descriptor itself is closed when the channel is dropped.
        Ok(())
    }
}

/// Configure a file descriptor for raw TTY mode.
///
/// IXON/IXOFF/IXANY are cleared as well: 0x11 (XON) and 0x13 (XOFF) occur in
/// packed bitmap rows and must reach the printer untouched.
fn configure_tty_raw(fd: i32) -> io::Result<()> {
    use std::mem::MaybeUninit;

    let mut termios = MaybeUninit::uninit();
    // SAFETY: tcgetattr fully initialises the struct when it returns 0.
    let result = unsafe { libc::tcgetattr(fd, termios.as_mut_ptr()) };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }
    let mut termios = unsafe { termios.assume_init() };

    termios.c_iflag &= !(libc::IGNBRK
        | libc::BRKINT
        | libc::PARMRK
        | libc::ISTRIP
        | libc::INLCR
        | libc::IGNCR
        | libc::ICRNL
        | libc::IXON
        | libc::IXOFF
        | libc::IXANY);
    termios.c_oflag &= !libc::OPOST;
    termios.c_lflag &= !(libc::ECHO | libc::ECHONL | libc::ICANON | libc::ISIG | libc::IEXTEN);
    termios.c_cflag &= !(libc::CSIZE | libc::PARENB);
    termios.c_cflag |= libc::CS8;

    let result = unsafe { libc::tcsetattr(fd, libc::TCSANOW, &termios) };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

// ============================================================================
// RFCOMM LOOKUP HELPERS
// ============================================================================

/// Validate a Bluetooth MAC address format (XX:XX:XX:XX:XX:XX).
pub fn is_valid_mac(mac: &str) -> bool {
    let parts: Vec<&str> = mac.split(':').collect();
    if parts.len() != 6 {
        return false;
    }
    parts
        .iter()
        .all(|part| part.len() == 2 && part.chars().all(|c| c.is_ascii_hexdigit()))
}

/// True if the kernel knows at least one Bluetooth adapter.
async fn adapter_present() -> bool {
    match tokio::fs::read_dir(ADAPTER_CLASS_DIR).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(Some(_))),
        Err(_) => false,
    }
}

/// Find an existing RFCOMM device bound to the given MAC address.
///
/// Checks `/proc/net/rfcomm` and falls back to the `rfcomm -a` command.
pub async fn find_rfcomm_for_mac(mac: &str) -> Option<String> {
    if let Ok(contents) = tokio::fs::read_to_string(RFCOMM_PROC).await
        && let Some(device) = device_for_mac(&contents, mac)
    {
        return Some(device);
    }

    let output = Command::new("rfcomm").arg("-a").output().await.ok()?;
    device_for_mac(&String::from_utf8_lossy(&output.stdout), mac)
}

/// Pick the `/dev/rfcommN` path from a listing line mentioning `mac`.
///
/// Listing format: `rfcomm0: XX:XX:XX:XX:XX:XX channel 1 clean`.
fn device_for_mac(listing: &str, mac: &str) -> Option<String> {
    let mac_upper = mac.to_uppercase();
    listing
        .lines()
        .filter(|line| line.to_uppercase().contains(&mac_upper))
        .filter_map(|line| line.split(':').next())
        .map(|name| format!("/dev/{}", name.trim()))
        .find(|path| Path::new(path).exists())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_device_path() {
        assert_eq!(DEFAULT_DEVICE, "/dev/rfcomm0");
    }

    #[test]
    fn test_valid_mac_addresses() {
        assert!(is_valid_mac("00:11:22:33:44:55"));
        assert!(is_valid_mac("AA:BB:CC:DD:EE:FF"));
        assert!(is_valid_mac("aa:bb:cc:dd:ee:ff"));
    }

    #[test]
    fn test_invalid_mac_addresses() {
        assert!(!is_valid_mac("00:11:22:33:44")); // too short
        assert!(!is_valid_mac("00:11:22:33:44:55:66")); // too long
        assert!(!is_valid_mac("00-11-22-33-44-55")); // wrong separator
        assert!(!is_valid_mac("GG:HH:II:JJ:KK:LL")); // invalid hex
        assert!(!is_valid_mac("/dev/rfcomm0"));
        assert!(!is_valid_mac(""));
    }

    #[test]
    fn test_device_for_mac_requires_existing_node() {
        let listing = "rfcomm9: 03:00:00:AB:CD:EF channel 1 clean\n";
        // /dev/rfcomm9 does not exist on a test machine
        assert_eq!(device_for_mac(listing, "03:00:00:ab:cd:ef"), None);
        assert_eq!(device_for_mac(listing, "11:22:33:44:55:66"), None);
    }

    #[test]
    fn test_open_missing_device() {
        let err = RfcommChannel::open("/nonexistent/rfcomm42").err().unwrap();
        assert!(matches!(err, ConnectError::ChannelUnavailable(_)));
    }

    #[tokio::test]
    async fn test_connector_rejects_missing_path() {
        let err = RfcommConnector
            .connect("/nonexistent/rfcomm42")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConnectError::ChannelUnavailable(_)));
    }
}
