//! Port abstraction for the serial console link.
//!
//! The protocol handlers never talk to `serialport` directly. They go through
//! a [`Channel`](crate::channel::Channel), which is generic over the `Port`
//! trait defined here:
//!
//! ```text
//! +----------------------------+
//! |  Engine / protocol handlers|
//! +-------------+--------------+
//!               |
//!               v
//! +-------------+--------------+
//! |  Channel (pattern reads)   |
//! +-------------+--------------+
//!               |
//!               v
//! +-------------+--------------+
//! |  Port trait                |
//! +-------------+--------------+
//!               |
//!               v
//! +-------------+--------------+
//! |  NativePort (serialport)   |
//! +----------------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use swreset::port::{Port, SerialConfig};
//!
//! fn poke<P: Port>(port: &mut P) -> swreset::Result<()> {
//!     port.write_all_bytes(b"\r")?;
//!     println!("{} bytes waiting", port.bytes_to_read()?);
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Serial port configuration.
///
/// Switch consoles are always 8N1 without flow control, so only the name,
/// the baud rate and the per-read timeout are configurable.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Timeout for a single blocking read or write.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 9600,
            timeout: Duration::from_secs(1),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }
}

/// Serial port information, as shown by `swreset list-ports`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
}

/// Byte-level console port.
pub trait Port: Read + Write + Send {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Number of received bytes that can be read without blocking.
    fn bytes_to_read(&mut self) -> Result<usize>;

    /// Discard anything buffered in either direction.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

/// List all serial ports on this host.
#[cfg(feature = "native")]
pub fn list_ports() -> Result<Vec<PortInfo>> {
    native::NativePort::list_ports()
}

/// List all serial ports on this host (no native support compiled in).
#[cfg(not(feature = "native"))]
pub fn list_ports() -> Result<Vec<PortInfo>> {
    Ok(Vec::new())
}

#[cfg(feature = "native")]
pub use native::NativePort;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_default() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.timeout, Duration::from_secs(1));
        assert!(config.port_name.is_empty());
    }

    #[test]
    fn test_serial_config_new_keeps_default_timeout() {
        let config = SerialConfig::new("/dev/ttyUSB0", 115_200);

        assert_eq!(config.port_name, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.timeout, Duration::from_secs(1));
    }
}
