//! Native serial port implementation using the `serialport` crate.

use {
    crate::{
        error::{Error, Result},
        port::{Port, PortInfo, SerialConfig},
    },
    log::{debug, trace},
    serialport::{ClearBuffer, DataBits, FlowControl, Parity, StopBits},
    std::io::{Read, Write},
};

/// Native serial port implementation.
pub struct NativePort {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
}

impl NativePort {
    /// Open a serial port with the given configuration (8N1, no flow control).
    pub fn open(config: &SerialConfig) -> Result<Self> {
        debug!(
            "Opening {} at {} baud",
            config.port_name, config.baud_rate
        );
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()?;

        Ok(Self {
            port: Some(port),
            name: config
                .port_name
                .clone(),
        })
    }

    /// Enumerate serial ports on this host.
    pub fn list_ports() -> Result<Vec<PortInfo>> {
        let ports = serialport::available_ports().map_err(Error::Serial)?;

        Ok(ports
            .into_iter()
            .map(|p| {
                let (vid, pid, manufacturer, product) = match &p.port_type {
                    serialport::SerialPortType::UsbPort(info) => (
                        Some(info.vid),
                        Some(info.pid),
                        info.manufacturer
                            .clone(),
                        info.product
                            .clone(),
                    ),
                    _ => (None, None, None, None),
                };

                PortInfo {
                    name: p.port_name,
                    vid,
                    pid,
                    manufacturer,
                    product,
                }
            })
            .collect())
    }

    fn closed() -> Error {
        Error::Serial(serialport::Error::new(
            serialport::ErrorKind::NoDevice,
            "Port is closed",
        ))
    }
}

impl Port for NativePort {
    fn name(&self) -> &str {
        &self.name
    }

    fn bytes_to_read(&mut self) -> Result<usize> {
        match self.port {
            Some(ref mut p) => {
                let n = p.bytes_to_read()?;
                if n > 0 {
                    trace!("{n} bytes waiting on {}", self.name);
                }
                Ok(n as usize)
            },
            None => Err(Self::closed()),
        }
    }

    fn clear_buffers(&mut self) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.clear(ClearBuffer::All)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the handle closes the device
        self.port
            .take();
        Ok(())
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"))
            .and_then(|p| p.read(buf))
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"))
            .and_then(|p| p.write(buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"))
            .and_then(std::io::Write::flush)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports() {
        // This test just verifies that list_ports doesn't panic
        let _ = NativePort::list_ports();
    }

    #[test]
    fn test_open_missing_port_fails() {
        let config = SerialConfig::new("/dev/swreset-no-such-port", 9600);
        assert!(NativePort::open(&config).is_err());
    }
}
