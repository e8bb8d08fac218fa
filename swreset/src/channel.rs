//! Byte-stream channel over the serial console.
//!
//! The console has no framing, so everything is built on two primitives:
//! read whatever is buffered right now, and keep reading until one of a set
//! of patterns shows up or a deadline passes. A deadline without a match is
//! not an error; the caller gets the partial text back and decides.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::pattern::PatternGroup;
use crate::port::Port;

/// Default pause between two polls of the port.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Terminator appended to every command.
pub const LINE_TERMINATOR: &[u8] = b"\r";

/// Time given to the line after opening it.
#[cfg(feature = "native")]
const OPEN_SETTLE: Duration = Duration::from_secs(1);

/// Text collected by [`Channel::read_until_pattern`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capture {
    /// Everything read during the wait.
    pub text: String,
    /// Index (in the caller's list) of the first pattern that matched.
    pub matched: Option<usize>,
}

impl Capture {
    /// Whether any pattern matched before the deadline.
    pub fn is_match(&self) -> bool {
        self.matched
            .is_some()
    }
}

/// Sequential, exclusively owned console channel.
pub struct Channel<P: Port> {
    port: Option<P>,
    name: String,
    poll_interval: Duration,
    pending: Vec<u8>,
    last_output: String,
}

#[cfg(feature = "native")]
impl Channel<crate::port::NativePort> {
    /// Open the physical serial link.
    ///
    /// This is the one dependency a run cannot do without; callers abort
    /// before starting the state machine when it fails.
    pub fn open(config: &crate::port::SerialConfig) -> Result<Self> {
        let port = crate::port::NativePort::open(config)?;
        thread::sleep(OPEN_SETTLE);
        log::info!(
            "Connected to {} ({} baud)",
            config.port_name, config.baud_rate
        );
        Ok(Self::new(port))
    }
}

impl<P: Port> Channel<P> {
    /// Wrap an already opened port.
    pub fn new(port: P) -> Self {
        let name = port
            .name()
            .to_string();
        Self {
            port: Some(port),
            name,
            poll_interval: DEFAULT_POLL_INTERVAL,
            pending: Vec::new(),
            last_output: String::new(),
        }
    }

    /// Set the pause between polls.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Change the pause between polls.
    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.poll_interval = interval;
    }

    /// Port name the channel was opened on.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pause between polls.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Whether [`close`](Self::close) has not been called yet.
    pub fn is_open(&self) -> bool {
        self.port
            .is_some()
    }

    fn port_mut(&mut self) -> Result<&mut P> {
        self.port
            .as_mut()
            .ok_or(Error::ChannelClosed)
    }

    /// Send bytes verbatim.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        trace!("TX {:?}", String::from_utf8_lossy(bytes));
        self.port_mut()?
            .write_all_bytes(bytes)
    }

    /// Return whatever text is buffered right now, without waiting.
    ///
    /// Invalid UTF-8 is dropped; an incomplete trailing sequence is kept
    /// for the next call.
    pub fn read_available(&mut self) -> Result<String> {
        let port = self.port_mut()?;
        let available = port.bytes_to_read()?;
        if available == 0 {
            return Ok(String::new());
        }

        let mut buf = vec![0u8; available];
        let n = match port.read(&mut buf) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => 0,
            Err(e) => return Err(Error::Io(e)),
        };
        trace!("RX {:?}", String::from_utf8_lossy(&buf[..n]));

        self.pending
            .extend_from_slice(&buf[..n]);
        Ok(drain_utf8_permissive(&mut self.pending))
    }

    /// Drop everything received so far and return the text that was
    /// buffered.
    pub fn discard_input(&mut self) -> Result<String> {
        let stale = self.read_available()?;
        self.port_mut()?
            .clear_buffers()?;
        self.pending
            .clear();
        Ok(stale)
    }

    /// Read until one of `patterns` matches or `timeout` elapses.
    ///
    /// Returns within `timeout` plus one poll interval. On timeout the
    /// partial text is returned with `matched == None`.
    pub fn read_until_pattern(
        &mut self,
        patterns: &[&PatternGroup],
        timeout: Duration,
    ) -> Result<Capture> {
        let start = Instant::now();
        let mut text = String::new();

        loop {
            text.push_str(&self.read_available()?);
            if let Some(index) = first_match(patterns, &text) {
                debug!(
                    "Matched {:?} after {:?}",
                    patterns[index].sources(),
                    start.elapsed()
                );
                return Ok(Capture {
                    text,
                    matched: Some(index),
                });
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                break;
            }
            thread::sleep(
                self.poll_interval
                    .min(timeout - elapsed),
            );
        }

        debug!(
            "No pattern within {timeout:?}; tail: {:?}",
            tail(&text, 200)
        );
        Ok(Capture {
            text,
            matched: None,
        })
    }

    /// Send `command` plus the line terminator and wait for `patterns`.
    ///
    /// Returns the index of the first pattern (in list order) found in the
    /// output. The full output is kept for [`last_output`](Self::last_output).
    pub fn send_command_and_wait(
        &mut self,
        command: &str,
        patterns: &[&PatternGroup],
        timeout: Duration,
    ) -> Result<Option<usize>> {
        debug!("Sending command: {command}");
        let mut line = command
            .as_bytes()
            .to_vec();
        line.extend_from_slice(LINE_TERMINATOR);
        self.write_raw(&line)?;

        let capture = self.read_until_pattern(patterns, timeout)?;
        if capture.matched.is_none() {
            debug!(
                "'{command}' finished without an expected pattern: {:?}",
                tail(&capture.text, 100)
            );
        }
        self.last_output = capture.text;
        Ok(capture.matched)
    }

    /// Output of the last [`send_command_and_wait`](Self::send_command_and_wait).
    pub fn last_output(&self) -> &str {
        &self.last_output
    }

    /// Close the link. Safe to call repeatedly; never fails.
    pub fn close(&mut self) {
        if let Some(mut port) = self.port.take() {
            if let Err(e) = port.close() {
                warn!("Error while closing {}: {e}", self.name);
            } else {
                log::info!("Connection to {} closed", self.name);
            }
        }
    }
}

impl<P: Port> Drop for Channel<P> {
    fn drop(&mut self) {
        self.close();
    }
}

fn first_match(patterns: &[&PatternGroup], text: &str) -> Option<usize> {
    patterns
        .iter()
        .position(|p| p.is_match(text))
}

/// Last `max` characters of `text`, on a char boundary.
pub(crate) fn tail(text: &str, max: usize) -> &str {
    let count = text
        .chars()
        .count();
    if count <= max {
        return text;
    }
    let skip = text
        .char_indices()
        .nth(count - max)
        .map_or(0, |(i, _)| i);
    &text[skip..]
}

/// Drain buffered bytes into text, dropping invalid UTF-8.
///
/// - Valid UTF-8 is emitted as-is.
/// - Invalid byte sequences are discarded and decoding continues.
/// - An incomplete UTF-8 suffix is kept in `buffer` for the next read.
pub fn drain_utf8_permissive(buffer: &mut Vec<u8>) -> String {
    let mut output = String::new();

    loop {
        match std::str::from_utf8(buffer) {
            Ok(valid) => {
                output.push_str(valid);
                buffer.clear();
                break;
            },
            Err(err) => {
                let valid_up_to = err.valid_up_to();
                if valid_up_to > 0 {
                    if let Ok(valid) = std::str::from_utf8(&buffer[..valid_up_to]) {
                        output.push_str(valid);
                    }
                }

                match err.error_len() {
                    Some(invalid_len) => {
                        let drain_to = valid_up_to
                            .saturating_add(invalid_len)
                            .min(buffer.len());
                        buffer.drain(..drain_to);
                    },
                    None => {
                        if valid_up_to > 0 {
                            buffer.drain(..valid_up_to);
                        }
                        break;
                    },
                }
            },
        }
    }

    output
}
