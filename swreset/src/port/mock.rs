//! Scripted in-memory port for handler and engine tests.
//!
//! Reads and writes are kept separate. Every write is matched against the
//! script; the rule with the longest trigger contained in the written bytes
//! fires and its response becomes readable.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::port::Port;

struct Rule {
    trigger: Vec<u8>,
    response: Vec<u8>,
    remaining: Option<usize>,
}

#[derive(Default)]
struct Inner {
    rules: Vec<Rule>,
    read_buf: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    clears: usize,
    closed: bool,
}

/// Scripted port; clones share the same script and buffers.
#[derive(Clone, Default)]
pub(crate) struct ScriptedPort {
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedPort {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Bytes readable right away, before anything is written.
    pub(crate) fn with_initial(self, output: &str) -> Self {
        self.lock()
            .read_buf
            .extend(output.as_bytes());
        self
    }

    /// Respond to every write containing `trigger`.
    pub(crate) fn on(self, trigger: &str, response: &str) -> Self {
        self.push_rule(trigger.as_bytes(), response, None)
    }

    /// Respond to the next write containing `trigger`, once.
    pub(crate) fn once(self, trigger: &str, response: &str) -> Self {
        self.push_rule(trigger.as_bytes(), response, Some(1))
    }

    /// Respond to a raw byte trigger, once.
    pub(crate) fn once_bytes(self, trigger: &[u8], response: &str) -> Self {
        self.push_rule(trigger, response, Some(1))
    }

    fn push_rule(self, trigger: &[u8], response: &str, remaining: Option<usize>) -> Self {
        self.lock()
            .rules
            .push(Rule {
                trigger: trigger.to_vec(),
                response: response.as_bytes().to_vec(),
                remaining,
            });
        self
    }

    /// Every write, decoded lossily, in order.
    pub(crate) fn writes(&self) -> Vec<String> {
        self.lock()
            .writes
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }

    /// Whether any write contained `needle`.
    pub(crate) fn wrote(&self, needle: &str) -> bool {
        self.writes()
            .iter()
            .any(|w| w.contains(needle))
    }

    /// Raw bytes of every write.
    pub(crate) fn raw_writes(&self) -> Vec<Vec<u8>> {
        self.lock()
            .writes
            .clone()
    }

    /// How often the buffers were cleared.
    pub(crate) fn clear_count(&self) -> usize {
        self.lock()
            .clears
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock()
            .closed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty()
        && haystack
            .windows(needle.len())
            .any(|w| w == needle)
}

impl Read for ScriptedPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut inner = self.lock();
        if inner
            .read_buf
            .is_empty()
        {
            return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf
            .len()
            .min(inner.read_buf.len());
        for b in buf.iter_mut().take(n) {
            *b = inner
                .read_buf
                .pop_front()
                .unwrap_or_default();
        }
        Ok(n)
    }
}

impl Write for ScriptedPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut inner = self.lock();
        inner
            .writes
            .push(buf.to_vec());

        let mut best: Option<usize> = None;
        for (i, rule) in inner.rules.iter().enumerate() {
            if rule.remaining == Some(0) || !contains(buf, &rule.trigger) {
                continue;
            }
            let longer = best.is_none_or(|b| rule.trigger.len() > inner.rules[b].trigger.len());
            if longer {
                best = Some(i);
            }
        }

        if let Some(i) = best {
            let response = inner.rules[i]
                .response
                .clone();
            if let Some(ref mut left) = inner.rules[i].remaining {
                *left -= 1;
            }
            inner
                .read_buf
                .extend(response);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Port for ScriptedPort {
    fn name(&self) -> &str {
        "scripted"
    }

    fn bytes_to_read(&mut self) -> Result<usize> {
        Ok(self
            .lock()
            .read_buf
            .len())
    }

    fn clear_buffers(&mut self) -> Result<()> {
        let mut inner = self.lock();
        inner
            .read_buf
            .clear();
        inner.clears += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.lock()
            .closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_trigger_wins() {
        let mut port = ScriptedPort::new()
            .on("\r", "enter\n")
            .on("reboot\r", "Rebooting\n");
        port.write_all_bytes(b"reboot\r").unwrap();

        let mut buf = [0u8; 64];
        let n = port.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"Rebooting\n");
    }

    #[test]
    fn test_once_rule_is_consumed() {
        let mut port = ScriptedPort::new().once("\r", "first\n");
        port.write_all_bytes(b"\r").unwrap();
        port.write_all_bytes(b"\r").unwrap();
        assert_eq!(port.bytes_to_read().unwrap(), "first\n".len());
        assert_eq!(port.writes().len(), 2);
    }
}
