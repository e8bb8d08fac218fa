//! Protocol handlers, one per console mode.
//!
//! Handlers never pick the next state. Each call gets the capabilities it
//! needs (a [`Session`] on the channel, the ranking store, the operator and
//! the run context) and returns a small outcome enum that the engine maps
//! to a transition. Expected negative results (no prompt, rejected login,
//! device error marker) are outcome values; `Err` is reserved for a broken
//! link or operator channel.

pub mod boot_menu;
pub mod cli;
pub mod firmware;
pub mod recovery;

use std::thread;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::channel::{Channel, tail};
use crate::config::{DeviceProfile, Pacing, ResetCommand, Timeouts};
use crate::error::Result;
use crate::pattern::{PatternSet, Signal};
use crate::port::Port;
use crate::ranking::{Category, RankingStore};

pub use self::{
    boot_menu::BootMenuHandler,
    cli::{CliEntry, CliHandler},
    firmware::{FirmwareHandler, UpdateOutcome},
    recovery::{MismatchPolicy, RecoveryEntry, RecoveryHandler},
};

/// The channel together with the read-only device data needed to talk to
/// it. Built by the engine for each handler call.
pub struct Session<'a, P: Port> {
    channel: &'a mut Channel<P>,
    profile: &'a DeviceProfile,
    patterns: &'a PatternSet,
    timeouts: &'a Timeouts,
}

impl<'a, P: Port> Session<'a, P> {
    /// Bundle a channel with the device data.
    pub fn new(
        channel: &'a mut Channel<P>,
        profile: &'a DeviceProfile,
        patterns: &'a PatternSet,
        timeouts: &'a Timeouts,
    ) -> Self {
        Self {
            channel,
            profile,
            patterns,
            timeouts,
        }
    }

    /// Device profile.
    pub fn profile(&self) -> &'a DeviceProfile {
        self.profile
    }

    /// Operation timeouts.
    pub fn timeouts(&self) -> &'a Timeouts {
        self.timeouts
    }

    fn pacing(&self) -> &'a Pacing {
        &self
            .timeouts
            .pacing
    }

    /// Sleep unless `delay` is zero.
    pub fn settle(&self, delay: Duration) {
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }

    /// Send bytes verbatim.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.channel
            .write_raw(bytes)
    }

    /// Send a bare line terminator.
    pub fn enter(&mut self) -> Result<()> {
        self.write(b"\r")
    }

    /// Whatever is buffered right now.
    pub fn read(&mut self) -> Result<String> {
        self.channel
            .read_available()
    }

    /// Whether `signal` occurs in `text`.
    pub fn sees(&self, signal: Signal, text: &str) -> bool {
        self.patterns
            .matches(signal, text)
    }

    /// Wait for the first of `signals` (list order) within `timeout`.
    ///
    /// Returns the matched signal, if any, and everything read.
    pub fn wait_for(
        &mut self,
        signals: &[Signal],
        timeout: Duration,
    ) -> Result<(Option<Signal>, String)> {
        let patterns = self.patterns;
        let capture = self
            .channel
            .read_until_pattern(&patterns.select(signals), timeout)?;
        Ok((capture.matched.map(|i| signals[i]), capture.text))
    }

    /// Send a command and wait for the first of `signals` (list order).
    ///
    /// Output left over from earlier exchanges is discarded first so it
    /// cannot satisfy the wait.
    pub fn send(
        &mut self,
        command: &str,
        signals: &[Signal],
        timeout: Duration,
    ) -> Result<Option<Signal>> {
        let stale = self
            .channel
            .discard_input()?;
        if !stale.is_empty() {
            trace!("Discarding stale output: {:?}", tail(&stale, 200));
        }
        let patterns = self.patterns;
        let matched = self
            .channel
            .send_command_and_wait(command, &patterns.select(signals), timeout)?;
        Ok(matched.map(|i| signals[i]))
    }

    /// Full output of the last [`send`](Self::send).
    pub fn output(&self) -> &str {
        self.channel
            .last_output()
    }

    /// Answer a yes/no dialog and nudge the console back to a prompt.
    pub fn answer_confirmation(&mut self) -> Result<()> {
        debug!("Confirmation requested, answering Y");
        let pacing = self.pacing();
        self.write(b"Y\r")?;
        self.settle(pacing.settle);
        self.enter()?;
        self.settle(pacing.settle_short);
        self.enter()
    }

    /// `reboot`, confirming the dialog if one shows up, then wait for the
    /// rebooting banner. Returns whether the banner was seen.
    pub fn reboot(&mut self) -> Result<bool> {
        let profile = self.profile;
        let pacing = self.pacing();
        let line = format!("{}\r", profile.commands.reboot);
        debug!("Sending command: {}", profile.commands.reboot);
        self.write(line.as_bytes())?;
        self.settle(pacing.settle_long);

        let reply = self.read()?;
        if self.sees(Signal::Rebooting, &reply) {
            return Ok(true);
        }
        if self.sees(Signal::ConfirmYn, &reply) {
            self.answer_confirmation()?;
        }

        let (seen, _) = self.wait_for(&[Signal::Rebooting], self.timeouts.rebooting_wait)?;
        if seen.is_none() {
            debug!("No rebooting banner within {:?}", self.timeouts.rebooting_wait);
        }
        Ok(seen.is_some())
    }

    /// `save`; true when it completed without an error marker.
    pub fn save(&mut self) -> Result<bool> {
        let profile = self.profile;
        let matched = self.send(
            &profile.commands.save,
            &[Signal::SuccessGeneric, Signal::PrivilegedPrompt, Signal::ErrorGeneric],
            self.timeouts.command_default,
        )?;
        let ok = matched.is_some_and(|s| s != Signal::ErrorGeneric)
            && !self.sees(Signal::ErrorGeneric, self.output());
        Ok(ok)
    }

    /// Whether `output` reports completion (success marker or `prompt`)
    /// and no error marker.
    pub fn completed(&self, output: &str, prompt: Signal) -> bool {
        (self.sees(Signal::SuccessGeneric, output) || self.sees(prompt, output))
            && !self.sees(Signal::ErrorGeneric, output)
    }

    /// Run every reset command in ranked order and count the successes.
    ///
    /// A confirmation dialog is answered and the completion re-awaited.
    /// Ranking is updated per command and checkpointed after the batch.
    pub fn run_reset_batch(
        &mut self,
        commands: &[ResetCommand],
        prompt: Signal,
        ranking: &mut RankingStore,
    ) -> Result<usize> {
        let ordered = ranking.rank(commands, Category::ResetCommands);
        let mut successes = 0;

        for entry in ordered {
            self.send(
                &entry.command,
                &[Signal::SuccessGeneric, prompt, Signal::ErrorGeneric, Signal::ConfirmYn],
                self.timeouts.command_default,
            )?;
            let mut output = self
                .output()
                .to_string();

            if self.sees(Signal::ConfirmYn, &output) {
                self.answer_confirmation()?;
                let (_, rest) = self.wait_for(
                    &[Signal::SuccessGeneric, prompt, Signal::ErrorGeneric],
                    self.timeouts.confirm_wait,
                )?;
                output.push_str(&rest);
            }

            let ok = self.completed(&output, prompt);
            ranking.update(Category::ResetCommands, &entry.id, ok);
            if ok {
                crate::step!("Reset command '{}' succeeded", entry.command);
                successes += 1;
            } else {
                warn!("Reset command '{}' failed or reported an error", entry.command);
            }
        }

        ranking.checkpoint(Category::ResetCommands);
        Ok(successes)
    }
}
