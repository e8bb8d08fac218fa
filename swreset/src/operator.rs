//! Operator interaction.
//!
//! Two steps need a human at the device: power-cycling it when a boot-time
//! key combination must be caught, and the out-of-band image transfer in the
//! boot-loader menu. Handlers only see the [`Operator`] trait; the host
//! decides how the request reaches a person and how the answer comes back.

use std::fmt;
use std::sync::mpsc::{Receiver, Sender};

use log::info;

use crate::error::{Error, Result};
use crate::outcome::RunEvent;

/// Why the device has to be power-cycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerCycleTarget {
    /// To catch the recovery console during boot.
    RecoveryConsole,
    /// To catch the boot-loader menu during boot.
    BootMenu,
}

impl fmt::Display for PowerCycleTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RecoveryConsole => "password recovery console",
            Self::BootMenu => "boot configuration menu",
        })
    }
}

/// Something the operator is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorRequest {
    /// Power-cycle the device now; the run keeps watching the console.
    PowerCycle(PowerCycleTarget),
    /// Transfer the image from the boot-loader menu, then acknowledge.
    ManualTransfer,
}

impl fmt::Display for OperatorRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PowerCycle(target) => {
                write!(f, "Power-cycle the device now to enter the {target}")
            },
            Self::ManualTransfer => f.write_str(
                "Select the download protocol in the boot menu, transfer the image, \
                 let the device reboot, then confirm",
            ),
        }
    }
}

/// Person (or harness) at the device.
pub trait Operator: Send {
    /// Ask for a power cycle. Does not wait: the boot window starts as soon
    /// as the device is switched back on.
    fn request_power_cycle(&mut self, target: PowerCycleTarget) -> Result<()>;

    /// Hand off for the manual transfer and block until the operator
    /// answers. `Ok(false)` means the operator gave up.
    fn await_manual_transfer(&mut self) -> Result<bool>;
}

/// Operator reached through the run event queue, answering on an
/// acknowledgment channel.
pub struct ChannelOperator {
    events: Sender<RunEvent>,
    acks: Receiver<bool>,
}

impl ChannelOperator {
    /// Requests go to `events`; answers are read from `acks`.
    pub fn new(events: Sender<RunEvent>, acks: Receiver<bool>) -> Self {
        Self { events, acks }
    }

    fn notify(&self, request: OperatorRequest) {
        info!("Operator: {request}");
        // A host that stopped listening still gets the log line
        let _ = self
            .events
            .send(RunEvent::OperatorAction(request));
    }
}

impl Operator for ChannelOperator {
    fn request_power_cycle(&mut self, target: PowerCycleTarget) -> Result<()> {
        self.notify(OperatorRequest::PowerCycle(target));
        Ok(())
    }

    fn await_manual_transfer(&mut self) -> Result<bool> {
        self.notify(OperatorRequest::ManualTransfer);
        self.acks
            .recv()
            .map_err(|_| Error::Operator("acknowledgment channel closed".into()))
    }
}

/// Operator for unattended runs: requests are only logged and the manual
/// transfer is answered with a fixed value.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoOperator {
    accept_transfer: bool,
}

impl AutoOperator {
    /// Answer every manual transfer with `accept_transfer`.
    pub fn new(accept_transfer: bool) -> Self {
        Self { accept_transfer }
    }
}

impl Operator for AutoOperator {
    fn request_power_cycle(&mut self, target: PowerCycleTarget) -> Result<()> {
        info!("Operator: {}", OperatorRequest::PowerCycle(target));
        Ok(())
    }

    fn await_manual_transfer(&mut self) -> Result<bool> {
        info!(
            "Manual transfer {} (unattended)",
            if self.accept_transfer { "assumed done" } else { "declined" }
        );
        Ok(self.accept_transfer)
    }
}
