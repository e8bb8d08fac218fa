//! Run outcome record, per-run context and events.

use std::fmt;
use std::time::Instant;

use log::warn;
use serde::Serialize;

use crate::config::DEFAULT_TFTP_IP;
use crate::engine::State;
use crate::inspect::{SlotInventory, SwitchInfo};
use crate::operator::OperatorRequest;

/// How the factory reset was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResetMethod {
    /// Recovery console without a password.
    #[serde(rename = "Recovery (No Password)")]
    RecoveryNoPassword,
    /// Recovery console after a credential login.
    #[serde(rename = "Recovery (Password)")]
    RecoveryPassword,
    /// Reset commands in the normal CLI.
    #[serde(rename = "CLI")]
    Cli,
}

impl fmt::Display for ResetMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RecoveryNoPassword => "Recovery (No Password)",
            Self::RecoveryPassword => "Recovery (Password)",
            Self::Cli => "CLI",
        })
    }
}

/// Progress of the reset stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ResetStatus {
    /// No reset attempted yet.
    #[default]
    #[serde(rename = "Not Started")]
    NotStarted,
    /// At least one reset command succeeded.
    Success,
    /// Every reset command failed.
    Failed,
}

impl fmt::Display for ResetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotStarted => "Not Started",
            Self::Success => "Success",
            Self::Failed => "Failed",
        })
    }
}

/// Overall result of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum OverallStatus {
    /// The run has not reached a terminal state.
    #[default]
    Unknown,
    /// Final checks passed.
    Success,
    /// The run ended on an error path.
    Fail,
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "Unknown",
            Self::Success => "Success",
            Self::Fail => "Fail",
        })
    }
}

/// Result of the TFTP reachability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TftpStatus {
    /// A candidate answered.
    Success,
    /// No candidate answered.
    Fail,
}

impl fmt::Display for TftpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "Success",
            Self::Fail => "Fail",
        })
    }
}

/// Result of one post-configuration command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    /// Command text.
    pub command: String,
    /// Whether it completed without an error marker.
    pub ok: bool,
}

/// One state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    /// State left.
    pub from: State,
    /// State entered.
    pub to: State,
}

/// Everything learned during one run.
///
/// Created with "unknown" values at run start, filled in by the engine and
/// the handlers, and handed to listeners exactly once when the run ends.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunOutcome {
    /// Serial port.
    pub port: String,
    /// Vendor.
    pub vendor: String,
    /// Model the operator asked for.
    pub model_requested: String,
    /// Model reported by the device.
    pub model_detected: Option<String>,
    /// MAC address reported by the device.
    pub mac_address: Option<String>,
    /// How the reset was obtained.
    pub reset_method: Option<ResetMethod>,
    /// Reset stage status.
    pub reset_status: ResetStatus,
    /// Whether a reset batch was started.
    pub reset_performed: bool,
    /// Whether a PROM update rebooted the device.
    pub prom_reboot_initiated: bool,
    /// Whether a firmware update rebooted the device.
    pub firmware_reboot_initiated: bool,
    /// PROM version at the first status query.
    pub prom_initial: Option<String>,
    /// PROM version at the last status query.
    pub prom_final: Option<String>,
    /// Firmware version at the first status query.
    pub firmware_initial: Option<String>,
    /// Firmware version at the last status query.
    pub firmware_final: Option<String>,
    /// Slot inventory before any firmware update.
    pub firmware_slots_before_update: Option<String>,
    /// TFTP probe result.
    pub tftp_ping_status: Option<TftpStatus>,
    /// TFTP server used.
    pub tftp_ip_used: Option<String>,
    /// Raw directory listing.
    pub dir_output: Option<String>,
    /// File names from the directory listing.
    pub dir_parsed: Vec<String>,
    /// Post-configuration command results.
    pub post_config_results: Vec<CommandResult>,
    /// Non-fatal anomalies.
    pub warnings: Vec<String>,
    /// State changes in order.
    pub transitions: Vec<Transition>,
    /// State the run ended in.
    pub final_state: Option<State>,
    /// Overall result.
    pub overall_status: OverallStatus,
    /// Seconds from the first boot indicator to the end of the run.
    pub interaction_duration: Option<f64>,
}

impl RunOutcome {
    /// Fresh record for a run.
    pub fn new(port: &str, vendor: &str, model: &str) -> Self {
        Self {
            port: port.to_string(),
            vendor: vendor.to_string(),
            model_requested: model.to_string(),
            ..Self::default()
        }
    }

    /// Take over what the status query reported.
    ///
    /// Initial versions are set once; final versions follow every query.
    pub fn apply_switch_info(&mut self, info: &SwitchInfo) {
        if info.model.is_some() {
            self.model_detected.clone_from(&info.model);
        }
        if info.mac.is_some() {
            self.mac_address.clone_from(&info.mac);
        }
        if let Some(prom) = &info.prom_version {
            self.prom_initial
                .get_or_insert_with(|| prom.clone());
            self.prom_final = Some(prom.clone());
        }
        if let Some(fw) = &info.firmware_version {
            self.firmware_initial
                .get_or_insert_with(|| fw.clone());
            self.firmware_final = Some(fw.clone());
        }
    }
}

/// Mutable state of one run, passed by reference into each handler call.
#[derive(Debug)]
pub struct RunContext {
    /// The record being built.
    pub outcome: RunOutcome,
    /// Reflash even when the installed version is current.
    pub force_reflash: bool,
    /// Last status query result.
    pub switch_info: Option<SwitchInfo>,
    /// Last firmware inventory.
    pub slots: Option<SlotInventory>,
    interaction_start: Option<Instant>,
}

impl RunContext {
    /// Context for a new run.
    pub fn new(outcome: RunOutcome, force_reflash: bool) -> Self {
        Self {
            outcome,
            force_reflash,
            switch_info: None,
            slots: None,
            interaction_start: None,
        }
    }

    /// Model the run targets.
    pub fn model(&self) -> &str {
        &self
            .outcome
            .model_requested
    }

    /// Record the first device interaction; later calls are ignored.
    pub fn mark_interaction_start(&mut self) {
        self.interaction_start
            .get_or_insert_with(Instant::now);
    }

    /// When the device first answered, if it has.
    pub fn interaction_start(&self) -> Option<Instant> {
        self.interaction_start
    }

    /// Log a warning and keep it in the record.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.outcome
            .warnings
            .push(message);
    }

    /// TFTP server for downloads: the one found by the probe, otherwise the
    /// first candidate, otherwise [`DEFAULT_TFTP_IP`].
    pub fn tftp_ip(&self, candidates: &[&str]) -> String {
        self.outcome
            .tftp_ip_used
            .clone()
            .or_else(|| {
                candidates
                    .first()
                    .map(|ip| (*ip).to_string())
            })
            .unwrap_or_else(|| DEFAULT_TFTP_IP.to_string())
    }
}

/// Progress notifications for a supervising host.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// The state machine moved.
    StateChanged(Transition),
    /// The operator has to do something at the device.
    OperatorAction(OperatorRequest),
    /// The run ended; sent exactly once, last.
    Finished(Box<RunOutcome>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_info_keeps_initial_versions() {
        let mut outcome = RunOutcome::new("/dev/ttyUSB0", "D-Link", "DES-3200-28");
        outcome.apply_switch_info(&SwitchInfo {
            model: Some("DES-3200-28".into()),
            mac: Some("00-1E-58-AA-BB-CC".into()),
            prom_version: Some("1.00.B004".into()),
            firmware_version: Some("1.21.B006".into()),
        });
        outcome.apply_switch_info(&SwitchInfo {
            prom_version: Some("1.00.B008".into()),
            firmware_version: Some("1.85.B008".into()),
            ..SwitchInfo::default()
        });

        assert_eq!(outcome.prom_initial.as_deref(), Some("1.00.B004"));
        assert_eq!(outcome.prom_final.as_deref(), Some("1.00.B008"));
        assert_eq!(outcome.firmware_initial.as_deref(), Some("1.21.B006"));
        assert_eq!(outcome.firmware_final.as_deref(), Some("1.85.B008"));
        assert_eq!(outcome.model_detected.as_deref(), Some("DES-3200-28"));
    }

    #[test]
    fn test_interaction_start_recorded_once() {
        let mut ctx = RunContext::new(RunOutcome::default(), false);
        assert!(ctx.interaction_start().is_none());
        ctx.mark_interaction_start();
        let first = ctx.interaction_start();
        std::thread::sleep(std::time::Duration::from_millis(2));
        ctx.mark_interaction_start();
        assert_eq!(ctx.interaction_start(), first);
    }

    #[test]
    fn test_tftp_ip_preference() {
        let mut ctx = RunContext::new(RunOutcome::default(), false);
        assert_eq!(ctx.tftp_ip(&[]), DEFAULT_TFTP_IP);
        assert_eq!(ctx.tftp_ip(&["10.0.0.5", "10.0.0.6"]), "10.0.0.5");
        ctx.outcome.tftp_ip_used = Some("10.0.0.6".into());
        assert_eq!(ctx.tftp_ip(&["10.0.0.5"]), "10.0.0.6");
    }

    #[test]
    fn test_serialized_labels() {
        let mut outcome = RunOutcome::new("COM3", "D-Link", "DES-3200-28");
        outcome.reset_method = Some(ResetMethod::RecoveryNoPassword);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["reset_method"], "Recovery (No Password)");
        assert_eq!(json["reset_status"], "Not Started");
        assert_eq!(json["overall_status"], "Unknown");
    }

    #[test]
    fn test_warn_is_recorded() {
        let mut ctx = RunContext::new(RunOutcome::default(), false);
        ctx.warn("model mismatch");
        assert_eq!(ctx.outcome.warnings, vec!["model mismatch".to_string()]);
    }
}
