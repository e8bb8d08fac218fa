//! Boot PROM and runtime firmware upgrades over TFTP.
//!
//! Both procedures end in a reboot and report [`UpdateOutcome::RebootNeeded`]
//! so the engine logs in again and re-reads the installed versions before
//! anything else runs. A firmware upgrade that needs a stepping-stone image
//! installs only that image; the next pass reaches the final version.

use log::{debug, error, info};

use super::Session;
use crate::config::{CatalogEntry, FirmwareTarget, PromTarget};
use crate::error::Result;
use crate::outcome::RunContext;
use crate::pattern::Signal;
use crate::port::Port;
use crate::step;

/// Result of an update stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Nothing to do.
    Skip,
    /// Done without a reboot.
    Success,
    /// An image was installed and the device is rebooting.
    RebootNeeded,
    /// Download, slot management or save failed.
    Error,
}

/// Firmware update handler for one model's catalog entry.
pub struct FirmwareHandler<'a> {
    prom: Option<&'a PromTarget>,
    firmware: Option<&'a FirmwareTarget>,
}

impl<'a> FirmwareHandler<'a> {
    /// `entry` is the catalog entry of the requested model, if any.
    pub fn new(entry: Option<&'a CatalogEntry>) -> Self {
        Self {
            prom: entry.and_then(|e| e.prom.as_ref()),
            firmware: entry.and_then(|e| e.firmware.as_ref()),
        }
    }

    /// Upgrade the boot PROM when the installed version is below the target.
    pub fn update_prom<P: Port>(
        &self,
        session: &mut Session<'_, P>,
        ctx: &mut RunContext,
    ) -> Result<UpdateOutcome> {
        step!("Checking the boot PROM version");
        let Some(prom) = self.prom else {
            debug!("No PROM target for {}", ctx.model());
            return Ok(UpdateOutcome::Skip);
        };
        let Some(target) = prom.target_version.as_deref() else {
            debug!("No PROM target version for {}", ctx.model());
            return Ok(UpdateOutcome::Skip);
        };

        let force = ctx.force_reflash && !ctx.outcome.prom_reboot_initiated;
        let installed = ctx
            .switch_info
            .as_ref()
            .and_then(|info| info.prom_version.clone())
            .or_else(|| ctx.outcome.prom_final.clone());

        match installed.as_deref() {
            None if !force => {
                ctx.warn("Installed PROM version is unknown, skipping the PROM update");
                return Ok(UpdateOutcome::Skip);
            },
            Some(version) if is_current(version, target) && !force => {
                info!("PROM {version} is current (target {target})");
                return Ok(UpdateOutcome::Skip);
            },
            _ => {},
        }

        let Some(file) = prom.filename.as_deref() else {
            ctx.warn(format!("PROM target {target} has no image file"));
            return Ok(UpdateOutcome::Error);
        };
        info!(
            "Updating PROM {} -> {target}{}",
            installed.as_deref().unwrap_or("unknown"),
            if force { " (forced)" } else { "" }
        );

        let profile = session.profile();
        let ip = ctx.tftp_ip(&profile.tftp_candidates());
        if !download(session, &profile.commands.download_prom(&ip, file))? {
            error!("PROM download of {file} from {ip} failed");
            return Ok(UpdateOutcome::Error);
        }
        if !session.save()? {
            error!("save after the PROM download failed");
            return Ok(UpdateOutcome::Error);
        }

        ctx.outcome.prom_reboot_initiated = true;
        session.reboot()?;
        Ok(UpdateOutcome::RebootNeeded)
    }

    /// Upgrade the runtime firmware into the inactive slot and boot from it.
    pub fn update_firmware<P: Port>(
        &self,
        session: &mut Session<'_, P>,
        ctx: &mut RunContext,
    ) -> Result<UpdateOutcome> {
        step!("Checking the firmware version");
        let Some(fw) = self.firmware else {
            debug!("No firmware target for {}", ctx.model());
            return Ok(UpdateOutcome::Skip);
        };
        let Some(final_version) = fw.final_version.as_deref() else {
            debug!("No final firmware version for {}", ctx.model());
            return Ok(UpdateOutcome::Skip);
        };

        let Some(slots) = ctx.slots.clone() else {
            ctx.warn("Firmware inventory unavailable, skipping the firmware update");
            return Ok(UpdateOutcome::Skip);
        };
        let Some(active) = slots.active() else {
            ctx.warn(format!("No boot image in the firmware inventory ({slots})"));
            return Ok(UpdateOutcome::Error);
        };
        let installed = active
            .version
            .as_deref()
            .unwrap_or_default();

        let force = ctx.force_reflash && !ctx.outcome.firmware_reboot_initiated;
        if is_current(installed, final_version) && !force {
            info!("Firmware {installed} is current (target {final_version})");
            return Ok(UpdateOutcome::Skip);
        }

        let Some(target) = slots.target() else {
            ctx.warn(format!("No slot available for a new image ({slots})"));
            return Ok(UpdateOutcome::Error);
        };
        let (version, file) = match step_image(fw, installed) {
            Some(intermediate) => intermediate,
            None => (final_version, fw.final_filename.as_deref().unwrap_or_default()),
        };
        if file.is_empty() {
            ctx.warn(format!("Firmware {version} has no image file"));
            return Ok(UpdateOutcome::Error);
        }
        info!(
            "Updating firmware {installed} -> {version} into slot {}{}",
            target.id,
            if force { " (forced)" } else { "" }
        );

        let profile = session.profile();
        let timeouts = session.timeouts();

        if !target.is_empty() {
            debug!("Slot {} holds {:?}, deleting it", target.id, target.version);
            session.send(
                &profile.commands.delete_image(target.id),
                &[Signal::ConfirmYn, Signal::SuccessGeneric, Signal::PrivilegedPrompt],
                timeouts.command_default,
            )?;
            let mut output = session
                .output()
                .to_string();
            if session.sees(Signal::ConfirmYn, &output) {
                session.answer_confirmation()?;
                let (_, rest) = session.wait_for(
                    &[Signal::SuccessGeneric, Signal::PrivilegedPrompt],
                    timeouts.confirm_wait,
                )?;
                output.push_str(&rest);
            }
            if !session.completed(&output, Signal::PrivilegedPrompt) {
                error!("Deleting the image in slot {} failed", target.id);
                return Ok(UpdateOutcome::Error);
            }
        }

        let ip = ctx.tftp_ip(&profile.tftp_candidates());
        if !download(
            session,
            &profile.commands.download_firmware(&ip, file, target.id),
        )? {
            error!("Firmware download of {file} from {ip} failed");
            return Ok(UpdateOutcome::Error);
        }

        session.send(
            &profile.commands.boot_image(target.id),
            &[Signal::SuccessGeneric, Signal::PrivilegedPrompt, Signal::ErrorGeneric],
            timeouts.command_default,
        )?;
        if !session.completed(session.output(), Signal::PrivilegedPrompt) {
            error!("Could not make slot {} the boot image", target.id);
            return Ok(UpdateOutcome::Error);
        }
        if !session.save()? {
            error!("save after the firmware update failed");
            return Ok(UpdateOutcome::Error);
        }

        ctx.outcome.firmware_reboot_initiated = true;
        session.reboot()?;
        Ok(UpdateOutcome::RebootNeeded)
    }
}

/// Versions compare as plain strings, which orders `1.85.B008`-style
/// versions correctly as long as the field widths match.
fn is_current(installed: &str, target: &str) -> bool {
    installed >= target
}

/// Stepping-stone image required before `installed` can reach the final
/// version, as `(version, file)`.
fn step_image<'a>(fw: &'a FirmwareTarget, installed: &str) -> Option<(&'a str, &'a str)> {
    let version = fw.intermediate_version.as_deref()?;
    let file = fw.intermediate_filename.as_deref()?;
    let final_version = fw.final_version.as_deref()?;
    (installed < version && installed < final_version).then_some((version, file))
}

/// Trigger a TFTP download and classify the result.
fn download<P: Port>(session: &mut Session<'_, P>, command: &str) -> Result<bool> {
    let timeouts = session.timeouts();
    session.send(
        command,
        &[Signal::DownloadSuccess, Signal::DownloadError, Signal::PrivilegedPrompt],
        timeouts.firmware_download,
    )?;
    let output = session.output();
    Ok(session.sees(Signal::DownloadSuccess, output) && !session.sees(Signal::DownloadError, output))
}
