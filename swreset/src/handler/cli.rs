//! Normal management CLI: login, privilege escalation, reset, diagnostics.

use std::time::Instant;

use log::{debug, error, info, warn};

use super::Session;
use crate::config::{Credential, ResetCommand};
use crate::error::Result;
use crate::inspect::Inspector;
use crate::outcome::{CommandResult, ResetMethod, RunContext, TftpStatus};
use crate::pattern::Signal;
use crate::port::Port;
use crate::ranking::{Category, RankingStore};
use crate::step;

/// Signals that classify what the console shows after a bare return.
const ENTRY_SIGNALS: [Signal; 5] = [
    Signal::PasswordChange,
    Signal::PrivilegedPrompt,
    Signal::LoginPrompt,
    Signal::PasswordPrompt,
    Signal::UserPrompt,
];

/// Result of trying to reach the privileged CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliEntry {
    /// Privileged prompt reached.
    Privileged,
    /// A forced password change was completed; enter again.
    Retry,
    /// No privileged access within the wait.
    Failed,
}

/// CLI handler. Uses the `cli` credential and reset-command lists.
pub struct CliHandler<'a> {
    credentials: &'a [Credential],
    commands: &'a [ResetCommand],
    inspector: &'a dyn Inspector,
}

impl<'a> CliHandler<'a> {
    /// `credentials` and `commands` are the cli-category lists.
    pub fn new(
        credentials: &'a [Credential],
        commands: &'a [ResetCommand],
        inspector: &'a dyn Inspector,
    ) -> Self {
        Self {
            credentials,
            commands,
            inspector,
        }
    }

    /// Nudge the console until it shows a privileged prompt, logging in and
    /// escalating on the way. Gives up after `reboot_wait`.
    pub fn attempt_entry<P: Port>(
        &self,
        session: &mut Session<'_, P>,
        ranking: &mut RankingStore,
        ctx: &mut RunContext,
    ) -> Result<CliEntry> {
        step!("Trying to reach the privileged CLI");
        let timeouts = session.timeouts();
        let profile = session.profile();
        let deadline = Instant::now() + timeouts.reboot_wait;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            session.enter()?;
            session.settle(timeouts.pacing.settle_short);
            let (seen, text) =
                session.wait_for(&ENTRY_SIGNALS, timeouts.prompt_wait.min(remaining))?;
            if !text.trim().is_empty() {
                ctx.mark_interaction_start();
            }

            let mut buffer = match seen {
                None => continue,
                Some(Signal::PasswordChange) => {
                    self.set_initial_password(session, ctx)?;
                    return Ok(CliEntry::Retry);
                },
                Some(Signal::PrivilegedPrompt) => {
                    info!("Privileged prompt reached");
                    return Ok(CliEntry::Privileged);
                },
                Some(Signal::UserPrompt) => {
                    debug!("User prompt, trying '{}'", profile.commands.enable);
                    let matched = session.send(
                        &profile.commands.enable,
                        &[Signal::PrivilegedPrompt, Signal::PasswordPrompt, Signal::UserPrompt],
                        timeouts.prompt_wait,
                    )?;
                    match matched {
                        Some(Signal::PrivilegedPrompt) => {
                            info!("Privileged prompt reached after enable");
                            return Ok(CliEntry::Privileged);
                        },
                        Some(Signal::PasswordPrompt) => session
                            .output()
                            .to_string(),
                        _ => {
                            warn!("'{}' did not grant privileges", profile.commands.enable);
                            continue;
                        },
                    }
                },
                Some(_) => text,
            };

            let Some(prompt) = self.login(session, ranking, &mut buffer)? else {
                return Ok(CliEntry::Failed);
            };
            if prompt == Signal::PrivilegedPrompt {
                return Ok(CliEntry::Privileged);
            }
            return self.escalate(session);
        }

        error!(
            "No privileged CLI access within {:?}",
            timeouts.reboot_wait
        );
        Ok(CliEntry::Failed)
    }

    /// Ranked credential login starting from `buffer`, the output that
    /// showed the login or password prompt. Returns the prompt reached.
    fn login<P: Port>(
        &self,
        session: &mut Session<'_, P>,
        ranking: &mut RankingStore,
        buffer: &mut String,
    ) -> Result<Option<Signal>> {
        let timeouts = session.timeouts();
        let mut reached = None;

        for cred in ranking.rank(self.credentials, Category::Credentials) {
            debug!("Trying credentials {}", cred.id);
            if session.sees(Signal::LoginPrompt, buffer)
                || !session.sees(Signal::PasswordPrompt, buffer)
            {
                session.send(
                    &cred.login,
                    &[Signal::PasswordPrompt, Signal::LoginFailed],
                    timeouts.login_attempt,
                )?;
            }
            let matched = session.send(
                &cred.password,
                &[Signal::PrivilegedPrompt, Signal::UserPrompt, Signal::LoginFailed],
                timeouts.login_attempt,
            )?;

            let ok = matches!(
                matched,
                Some(Signal::PrivilegedPrompt | Signal::UserPrompt)
            ) && !session.sees(Signal::LoginFailed, session.output());
            ranking.update(Category::Credentials, &cred.id, ok);
            if ok {
                info!("Logged into the CLI with {}", cred.id);
                reached = matched;
                break;
            }
            debug!("Credentials {} rejected", cred.id);
            *buffer = session
                .output()
                .to_string();
        }

        ranking.checkpoint(Category::Credentials);
        if reached.is_none() {
            error!("No CLI credentials were accepted");
        }
        Ok(reached)
    }

    /// Logged in at the user prompt: `enable` must lead straight to the
    /// privileged prompt. An enable password is not supported.
    fn escalate<P: Port>(&self, session: &mut Session<'_, P>) -> Result<CliEntry> {
        let profile = session.profile();
        let timeouts = session.timeouts();
        let matched = session.send(
            &profile.commands.enable,
            &[Signal::PasswordPrompt, Signal::PrivilegedPrompt],
            timeouts.prompt_wait,
        )?;
        match matched {
            Some(Signal::PrivilegedPrompt) => {
                info!("Privileged prompt reached after login");
                Ok(CliEntry::Privileged)
            },
            Some(_) => {
                error!("Privilege escalation asks for an enable password, which is unsupported");
                Ok(CliEntry::Failed)
            },
            None => {
                error!("Privilege escalation did not answer");
                Ok(CliEntry::Failed)
            },
        }
    }

    fn set_initial_password<P: Port>(
        &self,
        session: &mut Session<'_, P>,
        ctx: &mut RunContext,
    ) -> Result<()> {
        let profile = session.profile();
        let pacing = &session
            .timeouts()
            .pacing;
        info!("Device forces a password change, setting the initial password");

        let line = format!("{}\r", profile.initial_password);
        session.write(line.as_bytes())?;
        session.settle(pacing.settle);
        session.write(line.as_bytes())?;
        session.settle(pacing.settle);
        session.write(format!("{}\r", profile.commands.save).as_bytes())?;
        session.settle(pacing.settle_long);
        for _ in 0..3 {
            session.enter()?;
            session.settle(pacing.settle_short);
        }

        ctx.warn("Forced password change: initial password was set");
        Ok(())
    }

    /// Run the CLI reset batch, save, and reboot.
    pub fn execute_reset<P: Port>(
        &self,
        session: &mut Session<'_, P>,
        ranking: &mut RankingStore,
        ctx: &mut RunContext,
    ) -> Result<bool> {
        step!("Resetting from the CLI");
        ctx.outcome.reset_performed = true;
        if self
            .commands
            .is_empty()
        {
            error!("No CLI reset commands configured");
            return Ok(false);
        }

        let successes =
            session.run_reset_batch(self.commands, Signal::PrivilegedPrompt, ranking)?;
        if successes == 0 {
            error!("No CLI reset command succeeded");
            return Ok(false);
        }
        ctx.outcome
            .reset_method
            .get_or_insert(ResetMethod::Cli);

        if !session.save()? {
            ctx.warn("save after the CLI reset did not confirm success");
        }
        session.reboot()?;
        info!("Reset done, reboot initiated");
        Ok(true)
    }

    /// Status query, firmware inventory and TFTP probe.
    ///
    /// Results go into the record and the run context; nothing here fails
    /// the stage.
    pub fn perform_checks<P: Port>(
        &self,
        session: &mut Session<'_, P>,
        ctx: &mut RunContext,
    ) -> Result<bool> {
        step!("Running CLI checks");
        let profile = session.profile();
        let timeouts = session.timeouts();

        self.query_status(session, ctx)?;
        if let Some(detected) = ctx
            .switch_info
            .as_ref()
            .and_then(|info| info.model.clone())
        {
            if !detected.eq_ignore_ascii_case(ctx.model()) {
                ctx.warn(format!(
                    "Detected model {detected} differs from requested model {}",
                    ctx.model()
                ));
            }
        }

        session.send(
            &profile.commands.show_firmware,
            &[Signal::PrivilegedPrompt],
            timeouts.command_default,
        )?;
        let slots = self
            .inspector
            .firmware_slots(session.output());
        if slots.slots.is_empty() {
            ctx.warn("Could not read the firmware image inventory");
        } else {
            debug!("Firmware slots: {slots}");
            ctx.outcome
                .firmware_slots_before_update
                .get_or_insert_with(|| slots.to_string());
            ctx.slots = Some(slots);
        }

        self.probe_tftp(session, ctx)?;
        Ok(true)
    }

    fn query_status<P: Port>(
        &self,
        session: &mut Session<'_, P>,
        ctx: &mut RunContext,
    ) -> Result<()> {
        let profile = session.profile();
        session.send(
            &profile.commands.show_switch,
            &[Signal::PrivilegedPrompt],
            session
                .timeouts()
                .command_default,
        )?;
        let info = self
            .inspector
            .switch_info(session.output());
        debug!("Switch info: {info:?}");
        ctx.outcome
            .apply_switch_info(&info);
        ctx.switch_info = Some(info);
        Ok(())
    }

    /// Ping each candidate in order; the first that answers is used for
    /// downloads. Every ping is interrupted afterwards so an unreachable
    /// host cannot keep the console busy.
    fn probe_tftp<P: Port>(
        &self,
        session: &mut Session<'_, P>,
        ctx: &mut RunContext,
    ) -> Result<bool> {
        let profile = session.profile();
        let timeouts = session.timeouts();

        for ip in profile.tftp_candidates() {
            session.enter()?;
            session.settle(timeouts.pacing.settle_short);
            let matched = session.send(
                &profile.commands.ping(ip),
                &[Signal::PingSuccess, Signal::PingFail, Signal::PrivilegedPrompt],
                timeouts.ping_wait,
            )?;
            let reachable =
                matched.is_some() && session.sees(Signal::PingSuccess, session.output());

            session.write(b"\x03")?;
            session.settle(timeouts.pacing.settle);
            session.enter()?;

            if reachable {
                info!("TFTP server {ip} is reachable");
                ctx.outcome.tftp_ping_status = Some(TftpStatus::Success);
                ctx.outcome.tftp_ip_used = Some(ip.to_string());
                return Ok(true);
            }
            debug!("TFTP server {ip} did not answer");
        }

        ctx.outcome.tftp_ping_status = Some(TftpStatus::Fail);
        ctx.warn("No TFTP server candidate answered the ping");
        Ok(false)
    }

    /// Final status query, directory listing, post-configuration commands
    /// and the final save. Only the save decides the result.
    pub fn perform_final_checks<P: Port>(
        &self,
        session: &mut Session<'_, P>,
        ctx: &mut RunContext,
    ) -> Result<bool> {
        step!("Running final checks");
        let profile = session.profile();
        let timeouts = session.timeouts();

        self.query_status(session, ctx)?;

        session.send(&profile.commands.dir, &[Signal::PrivilegedPrompt], timeouts.command_default)?;
        let listing = session
            .output()
            .to_string();
        ctx.outcome.dir_parsed = self
            .inspector
            .directory(&listing);
        ctx.outcome.dir_output = Some(listing);

        for command in &profile.post_config_commands {
            session.send(
                command,
                &[Signal::SuccessGeneric, Signal::PrivilegedPrompt, Signal::ErrorGeneric],
                timeouts.command_default,
            )?;
            let ok = session.completed(session.output(), Signal::PrivilegedPrompt);
            if !ok {
                warn!("Post-configuration command '{command}' failed");
            }
            ctx.outcome
                .post_config_results
                .push(CommandResult {
                    command: command.clone(),
                    ok,
                });
        }

        let saved = session.save()?;
        if saved {
            info!("Final configuration saved");
        } else {
            error!("Final save failed");
        }
        Ok(saved)
    }
}
