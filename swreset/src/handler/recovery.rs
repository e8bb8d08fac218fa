//! Password recovery console.
//!
//! The recovery console is reached by sending a model-specific key
//! combination during a short window early in boot. Which combination works
//! depends on the hardware revision, so every configured combination is
//! sprayed, best-ranked first, as soon as a boot indicator shows up.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use log::{debug, error, info, warn};
use serde::Deserialize;

use super::Session;
use crate::config::{Credential, ResetCommand};
use crate::error::Result;
use crate::operator::{Operator, PowerCycleTarget};
use crate::outcome::{ResetMethod, RunContext};
use crate::pattern::Signal;
use crate::port::Port;
use crate::ranking::{Category, RankingStore};
use crate::step;

/// What to do when boot output does not carry the profile's model marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MismatchPolicy {
    /// Record a warning and continue.
    #[default]
    Warn,
    /// Stop before anything destructive is sent.
    Abort,
}

impl fmt::Display for MismatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Warn => "warn",
            Self::Abort => "abort",
        })
    }
}

impl FromStr for MismatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s
            .to_ascii_lowercase()
            .as_str()
        {
            "warn" => Ok(Self::Warn),
            "abort" => Ok(Self::Abort),
            other => Err(format!("unknown mismatch policy '{other}' (expected warn or abort)")),
        }
    }
}

/// Result of trying to enter the recovery console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryEntry {
    /// The console answered with the open prompt.
    Success,
    /// The console asks for credentials.
    AuthNeeded,
    /// No boot output, no recovery console, or no prompt: try the CLI.
    CliFallback,
    /// Boot output names a different model and the policy is to abort.
    Aborted,
}

/// Recovery console handler.
pub struct RecoveryHandler<'a> {
    credentials: &'a [Credential],
    commands: &'a [ResetCommand],
    policy: MismatchPolicy,
}

impl<'a> RecoveryHandler<'a> {
    /// `credentials` and `commands` are the recovery-category lists.
    pub fn new(
        credentials: &'a [Credential],
        commands: &'a [ResetCommand],
        policy: MismatchPolicy,
    ) -> Self {
        Self {
            credentials,
            commands,
            policy,
        }
    }

    /// Ask for a power cycle, catch the boot window, spray the key
    /// combinations and classify the console that answers.
    pub fn attempt_entry<P: Port>(
        &self,
        session: &mut Session<'_, P>,
        ranking: &RankingStore,
        operator: &mut dyn Operator,
        ctx: &mut RunContext,
    ) -> Result<RecoveryEntry> {
        step!("Trying to enter the password recovery console");
        operator.request_power_cycle(PowerCycleTarget::RecoveryConsole)?;

        let timeouts = session.timeouts();
        let profile = session.profile();

        let (boot, boot_output) = session.wait_for(&[Signal::BootIndicators], timeouts.reboot_wait)?;
        if boot.is_none() {
            warn!(
                "No boot indicators within {:?}, falling back to the CLI",
                timeouts.reboot_wait
            );
            return Ok(RecoveryEntry::CliFallback);
        }
        debug!("Boot indicator seen");
        ctx.mark_interaction_start();

        if let Some(marker) = &profile.base_model_indicator {
            if !boot_output
                .to_ascii_lowercase()
                .contains(&marker.to_ascii_lowercase())
            {
                error!("Model mismatch: boot output does not mention '{marker}'");
                ctx.warn(format!(
                    "Boot output does not contain model indicator '{marker}' (requested {})",
                    ctx.model()
                ));
                if self.policy == MismatchPolicy::Abort {
                    return Ok(RecoveryEntry::Aborted);
                }
                warn!("Continuing despite the mismatch (policy: {})", self.policy);
            }
        }

        let sprayed = Instant::now();
        for combo in ranking.rank(&profile.recovery_combinations, Category::RecoveryKeys) {
            let bytes = combo.bytes()?;
            debug!("Sending key combination {} ({})", combo.id, combo.hex);
            session.write(&bytes)?;
            session.settle(timeouts.pacing.key_interval);
        }
        debug!("Key spray took {:?}", sprayed.elapsed());

        let (entered, _) =
            session.wait_for(&[Signal::RecoveryIndicators], timeouts.recovery_console_wait)?;
        if entered.is_none() {
            warn!("Recovery console did not come up, falling back to the CLI");
            return Ok(RecoveryEntry::CliFallback);
        }
        info!("Entered the password recovery console");

        session.enter()?;
        session.settle(timeouts.pacing.settle);
        let (prompt, _) = session.wait_for(
            &[Signal::UserPrompt, Signal::LoginPrompt, Signal::PasswordPrompt],
            timeouts.prompt_wait,
        )?;

        match prompt {
            Some(Signal::UserPrompt) => {
                info!("Recovery console is open (no password)");
                ctx.outcome.reset_method = Some(ResetMethod::RecoveryNoPassword);
                Ok(RecoveryEntry::Success)
            },
            Some(_) => {
                info!("Recovery console asks for credentials");
                Ok(RecoveryEntry::AuthNeeded)
            },
            None => {
                warn!("Recovery console did not show a prompt");
                Ok(RecoveryEntry::CliFallback)
            },
        }
    }

    /// Try the ranked recovery credentials until the open prompt appears.
    pub fn authorize<P: Port>(
        &self,
        session: &mut Session<'_, P>,
        ranking: &mut RankingStore,
        ctx: &mut RunContext,
    ) -> Result<bool> {
        step!("Authorizing in the recovery console");
        let timeouts = session.timeouts();
        let mut authorized = false;

        for cred in ranking.rank(self.credentials, Category::Credentials) {
            debug!("Trying credentials {}", cred.id);
            session.send(&cred.login, &[Signal::PasswordPrompt], timeouts.login_attempt)?;
            session.send(
                &cred.password,
                &[Signal::UserPrompt, Signal::LoginFailed],
                timeouts.login_attempt,
            )?;

            let output = session.output();
            let ok = session.sees(Signal::UserPrompt, output)
                && !session.sees(Signal::LoginFailed, output);
            ranking.update(Category::Credentials, &cred.id, ok);
            if ok {
                info!("Logged into the recovery console with {}", cred.id);
                ctx.outcome.reset_method = Some(ResetMethod::RecoveryPassword);
                authorized = true;
                break;
            }
            debug!("Credentials {} rejected", cred.id);
        }

        ranking.checkpoint(Category::Credentials);
        if !authorized {
            error!("No recovery credentials were accepted");
        }
        Ok(authorized)
    }

    /// Run the recovery reset batch and reboot on success.
    pub fn execute_reset<P: Port>(
        &self,
        session: &mut Session<'_, P>,
        ranking: &mut RankingStore,
        ctx: &mut RunContext,
    ) -> Result<bool> {
        step!("Resetting from the recovery console");
        ctx.outcome.reset_performed = true;

        let successes = session.run_reset_batch(self.commands, Signal::UserPrompt, ranking)?;
        if successes == 0 {
            error!("No recovery reset command succeeded");
            return Ok(false);
        }

        info!("Rebooting after the reset");
        session.reboot()?;
        info!("Reset done, reboot initiated");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::testing::Fixture;
    use crate::operator::AutoOperator;
    use crate::outcome::RunOutcome;
    use crate::port::mock::ScriptedPort;

    fn ctx() -> RunContext {
        RunContext::new(RunOutcome::new("scripted", "D-Link", "DES-3200-28"), false)
    }

    fn creds() -> Vec<Credential> {
        vec![
            Credential {
                id: "admin_wrong".into(),
                login: "admin".into(),
                password: "wrong".into(),
            },
            Credential {
                id: "admin_empty".into(),
                login: "admin".into(),
                password: String::new(),
            },
        ]
    }

    #[test]
    fn test_no_boot_indicator_falls_back_without_keys() {
        let mut fx = Fixture::new(ScriptedPort::new().with_initial("some noise\r\n"));
        let ranking = RankingStore::in_memory();
        let handler = RecoveryHandler::new(&[], &[], MismatchPolicy::Warn);
        let mut ctx = ctx();

        let result = handler
            .attempt_entry(&mut fx.session(), &ranking, &mut AutoOperator::default(), &mut ctx)
            .unwrap();

        assert_eq!(result, RecoveryEntry::CliFallback);
        assert!(fx.port.raw_writes().is_empty());
        assert!(ctx.interaction_start().is_none());
    }

    #[test]
    fn test_open_prompt_is_success_without_password() {
        let port = ScriptedPort::new()
            .with_initial("Boot Procedure V1.00.B008\r\n")
            .once_bytes(&[0x1e], "Password Recovery Mode\r\n")
            .once("\r", "\r\n> ");
        let mut fx = Fixture::new(port);
        let ranking = RankingStore::in_memory();
        let handler = RecoveryHandler::new(&[], &[], MismatchPolicy::Warn);
        let mut ctx = ctx();

        let result = handler
            .attempt_entry(&mut fx.session(), &ranking, &mut AutoOperator::default(), &mut ctx)
            .unwrap();

        assert_eq!(result, RecoveryEntry::Success);
        assert_eq!(ctx.outcome.reset_method, Some(ResetMethod::RecoveryNoPassword));
        assert!(ctx.interaction_start().is_some());
        // both combinations sprayed, in configured order
        let raw = fx.port.raw_writes();
        assert_eq!(raw[0], vec![0x19]);
        assert_eq!(raw[1], vec![0x1e]);
    }

    #[test]
    fn test_login_prompt_needs_auth() {
        let port = ScriptedPort::new()
            .with_initial("Boot Procedure\r\n")
            .once_bytes(&[0x19], "Password Recovery Mode\r\n")
            .once("\r", "UserName:");
        let mut fx = Fixture::new(port);
        let handler = RecoveryHandler::new(&[], &[], MismatchPolicy::Warn);

        let result = handler
            .attempt_entry(
                &mut fx.session(),
                &RankingStore::in_memory(),
                &mut AutoOperator::default(),
                &mut ctx(),
            )
            .unwrap();
        assert_eq!(result, RecoveryEntry::AuthNeeded);
    }

    #[test]
    fn test_model_mismatch_policy() {
        let script = || {
            ScriptedPort::new()
                .with_initial("Boot Procedure DGS-1210\r\n")
                .once_bytes(&[0x19], "Password Recovery Mode\r\n")
                .once("\r", "> ")
        };

        let mut fx = Fixture::new(script());
        fx.profile.base_model_indicator = Some("DES-3200".into());
        let handler = RecoveryHandler::new(&[], &[], MismatchPolicy::Abort);
        let mut abort_ctx = ctx();
        let result = handler
            .attempt_entry(
                &mut fx.session(),
                &RankingStore::in_memory(),
                &mut AutoOperator::default(),
                &mut abort_ctx,
            )
            .unwrap();
        assert_eq!(result, RecoveryEntry::Aborted);
        assert!(fx.port.raw_writes().is_empty());
        assert_eq!(abort_ctx.outcome.warnings.len(), 1);

        let mut fx = Fixture::new(script());
        fx.profile.base_model_indicator = Some("DES-3200".into());
        let handler = RecoveryHandler::new(&[], &[], MismatchPolicy::Warn);
        let result = handler
            .attempt_entry(
                &mut fx.session(),
                &RankingStore::in_memory(),
                &mut AutoOperator::default(),
                &mut ctx(),
            )
            .unwrap();
        assert_eq!(result, RecoveryEntry::Success);
    }

    #[test]
    fn test_authorize_tries_until_open_prompt() {
        let port = ScriptedPort::new()
            .on("admin\r", "PassWord:")
            .on("wrong\r", "Fail!\r\nUserName:")
            .once("\r", "\r\n> ");
        let mut fx = Fixture::new(port);
        let mut ranking = RankingStore::in_memory();
        let credentials = creds();
        let handler = RecoveryHandler::new(&credentials, &[], MismatchPolicy::Warn);
        let mut ctx = ctx();

        assert!(handler.authorize(&mut fx.session(), &mut ranking, &mut ctx).unwrap());
        assert_eq!(ctx.outcome.reset_method, Some(ResetMethod::RecoveryPassword));
        assert_eq!(ranking.record(Category::Credentials, "admin_wrong").success, 0);
        assert_eq!(ranking.record(Category::Credentials, "admin_empty").success, 1);
    }

    #[test]
    fn test_authorize_exhausted() {
        let port = ScriptedPort::new()
            .on("admin\r", "PassWord:")
            .on("\r", "Fail!\r\nUserName:");
        let mut fx = Fixture::new(port);
        let mut ranking = RankingStore::in_memory();
        let credentials = creds();
        let handler = RecoveryHandler::new(&credentials, &[], MismatchPolicy::Warn);

        assert!(!handler.authorize(&mut fx.session(), &mut ranking, &mut ctx()).unwrap());
        assert_eq!(ranking.record(Category::Credentials, "admin_wrong").total, 1);
        assert_eq!(ranking.record(Category::Credentials, "admin_empty").total, 1);
    }

    #[test]
    fn test_execute_reset_reboots_on_success() {
        let port = ScriptedPort::new()
            .on("reset config", "Success.\r\n> ")
            .once("reboot\r", "Rebooting...");
        let mut fx = Fixture::new(port);
        let mut ranking = RankingStore::in_memory();
        let commands = vec![ResetCommand {
            id: "rec_reset_config".into(),
            command: "reset config".into(),
        }];
        let handler = RecoveryHandler::new(&[], &commands, MismatchPolicy::Warn);
        let mut ctx = ctx();

        assert!(handler.execute_reset(&mut fx.session(), &mut ranking, &mut ctx).unwrap());
        assert!(ctx.outcome.reset_performed);
        assert!(fx.port.wrote("reboot\r"));
    }

    #[test]
    fn test_execute_reset_saves_only_reset_statistics() {
        let dir = tempfile::tempdir().unwrap();
        let port = ScriptedPort::new()
            .on("reset config", "Success.\r\n> ")
            .once("reboot\r", "Rebooting...");
        let mut fx = Fixture::new(port);
        let mut ranking = RankingStore::load(dir.path()).unwrap();
        let commands = vec![ResetCommand {
            id: "rec_reset_config".into(),
            command: "reset config".into(),
        }];
        let handler = RecoveryHandler::new(&[], &commands, MismatchPolicy::Warn);

        assert!(handler.execute_reset(&mut fx.session(), &mut ranking, &mut ctx()).unwrap());
        assert!(dir.path().join("reset_commands_stats.json").exists());
        assert!(!dir.path().join("credentials_stats.json").exists());
    }

    #[test]
    fn test_execute_reset_all_fail_skips_reboot() {
        let port = ScriptedPort::new().on("reset config", "Invalid command\r\n> ");
        let mut fx = Fixture::new(port);
        let commands = vec![ResetCommand {
            id: "rec_reset_config".into(),
            command: "reset config".into(),
        }];
        let handler = RecoveryHandler::new(&[], &commands, MismatchPolicy::Warn);

        assert!(
            !handler
                .execute_reset(&mut fx.session(), &mut RankingStore::in_memory(), &mut ctx())
                .unwrap()
        );
        assert!(!fx.port.wrote("reboot"));
    }

    #[test]
    fn test_mismatch_policy_parse() {
        assert_eq!("ABORT".parse::<MismatchPolicy>().unwrap(), MismatchPolicy::Abort);
        assert!("maybe".parse::<MismatchPolicy>().is_err());
    }
}
