//! Orchestration engine.
//!
//! A run is a walk through a fixed state graph. Each state calls one
//! handler operation, the outcome selects the next state through
//! [`next_state`], and the walk ends in [`State::Finished`]. The walk is
//! bounded by [`MAX_TRANSITIONS`]; a handler error or panic ends it
//! immediately with a failed record. Whatever happens, the record is finalized, sent to the
//! event listener once, and the channel is closed.
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use swreset::{Channel, DeviceData, Engine, SerialConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let data = DeviceData::load(Path::new("config"), "D-Link", "DES-3200-28")?;
//!     let channel = Channel::open(&SerialConfig::new("/dev/ttyUSB0", data.profile.baudrate))?;
//!
//!     let outcome = Engine::new(&data, "/dev/ttyUSB0")
//!         .with_force_reflash(false)
//!         .run(channel);
//!     println!("{}", outcome.overall_status);
//!     Ok(())
//! }
//! ```

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::Sender;

use log::{error, info};
use serde::Serialize;

use crate::channel::Channel;
use crate::config::DeviceData;
use crate::error::{Error, Result};
use crate::handler::{
    BootMenuHandler, CliEntry, CliHandler, FirmwareHandler, MismatchPolicy, RecoveryEntry,
    RecoveryHandler, Session, UpdateOutcome,
};
use crate::inspect::{Inspector, KeyValueInspector};
use crate::operator::{AutoOperator, Operator};
use crate::outcome::{OverallStatus, ResetStatus, RunContext, RunEvent, RunOutcome, Transition};
use crate::port::Port;
use crate::ranking::RankingStore;
use crate::step;

/// Upper bound on state transitions per run.
pub const MAX_TRANSITIONS: usize = 30;

/// Credential list used in the recovery console.
const RECOVERY_CREDENTIALS: &str = "recovery";
/// Credential list used in the CLI.
const CLI_CREDENTIALS: &str = "cli";

/// Workflow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    /// Channel open, nothing sent yet.
    Start,
    /// Catching the recovery console during boot.
    RecoveryEntry,
    /// Logging into the recovery console.
    RecoveryAuth,
    /// Reset from the recovery console.
    RecoveryReset,
    /// Reaching the privileged CLI.
    CliEntry,
    /// Reset from the CLI.
    CliReset,
    /// Last-resort boot menu hand-off.
    BootMenuEntry,
    /// Status, inventory and TFTP probe.
    CliChecks,
    /// Boot PROM upgrade.
    PromUpdate,
    /// Runtime firmware upgrade.
    FirmwareUpdate,
    /// Final diagnostics and save.
    FinalChecks,
    /// Failure path; always followed by `Finished`.
    Error,
    /// Terminal.
    Finished,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "START",
            Self::RecoveryEntry => "RECOVERY_ENTRY",
            Self::RecoveryAuth => "RECOVERY_AUTH",
            Self::RecoveryReset => "RECOVERY_RESET",
            Self::CliEntry => "CLI_ENTRY",
            Self::CliReset => "CLI_RESET",
            Self::BootMenuEntry => "BOOT_MENU_ENTRY",
            Self::CliChecks => "CLI_CHECKS",
            Self::PromUpdate => "PROM_UPDATE",
            Self::FirmwareUpdate => "FIRMWARE_UPDATE",
            Self::FinalChecks => "FINAL_CHECKS",
            Self::Error => "ERROR",
            Self::Finished => "FINISHED",
        })
    }
}

/// Outcome of the handler call made in a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The channel is open.
    Opened,
    /// Recovery console entry.
    Recovery(RecoveryEntry),
    /// Recovery console login.
    Authorized(bool),
    /// Reset batch (recovery or CLI).
    Reset(bool),
    /// CLI entry.
    Cli(CliEntry),
    /// Boot menu hand-off.
    BootMenu(bool),
    /// CLI checks.
    Checks(bool),
    /// PROM or firmware update.
    Update(UpdateOutcome),
    /// Final checks.
    FinalChecks(bool),
    /// Nothing to do in this state.
    Done,
}

/// Transition table. `reset_performed` decides where a privileged CLI
/// goes: to the reset the first time, to the checks afterwards.
pub fn next_state(state: State, step: Step, reset_performed: bool) -> State {
    match (state, step) {
        (State::Start, _) => State::RecoveryEntry,

        (State::RecoveryEntry, Step::Recovery(RecoveryEntry::Success)) => State::RecoveryReset,
        (State::RecoveryEntry, Step::Recovery(RecoveryEntry::AuthNeeded)) => State::RecoveryAuth,
        (State::RecoveryEntry, Step::Recovery(RecoveryEntry::Aborted)) => State::Error,
        (State::RecoveryEntry, _) => State::CliEntry,

        (State::RecoveryAuth, Step::Authorized(true)) => State::RecoveryReset,
        (State::RecoveryAuth, _) => State::CliEntry,

        (State::RecoveryReset | State::CliReset, Step::Reset(true))
        | (State::BootMenuEntry, Step::BootMenu(true))
        | (State::CliEntry, Step::Cli(CliEntry::Retry))
        | (
            State::PromUpdate | State::FirmwareUpdate,
            Step::Update(UpdateOutcome::RebootNeeded),
        ) => State::CliEntry,

        (State::CliEntry, Step::Cli(CliEntry::Privileged)) => {
            if reset_performed {
                State::CliChecks
            } else {
                State::CliReset
            }
        },
        (State::CliEntry, _) => State::BootMenuEntry,

        (State::CliChecks, Step::Checks(true)) => State::PromUpdate,

        (State::PromUpdate, Step::Update(UpdateOutcome::Skip | UpdateOutcome::Success)) => {
            State::FirmwareUpdate
        },
        (State::FirmwareUpdate, Step::Update(UpdateOutcome::Skip | UpdateOutcome::Success)) => {
            State::FinalChecks
        },

        (State::FinalChecks | State::Error | State::Finished, _) => State::Finished,

        (
            State::RecoveryReset
            | State::CliReset
            | State::BootMenuEntry
            | State::CliChecks
            | State::PromUpdate
            | State::FirmwareUpdate,
            _,
        ) => State::Error,
    }
}

/// Record what a step means for the outcome beyond the next state.
fn record_effects(state: State, step: Step, ctx: &mut RunContext) {
    match (state, step) {
        (State::RecoveryReset | State::CliReset, Step::Reset(ok)) => {
            ctx.outcome.reset_status = if ok {
                ResetStatus::Success
            } else {
                ResetStatus::Failed
            };
        },
        (State::FinalChecks, Step::FinalChecks(ok)) => {
            ctx.outcome.overall_status = if ok {
                OverallStatus::Success
            } else {
                OverallStatus::Fail
            };
        },
        (State::Error, _) => ctx.outcome.overall_status = OverallStatus::Fail,
        _ => {},
    }
}

fn transition(
    ctx: &mut RunContext,
    events: Option<&Sender<RunEvent>>,
    from: State,
    to: State,
) {
    step!("{from} -> {to}");
    let t = Transition { from, to };
    ctx.outcome
        .transitions
        .push(t);
    if let Some(tx) = events {
        let _ = tx.send(RunEvent::StateChanged(t));
    }
}

/// Walk the state graph from [`State::Start`] to [`State::Finished`].
///
/// `handle` performs the work of one state. At most [`MAX_TRANSITIONS`]
/// transitions are taken; the last one is forced to `Finished` when the
/// limit is reached. `stop` is polled between transitions.
pub(crate) fn run_machine<F>(
    ctx: &mut RunContext,
    events: Option<&Sender<RunEvent>>,
    stop: &dyn Fn() -> bool,
    mut handle: F,
) -> State
where
    F: FnMut(State, &mut RunContext) -> Result<Step>,
{
    let mut state = State::Start;
    let mut taken = 0;

    while state != State::Finished {
        let next = if taken + 1 >= MAX_TRANSITIONS {
            ctx.warn(format!(
                "Transition limit of {MAX_TRANSITIONS} reached in {state}, aborting the run"
            ));
            ctx.outcome.overall_status = OverallStatus::Fail;
            State::Finished
        } else if stop() {
            ctx.warn(format!("Stop requested in {state}"));
            ctx.outcome.overall_status = OverallStatus::Fail;
            State::Finished
        } else {
            match panic::catch_unwind(AssertUnwindSafe(|| handle(state, ctx))) {
                Ok(Ok(step)) => {
                    record_effects(state, step, ctx);
                    next_state(state, step, ctx.outcome.reset_performed)
                },
                Ok(Err(e)) => fault(ctx, state, &e.to_string()),
                Err(payload) => {
                    let cause = format!("panic: {}", panic_message(&*payload));
                    fault(ctx, state, &cause)
                },
            }
        };

        transition(ctx, events, state, next);
        state = next;
        taken += 1;
    }

    state
}

fn fault(ctx: &mut RunContext, state: State, cause: &str) -> State {
    error!("Unexpected fault in {state}: {cause}");
    ctx.warn(format!("Unexpected fault in {state}: {cause}"));
    ctx.outcome.overall_status = OverallStatus::Fail;
    State::Finished
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| {
            payload
                .downcast_ref::<String>()
                .map(String::as_str)
        })
        .unwrap_or("unknown cause")
}

/// One run against one device.
///
/// Configured with `with_*` methods, then consumed by [`run`](Self::run).
pub struct Engine<'d> {
    data: &'d DeviceData,
    port_name: String,
    force_reflash: bool,
    ranking: RankingStore,
    inspector: Box<dyn Inspector>,
    operator: Box<dyn Operator>,
    events: Option<Sender<RunEvent>>,
    policy: MismatchPolicy,
    stop: Box<dyn Fn() -> bool + Send>,
}

impl<'d> Engine<'d> {
    /// Engine for `data` on the port called `port_name`.
    ///
    /// Defaults: in-memory ranking, [`KeyValueInspector`], an
    /// [`AutoOperator`] that declines manual transfers, no event listener,
    /// [`MismatchPolicy::Warn`], and the global interrupt checker as stop
    /// request.
    pub fn new(data: &'d DeviceData, port_name: impl Into<String>) -> Self {
        Self {
            data,
            port_name: port_name.into(),
            force_reflash: false,
            ranking: RankingStore::in_memory(),
            inspector: Box::new(KeyValueInspector::new()),
            operator: Box::new(AutoOperator::default()),
            events: None,
            policy: MismatchPolicy::default(),
            stop: Box::new(crate::is_interrupted_requested),
        }
    }

    /// Reflash PROM and firmware once even when they are current.
    #[must_use]
    pub fn with_force_reflash(mut self, force: bool) -> Self {
        self.force_reflash = force;
        self
    }

    /// Ranking store to read and update.
    #[must_use]
    pub fn with_ranking(mut self, ranking: RankingStore) -> Self {
        self.ranking = ranking;
        self
    }

    /// Parser for diagnostic output.
    #[must_use]
    pub fn with_inspector(mut self, inspector: Box<dyn Inspector>) -> Self {
        self.inspector = inspector;
        self
    }

    /// Operator for power cycles and manual transfers.
    #[must_use]
    pub fn with_operator(mut self, operator: Box<dyn Operator>) -> Self {
        self.operator = operator;
        self
    }

    /// Listener for [`RunEvent`]s.
    #[must_use]
    pub fn with_events(mut self, events: Sender<RunEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Reaction to a model mismatch during recovery entry.
    #[must_use]
    pub fn with_mismatch_policy(mut self, policy: MismatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Stop request, polled between transitions.
    #[must_use]
    pub fn with_stop<F>(mut self, stop: F) -> Self
    where
        F: Fn() -> bool + Send + 'static,
    {
        self.stop = Box::new(stop);
        self
    }

    /// Ranking store after (or before) the run.
    pub fn ranking(&self) -> &RankingStore {
        &self.ranking
    }

    /// Drive the device over `channel` until the run ends.
    ///
    /// Never fails: every problem ends up in the returned record, which is
    /// also sent as the single [`RunEvent::Finished`]. The channel is
    /// closed before returning.
    pub fn run<P: Port>(&mut self, mut channel: Channel<P>) -> RunOutcome {
        let data = self.data;
        let profile = &data.profile;
        channel.set_poll_interval(
            data.timeouts
                .pacing
                .poll_interval,
        );
        step!(
            "Starting run for {} {} on {}",
            data.vendor, data.model, self.port_name
        );

        let mut ctx = RunContext::new(
            RunOutcome::new(&self.port_name, &data.vendor, &data.model),
            self.force_reflash,
        );

        let recovery = RecoveryHandler::new(
            data.credentials
                .get(RECOVERY_CREDENTIALS),
            data.reset_commands
                .get(&profile.recovery_commands),
            self.policy,
        );
        let cli = CliHandler::new(
            data.credentials
                .get(CLI_CREDENTIALS),
            data.reset_commands
                .get(&profile.cli_commands),
            self.inspector
                .as_ref(),
        );
        let firmware = FirmwareHandler::new(
            data.catalog
                .get(&data.model),
        );
        let ranking = &mut self.ranking;
        let operator = self
            .operator
            .as_mut();

        let final_state = run_machine(
            &mut ctx,
            self.events.as_ref(),
            &*self.stop,
            |state, ctx| {
                if !channel.is_open() {
                    return Err(Error::ChannelClosed);
                }
                let mut session =
                    Session::new(&mut channel, profile, &data.patterns, &data.timeouts);
                Ok(match state {
                    State::Start => Step::Opened,
                    State::RecoveryEntry => Step::Recovery(recovery.attempt_entry(
                        &mut session,
                        ranking,
                        operator,
                        ctx,
                    )?),
                    State::RecoveryAuth => {
                        Step::Authorized(recovery.authorize(&mut session, ranking, ctx)?)
                    },
                    State::RecoveryReset => {
                        Step::Reset(recovery.execute_reset(&mut session, ranking, ctx)?)
                    },
                    State::CliEntry => Step::Cli(cli.attempt_entry(&mut session, ranking, ctx)?),
                    State::CliReset => Step::Reset(cli.execute_reset(&mut session, ranking, ctx)?),
                    State::BootMenuEntry => Step::BootMenu(
                        BootMenuHandler.enter_and_hand_off(&mut session, operator, ctx)?,
                    ),
                    State::CliChecks => Step::Checks(cli.perform_checks(&mut session, ctx)?),
                    State::PromUpdate => Step::Update(firmware.update_prom(&mut session, ctx)?),
                    State::FirmwareUpdate => {
                        Step::Update(firmware.update_firmware(&mut session, ctx)?)
                    },
                    State::FinalChecks => {
                        Step::FinalChecks(cli.perform_final_checks(&mut session, ctx)?)
                    },
                    State::Error | State::Finished => Step::Done,
                })
            },
        );

        ctx.outcome.interaction_duration = ctx
            .interaction_start()
            .map(|start| {
                start
                    .elapsed()
                    .as_secs_f64()
            });
        ctx.outcome.final_state = Some(final_state);
        if ctx.outcome.overall_status == OverallStatus::Unknown {
            ctx.outcome.overall_status = OverallStatus::Fail;
        }
        info!(
            "Run finished: {} after {} transitions",
            ctx.outcome.overall_status,
            ctx.outcome
                .transitions
                .len()
        );

        let outcome = ctx.outcome;
        if let Some(tx) = &self.events {
            let _ = tx.send(RunEvent::Finished(Box::new(outcome.clone())));
        }
        channel.close();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    use crate::config::device::test_profile;
    use crate::config::{FirmwareCatalog, ResetCommand, ResetCommands};
    use crate::handler::testing;
    use crate::port::mock::ScriptedPort;

    const PROMPT: &str = "\r\nDES-3200-28:admin#";

    fn ctx() -> RunContext {
        RunContext::new(RunOutcome::new("scripted", "D-Link", "DES-3200-28"), false)
    }

    fn data() -> DeviceData {
        let mut reset_commands = ResetCommands::default();
        reset_commands.insert(
            "cli",
            vec![ResetCommand {
                id: "cli_reset_config".into(),
                command: "reset config".into(),
            }],
        );
        DeviceData::from_parts(
            "D-Link",
            "DES-3200-28",
            test_profile(),
            testing::patterns(),
            Default::default(),
            reset_commands,
            testing::timeouts(),
            FirmwareCatalog::default(),
        )
        .unwrap()
    }

    /// Every step value the handlers can produce.
    fn all_steps() -> Vec<Step> {
        let mut steps = vec![Step::Opened, Step::Done];
        for entry in [
            RecoveryEntry::Success,
            RecoveryEntry::AuthNeeded,
            RecoveryEntry::CliFallback,
            RecoveryEntry::Aborted,
        ] {
            steps.push(Step::Recovery(entry));
        }
        for entry in [CliEntry::Privileged, CliEntry::Retry, CliEntry::Failed] {
            steps.push(Step::Cli(entry));
        }
        for update in [
            UpdateOutcome::Skip,
            UpdateOutcome::Success,
            UpdateOutcome::RebootNeeded,
            UpdateOutcome::Error,
        ] {
            steps.push(Step::Update(update));
        }
        for ok in [true, false] {
            steps.extend([
                Step::Authorized(ok),
                Step::Reset(ok),
                Step::BootMenu(ok),
                Step::Checks(ok),
                Step::FinalChecks(ok),
            ]);
        }
        steps
    }

    struct XorShift(u64);

    impl XorShift {
        fn next(&mut self) -> u64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            self.0
        }
    }

    #[test]
    fn test_transition_table() {
        use State as S;
        assert_eq!(next_state(S::Start, Step::Opened, false), S::RecoveryEntry);
        assert_eq!(
            next_state(S::RecoveryEntry, Step::Recovery(RecoveryEntry::Success), false),
            S::RecoveryReset
        );
        assert_eq!(
            next_state(S::RecoveryEntry, Step::Recovery(RecoveryEntry::AuthNeeded), false),
            S::RecoveryAuth
        );
        assert_eq!(
            next_state(S::RecoveryEntry, Step::Recovery(RecoveryEntry::CliFallback), false),
            S::CliEntry
        );
        assert_eq!(
            next_state(S::RecoveryEntry, Step::Recovery(RecoveryEntry::Aborted), false),
            S::Error
        );
        assert_eq!(next_state(S::RecoveryAuth, Step::Authorized(false), false), S::CliEntry);
        assert_eq!(next_state(S::RecoveryReset, Step::Reset(true), true), S::CliEntry);
        assert_eq!(next_state(S::RecoveryReset, Step::Reset(false), true), S::Error);
        assert_eq!(next_state(S::CliEntry, Step::Cli(CliEntry::Privileged), false), S::CliReset);
        assert_eq!(next_state(S::CliEntry, Step::Cli(CliEntry::Privileged), true), S::CliChecks);
        assert_eq!(next_state(S::CliEntry, Step::Cli(CliEntry::Retry), false), S::CliEntry);
        assert_eq!(next_state(S::CliEntry, Step::Cli(CliEntry::Failed), true), S::BootMenuEntry);
        assert_eq!(next_state(S::BootMenuEntry, Step::BootMenu(true), false), S::CliEntry);
        assert_eq!(next_state(S::BootMenuEntry, Step::BootMenu(false), false), S::Error);
        assert_eq!(next_state(S::CliChecks, Step::Checks(false), true), S::Error);
        assert_eq!(
            next_state(S::PromUpdate, Step::Update(UpdateOutcome::RebootNeeded), true),
            S::CliEntry
        );
        assert_eq!(
            next_state(S::PromUpdate, Step::Update(UpdateOutcome::Skip), true),
            S::FirmwareUpdate
        );
        assert_eq!(
            next_state(S::FirmwareUpdate, Step::Update(UpdateOutcome::Success), true),
            S::FinalChecks
        );
        assert_eq!(
            next_state(S::FirmwareUpdate, Step::Update(UpdateOutcome::Error), true),
            S::Error
        );
        assert_eq!(next_state(S::FinalChecks, Step::FinalChecks(false), true), S::Finished);
        assert_eq!(next_state(S::Error, Step::Done, true), S::Finished);
    }

    #[test]
    fn test_terminates_for_arbitrary_outcomes() {
        let steps = all_steps();
        for seed in 1..=500u64 {
            let mut rng = XorShift(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15));
            let mut ctx = ctx();
            let final_state = run_machine(&mut ctx, None, &|| false, |_, ctx| {
                let pick = rng.next();
                if pick % 11 == 0 {
                    ctx.outcome.reset_performed = true;
                }
                Ok(steps[(pick % steps.len() as u64) as usize])
            });

            assert_eq!(final_state, State::Finished, "seed {seed}");
            assert!(ctx.outcome.transitions.len() <= MAX_TRANSITIONS, "seed {seed}");
            assert_eq!(
                ctx.outcome
                    .transitions
                    .last()
                    .map(|t| t.to),
                Some(State::Finished)
            );
        }
    }

    #[test]
    fn test_oscillation_hits_the_ceiling() {
        let mut ctx = ctx();
        run_machine(&mut ctx, None, &|| false, |state, _| {
            Ok(match state {
                State::CliEntry => Step::Cli(CliEntry::Retry),
                _ => Step::Recovery(RecoveryEntry::CliFallback),
            })
        });
        assert_eq!(ctx.outcome.transitions.len(), MAX_TRANSITIONS);
        assert_eq!(ctx.outcome.overall_status, OverallStatus::Fail);
        assert_eq!(ctx.outcome.warnings.len(), 1);
    }

    #[test]
    fn test_handler_error_finishes_failed() {
        let mut ctx = ctx();
        let state = run_machine(&mut ctx, None, &|| false, |state, _| match state {
            State::Start => Ok(Step::Opened),
            _ => Err(Error::ChannelClosed),
        });
        assert_eq!(state, State::Finished);
        assert_eq!(ctx.outcome.overall_status, OverallStatus::Fail);
        assert_eq!(
            ctx.outcome.transitions,
            vec![
                Transition {
                    from: State::Start,
                    to: State::RecoveryEntry
                },
                Transition {
                    from: State::RecoveryEntry,
                    to: State::Finished
                },
            ]
        );
    }

    #[test]
    fn test_handler_panic_finishes_failed() {
        let mut ctx = ctx();
        let state = run_machine(&mut ctx, None, &|| false, |state, _| match state {
            State::Start => Ok(Step::Opened),
            _ => panic!("console vanished"),
        });
        assert_eq!(state, State::Finished);
        assert_eq!(ctx.outcome.overall_status, OverallStatus::Fail);
        assert_eq!(ctx.outcome.transitions.len(), 2);
        assert!(ctx.outcome.warnings[0].contains("console vanished"));
    }

    #[test]
    fn test_stop_request_between_transitions() {
        let mut ctx = ctx();
        let mut calls = 0;
        let polls = std::cell::Cell::new(0);
        let stop = || {
            polls.set(polls.get() + 1);
            polls.get() > 2
        };
        run_machine(&mut ctx, None, &stop, |_, _| {
            calls += 1;
            Ok(Step::Recovery(RecoveryEntry::CliFallback))
        });
        assert_eq!(calls, 2);
        assert_eq!(ctx.outcome.overall_status, OverallStatus::Fail);
        assert_eq!(ctx.outcome.transitions.len(), 3);
    }

    #[test]
    fn test_full_cli_run() {
        let _ = env_logger::builder()
            .is_test(true)
            .try_init();
        let port = ScriptedPort::new()
            .on("\r", PROMPT)
            .on("reset config", "Success.\r\nDES-3200-28:admin#")
            .on("save\r", "Saving all configurations ... Done.\r\nDES-3200-28:admin#")
            .on("reboot\r", "Rebooting...")
            .on(
                "show switch",
                "Device Type : DES-3200-28 Fast Ethernet Switch\r\n\
                 Firmware Version : Build 1.85.B008\r\nDES-3200-28:admin#",
            )
            .on(
                "show firmware information",
                "*1   1.85.B008  3802212\r\n 2   (Empty)\r\nDES-3200-28:admin#",
            )
            .on("ping", "Reply from 10.90.90.1\r\n")
            .on("dir", "   1 RUN(*) -rw- 3802212 runtime.had\r\nDES-3200-28:admin#")
            .on("enable telnet", "Success.\r\nDES-3200-28:admin#");
        let data = data();
        let (tx, rx) = mpsc::channel();

        let mut engine = Engine::new(&data, "scripted")
            .with_events(tx)
            .with_stop(|| false);
        let outcome = engine.run(Channel::new(port.clone()));

        assert_eq!(outcome.overall_status, OverallStatus::Success);
        assert_eq!(outcome.final_state, Some(State::Finished));
        assert_eq!(outcome.reset_status, ResetStatus::Success);
        assert_eq!(outcome.reset_method, Some(crate::outcome::ResetMethod::Cli));
        assert_eq!(outcome.dir_parsed, vec!["runtime.had".to_string()]);
        let path: Vec<State> = outcome
            .transitions
            .iter()
            .map(|t| t.to)
            .collect();
        assert_eq!(
            path,
            vec![
                State::RecoveryEntry,
                State::CliEntry,
                State::CliReset,
                State::CliEntry,
                State::CliChecks,
                State::PromUpdate,
                State::FirmwareUpdate,
                State::FinalChecks,
                State::Finished,
            ]
        );
        assert!(port.is_closed());
        assert_eq!(
            engine
                .ranking()
                .record(crate::ranking::Category::ResetCommands, "cli_reset_config")
                .success,
            1
        );

        let events: Vec<RunEvent> = rx.try_iter().collect();
        let finished = events
            .iter()
            .filter(|e| matches!(e, RunEvent::Finished(_)))
            .count();
        assert_eq!(finished, 1);
        assert!(matches!(events.last(), Some(RunEvent::Finished(_))));
    }

    #[test]
    fn test_silent_device_ends_in_error() {
        let port = ScriptedPort::new();
        let data = data();
        let outcome = Engine::new(&data, "scripted")
            .with_stop(|| false)
            .run(Channel::new(port.clone()));

        assert_eq!(outcome.overall_status, OverallStatus::Fail);
        let path: Vec<State> = outcome
            .transitions
            .iter()
            .map(|t| t.to)
            .collect();
        assert_eq!(
            path,
            vec![
                State::RecoveryEntry,
                State::CliEntry,
                State::BootMenuEntry,
                State::Error,
                State::Finished,
            ]
        );
        assert!(outcome.interaction_duration.is_none());
        assert!(port.is_closed());
    }

    #[test]
    fn test_closed_channel_is_a_fault() {
        let port = ScriptedPort::new();
        let mut channel = Channel::new(port);
        channel.close();
        let data = data();
        let outcome = Engine::new(&data, "scripted")
            .with_stop(|| false)
            .run(channel);
        assert_eq!(outcome.overall_status, OverallStatus::Fail);
        assert_eq!(outcome.transitions.len(), 1);
        assert_eq!(outcome.warnings.len(), 1);
    }

    /// Port whose reads blow up, as a misbehaving driver would.
    struct PanickingPort;

    impl std::io::Read for PanickingPort {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            panic!("read on a broken port")
        }
    }

    impl std::io::Write for PanickingPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Port for PanickingPort {
        fn name(&self) -> &str {
            "panicking"
        }

        fn bytes_to_read(&mut self) -> Result<usize> {
            panic!("bytes_to_read on a broken port")
        }

        fn clear_buffers(&mut self) -> Result<()> {
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_port_panic_still_finishes_once() {
        let (tx, rx) = mpsc::channel();
        let data = data();
        let outcome = Engine::new(&data, "panicking")
            .with_stop(|| false)
            .with_events(tx)
            .run(Channel::new(PanickingPort));

        assert_eq!(outcome.overall_status, OverallStatus::Fail);
        assert_eq!(outcome.final_state, Some(State::Finished));
        assert!(
            outcome
                .warnings
                .iter()
                .any(|w| w.contains("panic"))
        );

        let finished = rx
            .try_iter()
            .filter(|event| matches!(event, RunEvent::Finished(_)))
            .count();
        assert_eq!(finished, 1);
    }
}
