//! The `run` command: one full recovery run against a switch.

use anyhow::Result;
use clap::Args;
use console::style;
use dialoguer::{Confirm, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;
use swreset::{
    AutoOperator, Channel, ChannelOperator, DeviceData, Engine, MismatchPolicy, Operator,
    OperatorRequest, OverallStatus, RankingStore, RunEvent, SerialConfig,
};

use super::report;
use crate::config::Config;
use crate::{Cli, CliError, use_fancy_output, was_interrupted};

/// Vendor used when neither the command line nor the settings name one.
pub(crate) const DEFAULT_VENDOR: &str = "D-Link";

/// Arguments of the `run` command.
#[derive(Args, Debug)]
pub(crate) struct RunArgs {
    /// Serial port the switch console is attached to.
    #[arg(short, long, env = "SWRESET_PORT")]
    pub port: Option<String>,

    /// Switch model (selects devices/<Vendor>_<Model>.json).
    #[arg(short, long, env = "SWRESET_MODEL")]
    pub model: Option<String>,

    /// Switch vendor [default: D-Link].
    #[arg(long, env = "SWRESET_VENDOR")]
    pub vendor: Option<String>,

    /// Reflash PROM and firmware even when already current.
    #[arg(long)]
    pub force_reflash: bool,

    /// Device data directory [default: ./config].
    #[arg(long, env = "SWRESET_CONFIG_DIR", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Ranking statistics directory [default: ./stats].
    #[arg(long, env = "SWRESET_STATS_DIR", value_name = "DIR")]
    pub stats_dir: Option<PathBuf>,

    /// Write the JSON run report to this file.
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Reaction when boot output names a different model (warn, abort).
    #[arg(long, env = "SWRESET_MISMATCH_POLICY")]
    pub mismatch_policy: Option<MismatchPolicy>,

    /// Treat the manual boot-menu transfer as done without asking.
    #[arg(short, long)]
    pub yes: bool,
}

/// Run parameters after merging arguments, settings and defaults.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Settings {
    pub port: String,
    pub vendor: String,
    pub model: String,
    pub config_dir: PathBuf,
    pub stats_dir: PathBuf,
    pub report_dir: Option<PathBuf>,
    pub mismatch_policy: MismatchPolicy,
    pub force_reflash: bool,
}

impl Settings {
    /// Merge `args` over `config`. Port and model are mandatory.
    pub(crate) fn resolve(args: &RunArgs, config: &Config) -> Result<Self, CliError> {
        let port = args
            .port
            .clone()
            .or_else(|| config.connection.port.clone())
            .ok_or_else(|| {
                CliError::Usage(
                    "No serial port given (use --port, SWRESET_PORT or [connection] port)".into(),
                )
            })?;
        let model = args
            .model
            .clone()
            .or_else(|| config.device.model.clone())
            .ok_or_else(|| {
                CliError::Usage(
                    "No switch model given (use --model, SWRESET_MODEL or [device] model)".into(),
                )
            })?;

        Ok(Self {
            port,
            vendor: args
                .vendor
                .clone()
                .or_else(|| config.device.vendor.clone())
                .unwrap_or_else(|| DEFAULT_VENDOR.to_string()),
            model,
            config_dir: args
                .config_dir
                .clone()
                .or_else(|| config.paths.config_dir.clone())
                .unwrap_or_else(|| PathBuf::from("config")),
            stats_dir: args
                .stats_dir
                .clone()
                .or_else(|| config.paths.stats_dir.clone())
                .unwrap_or_else(|| PathBuf::from("stats")),
            report_dir: config.paths.report_dir.clone(),
            mismatch_policy: args
                .mismatch_policy
                .or(config.run.mismatch_policy)
                .unwrap_or_default(),
            force_reflash: args.force_reflash || config.run.force_reflash,
        })
    }
}

/// Run command implementation. Returns the process exit code.
pub(crate) fn cmd_run(cli: &Cli, args: &RunArgs, config: &Config) -> Result<i32> {
    let settings = Settings::resolve(args, config)?;

    let data = DeviceData::load(&settings.config_dir, &settings.vendor, &settings.model)
        .map_err(|e| CliError::Config(e.to_string()))?;
    let ranking = RankingStore::load(&settings.stats_dir)
        .map_err(|e| CliError::Config(format!("Cannot load ranking statistics: {e}")))?;

    if !cli.quiet {
        eprintln!(
            "{} {} {} on {} ({} baud)",
            style("⚡").cyan(),
            settings.vendor,
            style(&settings.model).bold(),
            style(&settings.port).cyan(),
            data.profile.baudrate
        );
    }

    let channel = Channel::open(&SerialConfig::new(&settings.port, data.profile.baudrate))
        .map_err(|e| CliError::Connection(format!("Cannot open {}: {e}", settings.port)))?;

    let (event_tx, event_rx) = mpsc::channel();
    let interactive = !cli.non_interactive && io::stdin().is_terminal();
    let (operator, acks): (Box<dyn Operator>, Option<Sender<bool>>) = if interactive && !args.yes
    {
        let (ack_tx, ack_rx) = mpsc::channel();
        (
            Box::new(ChannelOperator::new(event_tx.clone(), ack_rx)),
            Some(ack_tx),
        )
    } else {
        (Box::new(AutoOperator::new(args.yes)), None)
    };

    let mut engine = Engine::new(&data, settings.port.as_str())
        .with_force_reflash(settings.force_reflash)
        .with_ranking(ranking)
        .with_mismatch_policy(settings.mismatch_policy)
        .with_operator(operator)
        .with_events(event_tx);

    let quiet = cli.quiet;
    let outcome = thread::scope(|scope| {
        let watcher = scope.spawn(move || watch_events(&event_rx, acks.as_ref(), quiet));
        let outcome = engine.run(channel);
        if watcher.join().is_err() {
            warn!("Progress display stopped unexpectedly");
        }
        outcome
    });

    if !cli.quiet {
        report::print_report(&outcome);
    }
    if let Some(path) =
        report::write_report(&outcome, args.report.as_deref(), settings.report_dir.as_deref())?
    {
        info!("Report written to {}", path.display());
    }

    if was_interrupted() {
        return Err(CliError::Cancelled("Run interrupted by user".into()).into());
    }
    Ok(if outcome.overall_status == OverallStatus::Success {
        0
    } else {
        1
    })
}

fn spinner(quiet: bool) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn say(pb: &ProgressBar, message: &str) {
    if pb.is_hidden() {
        eprintln!("{message}");
    } else {
        pb.println(message);
    }
}

/// Show progress until the engine reports the end of the run, answering
/// manual transfer requests on `acks`.
fn watch_events(events: &Receiver<RunEvent>, acks: Option<&Sender<bool>>, quiet: bool) {
    let pb = spinner(quiet);

    for event in events {
        match event {
            RunEvent::StateChanged(transition) => {
                pb.set_message(transition.to.to_string());
                if !quiet {
                    say(
                        &pb,
                        &format!(
                            "{} {} -> {}",
                            style("→").cyan(),
                            transition.from,
                            style(transition.to).bold()
                        ),
                    );
                }
            },
            RunEvent::OperatorAction(request) => {
                say(&pb, &format!("{} {request}", style("!").yellow().bold()));
                if request == OperatorRequest::ManualTransfer {
                    if let Some(acks) = acks {
                        let confirmed = pb.suspend(|| {
                            Confirm::with_theme(&ColorfulTheme::default())
                                .with_prompt("Has the image been transferred and the switch rebooted?")
                                .default(true)
                                .interact_opt()
                                .ok()
                                .flatten()
                                .unwrap_or(false)
                        });
                        // The engine may already be gone after a fault
                        let _ = acks.send(confirmed);
                    }
                }
            },
            RunEvent::Finished(_) => break,
        }
    }

    pb.finish_and_clear();
}
