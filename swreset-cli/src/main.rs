//! swreset CLI - Serial-console recovery, factory reset and firmware upgrade
//! for managed switches.
//!
//! ## Features
//!
//! - Full recovery run: console entry, factory reset, PROM/firmware upgrade
//! - Interactive operator prompts for power cycles and manual transfers
//! - JSON run reports
//! - Serial port listing
//! - Shell completion generation
//! - Environment variable and settings file support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;

use commands::run::RunArgs;
use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if spinners and colors should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Errors with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid or missing arguments.
    #[error("{0}")]
    Usage(String),
    /// Device data or settings could not be loaded.
    #[error("{0}")]
    Config(String),
    /// The serial port could not be opened or enumerated.
    #[error("{0}")]
    Connection(String),
    /// The user interrupted the operation.
    #[error("{0}")]
    Cancelled(String),
}

/// Map an error to the process exit code.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<CliError>() {
        Some(CliError::Usage(_)) => 2,
        Some(CliError::Config(_)) => 3,
        Some(CliError::Connection(_)) => 4,
        Some(CliError::Cancelled(_)) => 130,
        None => 1,
    }
}

/// swreset - Bring managed switches back to a known state over the serial
/// console.
///
/// Environment variables:
///   SWRESET_PORT              - Default serial port
///   SWRESET_VENDOR            - Default vendor (default: D-Link)
///   SWRESET_MODEL             - Default model
///   SWRESET_CONFIG_DIR        - Device data directory
///   SWRESET_STATS_DIR         - Ranking statistics directory
///   SWRESET_MISMATCH_POLICY   - Model mismatch reaction (warn, abort)
///   SWRESET_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "swreset")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Debug logging (same as -v).
    #[arg(long, global = true)]
    debug: bool,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (never prompt the operator).
    #[arg(long, global = true, env = "SWRESET_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Also write log records to this file.
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Path to a settings file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Recover, reset and upgrade a switch.
    Run(RunArgs),

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    /// Default log filter for the requested verbosity.
    fn log_level(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose.max(u8::from(self.debug)) {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Log sink writing every record to stderr and a file.
struct TeeWriter {
    file: fs::File,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

fn init_logging(cli: &Cli) -> Result<()> {
    let detailed = cli.verbose >= 2 || cli.log_file.is_some();
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(cli.log_level()));
    builder
        .format_target(detailed)
        .format_timestamp(if detailed {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        });

    if let Some(path) = &cli.log_file {
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                CliError::Config(format!("Cannot open log file {}: {e}", path.display()))
            })?;
        builder.target(env_logger::Target::Pipe(Box::new(TeeWriter { file })));
    }

    builder.init();
    Ok(())
}

fn install_interrupt_handler() {
    let result = ctrlc::set_handler(|| {
        if INTERRUPTED.swap(true, Ordering::Relaxed) {
            // Second Ctrl-C: do not wait for the current step to finish
            std::process::exit(130);
        }
        eprintln!(
            "\n{} Stopping after the current step (press Ctrl-C again to abort)",
            style("!").yellow().bold()
        );
    });
    if let Err(err) = result {
        debug!("Could not install Ctrl-C handler: {err}");
    }
    swreset::set_interrupt_checker(was_interrupted);
}

fn real_main() -> Result<i32> {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli)?;

    debug!(
        "swreset v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Run(args) => {
            install_interrupt_handler();
            commands::run::cmd_run(&cli, args, &config)
        },
        Commands::ListPorts { json } => {
            commands::ports::cmd_list_ports(*json)?;
            Ok(0)
        },
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(0)
        },
    }
}

fn main() {
    let code = match real_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            exit_code_for(&err)
        },
    };
    std::process::exit(code);
}
