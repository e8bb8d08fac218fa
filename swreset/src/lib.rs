//! # swreset
//!
//! A library for bringing managed switches back to a known state over their
//! serial console.
//!
//! A run drives a D-Link DES/DGS class switch through:
//!
//! - Password recovery console entry (boot-time key combinations)
//! - Credential login in the recovery console or the normal CLI
//! - Factory reset, with ranked reset commands
//! - Boot PROM and firmware upgrade over TFTP
//! - Final diagnostics and configuration save
//!
//! When neither the recovery console nor the CLI can be reached, the run
//! falls back to the boot-loader menu and hands over to the operator for a
//! manual image transfer.
//!
//! Console state is recognised by pattern matching on the raw byte stream;
//! credentials, reset commands and key combinations are tried in an order
//! learned from earlier runs (see [`RankingStore`]).
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via `serialport`
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::mpsc;
//!
//! use swreset::{Channel, DeviceData, Engine, RankingStore, RunEvent, SerialConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let data = DeviceData::load(Path::new("config"), "D-Link", "DES-3200-28")?;
//!     let channel = Channel::open(&SerialConfig::new("COM3", data.profile.baudrate))?;
//!
//!     let (tx, rx) = mpsc::channel();
//!     let mut engine = Engine::new(&data, "COM3")
//!         .with_ranking(RankingStore::load("stats")?)
//!         .with_events(tx);
//!     let outcome = engine.run(channel);
//!
//!     for event in rx.try_iter() {
//!         if let RunEvent::StateChanged(t) = event {
//!             println!("{} -> {}", t.from, t.to);
//!         }
//!     }
//!     println!("overall: {}", outcome.overall_status);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

/// Log a workflow step under the `swreset::step` target.
macro_rules! step {
    ($($arg:tt)+) => {
        log::info!(target: "swreset::step", $($arg)+)
    };
}
pub(crate) use step;

pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod handler;
pub mod inspect;
pub mod operator;
pub mod outcome;
pub mod pattern;
pub mod port;
pub mod ranking;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker.
///
/// The engine polls it between state transitions; `true` ends the run with
/// a failed record (for example after Ctrl-C in the CLI). A wait that is
/// already in progress is not cut short.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    channel::{Capture, Channel},
    config::{
        CatalogEntry, Credential, DeviceData, DeviceProfile, FirmwareCatalog, KeyCombination,
        ResetCommand, Timeouts,
    },
    engine::{Engine, MAX_TRANSITIONS, State},
    error::{Error, Result},
    handler::MismatchPolicy,
    inspect::{ImageSlot, Inspector, KeyValueInspector, SlotInventory, SwitchInfo},
    operator::{AutoOperator, ChannelOperator, Operator, OperatorRequest, PowerCycleTarget},
    outcome::{
        CommandResult, OverallStatus, ResetMethod, ResetStatus, RunEvent, RunOutcome, TftpStatus,
        Transition,
    },
    pattern::{PatternSet, Signal},
    port::{Port, PortInfo, SerialConfig, list_ports},
    ranking::{Category, RankingStore, Record},
};
