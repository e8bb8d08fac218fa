//! Run report printing and persistence.

use anyhow::{Context, Result};
use console::style;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use swreset::{OverallStatus, RunOutcome};

fn or_unknown(value: Option<&str>) -> &str {
    value.unwrap_or("unknown")
}

/// Print a human-readable summary of the run to stderr.
pub(crate) fn print_report(outcome: &RunOutcome) {
    let status = match outcome.overall_status {
        OverallStatus::Success => style(outcome.overall_status.to_string())
            .green()
            .bold(),
        OverallStatus::Fail => style(outcome.overall_status.to_string())
            .red()
            .bold(),
        OverallStatus::Unknown => style(outcome.overall_status.to_string())
            .yellow()
            .bold(),
    };

    eprintln!();
    eprintln!("{}", style("Run report").bold().underlined());
    eprintln!("  Port:            {}", outcome.port);
    eprintln!(
        "  Device:          {} {} (detected: {})",
        outcome.vendor,
        outcome.model_requested,
        or_unknown(outcome.model_detected.as_deref())
    );
    eprintln!(
        "  MAC address:     {}",
        or_unknown(outcome.mac_address.as_deref())
    );
    eprintln!(
        "  Reset:           {} via {}",
        outcome.reset_status,
        outcome
            .reset_method
            .map_or_else(|| "none".to_string(), |m| m.to_string())
    );
    eprintln!(
        "  PROM:            {} -> {}",
        or_unknown(outcome.prom_initial.as_deref()),
        or_unknown(outcome.prom_final.as_deref())
    );
    eprintln!(
        "  Firmware:        {} -> {}",
        or_unknown(outcome.firmware_initial.as_deref()),
        or_unknown(outcome.firmware_final.as_deref())
    );
    if let Some(tftp) = outcome.tftp_ping_status {
        eprintln!(
            "  TFTP server:     {} ({tftp})",
            or_unknown(outcome.tftp_ip_used.as_deref())
        );
    }
    for result in &outcome.post_config_results {
        let mark = if result.ok {
            style("✓").green()
        } else {
            style("✗").red()
        };
        eprintln!("  {mark} {}", result.command);
    }
    if let Some(state) = outcome.final_state {
        eprintln!("  Final state:     {state}");
    }
    if let Some(seconds) = outcome.interaction_duration {
        eprintln!("  Interaction:     {seconds:.1}s");
    }
    for warning in &outcome.warnings {
        eprintln!("  {} {warning}", style("warning:").yellow());
    }
    eprintln!("  Overall:         {status}");
}

/// Report file name for a run finished at `timestamp` (seconds since epoch).
pub(crate) fn report_file_name(outcome: &RunOutcome, timestamp: u64) -> String {
    let model: String = outcome
        .model_requested
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("{}_{model}_{timestamp}.json", outcome.vendor.replace(' ', "_"))
}

/// Write the record as JSON to `path`, or into `dir` under a generated name.
pub(crate) fn write_report(
    outcome: &RunOutcome,
    path: Option<&Path>,
    dir: Option<&Path>,
) -> Result<Option<PathBuf>> {
    let target = match (path, dir) {
        (Some(path), _) => path.to_path_buf(),
        (None, Some(dir)) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create report directory {}", dir.display()))?;
            let timestamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_secs());
            dir.join(report_file_name(outcome, timestamp))
        },
        (None, None) => return Ok(None),
    };

    let json = serde_json::to_string_pretty(outcome)?;
    fs::write(&target, json)
        .with_context(|| format!("Cannot write report {}", target.display()))?;
    Ok(Some(target))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome() -> RunOutcome {
        let mut outcome = RunOutcome::new("/dev/ttyUSB0", "D-Link", "DES-3200-28/C1");
        outcome.overall_status = OverallStatus::Success;
        outcome
    }

    #[test]
    fn test_report_file_name_is_sanitized() {
        assert_eq!(
            report_file_name(&outcome(), 1_700_000_000),
            "D-Link_DES-3200-28_C1_1700000000.json"
        );
    }

    #[test]
    fn test_write_report_to_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");

        let written = write_report(&outcome(), Some(&path), None).unwrap();
        assert_eq!(written, Some(path.clone()));

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["overall_status"], "Success");
        assert_eq!(value["reset_status"], "Not Started");
        assert_eq!(value["model_requested"], "DES-3200-28/C1");
    }

    #[test]
    fn test_write_report_into_dir() {
        let dir = tempfile::tempdir().unwrap();
        let reports = dir.path().join("reports");

        let written = write_report(&outcome(), None, Some(&reports))
            .unwrap()
            .unwrap();
        assert!(written.starts_with(&reports));
        assert!(written.exists());
    }

    #[test]
    fn test_no_destination_writes_nothing() {
        assert!(write_report(&outcome(), None, None).unwrap().is_none());
    }
}
