//! Named operation timeouts and pacing delays (`timeouts.json`).
//!
//! Every value is written in seconds, integer or fractional. Keys that are
//! absent keep their defaults.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// Upper bound for each named wait.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Ordinary command completion.
    #[serde(deserialize_with = "secs::deserialize")]
    pub command_default: Duration,
    /// Prompt after entering a console.
    #[serde(deserialize_with = "secs::deserialize")]
    pub prompt_wait: Duration,
    /// Boot indicators after a power cycle, and CLI entry after a reboot.
    #[serde(deserialize_with = "secs::deserialize")]
    pub reboot_wait: Duration,
    /// One login or password exchange.
    #[serde(deserialize_with = "secs::deserialize")]
    pub login_attempt: Duration,
    /// One reachability probe.
    #[serde(deserialize_with = "secs::deserialize")]
    pub ping_wait: Duration,
    /// A TFTP image download.
    #[serde(deserialize_with = "secs::deserialize")]
    pub firmware_download: Duration,
    /// Boot indicators while trying to reach the boot-loader menu.
    #[serde(deserialize_with = "secs::deserialize")]
    pub boot_menu_wait: Duration,
    /// Recovery console indicators after the key spray.
    #[serde(deserialize_with = "secs::deserialize")]
    pub recovery_console_wait: Duration,
    /// Boot-loader menu indicators after the menu key.
    #[serde(deserialize_with = "secs::deserialize")]
    pub boot_menu_console_wait: Duration,
    /// Rebooting banner after a confirmed `reboot`.
    #[serde(deserialize_with = "secs::deserialize")]
    pub rebooting_wait: Duration,
    /// Completion after answering a yes/no dialog.
    #[serde(deserialize_with = "secs::deserialize")]
    pub confirm_wait: Duration,
    /// Fixed delays between raw writes.
    pub pacing: Pacing,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            command_default: Duration::from_secs(10),
            prompt_wait: Duration::from_secs(10),
            reboot_wait: Duration::from_secs(120),
            login_attempt: Duration::from_secs(10),
            ping_wait: Duration::from_secs(10),
            firmware_download: Duration::from_secs(300),
            boot_menu_wait: Duration::from_secs(120),
            recovery_console_wait: Duration::from_secs(60),
            boot_menu_console_wait: Duration::from_secs(20),
            rebooting_wait: Duration::from_secs(10),
            confirm_wait: Duration::from_secs(5),
            pacing: Pacing::default(),
        }
    }
}

/// Settle delays the console needs between raw writes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Pacing {
    /// After a bare Enter or the second half of a confirmation.
    #[serde(deserialize_with = "secs::deserialize")]
    pub settle_short: Duration,
    /// After a confirmation answer or `enable`.
    #[serde(deserialize_with = "secs::deserialize")]
    pub settle: Duration,
    /// After `save` or `reboot`.
    #[serde(deserialize_with = "secs::deserialize")]
    pub settle_long: Duration,
    /// Between two key combinations of the recovery spray.
    #[serde(deserialize_with = "secs::deserialize")]
    pub key_interval: Duration,
    /// Between two polls of the port.
    #[serde(deserialize_with = "secs::deserialize")]
    pub poll_interval: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            settle_short: Duration::from_millis(500),
            settle: Duration::from_secs(1),
            settle_long: Duration::from_secs(2),
            key_interval: Duration::from_millis(500),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl Pacing {
    /// No settle delays and a 1 ms poll, for consoles that answer instantly
    /// (scripted ports, simulators).
    pub fn immediate() -> Self {
        Self {
            settle_short: Duration::ZERO,
            settle: Duration::ZERO,
            settle_long: Duration::ZERO,
            key_interval: Duration::ZERO,
            poll_interval: Duration::from_millis(1),
        }
    }
}

mod secs {
    use super::{Deserialize, Deserializer, Duration};

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(value)
            .map_err(|e| serde::de::Error::custom(format!("invalid duration {value}: {e}")))
    }
}
