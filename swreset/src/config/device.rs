//! Per-model device profile (`devices/<Vendor>_<Model>.json`).

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::ranking::Ranked;

/// A byte sequence sent during boot to reach a hidden console.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeyCombination {
    /// Identifier used for ranking.
    pub id: String,
    /// Bytes in hexadecimal, e.g. `"19"` for Ctrl-Y.
    pub hex: String,
}

impl KeyCombination {
    /// Decode the byte sequence.
    pub fn bytes(&self) -> Result<Vec<u8>> {
        decode_combination(&self.id, &self.hex)
    }
}

impl Ranked for KeyCombination {
    fn id(&self) -> &str {
        &self.id
    }
}

pub(crate) fn decode_combination(id: &str, hex_str: &str) -> Result<Vec<u8>> {
    let compact: String = hex_str
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    hex::decode(compact).map_err(|source| Error::Hex {
        id: id.to_string(),
        source,
    })
}

/// Console command templates.
///
/// `{ip}`, `{file}` and `{slot}` are substituted when the command is built.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CommandTemplates {
    /// Privilege escalation.
    pub enable: String,
    /// Persist the running configuration.
    pub save: String,
    /// Restart the device.
    pub reboot: String,
    /// Status query (model, MAC, versions).
    pub show_switch: String,
    /// Image slot inventory.
    pub show_firmware: String,
    /// Filesystem listing.
    pub dir: String,
    /// Reachability probe.
    pub ping: String,
    /// Boot PROM download.
    pub download_prom: String,
    /// Firmware download into a slot.
    pub download_firmware: String,
    /// Erase an image slot.
    pub delete_image: String,
    /// Mark an image slot as the boot image.
    pub boot_image: String,
}

impl Default for CommandTemplates {
    fn default() -> Self {
        Self {
            enable: "enable".into(),
            save: "save".into(),
            reboot: "reboot".into(),
            show_switch: "show switch".into(),
            show_firmware: "show firmware information".into(),
            dir: "dir".into(),
            ping: "ping {ip}".into(),
            download_prom: "download firmware_fromTFTP {ip} {file}".into(),
            download_firmware: "download firmware_fromTFTP {ip} {file} image_id {slot}".into(),
            delete_image: "config firmware image_id {slot} delete".into(),
            boot_image: "config firmware image_id {slot} boot_up".into(),
        }
    }
}

impl CommandTemplates {
    /// `ping` for `ip`.
    pub fn ping(&self, ip: &str) -> String {
        self.ping
            .replace("{ip}", ip)
    }

    /// PROM download of `file` from `ip`.
    pub fn download_prom(&self, ip: &str, file: &str) -> String {
        self.download_prom
            .replace("{ip}", ip)
            .replace("{file}", file)
    }

    /// Firmware download of `file` from `ip` into `slot`.
    pub fn download_firmware(&self, ip: &str, file: &str, slot: u8) -> String {
        self.download_firmware
            .replace("{ip}", ip)
            .replace("{file}", file)
            .replace("{slot}", &slot.to_string())
    }

    /// Slot erase.
    pub fn delete_image(&self, slot: u8) -> String {
        self.delete_image
            .replace("{slot}", &slot.to_string())
    }

    /// Boot image selection.
    pub fn boot_image(&self, slot: u8) -> String {
        self.boot_image
            .replace("{slot}", &slot.to_string())
    }
}

/// Static data for one vendor/model pair. Immutable for a run.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceProfile {
    /// Console baud rate.
    pub baudrate: u32,
    /// Boot indicators overriding the shared pattern set, if non-empty.
    #[serde(default)]
    pub boot_indicators: Vec<String>,
    /// Candidate key combinations for the recovery console.
    pub recovery_combinations: Vec<KeyCombination>,
    /// Key combination for the boot-loader menu.
    #[serde(default = "default_boot_menu_combination")]
    pub boot_menu_combination: String,
    /// TFTP server addresses to probe, in order.
    #[serde(default)]
    pub tftp_ip_candidates: Vec<String>,
    /// Commands run during the final checks.
    #[serde(default)]
    pub post_config_commands: Vec<String>,
    /// Text that must appear in boot output for this model.
    #[serde(default)]
    pub base_model_indicator: Option<String>,
    /// Key of the reset-command list used in the recovery console.
    #[serde(default = "default_recovery_category")]
    pub recovery_commands: String,
    /// Key of the reset-command list used in the CLI.
    #[serde(default = "default_cli_category")]
    pub cli_commands: String,
    /// Password set when the device forces a password change.
    #[serde(default = "default_initial_password")]
    pub initial_password: String,
    /// Command templates.
    #[serde(default)]
    pub commands: CommandTemplates,
}

fn default_boot_menu_combination() -> String {
    "33".into()
}

fn default_recovery_category() -> String {
    "recovery".into()
}

fn default_cli_category() -> String {
    "cli".into()
}

fn default_initial_password() -> String {
    "admin".into()
}

/// Fallback TFTP server when neither discovery nor the profile names one.
pub const DEFAULT_TFTP_IP: &str = "192.168.1.100";

impl DeviceProfile {
    /// Parse and validate a profile.
    ///
    /// `baudrate` and a non-empty `recovery_combinations` are required and
    /// every key combination must be valid hexadecimal.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| Error::Config("device profile must be a JSON object".into()))?;
        for key in ["baudrate", "recovery_combinations"] {
            if !object.contains_key(key) {
                return Err(Error::Config(format!(
                    "device profile is missing required key: {key}"
                )));
            }
        }

        let profile: Self = serde_json::from_value(value.clone())
            .map_err(|e| Error::Config(format!("invalid device profile: {e}")))?;
        profile.validate()?;
        Ok(profile)
    }

    fn validate(&self) -> Result<()> {
        if self.baudrate == 0 {
            return Err(Error::Config("device profile baudrate must be positive".into()));
        }
        if self
            .recovery_combinations
            .is_empty()
        {
            return Err(Error::Config(
                "device profile has no recovery_combinations".into(),
            ));
        }
        for combo in &self.recovery_combinations {
            combo.bytes()?;
        }
        decode_combination("boot_menu_combination", &self.boot_menu_combination)?;
        Ok(())
    }

    /// Boot-menu key sequence.
    pub fn boot_menu_bytes(&self) -> Result<Vec<u8>> {
        decode_combination("boot_menu_combination", &self.boot_menu_combination)
    }

    /// TFTP candidates, falling back to [`DEFAULT_TFTP_IP`].
    pub fn tftp_candidates(&self) -> Vec<&str> {
        if self
            .tftp_ip_candidates
            .is_empty()
        {
            vec![DEFAULT_TFTP_IP]
        } else {
            self.tftp_ip_candidates
                .iter()
                .map(String::as_str)
                .collect()
        }
    }
}

#[cfg(test)]
pub(crate) fn test_profile() -> DeviceProfile {
    DeviceProfile::from_json(&serde_json::json!({
        "baudrate": 9600,
        "recovery_combinations": [
            { "id": "ctrl_y", "hex": "19" },
            { "id": "ctrl_shift_6", "hex": "1e" }
        ],
        "tftp_ip_candidates": ["10.90.90.1"],
        "post_config_commands": ["enable telnet"]
    }))
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_are_applied() {
        let profile = test_profile();
        assert_eq!(profile.boot_menu_combination, "33");
        assert_eq!(profile.recovery_commands, "recovery");
        assert_eq!(profile.cli_commands, "cli");
        assert_eq!(profile.initial_password, "admin");
        assert_eq!(profile.boot_menu_bytes().unwrap(), vec![0x33]);
        assert_eq!(profile.commands.save, "save");
    }

    #[test]
    fn test_missing_baudrate_is_config_error() {
        let err = DeviceProfile::from_json(&json!({
            "recovery_combinations": [{ "id": "a", "hex": "19" }]
        }))
        .unwrap_err();
        assert!(err.to_string().contains("baudrate"));
    }

    #[test]
    fn test_empty_recovery_combinations_rejected() {
        let err = DeviceProfile::from_json(&json!({
            "baudrate": 9600,
            "recovery_combinations": []
        }))
        .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_bad_hex_rejected() {
        let err = DeviceProfile::from_json(&json!({
            "baudrate": 9600,
            "recovery_combinations": [{ "id": "broken", "hex": "zz" }]
        }))
        .unwrap_err();
        assert!(matches!(err, Error::Hex { ref id, .. } if id == "broken"));
    }

    #[test]
    fn test_hex_with_spaces() {
        let combo = KeyCombination {
            id: "seq".into(),
            hex: "1b 5b 41".into(),
        };
        assert_eq!(combo.bytes().unwrap(), vec![0x1b, 0x5b, 0x41]);
    }

    #[test]
    fn test_command_rendering() {
        let c = CommandTemplates::default();
        assert_eq!(c.ping("10.0.0.1"), "ping 10.0.0.1");
        assert_eq!(
            c.download_firmware("10.0.0.1", "DES3200R_1.85.B008.had", 2),
            "download firmware_fromTFTP 10.0.0.1 DES3200R_1.85.B008.had image_id 2"
        );
        assert_eq!(c.delete_image(1), "config firmware image_id 1 delete");
        assert_eq!(c.boot_image(2), "config firmware image_id 2 boot_up");
        assert_eq!(
            c.download_prom("10.0.0.1", "PROM.had"),
            "download firmware_fromTFTP 10.0.0.1 PROM.had"
        );
    }

    #[test]
    fn test_tftp_candidates_fallback() {
        let mut profile = test_profile();
        assert_eq!(profile.tftp_candidates(), vec!["10.90.90.1"]);
        profile.tftp_ip_candidates.clear();
        assert_eq!(profile.tftp_candidates(), vec![DEFAULT_TFTP_IP]);
    }
}
