//! Parsers for diagnostic command output.
//!
//! The console only returns human-oriented text. An [`Inspector`] turns the
//! raw output of the status query, the firmware inventory and the directory
//! listing into typed values. The engine uses [`KeyValueInspector`] unless
//! another parser is plugged in through the engine builder.

use std::fmt;

use serde::Serialize;

/// Facts read from the status query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SwitchInfo {
    /// Model name, e.g. `DES-3200-28`.
    pub model: Option<String>,
    /// MAC address as printed by the device.
    pub mac: Option<String>,
    /// Boot PROM version.
    pub prom_version: Option<String>,
    /// Running firmware version.
    pub firmware_version: Option<String>,
}

/// One persistent firmware image location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageSlot {
    /// Image id used by the slot commands.
    pub id: u8,
    /// Installed version; `None` for an empty slot.
    pub version: Option<String>,
    /// Whether this is the boot image.
    pub active: bool,
}

impl ImageSlot {
    /// Whether nothing is installed in the slot.
    pub fn is_empty(&self) -> bool {
        self.version
            .is_none()
    }
}

/// Image slots as reported by the firmware inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SlotInventory {
    /// Slots in id order.
    pub slots: Vec<ImageSlot>,
}

impl SlotInventory {
    /// The boot image slot.
    pub fn active(&self) -> Option<&ImageSlot> {
        self.slots
            .iter()
            .find(|s| s.active)
    }

    /// The first empty slot.
    pub fn empty(&self) -> Option<&ImageSlot> {
        self.slots
            .iter()
            .find(|s| s.is_empty())
    }

    /// Where a new image goes: an empty slot if there is one, otherwise the
    /// first slot that is not the boot image.
    pub fn target(&self) -> Option<&ImageSlot> {
        self.empty()
            .or_else(|| {
                self.slots
                    .iter()
                    .find(|s| !s.active)
            })
    }
}

impl fmt::Display for SlotInventory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for slot in &self.slots {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(
                f,
                "Slot {}: {}",
                slot.id,
                slot.version
                    .as_deref()
                    .unwrap_or("empty")
            )?;
            if slot.active {
                f.write_str(" (boot)")?;
            }
        }
        Ok(())
    }
}

/// Parser for diagnostic command output.
pub trait Inspector: Send {
    /// Parse the status query output.
    fn switch_info(&self, output: &str) -> SwitchInfo;

    /// Parse the firmware inventory output.
    fn firmware_slots(&self, output: &str) -> SlotInventory;

    /// Parse a directory listing into file names.
    fn directory(&self, output: &str) -> Vec<String>;
}

/// Parser for the `Key : Value` layout used by D-Link DES/DGS firmware.
///
/// Firmware inventories are accepted both as a table
///
/// ```text
///  ID  Version     Size(B)  Update Time          From       User
/// ---  ---------  --------  -------------------  ---------  ---------
/// *1   1.85.B008  3802212   2000/01/01 00:00:00  10.90.90.1 Anonymous
///  2   (Empty)
/// ```
///
/// and as blocks of `Image ID : 1(Boot up firmware)` / `Version : ...`.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyValueInspector;

impl KeyValueInspector {
    /// Create the parser.
    pub fn new() -> Self {
        Self
    }

    fn fields(output: &str) -> impl Iterator<Item = (String, &str)> {
        output
            .lines()
            .filter_map(|line| {
                let (key, value) = line.split_once(':')?;
                let key = key
                    .trim()
                    .to_ascii_lowercase();
                let value = value.trim();
                if key.is_empty() || value.is_empty() {
                    None
                } else {
                    Some((key, value))
                }
            })
    }

    fn table_row(line: &str) -> Option<ImageSlot> {
        let line = line.trim_start();
        let (active, rest) = match line.strip_prefix('*') {
            Some(rest) => (true, rest.trim_start()),
            None => (false, line),
        };
        let mut tokens = rest.split_whitespace();
        let id = tokens
            .next()?
            .parse()
            .ok()?;
        let version = tokens.next()?;
        Some(ImageSlot {
            id,
            version: normalize_version(version),
            active,
        })
    }

    fn blocks(output: &str) -> Vec<ImageSlot> {
        let mut slots: Vec<ImageSlot> = Vec::new();
        for line in output.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key
                .trim()
                .to_ascii_lowercase();
            if key == "image id" {
                let value = value.trim();
                let digits: String = value
                    .chars()
                    .take_while(char::is_ascii_digit)
                    .collect();
                let Ok(id) = digits.parse() else {
                    continue;
                };
                slots.push(ImageSlot {
                    id,
                    version: None,
                    active: value
                        .to_ascii_lowercase()
                        .contains("boot"),
                });
            } else if key == "version" {
                if let Some(slot) = slots.last_mut() {
                    slot.version = normalize_version(value);
                }
            }
        }
        slots
    }
}

/// Strip the `Build ` prefix; `(Empty)` and blanks mean no version.
fn normalize_version(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed
            .to_ascii_lowercase()
            .contains("empty")
    {
        return None;
    }
    let version = trimmed
        .strip_prefix("Build ")
        .or_else(|| trimmed.strip_prefix("build "))
        .unwrap_or(trimmed)
        .trim();
    Some(version.to_string())
}

impl Inspector for KeyValueInspector {
    fn switch_info(&self, output: &str) -> SwitchInfo {
        let mut info = SwitchInfo::default();
        for (key, value) in Self::fields(output) {
            match key.as_str() {
                "device type" | "model name" => {
                    info.model = value
                        .split_whitespace()
                        .next()
                        .map(str::to_string);
                },
                "mac address" => info.mac = Some(value.to_string()),
                "boot prom version" | "prom version" => {
                    info.prom_version = normalize_version(value);
                },
                "firmware version" => info.firmware_version = normalize_version(value),
                _ => {},
            }
        }
        info
    }

    fn firmware_slots(&self, output: &str) -> SlotInventory {
        let mut slots = Self::blocks(output);
        if slots.is_empty() {
            slots = output
                .lines()
                .filter_map(Self::table_row)
                .collect();
        }
        slots.sort_by_key(|s| s.id);
        slots.dedup_by_key(|s| s.id);
        SlotInventory { slots }
    }

    /// Rows start with a small index and end with the file name.
    fn directory(&self, output: &str) -> Vec<String> {
        output
            .lines()
            .filter_map(|line| {
                let tokens: Vec<&str> = line
                    .split_whitespace()
                    .collect();
                if tokens.len() < 3 || tokens[0].parse::<u16>().is_err() {
                    return None;
                }
                tokens
                    .last()
                    .map(|name| (*name).to_string())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOW_SWITCH: &str = "show switch\r\n\
Command: show switch\r\n\
\r\n\
Device Type                : DES-3200-28 Fast Ethernet Switch\r\n\
MAC Address                : 00-1E-58-AA-BB-CC\r\n\
IP Address                 : 10.90.90.90 (Manual)\r\n\
Boot PROM Version          : Build 1.00.B008\r\n\
Firmware Version           : Build 1.85.B008\r\n\
Hardware Version           : A1\r\n\
\r\n\
DES-3200-28:admin#";

    const FIRMWARE_TABLE: &str = "Command: show firmware information\r\n\
\r\n\
 ID  Version     Size(B)  Update Time          From              User\r\n\
---  ---------  --------  -------------------  ----------------  ----------\r\n\
*1   1.85.B008  3802212   2000/01/01 00:00:00  10.90.90.1        Anonymous\r\n\
 2   (Empty)\r\n\
\r\n\
'*' means boot up firmware\r\n\
DES-3200-28:admin#";

    const FIRMWARE_BLOCKS: &str = "Image ID    : 1\r\n\
Version     : 4.04.T036\r\n\
Size        : 4637452 Bytes\r\n\
\r\n\
Image ID    : 2(Boot up firmware)\r\n\
Version     : 4.04.T036\r\n\
Size        : 4637452 Bytes\r\n";

    #[test]
    fn test_switch_info() {
        let info = KeyValueInspector::new().switch_info(SHOW_SWITCH);
        assert_eq!(info.model.as_deref(), Some("DES-3200-28"));
        assert_eq!(info.mac.as_deref(), Some("00-1E-58-AA-BB-CC"));
        assert_eq!(info.prom_version.as_deref(), Some("1.00.B008"));
        assert_eq!(info.firmware_version.as_deref(), Some("1.85.B008"));
    }

    #[test]
    fn test_switch_info_on_garbage_is_empty() {
        let info = KeyValueInspector::new().switch_info("% Invalid input detected\r\n#");
        assert_eq!(info, SwitchInfo::default());
    }

    #[test]
    fn test_firmware_table() {
        let inv = KeyValueInspector::new().firmware_slots(FIRMWARE_TABLE);
        assert_eq!(inv.slots.len(), 2);
        let active = inv.active().unwrap();
        assert_eq!(active.id, 1);
        assert_eq!(active.version.as_deref(), Some("1.85.B008"));
        assert_eq!(inv.empty().unwrap().id, 2);
        assert_eq!(inv.target().unwrap().id, 2);
        assert_eq!(inv.to_string(), "Slot 1: 1.85.B008 (boot), Slot 2: empty");
    }

    #[test]
    fn test_firmware_blocks_without_empty_slot_target_non_active() {
        let inv = KeyValueInspector::new().firmware_slots(FIRMWARE_BLOCKS);
        assert_eq!(inv.active().unwrap().id, 2);
        assert!(inv.empty().is_none());
        assert_eq!(inv.target().unwrap().id, 1);
    }

    #[test]
    fn test_directory_listing() {
        let out = " Idx Info     Attr  Size      Update Time          Name\r\n\
 --- -------  ----  --------  -------------------  -----------\r\n\
   1 RUN(*)   -rw-  3802212   2000/01/01 00:00:00  runtime.had\r\n\
   2 CFG(*)   -rw-  29316     2000/01/01 00:00:00  config.cfg\r\n\
\r\n\
DES-3200-28:admin#";
        assert_eq!(
            KeyValueInspector::new().directory(out),
            vec!["runtime.had".to_string(), "config.cfg".to_string()]
        );
    }
}
