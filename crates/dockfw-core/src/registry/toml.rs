//! TOML dock description parsing
//!
//! A dock description lists the devices found on a dock and, optionally,
//! overrides the update engine tunables:
//!
//! ```toml
//! [dock]
//! composite_version = 0x01000200
//!
//! [update]
//! attempt_limit = 3
//!
//! [[device]]
//! type = "ccg5"
//! component_id = 0
//! image_mode = "dual-symmetric"
//! critical = true
//! access = { bus = "i2c-direct", address = 0x08, intr_gpio = 3 }
//!
//! [[device]]
//! type = "hx3"
//! component_id = 1
//! access = { bus = "i2c-hub", address = "0x50", reset_gpio = 4, wp_gpio = 5 }
//! ```
//!
//! Tables other than those shown are ignored, so tools may keep their own
//! per-device settings in the same file.

use std::fmt;
use std::format;
use std::fs;
use std::path::Path;
use std::string::String;
use std::vec::Vec;

use super::DockRegistry;
use crate::access::AccessParams;
use crate::config::{UpdateConfig, MAX_DEV_COUNT};
use crate::device::{DeviceDescriptor, DeviceType, ImageMode};

/// Errors loading a dock description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DockConfigError {
    /// File could not be read
    IoError,
    /// File is not valid TOML or has the wrong shape
    ParseError,
    /// Unknown device type name
    UnknownDeviceType,
    /// More devices than a dock can hold
    TooManyDevices,
}

impl fmt::Display for DockConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IoError => write!(f, "cannot read dock description"),
            Self::ParseError => write!(f, "malformed dock description"),
            Self::UnknownDeviceType => write!(f, "unknown device type"),
            Self::TooManyDevices => write!(f, "more than {} devices", MAX_DEV_COUNT),
        }
    }
}

impl std::error::Error for DockConfigError {}

/// Parsed dock description
#[derive(Debug, Clone)]
pub struct DockConfig {
    /// Update engine tunables
    pub update: UpdateConfig,
    /// Dock composite version
    pub composite_version: u32,
    /// Devices in enumeration order
    pub devices: Vec<DeviceDescriptor>,
}

#[derive(Debug, serde::Deserialize)]
struct TomlDockFile {
    #[serde(default)]
    dock: TomlDock,
    #[serde(default)]
    update: UpdateConfig,
    #[serde(default)]
    device: Vec<TomlDevice>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct TomlDock {
    #[serde(default, deserialize_with = "deserialize_hex_u32")]
    composite_version: u32,
}

#[derive(Debug, serde::Deserialize)]
struct TomlDevice {
    #[serde(rename = "type")]
    device_type: String,
    #[serde(default)]
    component_id: u8,
    #[serde(default)]
    image_mode: TomlImageMode,
    #[serde(default)]
    critical: bool,
    access: TomlAccess,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
enum TomlImageMode {
    #[default]
    Single,
    DualSymmetric,
    DualAsymmetric,
}

#[derive(Debug, serde::Deserialize)]
#[serde(tag = "bus", rename_all = "kebab-case")]
enum TomlAccess {
    I2cDirect {
        #[serde(deserialize_with = "deserialize_hex_u8")]
        address: u8,
        intr_gpio: u8,
    },
    I2cHub {
        #[serde(deserialize_with = "deserialize_hex_u8")]
        address: u8,
        reset_gpio: u8,
        wp_gpio: u8,
    },
    SpiHub {
        reset_gpio: u8,
        wp_gpio: u8,
    },
}

/// Deserialize a u32 that can be hex (0x...) or decimal
fn deserialize_hex_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HexOrInt {
        Int(u32),
        Str(String),
    }

    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(n),
        HexOrInt::Str(s) => parse_number(&s).map_err(serde::de::Error::custom),
    }
}

fn deserialize_hex_u8<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let n = deserialize_hex_u32(deserializer)?;
    u8::try_from(n).map_err(|_| serde::de::Error::custom(format!("{:#x} out of range", n)))
}

/// Parse a number that can be hex (0x...) or decimal
pub(crate) fn parse_number(s: &str) -> Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("invalid hex: {}", e))
    } else {
        s.parse().map_err(|e| format!("invalid number: {}", e))
    }
}

impl From<TomlAccess> for AccessParams {
    fn from(a: TomlAccess) -> Self {
        match a {
            TomlAccess::I2cDirect { address, intr_gpio } => Self::I2cDirect { address, intr_gpio },
            TomlAccess::I2cHub {
                address,
                reset_gpio,
                wp_gpio,
            } => Self::I2cHub {
                address,
                reset_gpio,
                wp_gpio,
            },
            TomlAccess::SpiHub {
                reset_gpio,
                wp_gpio,
            } => Self::SpiHub {
                reset_gpio,
                wp_gpio,
            },
        }
    }
}

impl DockConfig {
    /// Load a dock description from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, DockConfigError> {
        let content = fs::read_to_string(path).map_err(|_| DockConfigError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// Parse a dock description from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, DockConfigError> {
        let file: TomlDockFile = toml::from_str(content).map_err(|e| {
            log::debug!("dock description: {}", e);
            DockConfigError::ParseError
        })?;

        if file.device.len() > MAX_DEV_COUNT {
            return Err(DockConfigError::TooManyDevices);
        }

        let devices = file
            .device
            .into_iter()
            .map(|d| {
                let device_type = DeviceType::from_name(&d.device_type)
                    .ok_or(DockConfigError::UnknownDeviceType)?;
                let image_mode = match d.image_mode {
                    TomlImageMode::Single => ImageMode::Single,
                    TomlImageMode::DualSymmetric => ImageMode::DualSymmetric,
                    TomlImageMode::DualAsymmetric => ImageMode::DualAsymmetric,
                };
                Ok(
                    DeviceDescriptor::new(device_type, d.component_id, image_mode, d.access.into())
                        .with_critical(d.critical),
                )
            })
            .collect::<Result<Vec<_>, DockConfigError>>()?;

        Ok(Self {
            update: file.update,
            composite_version: file.dock.composite_version,
            devices,
        })
    }

    /// Build a registry holding the described devices
    pub fn registry(&self) -> DockRegistry {
        let mut registry = DockRegistry::new(self.composite_version);
        for dev in &self.devices {
            // Length was checked against the registry capacity when parsing.
            let _ = registry.add_device(dev.clone());
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCK: &str = r#"
[dock]
composite_version = "0x01000200"

[update]
attempt_limit = 5

[[device]]
type = "ccg5"
component_id = 0
image_mode = "dual-symmetric"
critical = true
access = { bus = "i2c-direct", address = 0x08, intr_gpio = 3 }

[[device]]
type = "HX3"
component_id = 1
access = { bus = "i2c-hub", address = "0x50", reset_gpio = 4, wp_gpio = 5 }

[device.sim]
image1 = "1.0.0.1"

[[device]]
type = "spi"
component_id = 2
image_mode = "dual-symmetric"
access = { bus = "spi-hub", reset_gpio = 6, wp_gpio = 7 }
"#;

    #[test]
    fn test_parse_dock() {
        let cfg = DockConfig::from_toml_str(DOCK).unwrap();
        assert_eq!(cfg.composite_version, 0x0100_0200);
        assert_eq!(cfg.update.attempt_limit, 5);
        assert_eq!(cfg.update.max_passes, UpdateConfig::default().max_passes);
        assert_eq!(cfg.devices.len(), 3);
        assert!(cfg.devices[0].critical);
        assert_eq!(cfg.devices[1].device_type, DeviceType::Hx3);
        assert_eq!(
            cfg.devices[1].access,
            AccessParams::I2cHub {
                address: 0x50,
                reset_gpio: 4,
                wp_gpio: 5
            }
        );
        assert_eq!(cfg.devices[2].image_mode, ImageMode::DualSymmetric);
        assert_eq!(cfg.registry().device_count(), 3);
    }

    #[test]
    fn test_unknown_type() {
        let toml = r#"
[[device]]
type = "ccg99"
access = { bus = "spi-hub", reset_gpio = 1, wp_gpio = 2 }
"#;
        assert_eq!(
            DockConfig::from_toml_str(toml).unwrap_err(),
            DockConfigError::UnknownDeviceType
        );
    }

    #[test]
    fn test_address_out_of_range() {
        let toml = r#"
[[device]]
type = "ccg5"
access = { bus = "i2c-direct", address = "0x1FF", intr_gpio = 0 }
"#;
        assert_eq!(
            DockConfig::from_toml_str(toml).unwrap_err(),
            DockConfigError::ParseError
        );
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("0x10").unwrap(), 16);
        assert_eq!(parse_number(" 42 ").unwrap(), 42);
        assert!(parse_number("0xZZ").is_err());
    }
}
