//! Emulated docks built from dock description files
//!
//! The simulator reads the same TOML as the update engine and picks up an
//! extra `[sim]` table for the dock plus a `[device.sim]` table per device:
//!
//! ```toml
//! [sim]
//! factory_condition = true
//!
//! [[device]]
//! type = "ccg5"
//! image_mode = "dual-symmetric"
//! access = { bus = "i2c-direct", address = 0x08, intr_gpio = 3 }
//!
//! [device.sim]
//! image1 = "1.0.0.1"
//! image2 = "1.0.0.1"
//! current = "image1"
//!
//! [device.sim.faults]
//! busy_reads = 2
//! ```
//!
//! Versions left out read as erased banks.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use dockfw_core::access::AccessParams;
use dockfw_core::device::{FirmwareVersion, FirmwareVersions, ImageType};
use dockfw_core::orchestrator::{Orchestrator, PackageLocations};
use dockfw_core::package::{Candidate, PackageStore, SpiPackageStore};
use dockfw_core::platform::SignatureVerifier;
use dockfw_core::registry::{DockConfig, DockRegistry};

use crate::bus::{I2cTarget, SimDockBus};
use crate::eeprom::EepromTarget;
use crate::error::{Result, SimError};
use crate::faults::FaultPlan;
use crate::hpi::HpiTarget;
use crate::platform::SimPlatform;
use crate::row_flash::MemRowFlash;
use crate::spi_flash::{SimSpiFlash, SpiFlashConfig};

/// Package area of an emulated dock
pub type SimPackageArea = SpiPackageStore<SimSpiFlash>;

/// Orchestrator running against an emulated dock
pub type SimOrchestrator<V> = Orchestrator<SimDockBus, SimPlatform, V, MemRowFlash>;

#[derive(Debug, Default, Deserialize)]
struct SimFile {
    #[serde(default)]
    sim: SimDockSettings,
    #[serde(default)]
    device: Vec<SimDeviceEntry>,
}

/// Dock-wide simulator settings
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimDockSettings {
    /// Dock is in its as-shipped state
    pub factory_condition: bool,
    /// Controller booted through secure boot
    pub secure_boot: bool,
}

#[derive(Debug, Default, Deserialize)]
struct SimDeviceEntry {
    #[serde(default)]
    sim: SimDeviceSettings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SimDeviceSettings {
    bootloader: Option<String>,
    image1: Option<String>,
    image2: Option<String>,
    current: Option<String>,
    faults: FaultPlan,
}

/// Erased version, as read from a blank bank
pub const BLANK_VERSION: FirmwareVersion = FirmwareVersion::from_bytes([0xFF; 8]);

fn parse_version(s: Option<&str>) -> Result<FirmwareVersion> {
    match s {
        None | Some("") | Some("blank") => Ok(BLANK_VERSION),
        Some(s) => FirmwareVersion::parse(s)
            .ok_or_else(|| SimError::Settings(format!("bad version {:?}", s))),
    }
}

fn parse_image(s: &str) -> Result<ImageType> {
    match s {
        "bootloader" => Ok(ImageType::Bootloader),
        "image1" => Ok(ImageType::Image1),
        "image2" => Ok(ImageType::Image2),
        other => Err(SimError::Settings(format!("bad image {:?}", other))),
    }
}

impl SimDeviceSettings {
    fn versions(&self) -> Result<FirmwareVersions> {
        Ok(FirmwareVersions {
            bootloader: parse_version(self.bootloader.as_deref())?,
            image1: parse_version(self.image1.as_deref())?,
            image2: parse_version(self.image2.as_deref())?,
        })
    }

    fn current(&self, versions: &FirmwareVersions) -> Result<ImageType> {
        match &self.current {
            Some(s) => parse_image(s),
            None if !versions.image1.is_blank() => Ok(ImageType::Image1),
            None => Ok(ImageType::Bootloader),
        }
    }
}

/// A dock with every device emulated
#[derive(Debug)]
pub struct SimDock {
    config: DockConfig,
    settings: SimDockSettings,
    bus: SimDockBus,
    flash: MemRowFlash,
    packages: SimPackageArea,
    locations: PackageLocations,
}

impl SimDock {
    /// Load a dock description file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| SimError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Build a dock from a description
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config = DockConfig::from_toml_str(content)?;
        let file: SimFile =
            toml::from_str(content).map_err(|e| SimError::Settings(e.to_string()))?;

        let mut bus = SimDockBus::new(config.update.gpio_count);
        let mut spi_hubs = 0;
        for (i, desc) in config.devices.iter().enumerate() {
            let entry = file.device.get(i).map(|d| &d.sim);
            let default = SimDeviceSettings::default();
            let sim = entry.unwrap_or(&default);
            let versions = sim.versions()?;
            let current = sim.current(&versions)?;

            match desc.access {
                AccessParams::I2cDirect { address, .. } => {
                    let target = HpiTarget::new(desc.image_mode, versions, current)
                        .with_faults(sim.faults.clone());
                    bus.attach(address, I2cTarget::Hpi(target))?;
                }
                AccessParams::I2cHub {
                    address,
                    reset_gpio,
                    wp_gpio,
                } => {
                    let mut target = EepromTarget::new(versions.image1, reset_gpio, wp_gpio);
                    target.set_absent(sim.faults.absent);
                    bus.attach(address, I2cTarget::Eeprom(target))?;
                }
                AccessParams::SpiHub { .. } => {
                    spi_hubs += 1;
                    if spi_hubs > 1 {
                        return Err(SimError::SharedSpiFlash);
                    }
                    bus.install_spi_hub(versions, current);
                }
            }
            log::debug!("sim: device {} {} at {:?}", i, desc.device_type, desc.access);
        }

        Ok(Self {
            config,
            settings: file.sim,
            bus,
            flash: MemRowFlash::new(),
            packages: SpiPackageStore::new(SimSpiFlash::new(SpiFlashConfig::package_area())),
            locations: PackageLocations::default(),
        })
    }

    /// Parsed dock description
    pub fn config(&self) -> &DockConfig {
        &self.config
    }

    /// Registry of the described devices
    pub fn registry(&self) -> DockRegistry {
        self.config.registry()
    }

    /// Simulator settings
    pub fn settings(&self) -> &SimDockSettings {
        &self.settings
    }

    /// Emulated buses
    pub fn bus(&self) -> &SimDockBus {
        &self.bus
    }

    /// Mutable emulated buses
    pub fn bus_mut(&mut self) -> &mut SimDockBus {
        &mut self.bus
    }

    /// Internal flash
    pub fn flash(&self) -> &MemRowFlash {
        &self.flash
    }

    /// Where the candidates live in the package area
    pub fn locations(&self) -> PackageLocations {
        self.locations
    }

    /// Package area
    pub fn packages_mut(&mut self) -> &mut SimPackageArea {
        &mut self.packages
    }

    /// Program a package into one candidate slot
    pub fn stage_package(&mut self, candidate: Candidate, bytes: &[u8]) -> Result<()> {
        let addr = match candidate {
            Candidate::Primary => self.locations.primary_addr,
            Candidate::Factory => self.locations.factory_addr,
        };
        self.packages.erase(addr, bytes.len() as u32)?;
        self.packages.write(addr, bytes)?;
        log::debug!("sim: staged {} bytes at 0x{:06X}", bytes.len(), addr);
        Ok(())
    }

    /// Reapply persisted state
    pub fn restore(&mut self, state: &SimState) -> Result<()> {
        let mut rows = BTreeMap::new();
        for (key, data) in &state.rows {
            let row = parse_row(key)?;
            let data = hex::decode(data).map_err(|e| SimError::Settings(e.to_string()))?;
            rows.insert(row, data);
        }
        self.flash = MemRowFlash::with_rows(rows);

        for (desc, dev) in self.config.devices.iter().zip(&state.device) {
            if let Some((versions, current)) = dev.decode()? {
                self.bus.power_on(&desc.access, versions, current);
            }
        }
        Ok(())
    }

    /// Snapshot the state worth keeping between runs
    pub fn snapshot(&self) -> SimState {
        SimState::capture(&self.config, &self.bus, &self.flash)
    }

    /// Hand the dock to an orchestrator
    ///
    /// Returns the orchestrator together with the package area, which is
    /// passed separately to each session.
    pub fn into_orchestrator<V: SignatureVerifier>(
        self,
        verifier: V,
        ops: dockfw_core::device::OpsTable,
    ) -> Result<(SimOrchestrator<V>, SimPackageArea)> {
        let platform = SimPlatform::new(self.settings.factory_condition, self.settings.secure_boot);
        let dmc = Orchestrator::new(
            self.config.update,
            self.bus,
            ops,
            platform,
            verifier,
            self.flash,
        )?;
        Ok((dmc, self.packages))
    }

    /// Rebuild the dock from the parts an orchestrator gives back
    pub fn reassemble(
        config: DockConfig,
        settings: SimDockSettings,
        bus: SimDockBus,
        flash: MemRowFlash,
        packages: SimPackageArea,
    ) -> Self {
        Self {
            config,
            settings,
            bus,
            flash,
            packages,
            locations: PackageLocations::default(),
        }
    }
}

fn parse_row(key: &str) -> Result<u16> {
    let key = key.trim();
    let parsed = match key.strip_prefix("0x").or_else(|| key.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => key.parse(),
    };
    parsed.map_err(|e| SimError::Settings(format!("bad row {:?}: {}", key, e)))
}

/// State carried between simulator runs
///
/// Internal flash rows and device bank versions, hex encoded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimState {
    /// Internal flash rows by row number
    #[serde(default)]
    pub rows: BTreeMap<String, String>,
    /// Devices in registry order
    #[serde(default)]
    pub device: Vec<DeviceState>,
}

/// Persisted contents of one device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    /// Bootloader, image 1 and image 2 versions; empty when unknown
    pub versions: String,
    /// Running bank
    pub current: u8,
}

impl DeviceState {
    fn decode(&self) -> Result<Option<(FirmwareVersions, ImageType)>> {
        if self.versions.is_empty() {
            return Ok(None);
        }
        let bytes = hex::decode(&self.versions).map_err(|e| SimError::Settings(e.to_string()))?;
        let block: [u8; 24] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| SimError::Settings("version block must be 24 bytes".into()))?;
        let current = ImageType::from_u8(self.current)
            .ok_or_else(|| SimError::Settings(format!("bad image {}", self.current)))?;
        Ok(Some((FirmwareVersions::from_block(&block), current)))
    }
}

impl SimState {
    /// Capture flash rows and device versions
    pub fn capture(config: &DockConfig, bus: &SimDockBus, flash: &MemRowFlash) -> Self {
        let rows = flash
            .rows()
            .iter()
            .map(|(row, data)| (format!("0x{:03X}", row), hex::encode(data)))
            .collect();
        let device = config
            .devices
            .iter()
            .map(|desc| match bus.device_state(&desc.access) {
                Some((versions, current)) => DeviceState {
                    versions: hex::encode(versions.to_block()),
                    current: current as u8,
                },
                None => DeviceState::default(),
            })
            .collect();
        Self { rows, device }
    }

    /// Load a state file; a missing file is an empty state
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| SimError::Settings(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(SimError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    /// Write the state file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string(self).map_err(|e| SimError::Settings(e.to_string()))?;
        fs::write(path, content).map_err(|source| SimError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests;
