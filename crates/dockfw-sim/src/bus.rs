//! The emulated dock buses
//!
//! [`SimDockBus`] is the I2C master, the SPI master and the GPIO bank at
//! once, so that targets can observe the lines the controller drives: EEPROM
//! writes honour the write-protect line and hubs reload on a reset release.

use std::collections::BTreeMap;

use dockfw_core::access::AccessParams;
use dockfw_core::device::spi_hub::{self, BANK_SIZE, BOOT_SELECT_ADDR, BOOT_SELECT_MAGIC};
use dockfw_core::device::{FirmwareVersion, FirmwareVersions, ImageType, FW_VERSION_SIZE};
use dockfw_core::error::{Error, Result};
use dockfw_core::programmer::{DockBus, GpioControl, I2cMaster, SpiMaster};
use dockfw_core::spi::SpiCommand;

use crate::eeprom::EepromTarget;
use crate::error::SimError;
use crate::hpi::HpiTarget;
use crate::spi_flash::{SimSpiFlash, SpiFlashConfig};

/// Largest I2C transfer the emulated master performs
pub const MAX_I2C_TRANSFER: usize = 2 + 1024;

/// A device answering on the I2C bus
#[derive(Debug, Clone)]
pub enum I2cTarget {
    /// PD controller speaking HPI
    Hpi(HpiTarget),
    /// Hub configuration EEPROM
    Eeprom(EepromTarget),
}

/// All buses of one emulated dock
#[derive(Debug, Clone)]
pub struct SimDockBus {
    targets: BTreeMap<u8, I2cTarget>,
    hub_flash: SimSpiFlash,
    pins: Vec<bool>,
    elapsed_us: u64,
}

impl SimDockBus {
    /// Dock with `gpio_count` lines, all pulled high, and an erased hub flash
    pub fn new(gpio_count: u8) -> Self {
        Self {
            targets: BTreeMap::new(),
            hub_flash: SimSpiFlash::new(SpiFlashConfig::hub()),
            pins: vec![true; gpio_count as usize],
            elapsed_us: 0,
        }
    }

    /// Attach an I2C target
    pub fn attach(&mut self, address: u8, target: I2cTarget) -> std::result::Result<(), SimError> {
        if self.targets.contains_key(&address) {
            return Err(SimError::AddressConflict(address));
        }
        self.targets.insert(address, target);
        Ok(())
    }

    /// HPI controller at `address`
    pub fn hpi(&self, address: u8) -> Option<&HpiTarget> {
        match self.targets.get(&address)? {
            I2cTarget::Hpi(t) => Some(t),
            I2cTarget::Eeprom(_) => None,
        }
    }

    /// Mutable HPI controller at `address`
    pub fn hpi_mut(&mut self, address: u8) -> Option<&mut HpiTarget> {
        match self.targets.get_mut(&address)? {
            I2cTarget::Hpi(t) => Some(t),
            I2cTarget::Eeprom(_) => None,
        }
    }

    /// EEPROM at `address`
    pub fn eeprom(&self, address: u8) -> Option<&EepromTarget> {
        match self.targets.get(&address)? {
            I2cTarget::Eeprom(t) => Some(t),
            I2cTarget::Hpi(_) => None,
        }
    }

    /// Mutable EEPROM at `address`
    pub fn eeprom_mut(&mut self, address: u8) -> Option<&mut EepromTarget> {
        match self.targets.get_mut(&address)? {
            I2cTarget::Eeprom(t) => Some(t),
            I2cTarget::Hpi(_) => None,
        }
    }

    /// Flash behind the SPI hub
    pub fn hub_flash(&self) -> &SimSpiFlash {
        &self.hub_flash
    }

    /// Mutable flash behind the SPI hub
    pub fn hub_flash_mut(&mut self) -> &mut SimSpiFlash {
        &mut self.hub_flash
    }

    /// Level of a GPIO line
    pub fn pin(&self, pin: u8) -> Option<bool> {
        self.pins.get(pin as usize).copied()
    }

    /// Total time spent in delays
    pub fn elapsed_us(&self) -> u64 {
        self.elapsed_us
    }

    /// Lay out the SPI hub flash with the given banks and boot selection
    pub fn install_spi_hub(&mut self, versions: FirmwareVersions, current: ImageType) {
        let data = self.hub_flash.data_mut();
        for (image, version) in [
            (ImageType::Image1, versions.image1),
            (ImageType::Image2, versions.image2),
        ] {
            // Only application banks reach here, so the base is known.
            let base = spi_hub::bank_base(image).unwrap_or(0) as usize;
            data[base..base + BANK_SIZE as usize].fill(0xFF);
            let at = base + spi_hub::VERSION_OFFSET as usize;
            data[at..at + FW_VERSION_SIZE].copy_from_slice(version.as_bytes());
        }
        let sel = BOOT_SELECT_ADDR as usize;
        data[sel..sel + 4096].fill(0xFF);
        data[sel..sel + 2].copy_from_slice(&BOOT_SELECT_MAGIC);
        data[sel + 2] = match current {
            ImageType::Image2 => 2,
            _ => 1,
        };
    }

    fn spi_hub_state(&self) -> (FirmwareVersions, ImageType) {
        let data = self.hub_flash.data();
        let version = |image| {
            let at = spi_hub::bank_base(image).unwrap_or(0) as usize
                + spi_hub::VERSION_OFFSET as usize;
            FirmwareVersion::from_slice(&data[at..]).unwrap_or_default()
        };
        let sel = BOOT_SELECT_ADDR as usize;
        let current = if data[sel..sel + 2] == BOOT_SELECT_MAGIC && data[sel + 2] == 2 {
            ImageType::Image2
        } else {
            ImageType::Image1
        };
        let versions = FirmwareVersions {
            bootloader: FirmwareVersion::default(),
            image1: version(ImageType::Image1),
            image2: version(ImageType::Image2),
        };
        (versions, current)
    }

    /// Versions and running bank of the device reached through `access`
    pub fn device_state(&self, access: &AccessParams) -> Option<(FirmwareVersions, ImageType)> {
        match *access {
            AccessParams::I2cDirect { address, .. } => {
                let t = self.hpi(address)?;
                Some((t.versions(), t.current_image()))
            }
            AccessParams::I2cHub { address, .. } => {
                let t = self.eeprom(address)?;
                let versions = FirmwareVersions {
                    image1: t.stored_version(),
                    ..FirmwareVersions::default()
                };
                Some((versions, ImageType::Image1))
            }
            AccessParams::SpiHub { .. } => Some(self.spi_hub_state()),
        }
    }

    /// Reset the device reached through `access` to the given contents
    pub fn power_on(&mut self, access: &AccessParams, versions: FirmwareVersions, current: ImageType) {
        match *access {
            AccessParams::I2cDirect { address, .. } => {
                if let Some(t) = self.hpi_mut(address) {
                    t.power_on(versions, current);
                }
            }
            AccessParams::I2cHub { address, .. } => {
                if let Some(t) = self.eeprom_mut(address) {
                    t.power_on(versions.image1);
                }
            }
            AccessParams::SpiHub { .. } => self.install_spi_hub(versions, current),
        }
    }
}

impl I2cMaster for SimDockBus {
    fn max_transfer_len(&self) -> usize {
        MAX_I2C_TRANSFER
    }

    fn write(&mut self, addr: u8, data: &[u8]) -> Result<()> {
        let Self { targets, pins, .. } = self;
        match targets.get_mut(&addr) {
            Some(I2cTarget::Hpi(t)) => t.write(data),
            Some(I2cTarget::Eeprom(t)) => {
                let protected = pins.get(t.wp_pin() as usize).copied().unwrap_or(true);
                t.write(data, protected)
            }
            None => Err(Error::I2cNack),
        }
    }

    fn write_read(&mut self, addr: u8, data: &[u8], buf: &mut [u8]) -> Result<()> {
        match self.targets.get_mut(&addr) {
            Some(I2cTarget::Hpi(t)) => t.write_read(data, buf),
            Some(I2cTarget::Eeprom(t)) => t.write_read(data, buf),
            None => Err(Error::I2cNack),
        }
    }
}

impl SpiMaster for SimDockBus {
    fn max_read_len(&self) -> usize {
        self.hub_flash.max_read_len()
    }

    fn max_write_len(&self) -> usize {
        self.hub_flash.max_write_len()
    }

    fn execute(&mut self, cmd: &mut SpiCommand<'_>) -> Result<()> {
        self.hub_flash.execute(cmd)
    }

    fn delay_us(&mut self, us: u32) {
        self.elapsed_us += us as u64;
    }
}

impl GpioControl for SimDockBus {
    fn pin_count(&self) -> u8 {
        self.pins.len() as u8
    }

    fn set(&mut self, pin: u8, high: bool) -> Result<()> {
        let level = self.pins.get_mut(pin as usize).ok_or(Error::GpioError)?;
        let rising = !*level && high;
        *level = high;
        if rising {
            for target in self.targets.values_mut() {
                if let I2cTarget::Eeprom(t) = target {
                    if t.reset_pin() == pin {
                        t.reload();
                    }
                }
            }
        }
        Ok(())
    }

    fn get(&mut self, pin: u8) -> Result<bool> {
        self.pin(pin).ok_or(Error::GpioError)
    }
}

impl DockBus for SimDockBus {
    fn i2c(&mut self) -> &mut dyn I2cMaster {
        self
    }

    fn spi(&mut self) -> &mut dyn SpiMaster {
        self
    }

    fn gpio(&mut self) -> &mut dyn GpioControl {
        self
    }

    fn delay_us(&mut self, us: u32) {
        self.elapsed_us += us as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(build: u16) -> FirmwareVersion {
        FirmwareVersion::new(1, 0, 0, build, [0; 4])
    }

    #[test]
    fn test_unknown_address_nacks() {
        let mut bus = SimDockBus::new(8);
        assert_eq!(I2cMaster::write(&mut bus, 0x20, &[0, 0]), Err(Error::I2cNack));
    }

    #[test]
    fn test_address_conflict() {
        let mut bus = SimDockBus::new(8);
        bus.attach(0x50, I2cTarget::Eeprom(EepromTarget::new(v(1), 1, 2)))
            .unwrap();
        assert!(matches!(
            bus.attach(0x50, I2cTarget::Eeprom(EepromTarget::new(v(1), 3, 4))),
            Err(SimError::AddressConflict(0x50))
        ));
    }

    #[test]
    fn test_eeprom_honours_write_protect_line() {
        let mut bus = SimDockBus::new(8);
        bus.attach(0x50, I2cTarget::Eeprom(EepromTarget::new(v(1), 1, 2)))
            .unwrap();
        I2cMaster::write(&mut bus, 0x50, &[0x01, 0x00, 0xAB]).unwrap();
        assert_eq!(bus.eeprom(0x50).unwrap().memory()[0x100], 0xFF);

        GpioControl::set(&mut bus, 2, false).unwrap();
        I2cMaster::write(&mut bus, 0x50, &[0x01, 0x00, 0xAB]).unwrap();
        assert_eq!(bus.eeprom(0x50).unwrap().memory()[0x100], 0xAB);
    }

    #[test]
    fn test_reset_release_reloads_hub() {
        let mut bus = SimDockBus::new(8);
        bus.attach(0x50, I2cTarget::Eeprom(EepromTarget::new(v(1), 1, 2)))
            .unwrap();
        GpioControl::set(&mut bus, 1, true).unwrap();
        assert_eq!(bus.eeprom(0x50).unwrap().reloads(), 0);
        GpioControl::set(&mut bus, 1, false).unwrap();
        GpioControl::set(&mut bus, 1, true).unwrap();
        assert_eq!(bus.eeprom(0x50).unwrap().reloads(), 1);
    }

    #[test]
    fn test_gpio_out_of_range() {
        let mut bus = SimDockBus::new(4);
        assert_eq!(GpioControl::set(&mut bus, 4, true), Err(Error::GpioError));
    }

    #[test]
    fn test_spi_hub_layout_round_trip() {
        let mut bus = SimDockBus::new(8);
        let versions = FirmwareVersions {
            image1: v(3),
            image2: v(4),
            ..FirmwareVersions::default()
        };
        bus.install_spi_hub(versions, ImageType::Image2);
        let access = AccessParams::SpiHub {
            reset_gpio: 1,
            wp_gpio: 2,
        };
        let (read, current) = bus.device_state(&access).unwrap();
        assert_eq!(read.image1, v(3));
        assert_eq!(read.image2, v(4));
        assert_eq!(current, ImageType::Image2);
    }
}
