//! USB hubs that boot from an I2C EEPROM
//!
//! The hub is held in reset while its EEPROM is rewritten and released
//! afterwards so it reloads the new image. The EEPROM uses 16-bit word
//! addressing and page writes.

use alloc::boxed::Box;
use alloc::vec::Vec;

use super::ops::{DeviceQuery, DeviceUpdateOps};
use super::types::{FirmwareVersion, FirmwareVersions, ImageType, FW_VERSION_SIZE};
use crate::access::BusHandle;
use crate::error::{Error, Result};
use crate::programmer::DockBus;

/// Offset of the firmware version inside the image
pub const VERSION_OFFSET: u16 = 0x0010;
/// EEPROM page size
pub const EEPROM_PAGE_SIZE: usize = 64;
/// Internal write cycle time
pub const WRITE_CYCLE_US: u32 = 5_000;
/// Time the hub reset line is held low for a reload
pub const RESET_PULSE_US: u32 = 10_000;

/// I2C EEPROM hub
#[derive(Debug)]
pub struct HubEeprom {
    address: u8,
    reset_pin: u8,
    wp_pin: u8,
}

impl HubEeprom {
    /// Create operations for a hub reached through its EEPROM
    pub fn create(handle: &BusHandle) -> Result<Box<dyn DeviceUpdateOps>> {
        match handle {
            BusHandle::I2cHub { address, reset, wp } => Ok(Box::new(Self {
                address: address.get(),
                reset_pin: reset.get(),
                wp_pin: wp.get(),
            })),
            _ => Err(Error::InvalidAccessConfig),
        }
    }

    fn write_page(&self, bus: &mut dyn DockBus, offset: u16, data: &[u8]) -> Result<()> {
        let mut frame = Vec::with_capacity(2 + data.len());
        frame.extend_from_slice(&offset.to_be_bytes());
        frame.extend_from_slice(data);
        bus.i2c().write(self.address, &frame)?;
        bus.delay_us(WRITE_CYCLE_US);
        Ok(())
    }
}

impl DeviceUpdateOps for HubEeprom {
    fn init(&mut self, bus: &mut dyn DockBus) -> Result<()> {
        bus.gpio().set(self.wp_pin, true)?;
        bus.gpio().set(self.reset_pin, true)
    }

    fn deinit(&mut self, bus: &mut dyn DockBus) -> Result<()> {
        // Never leave the hub held in reset, whatever ended the update.
        bus.gpio().set(self.wp_pin, true)?;
        bus.gpio().set(self.reset_pin, true)
    }

    fn check_firmware_version(&mut self, bus: &mut dyn DockBus) -> Result<DeviceQuery> {
        let mut buf = [0u8; FW_VERSION_SIZE];
        bus.i2c()
            .write_read(self.address, &VERSION_OFFSET.to_be_bytes(), &mut buf)?;
        Ok(DeviceQuery {
            versions: FirmwareVersions {
                image1: FirmwareVersion::from_bytes(buf),
                ..FirmwareVersions::default()
            },
            current_image: ImageType::Image1,
        })
    }

    fn device_update_logic(&self, _desc: &super::DeviceDescriptor) -> ImageType {
        ImageType::Image1
    }

    fn prepare_update(&mut self, bus: &mut dyn DockBus, _image: ImageType) -> Result<()> {
        let gpio = bus.gpio();
        gpio.set(self.reset_pin, false)
            .and_then(|_| gpio.set(self.wp_pin, false))
            .map_err(|_| Error::PrepareFailed)
    }

    fn flash_row(
        &mut self,
        bus: &mut dyn DockBus,
        _image: ImageType,
        row: u16,
        data: &[u8],
    ) -> Result<()> {
        let base = (row as usize)
            .checked_mul(data.len())
            .filter(|b| b + data.len() <= u16::MAX as usize + 1)
            .ok_or(Error::AddressOutOfBounds)?;
        let page = EEPROM_PAGE_SIZE.min(bus.i2c().max_transfer_len().saturating_sub(2)).max(1);
        for (i, chunk) in data.chunks(page).enumerate() {
            self.write_page(bus, (base + i * page) as u16, chunk)
                .map_err(|_| Error::RowWriteFailed)?;
        }
        Ok(())
    }

    fn finish_update(
        &mut self,
        bus: &mut dyn DockBus,
        _image: ImageType,
        success: bool,
    ) -> Result<()> {
        if !success {
            // Blank the version so the hub is not reported as current.
            self.write_page(bus, VERSION_OFFSET, &[0xFF; FW_VERSION_SIZE])?;
        }
        bus.gpio()
            .set(self.wp_pin, true)
            .map_err(|_| Error::FinishFailed)
    }

    fn jump_to_alternate(&mut self, bus: &mut dyn DockBus, _image: ImageType) -> Result<()> {
        let pulse = |bus: &mut dyn DockBus| -> Result<()> {
            bus.gpio().set(self.reset_pin, false)?;
            bus.delay_us(RESET_PULSE_US);
            bus.gpio().set(self.reset_pin, true)
        };
        pulse(bus).map_err(|_| Error::JumpRejected)
    }

    fn skip_jump_to_alternate_request(&self, _desc: &super::DeviceDescriptor) -> bool {
        // The reset pulse is what makes the hub load the new image.
        false
    }
}
