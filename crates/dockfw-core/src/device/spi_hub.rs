//! Components that boot from a dual-bank SPI flash
//!
//! Flash map (per component):
//!
//! | offset     | contents                           |
//! |------------|------------------------------------|
//! | `0x000000` | image 1 bank                       |
//! | `0x040000` | image 2 bank                       |
//! | `0x0FF000` | boot-select sector: `B`, `S`, bank |
//!
//! The version sits at [`VERSION_OFFSET`] inside each bank. An update erases
//! the inactive bank, programs it, and switches the boot-select sector.

use alloc::boxed::Box;

use super::ops::{DeviceQuery, DeviceUpdateOps};
use super::types::{FirmwareVersion, FirmwareVersions, ImageType, FW_VERSION_SIZE};
use crate::access::BusHandle;
use crate::error::{Error, Result};
use crate::programmer::DockBus;
use crate::protocol::spi25;
use crate::spi::EraseSize;

/// Size of one image bank
pub const BANK_SIZE: u32 = 0x40000;
/// Start of the boot-select sector
pub const BOOT_SELECT_ADDR: u32 = 0x0FF000;
/// Offset of the firmware version inside a bank
pub const VERSION_OFFSET: u32 = 0x10;
/// Boot-select marker
pub const BOOT_SELECT_MAGIC: [u8; 2] = *b"BS";
/// Hold time for the component reset line
pub const RESET_PULSE_US: u32 = 10_000;

/// Dual-bank SPI flash component
#[derive(Debug)]
pub struct SpiHub {
    reset_pin: u8,
    wp_pin: u8,
}

/// Base address of an application bank
pub fn bank_base(image: ImageType) -> Result<u32> {
    match image {
        ImageType::Image1 => Ok(0),
        ImageType::Image2 => Ok(BANK_SIZE),
        ImageType::Bootloader => Err(Error::AddressOutOfBounds),
    }
}

impl SpiHub {
    /// Create operations for a component on the SPI bus
    pub fn create(handle: &BusHandle) -> Result<Box<dyn DeviceUpdateOps>> {
        match handle {
            BusHandle::SpiHub { reset, wp } => Ok(Box::new(Self {
                reset_pin: reset.get(),
                wp_pin: wp.get(),
            })),
            _ => Err(Error::InvalidAccessConfig),
        }
    }

    fn read_version(bus: &mut dyn DockBus, image: ImageType) -> Result<FirmwareVersion> {
        let mut buf = [0u8; FW_VERSION_SIZE];
        spi25::read(bus.spi(), bank_base(image)? + VERSION_OFFSET, &mut buf)?;
        Ok(FirmwareVersion::from_bytes(buf))
    }

    fn read_boot_select(bus: &mut dyn DockBus) -> Result<ImageType> {
        let mut buf = [0u8; 3];
        spi25::read(bus.spi(), BOOT_SELECT_ADDR, &mut buf)?;
        if buf[..2] == BOOT_SELECT_MAGIC {
            if let Some(image @ (ImageType::Image1 | ImageType::Image2)) = ImageType::from_u8(buf[2])
            {
                return Ok(image);
            }
        }
        Ok(ImageType::Image1)
    }

    fn write_boot_select(bus: &mut dyn DockBus, image: ImageType) -> Result<()> {
        let record = [BOOT_SELECT_MAGIC[0], BOOT_SELECT_MAGIC[1], image as u8];
        spi25::erase_block(bus.spi(), EraseSize::Sector4K, BOOT_SELECT_ADDR)?;
        spi25::write(bus.spi(), BOOT_SELECT_ADDR, &record)
    }
}

impl DeviceUpdateOps for SpiHub {
    fn init(&mut self, bus: &mut dyn DockBus) -> Result<()> {
        bus.gpio().set(self.wp_pin, true)?;
        spi25::read_jedec_id(bus.spi())?;
        Ok(())
    }

    fn deinit(&mut self, bus: &mut dyn DockBus) -> Result<()> {
        spi25::write_disable(bus.spi())?;
        bus.gpio().set(self.wp_pin, true)
    }

    fn configure_hardware_interface(&mut self, bus: &mut dyn DockBus, enable: bool) -> Result<()> {
        // Reset is active low; hold the component while the controller owns the flash.
        bus.gpio().set(self.reset_pin, !enable)
    }

    fn check_firmware_version(&mut self, bus: &mut dyn DockBus) -> Result<DeviceQuery> {
        let versions = FirmwareVersions {
            bootloader: FirmwareVersion::default(),
            image1: Self::read_version(bus, ImageType::Image1)?,
            image2: Self::read_version(bus, ImageType::Image2)?,
        };
        Ok(DeviceQuery {
            versions,
            current_image: Self::read_boot_select(bus)?,
        })
    }

    fn prepare_update(&mut self, bus: &mut dyn DockBus, image: ImageType) -> Result<()> {
        let base = bank_base(image)?;
        bus.gpio()
            .set(self.wp_pin, false)
            .map_err(|_| Error::PrepareFailed)?;
        spi25::erase_range(bus.spi(), base, BANK_SIZE).map_err(|e| {
            log::warn!("SPI bank erase at 0x{:06X} failed: {}", base, e);
            Error::PrepareFailed
        })
    }

    fn flash_row(
        &mut self,
        bus: &mut dyn DockBus,
        image: ImageType,
        row: u16,
        data: &[u8],
    ) -> Result<()> {
        let offset = row as u32 * data.len() as u32;
        if offset + data.len() as u32 > BANK_SIZE {
            return Err(Error::AddressOutOfBounds);
        }
        spi25::write(bus.spi(), bank_base(image)? + offset, data).map_err(|_| Error::RowWriteFailed)
    }

    fn finish_update(
        &mut self,
        bus: &mut dyn DockBus,
        image: ImageType,
        success: bool,
    ) -> Result<()> {
        if !success {
            // Erase the first sector so the bank reads back blank.
            spi25::erase_block(bus.spi(), EraseSize::Sector4K, bank_base(image)?)?;
        }
        bus.gpio()
            .set(self.wp_pin, true)
            .map_err(|_| Error::FinishFailed)
    }

    fn jump_to_alternate(&mut self, bus: &mut dyn DockBus, image: ImageType) -> Result<()> {
        let switch = |bus: &mut dyn DockBus| -> Result<()> {
            bus.gpio().set(self.wp_pin, false)?;
            Self::write_boot_select(bus, image)?;
            bus.gpio().set(self.wp_pin, true)?;
            bus.gpio().set(self.reset_pin, false)?;
            bus.delay_us(RESET_PULSE_US);
            bus.gpio().set(self.reset_pin, true)
        };
        switch(bus).map_err(|e| {
            log::warn!("boot-select switch to {:?} failed: {}", image, e);
            Error::JumpRejected
        })
    }
}
