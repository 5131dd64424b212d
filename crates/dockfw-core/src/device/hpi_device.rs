//! PD controllers updated over HPI
//!
//! Dual-image controllers are updated in place while running: the inactive
//! bank is programmed row by row, validated, and the device is asked to jump
//! to it. Single-image controllers are first sent to their bootloader.

use alloc::boxed::Box;
use alloc::vec;

use super::descriptor::DeviceDescriptor;
use super::ops::{DeviceQuery, DeviceUpdateOps};
use super::types::{FirmwareVersions, ImageMode, ImageType};
use crate::access::BusHandle;
use crate::error::{Error, Result};
use crate::programmer::DockBus;
use crate::protocol::hpi;

/// Running bank in the device mode register
pub const DEVICE_MODE_IMAGE_MASK: u8 = 0x03;
/// Bank layout in the device mode register
pub const DEVICE_MODE_LAYOUT_SHIFT: u8 = 4;
/// Device is busy (contract negotiation, boot) and should not be queried
pub const DEVICE_MODE_BUSY: u8 = 0x80;

/// HPI-speaking PD controller
#[derive(Debug)]
pub struct HpiDevice {
    address: u8,
    current_image: ImageType,
    image_mode: Option<ImageMode>,
    /// Lowest row written in this update and its length
    header_row: Option<(u16, usize)>,
}

impl HpiDevice {
    /// Create operations for a device reached over direct I2C
    pub fn create(handle: &BusHandle) -> Result<Box<dyn DeviceUpdateOps>> {
        match handle {
            BusHandle::I2cDirect { address, .. } => Ok(Box::new(Self {
                address: address.get(),
                current_image: ImageType::Bootloader,
                image_mode: None,
                header_row: None,
            })),
            _ => Err(Error::InvalidAccessConfig),
        }
    }

    fn read_mode(&mut self, bus: &mut dyn DockBus) -> Result<u8> {
        hpi::read_device_mode(bus.i2c(), self.address)
    }
}

impl DeviceUpdateOps for HpiDevice {
    fn init_device_param(&mut self, desc: &mut DeviceDescriptor) -> Result<()> {
        if let Some(mode) = self.image_mode {
            desc.image_mode = mode;
        }
        Ok(())
    }

    fn init(&mut self, bus: &mut dyn DockBus) -> Result<()> {
        let mode = self.read_mode(bus)?;
        self.image_mode = ImageMode::from_u8((mode >> DEVICE_MODE_LAYOUT_SHIFT) & 0x03);
        log::debug!("HPI 0x{:02X}: device mode 0x{:02X}", self.address, mode);
        Ok(())
    }

    fn check_firmware_version(&mut self, bus: &mut dyn DockBus) -> Result<DeviceQuery> {
        let mode = self.read_mode(bus)?;
        let current_image =
            ImageType::from_u8(mode & DEVICE_MODE_IMAGE_MASK).ok_or(Error::UnexpectedResponse(mode))?;
        let block = hpi::read_all_versions(bus.i2c(), self.address)?;
        self.current_image = current_image;
        Ok(DeviceQuery {
            versions: FirmwareVersions::from_block(&block),
            current_image,
        })
    }

    fn is_query_deferred(&mut self, bus: &mut dyn DockBus) -> bool {
        // An unreadable mode register is a query failure, not a deferral.
        matches!(self.read_mode(bus), Ok(mode) if mode & DEVICE_MODE_BUSY != 0)
    }

    fn prepare_update(&mut self, bus: &mut dyn DockBus, image: ImageType) -> Result<()> {
        self.header_row = None;
        if image == self.current_image {
            // Cannot program the bank we are executing from.
            hpi::command(bus, self.address, hpi::REG_JUMP, &[hpi::JUMP_TO_BOOT_SIG])
                .map_err(|_| Error::PrepareFailed)?;
            self.current_image = ImageType::Bootloader;
        }
        hpi::command(
            bus,
            self.address,
            hpi::REG_ENTER_FLASH_MODE,
            &[hpi::FLASH_MODE_SIG],
        )
        .map_err(|e| {
            log::warn!("HPI 0x{:02X}: enter flash mode failed: {}", self.address, e);
            Error::PrepareFailed
        })
    }

    fn flash_row(
        &mut self,
        bus: &mut dyn DockBus,
        _image: ImageType,
        row: u16,
        data: &[u8],
    ) -> Result<()> {
        hpi::write_row(bus, self.address, row, data).map_err(|e| match e {
            Error::UnexpectedResponse(_) => Error::RowWriteFailed,
            other => other,
        })?;
        if self.header_row.map_or(true, |(first, _)| row < first) {
            self.header_row = Some((row, data.len()));
        }
        Ok(())
    }

    fn finish_update(
        &mut self,
        bus: &mut dyn DockBus,
        image: ImageType,
        success: bool,
    ) -> Result<()> {
        if !success {
            // Zeroing the image header makes the bank fail validation.
            let Some((row, len)) = self.header_row.take() else {
                return Ok(());
            };
            log::debug!("HPI 0x{:02X}: invalidating {:?} at row 0x{:X}", self.address, image, row);
            return hpi::write_row(bus, self.address, row, &vec![0u8; len])
                .map_err(|_| Error::FinishFailed);
        }
        hpi::command(bus, self.address, hpi::REG_VALIDATE_FW, &[image as u8])
            .map_err(|_| Error::FinishFailed)
    }

    fn jump_to_alternate(&mut self, bus: &mut dyn DockBus, image: ImageType) -> Result<()> {
        hpi::command(bus, self.address, hpi::REG_JUMP, &[hpi::JUMP_TO_ALT_SIG])
            .map_err(|_| Error::JumpRejected)?;
        self.current_image = image;
        Ok(())
    }
}
