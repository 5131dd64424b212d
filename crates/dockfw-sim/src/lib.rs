//! dockfw-sim - In-memory dock emulator
//!
//! This crate emulates the hardware around a dock management controller so
//! the update engine can run on a host: PD controllers answering HPI over
//! I2C, hubs booting from an I2C EEPROM or a dual-bank SPI flash, the GPIO
//! lines tying them together, the controller's internal flash and the
//! package area. It is useful for testing and for trying out packages
//! without a dock.
//!
//! Every emulated device reads the version of an image from the eight bytes
//! at [`IMAGE_VERSION_OFFSET`] of the image's first row; [`stamp_version`]
//! prepares image data accordingly.

pub mod bus;
pub mod dock;
pub mod eeprom;
pub mod error;
pub mod faults;
pub mod hpi;
pub mod platform;
pub mod row_flash;
pub mod spi_flash;
pub mod verify;

pub use bus::SimDockBus;
pub use dock::{SimDock, SimOrchestrator, SimPackageArea, SimState};
pub use error::{Result, SimError};
pub use faults::FaultPlan;
pub use platform::SimPlatform;
pub use row_flash::MemRowFlash;
pub use spi_flash::{SimSpiFlash, SpiFlashConfig};
pub use verify::{Ed25519Verifier, PackageSigner};

use dockfw_core::device::{FirmwareVersion, FW_VERSION_SIZE};

/// Offset of the version stamp inside an image
pub const IMAGE_VERSION_OFFSET: usize = 0x10;

/// Write `version` into image data, growing it to hold the stamp
pub fn stamp_version(image: &mut Vec<u8>, version: FirmwareVersion) {
    let end = IMAGE_VERSION_OFFSET + FW_VERSION_SIZE;
    if image.len() < end {
        image.resize(end, 0xFF);
    }
    image[IMAGE_VERSION_OFFSET..end].copy_from_slice(version.as_bytes());
}
