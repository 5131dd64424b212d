//! Dock devices: descriptors, version types and update operations
//!
//! [`DeviceDescriptor`] is the per-device record kept in the registry;
//! [`DeviceUpdateOps`] is the capability set each device family provides.
//! Three families are built in:
//!
//! - [`HpiDevice`]: PD controllers programmed over HPI
//! - [`HubEeprom`]: hubs booting from an I2C EEPROM
//! - [`SpiHub`]: components booting from a dual-bank SPI flash

mod descriptor;
pub mod hpi_device;
pub mod hub_eeprom;
mod ops;
pub mod spi_hub;
mod types;

pub use descriptor::{DeviceDescriptor, DEVICE_STATUS_LEN};
pub use hpi_device::HpiDevice;
pub use hub_eeprom::HubEeprom;
pub use ops::{DeviceQuery, DeviceUpdateOps, OpsFactory, OpsTable};
pub use spi_hub::SpiHub;
pub use types::{
    DeviceType, FirmwareVersion, FirmwareVersions, ImageMode, ImageStatus, ImageType,
    FW_VERSION_SIZE,
};
