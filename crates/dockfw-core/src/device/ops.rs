//! Per-device-type update operations
//!
//! Every device family implements [`DeviceUpdateOps`]. The update machine
//! only talks to devices through this trait, and [`OpsTable`] binds exactly
//! one implementation to each [`DeviceType`].

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::rc::Rc;

use super::descriptor::DeviceDescriptor;
use super::types::{DeviceType, FirmwareVersions, ImageType};
use crate::access::BusHandle;
use crate::error::{Error, Result};
use crate::programmer::DockBus;

/// Result of reading a device's version registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceQuery {
    /// Versions of every bank
    pub versions: FirmwareVersions,
    /// Bank currently executing
    pub current_image: ImageType,
}

/// Update operations for one device family
///
/// Operations receive the dock buses for the duration of the call only.
/// Implementations keep whatever per-device state they need between calls
/// (current image, bank geometry) in `self`.
pub trait DeviceUpdateOps {
    /// Fill in family-specific descriptor fields after enumeration
    fn init_device_param(&mut self, _desc: &mut DeviceDescriptor) -> Result<()> {
        Ok(())
    }

    /// Bring the device interface up before a session
    fn init(&mut self, bus: &mut dyn DockBus) -> Result<()>;

    /// Release the device interface after a session
    fn deinit(&mut self, _bus: &mut dyn DockBus) -> Result<()> {
        Ok(())
    }

    /// Route or release the shared bus pins for this device
    fn configure_hardware_interface(&mut self, _bus: &mut dyn DockBus, _enable: bool) -> Result<()> {
        Ok(())
    }

    /// Read versions and the running bank
    fn check_firmware_version(&mut self, bus: &mut dyn DockBus) -> Result<DeviceQuery>;

    /// The device cannot be queried right now and should be retried later
    fn is_query_deferred(&mut self, _bus: &mut dyn DockBus) -> bool {
        false
    }

    /// Bank to program for this device
    fn device_update_logic(&self, desc: &DeviceDescriptor) -> ImageType {
        if desc.image_mode.is_dual() {
            desc.current_image.alternate()
        } else {
            ImageType::Image1
        }
    }

    /// Arm the target bank for programming
    fn prepare_update(&mut self, bus: &mut dyn DockBus, image: ImageType) -> Result<()>;

    /// Program one row; `row` is the device's absolute row number
    fn flash_row(
        &mut self,
        bus: &mut dyn DockBus,
        image: ImageType,
        row: u16,
        data: &[u8],
    ) -> Result<()>;

    /// Commit (`success`) or invalidate the programmed bank
    fn finish_update(&mut self, bus: &mut dyn DockBus, image: ImageType, success: bool)
        -> Result<()>;

    /// Ask the device to start executing `image`
    fn jump_to_alternate(&mut self, bus: &mut dyn DockBus, image: ImageType) -> Result<()>;

    /// No jump is needed after a verified update
    fn skip_jump_to_alternate_request(&self, desc: &DeviceDescriptor) -> bool {
        !desc.image_mode.is_dual()
    }
}

/// Constructor for one device family's operations
pub type OpsFactory = Rc<dyn Fn(&BusHandle) -> Result<Box<dyn DeviceUpdateOps>>>;

/// Binding of device types to their update operations
#[derive(Clone, Default)]
pub struct OpsTable {
    entries: BTreeMap<DeviceType, OpsFactory>,
}

impl OpsTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with the built-in device families
    pub fn standard() -> Self {
        let mut table = Self::new();
        for t in [
            DeviceType::Ccg2,
            DeviceType::Ccg3,
            DeviceType::Ccg4,
            DeviceType::Ccg5,
            DeviceType::Ccg5c,
            DeviceType::Ccg6,
            DeviceType::Ccg5Tbt,
            DeviceType::Ccg5cTbt,
            DeviceType::Cy7c65219,
            DeviceType::Hx3PdPd,
            DeviceType::Pmg1s3,
            DeviceType::Ccg7sc,
        ] {
            table.register(t, super::hpi_device::HpiDevice::create);
        }
        for t in [DeviceType::Hx3, DeviceType::Fxvl] {
            table.register(t, super::hub_eeprom::HubEeprom::create);
        }
        for t in [
            DeviceType::Hx3PdHub,
            DeviceType::TrTbt,
            DeviceType::Goshen,
            DeviceType::SpiComponent,
        ] {
            table.register(t, super::spi_hub::SpiHub::create);
        }
        table
    }

    /// Bind `factory` to `device_type`, replacing any previous binding
    pub fn register<Fac>(&mut self, device_type: DeviceType, factory: Fac) -> &mut Self
    where
        Fac: Fn(&BusHandle) -> Result<Box<dyn DeviceUpdateOps>> + 'static,
    {
        self.entries.insert(device_type, Rc::new(factory));
        self
    }

    /// Whether an implementation is bound for `device_type`
    pub fn supports(&self, device_type: DeviceType) -> bool {
        self.entries.contains_key(&device_type)
    }

    /// Instantiate the operations for a device
    pub fn create(
        &self,
        device_type: DeviceType,
        handle: &BusHandle,
    ) -> Result<Box<dyn DeviceUpdateOps>> {
        let factory = self
            .entries
            .get(&device_type)
            .ok_or(Error::DeviceNotSupported)?;
        factory.as_ref()(handle)
    }
}

impl core::fmt::Debug for OpsTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}
