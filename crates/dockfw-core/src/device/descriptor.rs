//! Per-device status record

use super::types::{DeviceType, FirmwareVersions, ImageMode, ImageStatus, ImageType};
use crate::access::AccessParams;

/// Size of one device entry in the dock status blob
pub const DEVICE_STATUS_LEN: usize = 32;

/// State of one downstream device
///
/// Created when the dock is enumerated; mutated only by the update machine
/// that owns the device during a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Device family
    pub device_type: DeviceType,
    /// Instance identifier within the dock
    pub component_id: u8,
    /// Bank layout
    pub image_mode: ImageMode,
    /// Bank currently executing
    pub current_image: ImageType,
    /// Outcome for image 1 and image 2
    pub image_status: [ImageStatus; 2],
    /// Failed attempts in the current session
    pub update_attempt_count: u8,
    /// How the device is reached
    pub access: AccessParams,
    /// Last versions read from the device
    pub firmware: FirmwareVersions,
    /// Only updated in phase 2
    pub critical: bool,
}

impl DeviceDescriptor {
    /// Create a descriptor for a freshly enumerated device
    pub fn new(
        device_type: DeviceType,
        component_id: u8,
        image_mode: ImageMode,
        access: AccessParams,
    ) -> Self {
        Self {
            device_type,
            component_id,
            image_mode,
            current_image: ImageType::Bootloader,
            image_status: [ImageStatus::Unknown; 2],
            update_attempt_count: 0,
            access,
            firmware: FirmwareVersions::default(),
            critical: false,
        }
    }

    /// Mark the device as critical
    pub fn with_critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    /// Status of an application bank (`Unknown` for the bootloader)
    pub fn status_of(&self, image: ImageType) -> ImageStatus {
        image
            .app_index()
            .map(|i| self.image_status[i])
            .unwrap_or_default()
    }

    /// Record the status of an application bank
    pub fn set_status(&mut self, image: ImageType, status: ImageStatus) {
        if let Some(i) = image.app_index() {
            self.image_status[i] = status;
        }
    }

    /// Encode the 32-byte entry of the dock status blob
    ///
    /// Layout: type, component id, image mode, current image, image status
    /// (image 1 low nibble, image 2 high nibble), access, 2 reserved, then the
    /// bootloader/image1/image2 versions.
    pub fn encode_status(&self) -> [u8; DEVICE_STATUS_LEN] {
        let mut out = [0u8; DEVICE_STATUS_LEN];
        out[0] = self.device_type as u8;
        out[1] = self.component_id;
        out[2] = self.image_mode as u8;
        out[3] = self.current_image as u8;
        out[4] = (self.image_status[0] as u8 & 0x0F) | ((self.image_status[1] as u8) << 4);
        out[5] = match self.access {
            AccessParams::I2cDirect { .. } => 0,
            AccessParams::I2cHub { .. } => 1,
            AccessParams::SpiHub { .. } => 2,
        };
        out[8..].copy_from_slice(&self.firmware.to_block());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::FirmwareVersion;

    #[test]
    fn test_status_entry() {
        let mut desc = DeviceDescriptor::new(
            DeviceType::Ccg5,
            2,
            ImageMode::DualSymmetric,
            AccessParams::I2cDirect {
                address: 0x40,
                intr_gpio: 1,
            },
        );
        desc.current_image = ImageType::Image1;
        desc.set_status(ImageType::Image1, ImageStatus::Valid);
        desc.set_status(ImageType::Image2, ImageStatus::UpdateFailed);
        desc.firmware.image1 = FirmwareVersion::new(1, 0, 0, 7, [0; 4]);

        let entry = desc.encode_status();
        assert_eq!(entry[..6], [0x04, 2, 1, 1, 0x41, 0]);
        assert_eq!(entry[16], 7);
    }

    #[test]
    fn test_bootloader_status_ignored() {
        let mut desc = DeviceDescriptor::new(
            DeviceType::Hx3,
            0,
            ImageMode::Single,
            AccessParams::I2cHub {
                address: 0x50,
                reset_gpio: 2,
                wp_gpio: 3,
            },
        );
        desc.set_status(ImageType::Bootloader, ImageStatus::Invalid);
        assert_eq!(desc.image_status, [ImageStatus::Unknown; 2]);
        assert_eq!(desc.status_of(ImageType::Bootloader), ImageStatus::Unknown);
    }
}
