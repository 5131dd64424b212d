//! Dock registry
//!
//! The registry is the dock-level aggregate: overall status, composite
//! version and the ordered list of devices. Device indices are stable for
//! the lifetime of an update session.

#[cfg(feature = "std")]
mod toml;

#[cfg(feature = "std")]
pub use self::toml::{DockConfig, DockConfigError};

use alloc::vec::Vec;

use crate::config::MAX_DEV_COUNT;
use crate::device::{DeviceDescriptor, DEVICE_STATUS_LEN};
use crate::error::{Error, Result};

/// Dock update status codes reported upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum DockStatus {
    /// No update activity
    #[default]
    Idle = 0x00,
    /// Phase 1 running
    Phase1InProgress = 0x01,
    /// Phase 1 ended with some devices failed
    Phase1Partial = 0x02,
    /// Phase 1 complete, some devices left for later passes
    Phase1CompletePartial = 0x04,
    /// Phase 1 complete, critical devices await phase 2
    Phase1CompleteFullPhase2NotDone = 0x05,
    /// Phase 2 running
    Phase2InProgress = 0x81,
    /// Phase 2 ended with some devices failed
    Phase2Partial = 0x82,
    /// Factory package backup in progress
    Phase2FactoryBackup = 0x83,
    /// Phase 2 complete, some devices left for later passes
    Phase2CompletePartial = 0x84,
    /// Phase 2 complete
    Phase2CompleteFull = 0x85,
    /// Package failed authentication
    AuthenticationFailed = 0x89,
    /// No usable package
    NoValidPackage = 0x8D,
    /// Factory package backup failed
    FactoryBackupFailed = 0x8F,
    /// Factory package designated but unusable
    NoValidFactoryPackage = 0x90,
    /// Session aborted
    Aborted = 0x91,
    /// Phase 1 failed before any device was processed
    Phase1Fail = 0xFF,
}

impl DockStatus {
    /// Decode a wire code
    pub fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            0x00 => Self::Idle,
            0x01 => Self::Phase1InProgress,
            0x02 => Self::Phase1Partial,
            0x04 => Self::Phase1CompletePartial,
            0x05 => Self::Phase1CompleteFullPhase2NotDone,
            0x81 => Self::Phase2InProgress,
            0x82 => Self::Phase2Partial,
            0x83 => Self::Phase2FactoryBackup,
            0x84 => Self::Phase2CompletePartial,
            0x85 => Self::Phase2CompleteFull,
            0x89 => Self::AuthenticationFailed,
            0x8D => Self::NoValidPackage,
            0x8F => Self::FactoryBackupFailed,
            0x90 => Self::NoValidFactoryPackage,
            0x91 => Self::Aborted,
            0xFF => Self::Phase1Fail,
            _ => return None,
        })
    }

    /// Whether a session is running
    pub fn in_progress(self) -> bool {
        matches!(
            self,
            Self::Phase1InProgress | Self::Phase2InProgress | Self::Phase2FactoryBackup
        )
    }
}

/// Length of the status blob header
pub const STATUS_HEADER_LEN: usize = 8;

/// Registry of the devices on one dock
#[derive(Debug, Clone, Default)]
pub struct DockRegistry {
    /// Overall update status
    pub dock_status: DockStatus,
    /// Version identifying the dock firmware set as a whole
    pub composite_version: u32,
    devices: heapless::Vec<DeviceDescriptor, MAX_DEV_COUNT>,
}

impl DockRegistry {
    /// Empty registry
    pub fn new(composite_version: u32) -> Self {
        Self {
            composite_version,
            ..Self::default()
        }
    }

    /// Append an enumerated device; returns its index
    pub fn add_device(&mut self, desc: DeviceDescriptor) -> Result<usize> {
        self.devices.push(desc).map_err(|_| Error::TooManyDevices)?;
        Ok(self.devices.len() - 1)
    }

    /// Forget all devices (dock detach)
    pub fn clear(&mut self) {
        self.devices.clear();
        self.dock_status = DockStatus::Idle;
    }

    /// Number of devices
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// All devices in index order
    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    /// Device at `index`
    pub fn device(&self, index: usize) -> Option<&DeviceDescriptor> {
        self.devices.get(index)
    }

    /// Mutable device at `index`
    pub fn device_mut(&mut self, index: usize) -> Option<&mut DeviceDescriptor> {
        self.devices.get_mut(index)
    }

    /// Encode the upstream dock status blob
    ///
    /// Header: status, device count, total length (LE u16), composite
    /// version (LE u32); then one 32-byte entry per device.
    pub fn encode_status(&self) -> Vec<u8> {
        let len = STATUS_HEADER_LEN + self.devices.len() * DEVICE_STATUS_LEN;
        let mut out = Vec::with_capacity(len);
        out.push(self.dock_status as u8);
        out.push(self.devices.len() as u8);
        out.extend_from_slice(&(len as u16).to_le_bytes());
        out.extend_from_slice(&self.composite_version.to_le_bytes());
        for dev in &self.devices {
            out.extend_from_slice(&dev.encode_status());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessParams;
    use crate::device::{DeviceType, ImageMode};

    fn hub(id: u8) -> DeviceDescriptor {
        DeviceDescriptor::new(
            DeviceType::Hx3,
            id,
            ImageMode::Single,
            AccessParams::I2cHub {
                address: 0x50 + id,
                reset_gpio: 1,
                wp_gpio: 2,
            },
        )
    }

    #[test]
    fn test_capacity() {
        let mut reg = DockRegistry::new(1);
        for i in 0..MAX_DEV_COUNT {
            assert_eq!(reg.add_device(hub(i as u8)).unwrap(), i);
        }
        assert_eq!(reg.add_device(hub(9)), Err(Error::TooManyDevices));
        assert_eq!(reg.device_count(), MAX_DEV_COUNT);
    }

    #[test]
    fn test_status_blob() {
        let mut reg = DockRegistry::new(0x0102_0304);
        reg.add_device(hub(0)).unwrap();
        reg.add_device(hub(1)).unwrap();
        reg.dock_status = DockStatus::Phase2CompleteFull;

        let blob = reg.encode_status();
        assert_eq!(blob.len(), 8 + 2 * 32);
        assert_eq!(blob[..8], [0x85, 2, 72, 0, 0x04, 0x03, 0x02, 0x01]);
        assert_eq!(blob[8], DeviceType::Hx3 as u8);
        assert_eq!(blob[40 + 1], 1);
    }

    #[test]
    fn test_status_codes() {
        for code in 0..=255u8 {
            if let Some(s) = DockStatus::from_u8(code) {
                assert_eq!(s as u8, code);
            }
        }
        assert!(DockStatus::Phase2InProgress.in_progress());
        assert!(!DockStatus::Phase1Partial.in_progress());
    }
}
