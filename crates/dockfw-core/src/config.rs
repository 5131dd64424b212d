//! Update session tunables

use crate::access::AccessLimits;

/// Largest number of devices one dock can carry
pub const MAX_DEV_COUNT: usize = 8;
/// Row sizes must be a multiple of this many bytes
pub const ROW_SIZE_MULT: u16 = 64;
/// Size of the package area reserved for each candidate
pub const PACKAGE_AREA_SIZE: u32 = 2 * 1024 * 1024;

/// Parameters of the update engine
///
/// Loaded from the `[update]` table of a dock description when the `std`
/// feature is enabled; every field has a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "std", serde(default, deny_unknown_fields))]
pub struct UpdateConfig {
    /// Failed prepare/row/finish attempts tolerated per device
    pub attempt_limit: u8,
    /// Passes a deferred device is retried before it fails
    pub max_passes: u8,
    /// Largest accepted package
    pub max_package_size: u32,
    /// Row sizes must be a multiple of this
    pub row_size_multiple: u16,
    /// Number of GPIO lines on the platform
    pub gpio_count: u8,
    /// Internal flash row holding dock metadata
    pub metadata_row: u16,
    /// First of the two internal flash rows holding the fault log
    pub log_row: u16,
    /// First of the two rows holding the fault log backup
    pub backup_log_row: u16,
    /// Fault log flushes between backup refreshes
    pub backup_threshold: u8,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            attempt_limit: 3,
            max_passes: 3,
            max_package_size: PACKAGE_AREA_SIZE,
            row_size_multiple: ROW_SIZE_MULT,
            gpio_count: 32,
            metadata_row: 0x3F0,
            log_row: 0x3F2,
            backup_log_row: 0x3F4,
            backup_threshold: 10,
        }
    }
}

impl UpdateConfig {
    /// Access limits derived from the platform parameters
    pub fn access_limits(&self) -> AccessLimits {
        AccessLimits {
            gpio_count: self.gpio_count,
        }
    }
}
