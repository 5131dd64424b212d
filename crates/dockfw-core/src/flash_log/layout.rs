//! On-flash layout of the fault log
//!
//! Two 256-byte rows. The static row holds the header and fault counters and
//! changes rarely; the dynamic row holds a ring of recent failure details.
//! Each row ends in an 8-bit checksum that makes the row sum to zero.

use zerocopy::byteorder::little_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Log signature (`CY`)
pub const LOG_SIGNATURE: u16 = 0x5943;
/// Total size of the log
pub const LOG_SIZE: usize = 0x200;
/// Row size
pub const LOG_ROW_SIZE: usize = 256;
/// Layout version
pub const LOG_VERSION: u8 = 0;
/// Number of Type-C ports with fault tables
pub const PORT_COUNT: usize = 2;
/// Common fault counters in use
pub const COMMON_FAULT_COUNT: u8 = 4;
/// DMC fault counters in use
pub const DMC_FAULT_COUNT: u8 = 3;
/// Per-port fault counters in use
pub const PORT_FAULT_COUNT: usize = 13;
/// Size of one failure detail entry
pub const DETAIL_SIZE: usize = 3;
/// Size of the failure detail ring
pub const DETAILS_LEN: usize = 246;
/// Offset of the last detail slot in the ring
pub const LAST_DETAIL_OFFSET: u8 = (DETAILS_LEN - DETAIL_SIZE) as u8;
/// Ring offset value meaning "no entry"
pub const NO_OFFSET: u8 = 0xFF;

/// Static row header
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct LogHeader {
    /// [`LOG_SIGNATURE`]
    pub signature: U16,
    /// [`LOG_VERSION`]
    pub version: u8,
    /// Number of port fault tables
    pub port_count: u8,
    /// Common fault counters in use
    pub common_fault_count: u8,
    /// DMC fault counters in use
    pub dmc_fault_count: u8,
    /// Per-port fault counters in use
    pub port_fault_count: u8,
    /// Reserved
    pub reserved: [u8; 7],
}

/// Faults not tied to a port
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct CommonFaults {
    /// Watchdog resets
    pub wdt_reset: U16,
    /// Hard faults
    pub hard_fault: U16,
    /// Power cycles
    pub power_cycle: U16,
    /// VDDD brown-outs
    pub vddd_bod: U16,
    /// Reserved
    pub reserved: [U16; 12],
}

/// Firmware update faults
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct DmcFaults {
    /// Device update failures
    pub fw_upd_fail: U16,
    /// Phase 1 package authentication failures
    pub p1_auth_fail: U16,
    /// Phase 2 package authentication failures
    pub p2_auth_fail: U16,
    /// Reserved
    pub reserved: [U16; 29],
}

/// Per-port fault counters, indexed by [`PortFault`](super::PortFault)
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct PortFaults {
    /// Counters
    pub counters: [U16; PORT_FAULT_COUNT],
    /// Reserved
    pub reserved: [U16; 23],
}

/// Row 0
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct StaticRow {
    /// Header
    pub header: LogHeader,
    /// Common faults
    pub common: CommonFaults,
    /// Firmware update faults
    pub dmc: DmcFaults,
    /// Port fault tables
    pub ports: [PortFaults; PORT_COUNT],
    /// Reserved
    pub reserved: u8,
    /// Row checksum
    pub checksum: u8,
}

/// Row 1
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct DynamicRow {
    /// Ring offset of the oldest entry
    pub first_failure_offset: u8,
    /// Ring offset of the newest entry
    pub last_failure_offset: u8,
    /// Reserved
    pub reserved: [u8; 7],
    /// Failure detail ring
    pub failure_details: [u8; DETAILS_LEN],
    /// Row checksum
    pub checksum: u8,
}

const _: () = assert!(core::mem::size_of::<LogHeader>() == 14);
const _: () = assert!(core::mem::size_of::<StaticRow>() == LOG_ROW_SIZE);
const _: () = assert!(core::mem::size_of::<DynamicRow>() == LOG_ROW_SIZE);
