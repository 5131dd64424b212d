//! SPI flash/EEPROM opcodes used by the dock controller
//!
//! Only the JEDEC subset needed to program package storage and SPI-attached
//! hub EEPROMs is defined here.

// ============================================================================
// Write control
// ============================================================================

/// Write Enable - required before any write/erase operation
pub const WREN: u8 = 0x06;
/// Write Disable - clears WEL bit in status register
pub const WRDI: u8 = 0x04;

// ============================================================================
// Status register operations
// ============================================================================

/// Read Status Register 1
pub const RDSR: u8 = 0x05;

// ============================================================================
// Identification
// ============================================================================

/// Read JEDEC ID (manufacturer + device ID)
pub const RDID: u8 = 0x9F;

// ============================================================================
// Read / program
// ============================================================================

/// Read Data with 3-byte address
pub const READ: u8 = 0x03;
/// Page Program with 3-byte address
pub const PP: u8 = 0x02;

// ============================================================================
// Erase commands - 3-byte address
// ============================================================================

/// Sector Erase 4KB
pub const SE_20: u8 = 0x20;
/// Block Erase 32KB
pub const BE_52: u8 = 0x52;
/// Block Erase 64KB
pub const BE_D8: u8 = 0xD8;
/// Chip Erase
pub const CE_C7: u8 = 0xC7;

// ============================================================================
// Status register bit definitions
// ============================================================================

/// Status Register 1: Write In Progress / Busy
pub const SR1_WIP: u8 = 0x01;
/// Status Register 1: Write Enable Latch
pub const SR1_WEL: u8 = 0x02;

/// SPI page program size
pub const PAGE_SIZE: usize = 256;

/// Erase block sizes supported by the package area
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseSize {
    /// 4 KiB sector
    Sector4K,
    /// 32 KiB block
    Block32K,
    /// 64 KiB block
    Block64K,
    /// Whole chip
    Chip,
}

impl EraseSize {
    /// Opcode for this erase size
    pub const fn opcode(self) -> u8 {
        match self {
            Self::Sector4K => SE_20,
            Self::Block32K => BE_52,
            Self::Block64K => BE_D8,
            Self::Chip => CE_C7,
        }
    }

    /// Bytes erased by one command (`u32::MAX` for chip erase)
    pub const fn bytes(self) -> u32 {
        match self {
            Self::Sector4K => 4 * 1024,
            Self::Block32K => 32 * 1024,
            Self::Block64K => 64 * 1024,
            Self::Chip => u32::MAX,
        }
    }
}
