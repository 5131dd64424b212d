//! Persisted dock metadata
//!
//! One internal flash row holds the session counters and application status
//! flags. The record is self-checking: it is only accepted when the
//! signature, length and checksum agree and the counters are consistent.
//!
//! | offset | size | field                         |
//! |--------|------|-------------------------------|
//! | 0      | 2    | signature `0x4D44`            |
//! | 2      | 2    | record length                 |
//! | 4      | 4    | checksum                      |
//! | 8      | 1    | secured only                  |
//! | 9      | 1    | app status flags              |
//! | 10     | 2    | update counter                |
//! | 12     | 2    | phase 2 update counter        |
//! | 14     | 4    | config table checksum         |
//! | 18     | 1    | dock status                   |

use alloc::vec;

use bitflags::bitflags;

use crate::checksum::sum32;
use crate::error::{Error, Result};
use crate::platform::RowFlash;
use crate::registry::DockStatus;

/// Metadata signature
pub const METADATA_SIGNATURE: u16 = 0x4D44;
/// Encoded record length
pub const METADATA_LEN: usize = 32;

bitflags! {
    /// Application status flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AppStatus: u8 {
        /// Next pass updates critical devices
        const TRIGGER_PHASE2 = 1 << 0;
        /// A phase 1 pass skipped critical devices
        const CONSIDER_CRITICAL_UPDATE = 1 << 1;
        /// Prefer the factory package
        const FACTORY_CANDIDATE = 1 << 2;
        /// Flash even when devices report current versions
        const FORCE_UPDATE = 1 << 3;
        /// Host asked for the dock identity
        const READ_DOCK_ID = 1 << 4;
    }
}

/// Dock metadata record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DockMetadata {
    /// Only packages from a verified-secure source are acceptable
    pub secured_only: bool,
    /// Application status flags
    pub app_status: AppStatus,
    /// Update passes run
    pub update_counter: u16,
    /// Phase 2 passes run
    pub phase2_update_counter: u16,
    /// Checksum of the dock configuration table
    pub config_table_checksum: u32,
    /// Last dock status
    pub status: DockStatus,
}

impl DockMetadata {
    /// Encode the record
    pub fn encode(&self) -> [u8; METADATA_LEN] {
        let mut out = [0u8; METADATA_LEN];
        out[0..2].copy_from_slice(&METADATA_SIGNATURE.to_le_bytes());
        out[2..4].copy_from_slice(&(METADATA_LEN as u16).to_le_bytes());
        out[8] = self.secured_only as u8;
        out[9] = self.app_status.bits();
        out[10..12].copy_from_slice(&self.update_counter.to_le_bytes());
        out[12..14].copy_from_slice(&self.phase2_update_counter.to_le_bytes());
        out[14..18].copy_from_slice(&self.config_table_checksum.to_le_bytes());
        out[18] = self.status as u8;
        let checksum = sum32([&out[..4], &out[8..]]);
        out[4..8].copy_from_slice(&checksum.to_le_bytes());
        out
    }

    /// Decode a record, rejecting anything inconsistent with `Error::Corrupt`
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < METADATA_LEN {
            return Err(Error::BufferTooSmall);
        }
        let b = &bytes[..METADATA_LEN];
        let word = |at: usize| u16::from_le_bytes([b[at], b[at + 1]]);
        let dword = |at: usize| u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]]);

        if word(0) != METADATA_SIGNATURE || word(2) as usize != METADATA_LEN {
            return Err(Error::Corrupt);
        }
        if sum32([&b[..4], &b[8..]]) != dword(4) {
            return Err(Error::Corrupt);
        }

        let meta = Self {
            secured_only: b[8] != 0,
            app_status: AppStatus::from_bits_truncate(b[9]),
            update_counter: word(10),
            phase2_update_counter: word(12),
            config_table_checksum: dword(14),
            status: DockStatus::from_u8(b[18]).ok_or(Error::Corrupt)?,
        };
        if meta.phase2_update_counter > meta.update_counter {
            return Err(Error::Corrupt);
        }
        Ok(meta)
    }

    /// Load from `row`, falling back to a fresh record if the stored one is
    /// corrupt or erased
    pub fn load(flash: &mut dyn RowFlash, row: u16) -> Result<Self> {
        let mut buf = vec![0u8; flash.row_size()];
        flash.read_row(row, &mut buf)?;
        match Self::decode(&buf) {
            Ok(meta) => Ok(meta),
            Err(e) => {
                log::warn!("dock metadata rejected ({}), reinitialising", e);
                Ok(Self::default())
            }
        }
    }

    /// Persist to `row`
    pub fn store(&self, flash: &mut dyn RowFlash, row: u16) -> Result<()> {
        let mut buf = vec![0xFFu8; flash.row_size()];
        if buf.len() < METADATA_LEN {
            return Err(Error::BufferTooSmall);
        }
        buf[..METADATA_LEN].copy_from_slice(&self.encode());
        flash.enter_flash_mode(true)?;
        let result = flash.write_row(row, &buf);
        flash.enter_flash_mode(false)?;
        result
    }

    /// Count one update pass
    pub fn bump_update_counter(&mut self) {
        self.update_counter = self.update_counter.saturating_add(1);
    }

    /// Count one phase 2 pass
    ///
    /// Never lets the phase 2 counter overtake the update counter.
    pub fn bump_phase2_counter(&mut self) {
        if self.phase2_update_counter < self.update_counter {
            self.phase2_update_counter += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_decode() {
        let meta = DockMetadata {
            secured_only: true,
            app_status: AppStatus::TRIGGER_PHASE2 | AppStatus::FORCE_UPDATE,
            update_counter: 12,
            phase2_update_counter: 3,
            config_table_checksum: 0xDEAD_BEEF,
            status: DockStatus::Phase1CompleteFullPhase2NotDone,
        };
        let bytes = meta.encode();
        assert_eq!(bytes[..2], [0x44, 0x4D]);
        assert_eq!(DockMetadata::decode(&bytes), Ok(meta));
    }

    #[test]
    fn test_counter_invariant_enforced_on_load() {
        let meta = DockMetadata {
            update_counter: 1,
            phase2_update_counter: 2,
            ..DockMetadata::default()
        };
        assert_eq!(DockMetadata::decode(&meta.encode()), Err(Error::Corrupt));
    }

    #[test]
    fn test_erased_row_rejected() {
        assert_eq!(DockMetadata::decode(&[0xFF; 64]), Err(Error::Corrupt));
    }

    #[test]
    fn test_phase2_counter_bounded() {
        let mut meta = DockMetadata::default();
        meta.bump_phase2_counter();
        assert_eq!(meta.phase2_update_counter, 0);
        meta.bump_update_counter();
        meta.bump_phase2_counter();
        meta.bump_phase2_counter();
        assert_eq!((meta.update_counter, meta.phase2_update_counter), (1, 1));
    }

    proptest! {
        #[test]
        fn any_bit_flip_is_detected(byte in 0usize..METADATA_LEN, bit in 0u8..8) {
            let meta = DockMetadata {
                update_counter: 40,
                phase2_update_counter: 20,
                ..DockMetadata::default()
            };
            let mut bytes = meta.encode();
            bytes[byte] ^= 1 << bit;
            prop_assert!(DockMetadata::decode(&bytes).is_err());
        }
    }
}
