//! Emulated hub configuration EEPROM
//!
//! A 64 KiB part with two address bytes (big-endian) and 64-byte pages.
//! Writes wrap inside their page and are dropped while write-protect is
//! high. Pulsing the hub reset line makes the hub reload its image.

use dockfw_core::device::hub_eeprom::{EEPROM_PAGE_SIZE, VERSION_OFFSET};
use dockfw_core::device::{FirmwareVersion, FW_VERSION_SIZE};
use dockfw_core::error::{Error, Result};

/// EEPROM capacity
pub const EEPROM_SIZE: usize = 64 * 1024;

/// EEPROM behind a hub
#[derive(Debug, Clone)]
pub struct EepromTarget {
    mem: Vec<u8>,
    pointer: usize,
    reset_pin: u8,
    wp_pin: u8,
    absent: bool,
    reloads: u32,
    blocked_writes: u32,
    loaded: FirmwareVersion,
}

impl EepromTarget {
    /// Erased EEPROM holding an image stamped with `version`
    pub fn new(version: FirmwareVersion, reset_pin: u8, wp_pin: u8) -> Self {
        let mut mem = vec![0xFF; EEPROM_SIZE];
        let at = VERSION_OFFSET as usize;
        mem[at..at + FW_VERSION_SIZE].copy_from_slice(version.as_bytes());
        Self {
            mem,
            pointer: 0,
            reset_pin,
            wp_pin,
            absent: false,
            reloads: 0,
            blocked_writes: 0,
            loaded: version,
        }
    }

    /// Make the EEPROM ignore its address
    pub fn set_absent(&mut self, absent: bool) {
        self.absent = absent;
    }

    /// Hub reset line
    pub fn reset_pin(&self) -> u8 {
        self.reset_pin
    }

    /// Write-protect line
    pub fn wp_pin(&self) -> u8 {
        self.wp_pin
    }

    /// Version stamped in the stored image
    pub fn stored_version(&self) -> FirmwareVersion {
        let at = VERSION_OFFSET as usize;
        FirmwareVersion::from_slice(&self.mem[at..]).unwrap_or_default()
    }

    /// Version the hub loaded at its last reset
    pub fn loaded_version(&self) -> FirmwareVersion {
        self.loaded
    }

    /// Times the hub reloaded its image
    pub fn reloads(&self) -> u32 {
        self.reloads
    }

    /// Writes dropped because write-protect was high
    pub fn blocked_writes(&self) -> u32 {
        self.blocked_writes
    }

    /// Raw contents
    pub fn memory(&self) -> &[u8] {
        &self.mem
    }

    /// Replace the stored image version and boot it
    pub fn power_on(&mut self, version: FirmwareVersion) {
        let at = VERSION_OFFSET as usize;
        self.mem[at..at + FW_VERSION_SIZE].copy_from_slice(version.as_bytes());
        self.loaded = version;
    }

    /// Hub came out of reset
    pub fn reload(&mut self) {
        self.reloads += 1;
        self.loaded = self.stored_version();
        log::debug!("hub eeprom: reloaded {}", self.loaded);
    }

    fn set_pointer(&mut self, frame: &[u8]) -> Result<()> {
        match frame {
            [hi, lo, ..] => {
                self.pointer = u16::from_be_bytes([*hi, *lo]) as usize;
                Ok(())
            }
            _ => Err(Error::I2cTransferFailed),
        }
    }

    /// Address phase plus optional data bytes
    pub fn write(&mut self, frame: &[u8], write_protected: bool) -> Result<()> {
        if self.absent {
            return Err(Error::I2cNack);
        }
        self.set_pointer(frame)?;
        let data = &frame[2..];
        if data.is_empty() {
            return Ok(());
        }
        if write_protected {
            self.blocked_writes += 1;
            return Ok(());
        }
        let page_base = self.pointer & !(EEPROM_PAGE_SIZE - 1);
        for (i, &b) in data.iter().enumerate() {
            let at = page_base + (self.pointer - page_base + i) % EEPROM_PAGE_SIZE;
            self.mem[at] = b;
        }
        Ok(())
    }

    /// Address phase followed by a sequential read
    pub fn write_read(&mut self, frame: &[u8], buf: &mut [u8]) -> Result<()> {
        if self.absent {
            return Err(Error::I2cNack);
        }
        self.set_pointer(frame)?;
        for b in buf.iter_mut() {
            *b = self.mem[self.pointer];
            self.pointer = (self.pointer + 1) % EEPROM_SIZE;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(build: u16) -> FirmwareVersion {
        FirmwareVersion::new(2, 1, 0, build, [0; 4])
    }

    #[test]
    fn test_version_readable_at_offset() {
        let mut e = EepromTarget::new(v(7), 4, 5);
        let mut buf = [0u8; 8];
        e.write_read(&VERSION_OFFSET.to_be_bytes(), &mut buf).unwrap();
        assert_eq!(FirmwareVersion::from_bytes(buf), v(7));
    }

    #[test]
    fn test_write_protect_drops_data() {
        let mut e = EepromTarget::new(v(7), 4, 5);
        e.write(&[0x00, 0x00, 0x12, 0x34], true).unwrap();
        assert_eq!(e.memory()[..2], [0xFF, 0xFF]);
        assert_eq!(e.blocked_writes(), 1);

        e.write(&[0x00, 0x00, 0x12, 0x34], false).unwrap();
        assert_eq!(e.memory()[..2], [0x12, 0x34]);
    }

    #[test]
    fn test_page_wrap() {
        let mut e = EepromTarget::new(v(7), 4, 5);
        e.write(&[0x00, 0x3F, 0xAA, 0xBB], false).unwrap();
        assert_eq!(e.memory()[0x3F], 0xAA);
        assert_eq!(e.memory()[0x00], 0xBB);
        assert_eq!(e.memory()[0x40], 0xFF);
    }

    #[test]
    fn test_reload_picks_up_new_image() {
        let mut e = EepromTarget::new(v(7), 4, 5);
        let mut frame = VERSION_OFFSET.to_be_bytes().to_vec();
        frame.extend_from_slice(v(8).as_bytes());
        e.write(&frame, false).unwrap();
        assert_eq!(e.loaded_version(), v(7));
        e.reload();
        assert_eq!(e.loaded_version(), v(8));
        assert_eq!(e.reloads(), 1);
    }
}
