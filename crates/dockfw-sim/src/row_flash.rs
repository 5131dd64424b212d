//! Controller internal flash

use std::collections::BTreeMap;

use dockfw_core::error::{Error, Result};
use dockfw_core::platform::RowFlash;

/// Row size of the emulated internal flash
pub const ROW_SIZE: usize = 256;

/// Internal flash kept in memory
///
/// Rows that were never written read as erased. Writes are refused unless
/// flashing mode was entered first.
#[derive(Debug, Clone, Default)]
pub struct MemRowFlash {
    rows: BTreeMap<u16, Vec<u8>>,
    flash_mode: bool,
    writes: usize,
}

impl MemRowFlash {
    /// Erased flash
    pub fn new() -> Self {
        Self::default()
    }

    /// Flash holding the given rows
    pub fn with_rows(rows: BTreeMap<u16, Vec<u8>>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    /// Programmed rows
    pub fn rows(&self) -> &BTreeMap<u16, Vec<u8>> {
        &self.rows
    }

    /// Contents of one row, if programmed
    pub fn row(&self, row: u16) -> Option<&[u8]> {
        self.rows.get(&row).map(Vec::as_slice)
    }

    /// Mutable row contents, for corrupting records in tests
    pub fn row_mut(&mut self, row: u16) -> Option<&mut Vec<u8>> {
        self.rows.get_mut(&row)
    }

    /// Row writes performed
    pub fn write_count(&self) -> usize {
        self.writes
    }
}

impl RowFlash for MemRowFlash {
    fn row_size(&self) -> usize {
        ROW_SIZE
    }

    fn enter_flash_mode(&mut self, enable: bool) -> Result<()> {
        self.flash_mode = enable;
        Ok(())
    }

    fn read_row(&mut self, row: u16, buf: &mut [u8]) -> Result<()> {
        if buf.len() != ROW_SIZE {
            return Err(Error::BufferTooSmall);
        }
        match self.rows.get(&row) {
            Some(data) => buf.copy_from_slice(data),
            None => buf.fill(0xFF),
        }
        Ok(())
    }

    fn write_row(&mut self, row: u16, data: &[u8]) -> Result<()> {
        if !self.flash_mode {
            return Err(Error::FlashWriteError);
        }
        if data.len() != ROW_SIZE {
            return Err(Error::BufferTooSmall);
        }
        self.rows.insert(row, data.to_vec());
        self.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwritten_row_reads_erased() {
        let mut flash = MemRowFlash::new();
        let mut buf = [0u8; ROW_SIZE];
        flash.read_row(3, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_write_needs_flash_mode() {
        let mut flash = MemRowFlash::new();
        let row = [0x5Au8; ROW_SIZE];
        assert_eq!(flash.write_row(1, &row), Err(Error::FlashWriteError));
        flash.enter_flash_mode(true).unwrap();
        flash.write_row(1, &row).unwrap();
        assert_eq!(flash.row(1), Some(&row[..]));
        assert_eq!(flash.write_count(), 1);
    }
}
