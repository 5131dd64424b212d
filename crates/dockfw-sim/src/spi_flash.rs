//! In-memory SPI NOR flash
//!
//! Emulates the JEDEC command subset the controller uses: identification,
//! status, write enable, 3-byte read, page program and sector/block/chip
//! erase. Programming can only clear bits, as on a real part.

use dockfw_core::error::{Error, Result};
use dockfw_core::programmer::SpiMaster;
use dockfw_core::spi::{opcodes, SpiCommand};

/// Geometry and identity of an emulated flash
#[derive(Debug, Clone)]
pub struct SpiFlashConfig {
    /// JEDEC manufacturer ID
    pub manufacturer_id: u8,
    /// JEDEC device ID
    pub device_id: u16,
    /// Flash size in bytes
    pub size: usize,
    /// Page size for programming
    pub page_size: usize,
}

impl SpiFlashConfig {
    /// 1 MiB part, large enough for a dual-bank hub image and its boot-select sector
    pub fn hub() -> Self {
        Self {
            manufacturer_id: 0xEF, // Winbond
            device_id: 0x4014,     // W25Q80
            size: 1024 * 1024,
            page_size: 256,
        }
    }

    /// 8 MiB part holding the primary and factory package areas
    pub fn package_area() -> Self {
        Self {
            manufacturer_id: 0xEF,
            device_id: 0x4017, // W25Q64
            size: 8 * 1024 * 1024,
            page_size: 256,
        }
    }
}

impl Default for SpiFlashConfig {
    fn default() -> Self {
        Self::hub()
    }
}

/// Emulated SPI NOR flash
#[derive(Debug, Clone)]
pub struct SimSpiFlash {
    config: SpiFlashConfig,
    data: Vec<u8>,
    write_enabled: bool,
    programs: usize,
    erases: usize,
}

impl SimSpiFlash {
    /// Erased flash with the given geometry
    pub fn new(config: SpiFlashConfig) -> Self {
        let data = vec![0xFF; config.size];
        Self {
            config,
            data,
            write_enabled: false,
            programs: 0,
            erases: 0,
        }
    }

    /// Flash pre-filled with `initial_data` from address 0
    pub fn with_data(config: SpiFlashConfig, initial_data: &[u8]) -> Self {
        let mut flash = Self::new(config);
        let len = core::cmp::min(initial_data.len(), flash.data.len());
        flash.data[..len].copy_from_slice(&initial_data[..len]);
        flash
    }

    /// Flash contents
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable flash contents, bypassing program/erase rules
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Geometry
    pub fn config(&self) -> &SpiFlashConfig {
        &self.config
    }

    /// Page programs executed
    pub fn program_count(&self) -> usize {
        self.programs
    }

    /// Erase commands executed
    pub fn erase_count(&self) -> usize {
        self.erases
    }

    fn range(&self, addr: u32, len: usize) -> Result<core::ops::Range<usize>> {
        let start = addr as usize;
        match start.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(start..end),
            _ => Err(Error::AddressOutOfBounds),
        }
    }

    fn handle_read(&mut self, cmd: &mut SpiCommand<'_>) -> Result<()> {
        let range = self.range(cmd.address.unwrap_or(0), cmd.read_buf.len())?;
        cmd.read_buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn handle_page_program(&mut self, cmd: &SpiCommand<'_>) -> Result<()> {
        if !self.write_enabled {
            return Err(Error::FlashWriteError);
        }
        let addr = cmd.address.unwrap_or(0) as usize;
        let page = self.config.page_size;
        // A program wraps within its page.
        let page_base = addr & !(page - 1);
        if cmd.write_data.len() > page {
            return Err(Error::BufferTooSmall);
        }
        self.range(page_base as u32, page)?;

        for (i, &byte) in cmd.write_data.iter().enumerate() {
            let at = page_base + (addr - page_base + i) % page;
            self.data[at] &= byte;
        }

        self.programs += 1;
        self.write_enabled = false;
        Ok(())
    }

    fn handle_erase(&mut self, cmd: &SpiCommand<'_>, erase_size: usize) -> Result<()> {
        if !self.write_enabled {
            return Err(Error::FlashWriteError);
        }
        let aligned = cmd.address.unwrap_or(0) as usize & !(erase_size - 1);
        let range = self.range(aligned as u32, erase_size)?;
        self.data[range].fill(0xFF);

        self.erases += 1;
        self.write_enabled = false;
        Ok(())
    }

    fn handle_chip_erase(&mut self) -> Result<()> {
        if !self.write_enabled {
            return Err(Error::FlashWriteError);
        }
        self.data.fill(0xFF);
        self.erases += 1;
        self.write_enabled = false;
        Ok(())
    }
}

impl SpiMaster for SimSpiFlash {
    fn max_read_len(&self) -> usize {
        4096
    }

    fn max_write_len(&self) -> usize {
        self.config.page_size
    }

    fn execute(&mut self, cmd: &mut SpiCommand<'_>) -> Result<()> {
        let (header, len) = cmd.header();
        log::trace!(
            "sim flash: {:02X?}, {} out, {} in",
            &header[..len],
            cmd.write_data.len(),
            cmd.read_buf.len()
        );
        match cmd.opcode {
            opcodes::RDID => {
                if cmd.read_buf.len() >= 3 {
                    cmd.read_buf[0] = self.config.manufacturer_id;
                    cmd.read_buf[1] = (self.config.device_id >> 8) as u8;
                    cmd.read_buf[2] = self.config.device_id as u8;
                }
                Ok(())
            }

            // Operations complete instantly, WIP never reads set
            opcodes::RDSR => {
                if let Some(b) = cmd.read_buf.first_mut() {
                    *b = if self.write_enabled {
                        opcodes::SR1_WEL
                    } else {
                        0
                    };
                }
                Ok(())
            }

            opcodes::WREN => {
                self.write_enabled = true;
                Ok(())
            }
            opcodes::WRDI => {
                self.write_enabled = false;
                Ok(())
            }

            opcodes::READ => self.handle_read(cmd),
            opcodes::PP => self.handle_page_program(cmd),

            opcodes::SE_20 => self.handle_erase(cmd, 4 * 1024),
            opcodes::BE_52 => self.handle_erase(cmd, 32 * 1024),
            opcodes::BE_D8 => self.handle_erase(cmd, 64 * 1024),
            opcodes::CE_C7 => self.handle_chip_erase(),

            other => {
                log::debug!("sim flash: unsupported opcode 0x{:02X}", other);
                Err(Error::SpiTransferFailed)
            }
        }
    }

    fn delay_us(&mut self, _us: u32) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockfw_core::protocol::spi25;
    use dockfw_core::spi::EraseSize;

    #[test]
    fn test_read_jedec_id() {
        let mut flash = SimSpiFlash::new(SpiFlashConfig::hub());
        assert_eq!(spi25::read_jedec_id(&mut flash).unwrap(), (0xEF, 0x4014));
    }

    #[test]
    fn test_program_requires_write_enable() {
        let mut flash = SimSpiFlash::new(SpiFlashConfig::hub());
        let mut cmd = SpiCommand::program(opcodes::PP, 0x1000, &[0x12]);
        assert_eq!(flash.execute(&mut cmd), Err(Error::FlashWriteError));
        assert_eq!(flash.data()[0x1000], 0xFF);
    }

    #[test]
    fn test_write_and_read_across_pages() {
        let mut flash = SimSpiFlash::new(SpiFlashConfig::hub());
        let data: Vec<u8> = (0..600u32).map(|i| i as u8).collect();
        spi25::write(&mut flash, 0x10F0, &data).unwrap();

        let mut buf = vec![0u8; data.len()];
        spi25::read(&mut flash, 0x10F0, &mut buf).unwrap();
        assert_eq!(buf, data);
        // 16 bytes to the page end, then 256, 256, 72
        assert_eq!(flash.program_count(), 4);
    }

    #[test]
    fn test_program_only_clears_bits() {
        let mut flash = SimSpiFlash::new(SpiFlashConfig::hub());
        spi25::write(&mut flash, 0, &[0xF0]).unwrap();
        spi25::write(&mut flash, 0, &[0x0F]).unwrap();
        assert_eq!(flash.data()[0], 0x00);
    }

    #[test]
    fn test_erase_sector() {
        let mut flash = SimSpiFlash::with_data(SpiFlashConfig::hub(), &[0u8; 8192]);
        spi25::erase_block(&mut flash, EraseSize::Sector4K, 0x1234).unwrap();
        assert!(flash.data()[0x1000..0x2000].iter().all(|&b| b == 0xFF));
        assert!(flash.data()[..0x1000].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_out_of_bounds() {
        let mut flash = SimSpiFlash::new(SpiFlashConfig::hub());
        let mut buf = [0u8; 4];
        assert_eq!(
            spi25::read(&mut flash, 0x0F_FFFE, &mut buf),
            Err(Error::AddressOutOfBounds)
        );
    }
}
