//! Emulated PD controller answering the HPI register protocol
//!
//! The model keeps two application banks. Entering flashing mode erases the
//! bank opposite the running one (image 1 when running the bootloader), which
//! has no version until it is validated again. Row writes land in that bank,
//! and validating it adopts the version stamped at [`IMAGE_VERSION_OFFSET`]
//! of its lowest row. Every command posts its response code, which stays
//! readable until the interrupt is cleared.

use std::collections::BTreeMap;

use dockfw_core::device::{FirmwareVersion, FirmwareVersions, ImageMode, ImageType};
use dockfw_core::error::{Error, Result};
use dockfw_core::protocol::hpi::{self, response};

use crate::faults::FaultPlan;
use crate::IMAGE_VERSION_OFFSET;

#[derive(Debug, Clone, Default)]
struct Bank {
    version: FirmwareVersion,
    rows: BTreeMap<u16, Vec<u8>>,
}

/// HPI target state
#[derive(Debug, Clone)]
pub struct HpiTarget {
    image_mode: ImageMode,
    bootloader: FirmwareVersion,
    banks: [Bank; 2],
    current: ImageType,
    flash_mode: bool,
    write_bank: ImageType,
    buffer: Vec<u8>,
    response: u8,
    faults: FaultPlan,
    rows_written: usize,
}

fn bank_index(image: ImageType) -> Option<usize> {
    image.app_index()
}

impl HpiTarget {
    /// Controller running `current` with the given bank versions
    pub fn new(image_mode: ImageMode, versions: FirmwareVersions, current: ImageType) -> Self {
        let bank = |version| Bank {
            version,
            rows: BTreeMap::new(),
        };
        Self {
            image_mode,
            bootloader: versions.bootloader,
            banks: [bank(versions.image1), bank(versions.image2)],
            current,
            flash_mode: false,
            write_bank: current.alternate(),
            buffer: Vec::new(),
            response: response::NONE,
            faults: FaultPlan::default(),
            rows_written: 0,
        }
    }

    /// Attach a fault plan
    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }

    /// Power the controller up with the given bank contents
    ///
    /// A controller left in its bootloader boots image 1 if that bank holds
    /// an image.
    pub fn power_on(&mut self, versions: FirmwareVersions, current: ImageType) {
        self.bootloader = versions.bootloader;
        for (bank, version) in self.banks.iter_mut().zip([versions.image1, versions.image2]) {
            bank.version = version;
            bank.rows.clear();
        }
        self.current = match current {
            ImageType::Bootloader if !versions.image1.is_blank() => ImageType::Image1,
            other => other,
        };
        self.flash_mode = false;
        self.response = response::NONE;
    }

    /// Versions of all banks
    pub fn versions(&self) -> FirmwareVersions {
        FirmwareVersions {
            bootloader: self.bootloader,
            image1: self.banks[0].version,
            image2: self.banks[1].version,
        }
    }

    /// Running bank
    pub fn current_image(&self) -> ImageType {
        self.current
    }

    /// Rows accepted since creation
    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Row contents of an application bank
    pub fn row(&self, image: ImageType, row: u16) -> Option<&[u8]> {
        let bank = &self.banks[bank_index(image)?];
        bank.rows.get(&row).map(Vec::as_slice)
    }

    fn device_mode(&mut self) -> u8 {
        let mut mode = (self.current as u8) | ((self.image_mode as u8) << 4);
        if self.faults.busy_reads > 0 {
            self.faults.busy_reads -= 1;
            mode |= 0x80;
        }
        mode
    }

    fn check_present(&self) -> Result<()> {
        if self.faults.absent {
            Err(Error::I2cNack)
        } else {
            Ok(())
        }
    }

    /// Handle a register write: `[reg_lo, reg_hi, data...]`
    pub fn write(&mut self, frame: &[u8]) -> Result<()> {
        self.check_present()?;
        if frame.len() < 2 {
            return Err(Error::I2cTransferFailed);
        }
        let reg = u16::from_le_bytes([frame[0], frame[1]]);
        let data = &frame[2..];

        match reg {
            hpi::REG_INTR => {
                if data.first().is_some_and(|b| b & 1 != 0) {
                    self.response = response::NONE;
                }
            }
            hpi::REG_FLASH_MEM => {
                self.buffer = data.to_vec();
            }
            _ => {
                let code = self.command(reg, data);
                log::trace!("hpi: reg 0x{:04X} {:02X?} -> 0x{:02X}", reg, data, code);
                self.response = code;
            }
        }
        Ok(())
    }

    /// Handle a register read
    pub fn write_read(&mut self, addr: &[u8], buf: &mut [u8]) -> Result<()> {
        self.check_present()?;
        if addr.len() != 2 {
            return Err(Error::I2cTransferFailed);
        }
        let reg = u16::from_le_bytes([addr[0], addr[1]]);
        buf.fill(0);
        let src: Vec<u8> = match reg {
            hpi::REG_DEVICE_MODE => vec![self.device_mode()],
            hpi::REG_READ_ALL_VERSION => self.versions().to_block().to_vec(),
            hpi::REG_RESPONSE => vec![self.response, 0],
            hpi::REG_FLASH_MEM => self.buffer.clone(),
            _ => Vec::new(),
        };
        let n = src.len().min(buf.len());
        buf[..n].copy_from_slice(&src[..n]);
        Ok(())
    }

    fn command(&mut self, reg: u16, data: &[u8]) -> u8 {
        match (reg, data) {
            (hpi::REG_JUMP, [hpi::JUMP_TO_BOOT_SIG, ..]) => {
                self.current = ImageType::Bootloader;
                self.flash_mode = false;
                response::SUCCESS
            }
            (hpi::REG_JUMP, [hpi::JUMP_TO_ALT_SIG, ..]) => self.jump_to_alternate(),
            (hpi::REG_RESET, [hpi::RESET_SIG, ..]) => {
                self.flash_mode = false;
                response::SUCCESS
            }
            (hpi::REG_ENTER_FLASH_MODE, [hpi::FLASH_MODE_SIG, ..]) => self.enter_flash_mode(),
            (hpi::REG_VALIDATE_FW, [image, ..]) => self.validate(*image),
            (hpi::REG_FLASH_READ_WRITE, [hpi::FLASH_RW_SIG, dir, lo, hi]) => {
                let row = u16::from_le_bytes([*lo, *hi]);
                match *dir {
                    hpi::FLASH_ROW_WRITE => self.write_row(row),
                    hpi::FLASH_ROW_READ => self.read_row(row),
                    _ => response::INVALID_ARGUMENT,
                }
            }
            _ => response::INVALID_COMMAND,
        }
    }

    fn enter_flash_mode(&mut self) -> u8 {
        if self.faults.reject_prepare > 0 {
            self.faults.reject_prepare -= 1;
            return response::NOT_SUPPORTED;
        }
        self.write_bank = self.current.alternate();
        if let Some(i) = bank_index(self.write_bank) {
            self.banks[i] = Bank::default();
        }
        self.flash_mode = true;
        response::SUCCESS
    }

    fn write_row(&mut self, row: u16) -> u8 {
        if !self.flash_mode {
            return response::NOT_SUPPORTED;
        }
        if let Some(pos) = self.faults.fail_rows.iter().position(|&r| r == row) {
            self.faults.fail_rows.remove(pos);
            return response::FLASH_UPDATE_FAILED;
        }
        let Some(i) = bank_index(self.write_bank) else {
            return response::INVALID_ARGUMENT;
        };
        self.banks[i].rows.insert(row, self.buffer.clone());
        self.rows_written += 1;
        response::SUCCESS
    }

    fn read_row(&mut self, row: u16) -> u8 {
        let found = bank_index(self.write_bank).and_then(|i| self.banks[i].rows.get(&row));
        match found {
            Some(data) => {
                self.buffer = data.clone();
                response::FLASH_DATA_AVAILABLE
            }
            None => response::INVALID_ARGUMENT,
        }
    }

    fn validate(&mut self, image: u8) -> u8 {
        if !self.flash_mode || image != self.write_bank as u8 {
            return response::INVALID_ARGUMENT;
        }
        if self.faults.reject_commit {
            return response::INVALID_FW;
        }
        let Some(i) = bank_index(self.write_bank) else {
            return response::INVALID_ARGUMENT;
        };
        let bank = &mut self.banks[i];
        let stamped = bank.rows.values().next().and_then(|first| {
            first
                .get(IMAGE_VERSION_OFFSET..)
                .and_then(FirmwareVersion::from_slice)
        });
        match stamped {
            Some(version) => {
                bank.version = version;
                response::SUCCESS
            }
            None => response::INVALID_FW,
        }
    }

    fn jump_to_alternate(&mut self) -> u8 {
        if self.faults.reject_jump {
            return response::NOT_SUPPORTED;
        }
        let target = self.current.alternate();
        let valid = bank_index(target).is_some_and(|i| !self.banks[i].version.is_blank());
        if !valid {
            return response::INVALID_FW;
        }
        self.current = target;
        self.flash_mode = false;
        response::SUCCESS
    }
}
