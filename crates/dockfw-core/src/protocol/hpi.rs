//! Host Processor Interface (HPI) over I2C
//!
//! PD controllers expose a little-endian 16-bit register space over I2C.
//! A register write is `[reg_lo, reg_hi, data...]`; a read writes the two
//! address bytes and reads back with a repeated start. Commands complete
//! asynchronously: the host polls the response register until a non-zero
//! code appears and then clears the interrupt.

use crate::error::{Error, Result};
use crate::programmer::{DockBus, I2cMaster};

/// Current operating mode (bits 0-1 running image, bits 4-5 image mode)
pub const REG_DEVICE_MODE: u16 = 0x0000;
/// Interrupt status; write 1 to clear
pub const REG_INTR: u16 = 0x0006;
/// Jump request: `J` to bootloader, `A` to the alternate image
pub const REG_JUMP: u16 = 0x0007;
/// Device reset: `R`, 1
pub const REG_RESET: u16 = 0x0008;
/// Enter flashing mode: `P`
pub const REG_ENTER_FLASH_MODE: u16 = 0x000A;
/// Validate an image bank: image number (1 or 2)
pub const REG_VALIDATE_FW: u16 = 0x000B;
/// Row read/write: `F`, direction, row low, row high
pub const REG_FLASH_READ_WRITE: u16 = 0x000C;
/// Bootloader, image 1 and image 2 versions, 8 bytes each
pub const REG_READ_ALL_VERSION: u16 = 0x0010;
/// Response code and length
pub const REG_RESPONSE: u16 = 0x007E;
/// Row data buffer
pub const REG_FLASH_MEM: u16 = 0x0200;

/// Signature byte for [`REG_JUMP`] to the bootloader
pub const JUMP_TO_BOOT_SIG: u8 = b'J';
/// Signature byte for [`REG_JUMP`] to the alternate image
pub const JUMP_TO_ALT_SIG: u8 = b'A';
/// Signature byte for [`REG_RESET`]
pub const RESET_SIG: u8 = b'R';
/// Signature byte for [`REG_ENTER_FLASH_MODE`]
pub const FLASH_MODE_SIG: u8 = b'P';
/// Signature byte for [`REG_FLASH_READ_WRITE`]
pub const FLASH_RW_SIG: u8 = b'F';
/// Direction value for a row write
pub const FLASH_ROW_WRITE: u8 = 1;
/// Direction value for a row read
pub const FLASH_ROW_READ: u8 = 0;

/// Response codes reported in [`REG_RESPONSE`]
pub mod response {
    /// No response pending
    pub const NONE: u8 = 0x00;
    /// Command completed
    pub const SUCCESS: u8 = 0x02;
    /// Row data is available in the flash buffer
    pub const FLASH_DATA_AVAILABLE: u8 = 0x03;
    /// Command not recognised
    pub const INVALID_COMMAND: u8 = 0x05;
    /// Row write or erase failed
    pub const FLASH_UPDATE_FAILED: u8 = 0x07;
    /// Image failed validation
    pub const INVALID_FW: u8 = 0x08;
    /// Bad argument (row out of range, wrong bank)
    pub const INVALID_ARGUMENT: u8 = 0x09;
    /// Command not supported in the current mode
    pub const NOT_SUPPORTED: u8 = 0x0A;
    /// Device reset complete
    pub const RESET_COMPLETE: u8 = 0x80;
}

/// Number of response polls before giving up
pub const RESPONSE_POLLS: u32 = 100;
/// Delay between response polls
pub const RESPONSE_POLL_DELAY_US: u32 = 1_000;

/// Size of the version block read from [`REG_READ_ALL_VERSION`]
pub const ALL_VERSION_LEN: usize = 24;

/// Write `data` to register `reg`
pub fn write_reg(i2c: &mut dyn I2cMaster, addr: u8, reg: u16, data: &[u8]) -> Result<()> {
    let len = 2 + data.len();
    if len > i2c.max_transfer_len() {
        return Err(Error::BufferTooSmall);
    }
    let mut buf = alloc::vec::Vec::with_capacity(len);
    buf.extend_from_slice(&reg.to_le_bytes());
    buf.extend_from_slice(data);
    i2c.write(addr, &buf)
}

/// Read `buf.len()` bytes starting at register `reg`
pub fn read_reg(i2c: &mut dyn I2cMaster, addr: u8, reg: u16, buf: &mut [u8]) -> Result<()> {
    i2c.write_read(addr, &reg.to_le_bytes(), buf)
}

/// Poll the response register until the device posts a code
///
/// The interrupt is cleared once a response has been read.
pub fn wait_response(bus: &mut dyn DockBus, addr: u8) -> Result<u8> {
    for _ in 0..RESPONSE_POLLS {
        let mut resp = [0u8; 2];
        read_reg(bus.i2c(), addr, REG_RESPONSE, &mut resp)?;
        if resp[0] != response::NONE {
            write_reg(bus.i2c(), addr, REG_INTR, &[0x01])?;
            return Ok(resp[0]);
        }
        bus.delay_us(RESPONSE_POLL_DELAY_US);
    }
    Err(Error::Timeout)
}

/// Write a command register and wait for the device to answer
///
/// Returns `Error::UnexpectedResponse` unless the device reports success.
pub fn command(bus: &mut dyn DockBus, addr: u8, reg: u16, data: &[u8]) -> Result<()> {
    write_reg(bus.i2c(), addr, reg, data)?;
    match wait_response(bus, addr)? {
        response::SUCCESS => Ok(()),
        code => Err(Error::UnexpectedResponse(code)),
    }
}

/// Read the bootloader, image 1 and image 2 version block
pub fn read_all_versions(i2c: &mut dyn I2cMaster, addr: u8) -> Result<[u8; ALL_VERSION_LEN]> {
    let mut buf = [0u8; ALL_VERSION_LEN];
    read_reg(i2c, addr, REG_READ_ALL_VERSION, &mut buf)?;
    Ok(buf)
}

/// Read the device mode register
pub fn read_device_mode(i2c: &mut dyn I2cMaster, addr: u8) -> Result<u8> {
    let mut buf = [0u8; 1];
    read_reg(i2c, addr, REG_DEVICE_MODE, &mut buf)?;
    Ok(buf[0])
}

/// Load one row into the flash buffer and commit it
pub fn write_row(bus: &mut dyn DockBus, addr: u8, row: u16, data: &[u8]) -> Result<()> {
    write_reg(bus.i2c(), addr, REG_FLASH_MEM, data)?;
    let [lo, hi] = row.to_le_bytes();
    command(
        bus,
        addr,
        REG_FLASH_READ_WRITE,
        &[FLASH_RW_SIG, FLASH_ROW_WRITE, lo, hi],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::programmer::{GpioControl, SpiMaster};
    use crate::spi::SpiCommand;
    use alloc::vec::Vec;

    #[derive(Default)]
    struct ScriptedI2c {
        writes: Vec<Vec<u8>>,
        responses: Vec<u8>,
    }

    impl I2cMaster for ScriptedI2c {
        fn max_transfer_len(&self) -> usize {
            300
        }

        fn write(&mut self, _addr: u8, data: &[u8]) -> Result<()> {
            self.writes.push(data.to_vec());
            Ok(())
        }

        fn write_read(&mut self, _addr: u8, data: &[u8], buf: &mut [u8]) -> Result<()> {
            if data == REG_RESPONSE.to_le_bytes() {
                buf[0] = if self.responses.is_empty() {
                    response::NONE
                } else {
                    self.responses.remove(0)
                };
            }
            Ok(())
        }
    }

    struct NoSpi;

    impl SpiMaster for NoSpi {
        fn max_read_len(&self) -> usize {
            0
        }
        fn max_write_len(&self) -> usize {
            0
        }
        fn execute(&mut self, _cmd: &mut SpiCommand<'_>) -> Result<()> {
            Err(Error::SpiTransferFailed)
        }
        fn delay_us(&mut self, _us: u32) {}
    }

    impl GpioControl for NoSpi {
        fn pin_count(&self) -> u8 {
            0
        }
        fn set(&mut self, _pin: u8, _high: bool) -> Result<()> {
            Err(Error::GpioError)
        }
        fn get(&mut self, _pin: u8) -> Result<bool> {
            Err(Error::GpioError)
        }
    }

    struct Bus {
        i2c: ScriptedI2c,
        other: NoSpi,
        delays: u32,
    }

    impl DockBus for Bus {
        fn i2c(&mut self) -> &mut dyn I2cMaster {
            &mut self.i2c
        }
        fn spi(&mut self) -> &mut dyn SpiMaster {
            &mut self.other
        }
        fn gpio(&mut self) -> &mut dyn GpioControl {
            &mut self.other
        }
        fn delay_us(&mut self, _us: u32) {
            self.delays += 1;
        }
    }

    fn bus(responses: &[u8]) -> Bus {
        Bus {
            i2c: ScriptedI2c {
                writes: Vec::new(),
                responses: responses.to_vec(),
            },
            other: NoSpi,
            delays: 0,
        }
    }

    #[test]
    fn test_command_waits_for_response() {
        let mut b = bus(&[response::NONE, response::NONE, response::SUCCESS]);
        command(&mut b, 0x08, REG_ENTER_FLASH_MODE, &[FLASH_MODE_SIG]).unwrap();
        assert_eq!(b.delays, 2);
        assert_eq!(b.i2c.writes[0], [0x0A, 0x00, b'P']);
        // interrupt cleared after the response
        assert_eq!(b.i2c.writes[1], [0x06, 0x00, 0x01]);
    }

    #[test]
    fn test_command_reports_failure_code() {
        let mut b = bus(&[response::FLASH_UPDATE_FAILED]);
        assert_eq!(
            command(&mut b, 0x08, REG_VALIDATE_FW, &[1]),
            Err(Error::UnexpectedResponse(response::FLASH_UPDATE_FAILED))
        );
    }

    #[test]
    fn test_command_times_out() {
        let mut b = bus(&[]);
        assert_eq!(
            command(&mut b, 0x08, REG_RESET, &[RESET_SIG, 1]),
            Err(Error::Timeout)
        );
        assert_eq!(b.delays, RESPONSE_POLLS);
    }

    #[test]
    fn test_write_row_encodes_row_number() {
        let mut b = bus(&[response::SUCCESS]);
        write_row(&mut b, 0x08, 0x0123, &[0xAA; 4]).unwrap();
        assert_eq!(b.i2c.writes[0], [0x00, 0x02, 0xAA, 0xAA, 0xAA, 0xAA]);
        assert_eq!(b.i2c.writes[1], [0x0C, 0x00, b'F', 1, 0x23, 0x01]);
    }
}
