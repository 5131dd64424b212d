//! Bus capability traits
//!
//! The controller reaches dock devices through three primitive buses: an I2C
//! master, an SPI master and a bank of GPIO lines. Board support code
//! implements these traits; the update logic only ever sees them through
//! [`DockBus`], which the orchestrator lends to one device at a time.
//!
//! All traits are synchronous and object safe so that device operation
//! tables can be stored as `Box<dyn DeviceUpdateOps>` and handed a
//! `&mut dyn DockBus`.

use crate::error::Result;
use crate::spi::SpiCommand;

/// SPI Master trait
///
/// This trait represents a controller that can execute SPI commands against
/// a single chip select. Implementations only need to clock out the header
/// and write data and clock in `read_buf.len()` bytes.
///
/// ## Example
///
/// ```ignore
/// impl SpiMaster for BoardSpi {
///     fn max_read_len(&self) -> usize { 256 }
///     fn max_write_len(&self) -> usize { 256 }
///
///     fn execute(&mut self, cmd: &mut SpiCommand<'_>) -> Result<()> {
///         default_execute(cmd, |tx, rx| self.transfer(tx, rx))
///     }
///
///     fn delay_us(&mut self, us: u32) { self.timer.delay_us(us) }
/// }
/// ```
pub trait SpiMaster {
    /// Get the maximum number of bytes that can be read in a single transaction
    fn max_read_len(&self) -> usize;

    /// Get the maximum number of bytes that can be written in a single transaction
    fn max_write_len(&self) -> usize;

    /// Execute a single SPI command
    ///
    /// The command contains all the information needed for the transaction:
    /// - `opcode`: The SPI command opcode
    /// - `address`: Optional 24-bit address
    /// - `write_data`: Data to write after the header
    /// - `read_buf`: Buffer to read data into
    fn execute(&mut self, cmd: &mut SpiCommand<'_>) -> Result<()>;

    /// Delay for the specified number of microseconds
    fn delay_us(&mut self, us: u32);
}

/// I2C master trait
///
/// Addresses are 7-bit target addresses. A target that does not acknowledge
/// should be reported as [`Error::I2cNack`](crate::Error::I2cNack).
pub trait I2cMaster {
    /// Largest payload (including register address bytes) per transfer
    fn max_transfer_len(&self) -> usize;

    /// Write `data` to the target
    fn write(&mut self, addr: u8, data: &[u8]) -> Result<()>;

    /// Write `data`, then issue a repeated start and read into `buf`
    fn write_read(&mut self, addr: u8, data: &[u8], buf: &mut [u8]) -> Result<()>;
}

/// GPIO line control
pub trait GpioControl {
    /// Number of GPIO lines the platform exposes
    fn pin_count(&self) -> u8;

    /// Drive an output line
    fn set(&mut self, pin: u8, high: bool) -> Result<()>;

    /// Sample an input line
    fn get(&mut self, pin: u8) -> Result<bool>;
}

/// The buses of one dock, lent to a device for the duration of one operation
pub trait DockBus {
    /// I2C master shared by HPI devices and I2C EEPROM hubs
    fn i2c(&mut self) -> &mut dyn I2cMaster;

    /// SPI master shared by SPI hubs and the package area
    fn spi(&mut self) -> &mut dyn SpiMaster;

    /// GPIO lines for reset, write-protect and interrupt signals
    fn gpio(&mut self) -> &mut dyn GpioControl;

    /// Delay for the specified number of microseconds
    fn delay_us(&mut self, us: u32);
}

impl<T: SpiMaster + ?Sized> SpiMaster for &mut T {
    fn max_read_len(&self) -> usize {
        (**self).max_read_len()
    }

    fn max_write_len(&self) -> usize {
        (**self).max_write_len()
    }

    fn execute(&mut self, cmd: &mut SpiCommand<'_>) -> Result<()> {
        (**self).execute(cmd)
    }

    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }
}

impl<T: DockBus + ?Sized> DockBus for &mut T {
    fn i2c(&mut self) -> &mut dyn I2cMaster {
        (**self).i2c()
    }

    fn spi(&mut self) -> &mut dyn SpiMaster {
        (**self).spi()
    }

    fn gpio(&mut self) -> &mut dyn GpioControl {
        (**self).gpio()
    }

    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }
}

/// Helper for implementing `SpiMaster::execute()` on a full-duplex transfer
///
/// Sends the header and write data through `transfer_fn`, which also fills
/// the read buffer.
pub fn default_execute<F>(cmd: &mut SpiCommand<'_>, transfer_fn: F) -> Result<()>
where
    F: FnOnce(&[u8], &mut [u8]) -> Result<()>,
{
    let (header, len) = cmd.header();
    let mut tx = alloc::vec::Vec::with_capacity(len + cmd.write_data.len());
    tx.extend_from_slice(&header[..len]);
    tx.extend_from_slice(cmd.write_data);
    transfer_fn(&tx, cmd.read_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spi::opcodes;

    #[test]
    fn test_default_execute_frames_command() {
        let data = [0xAA, 0x55];
        let mut buf = [0u8; 0];
        let mut cmd = SpiCommand::program(opcodes::PP, 0x01_0203, &data);
        let mut sent = alloc::vec::Vec::new();
        default_execute(&mut cmd, |tx, rx| {
            sent.extend_from_slice(tx);
            assert!(rx.is_empty());
            Ok(())
        })
        .unwrap();
        assert_eq!(sent, [opcodes::PP, 0x01, 0x02, 0x03, 0xAA, 0x55]);

        let mut cmd = SpiCommand::register(opcodes::RDSR, &mut buf);
        default_execute(&mut cmd, |tx, _| {
            assert_eq!(tx, [opcodes::RDSR]);
            Ok(())
        })
        .unwrap();
    }
}
