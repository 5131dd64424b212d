//! One SPI transaction
//!
//! Every part on the controller's SPI bus takes 24-bit addresses, so a
//! command is an opcode, an optional address, bytes to send after them and a
//! buffer to clock data into.

/// Bytes of an address phase
pub const ADDRESS_LEN: usize = 3;

/// Largest header: opcode plus address
pub const MAX_HEADER_LEN: usize = 1 + ADDRESS_LEN;

/// A single SPI transaction borrowing its buffers
#[derive(Debug)]
pub struct SpiCommand<'a> {
    /// Opcode byte
    pub opcode: u8,
    /// 24-bit address sent after the opcode
    pub address: Option<u32>,
    /// Bytes sent after the header
    pub write_data: &'a [u8],
    /// Bytes clocked in after the write phase
    pub read_buf: &'a mut [u8],
}

impl<'a> SpiCommand<'a> {
    fn build(opcode: u8, address: Option<u32>, write_data: &'a [u8], read_buf: &'a mut [u8]) -> Self {
        Self {
            opcode,
            address,
            write_data,
            read_buf,
        }
    }

    /// Opcode alone (WREN, WRDI, chip erase)
    pub fn bare(opcode: u8) -> Self {
        Self::build(opcode, None, &[], &mut [])
    }

    /// Register read without an address (RDSR, RDID)
    pub fn register(opcode: u8, buf: &'a mut [u8]) -> Self {
        Self::build(opcode, None, &[], buf)
    }

    /// Addressed read
    pub fn read(opcode: u8, address: u32, buf: &'a mut [u8]) -> Self {
        Self::build(opcode, Some(address), &[], buf)
    }

    /// Addressed program
    pub fn program(opcode: u8, address: u32, data: &'a [u8]) -> Self {
        Self::build(opcode, Some(address), data, &mut [])
    }

    /// Addressed erase
    pub fn erase(opcode: u8, address: u32) -> Self {
        Self::build(opcode, Some(address), &[], &mut [])
    }

    /// Opcode and big-endian address as clocked out, with the used length
    pub fn header(&self) -> ([u8; MAX_HEADER_LEN], usize) {
        let mut out = [0u8; MAX_HEADER_LEN];
        out[0] = self.opcode;
        match self.address {
            Some(addr) => {
                out[1..].copy_from_slice(&addr.to_be_bytes()[1..]);
                (out, MAX_HEADER_LEN)
            }
            None => (out, 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let cmd = SpiCommand::erase(0x20, 0x12_3456);
        let (header, len) = cmd.header();
        assert_eq!(&header[..len], &[0x20, 0x12, 0x34, 0x56]);

        let cmd = SpiCommand::bare(0x06);
        let (header, len) = cmd.header();
        assert_eq!(&header[..len], &[0x06]);
    }
}
