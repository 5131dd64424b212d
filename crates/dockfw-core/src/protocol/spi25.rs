//! SPI25 protocol implementation
//!
//! This module implements the common JEDEC SPI flash command sequences the
//! controller needs for its package area and for SPI-attached hub EEPROMs.
//! Only 3-byte addressing and single I/O are used.

use crate::error::{Error, Result};
use crate::programmer::SpiMaster;
use crate::spi::{opcodes, EraseSize, SpiCommand};

/// Read the JEDEC ID from a flash chip
///
/// Returns (manufacturer_id, device_id) on success.
pub fn read_jedec_id<M: SpiMaster + ?Sized>(master: &mut M) -> Result<(u8, u16)> {
    let mut buf = [0u8; 3];
    let mut cmd = SpiCommand::register(opcodes::RDID, &mut buf);
    master.execute(&mut cmd)?;

    let manufacturer = buf[0];
    let device = ((buf[1] as u16) << 8) | (buf[2] as u16);

    Ok((manufacturer, device))
}

/// Read the status register 1
pub fn read_status1<M: SpiMaster + ?Sized>(master: &mut M) -> Result<u8> {
    let mut buf = [0u8; 1];
    let mut cmd = SpiCommand::register(opcodes::RDSR, &mut buf);
    master.execute(&mut cmd)?;
    Ok(buf[0])
}

/// Send the Write Enable command
pub fn write_enable<M: SpiMaster + ?Sized>(master: &mut M) -> Result<()> {
    let mut cmd = SpiCommand::bare(opcodes::WREN);
    master.execute(&mut cmd)
}

/// Send the Write Disable command
pub fn write_disable<M: SpiMaster + ?Sized>(master: &mut M) -> Result<()> {
    let mut cmd = SpiCommand::bare(opcodes::WRDI);
    master.execute(&mut cmd)
}

/// Check whether the chip is still busy with a program or erase
pub fn is_write_in_progress<M: SpiMaster + ?Sized>(master: &mut M) -> Result<bool> {
    Ok(read_status1(master)? & opcodes::SR1_WIP != 0)
}

/// Check whether the write enable latch is set
pub fn check_wel<M: SpiMaster + ?Sized>(master: &mut M) -> Result<bool> {
    Ok(read_status1(master)? & opcodes::SR1_WEL != 0)
}

/// Wait for the WIP (Write In Progress) bit to clear
///
/// Polls the status register every `poll_delay_us` until the bit clears or
/// `timeout_us` has elapsed, in which case `Error::Timeout` is returned.
pub fn wait_ready<M: SpiMaster + ?Sized>(
    master: &mut M,
    poll_delay_us: u32,
    timeout_us: u32,
) -> Result<()> {
    let max_polls = if poll_delay_us > 0 {
        timeout_us / poll_delay_us
    } else {
        timeout_us
    };

    for _ in 0..max_polls.max(1) {
        if !is_write_in_progress(master)? {
            return Ok(());
        }
        if poll_delay_us > 0 {
            master.delay_us(poll_delay_us);
        }
    }

    Err(Error::Timeout)
}

/// Read data using 3-byte addressing, chunked to the master's read limit
pub fn read<M: SpiMaster + ?Sized>(master: &mut M, addr: u32, buf: &mut [u8]) -> Result<()> {
    let max_len = master.max_read_len().max(1);
    let mut offset = 0;

    while offset < buf.len() {
        let chunk_len = core::cmp::min(max_len, buf.len() - offset);
        let chunk = &mut buf[offset..offset + chunk_len];
        let mut cmd = SpiCommand::read(opcodes::READ, addr + offset as u32, chunk);
        master.execute(&mut cmd)?;
        offset += chunk_len;
    }

    Ok(())
}

/// Program a single page (must not cross a page boundary)
///
/// Page program typically takes 0.7-5ms, we poll every 10us with 10ms timeout.
pub fn program_page<M: SpiMaster + ?Sized>(master: &mut M, addr: u32, data: &[u8]) -> Result<()> {
    write_enable(master)?;

    let mut cmd = SpiCommand::program(opcodes::PP, addr, data);
    master.execute(&mut cmd)?;

    wait_ready(master, 10, 10_000)
}

/// Program an arbitrary range, split at page and transfer-size boundaries
///
/// The target range must already be erased.
pub fn write<M: SpiMaster + ?Sized>(master: &mut M, addr: u32, data: &[u8]) -> Result<()> {
    let max_write = master.max_write_len().clamp(1, opcodes::PAGE_SIZE);
    let mut offset = 0usize;

    while offset < data.len() {
        let cur = addr as usize + offset;
        let page_remaining = opcodes::PAGE_SIZE - (cur % opcodes::PAGE_SIZE);
        let chunk_len = page_remaining.min(max_write).min(data.len() - offset);
        program_page(master, cur as u32, &data[offset..offset + chunk_len])?;
        offset += chunk_len;
    }

    Ok(())
}

/// Erase one block of the given size containing `addr`
pub fn erase_block<M: SpiMaster + ?Sized>(master: &mut M, size: EraseSize, addr: u32) -> Result<()> {
    write_enable(master)?;

    let mut cmd = match size {
        EraseSize::Chip => SpiCommand::bare(size.opcode()),
        _ => SpiCommand::erase(size.opcode(), addr),
    };
    master.execute(&mut cmd)?;

    let (poll_delay_us, timeout_us) = match size {
        EraseSize::Sector4K => (10_000, 1_000_000),
        EraseSize::Block32K | EraseSize::Block64K => (100_000, 4_000_000),
        EraseSize::Chip => (1_000_000, 200_000_000),
    };
    wait_ready(master, poll_delay_us, timeout_us)
}

/// Erase every 4 KiB sector overlapping `addr..addr + len`
///
/// Uses 64 KiB block erases where the range covers whole aligned blocks.
pub fn erase_range<M: SpiMaster + ?Sized>(master: &mut M, addr: u32, len: u32) -> Result<()> {
    let sector = EraseSize::Sector4K.bytes();
    let block = EraseSize::Block64K.bytes();
    let end = addr.checked_add(len).ok_or(Error::AddressOutOfBounds)?;
    let mut cur = addr & !(sector - 1);

    while cur < end {
        if cur % block == 0 && end - cur >= block {
            erase_block(master, EraseSize::Block64K, cur)?;
            cur += block;
        } else {
            erase_block(master, EraseSize::Sector4K, cur)?;
            cur += sector;
        }
    }

    Ok(())
}
