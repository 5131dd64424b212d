//! Flash-resident fault log
//!
//! Fault counters and a ring of recent failure details kept in two
//! internal flash rows, with a backup copy. The counter row changes rarely
//! and the detail row on every recorded failure, so each row carries its own
//! checksum and only rows that changed are rewritten on [`FaultLog::flush`].

pub mod layout;

use alloc::vec;
use zerocopy::byteorder::little_endian::U16;
use zerocopy::{FromBytes, FromZeros, IntoBytes};

use self::layout::*;
use crate::checksum::sum8;
use crate::config::UpdateConfig;
use crate::error::{Error, Result};
use crate::platform::RowFlash;

/// Fault opcodes
///
/// Opcodes with a counter bump that counter when recorded; every opcode
/// also lands in the detail ring.
pub mod opcode {
    /// Watchdog reset
    pub const WDT: u8 = 0x01;
    /// Hard fault
    pub const HARD_FAULT: u8 = 0x02;
    /// Power cycle
    pub const POWER_CYCLE: u8 = 0x03;
    /// VDDD brown-out
    pub const VDDD_BROWN_OUT: u8 = 0x04;
    /// Device firmware update failure
    pub const FW_UPD_FAILURE: u8 = 0x20;
    /// Phase 1 package authentication failure
    pub const P1_AUTH_FAILURE: u8 = 0x21;
    /// Phase 2 package authentication failure
    pub const P2_AUTH_FAILURE: u8 = 0x22;
    /// Serial block (I2C/SPI) failure
    pub const SCB_FAILURE: u8 = 0x23;
    /// Unexpected HPI event
    pub const HPI_EVENT: u8 = 0x24;
    /// First port 0 fault
    pub const PORT0_BASE: u8 = 0x80;
    /// First port 1 fault
    pub const PORT1_BASE: u8 = 0xC0;
}

/// Per-port fault kinds, in counter table order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PortFault {
    /// VBUS over-voltage
    VbusOv = 0,
    /// VBUS under-voltage
    VbusUv,
    /// VBUS short circuit
    VbusSc,
    /// VBUS over-current
    VbusOc,
    /// VBUS reverse current
    VbusRc,
    /// VCONN over-current
    VconnOc,
    /// VBUS input over-voltage
    VbusInOv,
    /// VBUS input under-voltage
    VbusInUv,
    /// System over-temperature
    SystemOt,
    /// CRC error
    CrcError,
    /// CC over-voltage
    CcOv,
    /// CC short circuit
    CcSc,
    /// SBU over-voltage
    SbuOv,
}

impl PortFault {
    /// Opcode of this fault on `port`, `None` for ports without a table
    pub fn opcode(self, port: u8) -> Option<u8> {
        match port {
            0 => Some(opcode::PORT0_BASE + self as u8),
            1 => Some(opcode::PORT1_BASE + self as u8),
            _ => None,
        }
    }
}

/// One entry of the failure detail ring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureDetail {
    /// Fault opcode
    pub opcode: u8,
    /// Optional payload byte
    pub data: Option<u8>,
}

impl FailureDetail {
    fn encode(self) -> [u8; DETAIL_SIZE] {
        match self.data {
            Some(d) => [self.opcode, 1, d],
            None => [self.opcode, 0, 0],
        }
    }

    fn decode(b: &[u8]) -> Self {
        Self {
            opcode: b[0],
            data: (b[1] != 0).then_some(b[2]),
        }
    }
}

/// Counter table a fault opcode feeds
enum Counter {
    Common(usize),
    Dmc(usize),
    Port(usize, usize),
}

fn counter_for(op: u8) -> Option<Counter> {
    let port_fault_end = PORT_FAULT_COUNT as u8;
    match op {
        opcode::WDT..=opcode::VDDD_BROWN_OUT => Some(Counter::Common((op - opcode::WDT) as usize)),
        opcode::FW_UPD_FAILURE..=opcode::P2_AUTH_FAILURE => {
            Some(Counter::Dmc((op - opcode::FW_UPD_FAILURE) as usize))
        }
        _ if (opcode::PORT0_BASE..opcode::PORT0_BASE + port_fault_end).contains(&op) => {
            Some(Counter::Port(0, (op - opcode::PORT0_BASE) as usize))
        }
        _ if (opcode::PORT1_BASE..opcode::PORT1_BASE + port_fault_end).contains(&op) => {
            Some(Counter::Port(1, (op - opcode::PORT1_BASE) as usize))
        }
        _ => None,
    }
}

fn bump(c: &mut U16) {
    *c = U16::new(c.get().saturating_add(1));
}

fn row_intact(bytes: &[u8]) -> bool {
    sum8(bytes) == 0
}

/// The fault log
#[derive(Debug, Clone)]
pub struct FaultLog {
    static_row: StaticRow,
    dynamic_row: DynamicRow,
    static_dirty: bool,
    dynamic_dirty: bool,
    backup_stale: bool,
    flushes_since_backup: u8,
    primary_row: u16,
    backup_row: u16,
    backup_threshold: u8,
}

impl FaultLog {
    /// Empty log stored at the rows named in `config`
    pub fn new(config: &UpdateConfig) -> Self {
        let mut static_row = StaticRow::new_zeroed();
        static_row.header = LogHeader {
            signature: U16::new(LOG_SIGNATURE),
            version: LOG_VERSION,
            port_count: PORT_COUNT as u8,
            common_fault_count: COMMON_FAULT_COUNT,
            dmc_fault_count: DMC_FAULT_COUNT,
            port_fault_count: PORT_FAULT_COUNT as u8,
            reserved: [0; 7],
        };
        let mut dynamic_row = DynamicRow::new_zeroed();
        dynamic_row.first_failure_offset = NO_OFFSET;
        dynamic_row.last_failure_offset = NO_OFFSET;

        Self {
            static_row,
            dynamic_row,
            static_dirty: true,
            dynamic_dirty: true,
            backup_stale: true,
            flushes_since_backup: 0,
            primary_row: config.log_row,
            backup_row: config.backup_log_row,
            backup_threshold: config.backup_threshold.max(1),
        }
    }

    /// Load the log, falling back to the backup copy and then to an empty log
    pub fn load(flash: &mut dyn RowFlash, config: &UpdateConfig) -> Result<Self> {
        let mut log = Self::new(config);
        if flash.row_size() < LOG_ROW_SIZE {
            return Err(Error::BufferTooSmall);
        }

        if let Some((s, d)) = read_rows(flash, log.primary_row)? {
            log.static_row = s;
            log.dynamic_row = d;
            log.static_dirty = false;
            log.dynamic_dirty = false;
            log.backup_stale = false;
        } else if let Some((s, d)) = read_rows(flash, log.backup_row)? {
            log::warn!("fault log corrupt, restored from backup");
            log.static_row = s;
            log.dynamic_row = d;
            log.backup_stale = false;
        } else {
            log::warn!("fault log and backup corrupt, starting empty");
        }
        Ok(log)
    }

    /// Record a fault
    ///
    /// Bumps the matching counter (saturating) and appends the fault to the
    /// detail ring, overwriting the oldest entry when the ring is full.
    pub fn record(&mut self, op: u8, data: Option<u8>) {
        if let Some(counter) = counter_for(op) {
            let s = &mut self.static_row;
            let slot = match counter {
                Counter::Common(0) => &mut s.common.wdt_reset,
                Counter::Common(1) => &mut s.common.hard_fault,
                Counter::Common(2) => &mut s.common.power_cycle,
                Counter::Common(_) => &mut s.common.vddd_bod,
                Counter::Dmc(0) => &mut s.dmc.fw_upd_fail,
                Counter::Dmc(1) => &mut s.dmc.p1_auth_fail,
                Counter::Dmc(_) => &mut s.dmc.p2_auth_fail,
                Counter::Port(port, idx) => &mut s.ports[port].counters[idx],
            };
            bump(slot);
            self.static_dirty = true;
        }
        self.append(FailureDetail { opcode: op, data });
        log::debug!("fault 0x{:02X} recorded", op);
    }

    /// Record a failed device update; `data` is the device index
    pub fn record_fw_update_fail(&mut self, device_index: u8) {
        self.record(opcode::FW_UPD_FAILURE, Some(device_index));
    }

    /// Record a package authentication failure in phase 1 or 2
    pub fn record_auth_fail(&mut self, phase2: bool) {
        let op = if phase2 {
            opcode::P2_AUTH_FAILURE
        } else {
            opcode::P1_AUTH_FAILURE
        };
        self.record(op, None);
    }

    /// Record a Type-C port fault
    pub fn record_port_fault(&mut self, port: u8, fault: PortFault) -> Result<()> {
        let op = fault.opcode(port).ok_or(Error::AddressOutOfBounds)?;
        self.record(op, None);
        Ok(())
    }

    fn append(&mut self, detail: FailureDetail) {
        let d = &mut self.dynamic_row;
        let next = if d.last_failure_offset == NO_OFFSET {
            d.first_failure_offset = 0;
            0
        } else {
            let next = if d.last_failure_offset >= LAST_DETAIL_OFFSET {
                0
            } else {
                d.last_failure_offset + DETAIL_SIZE as u8
            };
            if next == d.first_failure_offset {
                d.first_failure_offset = if next >= LAST_DETAIL_OFFSET {
                    0
                } else {
                    next + DETAIL_SIZE as u8
                };
            }
            next
        };
        d.last_failure_offset = next;
        let at = next as usize;
        d.failure_details[at..at + DETAIL_SIZE].copy_from_slice(&detail.encode());
        self.dynamic_dirty = true;
    }

    /// Counter value for a fault opcode, `None` if the opcode has no counter
    pub fn count(&self, op: u8) -> Option<u16> {
        let s = &self.static_row;
        let v = match counter_for(op)? {
            Counter::Common(0) => s.common.wdt_reset,
            Counter::Common(1) => s.common.hard_fault,
            Counter::Common(2) => s.common.power_cycle,
            Counter::Common(_) => s.common.vddd_bod,
            Counter::Dmc(0) => s.dmc.fw_upd_fail,
            Counter::Dmc(1) => s.dmc.p1_auth_fail,
            Counter::Dmc(_) => s.dmc.p2_auth_fail,
            Counter::Port(port, idx) => s.ports[port].counters[idx],
        };
        Some(v.get())
    }

    /// Device update failures
    pub fn fw_update_failures(&self) -> u16 {
        self.static_row.dmc.fw_upd_fail.get()
    }

    /// Authentication failures in phase 1 or 2
    pub fn auth_failures(&self, phase2: bool) -> u16 {
        if phase2 {
            self.static_row.dmc.p2_auth_fail.get()
        } else {
            self.static_row.dmc.p1_auth_fail.get()
        }
    }

    /// Ring entries, oldest first
    pub fn details(&self) -> impl Iterator<Item = FailureDetail> + '_ {
        let d = &self.dynamic_row;
        let count = if d.last_failure_offset == NO_OFFSET {
            0
        } else {
            let span = if d.last_failure_offset >= d.first_failure_offset {
                d.last_failure_offset - d.first_failure_offset
            } else {
                (LAST_DETAIL_OFFSET - d.first_failure_offset) + DETAIL_SIZE as u8 + d.last_failure_offset
            };
            span as usize / DETAIL_SIZE + 1
        };
        let ring_len = DETAILS_LEN - DETAILS_LEN % DETAIL_SIZE;
        let first = d.first_failure_offset as usize;
        (0..count).map(move |i| {
            let at = (first + i * DETAIL_SIZE) % ring_len;
            FailureDetail::decode(&d.failure_details[at..at + DETAIL_SIZE])
        })
    }

    /// Rows not yet written back
    pub fn is_dirty(&self) -> bool {
        self.static_dirty || self.dynamic_dirty
    }

    /// The two log rows as stored, checksums included
    pub fn to_bytes(&self) -> [u8; LOG_SIZE] {
        let (s, d) = self.sealed();
        let mut out = [0u8; LOG_SIZE];
        out[..LOG_ROW_SIZE].copy_from_slice(s.as_bytes());
        out[LOG_ROW_SIZE..].copy_from_slice(d.as_bytes());
        out
    }

    fn sealed(&self) -> (StaticRow, DynamicRow) {
        let mut s = self.static_row;
        s.checksum = 0;
        s.checksum = sum8(s.as_bytes());
        let mut d = self.dynamic_row;
        d.checksum = 0;
        d.checksum = sum8(d.as_bytes());
        (s, d)
    }

    /// Write changed rows back
    ///
    /// Every `backup_threshold` flushes, and whenever the backup is known to
    /// be stale, both rows are also written to the backup location.
    pub fn flush(&mut self, flash: &mut dyn RowFlash) -> Result<()> {
        if !self.is_dirty() && !self.backup_stale {
            return Ok(());
        }
        if flash.row_size() < LOG_ROW_SIZE {
            return Err(Error::BufferTooSmall);
        }

        self.flushes_since_backup = self.flushes_since_backup.saturating_add(1);
        let backup = self.backup_stale || self.flushes_since_backup >= self.backup_threshold;

        flash.enter_flash_mode(true)?;
        let result = self.write_rows(flash, backup);
        flash.enter_flash_mode(false)?;
        result?;

        self.static_dirty = false;
        self.dynamic_dirty = false;
        if backup {
            log::debug!("fault log backup refreshed");
            self.backup_stale = false;
            self.flushes_since_backup = 0;
        }
        Ok(())
    }

    fn write_rows(&self, flash: &mut dyn RowFlash, backup: bool) -> Result<()> {
        let (s, d) = self.sealed();
        let mut buf = vec![0xFFu8; flash.row_size()];
        if self.static_dirty || backup {
            buf[..LOG_ROW_SIZE].copy_from_slice(s.as_bytes());
            if self.static_dirty {
                flash.write_row(self.primary_row, &buf)?;
            }
            if backup {
                flash.write_row(self.backup_row, &buf)?;
            }
        }
        if self.dynamic_dirty || backup {
            buf[..LOG_ROW_SIZE].copy_from_slice(d.as_bytes());
            if self.dynamic_dirty {
                flash.write_row(self.primary_row + 1, &buf)?;
            }
            if backup {
                flash.write_row(self.backup_row + 1, &buf)?;
            }
        }
        Ok(())
    }
}

/// Read and check one copy of the log
fn read_rows(flash: &mut dyn RowFlash, row: u16) -> Result<Option<(StaticRow, DynamicRow)>> {
    let mut buf = vec![0u8; flash.row_size()];

    flash.read_row(row, &mut buf)?;
    let bytes = &buf[..LOG_ROW_SIZE];
    let s = match StaticRow::read_from_bytes(bytes) {
        Ok(s)
            if row_intact(bytes)
                && s.header.signature.get() == LOG_SIGNATURE
                && s.header.version == LOG_VERSION =>
        {
            s
        }
        _ => return Ok(None),
    };

    flash.read_row(row + 1, &mut buf)?;
    let bytes = &buf[..LOG_ROW_SIZE];
    let valid_offset = |o: u8| o == NO_OFFSET || (o <= LAST_DETAIL_OFFSET && o as usize % DETAIL_SIZE == 0);
    let d = match DynamicRow::read_from_bytes(bytes) {
        Ok(d)
            if row_intact(bytes)
                && valid_offset(d.first_failure_offset)
                && valid_offset(d.last_failure_offset)
                && (d.first_failure_offset == NO_OFFSET) == (d.last_failure_offset == NO_OFFSET) =>
        {
            d
        }
        _ => return Ok(None),
    };
    Ok(Some((s, d)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::BTreeMap;
    use alloc::vec::Vec;

    #[derive(Default)]
    struct Rows {
        rows: BTreeMap<u16, Vec<u8>>,
        writes: Vec<u16>,
        flash_mode: bool,
    }

    impl RowFlash for Rows {
        fn row_size(&self) -> usize {
            256
        }

        fn enter_flash_mode(&mut self, enable: bool) -> Result<()> {
            self.flash_mode = enable;
            Ok(())
        }

        fn read_row(&mut self, row: u16, buf: &mut [u8]) -> Result<()> {
            match self.rows.get(&row) {
                Some(r) => buf.copy_from_slice(r),
                None => buf.fill(0xFF),
            }
            Ok(())
        }

        fn write_row(&mut self, row: u16, data: &[u8]) -> Result<()> {
            assert!(self.flash_mode, "write outside flash mode");
            self.rows.insert(row, data.to_vec());
            self.writes.push(row);
            Ok(())
        }
    }

    fn config() -> UpdateConfig {
        UpdateConfig {
            log_row: 10,
            backup_log_row: 20,
            backup_threshold: 3,
            ..UpdateConfig::default()
        }
    }

    #[test]
    fn test_erased_flash_starts_empty() {
        let mut flash = Rows::default();
        let log = FaultLog::load(&mut flash, &config()).unwrap();
        assert_eq!(log.fw_update_failures(), 0);
        assert_eq!(log.details().count(), 0);
        assert!(log.is_dirty());
    }

    #[test]
    fn test_counters_saturate() {
        let mut log = FaultLog::new(&config());
        log.static_row.dmc.fw_upd_fail = U16::new(0xFFFE);
        log.record_fw_update_fail(1);
        log.record_fw_update_fail(1);
        assert_eq!(log.fw_update_failures(), 0xFFFF);
    }

    #[test]
    fn test_counter_mapping() {
        let mut log = FaultLog::new(&config());
        log.record(opcode::HARD_FAULT, None);
        log.record_auth_fail(true);
        log.record_port_fault(1, PortFault::CcSc).unwrap();
        assert_eq!(log.count(opcode::HARD_FAULT), Some(1));
        assert_eq!(log.auth_failures(true), 1);
        assert_eq!(log.auth_failures(false), 0);
        assert_eq!(log.count(0xCB), Some(1));
        assert_eq!(log.count(opcode::HPI_EVENT), None);
        assert!(log.record_port_fault(2, PortFault::VbusOv).is_err());
    }

    #[test]
    fn test_ring_wraps_oldest_first() {
        let mut log = FaultLog::new(&config());
        let capacity = DETAILS_LEN / DETAIL_SIZE;
        for i in 0..capacity + 5 {
            log.record(opcode::SCB_FAILURE, Some(i as u8));
        }
        let details: Vec<_> = log.details().collect();
        assert_eq!(details.len(), capacity);
        assert_eq!(details[0].data, Some(5));
        assert_eq!(details.last().unwrap().data, Some((capacity + 4) as u8));
    }

    #[test]
    fn test_roundtrip_through_flash() {
        let mut flash = Rows::default();
        let mut log = FaultLog::new(&config());
        log.record_fw_update_fail(3);
        log.record(opcode::HPI_EVENT, None);
        log.flush(&mut flash).unwrap();

        let loaded = FaultLog::load(&mut flash, &config()).unwrap();
        assert!(!loaded.is_dirty());
        assert_eq!(loaded.fw_update_failures(), 1);
        let details: Vec<_> = loaded.details().collect();
        assert_eq!(
            details,
            [
                FailureDetail { opcode: 0x20, data: Some(3) },
                FailureDetail { opcode: 0x24, data: None },
            ]
        );
        assert_eq!(loaded.to_bytes()[..2], [0x43, 0x59]);
    }

    #[test]
    fn test_only_dirty_rows_written() {
        let mut flash = Rows::default();
        let mut log = FaultLog::new(&config());
        log.flush(&mut flash).unwrap();
        flash.writes.clear();

        log.record(opcode::HPI_EVENT, None);
        log.flush(&mut flash).unwrap();
        assert_eq!(flash.writes, [11]);

        flash.writes.clear();
        log.flush(&mut flash).unwrap();
        assert!(flash.writes.is_empty());
    }

    #[test]
    fn test_backup_refresh_interval() {
        let mut flash = Rows::default();
        let mut log = FaultLog::new(&config());
        log.flush(&mut flash).unwrap();
        assert!(flash.writes.contains(&20));

        flash.writes.clear();
        for _ in 0..2 {
            log.record(opcode::WDT, None);
            log.flush(&mut flash).unwrap();
        }
        assert!(!flash.writes.contains(&20));
        log.record(opcode::WDT, None);
        log.flush(&mut flash).unwrap();
        assert!(flash.writes.contains(&20) && flash.writes.contains(&21));
    }

    #[test]
    fn test_corrupt_primary_uses_backup() {
        let mut flash = Rows::default();
        let mut log = FaultLog::new(&config());
        log.record_auth_fail(false);
        log.flush(&mut flash).unwrap();

        flash.rows.get_mut(&10).unwrap()[40] ^= 0x01;
        let loaded = FaultLog::load(&mut flash, &config()).unwrap();
        assert_eq!(loaded.auth_failures(false), 1);
        assert!(loaded.is_dirty());
    }
}
