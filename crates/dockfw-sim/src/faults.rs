//! Scripted misbehaviour for emulated devices

use serde::Deserialize;

/// Faults a simulated device injects
///
/// All counts are consumed as the faults fire. HPI controllers honour every
/// field; EEPROM hubs only honour `absent` and the SPI hub flash ignores
/// the plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FaultPlan {
    /// Device does not answer at all
    pub absent: bool,
    /// Device mode reads reporting busy before the device settles
    pub busy_reads: u8,
    /// Rows whose next write fails, one entry per failure
    pub fail_rows: Vec<u16>,
    /// Refusals of flashing mode before it is granted
    pub reject_prepare: u8,
    /// Image validation always fails
    pub reject_commit: bool,
    /// Jump to the alternate image always fails
    pub reject_jump: bool,
}
