//! Capabilities the controller firmware provides to the update engine

use crate::error::Result;

/// Internal flash accessed in fixed-size rows
///
/// Holds the dock metadata and the fault log.
pub trait RowFlash {
    /// Row size in bytes
    fn row_size(&self) -> usize;

    /// Make the flash writable
    fn enter_flash_mode(&mut self, enable: bool) -> Result<()>;

    /// Read one row into `buf` (`buf.len() == row_size()`)
    fn read_row(&mut self, row: u16, buf: &mut [u8]) -> Result<()>;

    /// Replace one row with `data` (`data.len() == row_size()`)
    fn write_row(&mut self, row: u16, data: &[u8]) -> Result<()>;
}

/// Signature check over a package digest
pub trait SignatureVerifier {
    /// `true` when `signature` is valid for the SHA-256 `digest`
    fn verify_signature(&self, digest: &[u8; 32], signature: &[u8]) -> bool;
}

/// Verifier that rejects everything, for platforms without a key
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectAll;

impl SignatureVerifier for RejectAll {
    fn verify_signature(&self, _digest: &[u8; 32], _signature: &[u8]) -> bool {
        false
    }
}

/// Status LED pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedMode {
    /// Off
    Off,
    /// Steady on: update complete
    On,
    /// Blinking: update in progress
    Blinking,
    /// Breathing: update failed
    Breathing,
}

/// Notifications raised to the application during an update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AppEvent {
    /// A device update failed
    FwUpdateFail = 0,
    /// Phase 2 session started
    Phase2UpdateStarts = 1,
    /// Package authenticated for phase 2
    Phase2AuthSuccess = 2,
    /// Image written and verified
    Phase2ImageWriteSuccess = 3,
    /// Image write failed
    Phase2ImageWriteFail = 4,
    /// Critical updates are pending a phase 2 trigger
    PendingUpdates = 5,
    /// Image update started on a device
    Phase2ImgUpdateStart = 6,
    /// Phase 2 session ended
    Phase2UpdateEnds = 7,
    /// Factory package backup started
    FactoryBackupStarted = 8,
    /// Dock reset requested
    DockReset = 9,
    /// Factory backup skipped or failed
    FactoryBackupNotDone = 10,
    /// Dock status changed
    StateChange = 12,
}

/// Interrupt endpoint status opcodes
pub mod status_opcode {
    /// Dock status changed; data is the new status code
    pub const DOCK_STATUS: u8 = 0x01;
    /// Device finished; data is the device index
    pub const DEVICE_COMPLETE: u8 = 0x02;
    /// Device failed; data is the device index
    pub const DEVICE_FAILED: u8 = 0x03;
}

/// Three-byte status report sent on the upstream interrupt endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    /// Report opcode, see [`status_opcode`]
    pub opcode: u8,
    /// Payload byte
    pub data: u8,
}

impl StatusReport {
    /// Wire encoding: opcode, length, data
    pub fn to_bytes(self) -> [u8; 3] {
        [self.opcode, 1, self.data]
    }
}

/// Board services used by the orchestrator
pub trait Platform {
    /// Schedule a dock-wide reset once the session ends
    fn init_dock_reset(&mut self);

    /// Dock is in its as-shipped state
    fn is_in_factory_condition(&self) -> bool;

    /// Controller booted through a verified secure-boot chain
    fn is_secure_boot(&self) -> bool;

    /// Drive the status LED
    fn led_set_mode(&mut self, mode: LedMode);

    /// Raise an application event
    fn app_event(&mut self, event: AppEvent);

    /// Called once when an update session ends
    fn update_complete(&mut self, success: bool);

    /// Queue a report on the upstream interrupt endpoint
    fn send_status(&mut self, report: [u8; 3]);
}
