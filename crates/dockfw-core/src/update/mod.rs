//! Per-device update state machine
//!
//! A [`DeviceUpdateMachine`] drives one device from query to a verified,
//! running image. Every call to [`DeviceUpdateMachine::step`] performs at
//! most one bus-level operation and exactly one state transition, so the
//! orchestrator can interleave machines, honour aborts between rows and
//! report progress.

mod rows;

pub use rows::RowSequence;

use alloc::boxed::Box;

use crate::config::UpdateConfig;
use crate::device::{DeviceDescriptor, DeviceUpdateOps, ImageStatus, ImageType};
use crate::error::{Error, Result};
use crate::package::{ImageEntry, ValidatedPackage};
use crate::programmer::DockBus;

/// Why a device ended in [`UpdateState::Failed`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    /// Access parameters could not be bound
    InvalidAccessConfig,
    /// No usable package for the session
    Package,
    /// Device could not be queried
    QueryFailed,
    /// Target bank could not be armed
    PrepareFailed,
    /// A row could not be written
    RowWriteFailed {
        /// Image-relative row that failed
        row: u32,
    },
    /// Image could not be committed
    FinishFailed,
    /// Version read back differs from the package
    VersionMismatch,
    /// Device refused to run the new image
    JumpRejected,
    /// Session aborted
    Aborted,
    /// Device stayed busy for every pass
    DeferralExhausted,
}

impl core::fmt::Display for FailReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidAccessConfig => write!(f, "invalid access configuration"),
            Self::Package => write!(f, "no valid package"),
            Self::QueryFailed => write!(f, "version query failed"),
            Self::PrepareFailed => write!(f, "prepare failed"),
            Self::RowWriteFailed { row } => write!(f, "row {} write failed", row),
            Self::FinishFailed => write!(f, "finish failed"),
            Self::VersionMismatch => write!(f, "version mismatch"),
            Self::JumpRejected => write!(f, "jump rejected"),
            Self::Aborted => write!(f, "aborted"),
            Self::DeferralExhausted => write!(f, "device busy on every pass"),
        }
    }
}

/// Update state of one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateState {
    /// Not yet selected
    #[default]
    Idle,
    /// Reading versions
    Querying,
    /// Device asked to be queried later
    Deferred,
    /// Update needed, target bank not yet armed
    AwaitingPreparation,
    /// Writing rows
    Flashing {
        /// Next image-relative row
        next_row: u32,
    },
    /// All rows written, committing the image
    Finishing,
    /// Re-reading versions after the commit
    VerifyingVersion,
    /// Verified, asking the device to run the new image
    JumpPending,
    /// Up to date
    Complete,
    /// Gave up
    Failed(FailReason),
}

impl UpdateState {
    /// `Complete` or `Failed`
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed(_))
    }

    /// The target bank holds partially written data
    fn bank_dirty(self) -> bool {
        matches!(self, Self::Flashing { .. } | Self::Finishing)
    }
}

/// Everything a step may touch besides the device's own state
pub struct StepContext<'a> {
    /// Dock buses, lent for this step only
    pub bus: &'a mut dyn DockBus,
    /// Package applied in this session
    pub package: &'a ValidatedPackage,
    /// Session tunables
    pub config: &'a UpdateConfig,
    /// Update even if the device is already current
    pub force_update: bool,
    /// Abort requested
    pub abort: bool,
}

/// Drives one device through an update
pub struct DeviceUpdateMachine {
    index: usize,
    ops: Box<dyn DeviceUpdateOps>,
    state: UpdateState,
    target: ImageType,
    image: Option<ImageEntry>,
    rows: RowSequence,
    deferrals: u8,
}

impl core::fmt::Debug for DeviceUpdateMachine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceUpdateMachine")
            .field("index", &self.index)
            .field("state", &self.state)
            .field("target", &self.target)
            .field("rows", &self.rows)
            .finish_non_exhaustive()
    }
}

impl DeviceUpdateMachine {
    /// Machine for the device at registry `index`
    pub fn new(index: usize, ops: Box<dyn DeviceUpdateOps>) -> Self {
        Self {
            index,
            ops,
            state: UpdateState::Idle,
            target: ImageType::Image1,
            image: None,
            rows: RowSequence::new(0),
            deferrals: 0,
        }
    }

    /// Registry index of the device
    pub fn index(&self) -> usize {
        self.index
    }

    /// Current state
    pub fn state(&self) -> UpdateState {
        self.state
    }

    /// Bank being programmed
    pub fn target(&self) -> ImageType {
        self.target
    }

    /// Rows written and rows total for the current image
    pub fn progress(&self) -> (u32, u32) {
        (self.rows.next(), self.rows.total())
    }

    /// Operations bound to the device
    pub fn ops_mut(&mut self) -> &mut dyn DeviceUpdateOps {
        self.ops.as_mut()
    }

    /// Fail without touching the device (nothing was started)
    pub fn fail(&mut self, reason: FailReason) {
        self.state = UpdateState::Failed(reason);
    }

    /// Perform one transition and return the new state
    pub fn step(&mut self, desc: &mut DeviceDescriptor, ctx: &mut StepContext<'_>) -> UpdateState {
        if self.state.is_terminal() {
            return self.state;
        }
        let from = self.state;
        let next = if ctx.abort {
            self.abort(desc, ctx)
        } else {
            match from {
                UpdateState::Idle => self.start(ctx),
                UpdateState::Querying => self.query(desc, ctx),
                UpdateState::Deferred => UpdateState::Querying,
                UpdateState::AwaitingPreparation => self.prepare(desc, ctx),
                UpdateState::Flashing { next_row } => self.flash(desc, ctx, next_row),
                UpdateState::Finishing => self.finish(desc, ctx),
                UpdateState::VerifyingVersion => self.verify(desc, ctx),
                UpdateState::JumpPending => self.jump(desc, ctx),
                UpdateState::Complete | UpdateState::Failed(_) => from,
            }
        };

        if next != from {
            log::debug!("device {}: {:?} -> {:?}", self.index, from, next);
        }
        if next.is_terminal() {
            self.release(ctx);
        }
        self.state = next;
        next
    }

    fn start(&mut self, ctx: &mut StepContext<'_>) -> UpdateState {
        let bus = &mut *ctx.bus;
        match self
            .ops
            .configure_hardware_interface(bus, true)
            .and_then(|_| self.ops.init(bus))
        {
            Ok(()) => UpdateState::Querying,
            Err(e) => {
                log::error!("device {}: init failed: {}", self.index, e);
                UpdateState::Failed(FailReason::QueryFailed)
            }
        }
    }

    fn query(&mut self, desc: &mut DeviceDescriptor, ctx: &mut StepContext<'_>) -> UpdateState {
        if self.ops.is_query_deferred(ctx.bus) {
            self.deferrals = self.deferrals.saturating_add(1);
            if self.deferrals >= ctx.config.max_passes {
                log::error!(
                    "device {}: still busy after {} passes",
                    self.index,
                    self.deferrals
                );
                return UpdateState::Failed(FailReason::DeferralExhausted);
            }
            log::info!("device {}: query deferred", self.index);
            return UpdateState::Deferred;
        }

        let q = match self.ops.check_firmware_version(ctx.bus) {
            Ok(q) => q,
            Err(e) => {
                log::error!("device {}: version query failed: {}", self.index, e);
                return UpdateState::Failed(FailReason::QueryFailed);
            }
        };
        desc.firmware = q.versions;
        desc.current_image = q.current_image;
        for image in [ImageType::Image1, ImageType::Image2] {
            if desc.status_of(image) == ImageStatus::Unknown && !q.versions.get(image).is_blank() {
                desc.set_status(image, ImageStatus::Valid);
            }
        }

        let Some(image) = ctx
            .package
            .image_for(desc.device_type, desc.component_id)
            .copied()
        else {
            log::info!("device {}: no image in package", self.index);
            return UpdateState::Complete;
        };

        let running = q.versions.get(q.current_image);
        if !ctx.force_update && !running.is_older_than(&image.version) {
            log::info!("device {}: {} is current", self.index, running);
            return UpdateState::Complete;
        }

        self.target = self.ops.device_update_logic(desc);
        self.rows = RowSequence::new(image.row_count());
        self.image = Some(image);
        log::info!(
            "device {}: {} -> {} into {:?}",
            self.index,
            running,
            image.version,
            self.target
        );
        UpdateState::AwaitingPreparation
    }

    fn prepare(&mut self, desc: &mut DeviceDescriptor, ctx: &mut StepContext<'_>) -> UpdateState {
        match self.ops.prepare_update(ctx.bus, self.target) {
            Ok(()) => {
                desc.set_status(self.target, ImageStatus::UpdateInProgress);
                UpdateState::Flashing { next_row: 0 }
            }
            Err(e) => self.retry_or_fail(
                desc,
                ctx,
                e,
                UpdateState::AwaitingPreparation,
                FailReason::PrepareFailed,
            ),
        }
    }

    fn flash(
        &mut self,
        desc: &mut DeviceDescriptor,
        ctx: &mut StepContext<'_>,
        row: u32,
    ) -> UpdateState {
        let Some(image) = self.image else {
            return UpdateState::Failed(FailReason::Package);
        };
        if self.rows.is_complete() {
            return UpdateState::Finishing;
        }
        if let Err(e) = self.rows.check(row) {
            log::error!("device {}: {}", self.index, e);
            return self.invalidate(desc, ctx, FailReason::RowWriteFailed { row });
        }
        let package = ctx.package;
        let Some(data) = package.row(&image, row) else {
            return self.invalidate(desc, ctx, FailReason::Package);
        };
        let Some(absolute) = u16::try_from(row)
            .ok()
            .and_then(|r| image.start_row.checked_add(r))
        else {
            return self.invalidate(desc, ctx, FailReason::Package);
        };

        match self.ops.flash_row(ctx.bus, self.target, absolute, data) {
            Ok(()) => {
                self.rows.record(row);
                if self.rows.is_complete() {
                    UpdateState::Finishing
                } else {
                    UpdateState::Flashing { next_row: row + 1 }
                }
            }
            Err(e) => self.retry_or_fail(
                desc,
                ctx,
                e,
                UpdateState::Flashing { next_row: row },
                FailReason::RowWriteFailed { row },
            ),
        }
    }

    fn finish(&mut self, desc: &mut DeviceDescriptor, ctx: &mut StepContext<'_>) -> UpdateState {
        self.rows.seal();
        match self.ops.finish_update(ctx.bus, self.target, true) {
            Ok(()) => UpdateState::VerifyingVersion,
            Err(e) => self.retry_or_fail(
                desc,
                ctx,
                e,
                UpdateState::Finishing,
                FailReason::FinishFailed,
            ),
        }
    }

    fn verify(&mut self, desc: &mut DeviceDescriptor, ctx: &mut StepContext<'_>) -> UpdateState {
        let Some(image) = self.image else {
            return UpdateState::Failed(FailReason::Package);
        };
        let q = match self.ops.check_firmware_version(ctx.bus) {
            Ok(q) => q,
            Err(e) => {
                log::error!("device {}: verification read failed: {}", self.index, e);
                desc.set_status(self.target, ImageStatus::Invalid);
                return UpdateState::Failed(FailReason::QueryFailed);
            }
        };
        desc.firmware = q.versions;

        let written = q.versions.get(self.target);
        if written != image.version {
            log::error!(
                "device {}: expected {} after update, read {}",
                self.index,
                image.version,
                written
            );
            desc.set_status(self.target, ImageStatus::Invalid);
            return UpdateState::Failed(FailReason::VersionMismatch);
        }

        desc.set_status(self.target, ImageStatus::Valid);
        if self.ops.skip_jump_to_alternate_request(desc) {
            UpdateState::Complete
        } else {
            UpdateState::JumpPending
        }
    }

    fn jump(&mut self, desc: &mut DeviceDescriptor, ctx: &mut StepContext<'_>) -> UpdateState {
        match self.ops.jump_to_alternate(ctx.bus, self.target) {
            Ok(()) => {
                desc.current_image = self.target;
                UpdateState::Complete
            }
            Err(e) => {
                log::error!("device {}: jump to {:?} failed: {}", self.index, self.target, e);
                UpdateState::Failed(FailReason::JumpRejected)
            }
        }
    }

    fn abort(&mut self, desc: &mut DeviceDescriptor, ctx: &mut StepContext<'_>) -> UpdateState {
        log::warn!("device {}: aborted in {:?}", self.index, self.state);
        if self.state.bank_dirty() {
            return self.invalidate(desc, ctx, FailReason::Aborted);
        }
        UpdateState::Failed(FailReason::Aborted)
    }

    /// Count a failed attempt; stay in `retry` while below the limit
    fn retry_or_fail(
        &mut self,
        desc: &mut DeviceDescriptor,
        ctx: &mut StepContext<'_>,
        err: Error,
        retry: UpdateState,
        reason: FailReason,
    ) -> UpdateState {
        desc.update_attempt_count = desc.update_attempt_count.saturating_add(1);
        if desc.update_attempt_count < ctx.config.attempt_limit {
            log::warn!(
                "device {}: {} (attempt {}/{}), retrying",
                self.index,
                err,
                desc.update_attempt_count,
                ctx.config.attempt_limit
            );
            return retry;
        }
        log::error!("device {}: {}, giving up", self.index, err);
        if self.state.bank_dirty() || matches!(retry, UpdateState::AwaitingPreparation) {
            self.invalidate(desc, ctx, reason)
        } else {
            UpdateState::Failed(reason)
        }
    }

    /// Mark the target bank as failed and tell the device to discard it
    fn invalidate(
        &mut self,
        desc: &mut DeviceDescriptor,
        ctx: &mut StepContext<'_>,
        reason: FailReason,
    ) -> UpdateState {
        self.rows.seal();
        if let Err(e) = self.ops.finish_update(ctx.bus, self.target, false) {
            log::warn!("device {}: invalidating {:?}: {}", self.index, self.target, e);
        }
        desc.set_status(self.target, ImageStatus::UpdateFailed);
        UpdateState::Failed(reason)
    }

    fn release(&mut self, ctx: &mut StepContext<'_>) {
        let bus = &mut *ctx.bus;
        let result: Result<()> = self
            .ops
            .deinit(bus)
            .and_then(|_| self.ops.configure_hardware_interface(bus, false));
        if let Err(e) = result {
            log::warn!("device {}: release failed: {}", self.index, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessParams;
    use crate::device::{DeviceType, FirmwareVersion, ImageMode};
    use crate::package::{PackageBuilder, PackageImage, PackageValidator, SecurityPolicy};
    use crate::platform::RejectAll;
    use crate::testing::{Call, MockDevice, NullBus, ScriptedOps};
    use alloc::rc::Rc;
    use alloc::vec;
    use alloc::vec::Vec;
    use core::cell::RefCell;

    const OLD: FirmwareVersion = FirmwareVersion::from_bytes([1, 0, 0, 0x10, 0, 0, 0, 0]);
    const NEW: FirmwareVersion = FirmwareVersion::from_bytes([2, 0, 0, 0x10, 0, 0, 0, 0]);

    fn package(rows: usize) -> ValidatedPackage {
        let bytes = PackageBuilder::new(1)
            .image(PackageImage {
                device_type: DeviceType::Ccg5,
                component_id: 0,
                critical: false,
                row_size: 64,
                start_row: 0x20,
                version: NEW,
                data: vec![0x5A; 64 * rows],
            })
            .build()
            .unwrap();
        PackageValidator::new(&UpdateConfig::default(), SecurityPolicy::default())
            .validate(bytes, &RejectAll)
            .unwrap()
    }

    fn desc(mode: ImageMode) -> DeviceDescriptor {
        DeviceDescriptor::new(
            DeviceType::Ccg5,
            0,
            mode,
            AccessParams::I2cDirect {
                address: 0x40,
                intr_gpio: 1,
            },
        )
    }

    struct Harness {
        machine: DeviceUpdateMachine,
        device: Rc<RefCell<MockDevice>>,
        desc: DeviceDescriptor,
        package: ValidatedPackage,
        config: UpdateConfig,
        force: bool,
        abort: bool,
        trace: Vec<UpdateState>,
    }

    impl Harness {
        fn new(mock: MockDevice, mode: ImageMode, rows: usize) -> Self {
            let (ops, device) = ScriptedOps::new(mock);
            Self {
                machine: DeviceUpdateMachine::new(0, Box::new(ops)),
                device,
                desc: desc(mode),
                package: package(rows),
                config: UpdateConfig::default(),
                force: false,
                abort: false,
                trace: Vec::new(),
            }
        }

        fn step(&mut self) -> UpdateState {
            let mut bus = NullBus;
            let mut ctx = StepContext {
                bus: &mut bus,
                package: &self.package,
                config: &self.config,
                force_update: self.force,
                abort: self.abort,
            };
            let s = self.machine.step(&mut self.desc, &mut ctx);
            self.trace.push(s);
            s
        }

        fn run(&mut self) -> UpdateState {
            for _ in 0..1000 {
                let s = self.step();
                if s.is_terminal() || s == UpdateState::Deferred {
                    return s;
                }
            }
            panic!("machine did not settle");
        }
    }

    fn updating() -> MockDevice {
        MockDevice {
            installs: Some(NEW),
            ..MockDevice::running(OLD)
        }
    }

    #[test]
    fn test_current_device_completes_without_flashing() {
        let mut h = Harness::new(MockDevice::running(NEW), ImageMode::Single, 2);
        assert_eq!(h.run(), UpdateState::Complete);
        assert_eq!(h.trace[..2], [UpdateState::Querying, UpdateState::Complete]);
        assert!(!h.device.borrow().flashed());
        assert_eq!(h.desc.update_attempt_count, 0);
    }

    #[test]
    fn test_single_image_update() {
        let mut h = Harness::new(updating(), ImageMode::Single, 3);
        assert_eq!(h.run(), UpdateState::Complete);
        let d = h.device.borrow();
        assert_eq!(d.rows_written(), [0x20, 0x21, 0x22]);
        assert!(d.calls.contains(&Call::Finish(true)));
        assert!(!d.calls.iter().any(|c| matches!(c, Call::Jump(_))));
        assert_eq!(h.desc.status_of(ImageType::Image1), ImageStatus::Valid);
        assert_eq!(h.machine.progress(), (3, 3));
    }

    #[test]
    fn test_dual_image_update_jumps() {
        let mut h = Harness::new(updating(), ImageMode::DualSymmetric, 1);
        assert_eq!(h.run(), UpdateState::Complete);
        assert_eq!(h.machine.target(), ImageType::Image2);
        assert!(h.trace.contains(&UpdateState::JumpPending));
        assert_eq!(h.desc.current_image, ImageType::Image2);
        assert_eq!(
            h.device.borrow().calls.last(),
            Some(&Call::Deinit),
        );
    }

    #[test]
    fn test_prepare_fails_twice_then_flashes() {
        let mock = MockDevice {
            prepare_failures: 2,
            ..updating()
        };
        let mut h = Harness::new(mock, ImageMode::Single, 2);
        let mut state = UpdateState::Idle;
        while !matches!(state, UpdateState::Flashing { .. }) {
            state = h.step();
            assert!(!state.is_terminal());
        }
        assert_eq!(state, UpdateState::Flashing { next_row: 0 });
        assert_eq!(h.desc.update_attempt_count, 2);
    }

    #[test]
    fn test_prepare_exhausts_attempts() {
        let mock = MockDevice {
            prepare_failures: 5,
            ..updating()
        };
        let mut h = Harness::new(mock, ImageMode::Single, 2);
        assert_eq!(h.run(), UpdateState::Failed(FailReason::PrepareFailed));
        assert_eq!(h.desc.update_attempt_count, 3);
        assert_eq!(h.desc.status_of(ImageType::Image1), ImageStatus::UpdateFailed);
    }

    #[test]
    fn test_row_retry_same_row() {
        let mut mock = updating();
        mock.row_failures.insert(0x21, 1);
        let mut h = Harness::new(mock, ImageMode::Single, 3);
        assert_eq!(h.run(), UpdateState::Complete);
        assert_eq!(h.device.borrow().rows_written(), [0x20, 0x21, 0x21, 0x22]);
        assert_eq!(h.desc.update_attempt_count, 1);
    }

    #[test]
    fn test_row_failure_invalidates_image() {
        let mut mock = updating();
        mock.row_failures.insert(0x21, 9);
        let mut h = Harness::new(mock, ImageMode::Single, 3);
        assert_eq!(
            h.run(),
            UpdateState::Failed(FailReason::RowWriteFailed { row: 1 })
        );
        let d = h.device.borrow();
        assert!(d.calls.contains(&Call::Finish(false)));
        assert!(!d.rows_written().contains(&0x22));
        assert_eq!(h.desc.status_of(ImageType::Image1), ImageStatus::UpdateFailed);
    }

    #[test]
    fn test_version_mismatch_not_complete() {
        let mock = MockDevice {
            installs: None,
            ..MockDevice::running(OLD)
        };
        let mut h = Harness::new(mock, ImageMode::Single, 1);
        assert_eq!(h.run(), UpdateState::Failed(FailReason::VersionMismatch));
        assert!(!h.trace.contains(&UpdateState::Complete));
    }

    #[test]
    fn test_jump_rejected() {
        let mock = MockDevice {
            reject_jump: true,
            ..updating()
        };
        let mut h = Harness::new(mock, ImageMode::DualAsymmetric, 1);
        assert_eq!(h.run(), UpdateState::Failed(FailReason::JumpRejected));
    }

    #[test]
    fn test_force_update_reflashes_current() {
        let mock = MockDevice {
            installs: Some(NEW),
            ..MockDevice::running(NEW)
        };
        let mut h = Harness::new(mock, ImageMode::Single, 1);
        h.force = true;
        assert_eq!(h.run(), UpdateState::Complete);
        assert!(h.device.borrow().flashed());
    }

    #[test]
    fn test_deferral_then_exhaustion() {
        let mock = MockDevice {
            deferrals: 10,
            ..updating()
        };
        let mut h = Harness::new(mock, ImageMode::Single, 1);
        assert_eq!(h.run(), UpdateState::Deferred);
        assert_eq!(h.run(), UpdateState::Deferred);
        assert_eq!(h.run(), UpdateState::Failed(FailReason::DeferralExhausted));
        assert!(!h.device.borrow().flashed());
    }

    #[test]
    fn test_abort_between_rows() {
        let mut h = Harness::new(updating(), ImageMode::Single, 4);
        while h.step() != (UpdateState::Flashing { next_row: 2 }) {}
        h.abort = true;
        assert_eq!(h.step(), UpdateState::Failed(FailReason::Aborted));
        let d = h.device.borrow();
        assert_eq!(d.rows_written(), [0x20, 0x21]);
        assert!(d.calls.contains(&Call::Finish(false)));
    }

    #[test]
    fn test_query_failure() {
        let mock = MockDevice {
            query_fails: true,
            ..updating()
        };
        let mut h = Harness::new(mock, ImageMode::Single, 1);
        assert_eq!(h.run(), UpdateState::Failed(FailReason::QueryFailed));
        assert_eq!(h.desc.update_attempt_count, 0);
    }

    #[test]
    fn test_device_without_image_completes() {
        let mut h = Harness::new(updating(), ImageMode::Single, 1);
        h.desc.component_id = 7;
        assert_eq!(h.run(), UpdateState::Complete);
        assert!(!h.device.borrow().flashed());
    }
}
