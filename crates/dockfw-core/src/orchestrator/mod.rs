//! Dock-level update orchestration
//!
//! The [`Orchestrator`] owns the dock buses, the persisted metadata and the
//! fault log. A session picks a package, builds one
//! [`DeviceUpdateMachine`] per eligible device and then advances exactly one
//! machine by one transition per [`Orchestrator::poll`]. Devices are handled
//! strictly one after another; a device that asks to be deferred is parked
//! until the next sweep over the dock.
//!
//! Phase gating: without `TRIGGER_PHASE2` only non-critical devices are
//! updated and pending critical images raise `CONSIDER_CRITICAL_UPDATE`. A
//! device is critical when its descriptor says so or its package image
//! carries the critical flag.
//! With it set, every device is eligible and a completed session clears both
//! flags and requests a dock reset if anything was flashed.

mod abort;

pub use abort::AbortHandle;

pub use crate::package::PackageLocations;

use alloc::vec::Vec;

use crate::config::UpdateConfig;
use crate::device::OpsTable;
use crate::error::{Error, MalformedPackage, PackageError, Result};
use crate::flash_log::FaultLog;
use crate::package::{
    backup_to_factory, read_package, select_candidate, AppStatus, Candidate, DockMetadata,
    ImageFlags, NoCandidate, PackageStore, PackageValidator, SecurityPolicy, ValidatedPackage,
};
use crate::platform::{
    status_opcode, AppEvent, LedMode, Platform, RowFlash, SignatureVerifier, StatusReport,
};
use crate::programmer::DockBus;
use crate::registry::{DockRegistry, DockStatus};
use crate::update::{DeviceUpdateMachine, FailReason, StepContext, UpdateState};

/// Outcome of one [`Orchestrator::poll`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    /// No session is running
    Idle,
    /// A device made one transition
    Stepped {
        /// Registry index of the device
        index: usize,
        /// Its new state
        state: UpdateState,
    },
    /// The session ended
    Finished(SessionSummary),
}

/// Totals of a finished session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionSummary {
    /// Final dock status
    pub status: DockStatus,
    /// Devices flashed and verified
    pub updated: usize,
    /// Devices already current
    pub current: usize,
    /// Devices that failed
    pub failed: usize,
    /// Critical devices left for phase 2
    pub deferred_critical: usize,
    /// Session was aborted
    pub aborted: bool,
}

/// Per-device bookkeeping for one session
#[derive(Debug)]
struct Slot {
    machine: Option<DeviceUpdateMachine>,
    state: UpdateState,
    flashed: bool,
    critical_pending: bool,
}

impl Slot {
    fn parked(state: UpdateState) -> Self {
        Self {
            machine: None,
            state,
            flashed: false,
            critical_pending: false,
        }
    }
}

#[derive(Debug)]
struct Session {
    package: ValidatedPackage,
    source: Candidate,
    phase2: bool,
    slots: Vec<Slot>,
    cursor: usize,
    sweep: u8,
}

/// Drives firmware updates of every device on a dock
pub struct Orchestrator<B, P, V, F> {
    config: UpdateConfig,
    bus: B,
    ops: OpsTable,
    platform: P,
    verifier: V,
    flash: F,
    metadata: DockMetadata,
    fault_log: FaultLog,
    registry: DockRegistry,
    session: Option<Session>,
    last_states: Vec<UpdateState>,
    abort: AbortHandle,
}

impl<B, P, V, F> core::fmt::Debug for Orchestrator<B, P, V, F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("metadata", &self.metadata)
            .field("registry", &self.registry)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl<B, P, V, F> Orchestrator<B, P, V, F>
where
    B: DockBus,
    P: Platform,
    V: SignatureVerifier,
    F: RowFlash,
{
    /// Create an orchestrator, loading metadata and the fault log from `flash`
    pub fn new(
        config: UpdateConfig,
        bus: B,
        ops: OpsTable,
        platform: P,
        verifier: V,
        mut flash: F,
    ) -> Result<Self> {
        let metadata = DockMetadata::load(&mut flash, config.metadata_row)?;
        let fault_log = FaultLog::load(&mut flash, &config)?;
        log::debug!(
            "metadata: {} update(s), {} phase 2, flags {:?}",
            metadata.update_counter,
            metadata.phase2_update_counter,
            metadata.app_status
        );
        Ok(Self {
            config,
            bus,
            ops,
            platform,
            verifier,
            flash,
            metadata,
            fault_log,
            registry: DockRegistry::default(),
            session: None,
            last_states: Vec::new(),
            abort: AbortHandle::new(),
        })
    }

    /// Start an update session over `registry`
    ///
    /// Selects a package from `store`; nothing is flashed if neither
    /// candidate validates. In phase 2 on a dock in factory condition the
    /// selected package is first copied to the factory area.
    pub fn start_update_session(
        &mut self,
        registry: DockRegistry,
        store: &mut dyn PackageStore,
        locations: PackageLocations,
    ) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::SessionActive);
        }
        self.abort.reset();
        self.registry = registry;
        self.last_states = alloc::vec![UpdateState::Idle; self.registry.device_count()];
        for i in 0..self.registry.device_count() {
            if let Some(d) = self.registry.device_mut(i) {
                d.update_attempt_count = 0;
            }
        }

        let phase2 = self.metadata.app_status.contains(AppStatus::TRIGGER_PHASE2);
        self.metadata.bump_update_counter();
        if phase2 {
            self.metadata.bump_phase2_counter();
            self.platform.app_event(AppEvent::Phase2UpdateStarts);
        }
        self.set_status(if phase2 {
            DockStatus::Phase2InProgress
        } else {
            DockStatus::Phase1InProgress
        });
        self.platform.led_set_mode(LedMode::Blinking);
        log::info!(
            "update session {} started (phase {})",
            self.metadata.update_counter,
            if phase2 { 2 } else { 1 }
        );

        let validator = PackageValidator::new(
            &self.config,
            SecurityPolicy {
                secured_only: self.metadata.secured_only,
                secure_boot: self.platform.is_secure_boot(),
            },
        );
        let selected = match select_candidate(
            store,
            &locations,
            &self.metadata,
            &validator,
            &self.verifier,
        ) {
            Ok(s) => s,
            Err(none) => {
                log::error!("no usable package: {:?}", none);
                let auth = none.auth_failed();
                if auth {
                    self.fault_log.record_auth_fail(phase2);
                }
                let (status, err) = match none {
                    NoCandidate::Factory(e) => (DockStatus::NoValidFactoryPackage, e),
                    NoCandidate::Both { primary, factory } => {
                        let status = if auth {
                            DockStatus::AuthenticationFailed
                        } else {
                            DockStatus::NoValidPackage
                        };
                        // An empty factory area is not a candidate; report the primary's defect.
                        let err = match factory {
                            PackageError::Malformed(MalformedPackage::BadMagic) => primary,
                            _ => PackageError::NoValidCandidate,
                        };
                        (status, err)
                    }
                };
                self.end_without_devices(status)?;
                return Err(err.into());
            }
        };
        if let Some((candidate, reason)) = selected.rejected {
            log::warn!("{:?} package rejected ({}), using {:?}", candidate, reason, selected.source);
        }
        if phase2 {
            self.platform.app_event(AppEvent::Phase2AuthSuccess);
        }

        if phase2 && self.platform.is_in_factory_condition() && selected.source == Candidate::Primary {
            let factory_valid = read_package(
                store,
                locations.factory_addr,
                validator.limits().max_package_size,
            )
            .and_then(|bytes| validator.validate(bytes, &self.verifier))
            .is_ok();
            if !factory_valid {
                self.set_status(DockStatus::Phase2FactoryBackup);
                self.platform.app_event(AppEvent::FactoryBackupStarted);
                if let Err(e) = backup_to_factory(store, &locations, &selected.package) {
                    log::error!("factory backup failed: {}", e);
                    self.platform.app_event(AppEvent::FactoryBackupNotDone);
                    self.end_without_devices(DockStatus::FactoryBackupFailed)?;
                    return Err(e);
                }
                log::info!("package backed up to factory area");
                self.set_status(DockStatus::Phase2InProgress);
            }
        }

        let limits = self.config.access_limits();
        let mut slots = Vec::with_capacity(self.registry.device_count());
        for index in 0..self.registry.device_count() {
            let Some(desc) = self.registry.device_mut(index) else {
                continue;
            };
            let image = selected
                .package
                .image_for(desc.device_type, desc.component_id);
            let critical =
                desc.critical || image.is_some_and(|i| i.flags.contains(ImageFlags::CRITICAL));
            if critical && !phase2 {
                let pending = image.is_some();
                if pending {
                    log::info!("device {}: critical, left for phase 2", index);
                }
                slots.push(Slot {
                    critical_pending: pending,
                    ..Slot::parked(UpdateState::Idle)
                });
                continue;
            }

            let created = desc
                .access
                .bind(&limits)
                .and_then(|handle| self.ops.create(desc.device_type, &handle))
                .and_then(|mut ops| {
                    ops.init_device_param(desc)?;
                    Ok(ops)
                });
            match created {
                Ok(ops) => slots.push(Slot {
                    machine: Some(DeviceUpdateMachine::new(index, ops)),
                    ..Slot::parked(UpdateState::Idle)
                }),
                Err(e) => {
                    log::error!("device {}: {}", index, e);
                    slots.push(Slot::parked(UpdateState::Failed(
                        FailReason::InvalidAccessConfig,
                    )));
                    self.fault_log.record_fw_update_fail(index as u8);
                    self.report(status_opcode::DEVICE_FAILED, index as u8);
                }
            }
        }

        self.metadata.store(&mut self.flash, self.config.metadata_row)?;
        self.fault_log.flush(&mut self.flash)?;
        self.session = Some(Session {
            package: selected.package,
            source: selected.source,
            phase2,
            slots,
            cursor: 0,
            sweep: 1,
        });
        Ok(())
    }

    /// Advance the session by one device transition
    pub fn poll(&mut self) -> Result<PollResult> {
        let Some(mut session) = self.session.take() else {
            return Ok(PollResult::Idle);
        };
        let result = self.advance(&mut session);
        match result {
            Ok(PollResult::Finished(_)) => {}
            _ => self.session = Some(session),
        }
        result
    }

    /// Poll until the session ends
    pub fn run(&mut self) -> Result<SessionSummary> {
        if self.session.is_none() {
            return Err(Error::NoSession);
        }
        loop {
            if let PollResult::Finished(summary) = self.poll()? {
                return Ok(summary);
            }
        }
    }

    fn advance(&mut self, session: &mut Session) -> Result<PollResult> {
        let abort = self.abort.is_aborted();
        loop {
            if session.cursor >= session.slots.len() {
                let deferred = session
                    .slots
                    .iter()
                    .any(|s| s.state == UpdateState::Deferred);
                if deferred && !abort {
                    session.sweep = session.sweep.saturating_add(1);
                    session.cursor = 0;
                    log::info!("starting sweep {} for deferred devices", session.sweep);
                    self.set_status(if session.phase2 {
                        DockStatus::Phase2Partial
                    } else {
                        DockStatus::Phase1Partial
                    });
                    continue;
                }
                return self.finish(session).map(PollResult::Finished);
            }

            let slot = &mut session.slots[session.cursor];
            let runnable = slot.machine.is_some() && !slot.state.is_terminal();
            if !runnable {
                session.cursor += 1;
                continue;
            }
            if abort && matches!(slot.state, UpdateState::Idle | UpdateState::Deferred) {
                // Not started in this sweep: abort the rest of the dock untouched.
                let start = session.cursor;
                for (index, s) in session.slots.iter_mut().enumerate().skip(start) {
                    if s.machine.is_some() && !s.state.is_terminal() {
                        if let Some(m) = s.machine.as_mut() {
                            m.fail(FailReason::Aborted);
                        }
                        s.state = UpdateState::Failed(FailReason::Aborted);
                        self.fault_log.record_fw_update_fail(index as u8);
                    }
                }
                self.fault_log.flush(&mut self.flash)?;
                session.cursor = session.slots.len();
                continue;
            }
            break;
        }

        let cursor = session.cursor;
        let slot = &mut session.slots[cursor];
        let Some(machine) = slot.machine.as_mut() else {
            return Err(Error::NoSession);
        };
        let index = machine.index();
        let Some(desc) = self.registry.device_mut(index) else {
            return Err(Error::NoSession);
        };

        let from = slot.state;
        let mut ctx = StepContext {
            bus: &mut self.bus,
            package: &session.package,
            config: &self.config,
            force_update: self.metadata.app_status.contains(AppStatus::FORCE_UPDATE),
            abort,
        };
        let to = machine.step(desc, &mut ctx);
        slot.state = to;
        if let Some(s) = self.last_states.get_mut(index) {
            *s = to;
        }

        if from == UpdateState::Querying && to == UpdateState::AwaitingPreparation {
            slot.flashed = true;
            self.platform.app_event(AppEvent::Phase2ImgUpdateStart);
        }
        let flashed = slot.flashed;
        match to {
            UpdateState::Complete => {
                if flashed {
                    log::info!("device {}: updated", index);
                    self.platform.app_event(AppEvent::Phase2ImageWriteSuccess);
                } else {
                    log::info!("device {}: up to date", index);
                }
                self.report(status_opcode::DEVICE_COMPLETE, index as u8);
            }
            UpdateState::Failed(reason) => {
                log::error!("device {}: update failed: {}", index, reason);
                self.fault_log.record_fw_update_fail(index as u8);
                self.fault_log.flush(&mut self.flash)?;
                if flashed {
                    self.platform.app_event(AppEvent::Phase2ImageWriteFail);
                }
                self.platform.app_event(AppEvent::FwUpdateFail);
                self.report(status_opcode::DEVICE_FAILED, index as u8);
            }
            _ => {}
        }
        if to.is_terminal() || to == UpdateState::Deferred {
            session.cursor += 1;
        }

        Ok(PollResult::Stepped { index, state: to })
    }

    fn finish(&mut self, session: &mut Session) -> Result<SessionSummary> {
        let aborted = self.abort.is_aborted();
        let mut summary = SessionSummary {
            aborted,
            ..SessionSummary::default()
        };
        let mut eligible = 0;
        for slot in &session.slots {
            match slot.state {
                UpdateState::Complete if slot.flashed => summary.updated += 1,
                UpdateState::Complete => summary.current += 1,
                UpdateState::Failed(_) => summary.failed += 1,
                _ => {}
            }
            if slot.critical_pending {
                summary.deferred_critical += 1;
            }
            if slot.machine.is_some() || slot.state.is_terminal() {
                eligible += 1;
            }
        }

        let success = !aborted && summary.failed == 0;
        let status = if aborted {
            DockStatus::Aborted
        } else if session.phase2 {
            if success {
                DockStatus::Phase2CompleteFull
            } else {
                DockStatus::Phase2CompletePartial
            }
        } else if eligible > 0 && summary.failed == eligible {
            DockStatus::Phase1Fail
        } else if success {
            DockStatus::Phase1CompleteFullPhase2NotDone
        } else {
            DockStatus::Phase1CompletePartial
        };
        summary.status = status;
        self.last_states = session.slots.iter().map(|s| s.state).collect();

        if session.phase2 {
            if !aborted {
                self.metadata
                    .app_status
                    .remove(AppStatus::TRIGGER_PHASE2 | AppStatus::CONSIDER_CRITICAL_UPDATE);
            }
            self.platform.app_event(AppEvent::Phase2UpdateEnds);
            if summary.updated > 0 {
                log::info!("requesting dock reset");
                self.platform.app_event(AppEvent::DockReset);
                self.platform.init_dock_reset();
            }
        } else if summary.deferred_critical > 0 && !aborted {
            self.metadata
                .app_status
                .insert(AppStatus::CONSIDER_CRITICAL_UPDATE);
            self.platform.app_event(AppEvent::PendingUpdates);
        }
        self.metadata.app_status.remove(AppStatus::FORCE_UPDATE);

        log::info!(
            "session ended from {:?} package: {:?}, {} updated, {} current, {} failed",
            session.source,
            status,
            summary.updated,
            summary.current,
            summary.failed
        );
        self.set_status(status);
        self.platform.led_set_mode(if success {
            LedMode::On
        } else {
            LedMode::Breathing
        });
        self.platform.update_complete(success);
        self.metadata.store(&mut self.flash, self.config.metadata_row)?;
        self.fault_log.flush(&mut self.flash)?;
        Ok(summary)
    }

    /// Close a session that never reached the devices
    fn end_without_devices(&mut self, status: DockStatus) -> Result<()> {
        self.set_status(status);
        self.platform.led_set_mode(LedMode::Breathing);
        self.platform.app_event(AppEvent::FwUpdateFail);
        self.platform.update_complete(false);
        self.metadata.store(&mut self.flash, self.config.metadata_row)?;
        self.fault_log.flush(&mut self.flash)
    }

    fn set_status(&mut self, status: DockStatus) {
        if self.registry.dock_status != status {
            self.registry.dock_status = status;
            self.metadata.status = status;
            self.platform.app_event(AppEvent::StateChange);
            self.report(status_opcode::DOCK_STATUS, status as u8);
        }
    }

    fn report(&mut self, opcode: u8, data: u8) {
        self.platform
            .send_status(StatusReport { opcode, data }.to_bytes());
    }

    /// Update state of the device at `index`
    pub fn device_status(&self, index: usize) -> Option<UpdateState> {
        if let Some(session) = &self.session {
            return session.slots.get(index).map(|s| s.state);
        }
        if index < self.registry.device_count() {
            Some(self.last_states.get(index).copied().unwrap_or_default())
        } else {
            None
        }
    }

    /// Device currently being updated, with rows written and total
    pub fn active_device(&self) -> Option<(usize, UpdateState, (u32, u32))> {
        let session = self.session.as_ref()?;
        let slot = session.slots.get(session.cursor)?;
        let machine = slot.machine.as_ref()?;
        Some((machine.index(), slot.state, machine.progress()))
    }

    /// Overall dock status
    pub fn dock_status(&self) -> DockStatus {
        self.registry.dock_status
    }

    /// Session in progress
    pub fn in_session(&self) -> bool {
        self.session.is_some()
    }

    /// Request an abort; honoured at the next state boundary
    pub fn abort(&self) {
        self.abort.abort();
    }

    /// Handle that can abort the session from elsewhere
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Arm phase 2 for the next session
    pub fn trigger_phase2(&mut self) -> Result<()> {
        self.metadata.app_status.insert(AppStatus::TRIGGER_PHASE2);
        self.metadata.store(&mut self.flash, self.config.metadata_row)
    }

    /// Update devices even when they already run the package version
    pub fn set_force_update(&mut self, force: bool) -> Result<()> {
        self.metadata.app_status.set(AppStatus::FORCE_UPDATE, force);
        self.metadata.store(&mut self.flash, self.config.metadata_row)
    }

    /// Choose which candidate is tried first
    pub fn set_factory_candidate(&mut self, factory: bool) -> Result<()> {
        self.metadata
            .app_status
            .set(AppStatus::FACTORY_CANDIDATE, factory);
        self.metadata.store(&mut self.flash, self.config.metadata_row)
    }

    /// Persisted fault log
    pub fn fault_log(&self) -> &FaultLog {
        &self.fault_log
    }

    /// Mutable fault log, for faults raised outside an update
    pub fn fault_log_mut(&mut self) -> &mut FaultLog {
        &mut self.fault_log
    }

    /// Persisted dock metadata
    pub fn metadata(&self) -> &DockMetadata {
        &self.metadata
    }

    /// Dock registry of the last session
    pub fn registry(&self) -> &DockRegistry {
        &self.registry
    }

    /// Session tunables
    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    /// Board services
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Dock buses
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Internal flash
    pub fn flash(&self) -> &F {
        &self.flash
    }

    /// Take the orchestrator apart
    pub fn into_parts(self) -> (B, P, F) {
        (self.bus, self.platform, self.flash)
    }
}
