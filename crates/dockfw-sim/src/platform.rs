//! Board services of the emulated dock

use dockfw_core::platform::{status_opcode, AppEvent, LedMode, Platform};
use dockfw_core::registry::DockStatus;

/// Platform that records every notification
#[derive(Debug, Clone, Default)]
pub struct SimPlatform {
    factory_condition: bool,
    secure_boot: bool,
    led: Option<LedMode>,
    events: Vec<AppEvent>,
    reports: Vec<[u8; 3]>,
    resets: u32,
    completed: Option<bool>,
}

impl SimPlatform {
    /// Platform with the given boot conditions
    pub fn new(factory_condition: bool, secure_boot: bool) -> Self {
        Self {
            factory_condition,
            secure_boot,
            ..Self::default()
        }
    }

    /// Last LED pattern driven
    pub fn led(&self) -> Option<LedMode> {
        self.led
    }

    /// Application events in the order raised
    pub fn events(&self) -> &[AppEvent] {
        &self.events
    }

    /// Interrupt endpoint reports in the order queued
    pub fn reports(&self) -> &[[u8; 3]] {
        &self.reports
    }

    /// Dock status values reported upstream
    pub fn status_trail(&self) -> Vec<DockStatus> {
        self.reports
            .iter()
            .filter(|r| r[0] == status_opcode::DOCK_STATUS)
            .filter_map(|r| DockStatus::from_u8(r[2]))
            .collect()
    }

    /// Dock resets requested
    pub fn resets(&self) -> u32 {
        self.resets
    }

    /// Outcome passed to the last `update_complete`
    pub fn completed(&self) -> Option<bool> {
        self.completed
    }
}

impl Platform for SimPlatform {
    fn init_dock_reset(&mut self) {
        log::info!("dock reset requested");
        self.resets += 1;
    }

    fn is_in_factory_condition(&self) -> bool {
        self.factory_condition
    }

    fn is_secure_boot(&self) -> bool {
        self.secure_boot
    }

    fn led_set_mode(&mut self, mode: LedMode) {
        log::debug!("led: {:?}", mode);
        self.led = Some(mode);
    }

    fn app_event(&mut self, event: AppEvent) {
        log::debug!("event: {:?}", event);
        self.events.push(event);
    }

    fn update_complete(&mut self, success: bool) {
        self.completed = Some(success);
    }

    fn send_status(&mut self, report: [u8; 3]) {
        log::trace!("status report {:02X?}", report);
        self.reports.push(report);
    }
}
