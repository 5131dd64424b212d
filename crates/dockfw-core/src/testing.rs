//! Scripted test doubles shared by the unit tests

use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::RefCell;

use crate::device::{
    DeviceDescriptor, DeviceQuery, DeviceUpdateOps, FirmwareVersion, FirmwareVersions, ImageType,
};
use crate::error::{Error, Result};
use crate::platform::{AppEvent, LedMode, Platform, RowFlash};
use crate::programmer::{DockBus, GpioControl, I2cMaster, SpiMaster};
use crate::spi::SpiCommand;

/// Bus that fails every transfer; scripted devices never touch it
pub struct NullBus;

impl I2cMaster for NullBus {
    fn max_transfer_len(&self) -> usize {
        0
    }
    fn write(&mut self, _addr: u8, _data: &[u8]) -> Result<()> {
        Err(Error::I2cNack)
    }
    fn write_read(&mut self, _addr: u8, _data: &[u8], _buf: &mut [u8]) -> Result<()> {
        Err(Error::I2cNack)
    }
}

impl SpiMaster for NullBus {
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

impl GpioControl for NullBus {
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

impl DockBus for NullBus {
    fn i2c(&mut self) -> &mut dyn I2cMaster {
        self
    }
    fn spi(&mut self) -> &mut dyn SpiMaster {
        self
    }
    fn gpio(&mut self) -> &mut dyn GpioControl {
        self
    }
    fn delay_us(&mut self, _us: u32) {}
}

/// Operation calls seen by a scripted device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Init,
    Query,
    Prepare(ImageType),
    Row(u16),
    Finish(bool),
    Jump(ImageType),
    Deinit,
}

/// Behaviour and observations of a scripted device
#[derive(Debug, Default)]
pub struct MockDevice {
    pub versions: FirmwareVersions,
    pub current: Option<ImageType>,
    /// Version the target bank reports after a successful finish
    pub installs: Option<FirmwareVersion>,
    pub deferrals: u8,
    pub query_fails: bool,
    pub prepare_failures: u8,
    pub row_failures: BTreeMap<u16, u8>,
    pub finish_failures: u8,
    pub reject_jump: bool,
    pub calls: Vec<Call>,
}

impl MockDevice {
    pub fn running(version: FirmwareVersion) -> Self {
        Self {
            versions: FirmwareVersions {
                image1: version,
                ..FirmwareVersions::default()
            },
            current: Some(ImageType::Image1),
            ..Self::default()
        }
    }

    pub fn rows_written(&self) -> Vec<u16> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Row(r) => Some(*r),
                _ => None,
            })
            .collect()
    }

    pub fn flashed(&self) -> bool {
        self.calls
            .iter()
            .any(|c| matches!(c, Call::Prepare(_) | Call::Row(_)))
    }
}

/// [`DeviceUpdateOps`] driven by a shared [`MockDevice`]
pub struct ScriptedOps(pub Rc<RefCell<MockDevice>>);

impl ScriptedOps {
    pub fn new(device: MockDevice) -> (Self, Rc<RefCell<MockDevice>>) {
        let shared = Rc::new(RefCell::new(device));
        (Self(shared.clone()), shared)
    }
}

fn countdown(n: &mut u8) -> bool {
    if *n > 0 {
        *n -= 1;
        true
    } else {
        false
    }
}

impl DeviceUpdateOps for ScriptedOps {
    fn init(&mut self, _bus: &mut dyn DockBus) -> Result<()> {
        self.0.borrow_mut().calls.push(Call::Init);
        Ok(())
    }

    fn deinit(&mut self, _bus: &mut dyn DockBus) -> Result<()> {
        self.0.borrow_mut().calls.push(Call::Deinit);
        Ok(())
    }

    fn check_firmware_version(&mut self, _bus: &mut dyn DockBus) -> Result<DeviceQuery> {
        let mut d = self.0.borrow_mut();
        d.calls.push(Call::Query);
        if d.query_fails {
            return Err(Error::I2cNack);
        }
        Ok(DeviceQuery {
            versions: d.versions,
            current_image: d.current.unwrap_or(ImageType::Bootloader),
        })
    }

    fn is_query_deferred(&mut self, _bus: &mut dyn DockBus) -> bool {
        countdown(&mut self.0.borrow_mut().deferrals)
    }

    fn prepare_update(&mut self, _bus: &mut dyn DockBus, image: ImageType) -> Result<()> {
        let mut d = self.0.borrow_mut();
        d.calls.push(Call::Prepare(image));
        if countdown(&mut d.prepare_failures) {
            return Err(Error::PrepareFailed);
        }
        Ok(())
    }

    fn flash_row(
        &mut self,
        _bus: &mut dyn DockBus,
        _image: ImageType,
        row: u16,
        _data: &[u8],
    ) -> Result<()> {
        let mut d = self.0.borrow_mut();
        d.calls.push(Call::Row(row));
        if let Some(n) = d.row_failures.get_mut(&row) {
            if countdown(n) {
                return Err(Error::RowWriteFailed);
            }
        }
        Ok(())
    }

    fn finish_update(
        &mut self,
        _bus: &mut dyn DockBus,
        image: ImageType,
        success: bool,
    ) -> Result<()> {
        let mut d = self.0.borrow_mut();
        d.calls.push(Call::Finish(success));
        if success && countdown(&mut d.finish_failures) {
            return Err(Error::FinishFailed);
        }
        if success {
            if let Some(v) = d.installs {
                d.versions.set(image, v);
            }
        }
        Ok(())
    }

    fn jump_to_alternate(&mut self, _bus: &mut dyn DockBus, image: ImageType) -> Result<()> {
        let mut d = self.0.borrow_mut();
        d.calls.push(Call::Jump(image));
        if d.reject_jump {
            return Err(Error::JumpRejected);
        }
        d.current = Some(image);
        Ok(())
    }

    fn skip_jump_to_alternate_request(&self, desc: &DeviceDescriptor) -> bool {
        !desc.image_mode.is_dual()
    }
}

/// Row flash backed by a map; unwritten rows read erased
#[derive(Debug, Default)]
pub struct MapRowFlash {
    pub rows: BTreeMap<u16, Vec<u8>>,
}

impl RowFlash for MapRowFlash {
    fn row_size(&self) -> usize {
        256
    }
    fn enter_flash_mode(&mut self, _enable: bool) -> Result<()> {
        Ok(())
    }
    fn read_row(&mut self, row: u16, buf: &mut [u8]) -> Result<()> {
        match self.rows.get(&row) {
            Some(r) => buf.copy_from_slice(r),
            None => buf.copy_from_slice(&vec![0xFF; buf.len()]),
        }
        Ok(())
    }
    fn write_row(&mut self, row: u16, data: &[u8]) -> Result<()> {
        self.rows.insert(row, data.to_vec());
        Ok(())
    }
}

/// Platform recording every notification
#[derive(Debug, Default)]
pub struct RecordingPlatform {
    pub factory_condition: bool,
    pub secure_boot: bool,
    pub resets: u32,
    pub leds: Vec<LedMode>,
    pub events: Vec<AppEvent>,
    pub completions: Vec<bool>,
    pub reports: Vec<[u8; 3]>,
}

impl Platform for RecordingPlatform {
    fn init_dock_reset(&mut self) {
        self.resets += 1;
    }
    fn is_in_factory_condition(&self) -> bool {
        self.factory_condition
    }
    fn is_secure_boot(&self) -> bool {
        self.secure_boot
    }
    fn led_set_mode(&mut self, mode: LedMode) {
        self.leds.push(mode);
    }
    fn app_event(&mut self, event: AppEvent) {
        self.events.push(event);
    }
    fn update_complete(&mut self, success: bool) {
        self.completions.push(success);
    }
    fn send_status(&mut self, report: [u8; 3]) {
        self.reports.push(report);
    }
}
