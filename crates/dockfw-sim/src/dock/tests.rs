use super::*;
use crate::verify::{PackageSigner, SIGNATURE_LEN};
use crate::{stamp_version, Ed25519Verifier};
use dockfw_core::device::{DeviceType, OpsTable};
use dockfw_core::orchestrator::{PollResult, SessionSummary};
use dockfw_core::package::{PackageBuilder, PackageImage};
use dockfw_core::platform::RejectAll;
use dockfw_core::registry::DockStatus;
use dockfw_core::update::UpdateState;

const DOCK: &str = r#"
[dock]
composite_version = "0x01000000"

[[device]]
type = "ccg5"
image_mode = "dual-symmetric"
access = { bus = "i2c-direct", address = 0x08, intr_gpio = 3 }

[device.sim]
image1 = "1.0.0.1"
image2 = "1.0.0.1"
current = "image1"

[[device]]
type = "hx3"
access = { bus = "i2c-hub", address = "0x50", reset_gpio = 4, wp_gpio = 5 }

[device.sim]
image1 = "2.0.0.1"

[[device]]
type = "spi"
image_mode = "dual-symmetric"
access = { bus = "spi-hub", reset_gpio = 6, wp_gpio = 7 }

[device.sim]
image1 = "3.0.0.1"
image2 = "blank"
"#;

fn v(s: &str) -> FirmwareVersion {
    FirmwareVersion::parse(s).unwrap()
}

fn image(device_type: DeviceType, row_size: u16, start_row: u16, version: &str) -> PackageImage {
    let version = v(version);
    let mut data: Vec<u8> = (0..2 * row_size as usize).map(|i| i as u8).collect();
    stamp_version(&mut data, version);
    PackageImage {
        device_type,
        component_id: 0,
        critical: false,
        row_size,
        start_row,
        version,
        data,
    }
}

fn builder() -> PackageBuilder {
    PackageBuilder::new(0x0100_0100)
        .image(image(DeviceType::Ccg5, 256, 0x100, "1.0.0.2"))
        .image(image(DeviceType::Hx3, 64, 0, "2.0.0.2"))
        .image(image(DeviceType::SpiComponent, 256, 0, "3.0.0.2"))
}

fn run_session<V: SignatureVerifier>(
    dmc: &mut SimOrchestrator<V>,
    dock_registry: DockRegistry,
    packages: &mut SimPackageArea,
) -> SessionSummary {
    dmc.start_update_session(dock_registry, packages, PackageLocations::default())
        .unwrap();
    dmc.run().unwrap()
}

fn staged(toml: &str, package: &[u8]) -> SimDock {
    let mut dock = SimDock::from_toml_str(toml).unwrap();
    dock.stage_package(Candidate::Primary, package).unwrap();
    dock
}

#[test]
fn test_updates_every_device_family() {
    let dock = staged(DOCK, &builder().build().unwrap());
    let reg = dock.registry();
    let config = dock.config().clone();
    let (mut dmc, mut packages) = dock.into_orchestrator(RejectAll, OpsTable::standard()).unwrap();

    let summary = run_session(&mut dmc, reg, &mut packages);
    assert_eq!(summary.updated, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.status, DockStatus::Phase1CompleteFullPhase2NotDone);
    assert_eq!(dmc.platform().completed(), Some(true));

    let bus = dmc.bus_mut();
    let hpi = bus.hpi(0x08).unwrap();
    assert_eq!(hpi.current_image(), ImageType::Image2);
    assert_eq!(hpi.versions().image2, v("1.0.0.2"));
    assert_eq!(hpi.versions().image1, v("1.0.0.1"));
    assert_eq!(hpi.rows_written(), 2);

    let hub = bus.eeprom(0x50).unwrap();
    assert_eq!(hub.stored_version(), v("2.0.0.2"));
    assert_eq!(hub.loaded_version(), v("2.0.0.2"));
    assert!(hub.reloads() >= 1);
    assert_eq!(bus.pin(5), Some(true));

    let (versions, current) = bus.device_state(&config.devices[2].access).unwrap();
    assert_eq!(current, ImageType::Image2);
    assert_eq!(versions.image2, v("3.0.0.2"));
    assert_eq!(versions.image1, v("3.0.0.1"));
}

#[test]
fn test_signed_package_needs_the_right_key() {
    let signer = PackageSigner::from_seed(&[7; 32]);
    let package = builder()
        .build_signed(SIGNATURE_LEN, |digest| signer.sign(digest))
        .unwrap();

    let dock = staged(DOCK, &package);
    let reg = dock.registry();
    let (mut dmc, mut packages) = dock
        .into_orchestrator(signer.verifier(), OpsTable::standard())
        .unwrap();
    let summary = run_session(&mut dmc, reg, &mut packages);
    assert_eq!(summary.updated, 3);

    let stranger = PackageSigner::from_seed(&[8; 32]).verifier();
    let dock = staged(DOCK, &package);
    let reg = dock.registry();
    let (mut dmc, mut packages) = dock
        .into_orchestrator(stranger, OpsTable::standard())
        .unwrap();
    assert!(dmc
        .start_update_session(reg, &mut packages, PackageLocations::default())
        .is_err());
    assert_eq!(dmc.dock_status(), DockStatus::AuthenticationFailed);
    assert_eq!(dmc.fault_log().auth_failures(false), 1);
    assert_eq!(dmc.platform().completed(), Some(false));
    assert_eq!(dmc.bus_mut().hpi(0x08).unwrap().rows_written(), 0);
}

#[test]
fn test_unsigned_package_skips_verification() {
    let verifier = Ed25519Verifier::from_hex(&PackageSigner::from_seed(&[1; 32]).verifier().to_hex())
        .unwrap();
    let dock = staged(DOCK, &builder().build().unwrap());
    let reg = dock.registry();
    let (mut dmc, mut packages) = dock.into_orchestrator(verifier, OpsTable::standard()).unwrap();
    assert_eq!(run_session(&mut dmc, reg, &mut packages).updated, 3);
}

#[test]
fn test_state_survives_between_runs() {
    let package = builder().build().unwrap();
    let dock = staged(DOCK, &package);
    let reg = dock.registry();
    let config = dock.config().clone();
    let settings = *dock.settings();
    let (mut dmc, mut packages) = dock.into_orchestrator(RejectAll, OpsTable::standard()).unwrap();
    run_session(&mut dmc, reg, &mut packages);

    let (bus, _platform, flash) = dmc.into_parts();
    let dock = SimDock::reassemble(config, settings, bus, flash, packages);
    let path = std::env::temp_dir().join(format!("dockfw-sim-state-{}.toml", std::process::id()));
    dock.snapshot().save(&path).unwrap();

    let state = SimState::load(&path).unwrap();
    let _ = std::fs::remove_file(&path);
    assert_eq!(state.device.len(), 3);
    assert_eq!(state.device[0].current, ImageType::Image2 as u8);

    let mut dock = staged(DOCK, &package);
    dock.restore(&state).unwrap();
    let reg = dock.registry();
    let (mut dmc, mut packages) = dock.into_orchestrator(RejectAll, OpsTable::standard()).unwrap();
    assert_eq!(dmc.metadata().update_counter, 1);

    let summary = run_session(&mut dmc, reg, &mut packages);
    assert_eq!(summary.updated, 0);
    assert_eq!(summary.current, 3);
    assert_eq!(dmc.metadata().update_counter, 2);
}

#[test]
fn test_missing_state_file_is_empty() {
    let path = std::env::temp_dir().join("dockfw-sim-no-such-state.toml");
    assert_eq!(SimState::load(&path).unwrap(), SimState::default());
}

#[test]
fn test_failed_row_is_retried() {
    let toml = DOCK.replacen(
        "current = \"image1\"",
        "current = \"image1\"\nfaults = { fail_rows = [0x100] }",
        1,
    );
    let dock = staged(&toml, &builder().build().unwrap());
    let reg = dock.registry();
    let (mut dmc, mut packages) = dock.into_orchestrator(RejectAll, OpsTable::standard()).unwrap();

    let summary = run_session(&mut dmc, reg, &mut packages);
    assert_eq!(summary.updated, 3);
    assert_eq!(dmc.registry().device(0).unwrap().update_attempt_count, 1);
    assert_eq!(dmc.fault_log().fw_update_failures(), 0);
}

#[test]
fn test_busy_device_is_deferred_then_updated() {
    let toml = DOCK.replacen(
        "current = \"image1\"",
        "current = \"image1\"\nfaults = { busy_reads = 2 }",
        1,
    );
    let dock = staged(&toml, &builder().build().unwrap());
    let reg = dock.registry();
    let (mut dmc, mut packages) = dock.into_orchestrator(RejectAll, OpsTable::standard()).unwrap();

    let summary = run_session(&mut dmc, reg, &mut packages);
    assert_eq!(summary.updated, 3);
    assert!(dmc.platform().status_trail().contains(&DockStatus::Phase1Partial));
}

#[test]
fn test_critical_device_waits_for_phase2() {
    let toml = DOCK.replacen(
        "image_mode = \"dual-symmetric\"\naccess = { bus = \"i2c-direct\"",
        "image_mode = \"dual-symmetric\"\ncritical = true\naccess = { bus = \"i2c-direct\"",
        1,
    );
    let package = builder().build().unwrap();
    let dock = staged(&toml, &package);
    let reg = dock.registry();
    assert!(reg.device(0).unwrap().critical);
    let (mut dmc, mut packages) = dock.into_orchestrator(RejectAll, OpsTable::standard()).unwrap();

    let summary = run_session(&mut dmc, reg.clone(), &mut packages);
    assert_eq!(summary.updated, 2);
    assert_eq!(summary.deferred_critical, 1);
    assert_eq!(dmc.bus_mut().hpi(0x08).unwrap().rows_written(), 0);
    assert_eq!(dmc.platform().resets(), 0);

    dmc.trigger_phase2().unwrap();
    let summary = run_session(&mut dmc, reg, &mut packages);
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.current, 2);
    assert_eq!(summary.status, DockStatus::Phase2CompleteFull);
    assert_eq!(dmc.bus_mut().hpi(0x08).unwrap().current_image(), ImageType::Image2);
    assert_eq!(dmc.platform().resets(), 1);
}

#[test]
fn test_absent_device_fails_alone() {
    let toml = DOCK.replacen(
        "current = \"image1\"",
        "current = \"image1\"\nfaults = { absent = true }",
        1,
    );
    let dock = staged(&toml, &builder().build().unwrap());
    let reg = dock.registry();
    let (mut dmc, mut packages) = dock.into_orchestrator(RejectAll, OpsTable::standard()).unwrap();

    let summary = run_session(&mut dmc, reg, &mut packages);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.updated, 2);
    assert_eq!(summary.status, DockStatus::Phase1CompletePartial);
    assert_eq!(dmc.fault_log().fw_update_failures(), 1);
    assert_eq!(dmc.platform().completed(), Some(false));
}

/// Abort once device `index` has written its first row, then finish
fn abort_after_first_row<V: SignatureVerifier>(
    dmc: &mut SimOrchestrator<V>,
    dock_registry: DockRegistry,
    packages: &mut SimPackageArea,
    index: usize,
) -> SessionSummary {
    let handle = dmc.abort_handle();
    dmc.start_update_session(dock_registry, packages, PackageLocations::default())
        .unwrap();
    loop {
        let stepped = dmc.poll().unwrap();
        if stepped
            == (PollResult::Stepped {
                index,
                state: UpdateState::Flashing { next_row: 1 },
            })
        {
            break;
        }
    }
    handle.abort();
    dmc.run().unwrap()
}

#[test]
fn test_aborted_pd_controller_bank_is_invalidated() {
    let dock = staged(DOCK, &builder().build().unwrap());
    let reg = dock.registry();
    let (mut dmc, mut packages) = dock.into_orchestrator(RejectAll, OpsTable::standard()).unwrap();

    let summary = abort_after_first_row(&mut dmc, reg, &mut packages, 0);
    assert!(summary.aborted);
    assert_eq!(summary.status, DockStatus::Aborted);
    assert_eq!(dmc.fault_log().fw_update_failures(), 3);

    let hpi = dmc.bus_mut().hpi(0x08).unwrap();
    assert_eq!(hpi.current_image(), ImageType::Image1);
    assert_eq!(hpi.row(ImageType::Image2, 0x100), Some(&[0u8; 256][..]));
    assert!(hpi.versions().image2.is_blank());
    assert_eq!(hpi.versions().image1, v("1.0.0.1"));
}

#[test]
fn test_aborted_hub_is_released_from_reset() {
    let dock = staged(DOCK, &builder().build().unwrap());
    let reg = dock.registry();
    let (mut dmc, mut packages) = dock.into_orchestrator(RejectAll, OpsTable::standard()).unwrap();

    let summary = abort_after_first_row(&mut dmc, reg, &mut packages, 1);
    assert!(summary.aborted);
    assert_eq!(summary.updated, 1);

    let bus = dmc.bus_mut();
    assert_eq!(bus.pin(4), Some(true));
    assert_eq!(bus.pin(5), Some(true));
    let hub = bus.eeprom(0x50).unwrap();
    assert!(hub.stored_version().is_blank());
    assert!(hub.loaded_version().is_blank());
}

#[test]
fn test_second_spi_hub_is_refused() {
    let toml = format!(
        "{}\n[[device]]\ntype = \"goshen\"\naccess = {{ bus = \"spi-hub\", reset_gpio = 8, wp_gpio = 9 }}\n",
        DOCK
    );
    assert!(matches!(
        SimDock::from_toml_str(&toml),
        Err(SimError::SharedSpiFlash)
    ));
}

#[test]
fn test_bad_sim_version() {
    let toml = DOCK.replacen("image1 = \"2.0.0.1\"", "image1 = \"two\"", 1);
    assert!(matches!(
        SimDock::from_toml_str(&toml),
        Err(SimError::Settings(_))
    ));
}
