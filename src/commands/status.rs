//! Dock inspection commands and phase 2 triggering

use std::error::Error;

use dockfw_core::access::AccessParams;
use dockfw_core::device::{FirmwareVersion, ImageType};
use dockfw_core::flash_log::{opcode, FailureDetail, FaultLog, PortFault};

use super::{load_dock, open_dock, OpenDock};
use crate::cli::DockArgs;
use dockfw_core::platform::RejectAll;

fn describe_access(access: &AccessParams) -> String {
    match *access {
        AccessParams::I2cDirect { address, intr_gpio } => {
            format!("I2C 0x{:02X} (intr {})", address, intr_gpio)
        }
        AccessParams::I2cHub {
            address,
            reset_gpio,
            wp_gpio,
        } => format!("EEPROM 0x{:02X} (reset {}, wp {})", address, reset_gpio, wp_gpio),
        AccessParams::SpiHub {
            reset_gpio,
            wp_gpio,
        } => format!("SPI (reset {}, wp {})", reset_gpio, wp_gpio),
    }
}

fn version_text(v: FirmwareVersion) -> String {
    if v.is_blank() {
        "-".to_string()
    } else {
        v.to_string()
    }
}

pub fn cmd_status(args: &DockArgs) -> Result<(), Box<dyn Error>> {
    let dock = load_dock(args)?;
    println!(
        "Dock {:?}: composite version 0x{:08X}, {} device(s)",
        args.dock,
        dock.config().composite_version,
        dock.config().devices.len()
    );
    println!();
    println!(
        "{:>3} {:<10} {:<28} {:<16} {:<16} {:<16} {}",
        "#", "Type", "Access", "Bootloader", "Image 1", "Image 2", "Running"
    );
    for (i, desc) in dock.config().devices.iter().enumerate() {
        let Some((versions, current)) = dock.bus().device_state(&desc.access) else {
            println!("{:>3} {:<10} {}", i, desc.device_type.name(), "not attached");
            continue;
        };
        let running = match current {
            ImageType::Bootloader => "bootloader",
            ImageType::Image1 => "image 1",
            ImageType::Image2 => "image 2",
        };
        println!(
            "{:>3} {:<10} {:<28} {:<16} {:<16} {:<16} {}{}",
            i,
            desc.device_type.name(),
            describe_access(&desc.access),
            version_text(versions.bootloader),
            version_text(versions.image1),
            version_text(versions.image2),
            running,
            if desc.critical { " (critical)" } else { "" }
        );
    }

    let open = OpenDock::open(dock, RejectAll)?;
    let meta = open.dmc.metadata();
    println!();
    println!("Last status:    {:?}", meta.status);
    println!("App status:     {:?}", meta.app_status);
    println!(
        "Sessions:       {} ({} phase 2)",
        meta.update_counter, meta.phase2_update_counter
    );
    println!("Secured only:   {}", meta.secured_only);
    println!("Metadata row:   {}", hex::encode(meta.encode()));
    Ok(())
}

fn opcode_name(op: u8) -> String {
    let named = match op {
        opcode::WDT => Some("watchdog reset"),
        opcode::HARD_FAULT => Some("hard fault"),
        opcode::POWER_CYCLE => Some("power cycle"),
        opcode::VDDD_BROWN_OUT => Some("VDDD brown-out"),
        opcode::FW_UPD_FAILURE => Some("firmware update failure"),
        opcode::P1_AUTH_FAILURE => Some("phase 1 authentication failure"),
        opcode::P2_AUTH_FAILURE => Some("phase 2 authentication failure"),
        opcode::SCB_FAILURE => Some("serial block failure"),
        opcode::HPI_EVENT => Some("HPI event"),
        _ => None,
    };
    match named {
        Some(name) => name.to_string(),
        None if op >= opcode::PORT1_BASE => format!("port 1 fault {}", op - opcode::PORT1_BASE),
        None if op >= opcode::PORT0_BASE => format!("port 0 fault {}", op - opcode::PORT0_BASE),
        None => format!("opcode 0x{:02X}", op),
    }
}

fn print_counters(log: &FaultLog) {
    let ops = [
        opcode::WDT,
        opcode::HARD_FAULT,
        opcode::POWER_CYCLE,
        opcode::VDDD_BROWN_OUT,
        opcode::FW_UPD_FAILURE,
        opcode::P1_AUTH_FAILURE,
        opcode::P2_AUTH_FAILURE,
    ];
    for op in ops {
        if let Some(n) = log.count(op) {
            println!("  {:<32} {}", opcode_name(op), n);
        }
    }
    for port in 0..2u8 {
        let nonzero: Vec<_> = (0..=PortFault::SbuOv as u8)
            .filter_map(|idx| {
                let base = if port == 0 {
                    opcode::PORT0_BASE
                } else {
                    opcode::PORT1_BASE
                };
                let n = log.count(base + idx)?;
                (n > 0).then_some((idx, n))
            })
            .collect();
        for (idx, n) in nonzero {
            println!("  port {} fault {:<24} {}", port, idx, n);
        }
    }
}

fn describe_detail(detail: &FailureDetail) -> String {
    match (detail.opcode, detail.data) {
        (opcode::FW_UPD_FAILURE, Some(device)) => {
            format!("{} (device {})", opcode_name(detail.opcode), device)
        }
        (op, Some(data)) => format!("{} (0x{:02X})", opcode_name(op), data),
        (op, None) => opcode_name(op),
    }
}

pub fn cmd_log(args: &DockArgs) -> Result<(), Box<dyn Error>> {
    let open = open_dock(args)?;
    let log = open.dmc.fault_log();
    println!("Fault counters:");
    print_counters(log);
    println!();
    let details: Vec<_> = log.details().collect();
    if details.is_empty() {
        println!("No recorded failures");
    } else {
        println!("Recent failures, oldest first:");
        for (i, detail) in details.iter().enumerate() {
            println!("  {:>3}: {}", i, describe_detail(detail));
        }
    }
    Ok(())
}

pub fn cmd_trigger_phase2(args: &DockArgs) -> Result<(), Box<dyn Error>> {
    let mut open = open_dock(args)?;
    open.dmc.trigger_phase2()?;
    println!("Phase 2 armed; the next update session updates critical devices");
    open.save(&args.state)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_names() {
        assert_eq!(opcode_name(opcode::FW_UPD_FAILURE), "firmware update failure");
        assert_eq!(opcode_name(opcode::PORT0_BASE + 2), "port 0 fault 2");
        assert_eq!(opcode_name(opcode::PORT1_BASE), "port 1 fault 0");
        assert_eq!(opcode_name(0x30), "opcode 0x30");
    }

    #[test]
    fn test_detail_names_failed_device() {
        let detail = FailureDetail {
            opcode: opcode::FW_UPD_FAILURE,
            data: Some(2),
        };
        assert_eq!(describe_detail(&detail), "firmware update failure (device 2)");
    }

    #[test]
    fn test_blank_version_text() {
        assert_eq!(version_text(FirmwareVersion::from_bytes([0xFF; 8])), "-");
        assert_eq!(
            version_text(FirmwareVersion::parse("1.2.3.4").unwrap()),
            "1.2.3.4"
        );
    }
}
