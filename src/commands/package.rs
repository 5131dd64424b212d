//! Package commands: build from a manifest and validate
//!
//! A manifest lists the images of a package:
//!
//! ```toml
//! composite_version = "0x01000100"
//!
//! [[image]]
//! type = "ccg5"
//! component_id = 0
//! row_size = 256
//! start_row = "0x100"
//! version = "1.0.0.2"
//! file = "ccg5.bin"
//! stamp = true
//! ```
//!
//! Image files are looked up relative to the manifest. With `stamp` set the
//! version is written into the image data where the emulated devices look
//! for it.

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use dockfw_core::config::UpdateConfig;
use dockfw_core::device::{DeviceType, FirmwareVersion};
use dockfw_core::error::PackageError;
use dockfw_core::package::{
    ImageFlags, PackageBuilder, PackageFlags, PackageImage, PackageValidator, SecurityPolicy,
    ValidatedPackage,
};
use dockfw_sim::verify::{PackageSigner, SIGNATURE_LEN};
use dockfw_sim::stamp_version;

use super::{read_file, PackageKey};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Manifest {
    #[serde(deserialize_with = "hex_u32")]
    composite_version: u32,
    #[serde(default)]
    image: Vec<ManifestImage>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestImage {
    #[serde(rename = "type")]
    device_type: String,
    #[serde(default)]
    component_id: u8,
    #[serde(default)]
    critical: bool,
    #[serde(deserialize_with = "hex_u16")]
    row_size: u16,
    #[serde(default, deserialize_with = "hex_u16")]
    start_row: u16,
    version: String,
    file: PathBuf,
    #[serde(default)]
    stamp: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HexOrInt {
    Int(u32),
    Str(String),
}

fn parse_number(s: &str) -> Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse().map_err(|e| format!("Invalid number: {}", e))
    }
}

fn hex_u32<'de, D: serde::Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    match HexOrInt::deserialize(d)? {
        HexOrInt::Int(n) => Ok(n),
        HexOrInt::Str(s) => parse_number(&s).map_err(serde::de::Error::custom),
    }
}

fn hex_u16<'de, D: serde::Deserializer<'de>>(d: D) -> Result<u16, D::Error> {
    let n = hex_u32(d)?;
    u16::try_from(n).map_err(|_| serde::de::Error::custom(format!("{:#x} out of range", n)))
}

impl ManifestImage {
    fn load(&self, base: &Path) -> Result<PackageImage, Box<dyn Error>> {
        let device_type = DeviceType::from_name(&self.device_type)
            .ok_or_else(|| format!("unknown device type {:?}", self.device_type))?;
        let version = FirmwareVersion::parse(&self.version)
            .ok_or_else(|| format!("bad version {:?}", self.version))?;
        let mut data = read_file(&base.join(&self.file))?;
        if self.stamp {
            stamp_version(&mut data, version);
        }
        Ok(PackageImage {
            device_type,
            component_id: self.component_id,
            critical: self.critical,
            row_size: self.row_size,
            start_row: self.start_row,
            version,
            data,
        })
    }
}

/// Assemble the package a manifest describes
fn build_package(manifest_path: &Path, key: Option<&str>) -> Result<Vec<u8>, Box<dyn Error>> {
    let content = fs::read_to_string(manifest_path)
        .map_err(|e| format!("{}: {}", manifest_path.display(), e))?;
    let manifest: Manifest = toml::from_str(&content)?;
    let base = manifest_path.parent().unwrap_or(Path::new("."));

    let mut builder = PackageBuilder::new(manifest.composite_version);
    for image in &manifest.image {
        builder = builder.image(image.load(base)?);
    }

    let bytes = match key {
        Some(seed) => {
            let signer = PackageSigner::from_hex(seed)?;
            log::info!("signing with public key {}", signer.verifier().to_hex());
            builder.build_signed(SIGNATURE_LEN, |digest| signer.sign(digest))
        }
        None => builder.build(),
    }
    .map_err(PackageError::Malformed)?;
    Ok(bytes)
}

/// Check a package the way the dock would
fn validate_package(bytes: Vec<u8>, key: &PackageKey) -> Result<ValidatedPackage, PackageError> {
    let validator = PackageValidator::new(&UpdateConfig::default(), SecurityPolicy::default());
    validator.validate(bytes, key)
}

pub fn cmd_pack(manifest: &Path, output: &Path, key: Option<&str>) -> Result<(), Box<dyn Error>> {
    let bytes = build_package(manifest, key)?;
    fs::write(output, &bytes).map_err(|e| format!("{}: {}", output.display(), e))?;
    println!("Wrote {} bytes to {:?}", bytes.len(), output);
    Ok(())
}

pub fn cmd_validate(package: &Path, public_key: Option<&str>) -> Result<(), Box<dyn Error>> {
    let key = PackageKey::from_hex(public_key)?;
    let bytes = read_file(package)?;
    let validated = validate_package(bytes, &key)?;
    print_package(&validated);
    Ok(())
}

fn print_package(package: &ValidatedPackage) {
    let header = package.header();
    println!("Package is valid");
    println!("  Composite version: 0x{:08X}", header.composite_version);
    println!("  Length:            {} bytes", header.total_length);
    println!("  Checksum:          0x{:08X}", header.checksum);
    println!(
        "  Signature:         {}",
        if header.flags.contains(PackageFlags::SIGNED) {
            format!("{} bytes", header.signature_len)
        } else {
            "none".to_string()
        }
    );
    println!();
    println!(
        "{:<12} {:>4} {:>6} {:>8} {:>9} {:<16} {}",
        "Type", "Id", "Rows", "Row size", "Start row", "Version", "Flags"
    );
    for image in package.images() {
        let name = DeviceType::from_u8(image.device_type)
            .map(|t| t.name().to_string())
            .unwrap_or_else(|| format!("0x{:02X}", image.device_type));
        println!(
            "{:<12} {:>4} {:>6} {:>8} {:>#9x} {:<16} {}",
            name,
            image.component_id,
            image.row_count(),
            image.row_size,
            image.start_row,
            image.version.to_string(),
            if image.flags.contains(ImageFlags::CRITICAL) {
                "critical"
            } else {
                ""
            }
        );
    }
}
