//! Package authentication

use alloc::vec::Vec;

use super::format::{self, FormatLimits, ImageEntry, PackageFlags, PackageHeader, PackageLayout};
use crate::config::UpdateConfig;
use crate::device::DeviceType;
use crate::error::PackageError;
use crate::platform::SignatureVerifier;

/// Source trust requirements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecurityPolicy {
    /// Only signed packages on a secure-boot platform are acceptable
    pub secured_only: bool,
    /// The controller booted through secure boot
    pub secure_boot: bool,
}

/// A package that passed every check
///
/// Only [`PackageValidator::validate`] produces this type, so holding one
/// proves the bytes were checksummed and authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPackage {
    bytes: Vec<u8>,
    layout: PackageLayout,
}

impl ValidatedPackage {
    /// Decoded header
    pub fn header(&self) -> &PackageHeader {
        &self.layout.header
    }

    /// Image table
    pub fn images(&self) -> &[ImageEntry] {
        &self.layout.images
    }

    /// Image for a device, if the package carries one
    pub fn image_for(&self, device_type: DeviceType, component_id: u8) -> Option<&ImageEntry> {
        self.layout
            .images
            .iter()
            .find(|e| e.targets(device_type, component_id))
    }

    /// Data of row `index` of `image`
    pub fn row(&self, image: &ImageEntry, index: u32) -> Option<&[u8]> {
        if index >= image.row_count() {
            return None;
        }
        let start = image.data_offset as usize + index as usize * image.row_size as usize;
        self.bytes.get(start..start + image.row_size as usize)
    }

    /// The package bytes (exactly `total_length` long)
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Checks packages against the platform's limits and trust policy
#[derive(Debug, Clone, Copy)]
pub struct PackageValidator {
    limits: FormatLimits,
    policy: SecurityPolicy,
}

impl PackageValidator {
    /// Validator for the given tunables and policy
    pub fn new(config: &UpdateConfig, policy: SecurityPolicy) -> Self {
        Self {
            limits: FormatLimits {
                max_package_size: config.max_package_size,
                row_size_multiple: config.row_size_multiple,
            },
            policy,
        }
    }

    /// Format limits in force
    pub fn limits(&self) -> &FormatLimits {
        &self.limits
    }

    /// Validate a package
    ///
    /// Checks run in order: structure, checksum, trust policy, signature.
    /// Unsigned packages are accepted unless the policy is secured-only.
    pub fn validate(
        &self,
        mut bytes: Vec<u8>,
        verifier: &dyn SignatureVerifier,
    ) -> Result<ValidatedPackage, PackageError> {
        let layout = PackageLayout::parse(&bytes, &self.limits)?;
        let total = layout.header.total_length as usize;

        let computed = format::compute_checksum(&bytes, total);
        if computed != layout.header.checksum {
            return Err(PackageError::ChecksumMismatch {
                stored: layout.header.checksum,
                computed,
            });
        }

        let signed = layout.header.flags.contains(PackageFlags::SIGNED)
            && layout.header.signature_len > 0;
        if self.policy.secured_only && (!signed || !self.policy.secure_boot) {
            return Err(PackageError::SecurityPolicyViolation);
        }

        if signed {
            let digest = format::digest(&bytes, total);
            if !verifier.verify_signature(&digest, format::signature(&bytes, &layout.header)) {
                return Err(PackageError::SignatureInvalid);
            }
        }

        bytes.truncate(total);
        log::debug!(
            "package valid: {} image(s), composite 0x{:08X}, {}",
            layout.images.len(),
            layout.header.composite_version,
            if signed { "signed" } else { "unsigned" }
        );
        Ok(ValidatedPackage { bytes, layout })
    }
}
