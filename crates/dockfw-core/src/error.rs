//! Error types for dockfw-core
//!
//! This module provides a no_std compatible error type that can be used
//! throughout the crate.

use core::fmt;

/// Reasons a firmware package is rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageError {
    /// Header, image table or image bounds are inconsistent
    Malformed(MalformedPackage),
    /// Stored checksum does not match the recomputed value
    ChecksumMismatch {
        /// Checksum stored in the package header
        stored: u32,
        /// Checksum computed over the package contents
        computed: u32,
    },
    /// Signature missing or rejected by the verifier
    SignatureInvalid,
    /// Package not acceptable on a platform outside secure boot
    SecurityPolicyViolation,
    /// Neither the primary nor the factory package is usable
    NoValidCandidate,
}

/// Structural defects found while parsing a package
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedPackage {
    /// Magic bytes do not read `DMCP`
    BadMagic,
    /// Unknown container format version
    UnsupportedVersion(u8),
    /// Package is shorter than its header claims
    Truncated,
    /// Package exceeds the configured package area
    TooLarge,
    /// Signature length exceeds the signature area
    BadSignatureLength,
    /// Image table entry points outside the package
    ImageOutOfBounds,
    /// Image rows run past the last device row
    RowRangeOverflow,
    /// Row size is zero or not a multiple of the row size unit
    BadRowSize,
    /// Image data is not a whole number of rows
    PartialRow,
    /// Two images target the same device
    DuplicateImage,
}

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // Bus errors
    /// I2C target did not acknowledge
    I2cNack,
    /// I2C transfer failed
    I2cTransferFailed,
    /// SPI transfer failed
    SpiTransferFailed,
    /// GPIO line could not be driven
    GpioError,
    /// Bus operation timed out
    Timeout,

    // Access errors
    /// Access parameters are outside the legal range for the bus
    InvalidAccessConfig,
    /// No operation table is bound for the device type
    DeviceNotSupported,

    // Package errors
    /// Package validation failed
    Package(PackageError),

    // Device operation errors
    /// Device refused to arm its image bank
    PrepareFailed,
    /// Device reported a row write failure
    RowWriteFailed,
    /// Device refused to commit the image
    FinishFailed,
    /// Version read back after the update differs from the package
    VersionMismatch,
    /// Device refused to jump to the alternate image
    JumpRejected,
    /// Device returned an unexpected response code
    UnexpectedResponse(u8),
    /// Row offered out of ascending order or after the image was committed
    RowOutOfOrder,

    // Session errors
    /// Update was aborted
    Aborted,
    /// An update session is already running
    SessionActive,
    /// No update session is running
    NoSession,
    /// Dock has more devices than the registry can hold
    TooManyDevices,

    // Storage errors
    /// Flash row read failed
    FlashReadError,
    /// Flash row write failed
    FlashWriteError,
    /// Persisted record failed its signature or checksum check
    Corrupt,
    /// Address is beyond the storage area
    AddressOutOfBounds,
    /// Provided buffer is too small for the operation
    BufferTooSmall,
}

impl fmt::Display for MalformedPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic => write!(f, "bad package magic"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported package format {}", v),
            Self::Truncated => write!(f, "package truncated"),
            Self::TooLarge => write!(f, "package larger than package area"),
            Self::BadSignatureLength => write!(f, "signature length exceeds signature area"),
            Self::ImageOutOfBounds => write!(f, "image data outside package"),
            Self::RowRangeOverflow => write!(f, "image rows past end of device row space"),
            Self::BadRowSize => write!(f, "invalid row size"),
            Self::PartialRow => write!(f, "image is not a whole number of rows"),
            Self::DuplicateImage => write!(f, "duplicate image for one device"),
        }
    }
}

impl fmt::Display for PackageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(m) => write!(f, "malformed package: {}", m),
            Self::ChecksumMismatch { stored, computed } => write!(
                f,
                "package checksum mismatch: stored 0x{:08X}, computed 0x{:08X}",
                stored, computed
            ),
            Self::SignatureInvalid => write!(f, "package signature invalid"),
            Self::SecurityPolicyViolation => {
                write!(f, "package not permitted by secured-only policy")
            }
            Self::NoValidCandidate => write!(f, "no valid primary or factory package"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I2cNack => write!(f, "I2C target not acknowledging"),
            Self::I2cTransferFailed => write!(f, "I2C transfer failed"),
            Self::SpiTransferFailed => write!(f, "SPI transfer failed"),
            Self::GpioError => write!(f, "GPIO operation failed"),
            Self::Timeout => write!(f, "bus operation timed out"),
            Self::InvalidAccessConfig => write!(f, "invalid device access configuration"),
            Self::DeviceNotSupported => write!(f, "no update operations for device type"),
            Self::Package(e) => write!(f, "{}", e),
            Self::PrepareFailed => write!(f, "prepare update failed"),
            Self::RowWriteFailed => write!(f, "row write failed"),
            Self::FinishFailed => write!(f, "finish update failed"),
            Self::VersionMismatch => write!(f, "version mismatch after update"),
            Self::JumpRejected => write!(f, "jump to alternate image rejected"),
            Self::UnexpectedResponse(code) => {
                write!(f, "unexpected device response 0x{:02X}", code)
            }
            Self::RowOutOfOrder => write!(f, "row written out of order"),
            Self::Aborted => write!(f, "update aborted"),
            Self::SessionActive => write!(f, "update session already active"),
            Self::NoSession => write!(f, "no update session active"),
            Self::TooManyDevices => write!(f, "too many dock devices"),
            Self::FlashReadError => write!(f, "flash read failed"),
            Self::FlashWriteError => write!(f, "flash write failed"),
            Self::Corrupt => write!(f, "stored record corrupt"),
            Self::AddressOutOfBounds => write!(f, "address out of bounds"),
            Self::BufferTooSmall => write!(f, "buffer too small"),
        }
    }
}

impl From<PackageError> for Error {
    fn from(e: PackageError) -> Self {
        Self::Package(e)
    }
}

impl From<MalformedPackage> for PackageError {
    fn from(m: MalformedPackage) -> Self {
        Self::Malformed(m)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[cfg(feature = "std")]
impl std::error::Error for PackageError {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
