//! Firmware packages and dock metadata
//!
//! A package carries one image per device, each a whole number of rows, and
//! is protected by a checksum and an optional signature. Two candidates are
//! kept in the package store: the primary package and a factory copy used
//! when the primary is unusable.

mod builder;
pub mod format;
mod metadata;
mod store;
mod validate;

pub use builder::{PackageBuilder, PackageImage};
pub use format::{ImageEntry, ImageFlags, PackageFlags, PackageHeader};
pub use metadata::{AppStatus, DockMetadata, METADATA_LEN, METADATA_SIGNATURE};
pub use store::{
    backup_to_factory, read_package, select_candidate, Candidate, MemPackageStore, NoCandidate,
    PackageLocations, PackageStore, SelectedPackage, SpiPackageStore,
};
pub use validate::{PackageValidator, SecurityPolicy, ValidatedPackage};
