//! Package storage and candidate selection

use alloc::vec;
use alloc::vec::Vec;

use super::format::{PackageHeader, HEADER_LEN};
use super::metadata::{AppStatus, DockMetadata};
use super::validate::{PackageValidator, ValidatedPackage};
use crate::config::PACKAGE_AREA_SIZE;
use crate::error::{Error, MalformedPackage, PackageError, Result};
use crate::platform::SignatureVerifier;
use crate::programmer::SpiMaster;
use crate::protocol::spi25;

/// Storage holding candidate packages
pub trait PackageStore {
    /// Read `buf.len()` bytes at `addr`
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()>;

    /// Erase `len` bytes at `addr` (rounded out to erase granularity)
    fn erase(&mut self, addr: u32, len: u32) -> Result<()>;

    /// Program previously erased bytes
    fn write(&mut self, addr: u32, data: &[u8]) -> Result<()>;
}

/// Package store on an SPI flash
#[derive(Debug)]
pub struct SpiPackageStore<M> {
    master: M,
}

impl<M: SpiMaster> SpiPackageStore<M> {
    /// Wrap an SPI master
    pub fn new(master: M) -> Self {
        Self { master }
    }

    /// Give back the SPI master
    pub fn into_inner(self) -> M {
        self.master
    }
}

impl<M: SpiMaster> PackageStore for SpiPackageStore<M> {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        spi25::read(&mut self.master, addr, buf)
    }

    fn erase(&mut self, addr: u32, len: u32) -> Result<()> {
        spi25::erase_range(&mut self.master, addr, len)
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        spi25::write(&mut self.master, addr, data)
    }
}

/// In-memory package store
#[derive(Debug, Clone, Default)]
pub struct MemPackageStore {
    data: Vec<u8>,
}

impl MemPackageStore {
    /// Erased store of `size` bytes
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0xFF; size],
        }
    }

    /// Place `package` at `addr`, growing the store as needed
    pub fn with_package(mut self, addr: u32, package: &[u8]) -> Self {
        let end = addr as usize + package.len();
        if self.data.len() < end {
            self.data.resize(end, 0xFF);
        }
        self.data[addr as usize..end].copy_from_slice(package);
        self
    }

    /// Raw contents
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable raw contents
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn range(&self, addr: u32, len: usize) -> Result<core::ops::Range<usize>> {
        let start = addr as usize;
        let end = start.checked_add(len).ok_or(Error::AddressOutOfBounds)?;
        if end > self.data.len() {
            return Err(Error::AddressOutOfBounds);
        }
        Ok(start..end)
    }
}

impl PackageStore for MemPackageStore {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        let r = self.range(addr, buf.len())?;
        buf.copy_from_slice(&self.data[r]);
        Ok(())
    }

    fn erase(&mut self, addr: u32, len: u32) -> Result<()> {
        let r = self.range(addr, len as usize)?;
        self.data[r].fill(0xFF);
        Ok(())
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let r = self.range(addr, data.len())?;
        for (dst, src) in self.data[r].iter_mut().zip(data) {
            *dst &= *src;
        }
        Ok(())
    }
}

/// Where the two candidates live in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageLocations {
    /// Primary package address
    pub primary_addr: u32,
    /// Factory package address
    pub factory_addr: u32,
}

impl Default for PackageLocations {
    fn default() -> Self {
        Self {
            primary_addr: 0x100000,
            factory_addr: 0x100000 + PACKAGE_AREA_SIZE,
        }
    }
}

/// Which candidate a package came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Candidate {
    /// Primary package area
    Primary,
    /// Factory package area
    Factory,
}

impl Candidate {
    fn addr(self, locations: &PackageLocations) -> u32 {
        match self {
            Self::Primary => locations.primary_addr,
            Self::Factory => locations.factory_addr,
        }
    }
}

/// Outcome of a successful candidate selection
#[derive(Debug, Clone)]
pub struct SelectedPackage {
    /// Candidate the package came from
    pub source: Candidate,
    /// The validated package
    pub package: ValidatedPackage,
    /// The preferred candidate, if it was rejected, and why
    pub rejected: Option<(Candidate, PackageError)>,
}

/// No package may be applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoCandidate {
    /// The factory package was designated and is unusable; the primary is
    /// not considered
    Factory(PackageError),
    /// Both candidates were rejected
    Both {
        /// Why the primary was rejected
        primary: PackageError,
        /// Why the factory package was rejected
        factory: PackageError,
    },
}

impl NoCandidate {
    /// A rejection was an authentication failure
    pub fn auth_failed(&self) -> bool {
        let is_auth = |e: &PackageError| {
            matches!(
                e,
                PackageError::SignatureInvalid | PackageError::SecurityPolicyViolation
            )
        };
        match self {
            Self::Factory(e) => is_auth(e),
            Self::Both { primary, factory } => is_auth(primary) || is_auth(factory),
        }
    }
}

impl From<NoCandidate> for PackageError {
    fn from(none: NoCandidate) -> Self {
        match none {
            NoCandidate::Factory(e) => e,
            NoCandidate::Both { .. } => PackageError::NoValidCandidate,
        }
    }
}

/// Read the package at `addr` without interpreting more than its header
pub fn read_package(
    store: &mut dyn PackageStore,
    addr: u32,
    max_size: u32,
) -> core::result::Result<Vec<u8>, PackageError> {
    let mut header = [0u8; HEADER_LEN];
    store
        .read(addr, &mut header)
        .map_err(|_| MalformedPackage::Truncated)?;
    let total = PackageHeader::parse(&header)?.total_length;
    if total > max_size {
        return Err(MalformedPackage::TooLarge.into());
    }
    let mut bytes = vec![0u8; total as usize];
    store
        .read(addr, &mut bytes)
        .map_err(|_| MalformedPackage::Truncated)?;
    Ok(bytes)
}

/// Pick the package to apply
///
/// With [`AppStatus::FACTORY_CANDIDATE`] set only the factory package is
/// acceptable. Otherwise the primary is tried first and the factory package
/// is the fallback. Nothing is written.
pub fn select_candidate(
    store: &mut dyn PackageStore,
    locations: &PackageLocations,
    metadata: &DockMetadata,
    validator: &PackageValidator,
    verifier: &dyn SignatureVerifier,
) -> core::result::Result<SelectedPackage, NoCandidate> {
    let mut try_candidate = |c: Candidate| {
        read_package(
            &mut *store,
            c.addr(locations),
            validator.limits().max_package_size,
        )
        .and_then(|bytes| validator.validate(bytes, verifier))
        .map_err(|e| {
            log::warn!("{:?} package rejected: {}", c, e);
            e
        })
    };

    if metadata.app_status.contains(AppStatus::FACTORY_CANDIDATE) {
        return try_candidate(Candidate::Factory)
            .map(|package| SelectedPackage {
                source: Candidate::Factory,
                package,
                rejected: None,
            })
            .map_err(NoCandidate::Factory);
    }

    let primary = match try_candidate(Candidate::Primary) {
        Ok(package) => {
            return Ok(SelectedPackage {
                source: Candidate::Primary,
                package,
                rejected: None,
            })
        }
        Err(e) => e,
    };

    match try_candidate(Candidate::Factory) {
        Ok(package) => {
            log::info!("falling back to factory package");
            Ok(SelectedPackage {
                source: Candidate::Factory,
                package,
                rejected: Some((Candidate::Primary, primary)),
            })
        }
        Err(factory) => Err(NoCandidate::Both { primary, factory }),
    }
}

/// Copy a validated package into the factory area
pub fn backup_to_factory(
    store: &mut dyn PackageStore,
    locations: &PackageLocations,
    package: &ValidatedPackage,
) -> Result<()> {
    let bytes = package.as_bytes();
    store.erase(locations.factory_addr, bytes.len() as u32)?;
    store.write(locations.factory_addr, bytes)?;

    let mut check = vec![0u8; bytes.len()];
    store.read(locations.factory_addr, &mut check)?;
    if check != bytes {
        return Err(Error::FlashWriteError);
    }
    Ok(())
}
