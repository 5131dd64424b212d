//! CLI command implementations
//!
//! Every dock command works on an emulated dock: the description file lays
//! out the devices, and the state file carries what earlier runs left in the
//! controller's flash and in the devices' banks.

pub mod package;
pub mod status;
pub mod update;

use std::error::Error;
use std::fs;
use std::path::Path;

use dockfw_core::device::OpsTable;
use dockfw_core::platform::{RejectAll, SignatureVerifier};
use dockfw_core::registry::DockConfig;
use dockfw_sim::dock::SimDockSettings;
use dockfw_sim::{Ed25519Verifier, SimDock, SimError, SimOrchestrator, SimPackageArea, SimState};

use crate::cli::DockArgs;

/// Key packages are checked against
#[derive(Debug, Clone)]
pub enum PackageKey {
    /// Signed packages must verify against this key
    Trusted(Ed25519Verifier),
    /// No key; every signed package is rejected
    Untrusted,
}

impl PackageKey {
    /// Key from an optional hex-encoded public key
    pub fn from_hex(public_key: Option<&str>) -> Result<Self, SimError> {
        match public_key {
            Some(hex) => Ok(Self::Trusted(Ed25519Verifier::from_hex(hex)?)),
            None => Ok(Self::Untrusted),
        }
    }
}

impl SignatureVerifier for PackageKey {
    fn verify_signature(&self, digest: &[u8; 32], signature: &[u8]) -> bool {
        match self {
            Self::Trusted(key) => key.verify_signature(digest, signature),
            Self::Untrusted => RejectAll.verify_signature(digest, signature),
        }
    }
}

/// Read a whole file
fn read_file(path: &Path) -> Result<Vec<u8>, Box<dyn Error>> {
    let data = fs::read(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    log::debug!("read {} bytes from {}", data.len(), path.display());
    Ok(data)
}

/// Load the dock description and reapply the saved state
pub fn load_dock(args: &DockArgs) -> Result<SimDock, SimError> {
    let mut dock = SimDock::from_toml_file(&args.dock)?;
    let state = SimState::load(&args.state)?;
    dock.restore(&state)?;
    Ok(dock)
}

/// An emulated dock handed to the update engine
pub struct OpenDock<V: SignatureVerifier> {
    pub dmc: SimOrchestrator<V>,
    pub packages: SimPackageArea,
    config: DockConfig,
    settings: SimDockSettings,
}

impl<V: SignatureVerifier> OpenDock<V> {
    /// Start the update engine on `dock`
    pub fn open(dock: SimDock, verifier: V) -> Result<Self, SimError> {
        let config = dock.config().clone();
        let settings = *dock.settings();
        let (dmc, packages) = dock.into_orchestrator(verifier, OpsTable::standard())?;
        Ok(Self {
            dmc,
            packages,
            config,
            settings,
        })
    }

    /// Registry of the described devices
    pub fn registry(&self) -> dockfw_core::registry::DockRegistry {
        self.config.registry()
    }

    /// Description of the dock
    pub fn config(&self) -> &DockConfig {
        &self.config
    }

    /// Persist flash and device contents
    pub fn save(self, path: &Path) -> Result<(), SimError> {
        let (bus, _platform, flash) = self.dmc.into_parts();
        let dock = SimDock::reassemble(self.config, self.settings, bus, flash, self.packages);
        dock.snapshot().save(path)?;
        log::debug!("state saved to {}", path.display());
        Ok(())
    }
}

/// Open a dock for commands that never validate a package
pub fn open_dock(args: &DockArgs) -> Result<OpenDock<RejectAll>, SimError> {
    OpenDock::open(load_dock(args)?, RejectAll)
}
