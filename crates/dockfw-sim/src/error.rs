//! Error types for the dock emulator

use thiserror::Error;

/// Errors building or persisting a simulated dock
#[derive(Debug, Error)]
pub enum SimError {
    /// Failed to read or write a file
    #[error("Failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Dock description rejected
    #[error("Dock description: {0}")]
    DockConfig(#[from] dockfw_core::registry::DockConfigError),

    /// Simulator settings or state file malformed
    #[error("Invalid simulator settings: {0}")]
    Settings(String),

    /// Two devices share one I2C address
    #[error("Two devices at I2C address 0x{0:02X}")]
    AddressConflict(u8),

    /// The emulated SPI bus carries a single hub flash
    #[error("At most one SPI hub per simulated dock")]
    SharedSpiFlash,

    /// Key material malformed
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Operation on the emulated hardware failed
    #[error("{0}")]
    Core(dockfw_core::Error),
}

impl From<dockfw_core::Error> for SimError {
    fn from(e: dockfw_core::Error) -> Self {
        Self::Core(e)
    }
}

/// Result type for emulator operations
pub type Result<T> = std::result::Result<T, SimError>;
