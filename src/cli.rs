//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Default location of the simulator state file
pub const DEFAULT_STATE: &str = "dockfw-state.toml";

#[derive(Parser)]
#[command(name = "dockfw")]
#[command(author, version, about = "Dock firmware update orchestrator", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options naming the simulated dock
#[derive(clap::Args, Debug, Clone)]
pub struct DockArgs {
    /// Dock description file (TOML format)
    #[arg(short, long)]
    pub dock: PathBuf,

    /// File holding the dock's flash and device state between runs
    #[arg(long, default_value = DEFAULT_STATE)]
    pub state: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build a firmware package from a manifest
    Pack {
        /// Package manifest (TOML format)
        #[arg(short, long)]
        manifest: PathBuf,

        /// Output package file
        #[arg(short, long)]
        output: PathBuf,

        /// Ed25519 signing key seed (hex); the package is unsigned without it
        #[arg(long)]
        key: Option<String>,
    },

    /// Check a package and show its contents
    Validate {
        /// Package file
        #[arg(short, long)]
        package: PathBuf,

        /// Ed25519 public key (hex) for signed packages
        #[arg(long)]
        public_key: Option<String>,
    },

    /// Run an update session on a simulated dock
    Update {
        #[command(flatten)]
        dock: DockArgs,

        /// Primary package
        #[arg(short, long)]
        package: PathBuf,

        /// Factory package
        #[arg(long)]
        factory: Option<PathBuf>,

        /// Ed25519 public key (hex) for signed packages
        #[arg(long)]
        public_key: Option<String>,

        /// Update devices that already run the package version
        #[arg(long)]
        force: bool,

        /// Apply the factory package instead of the primary one
        #[arg(long)]
        prefer_factory: bool,
    },

    /// Show device versions and dock metadata
    Status {
        #[command(flatten)]
        dock: DockArgs,
    },

    /// Show the persisted fault log
    Log {
        #[command(flatten)]
        dock: DockArgs,
    },

    /// Arm phase 2 so the next session updates critical devices
    TriggerPhase2 {
        #[command(flatten)]
        dock: DockArgs,
    },
}
