//! dockfw-core - Dock management controller firmware update core
//!
//! This crate discovers nothing by itself: it is handed a registry of
//! downstream dock devices and a firmware package, and drives each device
//! through a row-by-row update over whatever bus reaches it. It is designed
//! to be `no_std` compatible (it needs `alloc`) so the same code can run on
//! the controller and in host-side tools.
//!
//! # Features
//!
//! - `std` - Enable standard library support (TOML dock descriptions,
//!   `std::error::Error` impls)
//!
//! # Example
//!
//! ```ignore
//! use dockfw_core::orchestrator::{Orchestrator, PackageLocations};
//!
//! let mut dmc = Orchestrator::new(config, bus, ops, platform, verifier, flash)?;
//! dmc.start_update_session(registry, &mut spi_store, PackageLocations::default())?;
//! let summary = dmc.run();
//! println!("updated {} device(s)", summary.updated);
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod access;
pub mod checksum;
pub mod config;
pub mod device;
pub mod error;
pub mod flash_log;
pub mod orchestrator;
pub mod package;
pub mod platform;
pub mod programmer;
pub mod protocol;
pub mod registry;
pub mod spi;
pub mod update;

#[cfg(test)]
mod testing;

pub use error::{Error, PackageError, Result};
