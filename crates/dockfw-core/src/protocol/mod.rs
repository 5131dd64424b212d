//! Wire protocols spoken to dock devices
//!
//! - [`spi25`]: JEDEC SPI flash commands (package area, SPI hub EEPROMs)
//! - [`hpi`]: register protocol of PD controllers over I2C

pub mod hpi;
pub mod spi25;
