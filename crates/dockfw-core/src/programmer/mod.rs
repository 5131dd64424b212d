//! Bus capability traits and abstractions
//!
//! This module defines the traits board support code implements to give the
//! update logic access to the dock's I2C, SPI and GPIO resources.

mod traits;

pub use traits::*;
