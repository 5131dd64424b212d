//! Device access parameters
//!
//! Each dock device is reached over one of three paths. The raw parameters
//! come from the dock description and are only trusted once [`AccessParams::bind`]
//! has checked them against the platform limits; device operations are
//! constructed from the resulting [`BusHandle`].

use crate::error::{Error, Result};

/// Lowest non-reserved 7-bit I2C address
pub const I2C_ADDR_MIN: u8 = 0x08;
/// Highest non-reserved 7-bit I2C address
pub const I2C_ADDR_MAX: u8 = 0x77;

/// A validated 7-bit I2C target address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct I2cAddress(u8);

impl I2cAddress {
    /// Validate a raw address
    pub fn new(raw: u8) -> Result<Self> {
        if (I2C_ADDR_MIN..=I2C_ADDR_MAX).contains(&raw) {
            Ok(Self(raw))
        } else {
            Err(Error::InvalidAccessConfig)
        }
    }

    /// The raw 7-bit address
    pub const fn get(self) -> u8 {
        self.0
    }
}

/// A validated GPIO line number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpioPin(u8);

impl GpioPin {
    /// Validate a raw pin number against the platform limits
    pub fn new(raw: u8, limits: &AccessLimits) -> Result<Self> {
        if raw < limits.gpio_count {
            Ok(Self(raw))
        } else {
            Err(Error::InvalidAccessConfig)
        }
    }

    /// The raw pin number
    pub const fn get(self) -> u8 {
        self.0
    }
}

/// Platform limits that access parameters are checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessLimits {
    /// Number of GPIO lines; valid pins are `0..gpio_count`
    pub gpio_count: u8,
}

impl Default for AccessLimits {
    fn default() -> Self {
        Self { gpio_count: 32 }
    }
}

/// Unvalidated access parameters, as read from a dock description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessParams {
    /// PD controller speaking HPI directly on the I2C bus
    I2cDirect {
        /// 7-bit target address
        address: u8,
        /// Interrupt line from the device
        intr_gpio: u8,
    },
    /// Hub whose firmware lives in an I2C EEPROM
    I2cHub {
        /// EEPROM 7-bit target address
        address: u8,
        /// Hub reset line
        reset_gpio: u8,
        /// EEPROM write-protect line
        wp_gpio: u8,
    },
    /// Hub whose firmware lives in an SPI flash
    SpiHub {
        /// Hub reset line
        reset_gpio: u8,
        /// Flash write-protect line
        wp_gpio: u8,
    },
}

/// Validated access path to one device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusHandle {
    /// PD controller on I2C
    I2cDirect {
        /// Target address
        address: I2cAddress,
        /// Interrupt line
        intr: GpioPin,
    },
    /// I2C EEPROM hub
    I2cHub {
        /// EEPROM address
        address: I2cAddress,
        /// Reset line
        reset: GpioPin,
        /// Write-protect line
        wp: GpioPin,
    },
    /// SPI flash hub
    SpiHub {
        /// Reset line
        reset: GpioPin,
        /// Write-protect line
        wp: GpioPin,
    },
}

/// Bus a device sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    /// I2C
    I2c,
    /// SPI
    Spi,
}

impl AccessParams {
    /// Check the parameters and produce a usable handle
    ///
    /// Fails with `InvalidAccessConfig` when the I2C address is reserved,
    /// a GPIO is out of range, or reset and write-protect share a line.
    pub fn bind(&self, limits: &AccessLimits) -> Result<BusHandle> {
        let handle = match *self {
            Self::I2cDirect { address, intr_gpio } => BusHandle::I2cDirect {
                address: I2cAddress::new(address)?,
                intr: GpioPin::new(intr_gpio, limits)?,
            },
            Self::I2cHub {
                address,
                reset_gpio,
                wp_gpio,
            } => {
                let (reset, wp) = reset_and_wp(reset_gpio, wp_gpio, limits)?;
                BusHandle::I2cHub {
                    address: I2cAddress::new(address)?,
                    reset,
                    wp,
                }
            }
            Self::SpiHub {
                reset_gpio,
                wp_gpio,
            } => {
                let (reset, wp) = reset_and_wp(reset_gpio, wp_gpio, limits)?;
                BusHandle::SpiHub { reset, wp }
            }
        };
        log::debug!("bound {:?}", handle);
        Ok(handle)
    }
}

fn reset_and_wp(reset: u8, wp: u8, limits: &AccessLimits) -> Result<(GpioPin, GpioPin)> {
    if reset == wp {
        return Err(Error::InvalidAccessConfig);
    }
    Ok((GpioPin::new(reset, limits)?, GpioPin::new(wp, limits)?))
}

impl BusHandle {
    /// Which bus carries this device's traffic
    pub fn kind(&self) -> BusKind {
        match self {
            Self::I2cDirect { .. } | Self::I2cHub { .. } => BusKind::I2c,
            Self::SpiHub { .. } => BusKind::Spi,
        }
    }

    /// I2C target address, if the device sits on I2C
    pub fn i2c_address(&self) -> Option<u8> {
        match self {
            Self::I2cDirect { address, .. } | Self::I2cHub { address, .. } => {
                Some(address.get())
            }
            Self::SpiHub { .. } => None,
        }
    }

    /// Encoded access byte for the dock status blob
    pub fn status_code(&self) -> u8 {
        match self {
            Self::I2cDirect { .. } => 0,
            Self::I2cHub { .. } => 1,
            Self::SpiHub { .. } => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: AccessLimits = AccessLimits { gpio_count: 16 };

    #[test]
    fn test_bind_i2c_direct() {
        let params = AccessParams::I2cDirect {
            address: 0x08,
            intr_gpio: 3,
        };
        let handle = params.bind(&LIMITS).unwrap();
        assert_eq!(handle.kind(), BusKind::I2c);
        assert_eq!(handle.i2c_address(), Some(0x08));
    }

    #[test]
    fn test_reserved_addresses_rejected() {
        for address in [0x00, 0x07, 0x78, 0x7F, 0x80] {
            let params = AccessParams::I2cDirect {
                address,
                intr_gpio: 0,
            };
            assert_eq!(params.bind(&LIMITS), Err(Error::InvalidAccessConfig));
        }
    }

    #[test]
    fn test_gpio_out_of_range() {
        let params = AccessParams::SpiHub {
            reset_gpio: 2,
            wp_gpio: 16,
        };
        assert_eq!(params.bind(&LIMITS), Err(Error::InvalidAccessConfig));
    }

    #[test]
    fn test_shared_reset_and_wp() {
        let params = AccessParams::I2cHub {
            address: 0x50,
            reset_gpio: 4,
            wp_gpio: 4,
        };
        assert_eq!(params.bind(&LIMITS), Err(Error::InvalidAccessConfig));

        let params = AccessParams::I2cHub {
            address: 0x50,
            reset_gpio: 4,
            wp_gpio: 5,
        };
        let handle = params.bind(&LIMITS).unwrap();
        assert_eq!(handle.status_code(), 1);
    }
}
