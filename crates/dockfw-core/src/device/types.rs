//! Device classification and firmware version types

use core::fmt;

/// Family of a downstream dock device
///
/// The numeric codes are the ones reported upstream in the dock status blob
/// and carried in package image tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum DeviceType {
    /// CCG3 PD controller
    Ccg3 = 0x01,
    /// CY7C65219 USB-C port controller
    Cy7c65219 = 0x02,
    /// CCG4 PD controller
    Ccg4 = 0x03,
    /// CCG5 PD controller
    Ccg5 = 0x04,
    /// HX3 USB hub
    Hx3 = 0x05,
    /// HX3PD hub block
    Hx3PdHub = 0x0A,
    /// HX3PD PD block
    Hx3PdPd = 0x0B,
    /// CCG2 PD controller
    Ccg2 = 0x0D,
    /// Thunderbolt retimer
    TrTbt = 0x0E,
    /// CCG5C PD controller
    Ccg5c = 0x12,
    /// CCG6 PD controller
    Ccg6 = 0x13,
    /// CCG5 with Thunderbolt controller
    Ccg5Tbt = 0x17,
    /// CCG5C with Thunderbolt controller
    Ccg5cTbt = 0x18,
    /// Goshen Ridge Thunderbolt controller
    Goshen = 0x1D,
    /// FX-VL video bridge
    Fxvl = 0x1E,
    /// PMG1-S3 PD controller
    Pmg1s3 = 0xF0,
    /// CCG7SC PD controller
    Ccg7sc = 0xF1,
    /// Generic SPI-attached component
    SpiComponent = 0xFF,
}

impl DeviceType {
    /// All known device types
    pub const ALL: [DeviceType; 18] = [
        Self::Ccg3,
        Self::Cy7c65219,
        Self::Ccg4,
        Self::Ccg5,
        Self::Hx3,
        Self::Hx3PdHub,
        Self::Hx3PdPd,
        Self::Ccg2,
        Self::TrTbt,
        Self::Ccg5c,
        Self::Ccg6,
        Self::Ccg5Tbt,
        Self::Ccg5cTbt,
        Self::Goshen,
        Self::Fxvl,
        Self::Pmg1s3,
        Self::Ccg7sc,
        Self::SpiComponent,
    ];

    /// Decode a wire code
    pub fn from_u8(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| *t as u8 == code)
    }

    /// Short lowercase name, as used in dock description files
    pub fn name(self) -> &'static str {
        match self {
            Self::Ccg3 => "ccg3",
            Self::Cy7c65219 => "cy7c65219",
            Self::Ccg4 => "ccg4",
            Self::Ccg5 => "ccg5",
            Self::Hx3 => "hx3",
            Self::Hx3PdHub => "hx3pd-hub",
            Self::Hx3PdPd => "hx3pd-pd",
            Self::Ccg2 => "ccg2",
            Self::TrTbt => "tr-tbt",
            Self::Ccg5c => "ccg5c",
            Self::Ccg6 => "ccg6",
            Self::Ccg5Tbt => "ccg5-tbt",
            Self::Ccg5cTbt => "ccg5c-tbt",
            Self::Goshen => "goshen",
            Self::Fxvl => "fxvl",
            Self::Pmg1s3 => "pmg1s3",
            Self::Ccg7sc => "ccg7sc",
            Self::SpiComponent => "spi",
        }
    }

    /// Look up a type by its [`name`](Self::name)
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a device lays out its firmware banks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ImageMode {
    /// One application image, updated from the bootloader
    #[default]
    Single = 0,
    /// Two equal banks, the inactive one is updated
    DualSymmetric = 1,
    /// Two banks of different sizes (recovery + main)
    DualAsymmetric = 2,
}

impl ImageMode {
    /// Decode a wire code
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Single),
            1 => Some(Self::DualSymmetric),
            2 => Some(Self::DualAsymmetric),
            _ => None,
        }
    }

    /// Whether the device has two application banks
    pub fn is_dual(self) -> bool {
        self != Self::Single
    }
}

/// Firmware bank identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ImageType {
    /// Bootloader
    #[default]
    Bootloader = 0,
    /// First application image
    Image1 = 1,
    /// Second application image
    Image2 = 2,
}

impl ImageType {
    /// Decode a wire code
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Bootloader),
            1 => Some(Self::Image1),
            2 => Some(Self::Image2),
            _ => None,
        }
    }

    /// The other application bank
    ///
    /// A device running its bootloader is updated into image 1.
    pub fn alternate(self) -> Self {
        match self {
            Self::Bootloader | Self::Image2 => Self::Image1,
            Self::Image1 => Self::Image2,
        }
    }

    /// Index into per-image status arrays (`None` for the bootloader)
    pub fn app_index(self) -> Option<usize> {
        match self {
            Self::Bootloader => None,
            Self::Image1 => Some(0),
            Self::Image2 => Some(1),
        }
    }
}

/// Outcome recorded for one application image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ImageStatus {
    /// Not yet queried
    #[default]
    Unknown = 0,
    /// Image present and current
    Valid = 1,
    /// Image absent or failed validation
    Invalid = 2,
    /// Rows are being written
    UpdateInProgress = 3,
    /// Last update attempt failed
    UpdateFailed = 4,
}

/// Length of an encoded firmware version
pub const FW_VERSION_SIZE: usize = 8;

/// 8-byte firmware version as reported by devices
///
/// Layout: bytes 0-1 build number (LE), byte 2 patch, byte 3 major in the
/// high nibble and minor in the low nibble, bytes 4-7 application tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FirmwareVersion(pub [u8; FW_VERSION_SIZE]);

impl FirmwareVersion {
    /// Build a version from its parts
    pub fn new(major: u8, minor: u8, patch: u8, build: u16, app: [u8; 4]) -> Self {
        let b = build.to_le_bytes();
        Self([
            b[0],
            b[1],
            patch,
            (major << 4) | (minor & 0x0F),
            app[0],
            app[1],
            app[2],
            app[3],
        ])
    }

    /// Wrap raw bytes
    pub const fn from_bytes(bytes: [u8; FW_VERSION_SIZE]) -> Self {
        Self(bytes)
    }

    /// Read a version from the start of `buf`
    pub fn from_slice(buf: &[u8]) -> Option<Self> {
        let bytes: [u8; FW_VERSION_SIZE] = buf.get(..FW_VERSION_SIZE)?.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Raw bytes
    pub const fn as_bytes(&self) -> &[u8; FW_VERSION_SIZE] {
        &self.0
    }

    /// Build number
    pub fn build(&self) -> u16 {
        u16::from_le_bytes([self.0[0], self.0[1]])
    }

    /// Patch level
    pub fn patch(&self) -> u8 {
        self.0[2]
    }

    /// Major version
    pub fn major(&self) -> u8 {
        self.0[3] >> 4
    }

    /// Minor version
    pub fn minor(&self) -> u8 {
        self.0[3] & 0x0F
    }

    /// Application tag
    pub fn app(&self) -> [u8; 4] {
        [self.0[4], self.0[5], self.0[6], self.0[7]]
    }

    /// Erased or never programmed
    pub fn is_blank(&self) -> bool {
        self.0.iter().all(|&b| b == 0) || self.0.iter().all(|&b| b == 0xFF)
    }

    fn release_key(&self) -> (u8, u8, u8, u16) {
        (self.major(), self.minor(), self.patch(), self.build())
    }

    /// Strictly older release than `other`
    ///
    /// A blank version is older than anything that is not blank.
    pub fn is_older_than(&self, other: &FirmwareVersion) -> bool {
        match (self.is_blank(), other.is_blank()) {
            (true, blank) => !blank,
            (false, true) => false,
            (false, false) => self.release_key() < other.release_key(),
        }
    }

    /// Parse `major.minor.patch.build`, with an optional 8-hex-digit
    /// application tag after a `-`
    pub fn parse(s: &str) -> Option<Self> {
        let (ver, app) = match s.split_once('-') {
            Some((v, a)) => (v, Some(a)),
            None => (s, None),
        };
        let mut parts = ver.trim().split('.');
        let major: u8 = parts.next()?.parse().ok()?;
        let minor: u8 = parts.next()?.parse().ok()?;
        let patch: u8 = parts.next()?.parse().ok()?;
        let build: u16 = parts.next()?.parse().ok()?;
        if parts.next().is_some() || major > 0x0F || minor > 0x0F {
            return None;
        }
        let app = match app {
            Some(a) => u32::from_str_radix(a.trim(), 16).ok()?.to_be_bytes(),
            None => [0; 4],
        };
        Some(Self::new(major, minor, patch, build, app))
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major(),
            self.minor(),
            self.patch(),
            self.build()
        )?;
        if self.app() != [0; 4] {
            write!(f, "-{:08x}", u32::from_be_bytes(self.app()))?;
        }
        Ok(())
    }
}

/// Versions of all three banks of one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FirmwareVersions {
    /// Bootloader version
    pub bootloader: FirmwareVersion,
    /// Image 1 version
    pub image1: FirmwareVersion,
    /// Image 2 version
    pub image2: FirmwareVersion,
}

impl FirmwareVersions {
    /// Version of the given bank
    pub fn get(&self, image: ImageType) -> FirmwareVersion {
        match image {
            ImageType::Bootloader => self.bootloader,
            ImageType::Image1 => self.image1,
            ImageType::Image2 => self.image2,
        }
    }

    /// Replace the version of the given bank
    pub fn set(&mut self, image: ImageType, version: FirmwareVersion) {
        match image {
            ImageType::Bootloader => self.bootloader = version,
            ImageType::Image1 => self.image1 = version,
            ImageType::Image2 => self.image2 = version,
        }
    }

    /// Decode the 24-byte bootloader/image1/image2 block
    pub fn from_block(block: &[u8; 3 * FW_VERSION_SIZE]) -> Self {
        let v = |i: usize| {
            let mut b = [0u8; FW_VERSION_SIZE];
            b.copy_from_slice(&block[i * FW_VERSION_SIZE..(i + 1) * FW_VERSION_SIZE]);
            FirmwareVersion(b)
        };
        Self {
            bootloader: v(0),
            image1: v(1),
            image2: v(2),
        }
    }

    /// Encode as the 24-byte bootloader/image1/image2 block
    pub fn to_block(&self) -> [u8; 3 * FW_VERSION_SIZE] {
        let mut out = [0u8; 3 * FW_VERSION_SIZE];
        out[..8].copy_from_slice(&self.bootloader.0);
        out[8..16].copy_from_slice(&self.image1.0);
        out[16..].copy_from_slice(&self.image2.0);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_version_layout() {
        let v = FirmwareVersion::new(3, 2, 7, 0x0123, *b"dock");
        assert_eq!(v.0, [0x23, 0x01, 7, 0x32, b'd', b'o', b'c', b'k']);
        assert_eq!(v.major(), 3);
        assert_eq!(v.minor(), 2);
        assert_eq!(v.patch(), 7);
        assert_eq!(v.build(), 0x0123);
    }

    #[test]
    fn test_release_ordering() {
        let base = FirmwareVersion::new(1, 2, 0, 100, [0; 4]);
        assert!(base.is_older_than(&FirmwareVersion::new(1, 2, 0, 101, [0; 4])));
        assert!(base.is_older_than(&FirmwareVersion::new(1, 3, 0, 0, [0; 4])));
        assert!(base.is_older_than(&FirmwareVersion::new(2, 0, 0, 0, [0; 4])));
        assert!(!base.is_older_than(&FirmwareVersion::new(1, 1, 9, 999, [0; 4])));
        // equal release, different tag: neither is older, but not equal
        let tagged = FirmwareVersion::new(1, 2, 0, 100, [1, 2, 3, 4]);
        assert!(!base.is_older_than(&tagged));
        assert!(!tagged.is_older_than(&base));
        assert_ne!(base, tagged);
    }

    #[test]
    fn test_blank_is_older() {
        let blank = FirmwareVersion::from_bytes([0xFF; 8]);
        let v = FirmwareVersion::new(0, 0, 0, 1, [0; 4]);
        assert!(blank.is_older_than(&v));
        assert!(!v.is_older_than(&blank));
        assert!(!blank.is_older_than(&FirmwareVersion::default()));
    }

    #[test]
    fn test_parse_and_display() {
        let v = FirmwareVersion::parse("2.1.4.300").unwrap();
        assert_eq!(v.to_string(), "2.1.4.300");
        let v = FirmwareVersion::parse("2.1.4.300-0a0b0c0d").unwrap();
        assert_eq!(v.app(), [0x0A, 0x0B, 0x0C, 0x0D]);
        assert_eq!(v.to_string(), "2.1.4.300-0a0b0c0d");
        assert!(FirmwareVersion::parse("16.0.0.0").is_none());
        assert!(FirmwareVersion::parse("1.2.3").is_none());
        assert!(FirmwareVersion::parse("1.2.3.4.5").is_none());
    }

    #[test]
    fn test_device_type_codes() {
        for t in DeviceType::ALL {
            assert_eq!(DeviceType::from_u8(t as u8), Some(t));
            assert_eq!(DeviceType::from_name(t.name()), Some(t));
        }
        assert_eq!(DeviceType::from_u8(0x42), None);
    }

    #[test]
    fn test_alternate_image() {
        assert_eq!(ImageType::Bootloader.alternate(), ImageType::Image1);
        assert_eq!(ImageType::Image1.alternate(), ImageType::Image2);
        assert_eq!(ImageType::Image2.alternate(), ImageType::Image1);
    }

    #[test]
    fn test_version_block() {
        let mut versions = FirmwareVersions::default();
        versions.set(ImageType::Image2, FirmwareVersion::new(1, 0, 0, 5, [0; 4]));
        let block = versions.to_block();
        assert_eq!(FirmwareVersions::from_block(&block), versions);
        assert_eq!(block[16..18], [5, 0]);
    }
}
