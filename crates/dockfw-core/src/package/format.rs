//! Firmware package container layout
//!
//! All multi-byte fields are little endian.
//!
//! | offset | size | field                                  |
//! |--------|------|----------------------------------------|
//! | 0      | 4    | magic `DMCP`                           |
//! | 4      | 1    | format version (1)                     |
//! | 5      | 1    | flags, bit 0 signed                    |
//! | 6      | 1    | image count                            |
//! | 8      | 4    | total length                           |
//! | 12     | 4    | checksum                               |
//! | 16     | 4    | composite version                      |
//! | 20     | 2    | signature length                       |
//! | 64     | 256  | signature area (zero padded)           |
//! | 320    | 32·n | image table                            |
//!
//! Image table entry: device type @0, component id @1, flags @2 (bit 0
//! critical), row size @4, start row @6, version @8, data offset @16, data
//! length @20.
//!
//! The checksum and the signed digest cover the whole package except the
//! checksum field and the signature area.

use alloc::vec::Vec;

use bitflags::bitflags;
use sha2::{Digest, Sha256};

use crate::checksum::sum32;
use crate::device::{DeviceType, FirmwareVersion, FW_VERSION_SIZE};
use crate::error::MalformedPackage;

/// Package magic
pub const PACKAGE_MAGIC: [u8; 4] = *b"DMCP";
/// Supported container format
pub const FORMAT_VERSION: u8 = 1;
/// Header length
pub const HEADER_LEN: usize = 64;
/// Signature area length
pub const SIGNATURE_AREA_LEN: usize = 256;
/// Offset of the image table
pub const IMAGE_TABLE_OFFSET: usize = HEADER_LEN + SIGNATURE_AREA_LEN;
/// Length of one image table entry
pub const IMAGE_ENTRY_LEN: usize = 32;

const CHECKSUM_RANGE: core::ops::Range<usize> = 12..16;

bitflags! {
    /// Package header flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PackageFlags: u8 {
        /// Signature area holds a signature
        const SIGNED = 1 << 0;
    }
}

bitflags! {
    /// Image table entry flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ImageFlags: u8 {
        /// Only applied in phase 2
        const CRITICAL = 1 << 0;
    }
}

/// Decoded package header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageHeader {
    /// Header flags
    pub flags: PackageFlags,
    /// Number of image table entries
    pub image_count: u8,
    /// Total package length
    pub total_length: u32,
    /// Stored checksum
    pub checksum: u32,
    /// Dock composite version delivered by this package
    pub composite_version: u32,
    /// Bytes of the signature area in use
    pub signature_len: u16,
}

/// One image table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageEntry {
    /// Target device family (raw code)
    pub device_type: u8,
    /// Target instance
    pub component_id: u8,
    /// Entry flags
    pub flags: ImageFlags,
    /// Bytes per row
    pub row_size: u16,
    /// Device row the first data row goes to
    pub start_row: u16,
    /// Version contained in the image
    pub version: FirmwareVersion,
    /// Offset of the image data from the start of the package
    pub data_offset: u32,
    /// Length of the image data
    pub data_len: u32,
}

impl ImageEntry {
    /// Number of rows in the image
    pub fn row_count(&self) -> u32 {
        if self.row_size == 0 {
            0
        } else {
            self.data_len / self.row_size as u32
        }
    }

    /// Whether this image targets the given device
    pub fn targets(&self, device_type: DeviceType, component_id: u8) -> bool {
        self.device_type == device_type as u8 && self.component_id == component_id
    }

    /// Encode as a table entry
    pub fn to_bytes(&self) -> [u8; IMAGE_ENTRY_LEN] {
        let mut out = [0u8; IMAGE_ENTRY_LEN];
        out[0] = self.device_type;
        out[1] = self.component_id;
        out[2] = self.flags.bits();
        out[4..6].copy_from_slice(&self.row_size.to_le_bytes());
        out[6..8].copy_from_slice(&self.start_row.to_le_bytes());
        out[8..16].copy_from_slice(self.version.as_bytes());
        out[16..20].copy_from_slice(&self.data_offset.to_le_bytes());
        out[20..24].copy_from_slice(&self.data_len.to_le_bytes());
        out
    }

    fn from_bytes(b: &[u8]) -> Self {
        let mut version = [0u8; FW_VERSION_SIZE];
        version.copy_from_slice(&b[8..16]);
        Self {
            device_type: b[0],
            component_id: b[1],
            flags: ImageFlags::from_bits_truncate(b[2]),
            row_size: le16(b, 4),
            start_row: le16(b, 6),
            version: FirmwareVersion::from_bytes(version),
            data_offset: le32(b, 16),
            data_len: le32(b, 20),
        }
    }
}

fn le16(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

fn le32(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

impl PackageHeader {
    /// Decode the first [`HEADER_LEN`] bytes of a package
    pub fn parse(bytes: &[u8]) -> Result<Self, MalformedPackage> {
        if bytes.len() < HEADER_LEN {
            return Err(MalformedPackage::Truncated);
        }
        if bytes[..4] != PACKAGE_MAGIC {
            return Err(MalformedPackage::BadMagic);
        }
        if bytes[4] != FORMAT_VERSION {
            return Err(MalformedPackage::UnsupportedVersion(bytes[4]));
        }
        Ok(Self {
            flags: PackageFlags::from_bits_truncate(bytes[5]),
            image_count: bytes[6],
            total_length: le32(bytes, 8),
            checksum: le32(bytes, 12),
            composite_version: le32(bytes, 16),
            signature_len: le16(bytes, 20),
        })
    }

    /// Encode as the package header
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..4].copy_from_slice(&PACKAGE_MAGIC);
        out[4] = FORMAT_VERSION;
        out[5] = self.flags.bits();
        out[6] = self.image_count;
        out[8..12].copy_from_slice(&self.total_length.to_le_bytes());
        out[12..16].copy_from_slice(&self.checksum.to_le_bytes());
        out[16..20].copy_from_slice(&self.composite_version.to_le_bytes());
        out[20..22].copy_from_slice(&self.signature_len.to_le_bytes());
        out
    }
}

/// Structural limits applied while parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatLimits {
    /// Largest accepted package
    pub max_package_size: u32,
    /// Row sizes must be a non-zero multiple of this
    pub row_size_multiple: u16,
}

/// Header and image table of a structurally valid package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageLayout {
    /// Decoded header
    pub header: PackageHeader,
    /// Decoded image table
    pub images: Vec<ImageEntry>,
}

impl PackageLayout {
    /// Check the container structure of `bytes`
    ///
    /// Does not look at the checksum or signature.
    pub fn parse(bytes: &[u8], limits: &FormatLimits) -> Result<Self, MalformedPackage> {
        let header = PackageHeader::parse(bytes)?;
        let total = header.total_length as usize;

        if header.total_length > limits.max_package_size {
            return Err(MalformedPackage::TooLarge);
        }
        if bytes.len() < total {
            return Err(MalformedPackage::Truncated);
        }
        if header.signature_len as usize > SIGNATURE_AREA_LEN {
            return Err(MalformedPackage::BadSignatureLength);
        }
        let table_end = IMAGE_TABLE_OFFSET + header.image_count as usize * IMAGE_ENTRY_LEN;
        if table_end > total {
            return Err(MalformedPackage::Truncated);
        }

        let mut images: Vec<ImageEntry> = Vec::with_capacity(header.image_count as usize);
        for raw in bytes[IMAGE_TABLE_OFFSET..table_end].chunks_exact(IMAGE_ENTRY_LEN) {
            let entry = ImageEntry::from_bytes(raw);

            let start = entry.data_offset as usize;
            let end = start
                .checked_add(entry.data_len as usize)
                .ok_or(MalformedPackage::ImageOutOfBounds)?;
            if start < table_end || end > total {
                return Err(MalformedPackage::ImageOutOfBounds);
            }
            if entry.row_size == 0 || entry.row_size % limits.row_size_multiple.max(1) != 0 {
                return Err(MalformedPackage::BadRowSize);
            }
            if entry.data_len == 0 || entry.data_len % entry.row_size as u32 != 0 {
                return Err(MalformedPackage::PartialRow);
            }
            if entry.start_row as u32 + entry.row_count() > u16::MAX as u32 + 1 {
                return Err(MalformedPackage::RowRangeOverflow);
            }
            if images
                .iter()
                .any(|e| e.device_type == entry.device_type && e.component_id == entry.component_id)
            {
                return Err(MalformedPackage::DuplicateImage);
            }
            images.push(entry);
        }

        Ok(Self { header, images })
    }
}

/// Byte ranges covered by the checksum and the signature
pub fn covered_ranges(bytes: &[u8], total_length: usize) -> [&[u8]; 3] {
    [
        &bytes[..CHECKSUM_RANGE.start],
        &bytes[CHECKSUM_RANGE.end..HEADER_LEN],
        &bytes[IMAGE_TABLE_OFFSET..total_length],
    ]
}

/// Recompute the package checksum
pub fn compute_checksum(bytes: &[u8], total_length: usize) -> u32 {
    sum32(covered_ranges(bytes, total_length))
}

/// SHA-256 digest that the package signature is made over
pub fn digest(bytes: &[u8], total_length: usize) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for range in covered_ranges(bytes, total_length) {
        hasher.update(range);
    }
    hasher.finalize().into()
}

/// Signature bytes in use
pub fn signature<'a>(bytes: &'a [u8], header: &PackageHeader) -> &'a [u8] {
    &bytes[HEADER_LEN..HEADER_LEN + header.signature_len as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: FormatLimits = FormatLimits {
        max_package_size: 0x10000,
        row_size_multiple: 64,
    };

    fn package(entries: &[ImageEntry], data_len: usize) -> Vec<u8> {
        let table_end = IMAGE_TABLE_OFFSET + entries.len() * IMAGE_ENTRY_LEN;
        let total = table_end + data_len;
        let header = PackageHeader {
            flags: PackageFlags::empty(),
            image_count: entries.len() as u8,
            total_length: total as u32,
            checksum: 0,
            composite_version: 7,
            signature_len: 0,
        };
        let mut bytes = alloc::vec![0u8; total];
        bytes[..HEADER_LEN].copy_from_slice(&header.to_bytes());
        for (i, e) in entries.iter().enumerate() {
            let at = IMAGE_TABLE_OFFSET + i * IMAGE_ENTRY_LEN;
            bytes[at..at + IMAGE_ENTRY_LEN].copy_from_slice(&e.to_bytes());
        }
        bytes
    }

    fn entry(component_id: u8, data_offset: u32, data_len: u32) -> ImageEntry {
        ImageEntry {
            device_type: DeviceType::Ccg5 as u8,
            component_id,
            flags: ImageFlags::CRITICAL,
            row_size: 128,
            start_row: 0x200,
            version: FirmwareVersion::new(1, 2, 3, 4, [0; 4]),
            data_offset,
            data_len,
        }
    }

    #[test]
    fn test_parse_roundtrip_fields() {
        let e = entry(0, 352, 256);
        let bytes = package(&[e], 256);
        let layout = PackageLayout::parse(&bytes, &LIMITS).unwrap();
        assert_eq!(layout.header.composite_version, 7);
        assert_eq!(layout.images, [e]);
        assert_eq!(layout.images[0].row_count(), 2);
    }

    #[test]
    fn test_bad_magic_and_version() {
        let mut bytes = package(&[], 0);
        bytes[4] = 2;
        assert_eq!(
            PackageLayout::parse(&bytes, &LIMITS),
            Err(MalformedPackage::UnsupportedVersion(2))
        );
        bytes[0] = b'X';
        assert_eq!(
            PackageLayout::parse(&bytes, &LIMITS),
            Err(MalformedPackage::BadMagic)
        );
    }

    #[test]
    fn test_structural_errors() {
        let bytes = package(&[entry(0, 352, 512)], 256);
        assert_eq!(
            PackageLayout::parse(&bytes, &LIMITS),
            Err(MalformedPackage::ImageOutOfBounds)
        );

        let bytes = package(&[entry(0, 352, 200)], 256);
        assert_eq!(
            PackageLayout::parse(&bytes, &LIMITS),
            Err(MalformedPackage::PartialRow)
        );

        let mut e = entry(0, 352, 256);
        e.row_size = 100;
        let bytes = package(&[e], 256);
        assert_eq!(
            PackageLayout::parse(&bytes, &LIMITS),
            Err(MalformedPackage::BadRowSize)
        );

        let bytes = package(&[entry(0, 384, 128), entry(0, 512, 128)], 256);
        assert_eq!(
            PackageLayout::parse(&bytes, &LIMITS),
            Err(MalformedPackage::DuplicateImage)
        );

        let bytes = package(&[entry(0, 352, 256)], 256);
        assert_eq!(
            PackageLayout::parse(&bytes[..400], &LIMITS),
            Err(MalformedPackage::Truncated)
        );
    }

    #[test]
    fn test_rows_must_fit_device_row_space() {
        let mut e = entry(0, 352, 256);
        e.start_row = 0xFFFF;
        let bytes = package(&[e], 256);
        assert_eq!(
            PackageLayout::parse(&bytes, &LIMITS),
            Err(MalformedPackage::RowRangeOverflow)
        );

        // Last row lands exactly on 0xFFFF.
        e.start_row = 0xFFFE;
        let bytes = package(&[e], 256);
        assert!(PackageLayout::parse(&bytes, &LIMITS).is_ok());
    }

    #[test]
    fn test_signature_slice() {
        let mut bytes = package(&[entry(0, 352, 256)], 256);
        let mut header = PackageHeader::parse(&bytes).unwrap();
        header.signature_len = 4;
        bytes[HEADER_LEN..HEADER_LEN + 5].copy_from_slice(&[1, 2, 3, 4, 5]);
        assert_eq!(signature(&bytes, &header), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_checksum_ignores_signature_area() {
        let mut bytes = package(&[entry(0, 352, 256)], 256);
        let total = bytes.len();
        let before = compute_checksum(&bytes, total);
        let digest_before = digest(&bytes, total);
        bytes[HEADER_LEN + 10] = 0xAA;
        bytes[12] = 0x55;
        assert_eq!(compute_checksum(&bytes, total), before);
        assert_eq!(digest(&bytes, total), digest_before);
        bytes[400] ^= 1;
        assert_ne!(compute_checksum(&bytes, total), before);
    }
}
