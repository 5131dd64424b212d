//! Package composition

use alloc::vec::Vec;

use super::format::{
    self, ImageEntry, ImageFlags, PackageFlags, PackageHeader, HEADER_LEN, IMAGE_ENTRY_LEN,
    IMAGE_TABLE_OFFSET, SIGNATURE_AREA_LEN,
};
use crate::device::{DeviceType, FirmwareVersion};
use crate::error::MalformedPackage;

/// An image to place into a package
#[derive(Debug, Clone)]
pub struct PackageImage {
    /// Target device family
    pub device_type: DeviceType,
    /// Target instance
    pub component_id: u8,
    /// Apply only in phase 2
    pub critical: bool,
    /// Bytes per row
    pub row_size: u16,
    /// First device row
    pub start_row: u16,
    /// Version contained in the image
    pub version: FirmwareVersion,
    /// Image contents; padded with 0xFF to a whole number of rows
    pub data: Vec<u8>,
}

/// Builds package containers
#[derive(Debug, Clone, Default)]
pub struct PackageBuilder {
    composite_version: u32,
    images: Vec<PackageImage>,
}

impl PackageBuilder {
    /// Start a package for the given composite version
    pub fn new(composite_version: u32) -> Self {
        Self {
            composite_version,
            images: Vec::new(),
        }
    }

    /// Add an image
    pub fn image(mut self, image: PackageImage) -> Self {
        self.images.push(image);
        self
    }

    /// Produce an unsigned package
    pub fn build(&self) -> Result<Vec<u8>, MalformedPackage> {
        self.assemble(PackageFlags::empty(), 0)
    }

    /// Produce a package signed by `sign`
    ///
    /// The signature length is part of the signed header, so the signer must
    /// produce exactly `signature_len` bytes from the digest it is given.
    pub fn build_signed<F>(&self, signature_len: u16, sign: F) -> Result<Vec<u8>, MalformedPackage>
    where
        F: FnOnce(&[u8; 32]) -> Vec<u8>,
    {
        if signature_len == 0 || signature_len as usize > SIGNATURE_AREA_LEN {
            return Err(MalformedPackage::BadSignatureLength);
        }
        let mut bytes = self.assemble(PackageFlags::SIGNED, signature_len)?;
        let digest = format::digest(&bytes, bytes.len());
        let sig = sign(&digest);
        if sig.len() != signature_len as usize {
            return Err(MalformedPackage::BadSignatureLength);
        }
        // The signature area is outside the checksum, no need to refinalize.
        bytes[HEADER_LEN..HEADER_LEN + sig.len()].copy_from_slice(&sig);
        Ok(bytes)
    }

    fn assemble(&self, flags: PackageFlags, signature_len: u16) -> Result<Vec<u8>, MalformedPackage> {
        if self.images.len() > u8::MAX as usize {
            return Err(MalformedPackage::TooLarge);
        }
        let table_end = IMAGE_TABLE_OFFSET + self.images.len() * IMAGE_ENTRY_LEN;

        let mut entries = Vec::with_capacity(self.images.len());
        let mut data = Vec::new();
        for img in &self.images {
            if img.row_size == 0 {
                return Err(MalformedPackage::BadRowSize);
            }
            let row = img.row_size as usize;
            let padded = img.data.len().div_ceil(row).max(1) * row;
            let offset = table_end + data.len();
            data.extend_from_slice(&img.data);
            data.resize(offset - table_end + padded, 0xFF);

            entries.push(ImageEntry {
                device_type: img.device_type as u8,
                component_id: img.component_id,
                flags: if img.critical {
                    ImageFlags::CRITICAL
                } else {
                    ImageFlags::empty()
                },
                row_size: img.row_size,
                start_row: img.start_row,
                version: img.version,
                data_offset: offset as u32,
                data_len: padded as u32,
            });
        }

        let total = table_end + data.len();
        let header = PackageHeader {
            flags,
            image_count: self.images.len() as u8,
            total_length: u32::try_from(total).map_err(|_| MalformedPackage::TooLarge)?,
            checksum: 0,
            composite_version: self.composite_version,
            signature_len,
        };

        let mut bytes = alloc::vec![0u8; table_end];
        bytes[..HEADER_LEN].copy_from_slice(&header.to_bytes());
        for (i, e) in entries.iter().enumerate() {
            let at = IMAGE_TABLE_OFFSET + i * IMAGE_ENTRY_LEN;
            bytes[at..at + IMAGE_ENTRY_LEN].copy_from_slice(&e.to_bytes());
        }
        bytes.extend_from_slice(&data);
        finalize(&mut bytes);
        Ok(bytes)
    }
}

/// Store the checksum over the current contents
fn finalize(bytes: &mut [u8]) {
    let total = bytes.len();
    let checksum = format::compute_checksum(bytes, total);
    bytes[12..16].copy_from_slice(&checksum.to_le_bytes());
}
