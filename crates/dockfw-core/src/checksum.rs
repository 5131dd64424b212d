//! Integrity checksums
//!
//! The controller uses two's-complement byte sums everywhere: a block is
//! intact when the sum of its bytes plus the stored checksum is zero.

/// 32-bit two's-complement checksum of all bytes in `chunks`
pub fn sum32<'a>(chunks: impl IntoIterator<Item = &'a [u8]>) -> u32 {
    let sum = chunks
        .into_iter()
        .flat_map(|c| c.iter())
        .fold(0u32, |acc, &b| acc.wrapping_add(b as u32));
    0u32.wrapping_sub(sum)
}

/// 8-bit two's-complement checksum of `data`
pub fn sum8(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    0u8.wrapping_sub(sum)
}
