//! 140-byte Equihash header serialization (spec §4.2, "Header").

use byteorder::{LittleEndian, WriteBytesExt};

pub const HEADER_LEN: usize = 140;
pub const NONCE_LEN: usize = 32;

/// Serializes the Equihash block header: `version(4) || prevHashReversed(32)
/// || merkleRootReversed(32) || hashReserved(32) || nTime(4) ||
/// bitsReversed(4) || nonce(32)`, all little-endian.
pub fn build_header(
    version: u32,
    prev_hash_reversed: &[u8; 32],
    merkle_root_reversed: &[u8; 32],
    hash_reserved: &[u8; 32],
    n_time: u32,
    bits_reversed: &[u8; 4],
    nonce: &[u8; NONCE_LEN],
) -> [u8; HEADER_LEN] {
    let mut buf = Vec::with_capacity(HEADER_LEN);
    buf.write_u32::<LittleEndian>(version).unwrap();
    buf.extend_from_slice(prev_hash_reversed);
    buf.extend_from_slice(merkle_root_reversed);
    buf.extend_from_slice(hash_reserved);
    buf.write_u32::<LittleEndian>(n_time).unwrap();
    buf.extend_from_slice(bits_reversed);
    buf.extend_from_slice(nonce);

    let mut out = [0u8; HEADER_LEN];
    out.copy_from_slice(&buf);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_exactly_140_bytes() {
        let header = build_header(4, &[0; 32], &[0; 32], &[0; 32], 0, &[0; 4], &[0; 32]);
        assert_eq!(header.len(), HEADER_LEN);
    }

    #[test]
    fn version_is_first_four_bytes_little_endian() {
        let header = build_header(0x0042, &[0; 32], &[0; 32], &[0; 32], 0, &[0; 4], &[0; 32]);
        assert_eq!(&header[0..4], &0x0042u32.to_le_bytes());
    }

    #[test]
    fn ntime_sits_at_offset_100() {
        let header = build_header(0, &[0; 32], &[0; 32], &[0; 32], 0xDEAD_BEEF, &[0; 4], &[0; 32]);
        assert_eq!(&header[100..104], &0xDEAD_BEEFu32.to_le_bytes());
    }
}
