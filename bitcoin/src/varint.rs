//! Bitcoin `CompactSize` ("varint") encoding, used when serializing the
//! transaction count in a block.

use byteorder::{LittleEndian, WriteBytesExt};

/// Encodes `n` using Bitcoin's CompactSize convention:
/// `0x00..=0xFC` → 1 byte; `< 0x10000` → `0xFD` + u16 LE; `< 0x1_0000_0000` →
/// `0xFE` + u32 LE; otherwise `0xFF` + u64 LE.
pub fn encode_varint(n: u64) -> Vec<u8> {
    let mut out = Vec::new();
    if n < 0xFD {
        out.push(n as u8);
    } else if n < 0x1_0000 {
        out.push(0xFD);
        out.write_u16::<LittleEndian>(n as u16).unwrap();
    } else if n < 0x1_0000_0000 {
        out.push(0xFE);
        out.write_u32::<LittleEndian>(n as u32).unwrap();
    } else {
        out.push(0xFF);
        out.write_u64::<LittleEndian>(n).unwrap();
    }
    out
}

/// Decodes a CompactSize-encoded integer from the front of `buf`, returning
/// the value and the number of bytes consumed.
pub fn decode_varint(buf: &[u8]) -> Option<(u64, usize)> {
    let prefix = *buf.first()?;
    match prefix {
        0..=0xFC => Some((prefix as u64, 1)),
        0xFD => {
            let b = buf.get(1..3)?;
            Some((u16::from_le_bytes([b[0], b[1]]) as u64, 3))
        }
        0xFE => {
            let b = buf.get(1..5)?;
            Some((u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as u64, 5))
        }
        0xFF => {
            let b = buf.get(1..9)?;
            let mut arr = [0u8; 8];
            arr.copy_from_slice(b);
            Some((u64::from_le_bytes(arr), 9))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_1_byte() {
        for n in [0u64, 1, 0xFC] {
            let enc = encode_varint(n);
            assert_eq!(enc.len(), 1);
            assert_eq!(decode_varint(&enc), Some((n, 1)));
        }
    }

    #[test]
    fn roundtrip_3_byte() {
        for n in [0xFD_u64, 0x1234, 0xFFFF] {
            let enc = encode_varint(n);
            assert_eq!(enc.len(), 3);
            assert_eq!(decode_varint(&enc), Some((n, 3)));
        }
    }

    #[test]
    fn roundtrip_5_byte() {
        for n in [0x1_0000_u64, 0xDEAD_BEEF, 0xFFFF_FFFF] {
            let enc = encode_varint(n);
            assert_eq!(enc.len(), 5);
            assert_eq!(decode_varint(&enc), Some((n, 5)));
        }
    }

    #[test]
    fn roundtrip_9_byte() {
        for n in [0x1_0000_0000_u64, u64::MAX] {
            let enc = encode_varint(n);
            assert_eq!(enc.len(), 9);
            assert_eq!(decode_varint(&enc), Some((n, 9)));
        }
    }
}
