//! Bitcoin-wire message framing: `magic(4) ‖ command(12) ‖ length(4) ‖
//! checksum(4) ‖ payload` (spec §4.6), plus the handful of payload encodings
//! the client speaks (`version`, `verack`, `ping`/`pong`, `inv`).

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use equisolo_bitcoin::{reverse_bytes, sha256d};

use crate::errors::MessageError;

const HEADER_LEN: usize = 24;
const COMMAND_LEN: usize = 12;
/// Matches the teacher's `Message::MAX_SIZE`, generous for a client that
/// only ever cares about small control messages and `inv` announcements.
const MAX_PAYLOAD: usize = 4 * 1024 * 1024;

pub const CMD_VERSION: &str = "version";
pub const CMD_VERACK: &str = "verack";
pub const CMD_PING: &str = "ping";
pub const CMD_PONG: &str = "pong";
pub const CMD_INV: &str = "inv";

/// A decoded message: command name (trailing NULs stripped) and raw payload.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub command: String,
    pub payload: Vec<u8>,
}

fn encode_command(command: &str) -> [u8; COMMAND_LEN] {
    let mut buf = [0u8; COMMAND_LEN];
    let bytes = command.as_bytes();
    buf[..bytes.len()].copy_from_slice(bytes);
    buf
}

fn decode_command(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Serializes a full wire message (header + payload) for one `magic`.
pub fn encode_message(magic: u32, command: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&magic.to_le_bytes());
    out.extend_from_slice(&encode_command(command));
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    let checksum = sha256d(payload);
    out.extend_from_slice(&checksum[0..4]);
    out.extend_from_slice(payload);
    out
}

/// Reads and resyncs a framed message off an async stream (spec §4.6: "on
/// magic mismatch, resync by shifting one byte at a time; on checksum
/// mismatch, resync from scratch").
///
/// `buf` is the caller-owned read buffer, carried across calls so a partial
/// tail left by one message survives into the next read.
pub async fn read_message<R>(
    stream: &mut R,
    buf: &mut BytesMut,
    magic: u32,
) -> Result<RawMessage, MessageError>
where
    R: AsyncRead + Unpin,
{
    loop {
        while buf.len() < 4 {
            fill(stream, buf).await?;
        }
        let candidate = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if candidate != magic {
            buf.advance(1);
            continue;
        }

        while buf.len() < HEADER_LEN {
            fill(stream, buf).await?;
        }
        let command = decode_command(&buf[4..4 + COMMAND_LEN]);
        let length = u32::from_le_bytes(buf[16..20].try_into().unwrap()) as usize;
        let checksum: [u8; 4] = buf[20..24].try_into().unwrap();

        if length > MAX_PAYLOAD {
            // A sane header wouldn't claim this; treat the magic as
            // coincidental and resync byte by byte.
            buf.advance(1);
            continue;
        }

        while buf.len() < HEADER_LEN + length {
            fill(stream, buf).await?;
        }
        let payload = buf[HEADER_LEN..HEADER_LEN + length].to_vec();
        let actual = sha256d(&payload);
        if actual[0..4] != checksum {
            buf.advance(1);
            continue;
        }

        buf.advance(HEADER_LEN + length);
        return Ok(RawMessage { command, payload });
    }
}

async fn fill<R>(stream: &mut R, buf: &mut BytesMut) -> Result<(), MessageError>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 4096];
    let n = stream.read(&mut chunk).await?;
    if n == 0 {
        return Err(MessageError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "peer closed connection",
        )));
    }
    buf.extend_from_slice(&chunk[..n]);
    Ok(())
}

/// A zeroed 26-byte net_addr (no services, no IP, no port) — the spec calls
/// for "two zeroed netaddrs" in the version handshake.
fn zero_net_addr() -> [u8; 26] {
    [0u8; 26]
}

/// Builds a `version` message payload (spec §4.6).
pub struct VersionFields {
    pub protocol_version: i32,
    pub services: u64,
    pub timestamp: i64,
    pub nonce: u64,
    pub user_agent: String,
    pub start_height: i32,
    pub relay: bool,
}

pub fn encode_version(fields: &VersionFields) -> Vec<u8> {
    let mut out = Vec::with_capacity(86 + fields.user_agent.len());
    out.extend_from_slice(&fields.protocol_version.to_le_bytes());
    out.extend_from_slice(&fields.services.to_le_bytes());
    out.extend_from_slice(&fields.timestamp.to_le_bytes());
    out.extend_from_slice(&zero_net_addr()); // addr_recv
    out.extend_from_slice(&zero_net_addr()); // addr_from
    out.extend_from_slice(&fields.nonce.to_le_bytes());
    out.extend_from_slice(&equisolo_bitcoin::encode_varint(fields.user_agent.len() as u64));
    out.extend_from_slice(fields.user_agent.as_bytes());
    out.extend_from_slice(&fields.start_height.to_le_bytes());
    out.push(fields.relay as u8);
    out
}

/// One entry of a decoded `inv` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvType {
    Error,
    Tx,
    Block,
    Other(u32),
}

impl From<u32> for InvType {
    fn from(value: u32) -> Self {
        match value {
            0 => InvType::Error,
            1 => InvType::Tx,
            2 => InvType::Block,
            other => InvType::Other(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InvEntry {
    pub inv_type: InvType,
    /// Display-order (big-endian) hex hash, matching the convention the rest
    /// of this codebase uses for block hashes.
    pub hash_hex: String,
}

/// Decodes an `inv` payload: a varint count followed by `(type:u32,
/// hash:32 bytes)` entries.
pub fn decode_inv(payload: &[u8]) -> Option<Vec<InvEntry>> {
    let (count, mut offset) = equisolo_bitcoin::decode_varint(payload)?;
    if payload.len() < offset + (count as usize).saturating_mul(36) {
        return None;
    }
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if payload.len() < offset + 36 {
            return None;
        }
        let inv_type = u32::from_le_bytes(payload[offset..offset + 4].try_into().unwrap());
        let hash = &payload[offset + 4..offset + 36];
        entries.push(InvEntry {
            inv_type: InvType::from(inv_type),
            hash_hex: hex::encode(reverse_bytes(hash)),
        });
        offset += 36;
    }
    Some(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_command_round_trips() {
        let encoded = encode_command("version");
        assert_eq!(decode_command(&encoded), "version");
    }

    #[test]
    fn encode_message_checksum_matches_payload() {
        let msg = encode_message(0xDEADBEEF, "verack", &[]);
        assert_eq!(msg.len(), HEADER_LEN);
        let checksum = sha256d(&[]);
        assert_eq!(&msg[20..24], &checksum[0..4]);
    }

    #[test]
    fn decode_inv_reads_type_and_hash() {
        let mut payload = vec![0x01]; // varint count = 1
        payload.extend_from_slice(&2u32.to_le_bytes()); // type = block
        payload.extend_from_slice(&[0xAB; 32]);
        let entries = decode_inv(&payload).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].inv_type, InvType::Block);
        assert_eq!(entries[0].hash_hex, hex::encode([0xAB; 32]));
    }

    #[tokio::test]
    async fn read_message_resyncs_past_garbage_before_magic() {
        let magic = 0xCAFEBABEu32;
        let mut wire = vec![0xFFu8; 3]; // junk before the real magic
        wire.extend_from_slice(&encode_message(magic, "verack", &[]));
        let mut cursor = std::io::Cursor::new(wire);
        let mut buf = BytesMut::new();
        let msg = read_message(&mut cursor, &mut buf, magic).await.unwrap();
        assert_eq!(msg.command, "verack");
    }

    #[tokio::test]
    async fn read_message_resyncs_past_bad_checksum() {
        let magic = 0xCAFEBABEu32;
        let mut corrupt = encode_message(magic, "ping", &[1, 2, 3, 4, 5, 6, 7, 8]);
        // Flip a payload byte so the checksum no longer matches.
        let payload_start = HEADER_LEN;
        corrupt[payload_start] ^= 0xFF;
        let mut wire = corrupt;
        wire.extend_from_slice(&encode_message(magic, "verack", &[]));
        let mut cursor = std::io::Cursor::new(wire);
        let mut buf = BytesMut::new();
        let msg = read_message(&mut cursor, &mut buf, magic).await.unwrap();
        assert_eq!(msg.command, "verack");
    }
}
