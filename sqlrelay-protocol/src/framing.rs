//! Packet header layout and short-read / continuation-packet handling.
//!
//! Every MySQL packet on the wire is
//! `payload_length (3 LE bytes) || sequence_number (1 byte) || payload`.
//! `MYSQL_GET_PACKET_LEN`/`MYSQL_GET_PACKET_NO`/`MYSQL_GET_COMMAND` are the
//! macro-based accessors this module replaces with explicit functions.

use sqlrelay_common::error::{GatewayError, Result};

pub const HEADER_LEN: usize = 4;

/// Payload length `0xFFFFFF` marks a continuation packet: more payload
/// follows in a subsequent packet with the next sequence number.
pub const MAX_PACKET_PAYLOAD_LEN: usize = 0x00ff_ffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub payload_length: usize,
    pub sequence_id: u8,
}

pub fn unpack_le2(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

pub fn unpack_le3(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0])
}

pub fn unpack_le4(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

pub fn unpack_le8(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

pub fn pack_le2(v: u16) -> [u8; 2] {
    v.to_le_bytes()
}

pub fn pack_le3(v: u32) -> [u8; 3] {
    let b = v.to_le_bytes();
    [b[0], b[1], b[2]]
}

pub fn pack_le4(v: u32) -> [u8; 4] {
    v.to_le_bytes()
}

pub fn pack_le8(v: u64) -> [u8; 8] {
    v.to_le_bytes()
}

/// Parses the 4-byte header at the front of `bytes`. Returns `None` if
/// fewer than [`HEADER_LEN`] bytes are available (a short read: wait).
pub fn parse_header(bytes: &[u8]) -> Option<PacketHeader> {
    if bytes.len() < HEADER_LEN {
        return None;
    }
    Some(PacketHeader {
        payload_length: unpack_le3(&bytes[0..3]) as usize,
        sequence_id: bytes[3],
    })
}

/// Result of probing `bytes` for one complete packet.
pub enum FrameProbe {
    /// Not enough bytes buffered yet for even the header, or for the full
    /// payload once the header is known. Caller should wait for more I/O.
    Incomplete,
    /// A complete packet is present; `header` describes it and
    /// `bytes[HEADER_LEN..HEADER_LEN+header.payload_length]` is the payload.
    Complete { header: PacketHeader },
}

/// Probes whether `bytes` contains one full packet per the short-read
/// rule: need `4 + payload_length` total bytes.
pub fn probe_frame(bytes: &[u8]) -> FrameProbe {
    match parse_header(bytes) {
        None => FrameProbe::Incomplete,
        Some(header) => {
            let need = HEADER_LEN + header.payload_length;
            if bytes.len() < need {
                FrameProbe::Incomplete
            } else {
                FrameProbe::Complete { header }
            }
        }
    }
}

/// Checks that `next` follows `prev` modulo 256, the monotonicity rule
/// within a single command/response exchange.
pub fn is_next_sequence(prev: u8, next: u8) -> bool {
    next == prev.wrapping_add(1)
}

/// Validates a sequence of headers observed for the packets that make up a
/// single command/response exchange (including continuation packets where
/// `payload_length == MAX_PACKET_PAYLOAD_LEN`), erroring on any gap.
pub fn validate_sequence(headers: &[PacketHeader]) -> Result<()> {
    for pair in headers.windows(2) {
        if !is_next_sequence(pair[0].sequence_id, pair[1].sequence_id) {
            return Err(GatewayError::ProtocolMalformed(format!(
                "sequence gap: {} then {}",
                pair[0].sequence_id, pair[1].sequence_id
            )));
        }
    }
    Ok(())
}

/// Whether `header` marks a continuation packet (more payload follows).
pub fn is_continuation(header: &PacketHeader) -> bool {
    header.payload_length == MAX_PACKET_PAYLOAD_LEN
}

/// Builds the 4-byte header for a packet of `payload_length` bytes at
/// `sequence_id`.
pub fn build_header(payload_length: usize, sequence_id: u8) -> [u8; HEADER_LEN] {
    let len = pack_le3(payload_length as u32);
    [len[0], len[1], len[2], sequence_id]
}
