use bytes::{Buf, BufMut, Bytes, BytesMut};

use sqlrelay_common::error::{GatewayError, Result};

use crate::constant::NUL;

/// Cursor over one packet's bytes, with the length-encoded integer/string
/// helpers the wire format needs.
///
/// @see <a href="https://dev.mysql.com/doc/internals/en/describing-packets.html">describing packets</a>
pub struct Payload {
    bytes_mut: BytesMut,
}

impl Payload {
    pub fn new() -> Self {
        Payload {
            bytes_mut: BytesMut::new(),
        }
    }

    pub fn from_bytes(bytes_mut: BytesMut) -> Self {
        Payload { bytes_mut }
    }

    pub fn put_u8(&mut self, val: u8) {
        self.bytes_mut.put_u8(val);
    }

    pub fn put_u16_le(&mut self, val: u16) {
        self.bytes_mut.put_u16_le(val);
    }

    pub fn put_u32_le(&mut self, val: u32) {
        self.bytes_mut.put_u32_le(val);
    }

    pub fn put_slice(&mut self, val: &[u8]) {
        self.bytes_mut.put_slice(val);
    }

    pub fn put_string_with_nul(&mut self, val: &[u8]) {
        self.bytes_mut.put_slice(val);
        self.bytes_mut.put_u8(NUL);
    }

    pub fn get_uint_le(&mut self, n: usize) -> u64 {
        self.bytes_mut.get_uint_le(n)
    }

    pub fn get_uint(&mut self, n: usize) -> u64 {
        self.bytes_mut.get_uint(n)
    }

    pub fn advance(&mut self, n: usize) {
        self.bytes_mut.advance(n);
    }

    pub fn remaining(&self) -> usize {
        self.bytes_mut.remaining()
    }

    /// Reads a NUL-terminated string, consuming the terminator.
    pub fn get_string_nul(&mut self) -> String {
        let pos = self
            .bytes_mut
            .as_ref()
            .iter()
            .position(|&b| b == NUL)
            .unwrap_or(self.bytes_mut.len());
        let bytes = self.bytes_mut.split_to(pos);
        let result = String::from_utf8_lossy(bytes.as_ref()).to_string();
        if self.bytes_mut.remaining() > 0 {
            self.bytes_mut.advance(1);
        }
        result
    }

    /// Writes a length-encoded integer.
    ///
    /// @see <a href="https://dev.mysql.com/doc/internals/en/integer.html#packet-Protocol::LengthEncodedInteger">LengthEncodedInteger</a>
    pub fn put_int_lenenc(&mut self, v: u64) {
        if v < 0xfb {
            self.bytes_mut.put_u8(v as u8);
        } else if v < 1 << 16 {
            self.bytes_mut.put_u8(0xfc);
            self.bytes_mut.put_u16_le(v as u16);
        } else if v < 1 << 24 {
            self.bytes_mut.put_u8(0xfd);
            self.bytes_mut.put_uint_le(v, 3);
        } else {
            self.bytes_mut.put_u8(0xfe);
            self.bytes_mut.put_u64_le(v);
        }
    }

    /// Reads `n` bytes as a big-endian unsigned integer, failing instead of
    /// panicking when fewer than `n` bytes remain.
    fn get_uint_checked(&mut self, n: usize) -> Result<u64> {
        if self.bytes_mut.remaining() < n {
            return Err(GatewayError::ProtocolMalformed(format!(
                "truncated payload: needed {} bytes, {} remaining",
                n,
                self.bytes_mut.remaining()
            )));
        }
        Ok(self.bytes_mut.get_uint(n))
    }

    /// Splits off `length` bytes, failing instead of panicking when fewer
    /// bytes remain than the attacker-controlled `length` claims.
    fn split_to_checked(&mut self, length: usize) -> Result<Vec<u8>> {
        if self.bytes_mut.remaining() < length {
            return Err(GatewayError::ProtocolMalformed(format!(
                "truncated payload: declared length {} exceeds {} remaining",
                length,
                self.bytes_mut.remaining()
            )));
        }
        Ok(self.bytes_mut.split_to(length).to_vec())
    }

    /// Reads a length-encoded integer.
    pub fn get_int_lenenc(&mut self) -> Result<u64> {
        let first_byte = self.get_uint_checked(1)? & 0xff;
        match first_byte {
            0..=0xfa => Ok(first_byte),
            0xfb => Ok(0),
            0xfc => self.get_uint_checked(2),
            0xfd => self.get_uint_checked(3),
            _ => self.get_uint_checked(8),
        }
    }

    /// Reads a length-encoded string.
    pub fn get_string_lenenc(&mut self) -> Result<Vec<u8>> {
        let length = self.get_int_lenenc()? as usize;
        self.split_to_checked(length)
    }

    /// Reads a fixed-length string whose length is itself a leading byte.
    pub fn get_string_fix(&mut self) -> Result<Vec<u8>> {
        let length = (self.get_uint_checked(1)? & 0xff) as usize;
        self.split_to_checked(length)
    }

    /// Reads exactly `n` bytes, failing instead of panicking if fewer remain.
    pub fn get_fixed_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        self.split_to_checked(n)
    }

    pub fn get_bytes(&mut self) -> Bytes {
        self.bytes_mut.split().freeze()
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenenc_round_trips_across_boundaries() {
        for v in [0u64, 0xfa, 0xfb, 0xfc, 0xffff, 0x1_0000, 0xff_ffff, 1 << 32] {
            let mut payload = Payload::new();
            payload.put_int_lenenc(v);
            let mut reader = Payload::from_bytes(BytesMut::from(&payload.get_bytes()[..]));
            assert_eq!(reader.get_int_lenenc().unwrap(), v, "round trip failed for {}", v);
        }
    }

    #[test]
    fn get_string_fix_rejects_declared_length_past_end() {
        let mut payload = Payload::new();
        payload.put_u8(20); // claims 20 bytes follow
        payload.put_slice(b"short");
        let mut reader = Payload::from_bytes(BytesMut::from(&payload.get_bytes()[..]));
        assert!(reader.get_string_fix().is_err());
    }

    #[test]
    fn get_string_lenenc_rejects_declared_length_past_end() {
        let mut payload = Payload::new();
        payload.put_int_lenenc(1000);
        payload.put_slice(b"short");
        let mut reader = Payload::from_bytes(BytesMut::from(&payload.get_bytes()[..]));
        assert!(reader.get_string_lenenc().is_err());
    }

    #[test]
    fn nul_terminated_string_round_trip() {
        let mut payload = Payload::new();
        payload.put_string_with_nul(b"alice");
        payload.put_u8(0x42);
        let mut reader = Payload::from_bytes(BytesMut::from(&payload.get_bytes()[..]));
        assert_eq!(reader.get_string_nul(), "alice");
        assert_eq!(reader.get_uint(1), 0x42);
    }
}
