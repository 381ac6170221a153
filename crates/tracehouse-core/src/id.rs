//! Trace Identifiers
//!
//! A trace ID is 16 opaque bytes, globally unique within a tenant. IDs are
//! compared byte-wise and rendered as lowercase hex on the query surface.

use crate::error::{Error, Result};
use std::fmt;

/// 16-byte trace identifier, compared byte-wise.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId([u8; 16]);

impl TraceId {
    pub const LEN: usize = 16;

    /// Build from a raw byte slice. The slice must be exactly 16 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::LEN {
            return Err(Error::InvalidTraceId {
                expected: Self::LEN,
                got: bytes.len(),
            });
        }
        let mut id = [0u8; Self::LEN];
        id.copy_from_slice(bytes);
        Ok(TraceId(id))
    }

    /// Parse a lowercase or uppercase hex string of exactly 32 characters.
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != Self::LEN * 2 {
            return Err(Error::InvalidTraceIdHex(s.to_string()));
        }
        let mut id = [0u8; Self::LEN];
        for (i, byte) in id.iter_mut().enumerate() {
            let pair = &s[i * 2..i * 2 + 2];
            *byte = u8::from_str_radix(pair, 16)
                .map_err(|_| Error::InvalidTraceIdHex(s.to_string()))?;
        }
        Ok(TraceId(id))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Lowercase hex, the transport encoding for JSON and query responses.
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(Self::LEN * 2);
        for b in &self.0 {
            use fmt::Write;
            let _ = write!(s, "{:02x}", b);
        }
        s
    }
}

impl AsRef<[u8]> for TraceId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraceId({})", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip() {
        let id = TraceId::from_slice(&[
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d,
            0x0e, 0xff,
        ])
        .unwrap();
        assert_eq!(id.to_hex(), "000102030405060708090a0b0c0d0eff");
        assert_eq!(TraceId::from_hex(&id.to_hex()).unwrap(), id);
    }

    #[test]
    fn test_invalid_lengths() {
        assert!(TraceId::from_slice(&[0x01]).is_err());
        assert!(TraceId::from_hex("abcd").is_err());
        assert!(TraceId::from_hex("zz0102030405060708090a0b0c0d0e0f").is_err());
    }
}
