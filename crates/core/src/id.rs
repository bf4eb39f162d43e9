//! SHA-1 object ids for git-compatible content-addressed storage.

use crate::error::OdbError;
use crate::OdbResult;
use serde::{Deserialize, Serialize};

/// A 20-byte SHA-1 object id, rendered as 40 lowercase hex characters.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ObjectId([u8; 20]);

impl ObjectId {
    /// Create an id from raw bytes.
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Get the id as a byte slice.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Convert to a 40-character lowercase hex string.
    pub fn to_hex(&self) -> String {
        const HEX_CHARS: &[u8] = b"0123456789abcdef";
        let mut hex = String::with_capacity(40);
        for &byte in &self.0 {
            hex.push(HEX_CHARS[(byte >> 4) as usize] as char);
            hex.push(HEX_CHARS[(byte & 0xf) as usize] as char);
        }
        hex
    }

    /// Parse from a 40-character hex string.
    pub fn from_hex(hex: &str) -> OdbResult<Self> {
        if hex.len() != 40 {
            return Err(OdbError::InvalidId(format!(
                "expected 40 hex characters, got {}",
                hex.len()
            )));
        }

        let mut bytes = [0u8; 20];
        for i in 0..20 {
            let high = hex_char_to_nibble(hex.as_bytes()[i * 2])?;
            let low = hex_char_to_nibble(hex.as_bytes()[i * 2 + 1])?;
            bytes[i] = (high << 4) | low;
        }
        Ok(Self(bytes))
    }
}

fn hex_char_to_nibble(c: u8) -> OdbResult<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(OdbError::InvalidId(format!(
            "invalid hex character: {}",
            c as char
        ))),
    }
}

impl std::fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
