use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// A 64-bit chunk identifier, truncated from the configured content hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkHash(pub u64);

impl ChunkHash {
    /// Hex-encode the full identifier (16 lowercase digits).
    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.0)
    }

    /// The identifier as little-endian bytes, the form that feeds
    /// asset and block hash computation.
    pub fn to_le_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }
}

impl fmt::Debug for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkHash({})", self.to_hex())
    }
}

impl fmt::Display for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for ChunkHash {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str_radix(s, 16).map(ChunkHash)
    }
}
