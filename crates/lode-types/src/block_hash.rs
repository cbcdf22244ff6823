use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// A 64-bit block identifier, derived from the ordered chunk hashes the
/// block contains.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockHash(pub u64);

impl BlockHash {
    /// Hex-encode the full identifier (16 lowercase digits).
    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.0)
    }

    /// High byte as a two-char hex string, used for shard directories.
    pub fn shard_prefix(&self) -> String {
        format!("{:02x}", (self.0 >> 56) as u8)
    }

    /// Blob-store key for this block's `.lrb` file.
    pub fn storage_key(&self) -> String {
        format!("chunks/{}/{}.lrb", self.shard_prefix(), self.to_hex())
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", self.to_hex())
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for BlockHash {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str_radix(s, 16).map(BlockHash)
    }
}
