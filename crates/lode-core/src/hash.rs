use std::sync::Arc;

use blake2::{Blake2b512, Digest};

use crate::error::{LodeError, Result};
use lode_types::{BlockHash, ChunkHash};

const fn fourcc(tag: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*tag)
}

pub const BLAKE3_HASH_ID: u32 = fourcc(b"blk3");
pub const BLAKE2_HASH_ID: u32 = fourcc(b"blk2");

/// A named content-hash algorithm producing 64-bit identifiers.
///
/// Identifiers are the first eight bytes of the underlying digest,
/// interpreted little-endian. Two streams with equal identifiers are
/// treated as byte-identical throughout the engine.
pub trait HashApi: Send + Sync {
    fn id(&self) -> u32;
    fn name(&self) -> &'static str;
    fn hash64(&self, data: &[u8]) -> u64;
}

pub struct Blake3Hash;

impl HashApi for Blake3Hash {
    fn id(&self) -> u32 {
        BLAKE3_HASH_ID
    }

    fn name(&self) -> &'static str {
        "blake3"
    }

    fn hash64(&self, data: &[u8]) -> u64 {
        let digest = blake3::hash(data);
        let bytes: [u8; 8] = digest.as_bytes()[..8].try_into().unwrap();
        u64::from_le_bytes(bytes)
    }
}

pub struct Blake2Hash;

impl HashApi for Blake2Hash {
    fn id(&self) -> u32 {
        BLAKE2_HASH_ID
    }

    fn name(&self) -> &'static str {
        "blake2"
    }

    fn hash64(&self, data: &[u8]) -> u64 {
        let mut hasher = Blake2b512::new();
        hasher.update(data);
        let digest = hasher.finalize();
        let bytes: [u8; 8] = digest[..8].try_into().unwrap();
        u64::from_le_bytes(bytes)
    }
}

/// Look up a hash algorithm by its wire identifier.
pub fn hash_api_for_id(id: u32) -> Result<Arc<dyn HashApi>> {
    match id {
        BLAKE3_HASH_ID => Ok(Arc::new(Blake3Hash)),
        BLAKE2_HASH_ID => Ok(Arc::new(Blake2Hash)),
        other => Err(LodeError::UnknownHashId(other)),
    }
}

/// Look up a hash algorithm by its CLI name.
pub fn hash_api_for_name(name: &str) -> Result<Arc<dyn HashApi>> {
    match name {
        "blake3" => Ok(Arc::new(Blake3Hash)),
        "blake2" => Ok(Arc::new(Blake2Hash)),
        other => Err(LodeError::InvalidArgument(format!(
            "unknown hash algorithm: '{other}'"
        ))),
    }
}

pub fn hash_name(id: u32) -> &'static str {
    match id {
        BLAKE3_HASH_ID => "blake3",
        BLAKE2_HASH_ID => "blake2",
        _ => "unknown",
    }
}

/// Hash an ordered sequence of chunk hashes as concatenated
/// little-endian u64s. Used for both asset content hashes and block
/// hashes, so equal chunk sequences compare equal without touching the
/// chunk bytes.
pub fn hash_of_chunk_hashes(api: &dyn HashApi, chunk_hashes: &[ChunkHash]) -> u64 {
    let mut buf = Vec::with_capacity(chunk_hashes.len() * 8);
    for hash in chunk_hashes {
        buf.extend_from_slice(&hash.to_le_bytes());
    }
    api.hash64(&buf)
}

pub fn block_hash_of_chunks(api: &dyn HashApi, chunk_hashes: &[ChunkHash]) -> BlockHash {
    BlockHash(hash_of_chunk_hashes(api, chunk_hashes))
}
