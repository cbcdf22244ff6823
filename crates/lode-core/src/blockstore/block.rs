use crate::error::{LodeError, Result};
use crate::index::wire::{put_u32, put_u64, Reader};
use crate::index::BlockIndex;
use lode_types::{BlockHash, ChunkHash};

/// A block in transit through the store stack: its index plus a
/// payload. Above the compress layer the payload is the concatenated
/// uncompressed chunks; below it, the encoded form named by the tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlock {
    pub index: BlockIndex,
    pub data: Vec<u8>,
}

impl StoredBlock {
    pub fn block_hash(&self) -> BlockHash {
        self.index.block_hash
    }

    /// Locate one chunk inside the uncompressed payload. Only valid
    /// above the compress layer.
    pub fn chunk_bytes(&self, chunk: ChunkHash) -> Option<&[u8]> {
        let position = self.index.chunk_hashes.iter().position(|&c| c == chunk)?;
        let offset = self.index.chunk_offset(position) as usize;
        let size = self.index.chunk_sizes[position] as usize;
        self.data.get(offset..offset + size)
    }

    /// Serialize to the `.lrb` wire format. The payload is written as
    /// it stands; `compressed_size` is its length and
    /// `uncompressed_size` the sum of the chunk sizes.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(28 + self.index.chunk_count() * 12 + self.data.len());
        put_u64(&mut buf, self.index.block_hash.0);
        put_u32(&mut buf, self.index.chunk_count() as u32);
        put_u32(&mut buf, self.index.tag);
        put_u32(&mut buf, self.data.len() as u32);
        put_u32(&mut buf, self.index.uncompressed_size() as u32);
        for chunk in &self.index.chunk_hashes {
            put_u64(&mut buf, chunk.0);
        }
        for size in &self.index.chunk_sizes {
            put_u32(&mut buf, *size);
        }
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Decode from the `.lrb` wire format.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data, "block file");

        let block_hash = BlockHash(r.read_u64()?);
        let chunk_count = r.read_u32()? as usize;
        let tag = r.read_u32()?;
        let compressed_size = r.read_u32()? as usize;
        let uncompressed_size = r.read_u32()? as u64;

        let mut chunk_hashes = Vec::with_capacity(chunk_count);
        for _ in 0..chunk_count {
            chunk_hashes.push(ChunkHash(r.read_u64()?));
        }
        let mut chunk_sizes = Vec::with_capacity(chunk_count);
        for _ in 0..chunk_count {
            chunk_sizes.push(r.read_u32()?);
        }

        let payload = r.read_bytes(compressed_size)?;
        r.expect_end()?;

        let index = BlockIndex {
            block_hash,
            tag,
            chunk_hashes,
            chunk_sizes,
        };
        if index.uncompressed_size() != uncompressed_size {
            return Err(LodeError::BlockDecode(
                block_hash,
                format!(
                    "header uncompressed size {} disagrees with chunk sizes {}",
                    uncompressed_size,
                    index.uncompressed_size()
                ),
            ));
        }

        Ok(Self {
            index,
            data: payload.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{Blake3Hash, HashApi};

    fn sample_block() -> StoredBlock {
        let api = Blake3Hash;
        let data: Vec<u8> = (0..60u8).collect();
        let chunk_hashes = vec![
            ChunkHash(api.hash64(&data[..10])),
            ChunkHash(api.hash64(&data[10..60])),
        ];
        StoredBlock {
            index: BlockIndex::new(&api, 0, chunk_hashes, vec![10, 50]),
            data,
        }
    }

    #[test]
    fn wire_roundtrip() {
        let block = sample_block();
        let decoded = StoredBlock::from_slice(&block.to_vec()).unwrap();
        assert_eq!(decoded, block);
    }

    #[test]
    fn chunk_bytes_locates_chunks() {
        let block = sample_block();
        let second = block.index.chunk_hashes[1];
        assert_eq!(block.chunk_bytes(second).unwrap(), &block.data[10..60]);
        assert!(block.chunk_bytes(ChunkHash(0xFFFF)).is_none());
    }

    #[test]
    fn rejects_size_disagreement() {
        let block = sample_block();
        let mut bytes = block.to_vec();
        // Corrupt the uncompressed_size field (offset 20).
        bytes[20] ^= 0x01;
        assert!(matches!(
            StoredBlock::from_slice(&bytes),
            Err(LodeError::BlockDecode(..))
        ));
    }

    #[test]
    fn rejects_truncated_payload() {
        let block = sample_block();
        let bytes = block.to_vec();
        assert!(StoredBlock::from_slice(&bytes[..bytes.len() - 4]).is_err());
    }
}
