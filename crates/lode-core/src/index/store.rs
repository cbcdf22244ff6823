use std::collections::{HashMap, HashSet};

use crate::error::{LodeError, Result};
use crate::hash::{block_hash_of_chunks, HashApi};
use crate::index::version::VersionIndex;
use crate::index::wire::{put_u32, put_u64, Reader};
use lode_types::{BlockHash, ChunkHash};

pub const STORE_INDEX_MAGIC: u32 = u32::from_le_bytes(*b"lsi0");
pub const STORE_INDEX_VERSION: u32 = 1;

/// The index half of a stored block: its identity, compression tag, and
/// ordered chunk listing. The block hash is a function of the ordered
/// chunk hashes alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockIndex {
    pub block_hash: BlockHash,
    pub tag: u32,
    pub chunk_hashes: Vec<ChunkHash>,
    pub chunk_sizes: Vec<u32>,
}

impl BlockIndex {
    pub fn new(
        hash: &dyn HashApi,
        tag: u32,
        chunk_hashes: Vec<ChunkHash>,
        chunk_sizes: Vec<u32>,
    ) -> Self {
        debug_assert_eq!(chunk_hashes.len(), chunk_sizes.len());
        let block_hash = block_hash_of_chunks(hash, &chunk_hashes);
        Self {
            block_hash,
            tag,
            chunk_hashes,
            chunk_sizes,
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_hashes.len()
    }

    pub fn uncompressed_size(&self) -> u64 {
        self.chunk_sizes.iter().map(|&s| s as u64).sum()
    }

    /// Byte offset of chunk `i` within the block's uncompressed payload.
    pub fn chunk_offset(&self, i: usize) -> u64 {
        self.chunk_sizes[..i].iter().map(|&s| s as u64).sum()
    }
}

/// Describes a set of stored blocks: which chunks live where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreIndex {
    pub hash_id: u32,
    pub blocks: Vec<BlockIndex>,
}

impl StoreIndex {
    pub fn new(hash_id: u32) -> Self {
        Self {
            hash_id,
            blocks: Vec::new(),
        }
    }

    pub fn from_blocks(hash_id: u32, blocks: Vec<BlockIndex>) -> Self {
        Self { hash_id, blocks }
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.blocks.iter().map(|b| b.chunk_count()).sum()
    }

    pub fn block_hashes(&self) -> impl Iterator<Item = BlockHash> + '_ {
        self.blocks.iter().map(|b| b.block_hash)
    }

    /// Chunk→block lookup. When a chunk appears in more than one block
    /// listing the earliest block wins, which is what gives merge its
    /// first-index-wins chunk mapping.
    pub fn chunk_to_block(&self) -> HashMap<ChunkHash, &BlockIndex> {
        let mut map = HashMap::new();
        for block in &self.blocks {
            for &chunk in &block.chunk_hashes {
                map.entry(chunk).or_insert(block);
            }
        }
        map
    }

    pub fn chunk_hash_set(&self) -> HashSet<ChunkHash> {
        self.blocks
            .iter()
            .flat_map(|b| b.chunk_hashes.iter().copied())
            .collect()
    }

    /// Subset containing only blocks that intersect `requested`, with
    /// low-usage blocks filtered out. `min_usage_percent == 0` accepts
    /// any overlapping block; `100` requires every chunk of the block to
    /// be requested.
    pub fn subset_for_chunks(
        &self,
        requested: &HashSet<ChunkHash>,
        min_usage_percent: u8,
    ) -> StoreIndex {
        let mut blocks = Vec::new();
        for block in &self.blocks {
            let used = block
                .chunk_hashes
                .iter()
                .filter(|c| requested.contains(c))
                .count();
            if used == 0 {
                continue;
            }
            let usage_percent = (used * 100 / block.chunk_count()) as u8;
            if usage_percent < min_usage_percent {
                continue;
            }
            blocks.push(block.clone());
        }
        StoreIndex::from_blocks(self.hash_id, blocks)
    }

    /// Ok iff every chunk the version references is present here;
    /// otherwise `MissingContent` naming the first absent chunk.
    pub fn validate(&self, version: &VersionIndex, context: &str) -> Result<()> {
        let present = self.chunk_hash_set();
        for asset in &version.assets {
            for chunk in version.asset_chunk_hashes(asset) {
                if !present.contains(&chunk) {
                    return Err(LodeError::MissingContent {
                        chunk,
                        context: format!("{context}: asset '{}'", asset.path),
                    });
                }
            }
        }
        Ok(())
    }

    /// Serialize to the `.lsi` wire format.
    pub fn to_vec(&self) -> Vec<u8> {
        let chunk_count: usize = self.chunk_count();

        let mut buf = Vec::new();
        put_u32(&mut buf, STORE_INDEX_MAGIC);
        put_u32(&mut buf, STORE_INDEX_VERSION);
        put_u32(&mut buf, self.hash_id);
        put_u32(&mut buf, self.blocks.len() as u32);
        put_u32(&mut buf, chunk_count as u32);

        for block in &self.blocks {
            put_u64(&mut buf, block.block_hash.0);
        }
        let mut chunk_offset = 0u32;
        for block in &self.blocks {
            put_u32(&mut buf, block.chunk_count() as u32);
            put_u32(&mut buf, block.tag);
            put_u32(&mut buf, chunk_offset);
            chunk_offset += block.chunk_count() as u32;
        }
        for block in &self.blocks {
            for chunk in &block.chunk_hashes {
                put_u64(&mut buf, chunk.0);
            }
        }
        for block in &self.blocks {
            for size in &block.chunk_sizes {
                put_u32(&mut buf, *size);
            }
        }
        buf
    }

    /// Decode from the `.lsi` wire format.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data, "store index");

        let magic = r.read_u32()?;
        if magic != STORE_INDEX_MAGIC {
            return Err(LodeError::CorruptIndex(format!(
                "store index: bad magic {magic:#010x}"
            )));
        }
        let version = r.read_u32()?;
        if version != STORE_INDEX_VERSION {
            return Err(LodeError::CorruptIndex(format!(
                "store index: unsupported version {version}"
            )));
        }

        let hash_id = r.read_u32()?;
        let block_count = r.read_u32()? as usize;
        let chunk_count = r.read_u32()? as usize;

        let mut block_hashes = Vec::with_capacity(block_count);
        for _ in 0..block_count {
            block_hashes.push(BlockHash(r.read_u64()?));
        }

        struct RawBlock {
            chunk_count: u32,
            tag: u32,
            chunk_offset: u32,
        }
        let mut raw_blocks = Vec::with_capacity(block_count);
        for _ in 0..block_count {
            raw_blocks.push(RawBlock {
                chunk_count: r.read_u32()?,
                tag: r.read_u32()?,
                chunk_offset: r.read_u32()?,
            });
        }

        let mut chunk_hashes = Vec::with_capacity(chunk_count);
        for _ in 0..chunk_count {
            chunk_hashes.push(ChunkHash(r.read_u64()?));
        }
        let mut chunk_sizes = Vec::with_capacity(chunk_count);
        for _ in 0..chunk_count {
            chunk_sizes.push(r.read_u32()?);
        }
        r.expect_end()?;

        let mut blocks = Vec::with_capacity(block_count);
        for (block_hash, raw) in block_hashes.into_iter().zip(raw_blocks) {
            let start = raw.chunk_offset as usize;
            let end = start
                .checked_add(raw.chunk_count as usize)
                .filter(|&e| e <= chunk_count)
                .ok_or_else(|| {
                    LodeError::CorruptIndex("store index: block chunk range out of bounds".into())
                })?;
            blocks.push(BlockIndex {
                block_hash,
                tag: raw.tag,
                chunk_hashes: chunk_hashes[start..end].to_vec(),
                chunk_sizes: chunk_sizes[start..end].to_vec(),
            });
        }

        Ok(Self { hash_id, blocks })
    }
}

/// Union of two store indices. On block-hash collision the copy from
/// `a` is kept (contents are identical by content addressing); chunk→
/// block mappings from `a` win because `a`'s blocks are listed first.
pub fn merge_store_index(a: &StoreIndex, b: &StoreIndex) -> StoreIndex {
    let mut seen: HashSet<BlockHash> = a.blocks.iter().map(|b| b.block_hash).collect();
    let mut blocks = a.blocks.clone();
    for block in &b.blocks {
        if seen.insert(block.block_hash) {
            blocks.push(block.clone());
        }
    }
    let hash_id = if a.hash_id != 0 { a.hash_id } else { b.hash_id };
    StoreIndex::from_blocks(hash_id, blocks)
}

/// Pack the chunks `needed` references but `existing` lacks into new
/// blocks: first-appearance order over the version's assets, closing a
/// block at `target_block_size` estimated bytes or
/// `max_chunks_per_block` chunks, whichever comes first.
pub fn create_missing_content(
    existing: &StoreIndex,
    needed: &VersionIndex,
    target_block_size: u32,
    max_chunks_per_block: u32,
    hash: &dyn HashApi,
    tag: u32,
) -> Result<StoreIndex> {
    if max_chunks_per_block == 0 {
        return Err(LodeError::InvalidArgument(
            "max chunks per block must be positive".into(),
        ));
    }

    let have = existing.chunk_hash_set();
    let mut queued: HashSet<ChunkHash> = HashSet::new();
    let mut pending: Vec<(ChunkHash, u32)> = Vec::new();
    for asset in &needed.assets {
        for &index in needed.asset_chunk_indexes(asset) {
            let chunk = needed.chunk_hashes[index as usize];
            if have.contains(&chunk) || !queued.insert(chunk) {
                continue;
            }
            pending.push((chunk, needed.chunk_sizes[index as usize]));
        }
    }

    let mut blocks = Vec::new();
    let mut chunk_hashes: Vec<ChunkHash> = Vec::new();
    let mut chunk_sizes: Vec<u32> = Vec::new();
    let mut current_bytes = 0u64;
    for (chunk, size) in pending {
        let over_size =
            !chunk_hashes.is_empty() && current_bytes + size as u64 > target_block_size as u64;
        let over_count = chunk_hashes.len() as u32 >= max_chunks_per_block;
        if over_size || over_count {
            blocks.push(BlockIndex::new(
                hash,
                tag,
                std::mem::take(&mut chunk_hashes),
                std::mem::take(&mut chunk_sizes),
            ));
            current_bytes = 0;
        }
        chunk_hashes.push(chunk);
        chunk_sizes.push(size);
        current_bytes += size as u64;
    }
    if !chunk_hashes.is_empty() {
        blocks.push(BlockIndex::new(hash, tag, chunk_hashes, chunk_sizes));
    }

    Ok(StoreIndex::from_blocks(needed.hash_id, blocks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Blake3Hash;

    fn block(hash: &dyn HashApi, chunks: &[(u64, u32)]) -> BlockIndex {
        BlockIndex::new(
            hash,
            0,
            chunks.iter().map(|&(h, _)| ChunkHash(h)).collect(),
            chunks.iter().map(|&(_, s)| s).collect(),
        )
    }

    #[test]
    fn wire_roundtrip() {
        let api = Blake3Hash;
        let index = StoreIndex::from_blocks(
            api.id(),
            vec![
                block(&api, &[(1, 10), (2, 20)]),
                block(&api, &[(3, 30)]),
            ],
        );
        let decoded = StoreIndex::from_slice(&index.to_vec()).unwrap();
        assert_eq!(decoded, index);
    }

    #[test]
    fn rejects_bad_magic_and_version() {
        let api = Blake3Hash;
        let index = StoreIndex::from_blocks(api.id(), vec![block(&api, &[(1, 10)])]);
        let mut bytes = index.to_vec();
        bytes[0] ^= 0xFF;
        assert!(StoreIndex::from_slice(&bytes).is_err());

        let mut bytes = index.to_vec();
        bytes[4] = 9;
        assert!(StoreIndex::from_slice(&bytes).is_err());
    }

    #[test]
    fn merge_unions_blocks_first_wins() {
        let api = Blake3Hash;
        let shared = block(&api, &[(1, 10)]);
        let a = StoreIndex::from_blocks(api.id(), vec![shared.clone(), block(&api, &[(2, 20)])]);
        let b = StoreIndex::from_blocks(api.id(), vec![shared, block(&api, &[(3, 30)])]);

        let ab = merge_store_index(&a, &b);
        let ba = merge_store_index(&b, &a);
        assert_eq!(ab.block_count(), 3);

        let ab_set: HashSet<_> = ab.block_hashes().collect();
        let ba_set: HashSet<_> = ba.block_hashes().collect();
        assert_eq!(ab_set, ba_set);
    }

    #[test]
    fn merge_chunk_mapping_prefers_left() {
        let api = Blake3Hash;
        // Chunk 7 lives in different blocks on each side.
        let a = StoreIndex::from_blocks(api.id(), vec![block(&api, &[(7, 10), (8, 10)])]);
        let b = StoreIndex::from_blocks(api.id(), vec![block(&api, &[(7, 10), (9, 10)])]);

        let merged = merge_store_index(&a, &b);
        let map = merged.chunk_to_block();
        assert_eq!(
            map[&ChunkHash(7)].block_hash,
            a.blocks[0].block_hash
        );
    }

    #[test]
    fn subset_usage_threshold() {
        let api = Blake3Hash;
        let index = StoreIndex::from_blocks(
            api.id(),
            vec![
                block(&api, &[(1, 10), (2, 10), (3, 10), (4, 10)]),
                block(&api, &[(5, 10), (6, 10)]),
            ],
        );
        let requested: HashSet<ChunkHash> =
            [ChunkHash(1), ChunkHash(5), ChunkHash(6)].into_iter().collect();

        // Threshold 0: any overlap counts.
        assert_eq!(index.subset_for_chunks(&requested, 0).block_count(), 2);
        // Threshold 50: the 25%-used block drops out.
        assert_eq!(index.subset_for_chunks(&requested, 50).block_count(), 1);
        // Threshold 100: only the fully-used block survives.
        let full = index.subset_for_chunks(&requested, 100);
        assert_eq!(full.block_count(), 1);
        assert_eq!(full.blocks[0].chunk_count(), 2);
    }

    fn version_referencing(chunks: &[(u64, u32)]) -> crate::index::VersionIndex {
        use crate::index::version::AssetEntry;
        crate::index::VersionIndex {
            hash_id: Blake3Hash.id(),
            target_chunk_size: 32768,
            assets: vec![AssetEntry {
                path: "f".into(),
                path_hash: 0,
                content_hash: 0,
                size: chunks.iter().map(|&(_, s)| s as u64).sum(),
                permissions: 0o644,
                tag: 0,
                chunk_count: chunks.len() as u32,
                chunk_index_start: 0,
            }],
            chunk_hashes: chunks.iter().map(|&(h, _)| ChunkHash(h)).collect(),
            chunk_sizes: chunks.iter().map(|&(_, s)| s).collect(),
            asset_chunk_indexes: (0..chunks.len() as u32).collect(),
        }
    }

    #[test]
    fn validate_accepts_full_coverage_and_names_first_gap() {
        let api = Blake3Hash;
        let version = version_referencing(&[(1, 10), (2, 10), (3, 10)]);

        let full = StoreIndex::from_blocks(api.id(), vec![block(&api, &[(1, 10), (2, 10), (3, 10)])]);
        full.validate(&version, "test").unwrap();

        let partial = StoreIndex::from_blocks(api.id(), vec![block(&api, &[(1, 10), (3, 10)])]);
        let err = partial.validate(&version, "test").unwrap_err();
        match err {
            crate::error::LodeError::MissingContent { chunk, .. } => {
                assert_eq!(chunk, ChunkHash(2));
            }
            other => panic!("expected MissingContent, got {other}"),
        }
    }

    #[test]
    fn missing_content_skips_known_chunks() {
        let api = Blake3Hash;
        let version = version_referencing(&[(1, 100), (2, 100), (3, 100)]);
        let existing = StoreIndex::from_blocks(api.id(), vec![block(&api, &[(2, 100)])]);

        let missing = create_missing_content(&existing, &version, 1 << 20, 1024, &api, 0).unwrap();
        assert_eq!(missing.block_count(), 1);
        assert_eq!(
            missing.blocks[0].chunk_hashes,
            vec![ChunkHash(1), ChunkHash(3)]
        );
    }

    #[test]
    fn missing_content_respects_chunk_count_bound() {
        let api = Blake3Hash;
        let chunks: Vec<(u64, u32)> = (1..=10).map(|i| (i, 10)).collect();
        let version = version_referencing(&chunks);
        let empty = StoreIndex::new(api.id());

        let missing = create_missing_content(&empty, &version, 1 << 20, 4, &api, 0).unwrap();
        assert_eq!(missing.block_count(), 3); // 4 + 4 + 2
        assert!(missing.blocks.iter().all(|b| b.chunk_count() <= 4));
    }

    #[test]
    fn missing_content_respects_byte_bound() {
        let api = Blake3Hash;
        let chunks: Vec<(u64, u32)> = (1..=6).map(|i| (i, 100)).collect();
        let version = version_referencing(&chunks);
        let empty = StoreIndex::new(api.id());

        let missing = create_missing_content(&empty, &version, 250, 1024, &api, 0).unwrap();
        // 100+100 fits under 250, a third would overflow: blocks of 2.
        assert_eq!(missing.block_count(), 3);
        assert!(missing
            .blocks
            .iter()
            .all(|b| b.uncompressed_size() <= 250));
    }

    #[test]
    fn missing_content_dedups_repeated_chunks() {
        let api = Blake3Hash;
        // The same chunk referenced by two positions packs once.
        let mut version = version_referencing(&[(7, 50), (8, 50)]);
        version.asset_chunk_indexes = vec![0, 1, 0];
        version.assets[0].chunk_count = 3;

        let missing =
            create_missing_content(&StoreIndex::new(api.id()), &version, 1 << 20, 1024, &api, 0)
                .unwrap();
        assert_eq!(missing.chunk_count(), 2);
    }

    #[test]
    fn block_offsets() {
        let api = Blake3Hash;
        let b = block(&api, &[(1, 10), (2, 20), (3, 30)]);
        assert_eq!(b.uncompressed_size(), 60);
        assert_eq!(b.chunk_offset(0), 0);
        assert_eq!(b.chunk_offset(2), 30);
    }
}
