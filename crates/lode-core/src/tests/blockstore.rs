use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier, Mutex};

use crate::blockstore::cache::CacheBlockStore;
use crate::blockstore::compress::CompressBlockStore;
use crate::blockstore::lru::LruBlockStore;
use crate::blockstore::remote::RemoteBlockStore;
use crate::blockstore::share::ShareBlockStore;
use crate::blockstore::{BlockStore, BlockStoreStats, StoredBlock};
use crate::compress;
use crate::config::RetryConfig;
use crate::error::Result;
use crate::hash::{Blake3Hash, HashApi};
use crate::index::{BlockIndex, StoreIndex};
use crate::testutil::MemoryBlobStore;
use lode_types::{BlockHash, ChunkHash};

/// Downstream stub that counts gets and can stall them, for exercising
/// the LRU and share layers.
struct CountingStore {
    blocks: Mutex<HashMap<BlockHash, Arc<StoredBlock>>>,
    gets: AtomicU64,
    get_delay: std::time::Duration,
}

impl CountingStore {
    fn new(get_delay: std::time::Duration) -> Self {
        Self {
            blocks: Mutex::new(HashMap::new()),
            gets: AtomicU64::new(0),
            get_delay,
        }
    }

    fn get_count(&self) -> u64 {
        self.gets.load(Ordering::SeqCst)
    }
}

impl BlockStore for CountingStore {
    fn get_stored_block(&self, block_hash: BlockHash) -> Result<Option<Arc<StoredBlock>>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.get_delay);
        Ok(self.blocks.lock().unwrap().get(&block_hash).cloned())
    }

    fn put_stored_block(&self, block: &StoredBlock) -> Result<()> {
        self.blocks
            .lock()
            .unwrap()
            .insert(block.block_hash(), Arc::new(block.clone()));
        Ok(())
    }

    fn get_existing_content(
        &self,
        chunk_hashes: &HashSet<ChunkHash>,
        min_block_usage_percent: u8,
    ) -> Result<StoreIndex> {
        let blocks = self.blocks.lock().unwrap();
        let index = StoreIndex::from_blocks(
            Blake3Hash.id(),
            blocks.values().map(|b| b.index.clone()).collect(),
        );
        Ok(index.subset_for_chunks(chunk_hashes, min_block_usage_percent))
    }

    fn prune_blocks(&self, keep: &HashSet<BlockHash>) -> Result<u64> {
        let mut blocks = self.blocks.lock().unwrap();
        let before = blocks.len();
        blocks.retain(|hash, _| keep.contains(hash));
        Ok((before - blocks.len()) as u64)
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn stats(&self) -> BlockStoreStats {
        BlockStoreStats::default()
    }
}

fn block_of(payload: &[u8], tag: u32) -> StoredBlock {
    let api = Blake3Hash;
    let chunk = ChunkHash(api.hash64(payload));
    StoredBlock {
        index: BlockIndex::new(&api, tag, vec![chunk], vec![payload.len() as u32]),
        data: payload.to_vec(),
    }
}

#[test]
fn remote_store_roundtrips_blocks() {
    let blob = Arc::new(MemoryBlobStore::new());
    let remote = RemoteBlockStore::new(blob, Arc::new(Blake3Hash), RetryConfig::default());

    let block = block_of(b"remote payload", compress::TAG_NONE);
    remote.put_stored_block(&block).unwrap();
    remote.flush().unwrap();

    let fetched = remote.get_stored_block(block.block_hash()).unwrap().unwrap();
    assert_eq!(*fetched, block);
    assert!(remote
        .get_stored_block(BlockHash(0xDEAD))
        .unwrap()
        .is_none());
}

#[test]
fn remote_content_query_sees_staged_blocks_before_flush() {
    let blob = Arc::new(MemoryBlobStore::new());
    let remote = RemoteBlockStore::new(blob, Arc::new(Blake3Hash), RetryConfig::default());

    let block = block_of(b"staged", compress::TAG_NONE);
    remote.put_stored_block(&block).unwrap();

    let requested: HashSet<ChunkHash> = block.index.chunk_hashes.iter().copied().collect();
    let found = remote.get_existing_content(&requested, 0).unwrap();
    assert_eq!(found.block_count(), 1);
}

#[test]
fn compress_layer_roundtrips_every_codec() {
    for name in ["none", "lz4", "zstd", "brotli", "zstd_max"] {
        let tag = compress::tag_for_name(name).unwrap();
        let downstream = Arc::new(CountingStore::new(std::time::Duration::ZERO));
        let store = CompressBlockStore::new(downstream.clone());

        let payload: Vec<u8> = (0..100_000u32).flat_map(|i| ((i % 256) as u8).to_le_bytes()).collect();
        let block = block_of(&payload, tag);
        store.put_stored_block(&block).unwrap();

        // What landed downstream is encoded (for real codecs).
        let stored = downstream
            .blocks
            .lock()
            .unwrap()
            .get(&block.block_hash())
            .cloned()
            .unwrap();
        if tag != compress::TAG_NONE {
            assert_ne!(stored.data, payload, "codec {name} left payload unencoded");
        }

        let fetched = store.get_stored_block(block.block_hash()).unwrap().unwrap();
        assert_eq!(fetched.data, payload, "codec {name}");
    }
}

#[test]
fn lru_layer_caches_and_evicts() {
    let downstream = Arc::new(CountingStore::new(std::time::Duration::ZERO));
    let lru = LruBlockStore::new(downstream.clone(), 2);

    let blocks: Vec<StoredBlock> = (0..3u8)
        .map(|i| block_of(&vec![i; 64], compress::TAG_NONE))
        .collect();
    for block in &blocks {
        lru.put_stored_block(block).unwrap();
    }
    assert_eq!(downstream.get_count(), 0);

    // Warm hits for the two cached blocks.
    lru.get_stored_block(blocks[0].block_hash()).unwrap();
    lru.get_stored_block(blocks[1].block_hash()).unwrap();
    assert_eq!(downstream.get_count(), 2);
    lru.get_stored_block(blocks[0].block_hash()).unwrap();
    lru.get_stored_block(blocks[1].block_hash()).unwrap();
    assert_eq!(downstream.get_count(), 2);

    // A third block evicts the least recently used (block 0).
    lru.get_stored_block(blocks[2].block_hash()).unwrap();
    lru.get_stored_block(blocks[0].block_hash()).unwrap();
    assert_eq!(downstream.get_count(), 4);
    // Block 0 is fresh again now.
    lru.get_stored_block(blocks[0].block_hash()).unwrap();
    assert_eq!(downstream.get_count(), 4);
}

#[test]
fn share_layer_coalesces_concurrent_gets() {
    let downstream = Arc::new(CountingStore::new(std::time::Duration::from_millis(200)));
    let block = block_of(b"shared payload", compress::TAG_NONE);
    downstream.put_stored_block(&block).unwrap();

    let share = Arc::new(ShareBlockStore::new(
        downstream.clone() as Arc<dyn BlockStore>
    ));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let share = Arc::clone(&share);
            let barrier = Arc::clone(&barrier);
            let hash = block.block_hash();
            std::thread::spawn(move || {
                barrier.wait();
                share.get_stored_block(hash).unwrap().unwrap()
            })
        })
        .collect();

    let results: Vec<Arc<StoredBlock>> =
        handles.into_iter().map(|h| h.join().unwrap()).collect();
    for fetched in &results {
        assert_eq!(fetched.data, block.data);
    }
    assert_eq!(
        downstream.get_count(),
        1,
        "concurrent gets were not coalesced"
    );
}

#[test]
fn cache_layer_reads_through_and_populates_local() {
    let local = Arc::new(CountingStore::new(std::time::Duration::ZERO));
    let remote = Arc::new(CountingStore::new(std::time::Duration::ZERO));
    let block = block_of(b"cache me", compress::TAG_NONE);
    remote.put_stored_block(&block).unwrap();

    let cache = CacheBlockStore::new(
        local.clone() as Arc<dyn BlockStore>,
        remote.clone() as Arc<dyn BlockStore>,
    );

    // Miss: served from remote, then populated into local.
    let fetched = cache.get_stored_block(block.block_hash()).unwrap().unwrap();
    assert_eq!(fetched.data, block.data);
    cache.flush().unwrap();
    assert!(local
        .blocks
        .lock()
        .unwrap()
        .contains_key(&block.block_hash()));

    // Hit: remote untouched this time.
    let remote_gets_before = remote.get_count();
    cache.get_stored_block(block.block_hash()).unwrap().unwrap();
    assert_eq!(remote.get_count(), remote_gets_before);
}

#[test]
fn cache_layer_writes_through_to_both() {
    let local = Arc::new(CountingStore::new(std::time::Duration::ZERO));
    let remote = Arc::new(CountingStore::new(std::time::Duration::ZERO));
    let cache = CacheBlockStore::new(
        local.clone() as Arc<dyn BlockStore>,
        remote.clone() as Arc<dyn BlockStore>,
    );

    let block = block_of(b"write through", compress::TAG_NONE);
    cache.put_stored_block(&block).unwrap();
    assert!(local.blocks.lock().unwrap().contains_key(&block.block_hash()));
    assert!(remote.blocks.lock().unwrap().contains_key(&block.block_hash()));
}
