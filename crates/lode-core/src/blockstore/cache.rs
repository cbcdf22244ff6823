use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender};
use tracing::warn;

use crate::blockstore::{BlockStore, BlockStoreStats, StatsCounters, StoredBlock};
use crate::error::Result;
use crate::index::StoreIndex;
use lode_types::{BlockHash, ChunkHash};

enum PopulateMsg {
    Block(Arc<StoredBlock>),
    /// Ack once every earlier message has been applied.
    Flush(Sender<()>),
}

const POPULATE_QUEUE_DEPTH: usize = 16;

/// Composes a local store over a remote one. Reads try local first; a
/// remote fetch is handed to a background worker that populates the
/// local store through a bounded queue. Writes go through to both;
/// indexed queries always ask the remote. `flush` drains the populate
/// queue before flushing both stores, so an acked flush means the
/// cache is settled too.
pub struct CacheBlockStore {
    local: Arc<dyn BlockStore>,
    remote: Arc<dyn BlockStore>,
    populate_tx: Mutex<Option<Sender<PopulateMsg>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: StatsCounters,
}

impl CacheBlockStore {
    pub fn new(local: Arc<dyn BlockStore>, remote: Arc<dyn BlockStore>) -> Self {
        let (tx, rx) = bounded::<PopulateMsg>(POPULATE_QUEUE_DEPTH);
        let worker_local = Arc::clone(&local);
        let worker = std::thread::spawn(move || {
            for msg in rx {
                match msg {
                    PopulateMsg::Block(block) => {
                        if let Err(e) = worker_local.put_stored_block(&block) {
                            warn!(
                                "cache populate for block {} failed: {e}",
                                block.block_hash()
                            );
                        }
                    }
                    PopulateMsg::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
        });

        Self {
            local,
            remote,
            populate_tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            counters: StatsCounters::new(),
        }
    }

    fn enqueue_populate(&self, block: Arc<StoredBlock>) {
        let guard = self.populate_tx.lock().unwrap();
        if let Some(tx) = guard.as_ref() {
            if tx.send(PopulateMsg::Block(block)).is_err() {
                warn!("cache populate worker is gone");
            }
        }
    }

    /// Block until every queued populate has been applied. Queue order
    /// makes the ack a barrier.
    fn drain_populate(&self) {
        let (ack_tx, ack_rx) = bounded(1);
        {
            let guard = self.populate_tx.lock().unwrap();
            let Some(tx) = guard.as_ref() else {
                return;
            };
            if tx.send(PopulateMsg::Flush(ack_tx)).is_err() {
                return;
            }
        }
        let _ = ack_rx.recv();
    }
}

impl Drop for CacheBlockStore {
    fn drop(&mut self) {
        // Close the queue, then let the worker finish what it has.
        self.populate_tx.lock().unwrap().take();
        if let Some(worker) = self.worker.lock().unwrap().take() {
            let _ = worker.join();
        }
    }
}

impl BlockStore for CacheBlockStore {
    fn get_stored_block(&self, block_hash: BlockHash) -> Result<Option<Arc<StoredBlock>>> {
        self.counters.record_get();
        if let Some(block) = self.local.get_stored_block(block_hash)? {
            self.counters.record_hit();
            return Ok(Some(block));
        }
        self.counters.record_miss();

        let Some(block) = self.remote.get_stored_block(block_hash)? else {
            return Ok(None);
        };
        self.enqueue_populate(Arc::clone(&block));
        Ok(Some(block))
    }

    fn put_stored_block(&self, block: &StoredBlock) -> Result<()> {
        self.counters.record_put();
        self.remote.put_stored_block(block)?;
        self.local.put_stored_block(block)?;
        Ok(())
    }

    fn get_existing_content(
        &self,
        chunk_hashes: &HashSet<ChunkHash>,
        min_block_usage_percent: u8,
    ) -> Result<StoreIndex> {
        self.remote
            .get_existing_content(chunk_hashes, min_block_usage_percent)
    }

    fn prune_blocks(&self, keep: &HashSet<BlockHash>) -> Result<u64> {
        // The local side is advisory; the remote's count is the answer.
        let pruned = self.remote.prune_blocks(keep)?;
        self.local.prune_blocks(keep)?;
        self.counters.record_pruned(pruned);
        Ok(pruned)
    }

    fn flush(&self) -> Result<()> {
        self.counters.record_flush();
        self.drain_populate();
        self.local.flush()?;
        self.remote.flush()
    }

    fn stats(&self) -> BlockStoreStats {
        self.counters.snapshot()
    }
}
