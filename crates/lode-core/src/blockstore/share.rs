use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex};

use crate::blockstore::{BlockStore, BlockStoreStats, StatsCounters, StoredBlock};
use crate::error::{LodeError, Result};
use crate::index::StoreIndex;
use lode_types::{BlockHash, ChunkHash};

enum FlightState {
    Pending,
    Done(std::result::Result<Option<Arc<StoredBlock>>, String>),
}

/// One in-flight fetch. The leader resolves it; every waiter blocks on
/// the condvar until the state flips to `Done`.
struct Flight {
    state: Mutex<FlightState>,
    done: Condvar,
}

/// Coalesces concurrent fetches of the same block into a single
/// downstream call. A get that finds an existing in-flight entry for
/// its hash attaches to it instead of issuing another request, and all
/// attached callers observe the same outcome.
pub struct ShareBlockStore {
    inner: Arc<dyn BlockStore>,
    inflight: Mutex<HashMap<BlockHash, Arc<Flight>>>,
    counters: StatsCounters,
}

impl ShareBlockStore {
    pub fn new(inner: Arc<dyn BlockStore>) -> Self {
        Self {
            inner,
            inflight: Mutex::new(HashMap::new()),
            counters: StatsCounters::new(),
        }
    }
}

impl BlockStore for ShareBlockStore {
    fn get_stored_block(&self, block_hash: BlockHash) -> Result<Option<Arc<StoredBlock>>> {
        self.counters.record_get();

        let (flight, is_leader) = {
            let mut inflight = self.inflight.lock().unwrap();
            match inflight.get(&block_hash) {
                Some(flight) => (Arc::clone(flight), false),
                None => {
                    let flight = Arc::new(Flight {
                        state: Mutex::new(FlightState::Pending),
                        done: Condvar::new(),
                    });
                    inflight.insert(block_hash, Arc::clone(&flight));
                    (flight, true)
                }
            }
        };

        if is_leader {
            let result = self.inner.get_stored_block(block_hash);
            let shared = match &result {
                Ok(block) => Ok(block.clone()),
                Err(e) => Err(e.to_string()),
            };
            {
                let mut state = flight.state.lock().unwrap();
                *state = FlightState::Done(shared);
            }
            flight.done.notify_all();
            self.inflight.lock().unwrap().remove(&block_hash);
            result
        } else {
            self.counters.record_hit();
            let mut state = flight.state.lock().unwrap();
            while matches!(*state, FlightState::Pending) {
                state = flight.done.wait(state).unwrap();
            }
            match &*state {
                FlightState::Done(Ok(block)) => Ok(block.clone()),
                FlightState::Done(Err(message)) => Err(LodeError::Other(format!(
                    "shared fetch of block {block_hash} failed: {message}"
                ))),
                FlightState::Pending => unreachable!("waited for completion"),
            }
        }
    }

    fn put_stored_block(&self, block: &StoredBlock) -> Result<()> {
        self.counters.record_put();
        self.inner.put_stored_block(block)
    }

    fn get_existing_content(
        &self,
        chunk_hashes: &HashSet<ChunkHash>,
        min_block_usage_percent: u8,
    ) -> Result<StoreIndex> {
        self.inner
            .get_existing_content(chunk_hashes, min_block_usage_percent)
    }

    fn prune_blocks(&self, keep: &HashSet<BlockHash>) -> Result<u64> {
        self.inner.prune_blocks(keep)
    }

    fn flush(&self) -> Result<()> {
        self.counters.record_flush();
        self.inner.flush()
    }

    fn stats(&self) -> BlockStoreStats {
        self.counters.snapshot()
    }
}
