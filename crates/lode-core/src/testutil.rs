use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::blobstore::{BlobStore, ConditionalPut, Generation};
use crate::error::Result;

/// In-memory blob store for tests. Thread-safe via Mutex; generations
/// are a simple write counter so CAS races are observable.
pub struct MemoryBlobStore {
    data: Mutex<HashMap<String, (Vec<u8>, Generation)>>,
    next_generation: Mutex<Generation>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
            next_generation: Mutex::new(1),
        }
    }

    fn bump(&self) -> Generation {
        let mut next = self.next_generation.lock().unwrap();
        let generation = *next;
        *next += 1;
        generation
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let map = self.data.lock().unwrap();
        Ok(map.get(key).map(|(bytes, _)| bytes.clone()))
    }

    fn get_with_generation(&self, key: &str) -> Result<Option<(Vec<u8>, Generation)>> {
        let map = self.data.lock().unwrap();
        Ok(map.get(key).cloned())
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let generation = self.bump();
        let mut map = self.data.lock().unwrap();
        map.insert(key.to_string(), (data.to_vec(), generation));
        Ok(())
    }

    fn put_if_match(
        &self,
        key: &str,
        data: &[u8],
        expected: Option<Generation>,
    ) -> Result<ConditionalPut> {
        let generation = self.bump();
        let mut map = self.data.lock().unwrap();
        let current = map.get(key).map(|(_, g)| *g);
        if current != expected {
            return Ok(ConditionalPut::Conflict);
        }
        map.insert(key.to_string(), (data.to_vec(), generation));
        Ok(ConditionalPut::Stored(generation))
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut map = self.data.lock().unwrap();
        map.remove(key);
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let map = self.data.lock().unwrap();
        Ok(map.contains_key(key))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let map = self.data.lock().unwrap();
        Ok(map.keys().filter(|k| k.starts_with(prefix)).cloned().collect())
    }
}

/// Deterministic pseudo-random payload for test files.
pub fn seeded_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = vec![0u8; len];
    rng.fill_bytes(&mut out);
    out
}

/// Write the scenario input tree: `a.txt` (1 KiB of 'A'), `b.bin`
/// (2 MiB pseudo-random seed 1), `sub/c.txt` (empty).
pub fn write_scenario_tree(root: &Path) {
    std::fs::create_dir_all(root.join("sub")).unwrap();
    std::fs::write(root.join("a.txt"), vec![0x41; 1024]).unwrap();
    std::fs::write(root.join("b.bin"), seeded_bytes(1, 2 * 1024 * 1024)).unwrap();
    std::fs::write(root.join("sub/c.txt"), b"").unwrap();
}

/// Snapshot a tree as path → contents (directories map to `None`).
pub fn read_tree(root: &Path) -> BTreeMap<String, Option<Vec<u8>>> {
    fn visit(root: &Path, dir: &Path, out: &mut BTreeMap<String, Option<Vec<u8>>>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let entry = entry.unwrap();
            let rel = entry
                .path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            if entry.file_type().unwrap().is_dir() {
                out.insert(format!("{rel}/"), None);
                visit(root, &entry.path(), out);
            } else {
                out.insert(rel, Some(std::fs::read(entry.path()).unwrap()));
            }
        }
    }
    let mut out = BTreeMap::new();
    visit(root, root, &mut out);
    out
}

/// Count the `.lrb` blobs under a local store directory.
pub fn count_store_blocks(store_root: &Path) -> usize {
    let chunks = store_root.join("chunks");
    if !chunks.exists() {
        return 0;
    }
    walkdir::WalkDir::new(chunks)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_type().is_file()
                && e.path().extension().is_some_and(|ext| ext == "lrb")
        })
        .count()
}
