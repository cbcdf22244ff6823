use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::blobstore::{BlobStore, ConditionalPut, Generation};
use crate::error::{LodeError, Result};

/// Blob store rooted at a local directory.
///
/// Every read produces a generation token derived from the blob's
/// contents, so the primary primitive here is
/// [`get_with_generation`](BlobStore::get_with_generation); plain
/// `get` is the degenerate case that throws the token away. Writes
/// land via temp-file + rename so readers never observe a partial
/// blob, and the conditional put re-derives the current token under a
/// store-wide lock before deciding. Concurrent processes that lose a
/// race fall back to the read-merge-retry loop at the layer above.
pub struct LocalBlobStore {
    root: PathBuf,
    cas_lock: Mutex<()>,
    tmp_counter: AtomicU64,
}

impl LocalBlobStore {
    pub fn new(root: &str) -> Result<Self> {
        let root_path = PathBuf::from(root);
        // Canonicalize an existing root so symlinked store directories
        // produce stable keys when listing.
        let root = if root_path.exists() {
            fs::canonicalize(&root_path)?
        } else {
            root_path
        };
        Ok(Self {
            root,
            cas_lock: Mutex::new(()),
            tmp_counter: AtomicU64::new(0),
        })
    }

    /// Map a `/`-separated blob key onto a path under the store root,
    /// accepting only plain relative segments. Anything that could
    /// address outside the root (absolute keys, `..`, backslashes,
    /// empty segments) is an `InvalidArgument`.
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.starts_with('/') {
            return Err(LodeError::InvalidArgument(format!(
                "unsafe blob key: '{key}'"
            )));
        }
        let mut path = self.root.clone();
        for segment in key.split('/') {
            match segment {
                "" | "." | ".." => {
                    return Err(LodeError::InvalidArgument(format!(
                        "unsafe blob key: '{key}'"
                    )))
                }
                _ if segment.contains('\\') => {
                    return Err(LodeError::InvalidArgument(format!(
                        "unsafe blob key: '{key}'"
                    )))
                }
                _ => path.push(segment),
            }
        }
        Ok(path)
    }

    /// Generation token for blob contents: a 64-bit content hash, so a
    /// re-read after a lost race always observes a different token.
    fn generation_of(data: &[u8]) -> Generation {
        let digest = blake3::hash(data);
        u64::from_le_bytes(digest.as_bytes()[..8].try_into().unwrap())
    }

    /// Read a blob and its generation straight off the filesystem.
    /// `Ok(None)` when the file is not there.
    fn read_with_generation(path: &Path) -> Result<Option<(Vec<u8>, Generation)>> {
        match fs::read(path) {
            Ok(data) => {
                let generation = Self::generation_of(&data);
                Ok(Some((data, generation)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write via a uniquely-named temp file in the same directory,
    /// then rename into place.
    fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| LodeError::InvalidArgument(format!("bad blob path: {path:?}")))?;
        fs::create_dir_all(parent)?;
        let tmp = parent.join(format!(
            ".tmp-{}-{}",
            std::process::id(),
            self.tmp_counter.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&tmp, data)?;
        match fs::rename(&tmp, path) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                Err(e.into())
            }
        }
    }

    /// `/`-separated key for a file found while listing, relative to
    /// the store root.
    fn key_for(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let mut key = String::new();
        for component in rel.components() {
            if !key.is_empty() {
                key.push('/');
            }
            key.push_str(&component.as_os_str().to_string_lossy());
        }
        Some(key)
    }
}

impl BlobStore for LocalBlobStore {
    /// Read a blob, discarding the generation token the local read
    /// computes anyway.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .get_with_generation(key)?
            .map(|(data, _generation)| data))
    }

    fn get_with_generation(&self, key: &str) -> Result<Option<(Vec<u8>, Generation)>> {
        let path = self.resolve(key)?;
        Self::read_with_generation(&path)
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        self.write_atomic(&path, data)
    }

    /// Compare the blob's current generation against `expected` and
    /// write only on a match, all under the store's CAS lock.
    /// `expected = None` is a create-only put.
    fn put_if_match(
        &self,
        key: &str,
        data: &[u8],
        expected: Option<Generation>,
    ) -> Result<ConditionalPut> {
        let path = self.resolve(key)?;
        let _guard = self.cas_lock.lock().unwrap();

        let current = Self::read_with_generation(&path)?.map(|(_, generation)| generation);
        if current != expected {
            return Ok(ConditionalPut::Conflict);
        }

        self.write_atomic(&path, data)?;
        Ok(ConditionalPut::Stored(Self::generation_of(data)))
    }

    /// Delete a blob; deleting a missing blob is not an error.
    fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let path = self.resolve(key)?;
        Ok(path.is_file())
    }

    /// List all blob keys under a prefix, walking directories with a
    /// worklist. In-flight `.tmp-` files are not blobs and are
    /// skipped.
    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let start = self.resolve(prefix.trim_end_matches('/'))?;
        if !start.is_dir() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        let mut pending = vec![start];
        while let Some(dir) = pending.pop() {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for entry in entries {
                let entry = entry?;
                let file_type = entry.file_type()?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                    continue;
                }
                if !file_type.is_file()
                    || entry.file_name().to_string_lossy().starts_with(".tmp-")
                {
                    continue;
                }
                if let Some(key) = self.key_for(&entry.path()) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }
}
