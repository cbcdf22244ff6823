use serde::{Deserialize, Serialize};

use crate::blobstore::uri;
use crate::error::{LodeError, Result};

pub const DEFAULT_TARGET_CHUNK_SIZE: u32 = 32768;
pub const DEFAULT_TARGET_BLOCK_SIZE: u32 = 8388608;
pub const DEFAULT_MAX_CHUNKS_PER_BLOCK: u32 = 1024;
pub const DEFAULT_COMPRESSION_ALGORITHM: &str = "zstd";
pub const DEFAULT_HASH_ALGORITHM: &str = "blake3";
pub const DEFAULT_MIN_BLOCK_USAGE_PERCENT: u8 = 0;

/// Retry policy for transient blob-store I/O at the remote layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay_ms: 100,
            retry_max_delay_ms: 5_000,
        }
    }
}

/// Persisted pointer to a synced version: which store it lives in, where
/// its version index is, and optionally its version-local store index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetConfig {
    #[serde(rename = "storage-uri")]
    pub storage_uri: String,
    #[serde(rename = "source-path")]
    pub source_path: String,
    #[serde(
        rename = "version-local-store-index-path",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub version_local_store_index_path: Option<String>,
}

impl GetConfig {
    pub fn read_from_uri(path: &str) -> Result<Self> {
        let bytes = uri::read_uri(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| LodeError::Config(format!("get-config '{path}': {e}")))
    }

    pub fn write_to_uri(&self, path: &str) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| LodeError::Config(format!("get-config '{path}': {e}")))?;
        uri::write_uri(path, &bytes)
    }
}

/// Default version-local store index path: the `.lvi` suffix swapped
/// for `.lsi`.
pub fn default_version_local_store_index_path(version_index_path: &str) -> String {
    match version_index_path.strip_suffix(".lvi") {
        Some(stem) => format!("{stem}.lsi"),
        None => format!("{version_index_path}.lsi"),
    }
}
