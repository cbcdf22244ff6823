use thiserror::Error;

use lode_types::{BlockHash, ChunkHash};

pub type Result<T> = std::result::Result<T, LodeError>;

#[derive(Debug, Error)]
pub enum LodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    #[error("hash mismatch for chunk {chunk} in {context}")]
    HashMismatch { chunk: ChunkHash, context: String },

    #[error("store is missing content: chunk {chunk} referenced by {context}")]
    MissingContent { chunk: ChunkHash, context: String },

    #[error("store index write-back conflict persisted after {0} attempts")]
    StoreIndexConflict(u32),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("zip entry escapes the target directory: '{0}'")]
    ZipSlip(String),

    #[error("unsupported backend: '{0}'")]
    UnsupportedBackend(String),

    #[error("unknown compression tag: {0:#010x}")]
    UnknownCompressionTag(u32),

    #[error("unknown hash identifier: {0:#010x}")]
    UnknownHashId(u32),

    #[error("decompression error: {0}")]
    Decompression(String),

    #[error("block {0} failed to decode: {1}")]
    BlockDecode(BlockHash, String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl LodeError {
    /// Whether the remote layer should retry the operation with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, LodeError::Io(_))
    }
}
