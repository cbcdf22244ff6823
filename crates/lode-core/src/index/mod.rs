pub mod build;
pub mod diff;
pub mod store;
pub mod version;
pub(crate) mod wire;

pub use build::{build_version_index, BuiltVersion, PathFilter};
pub use diff::{create_version_diff, required_chunk_hashes, VersionDiff};
pub use store::{create_missing_content, merge_store_index, BlockIndex, StoreIndex};
pub use version::{AssetEntry, VersionIndex};
