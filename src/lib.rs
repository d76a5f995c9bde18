//! Content-addressed asset store with a relational metadata index.
//!
//! [`storage::BlobStore`] keeps one file per distinct SHA-256 in a
//! time-sharded tree; [`database::MetadataIndex`] links those hashes to the
//! names, paths and owners they were seen under and answers ranked searches.

pub mod database;
pub mod ingest;
pub mod media;
pub mod storage;
pub mod utils;

pub use database::{AssetFilter, AssetListItem, IndexError, MetadataIndex, OriginInfo};
pub use storage::{AddedFileInfo, BlobStore, StoreError};
pub use utils::config::Config;
