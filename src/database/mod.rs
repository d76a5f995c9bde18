pub mod dimension;
pub mod entity;
pub mod error;
pub mod finder;
pub mod persist;
pub mod repo;
pub mod schema;
pub mod scored;
pub mod search;

pub use error::IndexError;
pub use repo::{MetadataIndex, OriginInfo, OriginRecord};
pub use search::{AssetFilter, AssetListItem};
