pub mod error;
pub mod layout;
pub mod staging;
pub mod store;
pub mod transform;
pub mod unpack;

pub use error::StoreError;
pub use store::{AddedFileInfo, BlobStore};
pub use unpack::unpack_if_archive;
