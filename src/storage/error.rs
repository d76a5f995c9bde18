use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the blob store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("source does not exist: {0:?}")]
    NotExist(PathBuf),
    #[error("blob not found: {0}")]
    NotFound(String),
    /// A blob appeared at the destination between the existence probe and
    /// the publish step.
    #[error("blob already exists at {0:?}")]
    AlreadyExists(PathBuf),
    #[error("invalid content hash: '{0}'")]
    InvalidHash(String),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}
