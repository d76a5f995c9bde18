use thiserror::Error;

/// Errors surfaced by the metadata index.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("no matching row")]
    NotFound,
    #[error("invalid face query '{0}', expected <hash>/<face index>")]
    InvalidFaceQuery(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("index I/O error: {0}")]
    Io(#[from] std::io::Error),
}
