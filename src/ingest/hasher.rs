use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use memmap2::MmapOptions;
use rayon::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{error, info};

use crate::storage::staging::IO_BUFFER_SIZE;
use crate::storage::BlobStore;

const MMAP_THRESHOLD: u64 = 500 * 1024 * 1024; // 500 MB

/// Hex SHA-256 of everything `reader` yields.
pub fn hash_reader<R: Read>(mut reader: R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0; IO_BUFFER_SIZE];
    loop {
        let count = reader.read(&mut buffer)?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hashes the plaintext of a stored blob file.
pub fn hash_stored_file(store: &BlobStore, path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("Failed to open blob: {:?}", path))?;
    let len = file.metadata()?.len();

    if store.pipeline().is_plain() && len > MMAP_THRESHOLD {
        // SAFETY: published blobs are never rewritten in place.
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        return Ok(hex::encode(Sha256::digest(&mmap[..])));
    }
    hash_reader(store.pipeline().wrap_reader(BufReader::new(file)))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    pub path: PathBuf,
    pub expected: String,
    /// `None` when the blob could not be read at all.
    pub actual: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct VerifyReport {
    pub checked: usize,
    pub mismatches: Vec<Mismatch>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Re-hashes every stored blob in parallel and compares it to its name.
pub fn verify_store(store: &BlobStore) -> Result<VerifyReport> {
    let mut blobs = Vec::new();
    store.walk(|path, hash| blobs.push((path.to_path_buf(), hash.to_string())))?;
    info!(blobs = blobs.len(), "verifying store");

    let mut mismatches: Vec<Mismatch> = blobs
        .par_iter()
        .filter_map(|(path, expected)| match hash_stored_file(store, path) {
            Ok(actual) if &actual == expected => None,
            Ok(actual) => {
                error!(path = ?path, expected = %expected, actual = %actual, "hash mismatch");
                Some(Mismatch {
                    path: path.clone(),
                    expected: expected.clone(),
                    actual: Some(actual),
                })
            }
            Err(e) => {
                error!(path = ?path, "Failed to read blob: {:#}", e);
                Some(Mismatch {
                    path: path.clone(),
                    expected: expected.clone(),
                    actual: None,
                })
            }
        })
        .collect();
    mismatches.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(VerifyReport {
        checked: blobs.len(),
        mismatches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::transform::TransformPipeline;
    use std::fs;

    #[test]
    fn test_hash_reader() -> Result<()> {
        assert_eq!(
            hash_reader(&b""[..])?,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        Ok(())
    }

    #[test]
    fn test_verify_detects_corruption() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = BlobStore::with_layout(
            dir.path().join("files"),
            dir.path().join("tmp"),
            1024,
            TransformPipeline::new(true, Some(b"key".to_vec())),
        )?;
        let good = store.put(&b"intact content"[..], None)?;
        let bad = store.put(&b"content to damage"[..], None)?;

        let clean = verify_store(&store)?;
        assert_eq!(clean.checked, 2);
        assert!(clean.is_clean());

        fs::write(&bad.storage_path, b"garbage")?;
        let report = verify_store(&store)?;
        assert_eq!(report.checked, 2);
        assert_eq!(report.mismatches.len(), 1);
        assert_eq!(report.mismatches[0].expected, bad.hash);
        assert_ne!(report.mismatches[0].expected, good.hash);
        Ok(())
    }
}
