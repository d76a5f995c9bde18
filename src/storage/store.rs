use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use memmap2::MmapOptions;
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::error::StoreError;
use super::layout::{blob_path, check_hash, current_time_period, hash_from_path};
use super::staging::{Staged, Stager};
use super::transform::TransformPipeline;
use crate::utils::config::Config;

/// Files above this size are memory-mapped instead of streamed.
const MMAP_THRESHOLD: u64 = 500 * 1024 * 1024;

const HASH_LEN: usize = 64;

#[cfg(unix)]
const FILE_PERMISSIONS: u32 = 0o744;

pub type BlobReader = Box<dyn Read + Send>;

/// Result of a `put`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddedFileInfo {
    pub hash: String,
    pub storage_path: PathBuf,
    pub media_type: String,
    pub size: u64,
    pub is_new: bool,
    /// Member path inside the archive this blob was unpacked from.
    pub source_path: Option<String>,
}

/// Content-addressed, time-sharded blob store on the local filesystem.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
    stager: Stager,
}

impl BlobStore {
    /// Opens the store described by `config`, creating its directories.
    pub fn from_config(config: &Config) -> Result<Self, StoreError> {
        let pipeline = TransformPipeline::new(config.use_gzip, config.xor_key.clone());
        Self::with_layout(
            config.storage_dir(),
            config.temp_dir(),
            config.max_mem_file_size,
            pipeline,
        )
    }

    pub fn with_layout(
        root: PathBuf,
        temp_dir: PathBuf,
        max_mem_file_size: u64,
        pipeline: TransformPipeline,
    ) -> Result<Self, StoreError> {
        for dir in [&root, &temp_dir] {
            if !dir.exists() {
                fs::create_dir_all(dir)?;
                info!("Created directory: {:?}", dir);
            }
        }
        Ok(Self {
            root,
            stager: Stager::new(temp_dir, max_mem_file_size, pipeline),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pipeline(&self) -> &TransformPipeline {
        self.stager.pipeline()
    }

    /// Stores a byte stream, deduplicating by content hash.
    pub fn put<R: Read>(&self, source: R, declared_size: Option<u64>) -> Result<AddedFileInfo, StoreError> {
        let staged = self.stager.stage(source, declared_size)?;
        self.commit(staged)
    }

    /// Stores a file from the local filesystem.
    pub fn put_path(&self, path: &Path) -> Result<AddedFileInfo, StoreError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotExist(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata()?.len();
        debug!(path = ?path, len, "adding file");

        if len > MMAP_THRESHOLD {
            // SAFETY: the mapping is only read while staging; a concurrent
            // truncation of the source is outside what this tool guards against.
            let mmap = unsafe { MmapOptions::new().map(&file)? };
            self.put(&mmap[..], Some(len))
        } else {
            self.put(BufReader::new(file), Some(len))
        }
    }

    fn commit(&self, staged: Staged) -> Result<AddedFileInfo, StoreError> {
        let Staged {
            writer,
            hash,
            media_type,
            size,
        } = staged;
        check_hash(&hash)?;

        if let Some(existing) = self.locate(&hash)? {
            debug!(hash = %hash, path = ?existing, "content already stored");
            if let Err(e) = writer.remove() {
                warn!("Failed to remove staged data: {}", e);
            }
            return Ok(AddedFileInfo {
                hash,
                storage_path: existing,
                media_type,
                size,
                is_new: false,
                source_path: None,
            });
        }

        let dest = blob_path(&self.root, &current_time_period(), &hash);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        writer.move_to(&dest)?;
        set_permissions(&dest)?;
        info!(hash = %hash, path = ?dest, "stored new blob");

        Ok(AddedFileInfo {
            hash,
            storage_path: dest,
            media_type,
            size,
            is_new: true,
            source_path: None,
        })
    }

    /// Finds the stored file for `hash`.
    ///
    /// The current time period is probed first; on a miss every period
    /// directory is checked.
    pub fn locate(&self, hash: &str) -> Result<Option<PathBuf>, StoreError> {
        check_hash(hash)?;

        let current = current_time_period();
        let candidate = blob_path(&self.root, &current, hash);
        if candidate.is_file() {
            return Ok(Some(candidate));
        }

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut periods = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                periods.push(entry.file_name());
            }
        }
        // newest first, most lookups hit recent content
        periods.sort_unstable_by(|a, b| b.cmp(a));

        for period in periods {
            let Some(period) = period.to_str() else {
                continue;
            };
            if period == current {
                continue;
            }
            let candidate = blob_path(&self.root, period, hash);
            if candidate.is_file() {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// Opens a stored blob for reading through the transform pipeline.
    pub fn open(&self, hash: &str) -> Result<BlobReader, StoreError> {
        let path = self
            .locate(hash)?
            .ok_or_else(|| StoreError::NotFound(hash.to_string()))?;
        let file = File::open(path)?;
        Ok(self.pipeline().wrap_reader(BufReader::new(file)))
    }

    pub fn read_all(&self, hash: &str) -> Result<Vec<u8>, StoreError> {
        let mut reader = self.open(hash)?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Visits every stored blob as `(path, hash)`. Returns the number visited.
    pub fn walk<F>(&self, mut visit: F) -> Result<usize, StoreError>
    where
        F: FnMut(&Path, &str),
    {
        let mut count = 0;
        for entry in WalkDir::new(&self.root).min_depth(3).max_depth(3) {
            let entry = entry.map_err(|e| StoreError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(hash) = hash_from_path(entry.path()) else {
                continue;
            };
            if hash.len() != HASH_LEN || check_hash(&hash).is_err() {
                continue;
            }
            visit(entry.path(), &hash);
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(unix)]
fn set_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(FILE_PERMISSIONS))
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
