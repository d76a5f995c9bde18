use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::{NamedTempFile, PersistError};
use tracing::debug;

use super::error::StoreError;
use super::transform::{StorageWriter, TransformPipeline};
use crate::media::mimetype;

pub const IO_BUFFER_SIZE: usize = 8192;

/// Staging buffer kept entirely in memory.
pub struct MemorySink {
    buf: Vec<u8>,
    temp_dir: PathBuf,
}

impl MemorySink {
    pub fn new(temp_dir: &Path, capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            temp_dir: temp_dir.to_path_buf(),
        }
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl StorageWriter for MemorySink {
    fn name(&self) -> String {
        "InMemory".to_string()
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn move_to(self: Box<Self>, dest: &Path) -> Result<(), StoreError> {
        let mut file = tempfile::Builder::new()
            .prefix("asset-")
            .tempfile_in(&self.temp_dir)?;
        file.write_all(&self.buf)?;
        file.as_file().sync_all()?;
        persist(file, dest)
    }

    fn remove(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }
}

/// Staging buffer backed by a scratch file on the store's volume.
pub struct ScratchFileSink {
    file: NamedTempFile,
}

impl ScratchFileSink {
    pub fn new(temp_dir: &Path) -> io::Result<Self> {
        let file = tempfile::Builder::new()
            .prefix("asset-")
            .suffix(".tmp")
            .tempfile_in(temp_dir)?;
        Ok(Self { file })
    }
}

impl Write for ScratchFileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl StorageWriter for ScratchFileSink {
    fn name(&self) -> String {
        self.file.path().display().to_string()
    }

    fn close(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.as_file().sync_all()
    }

    fn move_to(self: Box<Self>, dest: &Path) -> Result<(), StoreError> {
        persist(self.file, dest)
    }

    fn remove(self: Box<Self>) -> io::Result<()> {
        self.file.close()
    }
}

/// Renames into place, refusing to replace an existing blob.
fn persist(file: NamedTempFile, dest: &Path) -> Result<(), StoreError> {
    match file.persist_noclobber(dest) {
        Ok(_) => Ok(()),
        Err(PersistError { error, .. }) if error.kind() == ErrorKind::AlreadyExists => {
            Err(StoreError::AlreadyExists(dest.to_path_buf()))
        }
        Err(PersistError { error, .. }) => Err(StoreError::Io(error)),
    }
}

/// Bytes that went through the pipeline but are not published yet.
pub struct Staged {
    pub writer: Box<dyn StorageWriter>,
    pub hash: String,
    pub media_type: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct Stager {
    temp_dir: PathBuf,
    max_mem_file_size: u64,
    pipeline: TransformPipeline,
}

impl Stager {
    pub fn new(temp_dir: PathBuf, max_mem_file_size: u64, pipeline: TransformPipeline) -> Self {
        Self {
            temp_dir,
            max_mem_file_size,
            pipeline,
        }
    }

    pub fn pipeline(&self) -> &TransformPipeline {
        &self.pipeline
    }

    fn sink_for(&self, declared_size: Option<u64>) -> Result<Box<dyn StorageWriter>, StoreError> {
        match declared_size {
            Some(size) if size <= self.max_mem_file_size => {
                Ok(Box::new(MemorySink::new(&self.temp_dir, size as usize)))
            }
            _ => Ok(Box::new(ScratchFileSink::new(&self.temp_dir)?)),
        }
    }

    /// Copies `source` into a staging sink in one pass.
    ///
    /// The digest and the media type are taken from the plaintext before any
    /// transform sees it.
    pub fn stage<R: Read>(&self, mut source: R, declared_size: Option<u64>) -> Result<Staged, StoreError> {
        let sink = self.sink_for(declared_size)?;
        let mut writer = self.pipeline.wrap_writer(sink);
        debug!(sink = %writer.name(), "staging");

        let mut hasher = Sha256::new();
        let mut media_type = None;
        let mut size = 0u64;
        let mut buf = [0u8; IO_BUFFER_SIZE];

        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            let chunk = &buf[..n];
            if media_type.is_none() {
                media_type = Some(mimetype::detect_from_bytes(chunk));
            }
            hasher.update(chunk);
            writer.write_all(chunk)?;
            size += n as u64;
        }
        writer.close()?;

        let hash = hex::encode(hasher.finalize());
        Ok(Staged {
            writer,
            hash,
            media_type: media_type.unwrap_or_else(|| mimetype::OCTET_STREAM.to_string()),
            size,
        })
    }
}
