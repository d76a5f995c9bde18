//! Byte-stream transforms wrapped around staging sinks and stored files.
//!
//! Write order is plaintext -> xor -> gzip -> sink; reading mirrors it.
//! Changing either option once blobs exist makes those blobs unreadable.

use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use super::error::StoreError;

/// A named, in-order byte sink that can be published or discarded.
pub trait StorageWriter: Write {
    fn name(&self) -> String;

    /// Flushes everything buffered by this writer and the ones it wraps.
    fn close(&mut self) -> io::Result<()>;

    /// Atomically publishes the written bytes at `dest`.
    fn move_to(self: Box<Self>, dest: &Path) -> Result<(), StoreError>;

    /// Discards the written bytes.
    fn remove(self: Box<Self>) -> io::Result<()>;
}

/// Repeating-key XOR. The key position survives across calls, so the
/// result does not depend on how the stream is chunked.
#[derive(Debug, Clone)]
pub struct XorCipher {
    key: Arc<[u8]>,
    pos: usize,
}

impl XorCipher {
    pub fn new(key: Arc<[u8]>) -> Self {
        Self { key, pos: 0 }
    }

    pub fn apply(&mut self, buf: &mut [u8]) {
        let len = self.key.len();
        if len == 0 {
            return;
        }
        for b in buf.iter_mut() {
            *b ^= self.key[self.pos];
            self.pos += 1;
            if self.pos == len {
                self.pos = 0;
            }
        }
    }
}

pub struct XorWriter<W> {
    inner: W,
    cipher: XorCipher,
    scratch: Vec<u8>,
}

impl<W: Write> XorWriter<W> {
    pub fn new(inner: W, cipher: XorCipher) -> Self {
        Self {
            inner,
            cipher,
            scratch: Vec::new(),
        }
    }
}

impl<W: Write> Write for XorWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.scratch.clear();
        self.scratch.extend_from_slice(buf);
        self.cipher.apply(&mut self.scratch);
        // all or nothing, otherwise the key position drifts
        self.inner.write_all(&self.scratch)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl StorageWriter for XorWriter<Box<dyn StorageWriter>> {
    fn name(&self) -> String {
        self.inner.name()
    }

    fn close(&mut self) -> io::Result<()> {
        self.inner.close()
    }

    fn move_to(self: Box<Self>, dest: &Path) -> Result<(), StoreError> {
        self.inner.move_to(dest)
    }

    fn remove(self: Box<Self>) -> io::Result<()> {
        self.inner.remove()
    }
}

pub struct XorReader<R> {
    inner: R,
    cipher: XorCipher,
}

impl<R: Read> XorReader<R> {
    pub fn new(inner: R, cipher: XorCipher) -> Self {
        Self { inner, cipher }
    }
}

impl<R: Read> Read for XorReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.cipher.apply(&mut buf[..n]);
        Ok(n)
    }
}

pub struct GzipWriter {
    encoder: GzEncoder<Box<dyn StorageWriter>>,
}

impl GzipWriter {
    pub fn new(inner: Box<dyn StorageWriter>) -> Self {
        Self {
            encoder: GzEncoder::new(inner, Compression::default()),
        }
    }
}

impl Write for GzipWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.encoder.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()
    }
}

impl StorageWriter for GzipWriter {
    fn name(&self) -> String {
        self.encoder.get_ref().name()
    }

    fn close(&mut self) -> io::Result<()> {
        self.encoder.try_finish()?;
        self.encoder.get_mut().close()
    }

    fn move_to(self: Box<Self>, dest: &Path) -> Result<(), StoreError> {
        let inner = self.encoder.finish()?;
        inner.move_to(dest)
    }

    fn remove(self: Box<Self>) -> io::Result<()> {
        self.encoder.finish()?.remove()
    }
}

/// Process-wide transform choice.
#[derive(Debug, Clone, Default)]
pub struct TransformPipeline {
    gzip: bool,
    xor_key: Option<Arc<[u8]>>,
}

impl TransformPipeline {
    pub fn new(gzip: bool, xor_key: Option<Vec<u8>>) -> Self {
        Self {
            gzip,
            xor_key: xor_key.filter(|k| !k.is_empty()).map(Arc::from),
        }
    }

    pub fn plain() -> Self {
        Self::default()
    }

    pub fn is_plain(&self) -> bool {
        !self.gzip && self.xor_key.is_none()
    }

    pub fn wrap_writer(&self, sink: Box<dyn StorageWriter>) -> Box<dyn StorageWriter> {
        let mut writer = sink;
        if self.gzip {
            writer = Box::new(GzipWriter::new(writer));
        }
        if let Some(key) = &self.xor_key {
            writer = Box::new(XorWriter::new(writer, XorCipher::new(Arc::clone(key))));
        }
        writer
    }

    pub fn wrap_reader<'a, R: Read + Send + 'a>(&self, source: R) -> Box<dyn Read + Send + 'a> {
        let mut reader: Box<dyn Read + Send + 'a> = Box::new(source);
        if self.gzip {
            reader = Box::new(GzDecoder::new(reader));
        }
        if let Some(key) = &self.xor_key {
            reader = Box::new(XorReader::new(reader, XorCipher::new(Arc::clone(key))));
        }
        reader
    }
}
