use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

/// Staging falls back to a scratch file above this many bytes.
pub const DEFAULT_MAX_MEM_FILE_SIZE: u64 = 1000 * 1000 * 400;

const SETTINGS_FILE: &str = "storage.env";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("store at {path:?} was created with {key}={stored}, refusing to run with {key}={requested}")]
    PipelineMismatch {
        path: PathBuf,
        key: &'static str,
        stored: bool,
        requested: bool,
    },
    #[error("failed to parse {path:?}: {reason}")]
    Parse { path: PathBuf, reason: String },
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub base_dir: PathBuf,
    pub use_gzip: bool,
    pub xor_key: Option<Vec<u8>>,
    pub max_mem_file_size: u64,
    pub skip_meta_if_exists: bool,
    pub workers: usize,
}

impl Config {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            use_gzip: false,
            xor_key: None,
            max_mem_file_size: DEFAULT_MAX_MEM_FILE_SIZE,
            skip_meta_if_exists: false,
            workers: 4,
        }
    }

    /// Uses the given passphrase as obfuscation key, see [`derive_xor_key`].
    pub fn with_xor_passphrase(mut self, passphrase: &str) -> Self {
        self.xor_key = derive_xor_key(passphrase);
        self
    }

    pub fn with_gzip(mut self, use_gzip: bool) -> Self {
        self.use_gzip = use_gzip;
        self
    }

    fn root(&self) -> PathBuf {
        self.base_dir.join("asset-storage")
    }

    /// Root of the time-sharded blob tree.
    pub fn storage_dir(&self) -> PathBuf {
        self.root().join("files")
    }

    /// Scratch area. Lives next to the blob tree so publishing is a rename.
    pub fn temp_dir(&self) -> PathBuf {
        self.root().join("tmp")
    }

    pub fn database_path(&self) -> PathBuf {
        self.root().join("db").join("asset-metadata.sqlite")
    }

    fn settings_path(&self) -> PathBuf {
        self.root().join(SETTINGS_FILE)
    }

    /// Pins the transform settings to the store.
    ///
    /// The first run writes them to `storage.env`; later runs must agree with
    /// what was written, because blobs written under another gzip/xor setting
    /// cannot be read back.
    pub fn pin_transform_settings(&self) -> Result<(), ConfigError> {
        let path = self.settings_path();
        let requested = PinnedSettings {
            use_gzip: self.use_gzip,
            use_xor: self.xor_key.is_some(),
        };

        if path.exists() {
            let stored = load_from_env(&path)?;
            if stored.use_gzip != requested.use_gzip {
                return Err(ConfigError::PipelineMismatch {
                    path,
                    key: "USE_GZIP",
                    stored: stored.use_gzip,
                    requested: requested.use_gzip,
                });
            }
            if stored.use_xor != requested.use_xor {
                return Err(ConfigError::PipelineMismatch {
                    path,
                    key: "USE_XOR",
                    stored: stored.use_xor,
                    requested: requested.use_xor,
                });
            }
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        save_to_env(&path, &requested)?;
        info!("Pinned transform settings in {:?}", path);
        Ok(())
    }
}

/// Turns a passphrase into the byte key used by the obfuscation transform.
///
/// Keys of 64 bytes or more are used verbatim. Shorter ones become the ASCII
/// hex string of `passphrase ++ sha256("")`, which is what existing stores
/// were written with.
pub fn derive_xor_key(passphrase: &str) -> Option<Vec<u8>> {
    if passphrase.is_empty() {
        return None;
    }
    if passphrase.len() >= 64 {
        return Some(passphrase.as_bytes().to_vec());
    }
    let mut material = passphrase.as_bytes().to_vec();
    material.extend_from_slice(&Sha256::digest(b""));
    Some(hex::encode(material).into_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PinnedSettings {
    use_gzip: bool,
    use_xor: bool,
}

fn load_from_env(path: &Path) -> Result<PinnedSettings, ConfigError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut use_gzip = None;
    let mut use_xor = None;

    for line in reader.lines() {
        let line = line?;
        if let Some((key, value)) = line.split_once('=') {
            let parsed = match value.trim() {
                "true" => true,
                "false" => false,
                other => {
                    return Err(ConfigError::Parse {
                        path: path.to_path_buf(),
                        reason: format!("expected true/false for {}, got '{}'", key.trim(), other),
                    })
                }
            };
            match key.trim() {
                "USE_GZIP" => use_gzip = Some(parsed),
                "USE_XOR" => use_xor = Some(parsed),
                _ => {}
            }
        }
    }

    match (use_gzip, use_xor) {
        (Some(use_gzip), Some(use_xor)) => Ok(PinnedSettings { use_gzip, use_xor }),
        _ => Err(ConfigError::Parse {
            path: path.to_path_buf(),
            reason: "incomplete settings file".to_string(),
        }),
    }
}

fn save_to_env(path: &Path, settings: &PinnedSettings) -> Result<(), ConfigError> {
    let mut file = File::create(path)?;
    writeln!(file, "USE_GZIP={}", settings.use_gzip)?;
    writeln!(file, "USE_XOR={}", settings.use_xor)?;
    Ok(())
}
