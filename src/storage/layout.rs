//! On-disk naming: `{root}/{time_period_hex}/{hash[0:2]}/{hash[2:]}`.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use super::error::StoreError;

/// Bucket id for the given wall-clock time, rendered as lowercase hex.
///
/// The quantization `millis / 1000 / 60 / 24 / 4` is part of the on-disk
/// format and must not change.
pub fn time_period_name(now: SystemTime) -> String {
    let millis = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("{:x}", millis / 1000 / 60 / 24 / 4)
}

pub fn current_time_period() -> String {
    time_period_name(SystemTime::now())
}

/// Rejects anything that cannot be a shard key: too short, or not lowercase hex.
pub fn check_hash(hash: &str) -> Result<(), StoreError> {
    let well_formed = hash.len() >= 2
        && hash
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if well_formed {
        Ok(())
    } else {
        Err(StoreError::InvalidHash(hash.to_string()))
    }
}

/// Path of `hash` inside one time-period directory.
pub fn blob_path(root: &Path, period: &str, hash: &str) -> PathBuf {
    root.join(period).join(&hash[..2]).join(&hash[2..])
}

/// Recovers the content hash from a blob path (`.../xx/rest[.ext]`).
pub fn hash_from_path(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let shard = path.parent()?.file_name()?.to_str()?;
    let hash = format!("{shard}{name}");
    match hash.find('.') {
        Some(p) => Some(hash[..p].to_string()),
        None => Some(hash),
    }
}
