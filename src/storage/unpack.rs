use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tracing::{debug, info, warn};
use zip::ZipArchive;

use super::error::StoreError;
use super::store::{AddedFileInfo, BlobStore};
use crate::media::mimetype;

/// Stores every member of a zip-family archive as its own blob.
///
/// Returns an empty list when `media_type` is not an archive. Members are
/// expanded one level deep; a member that fails is logged and skipped.
pub fn unpack_if_archive(
    store: &BlobStore,
    path: &Path,
    media_type: &str,
) -> Result<Vec<AddedFileInfo>, StoreError> {
    if !mimetype::is_archive(media_type) {
        return Ok(Vec::new());
    }

    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => StoreError::NotExist(path.to_path_buf()),
        _ => StoreError::Io(e),
    })?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;
    let mut unpacked = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let mut entry = match archive.by_index(i) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(archive = ?path, index = i, "Error opening archive member: {}", e);
                continue;
            }
        };
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let size = entry.size();

        match store.put(&mut entry, Some(size)) {
            Ok(mut info) => {
                debug!(archive = ?path, member = %name, hash = %info.hash, "unpacked");
                info.source_path = Some(name);
                unpacked.push(info);
            }
            Err(e) => warn!(archive = ?path, member = %name, "Error storing archive member: {}", e),
        }
    }

    info!(archive = ?path, members = unpacked.len(), "archive expanded");
    Ok(unpacked)
}
