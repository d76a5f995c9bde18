use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use crossbeam::channel::{bounded, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::database::{MetadataIndex, OriginInfo};
use crate::ingest::scanner;
use crate::media::mimetype;
use crate::storage::{unpack_if_archive, AddedFileInfo, BlobStore, StoreError};

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub recursive: bool,
    pub workers: usize,
    /// Leave metadata alone for content that was already stored.
    pub skip_meta_if_exists: bool,
    pub owner: String,
    pub show_progress: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub files: usize,
    pub new_blobs: usize,
    pub unpacked: usize,
    pub registered: usize,
    pub failed: usize,
}

/// A stored blob with the origin it was seen under.
struct ImportJob {
    info: AddedFileInfo,
    origin: OriginInfo,
}

enum Outcome {
    Stored(ImportJob),
    Failed,
}

/// Name of the account running the import.
pub fn current_user() -> String {
    ["USER", "USERNAME", "LOGNAME"]
        .iter()
        .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Imports `roots` into the store and index.
///
/// One thread scans, `workers` threads stage blobs and expand archives, and
/// the calling thread registers metadata, so index writes stay serialized.
pub fn import_paths(
    store: Arc<BlobStore>,
    index: &MetadataIndex,
    roots: &[PathBuf],
    options: &ImportOptions,
) -> Result<ImportSummary> {
    let (scan_tx, scan_rx) = bounded::<PathBuf>(CHANNEL_CAPACITY);
    let (job_tx, job_rx) = bounded::<Outcome>(CHANNEL_CAPACITY);

    let scan_roots = roots.to_vec();
    let recursive = options.recursive;
    let scanner_handle = thread::spawn(move || {
        info!("Scanner started");
        let mut sent = 0;
        for root in &scan_roots {
            match scanner::scan_path(root, recursive, &scan_tx) {
                Ok(n) => sent += n,
                Err(e) => error!("Scanner failed on {:?}: {}", root, e),
            }
        }
        info!(files = sent, "Scanner finished");
    });

    let mut worker_handles = Vec::new();
    for i in 0..options.workers.max(1) {
        let rx = scan_rx.clone();
        let tx = job_tx.clone();
        let store = Arc::clone(&store);
        let owner = options.owner.clone();
        worker_handles.push(thread::spawn(move || {
            for path in rx {
                if let Err(e) = store_file(&store, &path, &owner, &tx) {
                    error!("Failed to store {:?}: {:#}", path, e);
                    if tx.send(Outcome::Failed).is_err() {
                        break;
                    }
                }
            }
            info!("Store worker {} finished", i);
        }));
    }
    drop(scan_rx);
    drop(job_tx);

    let progress = if options.show_progress {
        let bar = ProgressBar::new_spinner();
        bar.set_style(ProgressStyle::with_template("{spinner} {pos} blobs {msg}")?);
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    } else {
        ProgressBar::hidden()
    };

    let mut summary = ImportSummary::default();
    for outcome in job_rx {
        progress.inc(1);
        let job = match outcome {
            Outcome::Stored(job) => job,
            Outcome::Failed => {
                summary.failed += 1;
                continue;
            }
        };
        if job.info.source_path.is_some() {
            summary.unpacked += 1;
        } else {
            summary.files += 1;
        }
        if job.info.is_new {
            summary.new_blobs += 1;
        }
        if !job.info.is_new && options.skip_meta_if_exists {
            continue;
        }
        match register_union(index, &job) {
            Ok(()) => summary.registered += 1,
            Err(e) => {
                error!(hash = %job.info.hash, "Failed to register metadata: {:#}", e);
                summary.failed += 1;
            }
        }
        progress.set_message(job.origin.name);
    }
    progress.finish_with_message("done");

    scanner_handle
        .join()
        .map_err(|_| anyhow!("scanner thread panicked"))?;
    for handle in worker_handles {
        handle
            .join()
            .map_err(|_| anyhow!("store worker panicked"))?;
    }

    info!(
        files = summary.files,
        new = summary.new_blobs,
        unpacked = summary.unpacked,
        failed = summary.failed,
        "Import finished"
    );
    Ok(summary)
}

/// Stores one file and, for archives, each member.
fn store_file(store: &BlobStore, path: &Path, owner: &str, tx: &Sender<Outcome>) -> Result<()> {
    let info = match store.put_path(path) {
        // another worker published the same content first
        Err(StoreError::AlreadyExists(dest)) => {
            warn!("Concurrent publish of {:?}, retrying as duplicate", dest);
            store.put_path(path)?
        }
        other => other?,
    };
    let absolute = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let file_time = modified_time(path)?;
    let origin = OriginInfo {
        name: file_name(&absolute),
        path: absolute
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default(),
        owner: owner.to_string(),
        file_time,
    };

    let media_type = info.media_type.clone();
    if tx.send(Outcome::Stored(ImportJob { info, origin })).is_err() {
        return Ok(());
    }

    if mimetype::is_archive(&media_type) {
        let archive_path = absolute.to_string_lossy().to_string();
        for member in unpack_if_archive(store, path, &media_type)? {
            let Some(member_path) = member.source_path.clone() else {
                warn!("Archive member without a source path: {}", member.hash);
                continue;
            };
            let origin = member_origin(&archive_path, &member_path, owner, file_time);
            if tx.send(Outcome::Stored(ImportJob { info: member, origin })).is_err() {
                break;
            }
        }
    }
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn modified_time(path: &Path) -> Result<DateTime<Utc>> {
    let modified = fs::metadata(path)
        .and_then(|m| m.modified())
        .with_context(|| format!("Failed to read modification time of {:?}", path))?;
    Ok(DateTime::<Utc>::from(modified))
}

/// Origin of an archive member: its base name, under the archive path.
fn member_origin(archive_path: &str, member_path: &str, owner: &str, file_time: DateTime<Utc>) -> OriginInfo {
    let (dir, name) = match member_path.rsplit_once('/') {
        Some((dir, name)) => (format!("{archive_path}/{dir}"), name),
        None => (archive_path.to_string(), member_path),
    };
    OriginInfo {
        name: name.to_string(),
        path: dir,
        owner: owner.to_string(),
        file_time,
    }
}

/// Registers the job's origin together with every origin already known.
fn register_union(index: &MetadataIndex, job: &ImportJob) -> Result<()> {
    let mut origins: Vec<OriginInfo> = index
        .origins(&job.info.hash)?
        .iter()
        .map(OriginInfo::from)
        .collect();
    let incoming = normalized(&job.origin);
    if !origins.iter().any(|o| normalized(o) == incoming) {
        origins.push(job.origin.clone());
    }
    index.register(&job.info.hash, &job.info.media_type, &origins)?;
    Ok(())
}

/// Stored paths lose their separator style and leading slash, so compare
/// on the segment list.
fn normalized(origin: &OriginInfo) -> (String, Vec<String>, String, DateTime<Utc>) {
    (
        origin.name.clone(),
        crate::database::dimension::split_path(&origin.path),
        origin.owner.clone(),
        origin.file_time,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::AssetFilter;
    use crate::storage::transform::TransformPipeline;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn options(skip_meta_if_exists: bool) -> ImportOptions {
        ImportOptions {
            recursive: true,
            workers: 2,
            skip_meta_if_exists,
            owner: "tester".to_string(),
            show_progress: false,
        }
    }

    fn fixture() -> Result<(tempfile::TempDir, Arc<BlobStore>, MetadataIndex)> {
        let dir = tempfile::tempdir()?;
        let store = BlobStore::with_layout(
            dir.path().join("store/files"),
            dir.path().join("store/tmp"),
            1024,
            TransformPipeline::plain(),
        )?;
        Ok((dir, Arc::new(store), MetadataIndex::open_in_memory()?))
    }

    #[test]
    fn test_import_registers_union_of_origins() -> Result<()> {
        let (dir, store, index) = fixture()?;
        let input = dir.path().join("input");
        fs::create_dir_all(input.join("one"))?;
        fs::create_dir_all(input.join("two"))?;
        fs::write(input.join("one/report.txt"), b"same bytes")?;
        fs::write(input.join("two/copy.txt"), b"same bytes")?;
        fs::write(input.join("other.txt"), b"different bytes")?;

        let summary = import_paths(Arc::clone(&store), &index, &[input.clone()], &options(false))?;
        assert_eq!(summary.files, 3);
        assert_eq!(summary.new_blobs, 2);
        assert_eq!(summary.registered, 3);
        assert_eq!(summary.failed, 0);

        let info = store.put(&b"same bytes"[..], None)?;
        let mut names: Vec<_> = index.origins(&info.hash)?.into_iter().map(|o| o.name).collect();
        names.sort();
        assert_eq!(names, vec!["copy.txt", "report.txt"]);

        // a second run adds nothing new
        import_paths(Arc::clone(&store), &index, &[input], &options(false))?;
        assert_eq!(index.origins(&info.hash)?.len(), 2);
        Ok(())
    }

    #[test]
    fn test_skip_meta_for_known_content() -> Result<()> {
        let (dir, store, index) = fixture()?;
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        fs::create_dir_all(&first)?;
        fs::create_dir_all(&second)?;
        fs::write(first.join("a.bin"), [1u8, 2, 3, 0, 4])?;
        fs::write(second.join("b.bin"), [1u8, 2, 3, 0, 4])?;

        import_paths(Arc::clone(&store), &index, &[first], &options(true))?;
        let summary = import_paths(Arc::clone(&store), &index, &[second], &options(true))?;
        assert_eq!(summary.new_blobs, 0);
        assert_eq!(summary.registered, 0);

        let found = index.search(&AssetFilter {
            file_name: "b.bin".to_string(),
            count: 10,
            ..AssetFilter::default()
        })?;
        assert!(found.is_empty());
        Ok(())
    }

    #[test]
    fn test_archive_members_are_registered() -> Result<()> {
        let (dir, store, index) = fixture()?;
        let input = dir.path().join("input");
        fs::create_dir_all(&input)?;
        let mut zip = zip::ZipWriter::new(fs::File::create(input.join("bundle.zip"))?);
        zip.start_file("docs/inner.txt", SimpleFileOptions::default())?;
        zip.write_all(b"inside the archive")?;
        zip.finish()?;

        let summary = import_paths(Arc::clone(&store), &index, &[input], &options(false))?;
        assert_eq!(summary.files, 1);
        assert_eq!(summary.unpacked, 1);

        let found = index.search(&AssetFilter {
            file_name: "inner".to_string(),
            count: 10,
            ..AssetFilter::default()
        })?;
        assert_eq!(found.len(), 1);
        let origins = index.origins(&found[0].hash)?;
        assert!(origins[0].path.ends_with("bundle.zip/docs"));
        Ok(())
    }

    #[test]
    fn test_member_origin() {
        let t = DateTime::<Utc>::default();
        let nested = member_origin("/in/a.zip", "x/y/z.txt", "u", t);
        assert_eq!(nested.name, "z.txt");
        assert_eq!(nested.path, "/in/a.zip/x/y");
        let top = member_origin("/in/a.zip", "z.txt", "u", t);
        assert_eq!(top.path, "/in/a.zip");
    }
}
