use std::path::{Path, PathBuf};

use anyhow::Result;
use crossbeam::channel::Sender;
use walkdir::{DirEntry, WalkDir};

/// Sends every regular file under `root` to `tx`, skipping hidden entries.
///
/// A file given as `root` is sent as is. Without `recursive` only the direct
/// children of a directory are visited. Returns the number of paths sent;
/// stops early when the receiving side hung up.
pub fn scan_path(root: &Path, recursive: bool, tx: &Sender<PathBuf>) -> Result<usize> {
    let mut walker = WalkDir::new(root).follow_links(false);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut sent = 0;
    for entry in walker
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
    {
        let entry = entry?;
        if entry.file_type().is_file() {
            if tx.send(entry.into_path()).is_err() {
                break;
            }
            sent += 1;
        }
    }
    Ok(sent)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;
    use std::fs;

    fn scanned(root: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
        let (tx, rx) = unbounded();
        scan_path(root, recursive, &tx)?;
        drop(tx);
        let mut paths: Vec<_> = rx.iter().collect();
        paths.sort();
        Ok(paths)
    }

    #[test]
    fn test_scan_skips_hidden() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path();
        fs::create_dir_all(root.join("sub/.cache"))?;
        fs::write(root.join("a.txt"), b"a")?;
        fs::write(root.join(".secret"), b"s")?;
        fs::write(root.join("sub/b.txt"), b"b")?;
        fs::write(root.join("sub/.cache/c.txt"), b"c")?;

        assert_eq!(
            scanned(root, true)?,
            vec![root.join("a.txt"), root.join("sub/b.txt")]
        );
        assert_eq!(scanned(root, false)?, vec![root.join("a.txt")]);
        assert_eq!(scanned(&root.join("a.txt"), false)?, vec![root.join("a.txt")]);
        Ok(())
    }
}
