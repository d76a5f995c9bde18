//! Get-or-create lookups for the dimension tables, memoized per index.
//!
//! The cache is never evicted. Ids resolved inside a transaction are held
//! in the session and reach the shared cache only after the commit.

use std::collections::HashMap;
use std::sync::Mutex;

use rusqlite::Connection;

use super::entity::{FileName, MediaType, Owner, PathItem};
use super::error::IndexError;
use super::persist::get_or_create;
use crate::media::mimetype;

/// Splits a raw path into directory segments.
///
/// Both separator styles are accepted, a leading `file:` scheme is dropped
/// and empty segments collapse. An empty path yields one empty segment.
pub fn split_path(path: &str) -> Vec<String> {
    if path.is_empty() {
        return vec![String::new()];
    }
    let rest = match path.get(..5) {
        Some(scheme) if scheme.eq_ignore_ascii_case("file:") => &path[5..],
        _ => path,
    };
    rest.split(['/', '\\'])
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DimKey {
    MediaType(String),
    FileName(String),
    Owner(String),
    PathItem(i64, String),
}

#[derive(Debug, Default)]
pub struct DimensionCache {
    entries: Mutex<HashMap<DimKey, i64>>,
}

impl DimensionCache {
    pub fn get(&self, key: &DimKey) -> Option<i64> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .copied()
    }

    pub fn publish(&self, resolved: HashMap<DimKey, i64>) {
        if resolved.is_empty() {
            return;
        }
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(resolved);
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Dimension resolver bound to one open transaction.
pub struct Session<'a> {
    conn: &'a Connection,
    cache: &'a DimensionCache,
    pending: HashMap<DimKey, i64>,
}

impl<'a> Session<'a> {
    pub fn new(conn: &'a Connection, cache: &'a DimensionCache) -> Self {
        Self {
            conn,
            cache,
            pending: HashMap::new(),
        }
    }

    pub fn conn(&self) -> &'a Connection {
        self.conn
    }

    /// Ids resolved during this session, to be published after commit.
    pub fn into_pending(self) -> HashMap<DimKey, i64> {
        self.pending
    }

    fn cached(&self, key: &DimKey) -> Option<i64> {
        self.pending
            .get(key)
            .copied()
            .or_else(|| self.cache.get(key))
    }

    pub fn media_type_id(&mut self, name: &str, create: bool) -> Result<i64, IndexError> {
        let name = mimetype::normalize(name);
        let key = DimKey::MediaType(name.clone());
        if let Some(id) = self.cached(&key) {
            return Ok(id);
        }
        let mut row = MediaType::named(name);
        get_or_create(self.conn, &mut row, create)?;
        self.pending.insert(key, row.id);
        Ok(row.id)
    }

    pub fn file_name_id(&mut self, name: &str, create: bool) -> Result<i64, IndexError> {
        let key = DimKey::FileName(name.to_string());
        if let Some(id) = self.cached(&key) {
            return Ok(id);
        }
        let mut row = FileName::named(name);
        get_or_create(self.conn, &mut row, create)?;
        self.pending.insert(key, row.id);
        Ok(row.id)
    }

    pub fn owner_id(&mut self, name: &str, create: bool) -> Result<i64, IndexError> {
        let key = DimKey::Owner(name.to_string());
        if let Some(id) = self.cached(&key) {
            return Ok(id);
        }
        let mut row = Owner::named(name);
        get_or_create(self.conn, &mut row, create)?;
        self.pending.insert(key, row.id);
        Ok(row.id)
    }

    /// Walks the segment chain of `path` from the root, returning the leaf.
    pub fn path_item(&mut self, path: &str, create: bool) -> Result<PathItem, IndexError> {
        let mut item = PathItem::default();
        for name in split_path(path) {
            let parent_id = item.id;
            let key = DimKey::PathItem(parent_id, name.clone());
            item = match self.cached(&key) {
                Some(id) => PathItem {
                    id,
                    parent_id,
                    name,
                },
                None => {
                    let mut row = PathItem::child_of(parent_id, name);
                    get_or_create(self.conn, &mut row, create)?;
                    self.pending.insert(key, row.id);
                    row
                }
            };
        }
        Ok(item)
    }

    pub fn path_item_id(&mut self, path: &str, create: bool) -> Result<i64, IndexError> {
        self.path_item(path, create).map(|item| item.id)
    }
}
