use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::dimension::{DimensionCache, Session};
use super::entity::{Asset, Collection, FaceSimilarity, MediaType, Origin, PathItem};
use super::error::IndexError;
use super::persist::{insert, load, save};
use super::schema::SCHEMA;

/// Origin facts as supplied by an ingest caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OriginInfo {
    pub name: String,
    pub path: String,
    pub owner: String,
    pub file_time: DateTime<Utc>,
}

/// A stored origin with its path rebuilt from the segment chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OriginRecord {
    pub name: String,
    pub path: String,
    pub path_id: i64,
    pub owner: String,
    pub file_time: DateTime<Utc>,
}

impl From<&OriginRecord> for OriginInfo {
    fn from(record: &OriginRecord) -> Self {
        Self {
            name: record.name.clone(),
            path: record.path.clone(),
            owner: record.owner.clone(),
            file_time: record.file_time,
        }
    }
}

/// Relational metadata index over the stored blobs.
pub struct MetadataIndex {
    conn: Mutex<Connection>,
    cache: DimensionCache,
}

impl MetadataIndex {
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        info!("Opened metadata index at {:?}", path);
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, IndexError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, IndexError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            cache: DimensionCache::default(),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Runs `work` in one transaction. Dimension ids resolved by `work` are
    /// cached only once the commit succeeded.
    fn transaction<T, F>(&self, work: F) -> Result<T, IndexError>
    where
        F: FnOnce(&mut Session<'_>) -> Result<T, IndexError>,
    {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            e
        })?;

        let mut session = Session::new(&tx, &self.cache);
        let result = work(&mut session);
        let resolved = session.into_pending();

        match result {
            Ok(value) => {
                tx.commit().map_err(|e| {
                    error!("Failed to commit transaction: {}", e);
                    e
                })?;
                self.cache.publish(resolved);
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback() {
                    error!("Failed to roll back transaction: {}", rollback);
                }
                Err(e)
            }
        }
    }

    /// Links `hash` to its origins, replacing whatever origins it had.
    ///
    /// The asset is created on first sight. Its latest name and time follow
    /// the origin with the greatest `file_time`; with no origins supplied the
    /// previous values stay. Returns the asset id.
    pub fn register(&self, hash: &str, media_type: &str, origins: &[OriginInfo]) -> Result<i64, IndexError> {
        self.transaction(|session| {
            let conn = session.conn();

            let mut asset = Asset::with_hash(hash);
            match load(conn, &mut asset) {
                Ok(()) | Err(IndexError::NotFound) => {}
                Err(e) => return Err(e),
            }
            asset.media_type_id = session.media_type_id(media_type, true)?;

            let latest = origins.iter().fold(None::<&OriginInfo>, |latest, o| match latest {
                Some(l) if l.file_time >= o.file_time => Some(l),
                _ => Some(o),
            });
            if let Some(latest) = latest {
                asset.latest_file_time = Some(latest.file_time);
                asset.latest_name_id = session.file_name_id(&latest.name, true)?;
            }
            save(conn, &mut asset)?;

            let removed = conn
                .prepare_cached("DELETE FROM origin WHERE asset_id = ?1")?
                .execute([asset.id])?;

            let mut seen = HashSet::new();
            for info in origins {
                let mut origin = Origin {
                    id: 0,
                    asset_id: asset.id,
                    name_id: session.file_name_id(&info.name, true)?,
                    path_id: session.path_item_id(&info.path, true)?,
                    owner_id: session.owner_id(&info.owner, true)?,
                    file_time: info.file_time,
                };
                if seen.insert((origin.name_id, origin.path_id, origin.owner_id, origin.file_time)) {
                    insert(conn, &mut origin)?;
                }
            }
            debug!(hash, asset_id = asset.id, removed, origins = seen.len(), "registered");
            Ok(asset.id)
        })
    }

    /// Records that face `face_a` of `hash_a` resembles face `face_b` of
    /// `hash_b`. Unknown hashes are stored as asset id `0`.
    pub fn record_face_similarity(
        &self,
        hash_a: &str,
        face_a: i64,
        hash_b: &str,
        face_b: i64,
    ) -> Result<i64, IndexError> {
        self.transaction(|session| {
            let conn = session.conn();
            let mut edge = FaceSimilarity {
                id: 0,
                asset_a_id: asset_id(conn, hash_a)?,
                face_a,
                asset_b_id: asset_id(conn, hash_b)?,
                face_b,
            };
            insert(conn, &mut edge)
        })
    }

    /// Current origins of `hash`, oldest first.
    pub fn origins(&self, hash: &str) -> Result<Vec<OriginRecord>, IndexError> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT f.name, o.path_id, w.name, o.file_time FROM origin o \
             INNER JOIN asset a ON a.id = o.asset_id \
             INNER JOIN file_name f ON f.id = o.name_id \
             INNER JOIN owner w ON w.id = o.owner_id \
             WHERE a.hash = ?1 \
             ORDER BY o.file_time, o.id",
        )?;
        let rows = stmt.query_map([hash], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, DateTime<Utc>>(3)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (name, path_id, owner, file_time) = row?;
            records.push(OriginRecord {
                name,
                path: path_of(&conn, path_id)?,
                path_id,
                owner,
                file_time,
            });
        }
        Ok(records)
    }

    /// Resolves a raw path to its leaf segment, creating missing segments
    /// when `create` is set.
    pub fn get_path_item(&self, path: &str, create: bool) -> Result<PathItem, IndexError> {
        self.transaction(|session| session.path_item(path, create))
    }

    /// Direct children of `parent_id` (`0` for the top level), by name.
    pub fn list_path_items(&self, parent_id: i64) -> Result<Vec<PathItem>, IndexError> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, parent_id, name FROM path_item \
             WHERE parent_id = ?1 ORDER BY name, id LIMIT 9999",
        )?;
        let items = stmt
            .query_map([parent_id], PathItem::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub fn list_media_types(&self) -> Result<Vec<MediaType>, IndexError> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached("SELECT id, name FROM media_type ORDER BY name, id")?;
        let items = stmt
            .query_map([], |row| {
                Ok(MediaType {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// Adds or renames the collection `hash`. `created` only applies to a
    /// collection not seen before.
    pub fn add_collection(&self, hash: &str, name: &str, created: DateTime<Utc>) -> Result<Collection, IndexError> {
        self.transaction(|session| {
            let conn = session.conn();
            let mut collection = Collection::with_hash(hash);
            match load(conn, &mut collection) {
                Ok(()) => {}
                Err(IndexError::NotFound) => collection.created = created,
                Err(e) => return Err(e),
            }
            collection.name = name.to_string();
            save(conn, &mut collection)?;
            Ok(collection)
        })
    }

    /// Collections, newest first.
    pub fn list_collections(&self, offset: usize, count: usize) -> Result<Vec<Collection>, IndexError> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, hash, name, created FROM collection \
             ORDER BY created DESC, id DESC LIMIT ?1 OFFSET ?2",
        )?;
        let items = stmt
            .query_map([count as i64, offset as i64], Collection::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub fn cached_dimensions(&self) -> usize {
        self.cache.len()
    }
}

fn asset_id(conn: &Connection, hash: &str) -> Result<i64, IndexError> {
    let id = conn
        .prepare_cached("SELECT id FROM asset WHERE hash = ?1")?
        .query_row([hash], |row| row.get(0))
        .optional()?;
    Ok(id.unwrap_or(0))
}

/// Rebuilds a `/`-joined path by following parent links up to the root.
pub(crate) fn path_of(conn: &Connection, path_id: i64) -> Result<String, IndexError> {
    let mut stmt = conn.prepare_cached("SELECT parent_id, name FROM path_item WHERE id = ?1")?;
    let mut segments = Vec::new();
    let mut visited = HashSet::new();
    let mut current = path_id;
    while current != 0 && visited.insert(current) {
        let (parent, name): (i64, String) = stmt
            .query_row(params![current], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?
            .ok_or(IndexError::NotFound)?;
        segments.push(name);
        current = parent;
    }
    segments.reverse();
    Ok(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use chrono::TimeZone;

    fn origin(name: &str, path: &str, owner: &str, secs: i64) -> OriginInfo {
        OriginInfo {
            name: name.to_string(),
            path: path.to_string(),
            owner: owner.to_string(),
            file_time: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_register_replaces_origins() -> Result<()> {
        let index = MetadataIndex::open_in_memory()?;
        let hash = "ab".repeat(32);

        let first = index.register(&hash, "text/plain", &[origin("a.txt", "/in/a", "alice", 100)])?;
        let second = index.register(&hash, "text/plain", &[origin("b.txt", "/in/b", "bob", 50)])?;
        assert_eq!(first, second);

        let origins = index.origins(&hash)?;
        assert_eq!(origins.len(), 1);
        assert_eq!(origins[0].name, "b.txt");
        assert_eq!(origins[0].path, "in/b");
        assert_eq!(origins[0].owner, "bob");

        // latest name follows the replaced set
        let item = index.find_asset(&hash)?.unwrap();
        assert_eq!(item.name.as_deref(), Some("b.txt"));
        assert_eq!(item.file_time, Some(Utc.timestamp_opt(50, 0).unwrap()));
        Ok(())
    }

    #[test]
    fn test_register_picks_latest_and_dedups() -> Result<()> {
        let index = MetadataIndex::open_in_memory()?;
        let hash = "cd".repeat(32);
        let dup = origin("old.jpg", "/pics", "u", 10);
        index.register(
            &hash,
            "image/jpeg",
            &[dup.clone(), origin("new.jpg", "/pics/2024", "u", 20), dup],
        )?;

        let origins = index.origins(&hash)?;
        assert_eq!(origins.len(), 2);
        assert_eq!(origins[0].name, "old.jpg");
        assert_eq!(origins[1].path, "pics/2024");
        assert_eq!(index.find_asset(&hash)?.unwrap().name.as_deref(), Some("new.jpg"));

        // union round trip keeps the same path rows
        let union: Vec<OriginInfo> = origins.iter().map(OriginInfo::from).collect();
        index.register(&hash, "image/jpeg", &union)?;
        let again = index.origins(&hash)?;
        assert_eq!(again, origins);
        Ok(())
    }

    #[test]
    fn test_cache_filled_after_commit_only() -> Result<()> {
        let index = MetadataIndex::open_in_memory()?;
        assert_eq!(index.cached_dimensions(), 0);
        assert!(matches!(
            index.get_path_item("/nowhere", false),
            Err(IndexError::NotFound)
        ));
        assert_eq!(index.cached_dimensions(), 0);

        index.register(&"ef".repeat(32), "text/plain", &[origin("x", "/a/b", "o", 1)])?;
        // media type, file name, owner, two path segments
        assert_eq!(index.cached_dimensions(), 5);
        Ok(())
    }

    fn count_rows(index: &MetadataIndex, table: &str) -> Result<i64> {
        let conn = index.lock();
        Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?)
    }

    #[test]
    fn test_failed_register_rolls_back() -> Result<()> {
        let index = MetadataIndex::open_in_memory()?;
        index.lock().execute_batch(
            "CREATE TRIGGER reject_origin BEFORE INSERT ON origin \
             BEGIN SELECT RAISE(ABORT, 'origin rejected'); END;",
        )?;

        let result = index.register(&"fa".repeat(32), "text/plain", &[origin("x.txt", "/a", "o", 1)]);
        assert!(matches!(result, Err(IndexError::Sqlite(_))));
        assert_eq!(count_rows(&index, "asset")?, 0);
        assert_eq!(count_rows(&index, "file_name")?, 0);
        assert_eq!(count_rows(&index, "media_type")?, 0);
        assert_eq!(index.cached_dimensions(), 0);

        // the index stays usable once the cause is gone
        index.lock().execute_batch("DROP TRIGGER reject_origin;")?;
        index.register(&"fa".repeat(32), "text/plain", &[origin("x.txt", "/a", "o", 1)])?;
        assert_eq!(count_rows(&index, "asset")?, 1);
        assert_eq!(index.cached_dimensions(), 4);
        Ok(())
    }

    #[test]
    fn test_collections_upsert_and_page() -> Result<()> {
        let index = MetadataIndex::open_in_memory()?;
        let at = |secs| Utc.timestamp_opt(secs, 0).unwrap();

        let first = index.add_collection("c1", "holiday", at(100))?;
        index.add_collection("c2", "work", at(300))?;
        index.add_collection("c3", "misc", at(200))?;

        // same hash renames in place and keeps its creation time
        let renamed = index.add_collection("c1", "summer holiday", at(999))?;
        assert_eq!(renamed.id, first.id);
        assert_eq!(renamed.created, at(100));

        let all: Vec<_> = index
            .list_collections(0, 10)?
            .into_iter()
            .map(|c| (c.hash, c.name))
            .collect();
        assert_eq!(
            all,
            vec![
                ("c2".to_string(), "work".to_string()),
                ("c3".to_string(), "misc".to_string()),
                ("c1".to_string(), "summer holiday".to_string()),
            ]
        );

        let page = index.list_collections(1, 1)?;
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].hash, "c3");
        assert!(index.list_collections(5, 10)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_face_similarity_edges() -> Result<()> {
        let index = MetadataIndex::open_in_memory()?;
        let a = "aa".repeat(32);
        let b = "bb".repeat(32);
        let a_id = index.register(&a, "image/jpeg", &[origin("a.jpg", "/f", "u", 1)])?;
        let b_id = index.register(&b, "image/jpeg", &[origin("b.jpg", "/f", "u", 2)])?;

        index.record_face_similarity(&a, 0, &b, 3)?;
        index.record_face_similarity(&a, 1, &"00".repeat(32), 0)?;

        let conn = index.lock();
        let edges: Vec<(i64, i64, i64, i64)> = conn
            .prepare("SELECT asset_a_id, face_a, asset_b_id, face_b FROM face_similarity ORDER BY id")?
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))?
            .collect::<Result<_, _>>()?;
        assert_eq!(edges, vec![(a_id, 0, b_id, 3), (a_id, 1, 0, 0)]);
        Ok(())
    }

    #[test]
    fn test_listings() -> Result<()> {
        let index = MetadataIndex::open_in_memory()?;
        index.register(&"01".repeat(32), "image/png", &[origin("p.png", "/root/zeta", "u", 1)])?;
        index.register(&"02".repeat(32), "application/pdf", &[origin("d.pdf", "/root/alpha", "u", 2)])?;

        let root = index.get_path_item("/root", false)?;
        let names: Vec<_> = index
            .list_path_items(root.id)?
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(index.list_path_items(0)?.len(), 1);

        let types: Vec<_> = index.list_media_types()?.into_iter().map(|m| m.name).collect();
        assert_eq!(types, vec!["application/pdf", "image/png"]);
        Ok(())
    }
}
