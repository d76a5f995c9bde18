use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::IndexError;
use super::finder::Finder;
use super::repo::MetadataIndex;
use super::scored::ScoredIdMap;

const LIST_COLUMNS: &str = "SELECT a.id, a.hash, m.name, f.name, a.latest_file_time FROM asset a \
     INNER JOIN media_type m ON m.id = a.media_type_id \
     LEFT JOIN file_name f ON f.id = a.latest_name_id";

/// Search criteria plus the page to return. Unset criteria are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetFilter {
    pub path_id: i64,
    pub media_type: String,
    pub file_name: String,
    pub path_name: String,
    pub face: String,
    pub offset: usize,
    pub count: usize,
}

impl AssetFilter {
    /// Finders in evaluation order. Scores of the surviving ids come from the
    /// first active one.
    pub fn finders(&self) -> [Finder<'_>; 5] {
        [
            Finder::PathId(self.path_id),
            Finder::MediaType(&self.media_type),
            Finder::FileName(&self.file_name),
            Finder::PathName(&self.path_name),
            Finder::Face(&self.face),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetListItem {
    pub id: i64,
    pub hash: String,
    pub media_type: String,
    /// Name of the newest origin.
    pub name: Option<String>,
    pub file_time: Option<DateTime<Utc>>,
}

impl AssetListItem {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            hash: row.get(1)?,
            media_type: row.get(2)?,
            name: row.get(3)?,
            file_time: row.get(4)?,
        })
    }
}

impl MetadataIndex {
    /// Ranked, paged search.
    ///
    /// Every active finder must match an asset for it to be returned. With no
    /// active finder the page is taken from all assets, newest first.
    pub fn search(&self, filter: &AssetFilter) -> Result<Vec<AssetListItem>, IndexError> {
        let conn = self.lock();

        let mut merged: Option<ScoredIdMap> = None;
        for finder in filter.finders() {
            let Some(found) = finder.find(&conn)? else {
                continue;
            };
            merged = Some(match merged {
                None => found,
                Some(mut ids) => {
                    ids.retain_common(&found);
                    ids
                }
            });
        }

        let Some(ids) = merged else {
            return page_all(&conn, filter.offset, filter.count);
        };
        let page: Vec<i64> = ids
            .ranked()
            .into_iter()
            .skip(filter.offset)
            .take(filter.count)
            .map(|scored| scored.id)
            .collect();
        debug!(matched = ids.len(), page = page.len(), "search ranked");
        hydrate(&conn, &page)
    }

    pub fn find_asset(&self, hash: &str) -> Result<Option<AssetListItem>, IndexError> {
        let conn = self.lock();
        let sql = format!("{LIST_COLUMNS} WHERE a.hash = ?1");
        let item = conn
            .prepare_cached(&sql)?
            .query_row([hash], AssetListItem::from_row)
            .optional()?;
        Ok(item)
    }
}

fn page_all(conn: &Connection, offset: usize, count: usize) -> Result<Vec<AssetListItem>, IndexError> {
    let sql = format!("{LIST_COLUMNS} ORDER BY a.latest_file_time DESC, a.hash ASC LIMIT ?1 OFFSET ?2");
    let mut stmt = conn.prepare_cached(&sql)?;
    let items = stmt
        .query_map([count as i64, offset as i64], AssetListItem::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(items)
}

/// Bound parameters per statement, SQLite's default `SQLITE_MAX_VARIABLE_NUMBER`.
const MAX_BIND_VARIABLES: usize = 32766;

/// Loads the rows for `ids` and returns them in the order of `ids`.
fn hydrate(conn: &Connection, ids: &[i64]) -> Result<Vec<AssetListItem>, IndexError> {
    hydrate_chunked(conn, ids, MAX_BIND_VARIABLES)
}

fn hydrate_chunked(conn: &Connection, ids: &[i64], chunk_size: usize) -> Result<Vec<AssetListItem>, IndexError> {
    let mut by_id: HashMap<i64, AssetListItem> = HashMap::with_capacity(ids.len());
    for chunk in ids.chunks(chunk_size.max(1)) {
        let placeholders = vec!["?"; chunk.len()].join(",");
        let sql = format!("{LIST_COLUMNS} WHERE a.id IN ({placeholders})");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(chunk), AssetListItem::from_row)?;
        for item in rows {
            let item = item?;
            by_id.insert(item.id, item);
        }
    }

    Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repo::OriginInfo;
    use crate::storage::transform::TransformPipeline;
    use crate::storage::BlobStore;
    use anyhow::Result;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn register(index: &MetadataIndex, hash: &str, media_type: &str, name: &str, path: &str, secs: i64) -> Result<i64> {
        let origin = OriginInfo {
            name: name.to_string(),
            path: path.to_string(),
            owner: "u".to_string(),
            file_time: at(secs),
        };
        Ok(index.register(hash, media_type, &[origin])?)
    }

    fn hashes(items: &[AssetListItem]) -> Vec<&str> {
        items.iter().map(|i| i.hash.as_str()).collect()
    }

    fn filter() -> AssetFilter {
        AssetFilter {
            count: 10,
            ..AssetFilter::default()
        }
    }

    #[test]
    fn test_all_filters_must_match() -> Result<()> {
        let index = MetadataIndex::open_in_memory()?;
        register(&index, "aa", "application/pdf", "report.pdf", "/docs", 10)?;
        register(&index, "bb", "text/plain", "report.txt", "/docs", 20)?;
        register(&index, "cc", "application/pdf", "invoice.pdf", "/docs", 30)?;

        let found = index.search(&AssetFilter {
            file_name: "report".to_string(),
            media_type: "application/pdf".to_string(),
            ..filter()
        })?;
        assert_eq!(hashes(&found), vec!["aa"]);
        assert_eq!(found[0].media_type, "application/pdf");

        let none = index.search(&AssetFilter {
            file_name: "report".to_string(),
            media_type: "image/*".to_string(),
            ..filter()
        })?;
        assert!(none.is_empty());
        Ok(())
    }

    #[test]
    fn test_ranking_is_stable() -> Result<()> {
        let index = MetadataIndex::open_in_memory()?;
        for (i, hash) in ["a1", "a2", "a3", "a4", "a5"].iter().enumerate() {
            register(&index, hash, "image/jpeg", &format!("img{i}.jpg"), "/pics", 100)?;
        }
        register(&index, "b1", "image/jpeg", "newer.jpg", "/pics", 500)?;

        let query = AssetFilter {
            media_type: "image/*".to_string(),
            ..filter()
        };
        let first = index.search(&query)?;
        let second = index.search(&query)?;
        assert_eq!(first, second);
        // newest first, equal times by ascending id
        assert_eq!(hashes(&first), vec!["b1", "a1", "a2", "a3", "a4", "a5"]);

        let page = index.search(&AssetFilter {
            offset: 2,
            count: 2,
            ..query.clone()
        })?;
        assert_eq!(hashes(&page), vec!["a2", "a3"]);

        let past_end = index.search(&AssetFilter { offset: 50, ..query })?;
        assert!(past_end.is_empty());
        Ok(())
    }

    #[test]
    fn test_name_similarity_score() -> Result<()> {
        let index = MetadataIndex::open_in_memory()?;
        register(&index, "long", "text/plain", "notes-for-meeting.txt", "/n", 1)?;
        register(&index, "short", "text/plain", "notes.txt", "/n", 1)?;

        let found = index.search(&AssetFilter {
            file_name: "notes".to_string(),
            ..filter()
        })?;
        assert_eq!(hashes(&found), vec!["short", "long"]);

        let wildcard = index.search(&AssetFilter {
            file_name: "notes.*".to_string(),
            ..filter()
        })?;
        assert_eq!(hashes(&wildcard), vec!["short"]);
        Ok(())
    }

    #[test]
    fn test_path_filters() -> Result<()> {
        let index = MetadataIndex::open_in_memory()?;
        register(&index, "p1", "image/png", "a.png", "/photos/holiday", 1)?;
        register(&index, "p2", "image/png", "b.png", "/photos/work", 2)?;

        let holiday = index.get_path_item("/photos/holiday", false)?;
        let by_id = index.search(&AssetFilter {
            path_id: holiday.id,
            ..filter()
        })?;
        assert_eq!(hashes(&by_id), vec!["p1"]);

        let by_name = index.search(&AssetFilter {
            path_name: "work".to_string(),
            ..filter()
        })?;
        assert_eq!(hashes(&by_name), vec!["p2"]);
        Ok(())
    }

    #[test]
    fn test_face_filter() -> Result<()> {
        let index = MetadataIndex::open_in_memory()?;
        register(&index, "f1", "image/jpeg", "a.jpg", "/f", 1)?;
        register(&index, "f2", "image/jpeg", "b.jpg", "/f", 2)?;
        register(&index, "f3", "image/jpeg", "c.jpg", "/f", 3)?;
        index.record_face_similarity("f1", 0, "f2", 1)?;
        index.record_face_similarity("f3", 2, "f1", 0)?;
        index.record_face_similarity("f1", 1, "f3", 0)?;

        let found = index.search(&AssetFilter {
            face: "f1/0".to_string(),
            ..filter()
        })?;
        let mut found = hashes(&found);
        found.sort_unstable();
        assert_eq!(found, vec!["f1", "f2", "f3"]);

        assert!(matches!(
            index.search(&AssetFilter {
                face: "f1".to_string(),
                ..filter()
            }),
            Err(IndexError::InvalidFaceQuery(_))
        ));
        Ok(())
    }

    #[test]
    fn test_hydrate_keeps_rank_order_across_chunks() -> Result<()> {
        let index = MetadataIndex::open_in_memory()?;
        let ids: Vec<i64> = ["h1", "h2", "h3", "h4", "h5"]
            .iter()
            .map(|hash| register(&index, hash, "text/plain", "n.txt", "/h", 1))
            .collect::<Result<_>>()?;

        let wanted = vec![ids[4], ids[0], ids[3], ids[1], ids[2]];
        let conn = index.lock();
        let items = hydrate_chunked(&conn, &wanted, 2)?;
        assert_eq!(hashes(&items), vec!["h5", "h1", "h4", "h2", "h3"]);
        assert!(hydrate_chunked(&conn, &[], 2)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_page_larger_than_bind_limit() -> Result<()> {
        let index = MetadataIndex::open_in_memory()?;
        register(&index, "seed", "text/plain", "s.txt", "/", 1)?;
        index.lock().execute_batch(
            "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 40000) \
             INSERT INTO asset (hash, media_type_id) \
             SELECT printf('%064d', i), (SELECT id FROM media_type WHERE name = 'text/plain') FROM n;",
        )?;

        let found = index.search(&AssetFilter {
            media_type: "text/plain".to_string(),
            count: 50_000,
            ..AssetFilter::default()
        })?;
        assert_eq!(found.len(), 40_001);
        assert_eq!(found[0].hash, "seed");
        assert!(found[1..].windows(2).all(|w| w[0].id < w[1].id));
        Ok(())
    }

    #[test]
    fn test_stored_bytes_are_found_by_name() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = BlobStore::with_layout(
            dir.path().join("files"),
            dir.path().join("tmp"),
            1024,
            TransformPipeline::plain(),
        )?;
        let index = MetadataIndex::open_in_memory()?;

        let info = store.put(&b"0123456789"[..], Some(10))?;
        assert!(info.is_new);
        assert_eq!(info.size, 10);
        let origin = OriginInfo {
            name: "a.txt".to_string(),
            path: "/x".to_string(),
            owner: "u".to_string(),
            file_time: at(1_700_000_000),
        };
        let id = index.register(&info.hash, &info.media_type, &[origin])?;

        let found = index.search(&AssetFilter {
            file_name: "a.txt".to_string(),
            ..filter()
        })?;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id);
        assert_eq!(found[0].hash, info.hash);
        assert_eq!(found[0].name.as_deref(), Some("a.txt"));
        assert_eq!(store.read_all(&found[0].hash)?, b"0123456789");
        Ok(())
    }

    #[test]
    fn test_unfiltered_listing() -> Result<()> {
        let index = MetadataIndex::open_in_memory()?;
        register(&index, "old", "text/plain", "o.txt", "/", 10)?;
        register(&index, "new", "text/plain", "n.txt", "/", 20)?;
        register(&index, "mid", "text/plain", "m.txt", "/", 15)?;

        let all = index.search(&filter())?;
        assert_eq!(hashes(&all), vec!["new", "mid", "old"]);

        let second = index.search(&AssetFilter {
            offset: 1,
            count: 1,
            ..filter()
        })?;
        assert_eq!(hashes(&second), vec!["mid"]);
        Ok(())
    }
}
