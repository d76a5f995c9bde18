use chrono::{DateTime, Utc};
use rusqlite::{Connection, ToSql};
use tracing::debug;

use super::error::IndexError;
use super::scored::ScoredIdMap;

const FILE_NAME_QUERY: &str = "SELECT o.asset_id, f.name FROM origin o \
     INNER JOIN file_name f ON f.id = o.name_id \
     WHERE f.name LIKE ?1";

const PATH_NAME_QUERY: &str = "SELECT o.asset_id, p.name FROM origin o \
     INNER JOIN path_item p ON p.id = o.path_id \
     WHERE p.name LIKE ?1";

const PATH_ID_QUERY: &str = "SELECT a.id, a.latest_file_time FROM origin o \
     INNER JOIN asset a ON a.id = o.asset_id \
     WHERE o.path_id = ?1";

const MEDIA_TYPE_BY_ID_QUERY: &str = "SELECT a.id, a.latest_file_time FROM asset a \
     WHERE a.media_type_id = ?1";

const MEDIA_TYPE_BY_NAME_QUERY: &str = "SELECT a.id, a.latest_file_time FROM asset a \
     INNER JOIN media_type m ON m.id = a.media_type_id \
     WHERE m.name LIKE ?1";

const FACE_QUERY: &str = "SELECT a.id FROM asset a WHERE a.hash = ?1 \
     UNION ALL \
     SELECT f.asset_b_id FROM face_similarity f \
     INNER JOIN asset a ON a.id = f.asset_a_id \
     WHERE a.hash = ?1 AND f.face_a = ?2 \
     UNION ALL \
     SELECT f.asset_a_id FROM face_similarity f \
     INNER JOIN asset a ON a.id = f.asset_b_id \
     WHERE a.hash = ?1 AND f.face_b = ?2";

/// One search criterion.
///
/// An unset value (`0` id, empty string) makes the finder inactive: `find`
/// returns `None` and the criterion takes no part in the intersection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finder<'a> {
    PathId(i64),
    /// Numeric id, or a name pattern where `*` is a wildcard.
    MediaType(&'a str),
    FileName(&'a str),
    PathName(&'a str),
    /// `<hash>/<face index>`
    Face(&'a str),
}

impl Finder<'_> {
    pub fn label(&self) -> &'static str {
        match self {
            Finder::PathId(_) => "path_id",
            Finder::MediaType(_) => "media_type",
            Finder::FileName(_) => "file_name",
            Finder::PathName(_) => "path_name",
            Finder::Face(_) => "face",
        }
    }

    pub fn is_active(&self) -> bool {
        match *self {
            Finder::PathId(id) => id != 0,
            Finder::MediaType(v) | Finder::FileName(v) | Finder::PathName(v) | Finder::Face(v) => {
                !v.is_empty()
            }
        }
    }

    pub fn find(&self, conn: &Connection) -> Result<Option<ScoredIdMap>, IndexError> {
        if !self.is_active() {
            return Ok(None);
        }
        let found = match *self {
            Finder::PathId(id) => by_recency(conn, PATH_ID_QUERY, &id)?,
            Finder::MediaType(value) => match value.trim().parse::<i64>() {
                Ok(id) => by_recency(conn, MEDIA_TYPE_BY_ID_QUERY, &id)?,
                Err(_) => by_recency(conn, MEDIA_TYPE_BY_NAME_QUERY, &value.replace('*', "%"))?,
            },
            Finder::FileName(value) => by_name_similarity(conn, FILE_NAME_QUERY, value)?,
            Finder::PathName(value) => by_name_similarity(conn, PATH_NAME_QUERY, value)?,
            Finder::Face(value) => by_face(conn, value)?,
        };
        debug!(finder = self.label(), hits = found.len(), "finder evaluated");
        Ok(Some(found))
    }
}

/// Translates user input into a `LIKE` pattern.
///
/// An explicit `*` is honoured as the only wildcard; otherwise the value
/// matches anywhere and spaces match any run of characters.
pub fn like_pattern(value: &str) -> String {
    if value.contains('*') {
        value.replace('*', "%")
    } else {
        format!("%{}%", value.replace(' ', "%"))
    }
}

/// Newer content ranks higher.
fn recency_score(file_time: Option<DateTime<Utc>>) -> f64 {
    file_time.map_or(0.0, |t| t.timestamp() as f64 / 1000.0)
}

fn by_recency(conn: &Connection, sql: &str, param: &dyn ToSql) -> Result<ScoredIdMap, IndexError> {
    let mut stmt = conn.prepare_cached(sql)?;
    let mut rows = stmt.query([param])?;
    let mut ids = ScoredIdMap::new();
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let file_time: Option<DateTime<Utc>> = row.get(1)?;
        ids.set(id, recency_score(file_time));
    }
    Ok(ids)
}

/// Scores each hit by `query length / matched length`, summed per asset.
fn by_name_similarity(conn: &Connection, sql: &str, value: &str) -> Result<ScoredIdMap, IndexError> {
    let pattern = like_pattern(value);
    let mut stmt = conn.prepare_cached(sql)?;
    let mut rows = stmt.query([&pattern])?;
    let mut ids = ScoredIdMap::new();
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let matched: String = row.get(1)?;
        ids.add(id, value.len() as f64 / matched.len().max(1) as f64);
    }
    Ok(ids)
}

/// The asset itself plus every asset linked to the face, in either direction.
fn by_face(conn: &Connection, value: &str) -> Result<ScoredIdMap, IndexError> {
    let invalid = || IndexError::InvalidFaceQuery(value.to_string());
    let (hash, index) = value.split_once('/').ok_or_else(invalid)?;
    let index: i64 = index.trim().parse().map_err(|_| invalid())?;

    let mut stmt = conn.prepare_cached(FACE_QUERY)?;
    let mut rows = stmt.query(rusqlite::params![hash, index])?;
    let mut ids = ScoredIdMap::new();
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        ids.add(id, 1.0);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern() {
        assert_eq!(like_pattern("report"), "%report%");
        assert_eq!(like_pattern("annual report"), "%annual%report%");
        assert_eq!(like_pattern("IMG_*.jpg"), "IMG_%.jpg");
        assert_eq!(like_pattern("a *"), "a %");
    }

    #[test]
    fn test_inactive_values() {
        assert!(!Finder::PathId(0).is_active());
        assert!(!Finder::FileName("").is_active());
        assert!(Finder::Face("ab/1").is_active());
        assert!(Finder::MediaType("image/*").is_active());
    }

    #[test]
    fn test_recency_score_is_monotonic() {
        let older = DateTime::from_timestamp(1_600_000_000, 0);
        let newer = DateTime::from_timestamp(1_700_000_000, 0);
        assert!(recency_score(newer) > recency_score(older));
        assert_eq!(recency_score(None), 0.0);
    }
}
