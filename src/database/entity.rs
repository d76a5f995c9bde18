use chrono::{DateTime, Utc};
use rusqlite::{Row, ToSql};
use serde::Serialize;

use super::persist::{Identified, Insertable, Selectable, Updateable};

/// Name-keyed lookup tables share one shape: `{id, name}`, unique by name.
macro_rules! name_dimension {
    ($(#[$meta:meta])* $entity:ident, $table:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
        pub struct $entity {
            pub id: i64,
            pub name: String,
        }

        impl $entity {
            pub fn named(name: impl Into<String>) -> Self {
                Self {
                    id: 0,
                    name: name.into(),
                }
            }
        }

        impl Identified for $entity {
            fn id(&self) -> i64 {
                self.id
            }

            fn set_id(&mut self, id: i64) {
                self.id = id;
            }
        }

        impl Selectable for $entity {
            fn select_sql(&self) -> &'static str {
                concat!("SELECT id, name FROM ", $table, " WHERE name = ?1")
            }

            fn select_params(&self) -> Vec<&dyn ToSql> {
                vec![&self.name as &dyn ToSql]
            }

            fn scan(&mut self, row: &Row<'_>) -> rusqlite::Result<()> {
                self.id = row.get(0)?;
                self.name = row.get(1)?;
                Ok(())
            }
        }

        impl Insertable for $entity {
            fn insert_sql(&self) -> &'static str {
                concat!("INSERT INTO ", $table, " (name) VALUES (?1)")
            }

            fn insert_params(&self) -> Vec<&dyn ToSql> {
                vec![&self.name as &dyn ToSql]
            }
        }

        impl Updateable for $entity {
            fn update_sql(&self) -> &'static str {
                concat!("UPDATE ", $table, " SET name = ?1 WHERE id = ?2")
            }

            fn update_params(&self) -> Vec<&dyn ToSql> {
                vec![&self.name as &dyn ToSql, &self.id as &dyn ToSql]
            }
        }
    };
}

name_dimension!(
    /// Normalized media type name such as `image/jpeg`.
    MediaType,
    "media_type"
);
name_dimension!(FileName, "file_name");
name_dimension!(Owner, "owner");

/// One directory component; `parent_id == 0` marks a top-level segment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PathItem {
    pub id: i64,
    pub parent_id: i64,
    pub name: String,
}

impl PathItem {
    pub fn child_of(parent_id: i64, name: impl Into<String>) -> Self {
        Self {
            id: 0,
            parent_id,
            name: name.into(),
        }
    }

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            parent_id: row.get(1)?,
            name: row.get(2)?,
        })
    }
}

impl Identified for PathItem {
    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }
}

impl Selectable for PathItem {
    fn select_sql(&self) -> &'static str {
        "SELECT id, parent_id, name FROM path_item WHERE parent_id = ?1 AND name = ?2"
    }

    fn select_params(&self) -> Vec<&dyn ToSql> {
        vec![&self.parent_id as &dyn ToSql, &self.name as &dyn ToSql]
    }

    fn scan(&mut self, row: &Row<'_>) -> rusqlite::Result<()> {
        *self = Self::from_row(row)?;
        Ok(())
    }
}

impl Insertable for PathItem {
    fn insert_sql(&self) -> &'static str {
        "INSERT INTO path_item (parent_id, name) VALUES (?1, ?2)"
    }

    fn insert_params(&self) -> Vec<&dyn ToSql> {
        vec![&self.parent_id as &dyn ToSql, &self.name as &dyn ToSql]
    }
}

impl Updateable for PathItem {
    fn update_sql(&self) -> &'static str {
        "UPDATE path_item SET parent_id = ?1, name = ?2 WHERE id = ?3"
    }

    fn update_params(&self) -> Vec<&dyn ToSql> {
        vec![
            &self.parent_id as &dyn ToSql,
            &self.name as &dyn ToSql,
            &self.id as &dyn ToSql,
        ]
    }
}

/// One row per distinct content hash.
///
/// `latest_file_time` and `latest_name_id` mirror the newest origin seen at
/// the last registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Asset {
    pub id: i64,
    pub hash: String,
    pub media_type_id: i64,
    pub latest_file_time: Option<DateTime<Utc>>,
    pub latest_name_id: i64,
}

impl Asset {
    pub fn with_hash(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            ..Self::default()
        }
    }
}

impl Identified for Asset {
    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }
}

impl Selectable for Asset {
    fn select_sql(&self) -> &'static str {
        "SELECT id, hash, media_type_id, latest_file_time, latest_name_id FROM asset WHERE hash = ?1"
    }

    fn select_params(&self) -> Vec<&dyn ToSql> {
        vec![&self.hash as &dyn ToSql]
    }

    fn scan(&mut self, row: &Row<'_>) -> rusqlite::Result<()> {
        self.id = row.get(0)?;
        self.hash = row.get(1)?;
        self.media_type_id = row.get(2)?;
        self.latest_file_time = row.get(3)?;
        self.latest_name_id = row.get(4)?;
        Ok(())
    }
}

impl Insertable for Asset {
    fn insert_sql(&self) -> &'static str {
        "INSERT INTO asset (hash, media_type_id, latest_file_time, latest_name_id) VALUES (?1, ?2, ?3, ?4)"
    }

    fn insert_params(&self) -> Vec<&dyn ToSql> {
        vec![
            &self.hash as &dyn ToSql,
            &self.media_type_id as &dyn ToSql,
            &self.latest_file_time as &dyn ToSql,
            &self.latest_name_id as &dyn ToSql,
        ]
    }
}

impl Updateable for Asset {
    fn update_sql(&self) -> &'static str {
        "UPDATE asset SET hash = ?1, media_type_id = ?2, latest_file_time = ?3, latest_name_id = ?4 WHERE id = ?5"
    }

    fn update_params(&self) -> Vec<&dyn ToSql> {
        vec![
            &self.hash as &dyn ToSql,
            &self.media_type_id as &dyn ToSql,
            &self.latest_file_time as &dyn ToSql,
            &self.latest_name_id as &dyn ToSql,
            &self.id as &dyn ToSql,
        ]
    }
}

/// A sighting of an asset under some name, path and owner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Origin {
    pub id: i64,
    pub asset_id: i64,
    pub name_id: i64,
    pub path_id: i64,
    pub owner_id: i64,
    pub file_time: DateTime<Utc>,
}

impl Identified for Origin {
    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }
}

impl Insertable for Origin {
    fn insert_sql(&self) -> &'static str {
        "INSERT INTO origin (asset_id, name_id, path_id, owner_id, file_time) VALUES (?1, ?2, ?3, ?4, ?5)"
    }

    fn insert_params(&self) -> Vec<&dyn ToSql> {
        vec![
            &self.asset_id as &dyn ToSql,
            &self.name_id as &dyn ToSql,
            &self.path_id as &dyn ToSql,
            &self.owner_id as &dyn ToSql,
            &self.file_time as &dyn ToSql,
        ]
    }
}

/// Edge between two detected faces. Stored directed, queried both ways.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaceSimilarity {
    pub id: i64,
    pub asset_a_id: i64,
    pub face_a: i64,
    pub asset_b_id: i64,
    pub face_b: i64,
}

impl Identified for FaceSimilarity {
    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }
}

impl Insertable for FaceSimilarity {
    fn insert_sql(&self) -> &'static str {
        "INSERT INTO face_similarity (asset_a_id, face_a, asset_b_id, face_b) VALUES (?1, ?2, ?3, ?4)"
    }

    fn insert_params(&self) -> Vec<&dyn ToSql> {
        vec![
            &self.asset_a_id as &dyn ToSql,
            &self.face_a as &dyn ToSql,
            &self.asset_b_id as &dyn ToSql,
            &self.face_b as &dyn ToSql,
        ]
    }
}

/// A named, content-addressed set of assets. Only the header lives in the
/// index; `created` is fixed by the first save.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Collection {
    pub id: i64,
    pub hash: String,
    pub name: String,
    pub created: DateTime<Utc>,
}

impl Collection {
    pub fn with_hash(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            ..Self::default()
        }
    }

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let mut collection = Self::default();
        collection.scan(row)?;
        Ok(collection)
    }
}

impl Identified for Collection {
    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }
}

impl Selectable for Collection {
    fn select_sql(&self) -> &'static str {
        "SELECT id, hash, name, created FROM collection WHERE hash = ?1"
    }

    fn select_params(&self) -> Vec<&dyn ToSql> {
        vec![&self.hash as &dyn ToSql]
    }

    fn scan(&mut self, row: &Row<'_>) -> rusqlite::Result<()> {
        self.id = row.get(0)?;
        self.hash = row.get(1)?;
        self.name = row.get(2)?;
        self.created = row.get(3)?;
        Ok(())
    }
}

impl Insertable for Collection {
    fn insert_sql(&self) -> &'static str {
        "INSERT INTO collection (hash, name, created) VALUES (?1, ?2, ?3)"
    }

    fn insert_params(&self) -> Vec<&dyn ToSql> {
        vec![
            &self.hash as &dyn ToSql,
            &self.name as &dyn ToSql,
            &self.created as &dyn ToSql,
        ]
    }
}

impl Updateable for Collection {
    fn update_sql(&self) -> &'static str {
        "UPDATE collection SET hash = ?1, name = ?2, created = ?3 WHERE id = ?4"
    }

    fn update_params(&self) -> Vec<&dyn ToSql> {
        vec![
            &self.hash as &dyn ToSql,
            &self.name as &dyn ToSql,
            &self.created as &dyn ToSql,
            &self.id as &dyn ToSql,
        ]
    }
}
