//! Row-level persistence shared by every stored entity.
//!
//! Each entity supplies its own SQL, bind values and row scan; the generic
//! `load`, `insert`, `update`, `get_or_create` and `save` are written once
//! against those capabilities. All of them take a plain `&Connection`, so a
//! `rusqlite::Transaction` can be passed through deref.

use rusqlite::{Connection, Row, ToSql};

use super::error::IndexError;

pub trait Identified {
    /// Row id, `0` until the entity has been inserted.
    fn id(&self) -> i64;
    fn set_id(&mut self, id: i64);
}

pub trait Selectable {
    fn select_sql(&self) -> &'static str;
    fn select_params(&self) -> Vec<&dyn ToSql>;
    fn scan(&mut self, row: &Row<'_>) -> rusqlite::Result<()>;
}

pub trait Insertable: Identified {
    fn insert_sql(&self) -> &'static str;
    fn insert_params(&self) -> Vec<&dyn ToSql>;
}

pub trait Updateable: Identified {
    /// The last bind parameter is the row id.
    fn update_sql(&self) -> &'static str;
    fn update_params(&self) -> Vec<&dyn ToSql>;
}

/// Fills `entity` from the first row its select returns.
pub fn load<T: Selectable>(conn: &Connection, entity: &mut T) -> Result<(), IndexError> {
    let mut stmt = conn.prepare_cached(entity.select_sql())?;
    let mut rows = stmt.query(entity.select_params().as_slice())?;
    match rows.next()? {
        Some(row) => {
            entity.scan(row)?;
            Ok(())
        }
        None => Err(IndexError::NotFound),
    }
}

pub fn insert<T: Insertable>(conn: &Connection, entity: &mut T) -> Result<i64, IndexError> {
    let mut stmt = conn.prepare_cached(entity.insert_sql())?;
    stmt.execute(entity.insert_params().as_slice())?;
    let id = conn.last_insert_rowid();
    entity.set_id(id);
    Ok(id)
}

pub fn update<T: Updateable>(conn: &Connection, entity: &T) -> Result<(), IndexError> {
    let mut stmt = conn.prepare_cached(entity.update_sql())?;
    let changed = stmt.execute(entity.update_params().as_slice())?;
    if changed == 0 {
        return Err(IndexError::NotFound);
    }
    Ok(())
}

/// `load`, falling back to `insert` when nothing matched and `create` is set.
pub fn get_or_create<T>(conn: &Connection, entity: &mut T, create: bool) -> Result<(), IndexError>
where
    T: Selectable + Insertable,
{
    match load(conn, entity) {
        Err(IndexError::NotFound) if create => insert(conn, entity).map(|_| ()),
        other => other,
    }
}

/// Inserts entities without an id, updates the rest.
pub fn save<T>(conn: &Connection, entity: &mut T) -> Result<(), IndexError>
where
    T: Insertable + Updateable,
{
    if entity.id() == 0 {
        insert(conn, entity).map(|_| ())
    } else {
        update(conn, entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::entity::{FileName, PathItem};
    use crate::database::schema::SCHEMA;
    use anyhow::Result;

    fn conn() -> Result<Connection> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(conn)
    }

    #[test]
    fn test_get_or_create() -> Result<()> {
        let conn = conn()?;

        let mut missing = FileName::named("a.txt");
        assert!(matches!(
            get_or_create(&conn, &mut missing, false),
            Err(IndexError::NotFound)
        ));

        let mut created = FileName::named("a.txt");
        get_or_create(&conn, &mut created, true)?;
        assert!(created.id > 0);

        let mut again = FileName::named("a.txt");
        get_or_create(&conn, &mut again, false)?;
        assert_eq!(again.id, created.id);
        Ok(())
    }

    #[test]
    fn test_save_inserts_then_updates() -> Result<()> {
        let conn = conn()?;
        let mut item = PathItem::child_of(0, "docs");
        save(&conn, &mut item)?;
        let id = item.id;
        assert!(id > 0);

        item.name = "documents".to_string();
        save(&conn, &mut item)?;
        assert_eq!(item.id, id);

        let mut reloaded = PathItem::child_of(0, "documents");
        load(&conn, &mut reloaded)?;
        assert_eq!(reloaded.id, id);

        let mut ghost = PathItem::child_of(0, "ghost");
        ghost.id = 999;
        assert!(matches!(update(&conn, &ghost), Err(IndexError::NotFound)));
        Ok(())
    }
}
