use anyhow::{Context, Result};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;

use super::{schema, Catalog, CatalogItem, COMPLETION_THRESHOLD};
use crate::store::ItemId;

/// Catalog backed by the application's SQLite database.
pub struct SqliteCatalog {
    conn: Connection,
}

impl SqliteCatalog {
    /// Open an existing database read-only.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("opening catalog database at {}", db_path.display()))?;
        Ok(Self { conn })
    }

    /// Open for writing, creating the file and tables if needed.
    pub fn create(db_path: &Path) -> Result<Self> {
        if let Some(dir) = db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating catalog dir {}", dir.display()))?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("opening catalog database at {}", db_path.display()))?;
        schema::create_tables(&conn)?;
        Ok(Self { conn })
    }

    pub fn item_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM course", [], |r| r.get(0))?)
    }
}

impl Catalog for SqliteCatalog {
    fn all_ids(&self) -> Result<HashSet<ItemId>> {
        let mut stmt = self.conn.prepare("SELECT id FROM course")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, ItemId>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(ids)
    }

    fn completed_ids(&self, learner_id: i64) -> Result<HashSet<ItemId>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT course_id FROM progress
             WHERE student_id = ?1 AND percent_complete >= ?2",
        )?;
        let ids = stmt
            .query_map(params![learner_id, COMPLETION_THRESHOLD], |row| {
                row.get::<_, ItemId>(0)
            })?
            .collect::<rusqlite::Result<HashSet<_>>>()
            .with_context(|| format!("reading progress for learner {learner_id}"))?;
        Ok(ids)
    }

    fn item(&self, id: ItemId) -> Result<Option<CatalogItem>> {
        let item = self
            .conn
            .query_row(
                "SELECT id, title, description FROM course WHERE id = ?1",
                params![id],
                |row| {
                    Ok(CatalogItem {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        description: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(item)
    }

    fn items(&self) -> Result<Vec<CatalogItem>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, title, description FROM course ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(CatalogItem {
                id: row.get(0)?,
                title: row.get(1)?,
                description: row.get(2)?,
            })
        })?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }
}
