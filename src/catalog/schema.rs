use anyhow::Result;
use rusqlite::Connection;

/// Create the catalog and progress tables if they are missing.
///
/// Mirrors the columns the application owns; only the ones recommendations
/// read are constrained here.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch("
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS course (
            id           INTEGER PRIMARY KEY,
            title        TEXT NOT NULL,
            description  TEXT NOT NULL,
            class_level  INTEGER NOT NULL DEFAULT 0,
            volunteer_id INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS progress (
            id               INTEGER PRIMARY KEY,
            student_id       INTEGER NOT NULL,
            course_id        INTEGER NOT NULL REFERENCES course(id) ON DELETE CASCADE,
            percent_complete REAL DEFAULT 0.0
        );
        CREATE INDEX IF NOT EXISTS idx_progress_student ON progress(student_id);
    ")?;
    Ok(())
}
