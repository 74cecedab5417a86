//! Versioned bookkeeping tables for SqliteDatabase.
//!
//! The layout version lives in the `meta` table under `layout_version`. Each
//! layout migration has a version number and runs exactly once. Collection
//! tables themselves are created on demand by `SqliteDatabase::collection`.

use rusqlite::{Connection, OptionalExtension};

use crate::error::{MigrateError, Result};

/// Current layout version. Increment when adding new layout migrations.
pub const CURRENT_LAYOUT_VERSION: u32 = 2;

/// Layout migration function type.
type LayoutMigrationFn = fn(&Connection) -> Result<()>;

/// All layout migrations in order. Index + 1 = version number.
const LAYOUT_MIGRATIONS: &[LayoutMigrationFn] = &[layout_v1_catalog, layout_v2_catalog_timestamps];

/// Runs all pending layout migrations.
pub fn run_layout_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_layout_version(conn)?;

    if current_version > CURRENT_LAYOUT_VERSION {
        return Err(MigrateError::Config(format!(
            "Database layout version {} is newer than this binary ({}). Please upgrade docmigrate.",
            current_version, CURRENT_LAYOUT_VERSION
        )));
    }

    for (idx, migration) in LAYOUT_MIGRATIONS.iter().enumerate() {
        let version = (idx + 1) as u32;
        if version > current_version {
            migration(conn)?;
            set_layout_version(conn, version)?;
            tracing::debug!(version, "Applied layout migration");
        }
    }

    Ok(())
}

/// Gets the current layout version, 0 for a fresh database.
pub fn get_layout_version(conn: &Connection) -> Result<u32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        [],
    )?;

    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'layout_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    match version {
        Some(v) => v
            .parse()
            .map_err(|_| MigrateError::Config(format!("Corrupt layout_version value: {v}"))),
        None => Ok(0),
    }
}

fn set_layout_version(conn: &Connection, version: u32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES ('layout_version', ?1)",
        [version.to_string()],
    )?;
    Ok(())
}

/// v1: catalog of collection tables created through the store.
fn layout_v1_catalog(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            name TEXT PRIMARY KEY
        );
        "#,
    )?;
    Ok(())
}

/// v2: record when each collection was first opened.
fn layout_v2_catalog_timestamps(conn: &Connection) -> Result<()> {
    if !column_exists(conn, "collections", "created_at")? {
        conn.execute_batch("ALTER TABLE collections ADD COLUMN created_at INTEGER;")?;
    }
    Ok(())
}

/// Checks if a column exists in a table.
fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM pragma_table_info('{}') WHERE name = ?1",
            table
        ),
        [column],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}
