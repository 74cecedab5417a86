//! SQLite-backed document collections.
//!
//! Every collection is a table `(id TEXT PRIMARY KEY, version INTEGER, body
//! TEXT)`. `version` is NULL for unversioned documents and `body` holds the
//! open fields as JSON. Connections come from an r2d2 pool shared by every
//! collection handle of one database.

pub mod layout;
pub mod query;

use std::path::Path;

use once_cell::sync::Lazy;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use regex::Regex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{
    params, params_from_iter, Connection, ErrorCode, OptionalExtension, TransactionBehavior,
};
use serde_json::{Map, Value};

use crate::document::{Document, Patch, UNVERSIONED};
use crate::error::{MigrateError, Result};
use crate::store::{DocumentStore, Filter};

use self::query::SqlPredicate;

static COLLECTION_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("collection name pattern"));

/// Checks that `name` can be used as a collection table name.
pub fn validate_collection_name(name: &str) -> Result<()> {
    if !COLLECTION_NAME.is_match(name) {
        return Err(MigrateError::Config(format!(
            "Invalid collection name {name:?}: expected letters, digits and underscores"
        )));
    }
    if name == "meta" || name == "collections" || name.starts_with("sqlite_") {
        return Err(MigrateError::Config(format!(
            "Collection name {name:?} is reserved"
        )));
    }
    Ok(())
}

type SqlitePool = Pool<SqliteConnectionManager>;

/// A SQLite database holding any number of collections.
#[derive(Clone)]
pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl SqliteDatabase {
    /// Default number of pooled connections for file databases.
    const DEFAULT_POOL_SIZE: u32 = 4;

    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let manager = SqliteConnectionManager::file(db_path.as_ref())
            .with_init(Self::configure_pragmas);
        let pool = Pool::builder()
            .max_size(Self::DEFAULT_POOL_SIZE)
            .build(manager)?;
        Self::from_pool(pool)
    }

    /// A private in-memory database. The pool holds exactly one connection
    /// that is never recycled, since each SQLite memory connection is its
    /// own database.
    pub fn in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(Self::configure_pragmas);
        let pool = Pool::builder()
            .max_size(1)
            .max_lifetime(None)
            .idle_timeout(None)
            .build(manager)?;
        Self::from_pool(pool)
    }

    fn from_pool(pool: SqlitePool) -> Result<Self> {
        let conn = pool.get()?;
        layout::run_layout_migrations(&conn)?;
        drop(conn);
        Ok(Self { pool })
    }

    /// - WAL mode: readers are not blocked by the writer
    /// - NORMAL synchronous: durable enough with WAL, much faster
    /// - busy_timeout: pooled connections wait for the write lock instead of failing
    fn configure_pragmas(conn: &mut Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            "#,
        )
    }

    /// Opens (creating if needed) the collection table `name`.
    pub fn collection(&self, name: &str) -> Result<SqliteStore> {
        validate_collection_name(name)?;

        let conn = self.pool.get()?;
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{name}" (
                id TEXT PRIMARY KEY,
                version INTEGER,
                body TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS "idx_{name}_version" ON "{name}"(version);
            "#
        ))?;
        conn.execute(
            "INSERT OR IGNORE INTO collections (name, created_at) VALUES (?1, strftime('%s', 'now'))",
            [name],
        )?;

        Ok(SqliteStore {
            pool: self.pool.clone(),
            table: name.to_string(),
        })
    }

    /// Names of every collection opened through this database, sorted.
    pub fn collections(&self) -> Result<Vec<String>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT name FROM collections ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    pub fn ping(&self) -> Result<()> {
        let conn = self.pool.get()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    /// Releases the pool. Collection handles still alive keep their own
    /// reference, so connections close once the last handle is dropped.
    pub fn close(self) {
        tracing::debug!("Closing SQLite database");
        drop(self.pool);
    }
}

/// One collection table, usable as a [`DocumentStore`].
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    table: String,
}

impl SqliteStore {
    pub fn name(&self) -> &str {
        &self.table
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    fn select(
        &self,
        conn: &Connection,
        predicate: &SqlPredicate,
        tail: &str,
        extra: &[SqlValue],
    ) -> Result<Vec<Document>> {
        let sql = format!(
            "SELECT id, version, body FROM \"{}\" WHERE ({}){}",
            self.table, predicate.sql, tail
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(predicate.params.iter().chain(extra.iter())),
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )?;

        let mut documents = Vec::new();
        for row in rows {
            let (id, version, body) = row?;
            documents.push(decode(id, version, &body)?);
        }
        Ok(documents)
    }

    fn load(&self, conn: &Connection, id: &str) -> Result<Option<Document>> {
        let row = conn
            .query_row(
                &format!("SELECT version, body FROM \"{}\" WHERE id = ?1", self.table),
                [id],
                |row| Ok((row.get::<_, Option<i64>>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        row.map(|(version, body)| decode(id.to_string(), version, &body))
            .transpose()
    }

    fn write(&self, conn: &Connection, document: &Document) -> Result<()> {
        let (version, body) = encode(document)?;
        let mut stmt = conn.prepare_cached(&format!(
            "INSERT INTO \"{}\" (id, version, body) VALUES (?1, ?2, ?3) \
             ON CONFLICT(id) DO UPDATE SET version = excluded.version, body = excluded.body",
            self.table
        ))?;
        stmt.execute(params![document.id(), version, body])?;
        Ok(())
    }
}

fn decode(id: String, version: Option<i64>, body: &str) -> Result<Document> {
    let fields: Map<String, Value> = serde_json::from_str(body)?;
    let version = version
        .and_then(|v| u64::try_from(v).ok())
        .unwrap_or(UNVERSIONED);
    Ok(Document::from_parts(id, version, fields))
}

fn encode(document: &Document) -> Result<(Option<i64>, String)> {
    let version = match document.version() {
        UNVERSIONED => None,
        v => Some(
            i64::try_from(v).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
        ),
    };
    Ok((version, serde_json::to_string(document.fields())?))
}

impl DocumentStore for SqliteStore {
    fn find_one(&self, filter: &Filter) -> Result<Option<Document>> {
        let predicate = query::compile(filter)?;
        let conn = self.conn()?;
        let mut found = self.select(&conn, &predicate, " ORDER BY id LIMIT 1", &[])?;
        Ok(found.pop())
    }

    fn find_many(&self, filter: &Filter) -> Result<Vec<Document>> {
        let predicate = query::compile(filter)?;
        let conn = self.conn()?;
        self.select(&conn, &predicate, " ORDER BY id", &[])
    }

    fn scan(&self, filter: &Filter, after: Option<&str>, limit: usize) -> Result<Vec<Document>> {
        let predicate = query::compile(filter)?;
        let limit = SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX));
        let conn = self.conn()?;
        match after {
            Some(after) => self.select(
                &conn,
                &predicate,
                " AND id > ? ORDER BY id LIMIT ?",
                &[SqlValue::Text(after.to_string()), limit],
            ),
            None => self.select(&conn, &predicate, " ORDER BY id LIMIT ?", &[limit]),
        }
    }

    fn count(&self, filter: &Filter) -> Result<usize> {
        let predicate = query::compile(filter)?;
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM \"{}\" WHERE ({})",
                self.table, predicate.sql
            ),
            params_from_iter(predicate.params.iter()),
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn insert(&self, document: Document) -> Result<()> {
        let (version, body) = encode(&document)?;
        let conn = self.conn()?;
        let result = conn.execute(
            &format!(
                "INSERT INTO \"{}\" (id, version, body) VALUES (?1, ?2, ?3)",
                self.table
            ),
            params![document.id(), version, body],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(MigrateError::Conflict(document.id().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    // Write transactions are IMMEDIATE: the lock is taken at BEGIN, where
    // busy_timeout applies, not on upgrade.
    fn update_one(&self, id: &str, patch: &Patch) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let Some(mut document) = self.load(&tx, id)? else {
            return Ok(false);
        };
        document.merge(patch.clone());
        self.write(&tx, &document)?;
        tx.commit()?;
        Ok(true)
    }

    fn update_many(&self, filter: &Filter, patch: &Patch) -> Result<usize> {
        let predicate = query::compile(filter)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let documents = self.select(&tx, &predicate, "", &[])?;
        for mut document in documents.iter().cloned() {
            document.merge(patch.clone());
            self.write(&tx, &document)?;
        }
        tx.commit()?;
        Ok(documents.len())
    }

    fn upsert(&self, document: Document) -> Result<()> {
        let conn = self.conn()?;
        self.write(&conn, &document)
    }

    fn bulk_write(&self, documents: Vec<Document>) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for document in &documents {
            self.write(&tx, document)?;
        }
        tx.commit()?;
        Ok(documents.len())
    }

    fn ping(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn users() -> SqliteStore {
        SqliteDatabase::in_memory().unwrap().collection("users").unwrap()
    }

    #[test]
    fn test_round_trip_preserves_open_fields() {
        let store = users();
        let doc = Document::new("u1")
            .with_field("name", "ada")
            .with_field("tags", json!(["a", "b"]))
            .with_field("nested", json!({"x": 1}));
        store.upsert(doc.clone()).unwrap();

        let loaded = store.find_one(&Filter::id("u1")).unwrap().unwrap();
        assert_eq!(loaded, doc);
    }

    #[test]
    fn test_unversioned_documents_store_null_version() {
        let store = users();
        store.upsert(Document::new("u1")).unwrap();
        store.upsert(Document::new("u2").with_version(1)).unwrap();

        assert_eq!(store.count(&Filter::absent("version")).unwrap(), 1);
        assert_eq!(store.count(&Filter::below_version(2)).unwrap(), 2);
        assert_eq!(store.count(&Filter::below_version(1)).unwrap(), 1);
    }

    #[test]
    fn test_filters_agree_with_in_memory_evaluation() {
        let store = users();
        let docs = vec![
            Document::new("a").with_field("score", 3).with_field("team", "red"),
            Document::new("b").with_field("score", 9).with_field("active", true),
            Document::new("c").with_field("team", "7").with_field("nothing", Value::Null),
            Document::new("d").with_field("tags", json!([1, 2])).with_version(4),
        ];
        store.bulk_write(docs.clone()).unwrap();

        let filters = vec![
            Filter::eq("team", "red"),
            Filter::eq("team", 7),
            Filter::eq("active", true),
            Filter::eq("nothing", Value::Null),
            Filter::eq("tags", json!([1, 2])),
            Filter::lt("score", 5),
            Filter::absent("team"),
            Filter::eq("version", 4),
            Filter::eq("team", "red").or(Filter::below_version(1)),
            Filter::eq("team", "red").and(Filter::lt("score", 1)),
        ];

        for filter in filters {
            let expected: Vec<&str> = docs
                .iter()
                .filter(|doc| filter.matches(doc))
                .map(|doc| doc.id())
                .collect();
            let actual = store.find_many(&filter).unwrap();
            let actual: Vec<&str> = actual.iter().map(|doc| doc.id()).collect();
            assert_eq!(actual, expected, "filter {filter:?}");
        }
    }

    #[test]
    fn test_unstorable_version_is_an_error() {
        let store = users();
        let err = store
            .upsert(Document::new("u1").with_version(u64::MAX))
            .unwrap_err();
        assert!(matches!(err, MigrateError::Database(_)));
        assert!(store.find_one(&Filter::id("u1")).unwrap().is_none());
    }

    #[test]
    fn test_insert_conflict() {
        let store = users();
        store.insert(Document::new("u1")).unwrap();
        let err = store.insert(Document::new("u1")).unwrap_err();
        assert!(matches!(err, MigrateError::Conflict(_)));
    }

    #[test]
    fn test_update_one_and_many() {
        let store = users();
        store
            .bulk_write(vec![
                Document::new("a").with_field("team", "red").with_version(2),
                Document::new("b").with_field("team", "red"),
                Document::new("c").with_field("team", "blue"),
            ])
            .unwrap();

        let mut patch = Patch::new();
        patch.insert("score".into(), json!(1));
        assert!(store.update_one("a", &patch).unwrap());
        assert!(!store.update_one("missing", &patch).unwrap());
        assert_eq!(store.update_many(&Filter::eq("team", "red"), &patch).unwrap(), 2);

        let a = store.find_one(&Filter::id("a")).unwrap().unwrap();
        assert_eq!(a.version(), 2);
        assert_eq!(a.get("score"), Some(&json!(1)));
        assert_eq!(store.count(&Filter::eq("score", 1)).unwrap(), 2);
    }

    #[test]
    fn test_scan_pages_in_id_order() {
        let store = users();
        store
            .bulk_write((0..5).map(|i| Document::new(format!("d{i}"))).collect())
            .unwrap();

        let first = store.scan(&Filter::All, None, 2).unwrap();
        let rest = store.scan(&Filter::All, Some("d1"), 10).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(
            rest.iter().map(|d| d.id()).collect::<Vec<_>>(),
            vec!["d2", "d3", "d4"]
        );
    }

    #[test]
    fn test_collection_names_are_validated() {
        let db = SqliteDatabase::in_memory().unwrap();
        assert!(db.collection("users; DROP TABLE x").is_err());
        assert!(db.collection("meta").is_err());
        assert!(db.collection("").is_err());

        db.collection("users").unwrap();
        db.collection("users_v2").unwrap();
        assert_eq!(db.collections().unwrap(), vec!["users", "users_v2"]);
    }
}
