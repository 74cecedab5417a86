pub mod cursor;
pub mod filter;
pub mod memory;
pub mod sqlite;
pub mod write_queue;

use std::sync::Arc;

use crate::document::{Document, Patch};
use crate::error::Result;

pub use cursor::ScanCursor;
pub use filter::Filter;
pub use memory::MemoryStore;
pub use sqlite::{SqliteDatabase, SqliteStore};
pub use write_queue::WriteQueueHandle;

/// One collection of documents in a key-document store.
///
/// Lookups that return several documents order them by identity key, and
/// `find_one` returns the first match in that order.
pub trait DocumentStore: Send + Sync {
    fn find_one(&self, filter: &Filter) -> Result<Option<Document>>;
    fn find_many(&self, filter: &Filter) -> Result<Vec<Document>>;

    /// Keyset page: up to `limit` matches with an id strictly greater than
    /// `after`, ascending by id.
    fn scan(&self, filter: &Filter, after: Option<&str>, limit: usize) -> Result<Vec<Document>>;

    fn count(&self, filter: &Filter) -> Result<usize>;

    /// Creates a document. Fails with `Conflict` if the id is taken.
    fn insert(&self, document: Document) -> Result<()>;

    /// Merges `patch` into the document with this id. Returns false when no
    /// such document exists.
    fn update_one(&self, id: &str, patch: &Patch) -> Result<bool>;

    /// Merges `patch` into every match. Returns the number updated.
    fn update_many(&self, filter: &Filter, patch: &Patch) -> Result<usize>;

    /// Full-document replace by id, creating the document if needed.
    fn upsert(&self, document: Document) -> Result<()>;

    /// Upserts every document. All-or-nothing where the backend allows.
    fn bulk_write(&self, documents: Vec<Document>) -> Result<usize>;

    /// Confirms the backend is reachable.
    fn ping(&self) -> Result<()> {
        Ok(())
    }
}

impl<S: DocumentStore + ?Sized> DocumentStore for Arc<S> {
    fn find_one(&self, filter: &Filter) -> Result<Option<Document>> {
        (**self).find_one(filter)
    }

    fn find_many(&self, filter: &Filter) -> Result<Vec<Document>> {
        (**self).find_many(filter)
    }

    fn scan(&self, filter: &Filter, after: Option<&str>, limit: usize) -> Result<Vec<Document>> {
        (**self).scan(filter, after, limit)
    }

    fn count(&self, filter: &Filter) -> Result<usize> {
        (**self).count(filter)
    }

    fn insert(&self, document: Document) -> Result<()> {
        (**self).insert(document)
    }

    fn update_one(&self, id: &str, patch: &Patch) -> Result<bool> {
        (**self).update_one(id, patch)
    }

    fn update_many(&self, filter: &Filter, patch: &Patch) -> Result<usize> {
        (**self).update_many(filter, patch)
    }

    fn upsert(&self, document: Document) -> Result<()> {
        (**self).upsert(document)
    }

    fn bulk_write(&self, documents: Vec<Document>) -> Result<usize> {
        (**self).bulk_write(documents)
    }

    fn ping(&self) -> Result<()> {
        (**self).ping()
    }
}
