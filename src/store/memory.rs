//! In-process document store.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::document::{Document, Patch};
use crate::error::{MigrateError, Result};
use crate::store::{DocumentStore, Filter};

/// A single collection held in a `BTreeMap`, so iteration is already in id
/// order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<BTreeMap<String, Document>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-loaded with `documents`, replacing duplicates.
    pub fn with_documents(documents: impl IntoIterator<Item = Document>) -> Self {
        let map = documents
            .into_iter()
            .map(|doc| (doc.id().to_string(), doc))
            .collect();
        Self {
            documents: RwLock::new(map),
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Copy of every stored document, ascending by id.
    pub fn snapshot(&self) -> Vec<Document> {
        self.read().values().cloned().collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Document>> {
        self.documents.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Document>> {
        self.documents.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DocumentStore for MemoryStore {
    fn find_one(&self, filter: &Filter) -> Result<Option<Document>> {
        Ok(self.read().values().find(|doc| filter.matches(doc)).cloned())
    }

    fn find_many(&self, filter: &Filter) -> Result<Vec<Document>> {
        Ok(self
            .read()
            .values()
            .filter(|doc| filter.matches(doc))
            .cloned()
            .collect())
    }

    fn scan(&self, filter: &Filter, after: Option<&str>, limit: usize) -> Result<Vec<Document>> {
        let documents = self.read();
        let page = documents
            .values()
            .filter(|doc| after.map_or(true, |after| doc.id() > after))
            .filter(|doc| filter.matches(doc))
            .take(limit)
            .cloned()
            .collect();
        Ok(page)
    }

    fn count(&self, filter: &Filter) -> Result<usize> {
        Ok(self.read().values().filter(|doc| filter.matches(doc)).count())
    }

    fn insert(&self, document: Document) -> Result<()> {
        let mut documents = self.write();
        if documents.contains_key(document.id()) {
            return Err(MigrateError::Conflict(document.id().to_string()));
        }
        documents.insert(document.id().to_string(), document);
        Ok(())
    }

    fn update_one(&self, id: &str, patch: &Patch) -> Result<bool> {
        match self.write().get_mut(id) {
            Some(doc) => {
                doc.merge(patch.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn update_many(&self, filter: &Filter, patch: &Patch) -> Result<usize> {
        let mut updated = 0;
        for doc in self.write().values_mut() {
            if filter.matches(doc) {
                doc.merge(patch.clone());
                updated += 1;
            }
        }
        Ok(updated)
    }

    fn upsert(&self, document: Document) -> Result<()> {
        self.write().insert(document.id().to_string(), document);
        Ok(())
    }

    fn bulk_write(&self, documents: Vec<Document>) -> Result<usize> {
        let written = documents.len();
        let mut map = self.write();
        for doc in documents {
            map.insert(doc.id().to_string(), doc);
        }
        Ok(written)
    }
}
