//! Migrate-on-read decorator for a [`DocumentStore`].
//!
//! Before any lookup or mutation reaches the inner store, [`MigratingStore`]
//! finds stale documents the call could touch, runs them through the
//! [`DocumentMigrator`] and writes them back. Only then does the caller's
//! operation run, with its original arguments, and its result is returned
//! as is. Failures anywhere in that repair step fail the call before the
//! original operation is attempted.
//!
//! Raw access through [`MigratingStore::raw`] bypasses all of this.

use std::sync::Arc;

use crate::document::{Document, Patch, UNVERSIONED};
use crate::error::{MigrateError, Result};
use crate::migrations::DocumentMigrator;
use crate::store::{DocumentStore, Filter};

/// How many records an operation can touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// The read-only part of an operation, used for the stale check.
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    pub filter: Filter,
    pub cardinality: Cardinality,
}

impl Lookup {
    pub fn one(filter: Filter) -> Self {
        Self {
            filter,
            cardinality: Cardinality::One,
        }
    }

    pub fn many(filter: Filter) -> Self {
        Self {
            filter,
            cardinality: Cardinality::Many,
        }
    }
}

/// A data-access call routed through the interceptor.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    FindUnique { filter: Filter },
    FindFirst { filter: Filter },
    FindMany { filter: Filter },
    /// Merge `data` into the first match. Fails with `NotFound` if none.
    Update { filter: Filter, data: Patch },
    UpdateMany { filter: Filter, data: Patch },
    /// Merge `update` into the first match, or insert `create`.
    Upsert {
        filter: Filter,
        create: Document,
        update: Patch,
    },
    Create { document: Document },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::FindUnique { .. } => "find_unique",
            Operation::FindFirst { .. } => "find_first",
            Operation::FindMany { .. } => "find_many",
            Operation::Update { .. } => "update",
            Operation::UpdateMany { .. } => "update_many",
            Operation::Upsert { .. } => "upsert",
            Operation::Create { .. } => "create",
        }
    }

    /// The operation reduced to a pure lookup. Mutation payloads are
    /// dropped; only the filter and the cardinality remain. `Create` targets
    /// no existing record and has no lookup.
    pub fn lookup(&self) -> Option<Lookup> {
        match self {
            Operation::FindUnique { filter }
            | Operation::FindFirst { filter }
            | Operation::Update { filter, .. }
            | Operation::Upsert { filter, .. } => Some(Lookup::one(filter.clone())),
            Operation::FindMany { filter } | Operation::UpdateMany { filter, .. } => {
                Some(Lookup::many(filter.clone()))
            }
            Operation::Create { .. } => None,
        }
    }
}

/// Result of an [`Operation`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Document(Option<Document>),
    Documents(Vec<Document>),
    Count(usize),
}

impl Outcome {
    pub fn into_document(self) -> Option<Document> {
        match self {
            Outcome::Document(document) => document,
            Outcome::Documents(documents) => documents.into_iter().next(),
            Outcome::Count(_) => None,
        }
    }

    pub fn into_documents(self) -> Vec<Document> {
        match self {
            Outcome::Document(document) => document.into_iter().collect(),
            Outcome::Documents(documents) => documents,
            Outcome::Count(_) => Vec::new(),
        }
    }

    pub fn into_count(self) -> usize {
        match self {
            Outcome::Document(document) => usize::from(document.is_some()),
            Outcome::Documents(documents) => documents.len(),
            Outcome::Count(count) => count,
        }
    }
}

pub struct MigratingStore<S> {
    store: S,
    migrator: Arc<DocumentMigrator>,
}

impl<S: DocumentStore> MigratingStore<S> {
    pub fn new(store: S, migrator: Arc<DocumentMigrator>) -> Self {
        Self { store, migrator }
    }

    /// The wrapped store, without interception.
    pub fn raw(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    pub fn migrator(&self) -> &DocumentMigrator {
        &self.migrator
    }

    /// Runs an operation: stale check and repair first, then the operation.
    pub fn execute(&self, operation: Operation) -> Result<Outcome> {
        if let Some(lookup) = operation.lookup() {
            let repaired = self.repair_stale(&lookup)?;
            if repaired > 0 {
                tracing::debug!(operation = operation.name(), repaired, "Read-repaired stale documents");
            }
        }

        match operation {
            Operation::FindUnique { filter } | Operation::FindFirst { filter } => {
                self.store.find_one(&filter).map(Outcome::Document)
            }
            Operation::FindMany { filter } => self.store.find_many(&filter).map(Outcome::Documents),
            Operation::Update { filter, data } => self
                .apply_update(&filter, &data)
                .map(|document| Outcome::Document(Some(document))),
            Operation::UpdateMany { filter, data } => {
                self.store.update_many(&filter, &data).map(Outcome::Count)
            }
            Operation::Upsert {
                filter,
                create,
                update,
            } => self
                .apply_upsert(&filter, create, &update)
                .map(|document| Outcome::Document(Some(document))),
            Operation::Create { document } => self
                .apply_create(document)
                .map(|document| Outcome::Document(Some(document))),
        }
    }

    /// Finds stale documents reachable from `lookup`, migrates them and
    /// writes them back by id. Returns the number of documents rewritten.
    ///
    /// The lookup filter is broadened with "or stale", so stale documents
    /// are repaired even when they do not match the caller's filter. A
    /// single-record lookup repairs at most one document and prefers one
    /// that matches the caller's filter.
    pub fn repair_stale(&self, lookup: &Lookup) -> Result<usize> {
        let Some(latest) = self.migrator.latest_version() else {
            return Ok(0);
        };
        let stale = Filter::below_version(latest);

        let candidates = match lookup.cardinality {
            Cardinality::One => {
                let targeted = lookup.filter.clone().and(stale.clone());
                match self.store.find_one(&targeted)? {
                    Some(document) => vec![document],
                    None => self.store.find_one(&stale)?.into_iter().collect(),
                }
            }
            Cardinality::Many => self.store.find_many(&lookup.filter.clone().or(stale))?,
        };

        let mut repaired = 0;
        for document in candidates {
            let outcome = self.migrator.migrate(&document)?;
            if outcome.changed() {
                tracing::trace!(
                    document = %document.id(),
                    from = outcome.from_version,
                    to = outcome.to_version(),
                    "Persisting migrated document"
                );
                self.store.upsert(outcome.into_document())?;
                repaired += 1;
            }
        }
        Ok(repaired)
    }

    pub fn find_unique(&self, filter: Filter) -> Result<Option<Document>> {
        Ok(self.execute(Operation::FindUnique { filter })?.into_document())
    }

    pub fn find_first(&self, filter: Filter) -> Result<Option<Document>> {
        Ok(self.execute(Operation::FindFirst { filter })?.into_document())
    }

    pub fn find_unique_or_throw(&self, filter: Filter) -> Result<Document> {
        let description = format!("{filter:?}");
        self.find_unique(filter)?
            .ok_or(MigrateError::NotFound(description))
    }

    pub fn find_first_or_throw(&self, filter: Filter) -> Result<Document> {
        let description = format!("{filter:?}");
        self.find_first(filter)?
            .ok_or(MigrateError::NotFound(description))
    }

    pub fn find_many(&self, filter: Filter) -> Result<Vec<Document>> {
        Ok(self.execute(Operation::FindMany { filter })?.into_documents())
    }

    /// Merges `data` into the first match and returns the updated document.
    pub fn update(&self, filter: Filter, data: Patch) -> Result<Document> {
        let description = format!("{filter:?}");
        self.execute(Operation::Update { filter, data })?
            .into_document()
            .ok_or(MigrateError::NotFound(description))
    }

    /// Merges `data` into every match and returns how many were updated.
    pub fn update_many(&self, filter: Filter, data: Patch) -> Result<usize> {
        Ok(self.execute(Operation::UpdateMany { filter, data })?.into_count())
    }

    pub fn upsert(&self, filter: Filter, create: Document, update: Patch) -> Result<Document> {
        let description = format!("{filter:?}");
        self.execute(Operation::Upsert {
            filter,
            create,
            update,
        })?
        .into_document()
        .ok_or(MigrateError::NotFound(description))
    }

    /// Inserts a new document stamped at the latest version.
    pub fn create(&self, document: Document) -> Result<Document> {
        let id = document.id().to_string();
        self.execute(Operation::Create { document })?
            .into_document()
            .ok_or(MigrateError::NotFound(id))
    }

    fn apply_update(&self, filter: &Filter, data: &Patch) -> Result<Document> {
        let target = self
            .store
            .find_one(filter)?
            .ok_or_else(|| MigrateError::NotFound(format!("{filter:?}")))?;
        self.update_by_id(target.id(), data)
    }

    fn apply_upsert(&self, filter: &Filter, create: Document, update: &Patch) -> Result<Document> {
        match self.store.find_one(filter)? {
            Some(existing) => self.update_by_id(existing.id(), update),
            None => self.apply_create(create),
        }
    }

    /// New documents are written in the latest shape, so an unversioned
    /// document is stamped with the latest version. One that declares an
    /// older version is migrated first.
    fn apply_create(&self, document: Document) -> Result<Document> {
        let document = match self.migrator.latest_version() {
            Some(latest) if document.version() == UNVERSIONED => document.with_version(latest),
            Some(_) => self.migrator.migrate(&document)?.into_document(),
            None => document,
        };
        self.store.insert(document.clone())?;
        Ok(document)
    }

    fn update_by_id(&self, id: &str, data: &Patch) -> Result<Document> {
        if !self.store.update_one(id, data)? {
            return Err(MigrateError::NotFound(id.to_string()));
        }
        self.store
            .find_one(&Filter::id(id))?
            .ok_or_else(|| MigrateError::NotFound(id.to_string()))
    }
}
