//! Applies the unapplied part of a migration chain to one document.

use std::sync::Arc;

use crate::document::Document;
use crate::error::Result;
use crate::migrations::registry::MigrationRegistry;

/// Result of running the chain over one document.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationOutcome {
    pub document: Document,
    pub from_version: u64,
    /// Versions of the steps that ran, ascending.
    pub applied: Vec<u64>,
}

impl MigrationOutcome {
    /// True iff at least one step was applied.
    pub fn changed(&self) -> bool {
        !self.applied.is_empty()
    }

    pub fn to_version(&self) -> u64 {
        self.document.version()
    }

    pub fn into_document(self) -> Document {
        self.document
    }
}

#[derive(Debug, Clone)]
pub struct DocumentMigrator {
    registry: Arc<MigrationRegistry>,
}

impl DocumentMigrator {
    pub fn new(registry: Arc<MigrationRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn latest_version(&self) -> Option<u64> {
        self.registry.latest_version()
    }

    /// Upgrades `document` to the latest version.
    ///
    /// Steps at or below the document's current version are skipped. The
    /// chain runs on a copy, so when a step fails the caller's document is
    /// untouched and no intermediate version is ever observable.
    pub fn migrate(&self, document: &Document) -> Result<MigrationOutcome> {
        let from_version = document.version();
        let mut working = document.clone();
        let mut applied = Vec::new();

        if let Some(latest) = self.registry.latest_version() {
            if from_version > latest {
                tracing::debug!(
                    document = %document.id(),
                    version = from_version,
                    latest,
                    "Document is newer than the registry"
                );
            }
        }

        for step in self.registry.pending_after(from_version) {
            let patch = step.apply(&working).inspect_err(|e| {
                tracing::warn!(document = %document.id(), "{}", e);
            })?;
            working.merge(patch);
            working.set_version(step.version());
            applied.push(step.version());
            tracing::trace!(document = %document.id(), version = step.version(), "Applied migration step");
        }

        Ok(MigrationOutcome {
            document: working,
            from_version,
            applied,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Patch;
    use crate::error::MigrateError;
    use crate::migrations::MigrationStep;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn add_a(_: &Document) -> Result<Patch> {
        let mut patch = Patch::new();
        patch.insert("a".into(), json!(1));
        Ok(patch)
    }

    fn add_b(doc: &Document) -> Result<Patch> {
        let a = doc.get("a").and_then(Value::as_i64).unwrap_or(0);
        let mut patch = Patch::new();
        patch.insert("b".into(), json!(a + 1));
        Ok(patch)
    }

    fn two_step_migrator() -> DocumentMigrator {
        let registry = MigrationRegistry::new(vec![
            MigrationStep::new(2, "add_b", add_b),
            MigrationStep::new(1, "add_a", add_a),
        ])
        .unwrap();
        DocumentMigrator::new(Arc::new(registry))
    }

    #[test]
    fn test_unversioned_document_runs_full_chain() {
        let migrator = two_step_migrator();
        let outcome = migrator.migrate(&Document::new("x")).unwrap();

        assert!(outcome.changed());
        assert_eq!(outcome.from_version, 0);
        assert_eq!(outcome.applied, vec![1, 2]);
        assert_eq!(
            outcome.document.to_value().unwrap(),
            json!({"id": "x", "a": 1, "b": 2, "version": 2})
        );
    }

    #[test]
    fn test_second_migration_is_a_noop() {
        let migrator = two_step_migrator();
        let first = migrator.migrate(&Document::new("x")).unwrap();
        let second = migrator.migrate(&first.document).unwrap();

        assert!(!second.changed());
        assert_eq!(second.document, first.document);
    }

    #[test]
    fn test_steps_at_or_below_current_version_are_never_invoked() {
        static CALLS_V1: AtomicUsize = AtomicUsize::new(0);
        static CALLS_V2: AtomicUsize = AtomicUsize::new(0);

        let registry = MigrationRegistry::new(vec![
            MigrationStep::new(1, "v1", |_| {
                CALLS_V1.fetch_add(1, Ordering::SeqCst);
                Ok(Patch::new())
            }),
            MigrationStep::new(2, "v2", |_| {
                CALLS_V2.fetch_add(1, Ordering::SeqCst);
                Ok(Patch::new())
            }),
        ])
        .unwrap();
        let migrator = DocumentMigrator::new(Arc::new(registry));

        let outcome = migrator
            .migrate(&Document::new("x").with_version(1))
            .unwrap();
        assert_eq!(outcome.applied, vec![2]);
        assert_eq!(CALLS_V1.load(Ordering::SeqCst), 0);
        assert_eq!(CALLS_V2.load(Ordering::SeqCst), 1);

        let outcome = migrator
            .migrate(&Document::new("y").with_version(2))
            .unwrap();
        assert!(!outcome.changed());
        assert_eq!(CALLS_V1.load(Ordering::SeqCst), 0);
        assert_eq!(CALLS_V2.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_step_sees_output_of_previous_step() {
        let migrator = two_step_migrator();
        let outcome = migrator
            .migrate(&Document::new("x").with_field("a", 10).with_version(1))
            .unwrap();

        // v1 is skipped, so v2 reads the stored `a`
        assert_eq!(outcome.document.get("b"), Some(&json!(11)));
    }

    #[test]
    fn test_failing_step_leaves_input_untouched() {
        let registry = MigrationRegistry::new(vec![
            MigrationStep::new(1, "add_a", add_a),
            MigrationStep::new(2, "explode", |doc| {
                Err(MigrateError::Step {
                    version: 2,
                    name: "explode".into(),
                    reason: format!("cannot migrate {}", doc.id()),
                })
            }),
        ])
        .unwrap();
        let migrator = DocumentMigrator::new(Arc::new(registry));
        let original = Document::new("x").with_field("keep", true);

        let err = migrator.migrate(&original).unwrap_err();
        assert!(err.is_step_failure());
        assert_eq!(original.version(), 0);
        assert!(original.get("a").is_none());
    }

    #[test]
    fn test_empty_registry_changes_nothing() {
        let migrator = DocumentMigrator::new(Arc::new(MigrationRegistry::empty()));
        let doc = Document::new("x").with_field("a", 1);
        let outcome = migrator.migrate(&doc).unwrap();
        assert!(!outcome.changed());
        assert_eq!(outcome.document, doc);
    }

    #[test]
    fn test_document_newer_than_registry_is_left_alone() {
        let migrator = two_step_migrator();
        let doc = Document::new("x").with_version(7);
        let outcome = migrator.migrate(&doc).unwrap();
        assert!(!outcome.changed());
        assert_eq!(outcome.to_version(), 7);
    }
}
