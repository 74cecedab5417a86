//! Ordered catalog of document migration steps.
//!
//! Steps are sorted ascending by version at construction and never change
//! afterwards. That order is the only order the migrator applies them in.

use std::fmt;
use std::sync::Arc;

use crate::document::{Document, Patch};
use crate::error::{MigrateError, Result};

/// Transformation function of one step: current document shape in, fields to
/// merge out.
pub type MigrationFn = dyn Fn(&Document) -> Result<Patch> + Send + Sync;

/// Largest step version a registry accepts.
pub const MAX_VERSION: u64 = i64::MAX as u64;

#[derive(Clone)]
pub struct MigrationStep {
    version: u64,
    name: &'static str,
    migrate: Arc<MigrationFn>,
}

impl MigrationStep {
    pub fn new<F>(version: u64, name: &'static str, migrate: F) -> Self
    where
        F: Fn(&Document) -> Result<Patch> + Send + Sync + 'static,
    {
        Self {
            version,
            name,
            migrate: Arc::new(migrate),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Runs the transformation. Any error is wrapped as a step failure.
    pub fn apply(&self, document: &Document) -> Result<Patch> {
        (self.migrate)(document).map_err(|e| match e {
            step @ MigrateError::Step { .. } => step,
            other => self.failure(other.to_string()),
        })
    }

    fn failure(&self, reason: impl Into<String>) -> MigrateError {
        MigrateError::Step {
            version: self.version,
            name: self.name.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationStep")
            .field("version", &self.version)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MigrationRegistry {
    steps: Vec<MigrationStep>,
}

impl MigrationRegistry {
    /// Builds a registry, sorting steps ascending by version.
    ///
    /// Version 0 is reserved for unversioned documents and duplicate
    /// versions are rejected. Versions must also fit a signed 64-bit
    /// integer, the widest stamp the SQLite store can persist.
    pub fn new(mut steps: Vec<MigrationStep>) -> Result<Self> {
        steps.sort_by_key(|step| step.version);

        if let Some(step) = steps.iter().find(|step| step.version == 0) {
            return Err(MigrateError::Registry(format!(
                "Migration '{}' uses reserved version 0",
                step.name
            )));
        }

        if let Some(step) = steps.iter().find(|step| step.version > MAX_VERSION) {
            return Err(MigrateError::Registry(format!(
                "Migration '{}' uses version {} above the maximum {}",
                step.name, step.version, MAX_VERSION
            )));
        }

        for pair in steps.windows(2) {
            if pair[0].version == pair[1].version {
                return Err(MigrateError::Registry(format!(
                    "Duplicate migration version {} ('{}' and '{}')",
                    pair[0].version, pair[0].name, pair[1].name
                )));
            }
        }

        Ok(Self { steps })
    }

    /// A registry with no steps: every document is already current.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The migration chain shipped with this crate.
    pub fn builtin() -> Self {
        Self {
            steps: super::versions::builtin_steps(),
        }
    }

    /// Highest registered version, `None` when no migrations exist.
    pub fn latest_version(&self) -> Option<u64> {
        self.steps.last().map(|step| step.version)
    }

    pub fn versions(&self) -> impl Iterator<Item = u64> + '_ {
        self.steps.iter().map(|step| step.version)
    }

    pub fn steps(&self) -> &[MigrationStep] {
        &self.steps
    }

    /// Steps not yet applied to a document stamped at `version`.
    pub fn pending_after(&self, version: u64) -> impl Iterator<Item = &MigrationStep> + '_ {
        self.steps.iter().filter(move |step| step.version > version)
    }

    /// True when a document stamped at `version` still has steps to apply.
    pub fn is_stale(&self, version: u64) -> bool {
        self.latest_version().is_some_and(|latest| version < latest)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(version: u64, name: &'static str) -> MigrationStep {
        MigrationStep::new(version, name, |_| Ok(Patch::new()))
    }

    #[test]
    fn test_registry_sorts_by_version() {
        let registry =
            MigrationRegistry::new(vec![noop(3, "c"), noop(1, "a"), noop(2, "b")]).unwrap();
        assert_eq!(registry.versions().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(registry.latest_version(), Some(3));
    }

    #[test]
    fn test_registry_rejects_duplicate_versions() {
        let err = MigrationRegistry::new(vec![noop(1, "a"), noop(1, "b")]).unwrap_err();
        assert!(matches!(err, MigrateError::Registry(_)));
    }

    #[test]
    fn test_registry_rejects_version_zero() {
        let err = MigrationRegistry::new(vec![noop(0, "zero")]).unwrap_err();
        assert!(matches!(err, MigrateError::Registry(_)));
    }

    #[test]
    fn test_registry_rejects_versions_beyond_storable_range() {
        let err = MigrationRegistry::new(vec![noop(1, "a"), noop(MAX_VERSION + 1, "huge")])
            .unwrap_err();
        assert!(matches!(err, MigrateError::Registry(_)));

        let registry = MigrationRegistry::new(vec![noop(MAX_VERSION, "max")]).unwrap();
        assert_eq!(registry.latest_version(), Some(MAX_VERSION));
    }

    #[test]
    fn test_empty_registry_has_no_latest_version() {
        let registry = MigrationRegistry::empty();
        assert_eq!(registry.latest_version(), None);
        assert!(!registry.is_stale(0));
    }

    #[test]
    fn test_pending_after() {
        let registry =
            MigrationRegistry::new(vec![noop(1, "a"), noop(2, "b"), noop(5, "c")]).unwrap();
        let pending: Vec<u64> = registry.pending_after(2).map(|s| s.version()).collect();
        assert_eq!(pending, vec![5]);
        assert!(registry.is_stale(2));
        assert!(!registry.is_stale(5));
    }

    #[test]
    fn test_step_errors_are_wrapped_with_step_identity() {
        let step = MigrationStep::new(4, "broken", |_| {
            Err(MigrateError::InvalidFilter("bad".into()))
        });
        let err = step.apply(&Document::new("x")).unwrap_err();
        match err {
            MigrateError::Step {
                version,
                name,
                reason,
            } => {
                assert_eq!(version, 4);
                assert_eq!(name, "broken");
                assert!(reason.contains("bad"), "reason: {reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_builtin_registry_is_ordered() {
        let registry = MigrationRegistry::builtin();
        let versions: Vec<u64> = registry.versions().collect();
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        assert_eq!(versions, sorted);
        assert!(registry.latest_version().is_some());
    }
}
