//! Migration chain for user profile documents.
//!
//! Append new steps at the end with the next version number. Released steps
//! must never be edited: documents already stamped past them will not see the
//! change.

mod v1_moderation_count;

use super::registry::MigrationStep;

/// All built-in steps, ascending by version.
pub(crate) fn builtin_steps() -> Vec<MigrationStep> {
    vec![MigrationStep::new(
        1,
        "moderation_count",
        v1_moderation_count::migrate,
    )]
}
