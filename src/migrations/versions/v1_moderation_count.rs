//! v1: count completed challenges still waiting for manual approval.
//!
//! Adds `completedChallengesNeedingModeration`, the number of entries in
//! `completedChallenges` whose `isManuallyApproved` is explicitly `false`.
//! Documents without a challenge list get an empty patch and only have their
//! version advanced.

use serde_json::Value;

use crate::document::{Document, Patch};
use crate::error::Result;

pub const COMPLETED_CHALLENGES: &str = "completedChallenges";
pub const NEEDING_MODERATION: &str = "completedChallengesNeedingModeration";

pub(super) fn migrate(document: &Document) -> Result<Patch> {
    let mut patch = Patch::new();

    if let Some(Value::Array(challenges)) = document.get(COMPLETED_CHALLENGES) {
        let pending = challenges
            .iter()
            .filter(|challenge| challenge.get("isManuallyApproved") == Some(&Value::Bool(false)))
            .count();
        patch.insert(NEEDING_MODERATION.to_string(), Value::from(pending));
    }

    Ok(patch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_counts_unapproved_challenges() {
        let doc = Document::new("u1").with_field(
            COMPLETED_CHALLENGES,
            json!([
                {"id": "a", "challengeType": 1, "isManuallyApproved": false},
                {"id": "b", "challengeType": 1, "isManuallyApproved": true},
                {"id": "c", "challengeType": 2},
                {"id": "d", "challengeType": 3, "isManuallyApproved": false}
            ]),
        );

        let patch = migrate(&doc).unwrap();
        assert_eq!(patch.get(NEEDING_MODERATION), Some(&json!(2)));
    }

    #[test]
    fn test_missing_challenges_yields_empty_patch() {
        let patch = migrate(&Document::new("u1")).unwrap();
        assert!(patch.is_empty());

        let doc = Document::new("u2").with_field(COMPLETED_CHALLENGES, "not a list");
        assert!(migrate(&doc).unwrap().is_empty());
    }
}
