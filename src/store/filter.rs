//! Backend-neutral predicate language for store lookups.
//!
//! `id` and `version` address the typed members of a [`Document`]; any other
//! name addresses a top-level open field. The `version` member always has a
//! value for comparisons (unversioned documents compare as 0) but counts as
//! absent for [`Filter::Absent`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{Document, ID_FIELD, UNVERSIONED, VERSION_FIELD};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    /// Matches every document.
    #[default]
    All,
    Eq(String, Value),
    /// Numeric less-than. Never matches a missing or non-numeric field.
    Lt(String, i64),
    Absent(String),
    /// Conjunction; empty matches everything.
    And(Vec<Filter>),
    /// Disjunction; empty matches nothing.
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn lt(field: impl Into<String>, value: i64) -> Self {
        Filter::Lt(field.into(), value)
    }

    pub fn absent(field: impl Into<String>) -> Self {
        Filter::Absent(field.into())
    }

    /// Point lookup by identity key.
    pub fn id(id: impl Into<String>) -> Self {
        Filter::Eq(ID_FIELD.to_string(), Value::String(id.into()))
    }

    /// Documents stamped below `version`, including unversioned ones.
    pub fn below_version(version: u64) -> Self {
        Filter::Or(vec![
            Filter::Lt(VERSION_FIELD.to_string(), clamp_version(version)),
            Filter::Absent(VERSION_FIELD.to_string()),
        ])
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut parts) => {
                parts.push(other);
                Filter::And(parts)
            }
            this => Filter::And(vec![this, other]),
        }
    }

    pub fn or(self, other: Filter) -> Self {
        match self {
            Filter::Or(mut parts) => {
                parts.push(other);
                Filter::Or(parts)
            }
            this => Filter::Or(vec![this, other]),
        }
    }

    /// Evaluates the predicate against an in-memory document.
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, expected) if field == VERSION_FIELD => {
                expected.as_u64() == Some(document.version())
            }
            Filter::Eq(field, expected) => document
                .field_value(field)
                .is_some_and(|actual| values_equal(&actual, expected)),
            Filter::Lt(field, bound) if field == VERSION_FIELD => {
                i128::from(document.version()) < i128::from(*bound)
            }
            Filter::Lt(field, bound) => document
                .field_value(field)
                .and_then(|actual| actual.as_f64())
                .is_some_and(|actual| actual < *bound as f64),
            Filter::Absent(field) if field == VERSION_FIELD => {
                document.version() == UNVERSIONED
            }
            Filter::Absent(field) => document.field_value(field).is_none(),
            Filter::And(parts) => parts.iter().all(|part| part.matches(document)),
            Filter::Or(parts) => parts.iter().any(|part| part.matches(document)),
        }
    }
}

fn clamp_version(version: u64) -> i64 {
    i64::try_from(version).unwrap_or(i64::MAX)
}

/// JSON equality that treats `1` and `1.0` as the same number.
fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => a.as_f64() == b.as_f64(),
        },
        _ => actual == expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Document {
        Document::new("u1")
            .with_field("name", "ada")
            .with_field("score", 7)
            .with_field("nothing", Value::Null)
    }

    #[test]
    fn test_eq_on_open_and_typed_fields() {
        assert!(Filter::eq("name", "ada").matches(&doc()));
        assert!(!Filter::eq("name", "bob").matches(&doc()));
        assert!(Filter::id("u1").matches(&doc()));
        assert!(Filter::eq("score", json!(7.0)).matches(&doc()));
        assert!(Filter::eq("version", 0).matches(&doc()));
    }

    #[test]
    fn test_lt_ignores_missing_and_non_numeric_fields() {
        assert!(Filter::lt("score", 8).matches(&doc()));
        assert!(!Filter::lt("score", 7).matches(&doc()));
        assert!(!Filter::lt("missing", 100).matches(&doc()));
        assert!(!Filter::lt("name", 100).matches(&doc()));
    }

    #[test]
    fn test_absent_distinguishes_null_from_missing() {
        assert!(Filter::absent("missing").matches(&doc()));
        assert!(!Filter::absent("nothing").matches(&doc()));
        assert!(!Filter::absent("id").matches(&doc()));
    }

    #[test]
    fn test_below_version_matches_unversioned_and_older() {
        let filter = Filter::below_version(2);
        assert!(filter.matches(&doc()));
        assert!(filter.matches(&doc().with_version(1)));
        assert!(!filter.matches(&doc().with_version(2)));
        assert!(!filter.matches(&doc().with_version(3)));
    }

    #[test]
    fn test_empty_connectives() {
        assert!(Filter::And(vec![]).matches(&doc()));
        assert!(!Filter::Or(vec![]).matches(&doc()));
    }

    #[test]
    fn test_combinators_flatten() {
        let filter = Filter::eq("a", 1).or(Filter::eq("b", 2)).or(Filter::eq("c", 3));
        match filter {
            Filter::Or(parts) => assert_eq!(parts.len(), 3),
            other => panic!("unexpected filter: {other:?}"),
        }
    }
}
