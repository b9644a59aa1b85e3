//! Metadata filter algebra for the vector-store contract.
//!
//! [`Filter`] is behavioral: the in-repo stores evaluate it directly
//! against stored payloads, while remote adapters serialize it with
//! [`Filter::to_expr`] using `$eq`/`$ne`/`$in`/`$contains`/`$and`/`$or`
//! operators. Stores without native array containment get an `$in`
//! membership fallback, paired with the `|`-joined string twins the writer
//! persists for every array field.

use serde_json::{json, Value};

/// What the configured store backend can evaluate natively.
#[derive(Debug, Clone, Copy)]
pub struct StoreCapabilities {
    /// Whether `$contains` over array fields is supported.
    pub array_contains: bool,
}

impl Default for StoreCapabilities {
    fn default() -> Self {
        Self {
            array_contains: true,
        }
    }
}

/// A metadata filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Scalar equality.
    Eq(String, Value),
    /// Scalar inequality. A missing field counts as not-equal.
    Ne(String, Value),
    /// Scalar membership.
    In(String, Vec<Value>),
    /// Array containment: the stored array includes the value.
    Contains(String, Value),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::Eq(field.to_string(), value.into())
    }

    pub fn contains(field: &str, value: impl Into<Value>) -> Self {
        Self::Contains(field.to_string(), value.into())
    }

    /// Conjunction that collapses trivial shapes: empty → `None`, a single
    /// clause → the clause itself.
    pub fn all(mut clauses: Vec<Filter>) -> Option<Filter> {
        match clauses.len() {
            0 => None,
            1 => clauses.pop(),
            _ => Some(Filter::And(clauses)),
        }
    }

    /// Disjunction with the same collapsing rules as [`Filter::all`].
    pub fn any(mut clauses: Vec<Filter>) -> Option<Filter> {
        match clauses.len() {
            0 => None,
            1 => clauses.pop(),
            _ => Some(Filter::Or(clauses)),
        }
    }

    /// Evaluate against a stored payload object.
    pub fn matches(&self, payload: &Value) -> bool {
        match self {
            Filter::Eq(field, value) => payload.get(field) == Some(value),
            Filter::Ne(field, value) => payload.get(field) != Some(value),
            Filter::In(field, values) => payload
                .get(field)
                .is_some_and(|stored| values.iter().any(|v| v == stored)),
            Filter::Contains(field, value) => match payload.get(field) {
                Some(Value::Array(items)) => items.iter().any(|item| item == value),
                // Joined-string twin fallback: "|a|b|" contains "|a|".
                Some(Value::String(joined)) => value
                    .as_str()
                    .is_some_and(|v| joined.contains(&format!("|{v}|"))),
                _ => false,
            },
            Filter::And(clauses) => clauses.iter().all(|c| c.matches(payload)),
            Filter::Or(clauses) => clauses.iter().any(|c| c.matches(payload)),
        }
    }

    /// Serialize for a remote store, honoring its capability set.
    pub fn to_expr(&self, caps: &StoreCapabilities) -> Value {
        match self {
            Filter::Eq(field, value) => json!({ field: { "$eq": value } }),
            Filter::Ne(field, value) => json!({ field: { "$ne": value } }),
            Filter::In(field, values) => json!({ field: { "$in": values } }),
            Filter::Contains(field, value) => {
                if caps.array_contains {
                    json!({ field: { "$contains": value } })
                } else {
                    // Membership fallback: stores without $contains treat
                    // $in over an array-valued field as intersection.
                    json!({ field: { "$in": [value] } })
                }
            }
            Filter::And(clauses) => {
                json!({ "$and": clauses.iter().map(|c| c.to_expr(caps)).collect::<Vec<_>>() })
            }
            Filter::Or(clauses) => {
                json!({ "$or": clauses.iter().map(|c| c.to_expr(caps)).collect::<Vec<_>>() })
            }
        }
    }
}
