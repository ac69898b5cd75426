//! Object-listing query descriptors.
//!
//! A [`Query`] is scoped to exactly one object type and is immutable once
//! built; callers share it behind an `Arc`.

use serde::{Deserialize, Serialize};

/// Comparison applied by a [`QueryFilter::Field`] node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    Equals,
    StartsWith,
    Contains,
}

/// Server-evaluated predicate narrowing a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryFilter {
    /// Compare a named field against a literal.
    Field {
        name: String,
        op: Comparator,
        value: String,
    },
    /// Match only objects whose inactive flag equals the given value.
    Inactive(bool),
    And(Vec<QueryFilter>),
    Not(Box<QueryFilter>),
}

/// Descriptor of one object-listing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub type_id: u16,
    pub filter: Option<QueryFilter>,
    pub include_non_editable: bool,
}

impl Query {
    /// Every instance of the type the session may see.
    pub fn all(type_id: u16) -> Self {
        Self {
            type_id,
            filter: None,
            include_non_editable: true,
        }
    }

    /// Only the instances the session may edit.
    pub fn editable(type_id: u16) -> Self {
        Self {
            type_id,
            filter: None,
            include_non_editable: false,
        }
    }

    /// Return a copy narrowed by `filter`, combined with any existing filter.
    pub fn with_filter(mut self, filter: QueryFilter) -> Self {
        self.filter = Some(match self.filter.take() {
            None => filter,
            Some(QueryFilter::And(mut parts)) => {
                parts.push(filter);
                QueryFilter::And(parts)
            }
            Some(existing) => QueryFilter::And(vec![existing, filter]),
        });
        self
    }
}
