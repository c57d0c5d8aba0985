use std::cmp::Ordering;

use serde::Serialize;

use crate::core::Value;
use crate::key::Key;

/// Pseudo-column addressing the entity key itself in filters and
/// property masks.
pub const KEY_PSEUDO_COLUMN: &str = "__key__";

/// Attribute name the result processor injects the terminal identifier
/// under, and which write paths strip back out before hitting the wire.
pub const ID_COLUMN: &str = "id";

/// Comparison operators the store supports. This is the whole filter
/// grammar: IN, OR and nested trees are not representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Operator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
        }
    }

    /// Whether a comparison outcome satisfies this operator.
    pub fn matches(&self, ordering: Ordering) -> bool {
        match self {
            Self::Equal => ordering == Ordering::Equal,
            Self::NotEqual => ordering != Ordering::Equal,
            Self::LessThan => ordering == Ordering::Less,
            Self::LessThanOrEqual => ordering != Ordering::Greater,
            Self::GreaterThan => ordering == Ordering::Greater,
            Self::GreaterThanOrEqual => ordering != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

/// A single `(column, operator, value)` filter clause.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Filter {
    pub column: String,
    pub operator: Operator,
    pub value: Value,
}

/// A single `(column, direction)` sort clause.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    pub column: String,
    pub direction: Direction,
}

/// Distinct handling for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub enum Distinct {
    #[default]
    Off,
    /// Distinct over the query's projected columns; a caller error when
    /// the projection is empty.
    OnProjection,
    /// Distinct over an explicit column list.
    On(Vec<String>),
}

/// Everything one query execution needs, accumulated by the fluent
/// builder and frozen at execution time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuerySpec {
    pub kind: String,
    pub namespace: Option<String>,
    pub ancestor: Option<Key>,
    pub columns: Vec<String>,
    pub keys_only: bool,
    pub distinct: Distinct,
    pub filters: Vec<Filter>,
    pub orders: Vec<Order>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub start_cursor: Option<String>,
}

impl QuerySpec {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            namespace: None,
            ancestor: None,
            columns: Vec::new(),
            keys_only: false,
            distinct: Distinct::Off,
            filters: Vec::new(),
            orders: Vec::new(),
            limit: None,
            offset: 0,
            start_cursor: None,
        }
    }
}

/// Resolve a caller-facing column list into a property mask: `*`
/// anywhere clears the projection entirely, and the injected `id`
/// attribute is never a storable property.
pub(crate) fn normalize_columns(columns: &[String]) -> Vec<String> {
    if columns.iter().any(|c| c == "*") {
        return Vec::new();
    }
    columns
        .iter()
        .filter(|c| c.as_str() != ID_COLUMN)
        .cloned()
        .collect()
}
