//! # Queries
//!
//! Filters, orders and pagination used by collection loaders and sources.
//!
//! The JSON form accepted by [`Query::from_value`] is the same one used in
//! collection loader configuration:
//!
//! ```json
//! {
//!     "filters": [{ "property": "active", "value": true }],
//!     "orders": [{ "property": "position", "mode": "asc" }],
//!     "pagination": { "page": 1, "num_per_page": 20 }
//! }
//! ```

use crate::types::CharcoalError;
use serde_json::Value;
use std::fmt;

// =============================================================================
// FILTERS
// =============================================================================

/// Comparison operator of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    NotLike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl Operator {
    /// Parse an SQL-style operator (case-insensitive).
    pub fn parse(raw: &str) -> Result<Self, CharcoalError> {
        let op = match raw.trim().to_ascii_uppercase().as_str() {
            "=" | "==" => Self::Eq,
            "!=" | "<>" => Self::NotEq,
            "<" => Self::Lt,
            "<=" => Self::Lte,
            ">" => Self::Gt,
            ">=" => Self::Gte,
            "LIKE" => Self::Like,
            "NOT LIKE" => Self::NotLike,
            "IN" => Self::In,
            "NOT IN" => Self::NotIn,
            "IS NULL" => Self::IsNull,
            "IS NOT NULL" => Self::IsNotNull,
            other => {
                return Err(CharcoalError::InvalidQuery(format!(
                    "unsupported operator \"{}\"",
                    other
                )));
            }
        };
        Ok(op)
    }

    /// Whether the operator ignores the filter value.
    #[must_use]
    pub fn is_unary(self) -> bool {
        matches!(self, Self::IsNull | Self::IsNotNull)
    }

    /// Whether the operator expects a list value.
    #[must_use]
    pub fn is_list(self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
        })
    }
}

/// How a filter joins the filters before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Conjunction {
    #[default]
    And,
    Or,
}

impl fmt::Display for Conjunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::And => "AND",
            Self::Or => "OR",
        })
    }
}

/// One `property operator value` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub property: String,
    pub operator: Operator,
    pub value: Value,
    pub conjunction: Conjunction,
}

impl Filter {
    /// An `AND`-joined filter.
    pub fn new(property: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            property: property.into(),
            operator,
            value,
            conjunction: Conjunction::And,
        }
    }

    /// Shortcut for an equality filter.
    pub fn eq(property: impl Into<String>, value: Value) -> Self {
        Self::new(property, Operator::Eq, value)
    }

    /// Join with `OR` instead of `AND`.
    #[must_use]
    pub fn or(mut self) -> Self {
        self.conjunction = Conjunction::Or;
        self
    }

    /// Parse the JSON form.
    pub fn from_value(raw: &Value) -> Result<Self, CharcoalError> {
        let property = raw
            .get("property")
            .and_then(Value::as_str)
            .ok_or_else(|| CharcoalError::InvalidQuery("filter has no property".to_string()))?;
        let operator = match raw.get("operator").and_then(Value::as_str) {
            Some(op) => Operator::parse(op)?,
            None => Operator::Eq,
        };
        let conjunction = match raw.get("conjunction").and_then(Value::as_str) {
            Some(c) if c.eq_ignore_ascii_case("or") => Conjunction::Or,
            Some(c) if c.eq_ignore_ascii_case("and") => Conjunction::And,
            Some(c) => {
                return Err(CharcoalError::InvalidQuery(format!(
                    "unsupported conjunction \"{}\"",
                    c
                )));
            }
            None => Conjunction::And,
        };
        let filter = Self {
            property: property.to_string(),
            operator,
            value: raw.get("value").cloned().unwrap_or(Value::Null),
            conjunction,
        };
        filter.validate()?;
        Ok(filter)
    }

    /// Check that the value fits the operator.
    pub fn validate(&self) -> Result<(), CharcoalError> {
        if self.property.trim().is_empty() {
            return Err(CharcoalError::InvalidQuery(
                "filter property is empty".to_string(),
            ));
        }
        if self.operator.is_list() && !self.value.is_array() {
            return Err(CharcoalError::InvalidQuery(format!(
                "operator {} on \"{}\" requires a list value",
                self.operator, self.property
            )));
        }
        if !self.operator.is_unary() && !self.operator.is_list() && self.value.is_null() {
            return Err(CharcoalError::InvalidQuery(format!(
                "filter on \"{}\" has a null value; use IS NULL",
                self.property
            )));
        }
        Ok(())
    }
}

// =============================================================================
// ORDERS
// =============================================================================

/// Sort direction, or an explicit value sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderMode {
    Asc,
    Desc,
    /// Rows whose value appears earlier in the list sort first. Rows with
    /// values outside the list sort before all listed values, as MySQL's
    /// `FIELD()` does.
    Values(Vec<Value>),
}

/// One ordering clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub property: String,
    pub mode: OrderMode,
}

impl Order {
    /// Ascending order.
    pub fn asc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            mode: OrderMode::Asc,
        }
    }

    /// Descending order.
    pub fn desc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            mode: OrderMode::Desc,
        }
    }

    /// Parse the JSON form.
    pub fn from_value(raw: &Value) -> Result<Self, CharcoalError> {
        let property = raw
            .get("property")
            .and_then(Value::as_str)
            .ok_or_else(|| CharcoalError::InvalidQuery("order has no property".to_string()))?;
        let mode = match raw.get("mode").and_then(Value::as_str).unwrap_or("asc") {
            m if m.eq_ignore_ascii_case("asc") => OrderMode::Asc,
            m if m.eq_ignore_ascii_case("desc") => OrderMode::Desc,
            m if m.eq_ignore_ascii_case("values") => match raw.get("values") {
                Some(Value::Array(values)) if !values.is_empty() => OrderMode::Values(values.clone()),
                _ => {
                    return Err(CharcoalError::InvalidQuery(format!(
                        "order on \"{}\" with mode values requires a non-empty list",
                        property
                    )));
                }
            },
            other => {
                return Err(CharcoalError::InvalidQuery(format!(
                    "unsupported order mode \"{}\"",
                    other
                )));
            }
        };
        Ok(Self {
            property: property.to_string(),
            mode,
        })
    }
}

// =============================================================================
// PAGINATION
// =============================================================================

/// One-based page window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    page: u64,
    num_per_page: u64,
}

impl Pagination {
    /// Create a page window; both values must be at least 1.
    pub fn new(page: u64, num_per_page: u64) -> Result<Self, CharcoalError> {
        if page == 0 || num_per_page == 0 {
            return Err(CharcoalError::InvalidQuery(
                "page and num_per_page must be at least 1".to_string(),
            ));
        }
        Ok(Self { page, num_per_page })
    }

    /// Current page (one-based).
    #[must_use]
    pub fn page(&self) -> u64 {
        self.page
    }

    /// Page size.
    #[must_use]
    pub fn num_per_page(&self) -> u64 {
        self.num_per_page
    }

    /// Rows skipped before this page.
    #[must_use]
    pub fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.num_per_page)
    }

    /// Parse the JSON form.
    pub fn from_value(raw: &Value) -> Result<Self, CharcoalError> {
        let page = raw.get("page").and_then(Value::as_u64).unwrap_or(1);
        let per_page = raw
            .get("num_per_page")
            .and_then(Value::as_u64)
            .ok_or_else(|| CharcoalError::InvalidQuery("pagination has no num_per_page".to_string()))?;
        Self::new(page, per_page)
    }
}

// =============================================================================
// QUERY
// =============================================================================

/// Filters, orders and pagination of one selection.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub orders: Vec<Order>,
    pub pagination: Option<Pagination>,
}

impl Query {
    /// An unfiltered, unordered query.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add an order.
    #[must_use]
    pub fn order(mut self, order: Order) -> Self {
        self.orders.push(order);
        self
    }

    /// Restrict to one page.
    #[must_use]
    pub fn paginate(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    /// Row window selected by the pagination: `(offset, limit)`.
    #[must_use]
    pub fn window(&self) -> (u64, Option<u64>) {
        match &self.pagination {
            Some(p) => (p.offset(), Some(p.num_per_page())),
            None => (0, None),
        }
    }

    /// Parse the JSON form.
    pub fn from_value(raw: &Value) -> Result<Self, CharcoalError> {
        let list = |key: &str| -> Result<Vec<Value>, CharcoalError> {
            match raw.get(key) {
                None | Some(Value::Null) => Ok(Vec::new()),
                Some(Value::Array(items)) => Ok(items.clone()),
                Some(_) => Err(CharcoalError::InvalidQuery(format!("\"{}\" must be a list", key))),
            }
        };

        let filters = list("filters")?
            .iter()
            .map(Filter::from_value)
            .collect::<Result<Vec<_>, _>>()?;
        let orders = list("orders")?
            .iter()
            .map(Order::from_value)
            .collect::<Result<Vec<_>, _>>()?;
        let pagination = match raw.get("pagination") {
            None | Some(Value::Null) => None,
            Some(p) => Some(Pagination::from_value(p)?),
        };

        Ok(Self {
            filters,
            orders,
            pagination,
        })
    }
}
