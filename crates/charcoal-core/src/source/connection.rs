//! # Connections
//!
//! The relational store seen by `DatabaseSource`. A connection executes
//! structured statements and reports live table columns for schema
//! reconciliation.
//!
//! This module also holds the table bookkeeping and row evaluation shared
//! by the embedded connections (`MemoryConnection`, `RedbConnection`).

use super::statement::{ColumnDef, Statement};
use super::value::{Row, SqlValue};
use crate::query::{Conjunction, Filter, Operator, Order, OrderMode};
use crate::types::CharcoalError;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Column holding the result of a `Count` statement.
pub const COUNT_COLUMN: &str = "count";

// =============================================================================
// CONNECTION TRAIT
// =============================================================================

/// Outcome of a write statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecResult {
    /// Rows inserted, updated or deleted.
    pub affected: u64,
    /// Key assigned by an auto-increment insert.
    pub last_insert_id: Option<i64>,
}

/// A relational store.
pub trait Connection: Send + Sync {
    /// Execute a schema or write statement.
    fn execute(&self, statement: &Statement) -> Result<ExecResult, CharcoalError>;

    /// Execute a `Select` or `Count` statement.
    fn query(&self, statement: &Statement) -> Result<Vec<Row>, CharcoalError>;

    /// Live columns of a table; `None` when the table does not exist.
    fn columns(&self, table: &str) -> Result<Option<Vec<ColumnDef>>, CharcoalError>;

    /// Run a `Count` statement and read its single cell.
    fn count(&self, statement: &Statement) -> Result<u64, CharcoalError> {
        let rows = self.query(statement)?;
        match rows.first().and_then(|r| r.get(COUNT_COLUMN)) {
            Some(SqlValue::Integer(n)) => Ok((*n).max(0) as u64),
            _ => Err(CharcoalError::Persistence(
                "count statement returned no count".to_string(),
            )),
        }
    }
}

// =============================================================================
// TABLE SCHEMA
// =============================================================================

/// Schema and counters of one embedded table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnDef>,
    pub next_rowid: u64,
    pub next_auto: i64,
}

impl TableSchema {
    /// A fresh table; rejects duplicate column names.
    pub fn new(table: &str, columns: Vec<ColumnDef>) -> Result<Self, CharcoalError> {
        for (i, column) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == column.name) {
                return Err(CharcoalError::Persistence(format!(
                    "Duplicate column name '{}' in table '{}'",
                    column.name, table
                )));
            }
        }
        Ok(Self {
            columns,
            next_rowid: 1,
            next_auto: 1,
        })
    }

    /// The primary key column.
    #[must_use]
    pub fn primary(&self) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.primary)
    }

    /// Fail on the first name that is not a column.
    pub fn check_columns<'a>(
        &self,
        table: &str,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), CharcoalError> {
        for name in names {
            if !self.columns.iter().any(|c| c.name == name) {
                return Err(CharcoalError::Persistence(format!(
                    "Unknown column '{}' in table '{}'",
                    name, table
                )));
            }
        }
        Ok(())
    }

    /// Apply `AddColumn` / `ModifyColumn`.
    pub fn alter(&mut self, table: &str, column: &ColumnDef, add: bool) -> Result<(), CharcoalError> {
        let existing = self.columns.iter_mut().find(|c| c.name == column.name);
        match (existing, add) {
            (None, true) => {
                self.columns.push(column.clone());
                Ok(())
            }
            (Some(slot), false) => {
                *slot = column.clone();
                Ok(())
            }
            (Some(_), true) => Err(CharcoalError::Persistence(format!(
                "Duplicate column name '{}' in table '{}'",
                column.name, table
            ))),
            (None, false) => Err(CharcoalError::Persistence(format!(
                "Unknown column '{}' in table '{}'",
                column.name, table
            ))),
        }
    }

    /// Build the stored row of an insert, assigning the auto-increment key
    /// when needed. Returns the row, its key, and the assigned id.
    pub fn prepare_insert(
        &mut self,
        table: &str,
        values: &[(String, SqlValue)],
    ) -> Result<(Row, SqlValue, Option<i64>), CharcoalError> {
        self.check_columns(table, values.iter().map(|(c, _)| c.as_str()))?;
        let mut row: Row = values.iter().cloned().collect();
        for column in &self.columns {
            if let (false, Some(default)) = (row.contains_key(&column.name), &column.default) {
                row.insert(column.name.clone(), default.clone());
            }
        }

        let Some(primary) = self.primary().cloned() else {
            return Ok((row, SqlValue::Null, None));
        };

        let mut assigned = None;
        let key = match row.get(&primary.name) {
            Some(value) if !value.is_null() => {
                if let SqlValue::Integer(i) = value {
                    if primary.auto_increment && *i >= self.next_auto {
                        self.next_auto = i.saturating_add(1);
                    }
                }
                value.clone()
            }
            _ if primary.auto_increment => {
                let id = self.next_auto;
                self.next_auto = id.saturating_add(1);
                assigned = Some(id);
                row.insert(primary.name.clone(), SqlValue::Integer(id));
                SqlValue::Integer(id)
            }
            _ => {
                return Err(CharcoalError::Persistence(format!(
                    "Field '{}' doesn't have a default value",
                    primary.name
                )));
            }
        };
        for column in self.columns.iter().filter(|c| !c.nullable && !c.auto_increment) {
            if row.get(&column.name).is_none_or(SqlValue::is_null) {
                return Err(not_null(table, &column.name));
            }
        }
        Ok((row, key, assigned))
    }

    /// Reject updates writing NULL into a `NOT NULL` column.
    pub fn check_update(&self, table: &str, values: &[(String, SqlValue)]) -> Result<(), CharcoalError> {
        self.check_columns(table, values.iter().map(|(c, _)| c.as_str()))?;
        for (name, _) in values.iter().filter(|(_, v)| v.is_null()) {
            if self.columns.iter().any(|c| &c.name == name && !c.nullable) {
                return Err(not_null(table, name));
            }
        }
        Ok(())
    }

    /// Take the next internal row id.
    pub fn take_rowid(&mut self) -> u64 {
        let id = self.next_rowid;
        self.next_rowid = id.saturating_add(1);
        id
    }
}

// =============================================================================
// ROW EVALUATION
// =============================================================================

/// Evaluate filters with SQL precedence (`AND` binds tighter than `OR`).
pub fn row_matches(row: &Row, filters: &[Filter]) -> Result<bool, CharcoalError> {
    let mut any_group = false;
    let mut group = true;
    for (i, filter) in filters.iter().enumerate() {
        if i > 0 && filter.conjunction == Conjunction::Or {
            any_group |= group;
            group = true;
        }
        if group {
            group = filter_matches(row, filter)?;
        }
    }
    Ok(any_group || group)
}

fn filter_matches(row: &Row, filter: &Filter) -> Result<bool, CharcoalError> {
    let cell = row.get(&filter.property).unwrap_or(&SqlValue::Null);
    let value = SqlValue::from_json(&filter.value);
    let ordering = || cell.compare(&value);

    let matched = match filter.operator {
        Operator::IsNull => cell.is_null(),
        Operator::IsNotNull => !cell.is_null(),
        Operator::Eq => ordering() == Some(Ordering::Equal),
        Operator::NotEq => matches!(ordering(), Some(o) if o != Ordering::Equal),
        Operator::Lt => ordering() == Some(Ordering::Less),
        Operator::Lte => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
        Operator::Gt => ordering() == Some(Ordering::Greater),
        Operator::Gte => matches!(ordering(), Some(Ordering::Greater | Ordering::Equal)),
        Operator::Like | Operator::NotLike => {
            if cell.is_null() {
                false
            } else {
                let pattern = like_regex(&value.key_string())?;
                pattern.is_match(&cell.key_string()) == (filter.operator == Operator::Like)
            }
        }
        Operator::In | Operator::NotIn => {
            if cell.is_null() {
                false
            } else {
                let listed = filter
                    .value
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .any(|v| cell.compare(&SqlValue::from_json(v)) == Some(Ordering::Equal))
                    })
                    .unwrap_or(false);
                listed == (filter.operator == Operator::In)
            }
        }
    };
    Ok(matched)
}

/// Translate a LIKE pattern (`%`, `_`) into a case-insensitive regex.
fn like_regex(pattern: &str) -> Result<Regex, CharcoalError> {
    let mut expr = String::from("^");
    for c in pattern.chars() {
        match c {
            '%' => expr.push_str(".*"),
            '_' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    RegexBuilder::new(&expr)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .map_err(|e| CharcoalError::InvalidQuery(e.to_string()))
}

/// Sort rows by the orders; NULLs sort first in ascending order.
pub fn sort_rows(rows: &mut [Row], orders: &[Order]) {
    rows.sort_by(|a, b| {
        for order in orders {
            let left = a.get(&order.property).unwrap_or(&SqlValue::Null);
            let right = b.get(&order.property).unwrap_or(&SqlValue::Null);
            let ordering = match &order.mode {
                OrderMode::Asc => null_first(left, right),
                OrderMode::Desc => null_first(left, right).reverse(),
                OrderMode::Values(values) => {
                    field_position(left, values).cmp(&field_position(right, values))
                }
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn null_first(a: &SqlValue, b: &SqlValue) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.compare(b).unwrap_or(Ordering::Equal),
    }
}

/// One-based position in the list, 0 when absent.
fn field_position(cell: &SqlValue, values: &[serde_json::Value]) -> usize {
    values
        .iter()
        .position(|v| cell.compare(&SqlValue::from_json(v)) == Some(Ordering::Equal))
        .map(|p| p.saturating_add(1))
        .unwrap_or(0)
}

/// Filter, order and window a stream of rows. Without orders the stream is
/// consumed lazily and stops once the window is full.
pub fn select_rows<I>(
    rows: I,
    filters: &[Filter],
    orders: &[Order],
    limit: Option<u64>,
    offset: u64,
) -> Result<Vec<Row>, CharcoalError>
where
    I: Iterator<Item = Result<Row, CharcoalError>>,
{
    let offset = offset as usize;
    let limit = limit.map(|l| l as usize).unwrap_or(usize::MAX);

    if orders.is_empty() {
        let mut selected = Vec::new();
        let mut skipped = 0usize;
        for row in rows {
            if selected.len() >= limit {
                break;
            }
            let row = row?;
            if !row_matches(&row, filters)? {
                continue;
            }
            if skipped < offset {
                skipped += 1;
                continue;
            }
            selected.push(row);
        }
        return Ok(selected);
    }

    let mut matched = Vec::new();
    for row in rows {
        let row = row?;
        if row_matches(&row, filters)? {
            matched.push(row);
        }
    }
    sort_rows(&mut matched, orders);
    Ok(matched.into_iter().skip(offset).take(limit).collect())
}

fn not_null(table: &str, column: &str) -> CharcoalError {
    CharcoalError::Persistence(format!(
        "Column '{}' cannot be null in table '{}'",
        column, table
    ))
}

/// Error for statements addressing a missing table.
#[must_use]
pub fn missing_table(table: &str) -> CharcoalError {
    CharcoalError::Persistence(format!("Table '{}' doesn't exist", table))
}

/// Error for an insert whose key is already taken.
#[must_use]
pub fn duplicate_key(table: &str, key: &SqlValue) -> CharcoalError {
    CharcoalError::Persistence(format!(
        "Duplicate entry '{}' for key 'PRIMARY' in table '{}'",
        key.key_string(),
        table
    ))
}

/// Columns referenced by filters and orders.
pub fn referenced_columns<'a>(
    filters: &'a [Filter],
    orders: &'a [Order],
) -> impl Iterator<Item = &'a str> {
    filters
        .iter()
        .map(|f| f.property.as_str())
        .chain(orders.iter().map(|o| o.property.as_str()))
}

/// Single-row result of a `Count` statement.
#[must_use]
pub fn count_row(count: usize) -> Row {
    let mut row = Row::new();
    row.insert(COUNT_COLUMN.to_string(), SqlValue::Integer(count as i64));
    row
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::source::statement::SqlType;
    use serde_json::json;

    fn row(pairs: &[(&str, SqlValue)]) -> Row {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let r = row(&[("a", SqlValue::Integer(1)), ("b", SqlValue::Integer(0))]);
        // a = 2 OR a = 1 AND b = 0  =>  false OR (true AND true)
        let filters = vec![
            Filter::eq("a", json!(2)),
            Filter::eq("a", json!(1)).or(),
            Filter::eq("b", json!(0)),
        ];
        assert!(row_matches(&r, &filters).unwrap());

        // a = 1 AND b = 1 OR a = 3  =>  false OR false
        let filters = vec![
            Filter::eq("a", json!(1)),
            Filter::eq("b", json!(1)),
            Filter::eq("a", json!(3)).or(),
        ];
        assert!(!row_matches(&r, &filters).unwrap());
    }

    #[test]
    fn operators() {
        let r = row(&[
            ("title", SqlValue::Text("Hello World".into())),
            ("n", SqlValue::Integer(5)),
        ]);
        let check = |f: Filter| row_matches(&r, &[f]).unwrap();

        assert!(check(Filter::new("title", Operator::Like, json!("hello%"))));
        assert!(check(Filter::new("title", Operator::NotLike, json!("%bye%"))));
        assert!(check(Filter::new("n", Operator::In, json!([1, 5]))));
        assert!(check(Filter::new("n", Operator::NotIn, json!([1, 2]))));
        assert!(check(Filter::new("n", Operator::Gte, json!(5))));
        assert!(check(Filter::new("missing", Operator::IsNull, json!(null))));
        assert!(!check(Filter::new("missing", Operator::NotEq, json!(1))));
    }

    #[test]
    fn sorts_with_values_mode() {
        let mut rows = vec![
            row(&[("k", SqlValue::Text("b".into()))]),
            row(&[("k", SqlValue::Text("z".into()))]),
            row(&[("k", SqlValue::Text("a".into()))]),
        ];
        sort_rows(
            &mut rows,
            &[Order {
                property: "k".to_string(),
                mode: OrderMode::Values(vec![json!("a"), json!("b")]),
            }],
        );
        let keys: Vec<_> = rows.iter().map(|r| r["k"].key_string()).collect();
        assert_eq!(keys, vec!["z", "a", "b"]);
    }

    #[test]
    fn auto_increment_keys() {
        let mut id = ColumnDef::new("id", SqlType::Int);
        id.primary = true;
        id.auto_increment = true;
        let mut schema = TableSchema::new("t", vec![id, ColumnDef::new("v", SqlType::Text)]).unwrap();

        let (_, key, assigned) = schema.prepare_insert("t", &[("v".to_string(), SqlValue::Null)]).unwrap();
        assert_eq!(key, SqlValue::Integer(1));
        assert_eq!(assigned, Some(1));

        schema
            .prepare_insert("t", &[("id".to_string(), SqlValue::Integer(10))])
            .unwrap();
        let (_, key, _) = schema.prepare_insert("t", &[]).unwrap();
        assert_eq!(key, SqlValue::Integer(11));

        assert!(schema.prepare_insert("t", &[("nope".to_string(), SqlValue::Null)]).is_err());
    }

    #[test]
    fn windowed_stream() {
        let rows = (1..=10).map(|i| Ok(row(&[("n", SqlValue::Integer(i))])));
        let selected = select_rows(rows, &[], &[], Some(3), 2).unwrap();
        let ns: Vec<_> = selected.iter().map(|r| r["n"].key_string()).collect();
        assert_eq!(ns, vec!["3", "4", "5"]);
    }
}
