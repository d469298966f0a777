//! In-memory connection.
//!
//! Tables live in a mutex-guarded map and vanish with the connection. Used
//! by tests and by the `memory` database backend.

use super::connection::{
    count_row, duplicate_key, missing_table, referenced_columns, select_rows, Connection,
    ExecResult, TableSchema,
};
use super::statement::{ColumnDef, Statement};
use super::value::{Row, SqlValue};
use crate::types::CharcoalError;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug)]
struct MemTable {
    schema: TableSchema,
    /// Insertion order is row id order.
    rows: BTreeMap<u64, Row>,
}

impl MemTable {
    fn find(&self, key: &str, id: &SqlValue) -> Option<u64> {
        self.rows
            .iter()
            .find(|(_, row)| {
                row.get(key)
                    .is_some_and(|cell| cell.compare(id) == Some(std::cmp::Ordering::Equal))
            })
            .map(|(rowid, _)| *rowid)
    }
}

/// A connection holding every table in memory.
#[derive(Debug, Default)]
pub struct MemoryConnection {
    tables: Mutex<BTreeMap<String, MemTable>>,
}

impl MemoryConnection {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, MemTable>>, CharcoalError> {
        self.tables
            .lock()
            .map_err(|e| CharcoalError::Persistence(format!("memory store poisoned: {}", e)))
    }
}

impl Connection for MemoryConnection {
    fn execute(&self, statement: &Statement) -> Result<ExecResult, CharcoalError> {
        let mut tables = self.lock()?;
        let name = statement.table();

        if let Statement::CreateTable { table, columns } = statement {
            if tables.contains_key(table) {
                return Ok(ExecResult::default());
            }
            let schema = TableSchema::new(table, columns.clone())?;
            tables.insert(
                table.clone(),
                MemTable {
                    schema,
                    rows: BTreeMap::new(),
                },
            );
            return Ok(ExecResult::default());
        }

        let entry = tables.get_mut(name).ok_or_else(|| missing_table(name))?;

        match statement {
            Statement::AddColumn { column, .. } => {
                entry.schema.alter(name, column, true)?;
                if let Some(default) = &column.default {
                    for row in entry.rows.values_mut() {
                        row.insert(column.name.clone(), default.clone());
                    }
                }
                Ok(ExecResult::default())
            }
            Statement::ModifyColumn { column, .. } => {
                entry.schema.alter(name, column, false)?;
                Ok(ExecResult::default())
            }
            Statement::Insert { values, .. } => {
                let (row, key, assigned) = entry.schema.prepare_insert(name, values)?;
                if let Some(primary) = entry.schema.primary() {
                    if entry.find(&primary.name, &key).is_some() {
                        return Err(duplicate_key(name, &key));
                    }
                }
                let rowid = entry.schema.take_rowid();
                entry.rows.insert(rowid, row);
                Ok(ExecResult {
                    affected: 1,
                    last_insert_id: assigned,
                })
            }
            Statement::Update { key, id, values, .. } => {
                entry.schema.check_update(name, values)?;
                if values.iter().any(|(c, v)| c == key && v.compare(id) != Some(std::cmp::Ordering::Equal)) {
                    return Err(CharcoalError::Persistence(format!(
                        "Can not change key '{}' of a row in table '{}'",
                        key, name
                    )));
                }
                let Some(rowid) = entry.find(key, id) else {
                    return Ok(ExecResult::default());
                };
                let mut affected = 0;
                if let Some(row) = entry.rows.get_mut(&rowid) {
                    for (column, value) in values {
                        row.insert(column.clone(), value.clone());
                    }
                    affected = 1;
                }
                Ok(ExecResult {
                    affected,
                    last_insert_id: None,
                })
            }
            Statement::Delete { key, id, .. } => {
                let removed = entry
                    .find(key, id)
                    .and_then(|rowid| entry.rows.remove(&rowid))
                    .is_some();
                Ok(ExecResult {
                    affected: u64::from(removed),
                    last_insert_id: None,
                })
            }
            Statement::Select { .. } | Statement::Count { .. } => Err(CharcoalError::Persistence(
                "read statements must go through query()".to_string(),
            )),
            Statement::CreateTable { .. } => Ok(ExecResult::default()),
        }
    }

    fn query(&self, statement: &Statement) -> Result<Vec<Row>, CharcoalError> {
        let tables = self.lock()?;
        let name = statement.table();
        let entry = tables.get(name).ok_or_else(|| missing_table(name))?;

        match statement {
            Statement::Select {
                filters,
                orders,
                limit,
                offset,
                ..
            } => {
                entry
                    .schema
                    .check_columns(name, referenced_columns(filters, orders))?;
                select_rows(
                    entry.rows.values().cloned().map(Ok),
                    filters,
                    orders,
                    *limit,
                    *offset,
                )
            }
            Statement::Count { filters, .. } => {
                entry.schema.check_columns(name, referenced_columns(filters, &[]))?;
                let matched = select_rows(entry.rows.values().cloned().map(Ok), filters, &[], None, 0)?;
                Ok(vec![count_row(matched.len())])
            }
            _ => Err(CharcoalError::Persistence(
                "write statements must go through execute()".to_string(),
            )),
        }
    }

    fn columns(&self, table: &str) -> Result<Option<Vec<ColumnDef>>, CharcoalError> {
        Ok(self.lock()?.get(table).map(|t| t.schema.columns.clone()))
    }
}
