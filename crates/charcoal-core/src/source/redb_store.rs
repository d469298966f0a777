//! # redb-backed Connection
//!
//! A persistent relational store on top of the redb embedded database.
//!
//! Every table of the schema shares three redb tables:
//! - `schemas`: table name -> postcard `TableSchema`
//! - `rows`: (table name, row id) -> postcard `Row`
//! - `keys`: (table name, primary key) -> row id
//!
//! Each statement runs in its own redb transaction, so a failed insert or
//! update leaves nothing behind.

use super::connection::{
    count_row, duplicate_key, missing_table, referenced_columns, select_rows, Connection,
    ExecResult, TableSchema,
};
use super::statement::{ColumnDef, Statement};
use super::value::{Row, SqlValue};
use crate::types::CharcoalError;
use redb::{Database, ReadableDatabase, ReadableTable, Table, TableDefinition, WriteTransaction};
use std::cmp::Ordering;
use std::path::Path;

/// Table for schemas: table name -> serialized TableSchema
const SCHEMAS: TableDefinition<&str, &[u8]> = TableDefinition::new("schemas");

/// Table for rows: (table name, row id) -> serialized Row
const ROWS: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("rows");

/// Primary key index: (table name, key string) -> row id
const KEYS: TableDefinition<(&str, &str), u64> = TableDefinition::new("keys");

fn db_err(e: impl std::fmt::Display) -> CharcoalError {
    CharcoalError::Persistence(e.to_string())
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, CharcoalError> {
    postcard::to_allocvec(value).map_err(|e| CharcoalError::Serialization(e.to_string()))
}

fn decode<'a, T: serde::Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, CharcoalError> {
    postcard::from_bytes(bytes).map_err(|e| CharcoalError::Serialization(e.to_string()))
}

/// A connection persisting every table in one redb file.
pub struct RedbConnection {
    db: Database,
}

impl std::fmt::Debug for RedbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbConnection").finish_non_exhaustive()
    }
}

impl RedbConnection {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CharcoalError> {
        let db = Database::create(path.as_ref()).map_err(|e| CharcoalError::Io(e.to_string()))?;

        // Initialize tables so readers never see them missing
        let write_txn = db.begin_write().map_err(db_err)?;
        {
            let _ = write_txn.open_table(SCHEMAS).map_err(db_err)?;
            let _ = write_txn.open_table(ROWS).map_err(db_err)?;
            let _ = write_txn.open_table(KEYS).map_err(db_err)?;
        }
        write_txn.commit().map_err(db_err)?;

        Ok(Self { db })
    }

    fn load_schema(txn: &WriteTransaction, table: &str) -> Result<Option<TableSchema>, CharcoalError> {
        let schemas = txn.open_table(SCHEMAS).map_err(db_err)?;
        let entry = schemas.get(table).map_err(db_err)?;
        match entry {
            Some(bytes) => Ok(Some(decode(bytes.value())?)),
            None => Ok(None),
        }
    }

    fn store_schema(txn: &WriteTransaction, table: &str, schema: &TableSchema) -> Result<(), CharcoalError> {
        let bytes = encode(schema)?;
        let mut schemas = txn.open_table(SCHEMAS).map_err(db_err)?;
        schemas.insert(table, bytes.as_slice()).map_err(db_err)?;
        Ok(())
    }

    /// Locate a row by `key = id`, through the key index when `key` is the
    /// primary column.
    fn find_row(
        rows: &Table<'_, (&'static str, u64), &'static [u8]>,
        keys: &Table<'_, (&'static str, &'static str), u64>,
        schema: &TableSchema,
        table: &str,
        key: &str,
        id: &SqlValue,
    ) -> Result<Option<(u64, Row)>, CharcoalError> {
        if schema.primary().is_some_and(|p| p.name == key) {
            let key_string = id.key_string();
            let Some(rowid) = keys.get((table, key_string.as_str())).map_err(db_err)?.map(|v| v.value()) else {
                return Ok(None);
            };
            return match rows.get((table, rowid)).map_err(db_err)? {
                Some(bytes) => Ok(Some((rowid, decode(bytes.value())?))),
                None => Ok(None),
            };
        }

        for entry in rows.range((table, 0u64)..=(table, u64::MAX)).map_err(db_err)? {
            let (k, bytes) = entry.map_err(db_err)?;
            let row: Row = decode(bytes.value())?;
            if row.get(key).is_some_and(|cell| cell.compare(id) == Some(Ordering::Equal)) {
                return Ok(Some((k.value().1, row)));
            }
        }
        Ok(None)
    }

    fn execute_in(txn: &WriteTransaction, statement: &Statement) -> Result<ExecResult, CharcoalError> {
        let name = statement.table();

        if let Statement::CreateTable { columns, .. } = statement {
            if Self::load_schema(txn, name)?.is_none() {
                Self::store_schema(txn, name, &TableSchema::new(name, columns.clone())?)?;
            }
            return Ok(ExecResult::default());
        }

        let mut schema = Self::load_schema(txn, name)?.ok_or_else(|| missing_table(name))?;
        let mut rows = txn.open_table(ROWS).map_err(db_err)?;
        let mut keys = txn.open_table(KEYS).map_err(db_err)?;

        let result = match statement {
            Statement::AddColumn { column, .. } => {
                schema.alter(name, column, true)?;
                if let Some(default) = &column.default {
                    let mut updated = Vec::new();
                    for entry in rows.range((name, 0u64)..=(name, u64::MAX)).map_err(db_err)? {
                        let (k, bytes) = entry.map_err(db_err)?;
                        let mut row: Row = decode(bytes.value())?;
                        row.insert(column.name.clone(), default.clone());
                        updated.push((k.value().1, encode(&row)?));
                    }
                    for (rowid, bytes) in updated {
                        rows.insert((name, rowid), bytes.as_slice()).map_err(db_err)?;
                    }
                }
                ExecResult::default()
            }
            Statement::ModifyColumn { column, .. } => {
                schema.alter(name, column, false)?;
                ExecResult::default()
            }
            Statement::Insert { values, .. } => {
                let (row, key, assigned) = schema.prepare_insert(name, values)?;
                let rowid = schema.take_rowid();
                if schema.primary().is_some() {
                    let key_string = key.key_string();
                    if keys.get((name, key_string.as_str())).map_err(db_err)?.is_some() {
                        return Err(duplicate_key(name, &key));
                    }
                    keys.insert((name, key_string.as_str()), rowid).map_err(db_err)?;
                }
                rows.insert((name, rowid), encode(&row)?.as_slice()).map_err(db_err)?;
                ExecResult {
                    affected: 1,
                    last_insert_id: assigned,
                }
            }
            Statement::Update { key, id, values, .. } => {
                schema.check_update(name, values)?;
                if values.iter().any(|(c, v)| c == key && v.compare(id) != Some(Ordering::Equal)) {
                    return Err(CharcoalError::Persistence(format!(
                        "Can not change key '{}' of a row in table '{}'",
                        key, name
                    )));
                }
                match Self::find_row(&rows, &keys, &schema, name, key, id)? {
                    Some((rowid, mut row)) => {
                        for (column, value) in values {
                            row.insert(column.clone(), value.clone());
                        }
                        rows.insert((name, rowid), encode(&row)?.as_slice()).map_err(db_err)?;
                        ExecResult {
                            affected: 1,
                            last_insert_id: None,
                        }
                    }
                    None => ExecResult::default(),
                }
            }
            Statement::Delete { key, id, .. } => {
                match Self::find_row(&rows, &keys, &schema, name, key, id)? {
                    Some((rowid, row)) => {
                        rows.remove((name, rowid)).map_err(db_err)?;
                        if let Some(primary) = schema.primary() {
                            let key_string = row.get(&primary.name).map(SqlValue::key_string).unwrap_or_default();
                            keys.remove((name, key_string.as_str())).map_err(db_err)?;
                        }
                        ExecResult {
                            affected: 1,
                            last_insert_id: None,
                        }
                    }
                    None => ExecResult::default(),
                }
            }
            Statement::Select { .. } | Statement::Count { .. } => {
                return Err(CharcoalError::Persistence(
                    "read statements must go through query()".to_string(),
                ));
            }
            Statement::CreateTable { .. } => ExecResult::default(),
        };

        Self::store_schema(txn, name, &schema)?;
        Ok(result)
    }
}

impl Connection for RedbConnection {
    fn execute(&self, statement: &Statement) -> Result<ExecResult, CharcoalError> {
        let write_txn = self.db.begin_write().map_err(db_err)?;
        // Dropping an uncommitted transaction aborts it
        let result = Self::execute_in(&write_txn, statement)?;
        write_txn.commit().map_err(db_err)?;
        Ok(result)
    }

    fn query(&self, statement: &Statement) -> Result<Vec<Row>, CharcoalError> {
        let name = statement.table();
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let schemas = read_txn.open_table(SCHEMAS).map_err(db_err)?;
        let schema: TableSchema = match schemas.get(name).map_err(db_err)? {
            Some(bytes) => decode(bytes.value())?,
            None => return Err(missing_table(name)),
        };
        let rows = read_txn.open_table(ROWS).map_err(db_err)?;
        let stream = rows
            .range((name, 0u64)..=(name, u64::MAX))
            .map_err(db_err)?
            .map(|entry| {
                let (_, bytes) = entry.map_err(db_err)?;
                decode::<Row>(bytes.value())
            });

        match statement {
            Statement::Select {
                filters,
                orders,
                limit,
                offset,
                ..
            } => {
                schema.check_columns(name, referenced_columns(filters, orders))?;
                select_rows(stream, filters, orders, *limit, *offset)
            }
            Statement::Count { filters, .. } => {
                schema.check_columns(name, referenced_columns(filters, &[]))?;
                let matched = select_rows(stream, filters, &[], None, 0)?;
                Ok(vec![count_row(matched.len())])
            }
            _ => Err(CharcoalError::Persistence(
                "write statements must go through execute()".to_string(),
            )),
        }
    }

    fn columns(&self, table: &str) -> Result<Option<Vec<ColumnDef>>, CharcoalError> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let schemas = read_txn.open_table(SCHEMAS).map_err(db_err)?;
        match schemas.get(table).map_err(db_err)? {
            Some(bytes) => Ok(Some(decode::<TableSchema>(bytes.value())?.columns)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::query::{Filter, Order};
    use crate::source::statement::SqlType;
    use serde_json::json;
    use tempfile::TempDir;

    fn create(conn: &RedbConnection) {
        let mut id = ColumnDef::new("id", SqlType::Varchar(36));
        id.primary = true;
        id.nullable = false;
        conn.execute(&Statement::CreateTable {
            table: "users".to_string(),
            columns: vec![id, ColumnDef::new("name", SqlType::Varchar(255))],
        })
        .unwrap();
    }

    fn insert(conn: &RedbConnection, id: &str, name: &str) -> Result<ExecResult, CharcoalError> {
        conn.execute(&Statement::Insert {
            table: "users".to_string(),
            values: vec![
                ("id".to_string(), SqlValue::Text(id.to_string())),
                ("name".to_string(), SqlValue::Text(name.to_string())),
            ],
        })
    }

    fn select_all(conn: &RedbConnection) -> Vec<Row> {
        conn.query(&Statement::Select {
            table: "users".to_string(),
            filters: vec![],
            orders: vec![Order::asc("name")],
            limit: None,
            offset: 0,
        })
        .unwrap()
    }

    #[test]
    fn rows_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.redb");

        {
            let conn = RedbConnection::open(&path).unwrap();
            create(&conn);
            insert(&conn, "u1", "Bob").unwrap();
            insert(&conn, "u2", "Alice").unwrap();
        }

        let conn = RedbConnection::open(&path).unwrap();
        let rows = select_all(&conn);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], SqlValue::Text("Alice".into()));
        assert_eq!(conn.columns("users").unwrap().unwrap().len(), 2);
    }

    #[test]
    fn failed_insert_leaves_nothing_behind() {
        let temp_dir = TempDir::new().unwrap();
        let conn = RedbConnection::open(temp_dir.path().join("data.redb")).unwrap();
        create(&conn);
        insert(&conn, "u1", "Bob").unwrap();
        assert!(insert(&conn, "u1", "Bobby").is_err());
        assert_eq!(select_all(&conn).len(), 1);
    }

    #[test]
    fn update_and_delete_by_key() {
        let temp_dir = TempDir::new().unwrap();
        let conn = RedbConnection::open(temp_dir.path().join("data.redb")).unwrap();
        create(&conn);
        insert(&conn, "u1", "Bob").unwrap();

        let updated = conn
            .execute(&Statement::Update {
                table: "users".to_string(),
                key: "id".to_string(),
                id: SqlValue::Text("u1".into()),
                values: vec![("name".to_string(), SqlValue::Text("Robert".into()))],
            })
            .unwrap();
        assert_eq!(updated.affected, 1);

        let rows = conn
            .query(&Statement::Select {
                table: "users".to_string(),
                filters: vec![Filter::eq("name", json!("Robert"))],
                orders: vec![],
                limit: None,
                offset: 0,
            })
            .unwrap();
        assert_eq!(rows.len(), 1);

        conn.execute(&Statement::Delete {
            table: "users".to_string(),
            key: "id".to_string(),
            id: SqlValue::Text("u1".into()),
        })
        .unwrap();
        assert!(select_all(&conn).is_empty());

        // The key is free again
        insert(&conn, "u1", "Bob").unwrap();
    }
}
