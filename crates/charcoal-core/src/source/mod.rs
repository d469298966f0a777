//! # Sources
//!
//! Persistence for models. A `Source` maps a model's property bag to rows
//! of one storage table and back, and reconciles that table with the
//! metadata's declared properties.
//!
//! ## Column Mapping
//!
//! | Property                      | Column(s)                         |
//! |-------------------------------|-----------------------------------|
//! | key                           | primary key, typed by key mode    |
//! | `l10n`                        | `<ident>_<lang>` per language     |
//! | `multiple`                    | `TEXT`, JSON array                |
//! | `structure`                   | `LONGTEXT`, JSON document         |
//! | `storable: false`             | none                              |
//!
//! Reconciliation is additive: missing columns are added and narrower
//! columns widened. Nothing is ever dropped.
//!
//! Errors from the connection surface unchanged. Nothing here retries.

pub mod connection;
pub mod memory;
pub mod redb_store;
pub mod statement;
pub mod value;

pub use connection::{Connection, ExecResult};
pub use memory::MemoryConnection;
pub use redb_store::RedbConnection;
pub use statement::{ColumnDef, SqlType, Statement};
pub use value::{Row, SqlValue};

use crate::metadata::{truthy, KeyMode, Metadata, PropertyDescriptor, PropertyType};
use crate::query::{Filter, Order, Query};
use crate::translation::{Locales, Translation};
use crate::types::{CharcoalError, Data};
use chrono::Utc;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// SOURCE TRAIT
// =============================================================================

/// Storage of one model type.
pub trait Source: Send + Sync + fmt::Debug {
    /// Metadata of the stored type.
    fn metadata(&self) -> &Arc<Metadata>;

    /// Storage table.
    fn table(&self) -> &str;

    /// Fetch one item by primary key.
    fn load_item(&self, id: &Value) -> Result<Option<Data>, CharcoalError> {
        let key = self.metadata().key();
        self.load_item_by(&key, id)
    }

    /// Fetch the first item whose `property` equals `value`.
    fn load_item_by(&self, property: &str, value: &Value) -> Result<Option<Data>, CharcoalError>;

    /// Fetch raw rows matching the query's filters and orders, within an
    /// explicit window. The query's own pagination is ignored.
    fn load_rows(&self, query: &Query, offset: u64, limit: Option<u64>) -> Result<Vec<Row>, CharcoalError>;

    /// Turn a raw row into a property bag.
    fn hydrate(&self, row: &Row) -> Data;

    /// Fetch every item selected by the query, including its pagination.
    fn load_items(&self, query: &Query) -> Result<Vec<Data>, CharcoalError> {
        let (offset, limit) = query.window();
        Ok(self
            .load_rows(query, offset, limit)?
            .iter()
            .map(|row| self.hydrate(row))
            .collect())
    }

    /// Count items matching the query's filters.
    fn count_items(&self, query: &Query) -> Result<u64, CharcoalError>;

    /// Insert a new item and return its key.
    fn save_item(&self, data: &Data) -> Result<Value, CharcoalError>;

    /// Update the item stored under `id`. Only `properties` are written
    /// when given. Returns whether a row was changed.
    ///
    /// Fails when `data` carries a key different from `id`.
    fn update_item(
        &self,
        id: &Value,
        data: &Data,
        properties: Option<&[String]>,
    ) -> Result<bool, CharcoalError>;

    /// Delete the item stored under `id`. Returns whether a row was removed.
    fn delete_item(&self, id: &Value) -> Result<bool, CharcoalError>;

    /// Whether the storage table exists.
    fn table_exists(&self) -> Result<bool, CharcoalError>;

    /// Create the storage table if missing. Returns the executed statements.
    fn create_table(&self) -> Result<Vec<Statement>, CharcoalError>;

    /// Add missing columns and widen narrower ones. Returns the executed
    /// statements.
    fn alter_table(&self) -> Result<Vec<Statement>, CharcoalError>;

    /// Create or alter the storage table, whichever applies.
    fn create_or_alter(&self) -> Result<Vec<Statement>, CharcoalError> {
        if self.table_exists()? {
            self.alter_table()
        } else {
            self.create_table()
        }
    }
}

// =============================================================================
// DATABASE SOURCE
// =============================================================================

/// Column of one language of a localized property.
#[must_use]
pub fn l10n_column(ident: &str, lang: &str) -> String {
    format!("{}_{}", ident, lang)
}

/// Time-based unique id: 8 hex digits of seconds, 5 of microseconds.
#[must_use]
pub fn uniqid() -> String {
    let now = Utc::now();
    format!("{:08x}{:05x}", now.timestamp(), now.timestamp_subsec_micros())
}

fn same_key(a: &Value, b: &Value) -> bool {
    SqlValue::from_json(a).compare(&SqlValue::from_json(b)) == Some(Ordering::Equal)
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Column type of a non-key property.
fn column_type(prop: &PropertyDescriptor) -> SqlType {
    if prop.multiple {
        return SqlType::Text;
    }
    match prop.kind {
        PropertyType::String
        | PropertyType::Url
        | PropertyType::Email
        | PropertyType::Choice
        | PropertyType::Object
        | PropertyType::Id => match prop.max_length {
            None => SqlType::Varchar(255),
            Some(n) if n <= 16_383 => SqlType::Varchar(u32::try_from(n.max(1)).unwrap_or(255)),
            Some(n) if n <= 65_535 => SqlType::Text,
            Some(_) => SqlType::LongText,
        },
        PropertyType::Text | PropertyType::Html => SqlType::Text,
        PropertyType::Structure => SqlType::LongText,
        PropertyType::Integer => SqlType::Int,
        PropertyType::Number => SqlType::Double,
        PropertyType::Boolean => SqlType::TinyInt,
        PropertyType::DateTime => SqlType::DateTime,
    }
}

/// A `Source` over a relational `Connection`.
pub struct DatabaseSource {
    connection: Arc<dyn Connection>,
    metadata: Arc<Metadata>,
    locales: Locales,
    table: String,
}

impl fmt::Debug for DatabaseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseSource")
            .field("table", &self.table)
            .field("ident", &self.metadata.ident())
            .finish_non_exhaustive()
    }
}

impl DatabaseSource {
    /// Bind metadata to a connection. Fails when no table can be derived.
    pub fn new(
        connection: Arc<dyn Connection>,
        metadata: Arc<Metadata>,
        locales: Locales,
    ) -> Result<Self, CharcoalError> {
        let table = metadata.table().ok_or_else(|| {
            CharcoalError::Config("metadata declares no table and has no ident".to_string())
        })?;
        Ok(Self {
            connection,
            metadata,
            locales,
            table,
        })
    }

    /// The underlying connection.
    #[must_use]
    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// Locales used for localized columns.
    #[must_use]
    pub fn locales(&self) -> &Locales {
        &self.locales
    }

    fn key_property(&self) -> Option<PropertyDescriptor> {
        self.metadata.property(&self.metadata.key())
    }

    fn key_column(&self) -> ColumnDef {
        let prop = self.key_property();
        let (sql_type, auto_increment) = match &prop {
            None => (SqlType::Int, true),
            Some(p) => match p.mode {
                KeyMode::Uuid => (SqlType::Varchar(36), false),
                KeyMode::Uniqid => (SqlType::Varchar(13), false),
                KeyMode::AutoIncrement
                    if matches!(p.kind, PropertyType::Id | PropertyType::Integer) =>
                {
                    (SqlType::Int, true)
                }
                KeyMode::AutoIncrement => (column_type(p), false),
            },
        };
        ColumnDef {
            name: self.metadata.key(),
            sql_type,
            nullable: false,
            primary: true,
            auto_increment,
            default: None,
        }
    }

    /// Columns the metadata asks for, key first.
    #[must_use]
    pub fn expected_columns(&self) -> Vec<ColumnDef> {
        let key = self.metadata.key();
        let mut columns = vec![self.key_column()];
        for prop in self.metadata.properties() {
            if prop.storable && prop.ident != key {
                columns.extend(self.property_columns(&prop));
            }
        }
        columns
    }

    fn property_columns(&self, prop: &PropertyDescriptor) -> Vec<ColumnDef> {
        let sql_type = column_type(prop);
        if prop.l10n {
            return self
                .locales
                .languages
                .iter()
                .map(|lang| ColumnDef::new(l10n_column(&prop.ident, lang), sql_type))
                .collect();
        }
        let mut column = ColumnDef::new(prop.ident.clone(), sql_type);
        column.nullable = prop.allow_null;
        column.default = prop
            .default
            .as_ref()
            .filter(|d| !d.is_null() && !prop.multiple)
            .map(|d| Self::cell(prop, d));
        vec![column]
    }

    /// Storage cell of a non-localized value.
    fn cell(prop: &PropertyDescriptor, value: &Value) -> SqlValue {
        match prop.coerce(value.clone()) {
            Value::Null => SqlValue::Null,
            v if prop.kind == PropertyType::Boolean && !prop.multiple => SqlValue::Boolean(truthy(&v)),
            v => SqlValue::from_json(&v),
        }
    }

    /// Storage cells of one property value.
    fn cells(&self, prop: &PropertyDescriptor, value: &Value) -> Vec<(String, SqlValue)> {
        if prop.l10n {
            let translation = Translation::from_value(value, &self.locales);
            return self
                .locales
                .languages
                .iter()
                .map(|lang| {
                    let cell = translation
                        .get(lang)
                        .map_or(SqlValue::Null, |text| SqlValue::Text(text.to_string()));
                    (l10n_column(&prop.ident, lang), cell)
                })
                .collect();
        }
        vec![(prop.ident.clone(), Self::cell(prop, value))]
    }

    /// Property value of one stored cell.
    fn value(prop: &PropertyDescriptor, cell: &SqlValue) -> Value {
        match cell {
            SqlValue::Null => Value::Null,
            SqlValue::Text(s) if prop.multiple || prop.kind == PropertyType::Structure => {
                serde_json::from_str(s).unwrap_or_else(|_| prop.coerce(Value::String(s.clone())))
            }
            other => prop.coerce(other.to_json()),
        }
    }

    /// Column addressed by a property in filters and orders. Localized
    /// properties address the active language.
    fn column_for(&self, property: &str) -> String {
        match self.metadata.property(property) {
            Some(prop) if prop.l10n => l10n_column(property, &self.locales.current),
            _ => property.to_string(),
        }
    }

    fn map_filters(&self, filters: &[Filter]) -> Vec<Filter> {
        filters
            .iter()
            .map(|filter| {
                let mut mapped = filter.clone();
                mapped.property = self.column_for(&filter.property);
                if let Some(prop) = self.metadata.property(&filter.property) {
                    if !prop.l10n && !prop.multiple {
                        mapped.value = match &filter.value {
                            Value::Array(items) => Value::Array(
                                items.iter().map(|v| prop.coerce_scalar(v.clone())).collect(),
                            ),
                            v if filter.operator.is_unary() => v.clone(),
                            v => prop.coerce_scalar(v.clone()),
                        };
                    }
                }
                mapped
            })
            .collect()
    }

    fn map_orders(&self, orders: &[Order]) -> Vec<Order> {
        orders
            .iter()
            .map(|order| Order {
                property: self.column_for(&order.property),
                mode: order.mode.clone(),
            })
            .collect()
    }

    fn run(&self, statement: &Statement) -> Result<ExecResult, CharcoalError> {
        tracing::debug!("{}", statement);
        self.connection.execute(statement)
    }

    fn select(&self, statement: &Statement) -> Result<Vec<Row>, CharcoalError> {
        tracing::debug!("{}", statement);
        self.connection.query(statement)
    }

    fn generate_key(&self) -> Option<Value> {
        match self.key_property().map(|p| p.mode) {
            Some(KeyMode::Uuid) => Some(Value::String(uuid::Uuid::new_v4().to_string())),
            Some(KeyMode::Uniqid) => Some(Value::String(uniqid())),
            _ => None,
        }
    }

    fn key_cell(&self, id: &Value) -> SqlValue {
        match self.key_property() {
            Some(prop) => Self::cell(&prop, id),
            None => SqlValue::from_json(id),
        }
    }
}

impl Source for DatabaseSource {
    fn metadata(&self) -> &Arc<Metadata> {
        &self.metadata
    }

    fn table(&self) -> &str {
        &self.table
    }

    fn load_item_by(&self, property: &str, value: &Value) -> Result<Option<Data>, CharcoalError> {
        let query = Query::new().filter(Filter::eq(property, value.clone()));
        let rows = self.load_rows(&query, 0, Some(1))?;
        Ok(rows.first().map(|row| self.hydrate(row)))
    }

    fn load_rows(&self, query: &Query, offset: u64, limit: Option<u64>) -> Result<Vec<Row>, CharcoalError> {
        for filter in &query.filters {
            filter.validate()?;
        }
        self.select(&Statement::Select {
            table: self.table.clone(),
            filters: self.map_filters(&query.filters),
            orders: self.map_orders(&query.orders),
            limit,
            offset,
        })
    }

    fn hydrate(&self, row: &Row) -> Data {
        let mut data = Data::new();
        let mut consumed = Vec::new();
        for prop in self.metadata.properties() {
            if prop.l10n {
                let mut variants = Data::new();
                for lang in &self.locales.languages {
                    let column = l10n_column(&prop.ident, lang);
                    if let Some(SqlValue::Text(text)) = row.get(&column) {
                        variants.insert(lang.clone(), Value::String(text.clone()));
                    }
                    consumed.push(column);
                }
                if !variants.is_empty() {
                    data.insert(prop.ident.clone(), Value::Object(variants));
                } else if prop.storable {
                    data.insert(prop.ident.clone(), Value::Null);
                }
            } else if let Some(cell) = row.get(&prop.ident) {
                data.insert(prop.ident.clone(), Self::value(&prop, cell));
                consumed.push(prop.ident.clone());
            }
        }
        for (column, cell) in row {
            if !data.contains_key(column) && !consumed.contains(column) {
                data.insert(column.clone(), cell.to_json());
            }
        }
        data
    }

    fn count_items(&self, query: &Query) -> Result<u64, CharcoalError> {
        for filter in &query.filters {
            filter.validate()?;
        }
        let statement = Statement::Count {
            table: self.table.clone(),
            filters: self.map_filters(&query.filters),
        };
        tracing::debug!("{}", statement);
        self.connection.count(&statement)
    }

    fn save_item(&self, data: &Data) -> Result<Value, CharcoalError> {
        let key = self.metadata.key();
        let id = data
            .get(&key)
            .filter(|v| !is_blank(v))
            .cloned()
            .or_else(|| self.generate_key());

        let mut values = Vec::new();
        if let Some(id) = &id {
            values.push((key.clone(), self.key_cell(id)));
        }
        for prop in self.metadata.properties() {
            if !prop.storable || prop.ident == key {
                continue;
            }
            if let Some(value) = data.get(&prop.ident) {
                values.extend(self.cells(&prop, value));
            }
        }

        let result = self.run(&Statement::Insert {
            table: self.table.clone(),
            values,
        })?;
        match (id, result.last_insert_id) {
            (Some(id), _) => Ok(id),
            (None, Some(assigned)) => Ok(Value::from(assigned)),
            (None, None) => Err(CharcoalError::Persistence(format!(
                "insert into '{}' assigned no key",
                self.table
            ))),
        }
    }

    fn update_item(
        &self,
        id: &Value,
        data: &Data,
        properties: Option<&[String]>,
    ) -> Result<bool, CharcoalError> {
        let key = self.metadata.key();
        if let Some(new_key) = data.get(&key).filter(|v| !is_blank(v)) {
            if !same_key(new_key, id) {
                return Err(CharcoalError::Persistence(format!(
                    "Can not change key \"{}\" of \"{}\" from {} to {}",
                    key, self.table, id, new_key
                )));
            }
        }

        let props = match properties {
            Some(names) => names
                .iter()
                .map(|name| {
                    self.metadata.property(name).ok_or_else(|| {
                        CharcoalError::Persistence(format!(
                            "Can not update unknown property \"{}\" of \"{}\"",
                            name, self.table
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => self.metadata.properties(),
        };

        let mut values = Vec::new();
        for prop in props.iter().filter(|p| p.storable && p.ident != key) {
            let value = data.get(&prop.ident).unwrap_or(&Value::Null);
            values.extend(self.cells(prop, value));
        }
        if values.is_empty() {
            return Ok(false);
        }

        let result = self.run(&Statement::Update {
            table: self.table.clone(),
            key,
            id: self.key_cell(id),
            values,
        })?;
        Ok(result.affected > 0)
    }

    fn delete_item(&self, id: &Value) -> Result<bool, CharcoalError> {
        let result = self.run(&Statement::Delete {
            table: self.table.clone(),
            key: self.metadata.key(),
            id: self.key_cell(id),
        })?;
        Ok(result.affected > 0)
    }

    fn table_exists(&self) -> Result<bool, CharcoalError> {
        Ok(self.connection.columns(&self.table)?.is_some())
    }

    fn create_table(&self) -> Result<Vec<Statement>, CharcoalError> {
        if self.table_exists()? {
            tracing::debug!("Table {} already exists", self.table);
            return Ok(Vec::new());
        }
        let statement = Statement::CreateTable {
            table: self.table.clone(),
            columns: self.expected_columns(),
        };
        self.run(&statement)?;
        tracing::info!("Created table {}", self.table);
        Ok(vec![statement])
    }

    fn alter_table(&self) -> Result<Vec<Statement>, CharcoalError> {
        let live = self
            .connection
            .columns(&self.table)?
            .ok_or_else(|| connection::missing_table(&self.table))?;

        let mut statements = Vec::new();
        for expected in self.expected_columns() {
            match live.iter().find(|c| c.name == expected.name) {
                None => statements.push(Statement::AddColumn {
                    table: self.table.clone(),
                    column: ColumnDef {
                        primary: false,
                        auto_increment: false,
                        ..expected
                    },
                }),
                Some(current) if expected.sql_type.widens(current.sql_type) => {
                    statements.push(Statement::ModifyColumn {
                        table: self.table.clone(),
                        column: ColumnDef {
                            primary: current.primary,
                            auto_increment: current.auto_increment,
                            ..expected
                        },
                    });
                }
                Some(_) => {}
            }
        }

        for statement in &statements {
            self.run(statement)?;
            tracing::info!("Altered table {}: {}", self.table, statement);
        }
        Ok(statements)
    }
}
