//! # Statements
//!
//! Structured SQL statements. Connections execute the structured form
//! directly; `Display` renders the MySQL dialect used in logs and by the
//! `migrate` command.

use super::value::SqlValue;
use crate::query::{Filter, Operator, Order, OrderMode};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// COLUMN TYPES
// =============================================================================

/// Column storage type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlType {
    TinyInt,
    Int,
    BigInt,
    Double,
    Varchar(u32),
    Text,
    LongText,
    DateTime,
}

impl SqlType {
    /// Position within a widening family; `None` for types that are never
    /// widened.
    fn rank(self) -> Option<(u8, u64)> {
        match self {
            Self::TinyInt => Some((0, 0)),
            Self::Int => Some((0, 1)),
            Self::BigInt => Some((0, 2)),
            Self::Varchar(n) => Some((1, u64::from(n))),
            Self::Text => Some((1, 65_535)),
            Self::LongText => Some((1, 4_294_967_295)),
            Self::Double | Self::DateTime => None,
        }
    }

    /// Whether `self` is strictly wider than `live` within the same family.
    #[must_use]
    pub fn widens(self, live: Self) -> bool {
        match (self.rank(), live.rank()) {
            (Some((family, wanted)), Some((live_family, current))) => {
                family == live_family && wanted > current
            }
            _ => false,
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TinyInt => f.write_str("TINYINT(1)"),
            Self::Int => f.write_str("INT"),
            Self::BigInt => f.write_str("BIGINT"),
            Self::Double => f.write_str("DOUBLE"),
            Self::Varchar(n) => write!(f, "VARCHAR({})", n),
            Self::Text => f.write_str("TEXT"),
            Self::LongText => f.write_str("LONGTEXT"),
            Self::DateTime => f.write_str("DATETIME"),
        }
    }
}

/// A table column definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub primary: bool,
    pub auto_increment: bool,
    pub default: Option<SqlValue>,
}

impl ColumnDef {
    /// A nullable, non-key column.
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable: true,
            primary: false,
            auto_increment: false,
            default: None,
        }
    }
}

impl fmt::Display for ColumnDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` {}", self.name, self.sql_type)?;
        f.write_str(if self.nullable { " NULL" } else { " NOT NULL" })?;
        if let Some(default) = &self.default {
            write!(f, " DEFAULT {}", default)?;
        }
        if self.auto_increment {
            f.write_str(" AUTO_INCREMENT")?;
        }
        Ok(())
    }
}

// =============================================================================
// STATEMENTS
// =============================================================================

/// A structured statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateTable {
        table: String,
        columns: Vec<ColumnDef>,
    },
    AddColumn {
        table: String,
        column: ColumnDef,
    },
    ModifyColumn {
        table: String,
        column: ColumnDef,
    },
    Insert {
        table: String,
        values: Vec<(String, SqlValue)>,
    },
    Update {
        table: String,
        key: String,
        id: SqlValue,
        values: Vec<(String, SqlValue)>,
    },
    Delete {
        table: String,
        key: String,
        id: SqlValue,
    },
    /// Filters and orders address columns, not properties.
    Select {
        table: String,
        filters: Vec<Filter>,
        orders: Vec<Order>,
        limit: Option<u64>,
        offset: u64,
    },
    Count {
        table: String,
        filters: Vec<Filter>,
    },
}

impl Statement {
    /// Target table.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::CreateTable { table, .. }
            | Self::AddColumn { table, .. }
            | Self::ModifyColumn { table, .. }
            | Self::Insert { table, .. }
            | Self::Update { table, .. }
            | Self::Delete { table, .. }
            | Self::Select { table, .. }
            | Self::Count { table, .. } => table,
        }
    }
}

fn write_where(f: &mut fmt::Formatter<'_>, filters: &[Filter]) -> fmt::Result {
    for (i, filter) in filters.iter().enumerate() {
        if i == 0 {
            f.write_str(" WHERE ")?;
        } else {
            write!(f, " {} ", filter.conjunction)?;
        }
        write!(f, "(`{}` {}", filter.property, filter.operator)?;
        match filter.operator {
            Operator::IsNull | Operator::IsNotNull => {}
            Operator::In | Operator::NotIn => {
                let items = filter
                    .value
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .map(|v| SqlValue::from_json(v).to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .unwrap_or_default();
                write!(f, " ({})", items)?;
            }
            _ => write!(f, " {}", SqlValue::from_json(&filter.value))?,
        }
        f.write_str(")")?;
    }
    Ok(())
}

fn write_orders(f: &mut fmt::Formatter<'_>, orders: &[Order]) -> fmt::Result {
    for (i, order) in orders.iter().enumerate() {
        f.write_str(if i == 0 { " ORDER BY " } else { ", " })?;
        match &order.mode {
            OrderMode::Asc => write!(f, "`{}` ASC", order.property)?,
            OrderMode::Desc => write!(f, "`{}` DESC", order.property)?,
            OrderMode::Values(values) => {
                let items = values
                    .iter()
                    .map(|v| SqlValue::from_json(v).to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "FIELD(`{}`, {})", order.property, items)?;
            }
        }
    }
    Ok(())
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateTable { table, columns } => {
                writeln!(f, "CREATE TABLE IF NOT EXISTS `{}` (", table)?;
                let primary: Vec<_> = columns
                    .iter()
                    .filter(|c| c.primary)
                    .map(|c| format!("`{}`", c.name))
                    .collect();
                let mut lines: Vec<String> = columns.iter().map(|c| format!("  {}", c)).collect();
                if !primary.is_empty() {
                    lines.push(format!("  PRIMARY KEY ({})", primary.join(", ")));
                }
                writeln!(f, "{}", lines.join(",\n"))?;
                f.write_str(") ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;")
            }
            Self::AddColumn { table, column } => {
                write!(f, "ALTER TABLE `{}` ADD COLUMN {};", table, column)
            }
            Self::ModifyColumn { table, column } => {
                write!(f, "ALTER TABLE `{}` MODIFY {};", table, column)
            }
            Self::Insert { table, values } => {
                let columns: Vec<_> = values.iter().map(|(c, _)| format!("`{}`", c)).collect();
                let literals: Vec<_> = values.iter().map(|(_, v)| v.to_string()).collect();
                write!(
                    f,
                    "INSERT INTO `{}` ({}) VALUES ({});",
                    table,
                    columns.join(", "),
                    literals.join(", ")
                )
            }
            Self::Update {
                table,
                key,
                id,
                values,
            } => {
                let sets: Vec<_> = values
                    .iter()
                    .map(|(c, v)| format!("`{}` = {}", c, v))
                    .collect();
                write!(
                    f,
                    "UPDATE `{}` SET {} WHERE `{}` = {};",
                    table,
                    sets.join(", "),
                    key,
                    id
                )
            }
            Self::Delete { table, key, id } => {
                write!(f, "DELETE FROM `{}` WHERE `{}` = {} LIMIT 1;", table, key, id)
            }
            Self::Select {
                table,
                filters,
                orders,
                limit,
                offset,
            } => {
                write!(f, "SELECT * FROM `{}`", table)?;
                write_where(f, filters)?;
                write_orders(f, orders)?;
                if let Some(limit) = limit {
                    write!(f, " LIMIT {}, {}", offset, limit)?;
                }
                f.write_str(";")
            }
            Self::Count { table, filters } => {
                write!(f, "SELECT COUNT(*) AS `count` FROM `{}`", table)?;
                write_where(f, filters)?;
                f.write_str(";")
            }
        }
    }
}
