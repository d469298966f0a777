//! # Metadata
//!
//! Declarative per-type schemas loaded from JSON (or TOML) files.
//!
//! A metadata document is a JSON object. The `properties` key maps property
//! identifiers to descriptors:
//!
//! ```json
//! {
//!     "key": "id",
//!     "default_source": "default",
//!     "sources": { "default": { "type": "database", "table": "news" } },
//!     "properties": {
//!         "id": { "type": "id", "mode": "auto-increment" },
//!         "title": { "type": "string", "l10n": true, "required": true }
//!     }
//! }
//! ```
//!
//! Metadata is immutable once loaded; models share it through `Arc`.

pub mod loader;
pub mod merge;

use crate::source::value::normalize_datetime;
use crate::types::{Data, Ident};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

pub use loader::MetadataLoader;
pub use merge::{merge_into, merge_recursive};

/// Default primary key property.
pub const DEFAULT_KEY: &str = "id";

// =============================================================================
// PROPERTY TYPES
// =============================================================================

/// The type of a metadata-declared property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PropertyType {
    String,
    Text,
    Html,
    Integer,
    Number,
    Boolean,
    DateTime,
    Id,
    Object,
    Structure,
    Choice,
    Url,
    Email,
}

impl PropertyType {
    /// Parse a metadata type string. Unknown types fall back to `String`.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" => Self::Text,
            "html" => Self::Html,
            "integer" | "int" => Self::Integer,
            "number" | "float" | "decimal" => Self::Number,
            "boolean" | "bool" => Self::Boolean,
            "date-time" | "datetime" | "date" => Self::DateTime,
            "id" => Self::Id,
            "object" => Self::Object,
            "structure" | "json" | "map" => Self::Structure,
            "choice" | "select" => Self::Choice,
            "url" => Self::Url,
            "email" => Self::Email,
            _ => Self::String,
        }
    }
}

/// How a key property obtains its value on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyMode {
    /// The storage assigns an increasing integer.
    #[default]
    AutoIncrement,
    /// The source generates a time-based unique string.
    Uniqid,
    /// The source generates a random UUID.
    Uuid,
}

impl KeyMode {
    fn parse(raw: &str) -> Self {
        match raw {
            "uniqid" => Self::Uniqid,
            "uuid" => Self::Uuid,
            _ => Self::AutoIncrement,
        }
    }
}

// =============================================================================
// PROPERTY DESCRIPTOR
// =============================================================================

/// Typed view over one entry of the `properties` object.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDescriptor {
    pub ident: String,
    pub kind: PropertyType,
    pub l10n: bool,
    pub multiple: bool,
    pub required: bool,
    pub allow_null: bool,
    pub storable: bool,
    pub default: Option<Value>,
    pub min_length: Option<u64>,
    pub max_length: Option<u64>,
    pub min: Option<Value>,
    pub max: Option<Value>,
    pub pattern: Option<String>,
    pub choices: Vec<String>,
    pub obj_type: Option<String>,
    pub mode: KeyMode,
}

impl PropertyDescriptor {
    /// Build a descriptor from its metadata JSON.
    #[must_use]
    pub fn from_value(ident: &str, raw: &Value) -> Self {
        let flag = |key: &str, default: bool| raw.get(key).and_then(Value::as_bool).unwrap_or(default);
        let text = |key: &str| raw.get(key).and_then(Value::as_str).map(str::to_string);
        let uint = |key: &str| raw.get(key).and_then(Value::as_u64);

        let choices = match raw.get("choices") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|c| match c {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(o) => o.get("value").and_then(Value::as_str).map(str::to_string),
                    _ => None,
                })
                .collect(),
            Some(Value::Object(map)) => map.keys().cloned().collect(),
            _ => Vec::new(),
        };

        Self {
            ident: ident.to_string(),
            kind: text("type")
                .map(|t| PropertyType::parse(&t))
                .unwrap_or(PropertyType::String),
            l10n: flag("l10n", false),
            multiple: flag("multiple", false),
            required: flag("required", false),
            allow_null: flag("allow_null", true),
            storable: flag("storable", true),
            default: raw.get("default").cloned(),
            min_length: uint("min_length"),
            max_length: uint("max_length"),
            min: raw.get("min").cloned(),
            max: raw.get("max").cloned(),
            pattern: text("pattern").or_else(|| text("regexp")),
            choices,
            obj_type: text("obj_type"),
            mode: text("mode").map(|m| KeyMode::parse(&m)).unwrap_or_default(),
        }
    }

    /// Normalize an assigned value to this property's type.
    ///
    /// Values that can not be converted are kept as given; `validate`
    /// reports them. `multiple` properties always become arrays, splitting
    /// comma-separated strings. Localized values are kept as given.
    #[must_use]
    pub fn coerce(&self, value: Value) -> Value {
        if value.is_null() || self.l10n {
            return value;
        }
        if self.multiple {
            return match value {
                Value::Array(items) => {
                    Value::Array(items.into_iter().map(|v| self.coerce_scalar(v)).collect())
                }
                Value::String(s) => Value::Array(
                    s.split(',')
                        .map(str::trim)
                        .filter(|item| !item.is_empty())
                        .map(|item| self.coerce_scalar(Value::String(item.to_string())))
                        .collect(),
                ),
                other => Value::Array(vec![self.coerce_scalar(other)]),
            };
        }
        self.coerce_scalar(value)
    }

    /// Normalize a single (non-list) value to this property's type.
    #[must_use]
    pub fn coerce_scalar(&self, value: Value) -> Value {
        match (self.kind, value) {
            (_, Value::Null) => Value::Null,
            (PropertyType::Boolean, v) => Value::Bool(truthy(&v)),
            (PropertyType::Integer, Value::String(s)) => {
                s.trim().parse::<i64>().map(Value::from).unwrap_or(Value::String(s))
            }
            (PropertyType::Integer, Value::Bool(b)) => Value::from(i64::from(b)),
            (PropertyType::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::String(s)),
            (PropertyType::DateTime, Value::String(s)) => normalize_datetime(&s)
                .map(Value::String)
                .unwrap_or(Value::String(s)),
            (PropertyType::Structure, Value::String(s)) => serde_json::from_str::<Value>(&s)
                .ok()
                .filter(|v| v.is_object() || v.is_array())
                .unwrap_or(Value::String(s)),
            (_, v) => v,
        }
    }
}

/// Loose boolean reading: `1`, `true`, `yes`, `on` and non-zero numbers.
#[must_use]
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n
            .as_i64()
            .map(|i| i != 0)
            .or_else(|| n.as_f64().map(|f| f != 0.0))
            .unwrap_or(false),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

// =============================================================================
// METADATA
// =============================================================================

/// Merged metadata of one type identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    ident: Option<Ident>,
    data: Value,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            ident: None,
            data: Value::Object(Data::new()),
        }
    }
}

impl Metadata {
    /// Wrap merged metadata JSON. Non-object input yields empty metadata.
    #[must_use]
    pub fn new(ident: Option<Ident>, data: Value) -> Self {
        let data = if data.is_object() {
            data
        } else {
            Value::Object(Data::new())
        };
        Self { ident, data }
    }

    /// The identifier this metadata was loaded for.
    #[must_use]
    pub fn ident(&self) -> Option<&Ident> {
        self.ident.as_ref()
    }

    /// Raw merged JSON.
    #[must_use]
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Check whether no metadata was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.as_object().is_none_or(Data::is_empty)
    }

    /// Dotted-path lookup (`sources.default.table`).
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.data;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current)
    }

    /// Declared properties, in declaration order.
    #[must_use]
    pub fn properties(&self) -> Vec<PropertyDescriptor> {
        self.data
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .map(|(ident, raw)| PropertyDescriptor::from_value(ident, raw))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// One declared property.
    #[must_use]
    pub fn property(&self, ident: &str) -> Option<PropertyDescriptor> {
        self.data
            .get("properties")
            .and_then(|p| p.get(ident))
            .map(|raw| PropertyDescriptor::from_value(ident, raw))
    }

    /// Whether a property is declared.
    #[must_use]
    pub fn has_property(&self, ident: &str) -> bool {
        self.data
            .get("properties")
            .and_then(|p| p.get(ident))
            .is_some()
    }

    /// Primary key property ident.
    #[must_use]
    pub fn key(&self) -> String {
        self.data
            .get("key")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_KEY)
            .to_string()
    }

    /// Defaults of declared properties, merged with the top-level
    /// `default_data` object.
    #[must_use]
    pub fn default_data(&self) -> Data {
        let mut defaults = Data::new();
        for prop in self.properties() {
            if let Some(default) = prop.default {
                defaults.insert(prop.ident, default);
            }
        }
        if let Some(Value::Object(extra)) = self.data.get("default_data") {
            for (k, v) in extra {
                defaults.insert(k.clone(), v.clone());
            }
        }
        defaults
    }

    /// Storage table, from the default source or derived from the ident.
    #[must_use]
    pub fn table(&self) -> Option<String> {
        let source = self
            .data
            .get("default_source")
            .and_then(Value::as_str)
            .unwrap_or("default");
        self.data
            .get("sources")
            .and_then(|s| s.get(source))
            .and_then(|s| s.get("table"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.ident.as_ref().map(Ident::table_name))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn news() -> Metadata {
        Metadata::new(
            Some(Ident::parse("cms/news").unwrap()),
            json!({
                "properties": {
                    "id": {"type": "id", "mode": "uuid"},
                    "title": {"type": "string", "l10n": true, "required": true, "max_length": 120},
                    "active": {"type": "boolean", "default": true},
                    "category": {"type": "choice", "choices": ["a", {"value": "b"}]}
                }
            }),
        )
    }

    #[test]
    fn properties_keep_declaration_order() {
        let idents: Vec<_> = news().properties().into_iter().map(|p| p.ident).collect();
        assert_eq!(idents, vec!["id", "title", "active", "category"]);
    }

    #[test]
    fn descriptor_fields() {
        let meta = news();
        let title = meta.property("title").unwrap();
        assert_eq!(title.kind, PropertyType::String);
        assert!(title.l10n && title.required);
        assert_eq!(title.max_length, Some(120));

        assert_eq!(meta.property("id").unwrap().mode, KeyMode::Uuid);
        assert_eq!(meta.property("category").unwrap().choices, vec!["a", "b"]);
    }

    #[test]
    fn defaults_and_key() {
        let meta = news();
        assert_eq!(meta.key(), "id");
        assert_eq!(meta.default_data().get("active"), Some(&json!(true)));
    }

    #[test]
    fn table_from_source_or_ident() {
        assert_eq!(news().table().as_deref(), Some("cms_news"));

        let meta = Metadata::new(
            None,
            json!({"default_source": "main", "sources": {"main": {"table": "t_news"}}}),
        );
        assert_eq!(meta.table().as_deref(), Some("t_news"));
        assert_eq!(meta.get("sources.main.table"), Some(&json!("t_news")));
    }

    #[test]
    fn unknown_type_is_string() {
        assert_eq!(PropertyType::parse("sprocket"), PropertyType::String);
        assert_eq!(PropertyType::parse("date-time"), PropertyType::DateTime);
    }

    #[test]
    fn coercion_by_type() {
        let prop = |raw: Value| PropertyDescriptor::from_value("p", &raw);

        assert_eq!(prop(json!({"type": "boolean"})).coerce(json!("on")), json!(true));
        assert_eq!(prop(json!({"type": "boolean"})).coerce(json!(0)), json!(false));
        assert_eq!(prop(json!({"type": "integer"})).coerce(json!(" 42 ")), json!(42));
        assert_eq!(prop(json!({"type": "integer"})).coerce(json!("abc")), json!("abc"));
        assert_eq!(prop(json!({"type": "number"})).coerce(json!("1.5")), json!(1.5));
        assert_eq!(
            prop(json!({"type": "date-time"})).coerce(json!("2024-01-02")),
            json!("2024-01-02 00:00:00")
        );
        assert_eq!(
            prop(json!({"type": "structure"})).coerce(json!("{\"a\":1}")),
            json!({"a": 1})
        );
        assert_eq!(
            prop(json!({"type": "integer", "multiple": true})).coerce(json!("1, 2,")),
            json!([1, 2])
        );
        assert_eq!(
            prop(json!({"type": "string", "l10n": true})).coerce(json!({"en": "x"})),
            json!({"en": "x"})
        );
    }

    #[test]
    fn non_object_is_empty() {
        assert!(Metadata::new(None, json!([1, 2])).is_empty());
    }
}
