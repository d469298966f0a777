//! # Config Objects
//!
//! A dotted-key configuration object with recursive merge and delegate
//! fallback. Used for component configuration and application settings.

use crate::delegates::{Delegate, Delegates, Lookup};
use crate::metadata::merge::merge_into;
use crate::types::{CharcoalError, Data};
use serde_json::Value;

/// Default key separator for nested lookups.
pub const DEFAULT_SEPARATOR: char = '.';

/// Configuration data plus an ordered stack of fallback delegates.
#[derive(Debug, Clone)]
pub struct ConfigMap {
    data: Value,
    separator: char,
    delegates: Delegates,
}

impl Default for ConfigMap {
    fn default() -> Self {
        Self {
            data: Value::Object(Data::new()),
            separator: DEFAULT_SEPARATOR,
            delegates: Delegates::new(),
        }
    }
}

impl ConfigMap {
    /// Create an empty config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config from a JSON object.
    pub fn from_value(data: Value) -> Result<Self, CharcoalError> {
        if !data.is_object() {
            return Err(CharcoalError::Config(
                "config data must be an object".to_string(),
            ));
        }
        Ok(Self {
            data,
            ..Self::default()
        })
    }

    /// Change the key separator.
    #[must_use]
    pub fn with_separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }

    /// Own data, without delegates.
    #[must_use]
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Mutable access to the delegate stack.
    pub fn delegates_mut(&mut self) -> &mut Delegates {
        &mut self.delegates
    }

    /// Shortcut for `delegates_mut().add_delegate(..)`.
    pub fn add_delegate(&mut self, delegate: Delegate) {
        self.delegates.add_delegate(delegate);
    }

    /// Shortcut for `delegates_mut().prepend_delegate(..)`.
    pub fn prepend_delegate(&mut self, delegate: Delegate) {
        self.delegates.prepend_delegate(delegate);
    }

    /// Recursively merge a JSON object into the own data.
    pub fn merge(&mut self, overlay: &Value) -> Result<(), CharcoalError> {
        if !overlay.is_object() {
            return Err(CharcoalError::Config(
                "merged config data must be an object".to_string(),
            ));
        }
        merge_into(&mut self.data, overlay);
        Ok(())
    }

    fn own(&self, key: &str) -> Option<&Value> {
        if let Some(v) = self.data.get(key) {
            return Some(v);
        }
        let mut current = &self.data;
        for segment in key.split(self.separator) {
            current = current.get(segment)?;
        }
        Some(current)
    }

    /// Whether the key exists on the own data or in a delegate.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.own(key).is_some() || self.delegates.has_in_delegates(key)
    }

    /// Get a value by (possibly dotted) key, falling back to delegates.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.own(key)
            .cloned()
            .or_else(|| self.delegates.get_in_delegates(key))
    }

    /// Get a string value.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(str::to_string))
    }

    /// Set a value, creating intermediate objects along a dotted key.
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), CharcoalError> {
        let mut segments = key.split(self.separator).peekable();
        let mut current = &mut self.data;
        while let Some(segment) = segments.next() {
            let map = current.as_object_mut().ok_or_else(|| {
                CharcoalError::Config(format!("can not set \"{}\": parent is not an object", key))
            })?;
            if segments.peek().is_none() {
                map.insert(segment.to_string(), value);
                return Ok(());
            }
            current = map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Data::new()));
        }
        Err(CharcoalError::Config("empty config key".to_string()))
    }
}

impl Lookup for ConfigMap {
    fn has_key(&self, key: &str) -> bool {
        self.has(key)
    }

    fn get_key(&self, key: &str) -> Option<Value> {
        self.get(key)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn dotted_get_and_set() {
        let mut config = ConfigMap::new();
        config.set("database.path", json!("db.redb")).unwrap();
        assert_eq!(config.get_str("database.path").as_deref(), Some("db.redb"));
        assert_eq!(config.get("database"), Some(json!({"path": "db.redb"})));
    }

    #[test]
    fn falls_back_to_delegates() {
        let defaults =
            ConfigMap::from_value(json!({"locales": {"current": "en"}, "debug": false})).unwrap();
        let mut config = ConfigMap::from_value(json!({"debug": true})).unwrap();
        config.add_delegate(Arc::new(defaults));

        assert_eq!(config.get("debug"), Some(json!(true)));
        assert_eq!(config.get_str("locales.current").as_deref(), Some("en"));
        assert!(!config.has("missing"));
    }

    #[test]
    fn setters_do_not_touch_delegates() {
        let defaults = Arc::new(ConfigMap::from_value(json!({"a": 1})).unwrap());
        let mut config = ConfigMap::new();
        config.add_delegate(defaults.clone());
        config.set("a", json!(2)).unwrap();

        assert_eq!(config.get("a"), Some(json!(2)));
        assert_eq!(defaults.get("a"), Some(json!(1)));
    }

    #[test]
    fn merge_requires_object() {
        let mut config = ConfigMap::new();
        assert!(config.merge(&json!([1])).is_err());
        config.merge(&json!({"x": {"y": 1}})).unwrap();
        config.merge(&json!({"x": {"z": 2}})).unwrap();
        assert_eq!(config.get("x"), Some(json!({"y": 1, "z": 2})));
    }

    #[test]
    fn set_through_scalar_fails() {
        let mut config = ConfigMap::from_value(json!({"a": 1})).unwrap();
        assert!(config.set("a.b", json!(2)).is_err());
    }
}
