//! # Translations
//!
//! Localized property values. A `Translation` keeps every language variant
//! and renders as the active language, falling back through the configured
//! fallback languages.

use crate::types::Data;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// LOCALES
// =============================================================================

/// Language configuration shared by models and sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locales {
    /// Active language.
    pub current: String,
    /// Available languages, in column order.
    pub languages: Vec<String>,
    /// Languages tried, in order, when the active one has no value.
    #[serde(default)]
    pub fallbacks: Vec<String>,
}

impl Default for Locales {
    fn default() -> Self {
        Self {
            current: "en".to_string(),
            languages: vec!["en".to_string()],
            fallbacks: Vec::new(),
        }
    }
}

impl Locales {
    /// Create a locale configuration; `current` is added to `languages` if
    /// missing.
    #[must_use]
    pub fn new(current: impl Into<String>, languages: &[&str]) -> Self {
        let current = current.into();
        let mut languages: Vec<String> = languages.iter().map(|l| (*l).to_string()).collect();
        if !languages.contains(&current) {
            languages.insert(0, current.clone());
        }
        Self {
            current,
            languages,
            fallbacks: Vec::new(),
        }
    }

    /// Set the fallback languages.
    #[must_use]
    pub fn with_fallbacks(mut self, fallbacks: &[&str]) -> Self {
        self.fallbacks = fallbacks.iter().map(|l| (*l).to_string()).collect();
        self
    }

    /// Lookup order: current language, then fallbacks.
    fn order(&self) -> impl Iterator<Item = &String> {
        std::iter::once(&self.current).chain(self.fallbacks.iter())
    }
}

// =============================================================================
// TRANSLATION
// =============================================================================

/// A localized string value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Translation {
    values: BTreeMap<String, String>,
    locales: Locales,
}

impl Translation {
    /// Build a translation from a stored value.
    ///
    /// Objects are read as `{lang: text}`; a plain string is assigned to
    /// every available language.
    #[must_use]
    pub fn from_value(value: &Value, locales: &Locales) -> Self {
        let mut values = BTreeMap::new();
        match value {
            Value::Object(map) => {
                for (lang, text) in map {
                    if let Some(text) = value_to_text(text) {
                        values.insert(lang.clone(), text);
                    }
                }
            }
            other => {
                if let Some(text) = value_to_text(other) {
                    for lang in &locales.languages {
                        values.insert(lang.clone(), text.clone());
                    }
                }
            }
        }
        Self {
            values,
            locales: locales.clone(),
        }
    }

    /// Value for one language, without fallback.
    #[must_use]
    pub fn get(&self, lang: &str) -> Option<&str> {
        self.values.get(lang).map(String::as_str)
    }

    /// Set the value of one language.
    pub fn set(&mut self, lang: impl Into<String>, text: impl Into<String>) {
        self.values.insert(lang.into(), text.into());
    }

    /// Check whether a language has a value.
    #[must_use]
    pub fn has(&self, lang: &str) -> bool {
        self.values.contains_key(lang)
    }

    /// Active-language value with fallbacks; the first non-empty variant
    /// as last resort.
    #[must_use]
    pub fn resolved(&self) -> Option<&str> {
        self.locales
            .order()
            .filter_map(|lang| self.values.get(lang))
            .find(|text| !text.is_empty())
            .or_else(|| self.values.values().find(|text| !text.is_empty()))
            .map(String::as_str)
    }

    /// Stored form, `{lang: text}`.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = Data::new();
        for (lang, text) in &self.values {
            map.insert(lang.clone(), Value::String(text.clone()));
        }
        Value::Object(map)
    }
}

impl fmt::Display for Translation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resolved().unwrap_or_default())
    }
}

fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn locales() -> Locales {
        Locales::new("fr", &["en", "fr"]).with_fallbacks(&["en"])
    }

    #[test]
    fn renders_active_language() {
        let t = Translation::from_value(&json!({"en": "Hello", "fr": "Bonjour"}), &locales());
        assert_eq!(t.to_string(), "Bonjour");
        assert_eq!(t.get("en"), Some("Hello"));
    }

    #[test]
    fn falls_back_when_missing_or_empty() {
        let t = Translation::from_value(&json!({"en": "Hello", "fr": ""}), &locales());
        assert_eq!(t.to_string(), "Hello");

        let t = Translation::from_value(&json!({"de": "Hallo"}), &locales());
        assert_eq!(t.to_string(), "Hallo");
    }

    #[test]
    fn plain_string_fills_every_language() {
        let t = Translation::from_value(&json!("Same"), &locales());
        assert_eq!(t.get("en"), Some("Same"));
        assert_eq!(t.get("fr"), Some("Same"));
    }

    #[test]
    fn set_and_round_trip() {
        let mut t = Translation::from_value(&Value::Null, &locales());
        assert_eq!(t.to_string(), "");
        t.set("en", "Hi");
        assert!(t.has("en"));
        assert_eq!(t.to_value(), json!({"en": "Hi"}));
    }

    #[test]
    fn current_is_always_available() {
        let l = Locales::new("de", &["en"]);
        assert_eq!(l.languages, vec!["de", "en"]);
    }
}
