//! Metadata-driven validation.
//!
//! Validation never fails: every problem becomes a `ValidationFailure` and
//! the model data is left untouched.

use crate::metadata::{Metadata, PropertyDescriptor, PropertyType};
use crate::source::value::normalize_datetime;
use crate::translation::Locales;
use crate::types::Data;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;

/// One failed rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationFailure {
    pub property: String,
    pub code: String,
    pub message: String,
}

/// Outcome of `Model::validate`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidatorResults {
    failures: Vec<ValidationFailure>,
}

impl ValidatorResults {
    /// No rule failed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.failures.is_empty()
    }

    /// All failures, in property declaration order.
    #[must_use]
    pub fn failures(&self) -> &[ValidationFailure] {
        &self.failures
    }

    /// Failures of one property.
    pub fn for_property<'a, 'p>(
        &'a self,
        property: &'p str,
    ) -> impl Iterator<Item = &'a ValidationFailure> + use<'a, 'p> {
        self.failures.iter().filter(move |f| f.property == property)
    }

    /// Failure codes of one property.
    #[must_use]
    pub fn codes(&self, property: &str) -> Vec<&str> {
        self.for_property(property).map(|f| f.code.as_str()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    fn fail(&mut self, property: &str, code: &str, message: String) {
        self.failures.push(ValidationFailure {
            property: property.to_string(),
            code: code.to_string(),
            message,
        });
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.values().all(is_blank),
        _ => false,
    }
}

/// Validate `data` against the declared properties.
#[must_use]
pub fn validate(metadata: &Metadata, data: &Data, locales: &Locales) -> ValidatorResults {
    let mut results = ValidatorResults::default();
    for prop in metadata.properties() {
        let value = data.get(&prop.ident).unwrap_or(&Value::Null);

        if is_blank(value) {
            if prop.required {
                results.fail(&prop.ident, "required", format!("\"{}\" is required", prop.ident));
            } else if value.is_null() && !prop.allow_null {
                results.fail(&prop.ident, "null", format!("\"{}\" can not be null", prop.ident));
            }
            continue;
        }

        let coerced = prop.coerce(value.clone());
        let value = &coerced;
        if prop.l10n {
            validate_l10n(&mut results, &prop, value, locales);
        } else if prop.multiple {
            match value {
                Value::Array(items) => {
                    for item in items {
                        validate_scalar(&mut results, &prop, item);
                    }
                }
                other => validate_scalar(&mut results, &prop, other),
            }
        } else {
            validate_scalar(&mut results, &prop, value);
        }
    }
    results
}

fn validate_l10n(results: &mut ValidatorResults, prop: &PropertyDescriptor, value: &Value, locales: &Locales) {
    match value {
        Value::Object(variants) => {
            if prop.required && variants.get(&locales.current).is_none_or(is_blank) {
                results.fail(
                    &prop.ident,
                    "required",
                    format!("\"{}\" is required in \"{}\"", prop.ident, locales.current),
                );
            }
            for text in variants.values().filter(|v| !is_blank(v)) {
                validate_scalar(results, prop, text);
            }
        }
        other => validate_scalar(results, prop, other),
    }
}

fn validate_scalar(results: &mut ValidatorResults, prop: &PropertyDescriptor, value: &Value) {
    let ident = prop.ident.as_str();

    match prop.kind {
        PropertyType::Integer if value.as_i64().is_none() => {
            results.fail(ident, "type", format!("\"{}\" must be an integer", ident));
            return;
        }
        PropertyType::Number if !value.is_number() => {
            results.fail(ident, "type", format!("\"{}\" must be a number", ident));
            return;
        }
        PropertyType::Boolean if !value.is_boolean() => {
            results.fail(ident, "type", format!("\"{}\" must be a boolean", ident));
            return;
        }
        PropertyType::DateTime if value.as_str().and_then(normalize_datetime).is_none() => {
            results.fail(ident, "type", format!("\"{}\" must be a date-time", ident));
            return;
        }
        PropertyType::Email if !matches_builtin(value, r"^[^@\s]+@[^@\s]+\.[^@\s]+$") => {
            results.fail(ident, "email", format!("\"{}\" must be an email address", ident));
        }
        PropertyType::Url if !matches_builtin(value, r"^[A-Za-z][A-Za-z0-9+.\-]*://\S+$") => {
            results.fail(ident, "url", format!("\"{}\" must be a URL", ident));
        }
        _ => {}
    }

    if let Some(text) = value.as_str() {
        let length = text.chars().count() as u64;
        if let Some(min) = prop.min_length.filter(|min| length < *min) {
            results.fail(
                ident,
                "min_length",
                format!("\"{}\" must be at least {} characters", ident, min),
            );
        }
        if let Some(max) = prop.max_length.filter(|max| length > *max) {
            results.fail(
                ident,
                "max_length",
                format!("\"{}\" must be at most {} characters", ident, max),
            );
        }
        if let Some(pattern) = &prop.pattern {
            match Regex::new(pattern) {
                Ok(re) if !re.is_match(text) => results.fail(
                    ident,
                    "pattern",
                    format!("\"{}\" does not match {}", ident, pattern),
                ),
                Ok(_) => {}
                Err(e) => results.fail(ident, "pattern", format!("invalid pattern {}: {}", pattern, e)),
            }
        }
        if !prop.choices.is_empty() && !prop.choices.iter().any(|c| c == text) {
            results.fail(
                ident,
                "choices",
                format!("\"{}\" is not one of {}", ident, prop.choices.join(", ")),
            );
        }
    } else if !prop.choices.is_empty() {
        let text = value.to_string();
        if !prop.choices.iter().any(|c| *c == text) {
            results.fail(
                ident,
                "choices",
                format!("\"{}\" is not one of {}", ident, prop.choices.join(", ")),
            );
        }
    }

    if let Some(number) = value.as_f64() {
        if let Some(min) = prop.min.as_ref().and_then(Value::as_f64) {
            if number.partial_cmp(&min) == Some(Ordering::Less) {
                results.fail(ident, "min", format!("\"{}\" must be at least {}", ident, min));
            }
        }
        if let Some(max) = prop.max.as_ref().and_then(Value::as_f64) {
            if number.partial_cmp(&max) == Some(Ordering::Greater) {
                results.fail(ident, "max", format!("\"{}\" must be at most {}", ident, max));
            }
        }
    }
}

fn matches_builtin(value: &Value, pattern: &str) -> bool {
    match (value.as_str(), Regex::new(pattern)) {
        (Some(text), Ok(re)) => re.is_match(text),
        _ => false,
    }
}
