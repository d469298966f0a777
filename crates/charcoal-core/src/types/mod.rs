//! # Core Type Definitions
//!
//! This module contains the types shared by every layer of the pipeline:
//! - Error types (`CharcoalError`, `FactoryError`)
//! - Type identifiers (`Ident`)
//! - The property bag used by models and rows (`Data`)
//!
//! ## Error Taxonomy
//!
//! - Configuration and resolution errors are fatal at the point of use
//! - Validation problems are NOT errors (see `model::ValidatorResults`)
//! - Persistence errors propagate to the caller; nothing here retries

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Ordered property bag (`serde_json` is built with `preserve_order`).
pub type Data = serde_json::Map<String, serde_json::Value>;

// =============================================================================
// TYPE IDENTIFIERS
// =============================================================================

/// A type identifier such as `charcoal/object/user-data`.
///
/// Identifiers are slash-separated, kebab-cased paths. They name metadata
/// files, factory classes and default storage tables.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ident(String);

impl Ident {
    /// Parse an identifier, rejecting empty or whitespace-bearing input.
    pub fn parse(raw: impl Into<String>) -> Result<Self, CharcoalError> {
        let raw = raw.into();
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(CharcoalError::Factory(FactoryError::Unresolved {
                ident: raw.clone(),
            }));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key under which the metadata of this identifier is cached.
    ///
    /// `foo/bar-baz` becomes `metadata/foo.bar-baz`.
    #[must_use]
    pub fn cache_key(&self) -> String {
        format!("metadata/{}", self.0.replace('/', "."))
    }

    /// Default storage table for this identifier.
    ///
    /// `foo/bar-baz` becomes `foo_bar_baz`.
    #[must_use]
    pub fn table_name(&self) -> String {
        self.0
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Identifier resolution failures raised by factories.
///
/// Both kinds are reported through `CharcoalError::Factory` so callers can
/// match every resolution failure with a single arm.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FactoryError {
    /// No class could be resolved and no default class is configured.
    #[error("Can not resolve class for \"{ident}\"")]
    Unresolved { ident: String },

    /// The resolved class does not satisfy the factory's base class.
    #[error("Class \"{class}\" (resolved from \"{ident}\") is not a \"{base}\"")]
    InvalidType {
        ident: String,
        class: String,
        base: String,
    },
}

/// Errors that can occur in the Charcoal model pipeline.
#[derive(Debug, Error)]
pub enum CharcoalError {
    /// An identifier could not be turned into an instance.
    #[error("Factory error: {0}")]
    Factory(#[from] FactoryError),

    /// A metadata file exists but can not be used.
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// Filters, orders or pagination are malformed.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// The storage layer rejected or failed an operation.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A required object was not found.
    #[error("Object \"{ident}\" with ID \"{id}\" not found")]
    NotFound { ident: String, id: String },

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// Invalid application or component configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An advisory process lock could not be acquired or released.
    #[error("Lock error: {0}")]
    Lock(String),
}

impl From<serde_json::Error> for CharcoalError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================
