//! # Loaders
//!
//! Query-driven model hydration.
//!
//! - `ModelLoader` loads single models by key and memoizes them.
//! - `CollectionLoader` runs a `Query` against a type's source and hydrates
//!   every row, either eagerly (`load`) or lazily (`lazy`).
//!
//! An empty result is not an error. Unknown types and malformed queries
//! are.
//!
//! Queries are structured only. Raw SQL text is not accepted, since
//! connections interpret `Statement`s and never parse SQL.

pub mod collection;
pub mod lazy;

pub use collection::Collection;
pub use lazy::{LazyCollection, LazyIter};

use crate::model::{Model, ModelFactory};
use crate::query::{Filter, Order, Pagination, Query};
use crate::source::{Row, Source, SqlValue};
use crate::types::CharcoalError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Runs before hydration; returning false skips the row.
pub type BeforeRow = Box<dyn FnMut(&mut Row) -> bool + Send>;

/// Runs on every hydrated model.
pub type AfterModel = Box<dyn FnMut(&mut Model) + Send>;

// =============================================================================
// MODEL LOADER
// =============================================================================

/// Loads models of one type by key, memoizing each until `clear`.
pub struct ModelLoader {
    ident: String,
    factory: Arc<ModelFactory>,
    loaded: Mutex<BTreeMap<String, Model>>,
}

impl fmt::Debug for ModelLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelLoader")
            .field("ident", &self.ident)
            .finish_non_exhaustive()
    }
}

impl ModelLoader {
    pub fn new(ident: impl Into<String>, factory: Arc<ModelFactory>) -> Self {
        Self {
            ident: ident.into(),
            factory,
            loaded: Mutex::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn ident(&self) -> &str {
        &self.ident
    }

    /// Model stored under `id`, or `NotFound`.
    pub fn load(&self, id: &Value) -> Result<Model, CharcoalError> {
        self.find(id)?.ok_or_else(|| CharcoalError::NotFound {
            ident: self.ident.clone(),
            id: SqlValue::from_json(id).key_string(),
        })
    }

    /// Model stored under `id`, if any.
    pub fn find(&self, id: &Value) -> Result<Option<Model>, CharcoalError> {
        let memo_key = SqlValue::from_json(id).key_string();
        if let Some(model) = self.memo()?.get(&memo_key) {
            return Ok(Some(model.clone()));
        }

        let mut model = self.factory.create(&self.ident)?;
        if !model.load(id)? {
            return Ok(None);
        }
        self.memo()?.insert(memo_key, model.clone());
        Ok(Some(model))
    }

    /// First model whose `key` equals `value`, or `NotFound`.
    pub fn load_by(&self, key: &str, value: &Value) -> Result<Model, CharcoalError> {
        let mut model = self.factory.create(&self.ident)?;
        if !model.load_from(key, value)? {
            return Err(CharcoalError::NotFound {
                ident: self.ident.clone(),
                id: format!("{}={}", key, SqlValue::from_json(value).key_string()),
            });
        }
        if let Some(id) = model.id() {
            self.memo()?
                .insert(SqlValue::from_json(id).key_string(), model.clone());
        }
        Ok(model)
    }

    /// Forget every memoized model.
    pub fn clear(&self) -> Result<(), CharcoalError> {
        self.memo()?.clear();
        Ok(())
    }

    fn memo(&self) -> Result<MutexGuard<'_, BTreeMap<String, Model>>, CharcoalError> {
        self.loaded
            .lock()
            .map_err(|e| CharcoalError::Config(format!("model loader poisoned: {}", e)))
    }
}

// =============================================================================
// COLLECTION LOADER
// =============================================================================

/// Loads collections of one type from a query.
pub struct CollectionLoader {
    ident: String,
    factory: Arc<ModelFactory>,
    query: Query,
    before: Option<BeforeRow>,
    after: Option<AfterModel>,
}

impl fmt::Debug for CollectionLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionLoader")
            .field("ident", &self.ident)
            .field("query", &self.query)
            .field("before", &self.before.is_some())
            .field("after", &self.after.is_some())
            .finish()
    }
}

impl CollectionLoader {
    pub fn new(ident: impl Into<String>, factory: Arc<ModelFactory>) -> Self {
        Self {
            ident: ident.into(),
            factory,
            query: Query::new(),
            before: None,
            after: None,
        }
    }

    #[must_use]
    pub fn ident(&self) -> &str {
        &self.ident
    }

    #[must_use]
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Replace the whole query.
    #[must_use]
    pub fn with_query(mut self, query: Query) -> Self {
        self.query = query;
        self
    }

    /// Replace the query with its JSON configuration form.
    pub fn set_query_from_value(&mut self, raw: &Value) -> Result<(), CharcoalError> {
        self.query = Query::from_value(raw)?;
        Ok(())
    }

    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.query.filters.push(filter);
        self
    }

    #[must_use]
    pub fn order(mut self, order: Order) -> Self {
        self.query.orders.push(order);
        self
    }

    #[must_use]
    pub fn paginate(mut self, pagination: Pagination) -> Self {
        self.query.pagination = Some(pagination);
        self
    }

    /// Intercept raw rows; returning false skips the row.
    #[must_use]
    pub fn before<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&mut Row) -> bool + Send + 'static,
    {
        self.before = Some(Box::new(callback));
        self
    }

    /// Intercept every hydrated model.
    #[must_use]
    pub fn after<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&mut Model) + Send + 'static,
    {
        self.after = Some(Box::new(callback));
        self
    }

    /// Load every selected model at once.
    pub fn load(&mut self) -> Result<Collection, CharcoalError> {
        let prototype = self.prototype()?;
        let source = prototype.source()?.clone();
        let (offset, limit) = self.query.window();
        let rows = source.load_rows(&self.query, offset, limit)?;
        tracing::debug!("Loaded {} rows of {}", rows.len(), self.ident);

        let mut collection = Collection::new();
        for row in rows {
            if let Some(model) = self.hydrate_row(&prototype, source.as_ref(), row) {
                collection.push(model);
            }
        }
        Ok(collection)
    }

    /// Number of items matching the filters, ignoring pagination.
    pub fn load_count(&self) -> Result<u64, CharcoalError> {
        let prototype = self.prototype()?;
        prototype.source()?.count_items(&self.query)
    }

    /// A lazily hydrated view fetching `chunk` rows per query.
    pub fn lazy(&mut self, chunk: u64) -> LazyCollection<'_> {
        LazyCollection::new(self, chunk)
    }

    /// Fresh model of the loader's type; cloned once per row.
    pub(crate) fn prototype(&self) -> Result<Model, CharcoalError> {
        self.factory.create(&self.ident)
    }

    pub(crate) fn hydrate_row(&mut self, prototype: &Model, source: &dyn Source, mut row: Row) -> Option<Model> {
        if let Some(before) = self.before.as_mut() {
            if !before(&mut row) {
                return None;
            }
        }
        let mut model = prototype.clone();
        model.hydrate_from(Some(source.hydrate(&row)));
        if let Some(after) = self.after.as_mut() {
            after(&mut model);
        }
        Some(model)
    }
}
