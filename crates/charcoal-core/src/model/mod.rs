//! # Models
//!
//! A `Model` is a metadata-described property bag bound to an optional
//! `Source`.
//!
//! ## Lifecycle
//!
//! ```text
//! New --set_data/load--> Hydrated --save/update--> Saved --delete--> Deleted
//! ```
//!
//! Validation can run at any point and never changes the state or data.
//! Persistence calls delegate to the source once; failures propagate and
//! nothing is retried.

pub mod dependencies;
pub mod validator;

pub use dependencies::{model_factory, register_model, ModelDependencies, ModelFactory, MODEL_CLASS};
pub use validator::{ValidationFailure, ValidatorResults};

use crate::metadata::Metadata;
use crate::source::Source;
use crate::translation::{Locales, Translation};
use crate::types::{CharcoalError, Data, Ident};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Custom property setter. Receives the model and the raw value.
pub type Setter = Arc<dyn Fn(&mut Model, Value) -> Result<(), CharcoalError> + Send + Sync>;

/// Where a model is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelState {
    #[default]
    New,
    Hydrated,
    Saved,
    Deleted,
}

/// A metadata-described object.
#[derive(Clone)]
pub struct Model {
    obj_type: Ident,
    metadata: Arc<Metadata>,
    data: Data,
    source: Option<Arc<dyn Source>>,
    locales: Locales,
    setters: BTreeMap<String, Setter>,
    state: ModelState,
    persisted_id: Option<Value>,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("obj_type", &self.obj_type)
            .field("state", &self.state)
            .field("data", &self.data)
            .field("setters", &self.setters.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Model {
    /// A new model seeded with the metadata's default data.
    #[must_use]
    pub fn new(obj_type: Ident, metadata: Arc<Metadata>) -> Self {
        let data = metadata.default_data();
        Self {
            obj_type,
            metadata,
            data,
            source: None,
            locales: Locales::default(),
            setters: BTreeMap::new(),
            state: ModelState::New,
            persisted_id: None,
        }
    }

    /// Bind a source.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn Source>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the locales used by `translation`.
    #[must_use]
    pub fn with_locales(mut self, locales: Locales) -> Self {
        self.locales = locales;
        self
    }

    /// Route assignments of `key` through `setter`.
    #[must_use]
    pub fn with_setter<F>(mut self, key: impl Into<String>, setter: F) -> Self
    where
        F: Fn(&mut Model, Value) -> Result<(), CharcoalError> + Send + Sync + 'static,
    {
        self.setters.insert(key.into(), Arc::new(setter));
        self
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    #[must_use]
    pub fn obj_type(&self) -> &Ident {
        &self.obj_type
    }

    #[must_use]
    pub fn metadata(&self) -> &Arc<Metadata> {
        &self.metadata
    }

    #[must_use]
    pub fn state(&self) -> ModelState {
        self.state
    }

    #[must_use]
    pub fn locales(&self) -> &Locales {
        &self.locales
    }

    /// The bound source, or a `Config` error.
    pub fn source(&self) -> Result<&Arc<dyn Source>, CharcoalError> {
        self.source.as_ref().ok_or_else(|| {
            CharcoalError::Config(format!("model \"{}\" has no source", self.obj_type))
        })
    }

    /// Primary key property.
    #[must_use]
    pub fn key(&self) -> String {
        self.metadata.key()
    }

    /// Primary key value, when set and not blank.
    #[must_use]
    pub fn id(&self) -> Option<&Value> {
        self.data
            .get(&self.key())
            .filter(|v| !v.is_null() && v.as_str() != Some(""))
    }

    /// Assign the primary key.
    pub fn set_id(&mut self, id: Value) -> Result<(), CharcoalError> {
        let key = self.key();
        self.set(&key, id)
    }

    /// One raw property value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Localized view of an `l10n` property.
    #[must_use]
    pub fn translation(&self, ident: &str) -> Option<Translation> {
        let prop = self.metadata.property(ident)?;
        if !prop.l10n {
            return None;
        }
        let value = self.data.get(ident).unwrap_or(&Value::Null);
        Some(Translation::from_value(value, &self.locales))
    }

    /// Copy of the property bag.
    #[must_use]
    pub fn to_map(&self) -> Data {
        self.data.clone()
    }

    // =========================================================================
    // ASSIGNMENT
    // =========================================================================

    /// Assign one property: custom setter first, else as given. Typed
    /// conversion happens on storage and validation.
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), CharcoalError> {
        if let Some(setter) = self.setters.get(key).cloned() {
            return setter(self, value);
        }
        self.set_raw(key, value);
        Ok(())
    }

    /// Assign without setter routing. Used by setters themselves.
    pub fn set_raw(&mut self, key: &str, value: Value) {
        self.data.insert(key.to_string(), value);
    }

    /// Assign every entry of `data`. Unknown keys are accepted.
    pub fn set_data(&mut self, data: &Data) -> Result<(), CharcoalError> {
        for (key, value) in data {
            self.set(key, value.clone())?;
        }
        if self.state == ModelState::New {
            self.state = ModelState::Hydrated;
        }
        Ok(())
    }

    /// Check the data against the metadata's rules.
    #[must_use]
    pub fn validate(&self) -> ValidatorResults {
        validator::validate(&self.metadata, &self.data, &self.locales)
    }

    // =========================================================================
    // PERSISTENCE
    // =========================================================================

    /// Replace the data with the stored item `id`. Returns false when no
    /// such item exists.
    pub fn load(&mut self, id: &Value) -> Result<bool, CharcoalError> {
        let row = self.source()?.load_item(id)?;
        Ok(self.hydrate_from(row))
    }

    /// Replace the data with the first stored item whose `key` equals
    /// `value`.
    pub fn load_from(&mut self, key: &str, value: &Value) -> Result<bool, CharcoalError> {
        let row = self.source()?.load_item_by(key, value)?;
        Ok(self.hydrate_from(row))
    }

    /// Adopt data read from storage.
    pub(crate) fn hydrate_from(&mut self, row: Option<Data>) -> bool {
        let Some(row) = row else {
            return false;
        };
        self.data = row;
        self.persisted_id = self.id().cloned();
        self.state = ModelState::Hydrated;
        true
    }

    /// Insert as a new item. Returns the assigned key.
    pub fn save(&mut self) -> Result<Value, CharcoalError> {
        let id = self.source()?.save_item(&self.data)?;
        let key = self.key();
        self.data.insert(key, id.clone());
        self.persisted_id = Some(id.clone());
        self.state = ModelState::Saved;
        Ok(id)
    }

    /// Write the data (or only `properties`) to the stored item.
    ///
    /// The item is addressed by the key it was loaded or saved with; a
    /// changed key is rejected by the source.
    pub fn update(&mut self, properties: Option<&[String]>) -> Result<bool, CharcoalError> {
        let id = self.stored_id()?;
        let updated = self.source()?.update_item(&id, &self.data, properties)?;
        if updated {
            self.persisted_id = Some(id);
            self.state = ModelState::Saved;
        }
        Ok(updated)
    }

    /// Remove the stored item.
    pub fn delete(&mut self) -> Result<bool, CharcoalError> {
        let id = self.stored_id()?;
        let deleted = self.source()?.delete_item(&id)?;
        if deleted {
            self.persisted_id = None;
            self.state = ModelState::Deleted;
        }
        Ok(deleted)
    }

    fn stored_id(&self) -> Result<Value, CharcoalError> {
        self.persisted_id
            .clone()
            .or_else(|| self.id().cloned())
            .ok_or_else(|| {
                CharcoalError::Persistence(format!(
                    "model \"{}\" has no key \"{}\"",
                    self.obj_type,
                    self.key()
                ))
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::source::{DatabaseSource, MemoryConnection};
    use serde_json::json;

    fn meta() -> Arc<Metadata> {
        Arc::new(Metadata::new(
            Some(Ident::parse("cms/article").unwrap()),
            json!({"properties": {
                "id": {"type": "id"},
                "title": {"type": "string", "l10n": true, "required": true},
                "views": {"type": "integer", "default": 0},
                "slug": {"type": "string"}
            }}),
        ))
    }

    fn locales() -> Locales {
        Locales::new("en", &["en", "fr"])
    }

    fn bound() -> Model {
        let source = DatabaseSource::new(Arc::new(MemoryConnection::new()), meta(), locales()).unwrap();
        source.create_table().unwrap();
        Model::new(Ident::parse("cms/article").unwrap(), meta())
            .with_locales(locales())
            .with_source(Arc::new(source))
    }

    fn data(value: Value) -> Data {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn defaults_and_direct_assignment() {
        let mut model = Model::new(Ident::parse("cms/article").unwrap(), meta());
        assert_eq!(model.get("views"), Some(&json!(0)));
        assert_eq!(model.state(), ModelState::New);

        model.set_data(&data(json!({"views": "12", "extra": true}))).unwrap();
        assert_eq!(model.get("views"), Some(&json!("12")));
        assert_eq!(model.get("extra"), Some(&json!(true)));
        assert_eq!(model.state(), ModelState::Hydrated);
        assert!(model.validate().codes("views").is_empty());
    }

    #[test]
    fn declared_values_read_back_as_assigned() {
        let metadata = Arc::new(Metadata::new(
            None,
            json!({"properties": {
                "views": {"type": "integer"},
                "flag": {"type": "boolean"},
                "tags": {"type": "string", "multiple": true},
                "published": {"type": "date-time"}
            }}),
        ));
        let input = data(json!({
            "views": "12",
            "flag": "on",
            "tags": "a,b",
            "published": "2024-01-02"
        }));
        let mut model = Model::new(Ident::parse("cms/article").unwrap(), metadata);
        model.set_data(&input).unwrap();
        assert_eq!(model.to_map(), input);
    }

    #[test]
    fn stored_values_are_typed() {
        let mut model = bound();
        model.set_data(&data(json!({"title": "Typed", "views": "7"}))).unwrap();
        let id = model.save().unwrap();
        assert_eq!(model.get("views"), Some(&json!("7")));

        assert!(model.load(&id).unwrap());
        assert_eq!(model.get("views"), Some(&json!(7)));
    }

    #[test]
    fn setters_take_precedence() {
        let mut model = Model::new(Ident::parse("cms/article").unwrap(), meta()).with_setter(
            "title",
            |m: &mut Model, v: Value| {
                let slug = v.as_str().unwrap_or_default().to_lowercase().replace(' ', "-");
                m.set_raw("slug", Value::String(slug));
                m.set_raw("title", v);
                Ok(())
            },
        );
        model.set_data(&data(json!({"title": "Hello World"}))).unwrap();
        assert_eq!(model.get("slug"), Some(&json!("hello-world")));
    }

    #[test]
    fn translation_wraps_l10n_values() {
        let mut model = Model::new(Ident::parse("cms/article").unwrap(), meta())
            .with_locales(Locales::new("fr", &["en", "fr"]).with_fallbacks(&["en"]));
        model.set("title", json!({"en": "Hello", "fr": "Bonjour"})).unwrap();
        assert_eq!(model.translation("title").unwrap().to_string(), "Bonjour");
        assert!(model.translation("slug").is_none());
    }

    #[test]
    fn invalid_model_keeps_data() {
        let mut model = Model::new(Ident::parse("cms/article").unwrap(), meta());
        model.set("views", json!("many")).unwrap();
        let before = model.to_map();
        let results = model.validate();
        assert!(!results.is_valid());
        assert_eq!(results.codes("title"), vec!["required"]);
        assert_eq!(model.to_map(), before);
    }

    #[test]
    fn lifecycle_through_source() {
        let mut model = bound();
        model.set_data(&data(json!({"title": "First"}))).unwrap();
        let id = model.save().unwrap();
        assert_eq!(model.state(), ModelState::Saved);
        assert_eq!(model.id(), Some(&id));

        let mut other = Model::new(Ident::parse("cms/article").unwrap(), meta())
            .with_locales(locales())
            .with_source(model.source().unwrap().clone());
        assert!(other.load(&id).unwrap());
        assert_eq!(other.state(), ModelState::Hydrated);
        assert_eq!(other.translation("title").unwrap().to_string(), "First");

        other.set("views", json!(5)).unwrap();
        assert!(other.update(None).unwrap());

        assert!(model.load(&id).unwrap());
        assert_eq!(model.get("views"), Some(&json!(5)));

        assert!(model.delete().unwrap());
        assert_eq!(model.state(), ModelState::Deleted);
        assert!(!other.load(&id).unwrap());
    }

    #[test]
    fn changed_key_is_rejected_on_update() {
        let mut model = bound();
        model.set("title", json!("x")).unwrap();
        model.save().unwrap();
        model.set_id(json!(42)).unwrap();
        let err = model.update(None).unwrap_err();
        assert!(matches!(err, CharcoalError::Persistence(_)));
    }

    #[test]
    fn unbound_model_reports_config_error() {
        let mut model = Model::new(Ident::parse("cms/article").unwrap(), meta());
        assert!(matches!(model.save(), Err(CharcoalError::Config(_))));
        assert!(matches!(model.delete(), Err(CharcoalError::Persistence(_))));
    }
}
