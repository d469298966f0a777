//! Services handed to model constructors by the model factory.

use super::Model;
use crate::factory::Factory;
use crate::metadata::MetadataLoader;
use crate::source::{Connection, DatabaseSource, Source};
use crate::translation::Locales;
use crate::types::{CharcoalError, Ident};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Class name under which the plain `Model` is registered.
pub const MODEL_CLASS: &str = "model";

/// Factory building models from type identifiers.
pub type ModelFactory = Factory<Model, ModelDependencies>;

/// Metadata loader, connection and locales shared by every model, plus
/// one `Source` per type identifier.
#[derive(Clone)]
pub struct ModelDependencies {
    metadata_loader: Arc<MetadataLoader>,
    connection: Arc<dyn Connection>,
    locales: Locales,
    sources: Arc<Mutex<BTreeMap<String, Arc<dyn Source>>>>,
}

impl fmt::Debug for ModelDependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDependencies")
            .field("metadata_loader", &self.metadata_loader)
            .field("locales", &self.locales)
            .finish_non_exhaustive()
    }
}

impl ModelDependencies {
    pub fn new(
        metadata_loader: Arc<MetadataLoader>,
        connection: Arc<dyn Connection>,
        locales: Locales,
    ) -> Self {
        Self {
            metadata_loader,
            connection,
            locales,
            sources: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    #[must_use]
    pub fn metadata_loader(&self) -> &Arc<MetadataLoader> {
        &self.metadata_loader
    }

    #[must_use]
    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    #[must_use]
    pub fn locales(&self) -> &Locales {
        &self.locales
    }

    /// Shared source of a type identifier, built on first use.
    pub fn source(&self, ident: &str) -> Result<Arc<dyn Source>, CharcoalError> {
        let ident = Ident::parse(ident)?;
        let mut sources = self
            .sources
            .lock()
            .map_err(|e| CharcoalError::Config(format!("source registry poisoned: {}", e)))?;
        if let Some(source) = sources.get(ident.as_str()) {
            return Ok(source.clone());
        }
        let metadata = self.metadata_loader.load(ident.as_str())?;
        let source: Arc<dyn Source> = Arc::new(DatabaseSource::new(
            self.connection.clone(),
            metadata,
            self.locales.clone(),
        )?);
        sources.insert(ident.as_str().to_string(), source.clone());
        Ok(source)
    }

    /// A new model of `ident`, bound to its shared source.
    pub fn model(&self, ident: &str) -> Result<Model, CharcoalError> {
        let source = self.source(ident)?;
        let obj_type = Ident::parse(ident)?;
        Ok(Model::new(obj_type, source.metadata().clone())
            .with_locales(self.locales.clone())
            .with_source(source))
    }
}

/// Register a model class built through `ModelDependencies::model`.
pub fn register_model(factory: &mut ModelFactory, class: &str, ancestors: &[&str]) {
    factory.register_class(class, ancestors, |ident: &str, deps: &ModelDependencies| {
        deps.model(ident)
    });
}

/// A model factory accepting only `Model` descendants, with the plain
/// model class registered.
#[must_use]
pub fn model_factory(deps: ModelDependencies) -> ModelFactory {
    let mut factory = Factory::with_arguments(deps).with_base_class(MODEL_CLASS);
    register_model(&mut factory, MODEL_CLASS, &[]);
    factory
}
