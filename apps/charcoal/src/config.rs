//! # Application Configuration
//!
//! `charcoal.toml` is optional. Its tables are merged over built-in
//! defaults through a `ConfigMap`, then deserialized into `AppConfig`.
//! Relative paths are resolved against the directory holding the file.

use charcoal_core::{CharcoalError, ConfigMap, Locales};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Storage backend of items or of the metadata cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Redb,
    Memory,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    pub base_path: PathBuf,
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: Backend,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalesConfig {
    pub current: String,
    pub languages: Vec<String>,
    pub fallbacks: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FactoryConfig {
    /// Class used for identifiers without an explicit mapping.
    pub default_class: Option<String>,
    /// Explicit identifier to class mapping.
    #[serde(default)]
    pub map: BTreeMap<String, String>,
}

/// Fully merged application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub metadata: MetadataConfig,
    pub database: StoreConfig,
    pub cache: StoreConfig,
    pub locales: LocalesConfig,
    #[serde(default)]
    pub factory: FactoryConfig,
}

fn defaults() -> Value {
    json!({
        "metadata": {"base_path": ".", "paths": ["metadata"]},
        "database": {"backend": "redb", "path": "charcoal.redb"},
        "cache": {"backend": "redb", "path": "charcoal-cache.redb"},
        "locales": {"current": "en", "languages": ["en"], "fallbacks": []},
        "factory": {"default_class": "model", "map": {}}
    })
}

impl AppConfig {
    /// Load `path`, or the defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, CharcoalError> {
        if !path.is_file() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Self::from_config(&ConfigMap::default());
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CharcoalError::Io(format!("{}: {}", path.display(), e)))?;
        let mut config = Self::from_toml(&contents)?;
        if let Some(dir) = path.parent() {
            config.rebase(dir);
        }
        Ok(config)
    }

    /// Parse TOML text merged over the defaults. Paths stay as written.
    pub fn from_toml(contents: &str) -> Result<Self, CharcoalError> {
        let overlay: Value =
            toml::from_str(contents).map_err(|e| CharcoalError::Config(e.to_string()))?;
        let mut config = ConfigMap::default();
        config.merge(&overlay)?;
        Self::from_config(&config)
    }

    fn from_config(overlay: &ConfigMap) -> Result<Self, CharcoalError> {
        let mut merged = ConfigMap::from_value(defaults())?;
        merged.merge(overlay.data())?;
        serde_json::from_value(merged.data().clone())
            .map_err(|e| CharcoalError::Config(e.to_string()))
    }

    /// Resolve relative paths against `dir`.
    pub fn rebase(&mut self, dir: &Path) {
        let rebase = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = dir.join(&*p);
            }
        };
        rebase(&mut self.metadata.base_path);
        rebase(&mut self.database.path);
        rebase(&mut self.cache.path);
    }

    /// Locales of the configured languages.
    #[must_use]
    pub fn locales(&self) -> Locales {
        let languages: Vec<&str> = self.locales.languages.iter().map(String::as_str).collect();
        let fallbacks: Vec<&str> = self.locales.fallbacks.iter().map(String::as_str).collect();
        Locales::new(self.locales.current.clone(), &languages).with_fallbacks(&fallbacks)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let config = AppConfig::load(Path::new("/nonexistent/charcoal.toml")).unwrap();
        assert_eq!(config.database.backend, Backend::Redb);
        assert_eq!(config.metadata.paths, vec![PathBuf::from("metadata")]);
        assert_eq!(config.factory.default_class.as_deref(), Some("model"));
    }

    #[test]
    fn file_overrides_merge_over_defaults() {
        let config = AppConfig::from_toml(
            r#"
[database]
backend = "memory"

[locales]
current = "fr"
languages = ["en", "fr"]

[factory.map]
"cms/news" = "model"
"#,
        )
        .unwrap();
        assert_eq!(config.database.backend, Backend::Memory);
        assert_eq!(config.database.path, PathBuf::from("charcoal.redb"));
        assert_eq!(config.cache.backend, Backend::Redb);
        assert_eq!(config.locales().current, "fr");
        assert_eq!(config.factory.map.get("cms/news").map(String::as_str), Some("model"));
    }

    #[test]
    fn bad_backend_is_a_config_error() {
        let err = AppConfig::from_toml("[cache]\nbackend = \"floppy\"\n").unwrap_err();
        assert!(matches!(err, CharcoalError::Config(_)));
    }

    #[test]
    fn relative_paths_follow_the_file() {
        let mut config = AppConfig::from_toml("").unwrap();
        config.rebase(Path::new("/srv/site"));
        assert_eq!(config.metadata.base_path, PathBuf::from("/srv/site/."));
        assert_eq!(config.cache.path, PathBuf::from("/srv/site/charcoal-cache.redb"));
    }
}
