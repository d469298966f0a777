//! # Metadata Loader
//!
//! Resolves the metadata of a type identifier by scanning an ordered list of
//! search paths, merging every matching file, and caching the result.
//!
//! For an identifier `cms/news` and a search path `metadata`, the loader
//! looks for `metadata/cms/news.json`, then `metadata/cms/news.toml`. Every
//! file found (across all paths) is merged in path order, so later paths
//! extend and override earlier ones. In-code layers registered with
//! [`MetadataLoader::register`] are applied last.
//!
//! A missing file is not an error: the result is empty metadata.
//! Results stay cached (in process and in the external pool) until
//! [`MetadataLoader::clear_cache`] or [`MetadataLoader::forget`].

use super::merge::merge_into;
use super::Metadata;
use crate::cache::{CachePool, NullPool};
use crate::types::{CharcoalError, Data, Ident};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// File extensions probed for each search path, in order.
const EXTENSIONS: [&str; 2] = ["json", "toml"];

/// Loads and caches merged metadata by type identifier.
pub struct MetadataLoader {
    base_path: PathBuf,
    paths: Vec<PathBuf>,
    registered: BTreeMap<String, Vec<Value>>,
    cache: Arc<dyn CachePool>,
    memo: Mutex<BTreeMap<String, Arc<Metadata>>>,
}

impl std::fmt::Debug for MetadataLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataLoader")
            .field("base_path", &self.base_path)
            .field("paths", &self.paths)
            .field("registered", &self.registered.len())
            .finish_non_exhaustive()
    }
}

impl MetadataLoader {
    /// Create a loader over `paths`, resolved relative to `base_path`.
    pub fn new(base_path: impl Into<PathBuf>, paths: Vec<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            paths,
            registered: BTreeMap::new(),
            cache: Arc::new(NullPool),
            memo: Mutex::new(BTreeMap::new()),
        }
    }

    /// Use an external cache pool.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn CachePool>) -> Self {
        self.cache = cache;
        self
    }

    /// Append a search path.
    pub fn add_path(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
    }

    /// Prepend a search path (lowest precedence).
    pub fn prepend_path(&mut self, path: impl Into<PathBuf>) {
        self.paths.insert(0, path.into());
    }

    /// Resolved search paths, in merge order.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        self.paths
            .iter()
            .map(|p| {
                if p.is_absolute() {
                    p.clone()
                } else {
                    self.base_path.join(p)
                }
            })
            .collect()
    }

    /// Register an in-code metadata layer, merged after every file layer.
    pub fn register(&mut self, ident: &str, layer: Value) {
        self.registered
            .entry(ident.trim_matches('/').to_string())
            .or_default()
            .push(layer);
    }

    /// Load the merged metadata of an identifier.
    pub fn load(&self, ident: &str) -> Result<Arc<Metadata>, CharcoalError> {
        let ident = Ident::parse(ident)?;
        self.load_cached(&ident, std::slice::from_ref(&ident))
    }

    /// Load metadata merged across a lineage of identifiers (ancestor
    /// first). Cached apart from the plain `load` of `ident`.
    pub fn load_lineage(&self, ident: &str, lineage: &[&str]) -> Result<Arc<Metadata>, CharcoalError> {
        let ident = Ident::parse(ident)?;
        let mut idents = lineage
            .iter()
            .map(|i| Ident::parse(*i))
            .collect::<Result<Vec<_>, _>>()?;
        if !idents.contains(&ident) {
            idents.push(ident.clone());
        }
        self.load_cached(&ident, &idents)
    }

    fn load_cached(&self, ident: &Ident, layers: &[Ident]) -> Result<Arc<Metadata>, CharcoalError> {
        let key = lineage_key(ident, layers);

        if let Some(hit) = self.memo()?.get(&key) {
            return Ok(hit.clone());
        }

        if let Some(cached) = self.cache.get(&key)? {
            debug!(ident = %ident, "metadata cache hit");
            let metadata = Arc::new(Metadata::new(Some(ident.clone()), cached));
            self.memo()?.insert(key, metadata.clone());
            return Ok(metadata);
        }

        debug!(ident = %ident, "metadata cache miss");
        let mut merged = Value::Object(Data::new());
        for layer in layers {
            for part in self.layers_for(layer)? {
                merge_into(&mut merged, &part);
            }
        }

        self.cache.set(&key, &merged)?;
        let metadata = Arc::new(Metadata::new(Some(ident.clone()), merged));
        self.memo()?.insert(key, metadata.clone());
        Ok(metadata)
    }

    /// Every raw layer of one identifier: files in path order, then
    /// registered layers.
    fn layers_for(&self, ident: &Ident) -> Result<Vec<Value>, CharcoalError> {
        let mut layers = Vec::new();
        for path in self.paths() {
            for ext in EXTENSIONS {
                let file = path.join(format!("{}.{}", ident.as_str(), ext));
                if file.is_file() {
                    debug!(file = %file.display(), "reading metadata file");
                    layers.push(read_metadata_file(&file)?);
                }
            }
        }
        if let Some(registered) = self.registered.get(ident.as_str()) {
            layers.extend(registered.iter().cloned());
        }
        Ok(layers)
    }

    /// Drop one identifier from both cache levels, with the lineage
    /// loads of it memoized in this loader.
    pub fn forget(&self, ident: &str) -> Result<(), CharcoalError> {
        let key = Ident::parse(ident)?.cache_key();
        let lineage_prefix = format!("{}@", key);
        let mut keys = vec![key.clone()];
        {
            let mut memo = self.memo()?;
            keys.extend(memo.keys().filter(|k| k.starts_with(&lineage_prefix)).cloned());
            for k in &keys {
                memo.remove(k);
            }
        }
        for k in &keys {
            self.cache.delete(k)?;
        }
        Ok(())
    }

    /// Drop every cached metadata document.
    pub fn clear_cache(&self) -> Result<(), CharcoalError> {
        self.memo()?.clear();
        self.cache.clear()
    }

    fn memo(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Arc<Metadata>>>, CharcoalError> {
        self.memo
            .lock()
            .map_err(|e| CharcoalError::Io(format!("metadata memo poisoned: {}", e)))
    }
}

/// Cache key of a merge: the plain identifier key, suffixed with the
/// lineage when it is more than the identifier itself.
fn lineage_key(ident: &Ident, layers: &[Ident]) -> String {
    let key = ident.cache_key();
    if layers == std::slice::from_ref(ident) {
        return key;
    }
    let lineage: Vec<String> = layers.iter().map(|l| l.as_str().replace('/', ".")).collect();
    format!("{}@{}", key, lineage.join(","))
}

/// Parse one metadata file; the root must be an object.
fn read_metadata_file(path: &Path) -> Result<Value, CharcoalError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| CharcoalError::Io(format!("{}: {}", path.display(), e)))?;

    let parsed: Value = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&contents)
            .map_err(|e| CharcoalError::Metadata(format!("{}: {}", path.display(), e)))?,
        _ => serde_json::from_str(&contents)
            .map_err(|e| CharcoalError::Metadata(format!("{}: {}", path.display(), e)))?,
    };

    if !parsed.is_object() {
        return Err(CharcoalError::Metadata(format!(
            "{}: metadata root must be an object",
            path.display()
        )));
    }
    Ok(parsed)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::cache::MemoryPool;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    fn write(dir: &Path, rel: &str, contents: &str) {
        let file = dir.join(rel);
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(file, contents).unwrap();
    }

    #[test]
    fn missing_metadata_is_empty() {
        let temp = tempdir().expect("temp dir");
        let loader = MetadataLoader::new(temp.path(), vec![PathBuf::from("metadata")]);
        let meta = loader.load("nothing/here").unwrap();
        assert!(meta.is_empty());
    }

    #[test]
    fn later_paths_override_earlier() {
        let temp = tempdir().expect("temp dir");
        write(
            temp.path(),
            "core/cms/news.json",
            r#"{"properties": {"title": {"type": "string"}, "body": {"type": "text"}}}"#,
        );
        write(
            temp.path(),
            "app/cms/news.json",
            r#"{"properties": {"title": {"l10n": true}}}"#,
        );
        let loader = MetadataLoader::new(
            temp.path(),
            vec![PathBuf::from("core"), PathBuf::from("app")],
        );

        let meta = loader.load("cms/news").unwrap();
        let title = meta.property("title").unwrap();
        assert!(title.l10n);
        assert_eq!(meta.properties().len(), 2);
    }

    #[test]
    fn toml_layer_follows_json_layer() {
        let temp = tempdir().expect("temp dir");
        write(temp.path(), "m/faq.json", r#"{"label": "json", "a": 1}"#);
        write(temp.path(), "m/faq.toml", "label = \"toml\"\nb = 2\n");
        let loader = MetadataLoader::new(temp.path(), vec![PathBuf::from("m")]);

        let meta = loader.load("faq").unwrap();
        assert_eq!(meta.data(), &json!({"label": "toml", "a": 1, "b": 2}));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let temp = tempdir().expect("temp dir");
        write(temp.path(), "m/bad.json", "{ not json");
        let loader = MetadataLoader::new(temp.path(), vec![PathBuf::from("m")]);
        assert!(matches!(loader.load("bad"), Err(CharcoalError::Metadata(_))));
    }

    #[test]
    fn cached_until_cleared() {
        let temp = tempdir().expect("temp dir");
        write(temp.path(), "m/page.json", r#"{"label": "page"}"#);
        let pool = Arc::new(MemoryPool::new());
        let loader = MetadataLoader::new(temp.path(), vec![PathBuf::from("m")])
            .with_cache(pool.clone());

        assert_eq!(loader.load("page").unwrap().get("label"), Some(&json!("page")));
        assert_eq!(pool.len().unwrap(), 1);

        fs::remove_file(temp.path().join("m/page.json")).unwrap();
        assert!(!loader.load("page").unwrap().is_empty());

        loader.clear_cache().unwrap();
        assert!(loader.load("page").unwrap().is_empty());
    }

    #[test]
    fn external_pool_survives_new_loader() {
        let temp = tempdir().expect("temp dir");
        write(temp.path(), "m/page.json", r#"{"label": "page"}"#);
        let pool: Arc<dyn CachePool> = Arc::new(MemoryPool::new());

        let first = MetadataLoader::new(temp.path(), vec![PathBuf::from("m")]).with_cache(pool.clone());
        first.load("page").unwrap();
        fs::remove_file(temp.path().join("m/page.json")).unwrap();

        let second = MetadataLoader::new(temp.path(), vec![PathBuf::from("m")]).with_cache(pool);
        assert_eq!(second.load("page").unwrap().get("label"), Some(&json!("page")));
        second.forget("page").unwrap();
        assert!(second.load("page").unwrap().is_empty());
    }

    #[test]
    fn lineage_merges_ancestors_first() {
        let temp = tempdir().expect("temp dir");
        write(
            temp.path(),
            "m/charcoal/content.json",
            r#"{"properties": {"active": {"type": "boolean", "default": true}, "position": {"type": "integer"}}}"#,
        );
        write(
            temp.path(),
            "m/cms/faq.json",
            r#"{"properties": {"active": {"default": false}, "question": {"type": "string"}}}"#,
        );
        let loader = MetadataLoader::new(temp.path(), vec![PathBuf::from("m")]);

        let meta = loader.load_lineage("cms/faq", &["charcoal/content"]).unwrap();
        let idents: Vec<_> = meta.properties().into_iter().map(|p| p.ident).collect();
        assert_eq!(idents, vec!["active", "position", "question"]);
        assert_eq!(meta.default_data().get("active"), Some(&json!(false)));
    }

    #[test]
    fn lineage_and_plain_loads_are_cached_apart() {
        let temp = tempdir().expect("temp dir");
        write(temp.path(), "m/charcoal/content.json", r#"{"properties": {"position": {"type": "integer"}}}"#);
        write(temp.path(), "m/cms/faq.json", r#"{"properties": {"question": {"type": "string"}}}"#);
        let pool = Arc::new(MemoryPool::new());
        let loader = MetadataLoader::new(temp.path(), vec![PathBuf::from("m")]).with_cache(pool.clone());

        let merged = loader.load_lineage("cms/faq", &["charcoal/content"]).unwrap();
        assert!(merged.property("position").is_some());
        let plain = loader.load("cms/faq").unwrap();
        assert!(plain.property("position").is_none());
        assert!(plain.property("question").is_some());

        loader.forget("cms/faq").unwrap();
        assert!(pool.get("metadata/cms.faq").unwrap().is_none());
        assert!(pool.get("metadata/cms.faq@charcoal.content,cms.faq").unwrap().is_none());
    }

    #[test]
    fn registered_layers_apply_last() {
        let temp = tempdir().expect("temp dir");
        write(temp.path(), "m/page.json", r#"{"label": "file"}"#);
        let mut loader = MetadataLoader::new(temp.path(), vec![PathBuf::from("m")]);
        loader.register("page", json!({"label": "code"}));
        assert_eq!(loader.load("page").unwrap().get("label"), Some(&json!("code")));
    }
}
