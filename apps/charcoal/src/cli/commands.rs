//! # CLI Command Implementations
//!
//! Each `cmd_*` prints its result; the data-producing halves are public so
//! they can be driven without a terminal.

use crate::config::{AppConfig, Backend};
use charcoal_core::{
    CachePool, CharcoalError, CollectionLoader, Connection, Data, Filter, MemoryConnection,
    MemoryPool, MetadataLoader, ModelDependencies, ModelFactory, ModelLoader, NullPool, Order, Pagination, Query,
    RedbConnection, RedbPool, Resolver, Source, ValidationFailure, model_factory,
};
use serde::Serialize;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum size of an import file (100 MB).
const MAX_IMPORT_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Canonicalize an input path and make sure it is a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, CharcoalError> {
    let canonical = path.canonicalize().map_err(|e| {
        CharcoalError::Io(format!("Invalid file path '{}': {}", path.display(), e))
    })?;
    if !canonical.is_file() {
        return Err(CharcoalError::Io(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    let size = std::fs::metadata(&canonical)
        .map_err(|e| CharcoalError::Io(format!("Cannot read file metadata: {}", e)))?
        .len();
    if size > MAX_IMPORT_FILE_SIZE {
        return Err(CharcoalError::Serialization(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            size, MAX_IMPORT_FILE_SIZE
        )));
    }
    Ok(canonical)
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_default()
    );
}

// =============================================================================
// RUNTIME
// =============================================================================

/// Services built from the application configuration.
#[derive(Debug)]
pub struct Runtime {
    config: AppConfig,
    factory: Arc<ModelFactory>,
}

impl Runtime {
    /// Load the configuration file and open the configured stores.
    pub fn open(config_path: &Path) -> Result<Self, CharcoalError> {
        Self::from_config(AppConfig::load(config_path)?)
    }

    pub fn from_config(config: AppConfig) -> Result<Self, CharcoalError> {
        let cache: Arc<dyn CachePool> = match config.cache.backend {
            Backend::Redb => Arc::new(RedbPool::open(&config.cache.path)?),
            Backend::Memory => Arc::new(MemoryPool::new()),
            Backend::None => Arc::new(NullPool),
        };
        let connection: Arc<dyn Connection> = match config.database.backend {
            Backend::Redb => Arc::new(RedbConnection::open(&config.database.path)?),
            Backend::Memory => Arc::new(MemoryConnection::new()),
            Backend::None => {
                return Err(CharcoalError::Config(
                    "database backend must be \"redb\" or \"memory\"".to_string(),
                ));
            }
        };

        let metadata = MetadataLoader::new(
            config.metadata.base_path.clone(),
            config.metadata.paths.clone(),
        )
        .with_cache(cache);
        let deps = ModelDependencies::new(
            Arc::new(metadata),
            connection,
            config.locales(),
        );

        let mut factory = model_factory(deps).with_resolver(Resolver::new());
        factory.set_map(config.factory.map.clone());
        if let Some(default_class) = &config.factory.default_class {
            factory = factory.with_default_class(default_class.clone());
        }

        tracing::debug!(
            "Runtime ready: database {:?}, cache {:?}",
            config.database.backend,
            config.cache.backend
        );
        Ok(Self {
            config,
            factory: Arc::new(factory),
        })
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub fn factory(&self) -> &Arc<ModelFactory> {
        &self.factory
    }

    #[must_use]
    pub fn metadata_loader(&self) -> &Arc<MetadataLoader> {
        self.factory.arguments().metadata_loader()
    }

    /// Storage of a type, after checking the type resolves.
    pub fn source(&self, ident: &str) -> Result<Arc<dyn Source>, CharcoalError> {
        self.factory.resolve(ident)?;
        self.factory.arguments().source(ident)
    }
}

// =============================================================================
// ARGUMENT PARSING
// =============================================================================

/// Page size of `list` when only `--page` is given.
pub const DEFAULT_PER_PAGE: u64 = 50;

/// Options of the `list` command.
#[derive(Debug, Clone, Default)]
pub struct ListArgs {
    pub filters: Vec<String>,
    pub order: Option<String>,
    pub desc: bool,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

/// A key given on the command line: integers stay numeric.
#[must_use]
pub fn parse_id(raw: &str) -> Value {
    raw.parse::<i64>().map_or_else(|_| json!(raw), |n| json!(n))
}

/// Parse `property=value`. Values that read as JSON scalars keep their
/// type; anything else is a string.
pub fn parse_filter(raw: &str) -> Result<Filter, CharcoalError> {
    let (property, value) = raw.split_once('=').ok_or_else(|| {
        CharcoalError::InvalidQuery(format!("filter \"{}\" must be property=value", raw))
    })?;
    let property = property.trim();
    if property.is_empty() {
        return Err(CharcoalError::InvalidQuery(format!(
            "filter \"{}\" has no property",
            raw
        )));
    }
    let value = match serde_json::from_str::<Value>(value) {
        Ok(parsed) if !parsed.is_object() && !parsed.is_array() => parsed,
        _ => Value::String(value.to_string()),
    };
    Ok(Filter::eq(property, value))
}

/// Query described by `list` options.
pub fn build_query(args: &ListArgs) -> Result<Query, CharcoalError> {
    let mut query = Query::new();
    for raw in &args.filters {
        query = query.filter(parse_filter(raw)?);
    }
    if let Some(order) = &args.order {
        query = query.order(if args.desc {
            Order::desc(order.clone())
        } else {
            Order::asc(order.clone())
        });
    }
    if args.page.is_some() || args.per_page.is_some() {
        let page = args.page.unwrap_or(1);
        let per_page = args.per_page.unwrap_or(DEFAULT_PER_PAGE);
        query = query.paginate(Pagination::new(page, per_page)?);
    }
    Ok(query)
}

// =============================================================================
// DESCRIBE / RESOLVE
// =============================================================================

/// Merged metadata of a type.
pub fn describe(runtime: &Runtime, ident: &str) -> Result<Value, CharcoalError> {
    Ok(runtime.metadata_loader().load(ident)?.data().clone())
}

pub fn cmd_describe(runtime: &Runtime, json_mode: bool, ident: &str) -> Result<(), CharcoalError> {
    let metadata = runtime.metadata_loader().load(ident)?;
    if json_mode {
        print_json(metadata.data());
        return Ok(());
    }

    println!("Type:  {}", ident);
    println!("Table: {}", metadata.table().unwrap_or_default());
    println!("Key:   {}", metadata.key());
    println!();
    for prop in metadata.properties() {
        let mut flags = Vec::new();
        if prop.required {
            flags.push("required");
        }
        if prop.l10n {
            flags.push("l10n");
        }
        if prop.multiple {
            flags.push("multiple");
        }
        if !prop.storable {
            flags.push("not-stored");
        }
        let kind = format!("{:?}", prop.kind);
        println!("  {:<24} {:<12} {}", prop.ident, kind, flags.join(", "));
    }
    Ok(())
}

/// Class of a type identifier, plus the class name the resolver derives.
pub fn resolve(runtime: &Runtime, ident: &str) -> Result<Value, CharcoalError> {
    let class = runtime.factory().resolve(ident)?;
    Ok(json!({
        "ident": ident,
        "class": class,
        "candidate": Resolver::new().resolve(ident),
    }))
}

pub fn cmd_resolve(runtime: &Runtime, json_mode: bool, ident: &str) -> Result<(), CharcoalError> {
    let resolved = resolve(runtime, ident)?;
    if json_mode {
        print_json(&resolved);
    } else {
        println!("{}", resolved["class"].as_str().unwrap_or_default());
    }
    Ok(())
}

// =============================================================================
// MIGRATE
// =============================================================================

/// Create or alter the table of each type; returns the SQL executed per type.
pub fn migrate(runtime: &Runtime, idents: &[String]) -> Result<Vec<(String, Vec<String>)>, CharcoalError> {
    idents
        .iter()
        .map(|ident| {
            let statements = runtime.source(ident)?.create_or_alter()?;
            Ok((
                ident.clone(),
                statements.iter().map(ToString::to_string).collect(),
            ))
        })
        .collect()
}

pub fn cmd_migrate(runtime: &Runtime, json_mode: bool, idents: &[String]) -> Result<(), CharcoalError> {
    let results = migrate(runtime, idents)?;
    if json_mode {
        let output: serde_json::Map<String, Value> = results
            .into_iter()
            .map(|(ident, sql)| (ident, json!(sql)))
            .collect();
        print_json(&output);
        return Ok(());
    }

    for (ident, sql) in results {
        if sql.is_empty() {
            println!("{}: up to date", ident);
        } else {
            println!("{}:", ident);
            for statement in sql {
                println!("  {}", statement);
            }
        }
    }
    Ok(())
}

// =============================================================================
// IMPORT
// =============================================================================

/// Item refused by validation.
#[derive(Debug, Clone, Serialize)]
pub struct Rejected {
    pub index: usize,
    pub failures: Vec<ValidationFailure>,
}

/// Outcome of an import.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub saved: Vec<Value>,
    pub rejected: Vec<Rejected>,
}

/// Items of an import file: a JSON array of objects or a single object.
pub fn read_items(path: &Path) -> Result<Vec<Data>, CharcoalError> {
    let path = validate_file_path(path)?;
    let contents = std::fs::read_to_string(&path)
        .map_err(|e| CharcoalError::Io(format!("Cannot read file: {}", e)))?;
    let parsed: Value = serde_json::from_str(&contents)?;

    let items = match parsed {
        Value::Array(items) => items,
        object @ Value::Object(_) => vec![object],
        _ => {
            return Err(CharcoalError::Serialization(
                "import file must hold an object or an array of objects".to_string(),
            ));
        }
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(data) => Ok(data),
            _ => Err(CharcoalError::Serialization(format!(
                "item {} is not an object",
                i
            ))),
        })
        .collect()
}

/// Validate and save each item; invalid items are reported, not saved.
pub fn import_items(runtime: &Runtime, ident: &str, items: &[Data]) -> Result<ImportReport, CharcoalError> {
    let mut report = ImportReport::default();
    for (index, item) in items.iter().enumerate() {
        let mut model = runtime.factory().create(ident)?;
        model.set_data(item)?;
        let results = model.validate();
        if !results.is_valid() {
            tracing::warn!("Item {} of {} rejected: {} failures", index, ident, results.len());
            report.rejected.push(Rejected {
                index,
                failures: results.failures().to_vec(),
            });
            continue;
        }
        report.saved.push(model.save()?);
    }
    tracing::info!(
        "Imported {} items of {} ({} rejected)",
        report.saved.len(),
        ident,
        report.rejected.len()
    );
    Ok(report)
}

pub fn cmd_import(runtime: &Runtime, json_mode: bool, ident: &str, file: &Path) -> Result<(), CharcoalError> {
    let items = read_items(file)?;
    let report = import_items(runtime, ident, &items)?;
    if json_mode {
        print_json(&report);
        return Ok(());
    }

    println!("Saved:    {}", report.saved.len());
    println!("Rejected: {}", report.rejected.len());
    for rejected in &report.rejected {
        for failure in &rejected.failures {
            println!("  item {}: {} ({})", rejected.index, failure.message, failure.code);
        }
    }
    Ok(())
}

// =============================================================================
// GET / LIST
// =============================================================================

/// One stored item by key.
pub fn get_item(runtime: &Runtime, ident: &str, id: &str) -> Result<Data, CharcoalError> {
    let loader = ModelLoader::new(ident, runtime.factory().clone());
    Ok(loader.load(&parse_id(id))?.to_map())
}

pub fn cmd_get(runtime: &Runtime, json_mode: bool, ident: &str, id: &str) -> Result<(), CharcoalError> {
    let item = get_item(runtime, ident, id)?;
    if json_mode {
        print_json(&item);
    } else {
        for (key, value) in &item {
            println!("{:<24} {}", key, value);
        }
    }
    Ok(())
}

/// Items selected by `list` options, plus the unpaginated total.
pub fn list_items(runtime: &Runtime, ident: &str, args: &ListArgs) -> Result<(Vec<Data>, u64), CharcoalError> {
    let mut loader =
        CollectionLoader::new(ident, runtime.factory().clone()).with_query(build_query(args)?);
    let total = loader.load_count()?;
    let items = loader.load()?.into_iter().map(|m| m.to_map()).collect();
    Ok((items, total))
}

pub fn cmd_list(runtime: &Runtime, json_mode: bool, ident: &str, args: &ListArgs) -> Result<(), CharcoalError> {
    let (items, total) = list_items(runtime, ident, args)?;
    if json_mode {
        print_json(&json!({"total": total, "items": items}));
        return Ok(());
    }

    for item in &items {
        println!("{}", Value::Object(item.clone()));
    }
    println!("({} of {})", items.len(), total);
    Ok(())
}

// =============================================================================
// CACHE
// =============================================================================

pub fn cmd_cache_clear(runtime: &Runtime, json_mode: bool) -> Result<(), CharcoalError> {
    runtime.metadata_loader().clear_cache()?;
    if json_mode {
        print_json(&json!({"cleared": true}));
    } else {
        println!("Metadata cache cleared");
    }
    Ok(())
}
