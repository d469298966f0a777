//! # charcoal-core
//!
//! The metadata-driven model pipeline of Charcoal - THE LOGIC.
//!
//! Metadata files describe a type's properties and storage. A factory
//! turns type identifiers into models, models read and write through a
//! `Source`, and loaders hydrate single models or whole collections from
//! structured queries.
//!
//! ## Pipeline
//!
//! ```text
//! ident ──> Factory ──> Model ──> Source ──> Connection (memory | redb)
//!              │          │
//!              │          └── Metadata <── MetadataLoader <── CachePool
//!              └── Resolver / class map
//! ```
//!
//! ## Architectural Constraints
//!
//! - Synchronous, blocking I/O; no async, no network dependencies
//! - Registries and schemas use BTreeMap; properties keep declared order
//! - Metadata is immutable once loaded and shared behind `Arc`
//! - Sources never cache rows; the only cache is the metadata cache

// =============================================================================
// MODULES
// =============================================================================

pub mod cache;
pub mod config;
pub mod delegates;
pub mod factory;
pub mod loader;
pub mod metadata;
pub mod model;
pub mod pivot;
pub mod query;
pub mod queue;
pub mod source;
pub mod translation;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{CharcoalError, Data, FactoryError, Ident};

// =============================================================================
// RE-EXPORTS: Metadata & Configuration
// =============================================================================

pub use cache::{CachePool, MemoryPool, NullPool, RedbPool};
pub use config::ConfigMap;
pub use delegates::{Delegate, Delegates, Lookup};
pub use metadata::{
    KeyMode, Metadata, MetadataLoader, PropertyDescriptor, PropertyType, merge_recursive,
};

// =============================================================================
// RE-EXPORTS: Factory & Models
// =============================================================================

pub use factory::{Factory, Resolver};
pub use model::{
    MODEL_CLASS, Model, ModelDependencies, ModelFactory, ModelState, ValidationFailure,
    ValidatorResults, model_factory, register_model,
};
pub use translation::{Locales, Translation};

// =============================================================================
// RE-EXPORTS: Storage & Loading
// =============================================================================

pub use loader::{Collection, CollectionLoader, LazyCollection, ModelLoader};
pub use pivot::{Pivot, Pivots};
pub use query::{Conjunction, Filter, Operator, Order, OrderMode, Pagination, Query};
pub use queue::{ItemOutcome, ProcessLock, QueueProcessor, QueueReport};
pub use source::{
    Connection, DatabaseSource, MemoryConnection, RedbConnection, Row, Source, SqlValue, Statement,
};
