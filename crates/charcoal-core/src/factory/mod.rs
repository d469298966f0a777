//! # Factories
//!
//! Turn a string type identifier into an instance.
//!
//! Resolution order for `create("foo/bar-baz")`:
//! 1. the explicit identifier → class map,
//! 2. the identifier itself when it is a registered class name,
//! 3. the resolver's naming strategy (`Foo\BarBaz`), when configured,
//! 4. the default class, when configured.
//!
//! The resolved class must be registered. When the factory has a base
//! class, the resolved class must be that base or declare it among its
//! ancestors. Every failure is a `CharcoalError::Factory`.

pub mod resolver;

use crate::types::{CharcoalError, FactoryError};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

pub use resolver::Resolver;

/// Builds an instance from the requested identifier and the factory
/// arguments.
pub type Constructor<T, A> = Arc<dyn Fn(&str, &A) -> Result<T, CharcoalError> + Send + Sync>;

/// Runs on every freshly built instance.
pub type Callback<T> = Arc<dyn Fn(&mut T) + Send + Sync>;

struct ClassEntry<T, A> {
    ancestors: BTreeSet<String>,
    ctor: Constructor<T, A>,
}

/// Identifier-driven instance factory.
pub struct Factory<T, A = ()> {
    classes: BTreeMap<String, ClassEntry<T, A>>,
    map: BTreeMap<String, String>,
    resolver: Option<Resolver>,
    base_class: Option<String>,
    default_class: Option<String>,
    arguments: A,
    callback: Option<Callback<T>>,
    resolved: Mutex<BTreeMap<String, String>>,
    instances: Mutex<BTreeMap<String, Arc<T>>>,
}

impl<T, A: std::fmt::Debug> std::fmt::Debug for Factory<T, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Factory")
            .field("classes", &self.classes.keys().collect::<Vec<_>>())
            .field("map", &self.map)
            .field("resolver", &self.resolver)
            .field("base_class", &self.base_class)
            .field("default_class", &self.default_class)
            .field("arguments", &self.arguments)
            .finish_non_exhaustive()
    }
}

impl<T> Factory<T, ()> {
    /// Create a map-only factory without constructor arguments.
    #[must_use]
    pub fn new() -> Self {
        Self::with_arguments(())
    }
}

impl<T> Default for Factory<T, ()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, A> Factory<T, A> {
    /// Create a map-only factory whose constructors receive `arguments`.
    pub fn with_arguments(arguments: A) -> Self {
        Self {
            classes: BTreeMap::new(),
            map: BTreeMap::new(),
            resolver: None,
            base_class: None,
            default_class: None,
            arguments,
            callback: None,
            resolved: Mutex::new(BTreeMap::new()),
            instances: Mutex::new(BTreeMap::new()),
        }
    }

    // =========================================================================
    // CONFIGURATION
    // =========================================================================

    /// Enable resolver-based resolution.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Require resolved classes to be (or descend from) `base`.
    #[must_use]
    pub fn with_base_class(mut self, base: impl Into<String>) -> Self {
        self.base_class = Some(base.into());
        self
    }

    /// Fall back to `class` when an identifier can not be resolved.
    #[must_use]
    pub fn with_default_class(mut self, class: impl Into<String>) -> Self {
        self.default_class = Some(class.into());
        self
    }

    /// Register a class with the names of the bases it satisfies.
    pub fn register_class<F>(&mut self, class: impl Into<String>, ancestors: &[&str], ctor: F)
    where
        F: Fn(&str, &A) -> Result<T, CharcoalError> + Send + Sync + 'static,
    {
        self.classes.insert(
            class.into(),
            ClassEntry {
                ancestors: ancestors.iter().map(|a| (*a).to_string()).collect(),
                ctor: Arc::new(ctor),
            },
        );
    }

    /// Map an identifier to a class, consulted before the resolver.
    pub fn add_class_to_map(&mut self, ident: impl Into<String>, class: impl Into<String>) {
        self.map.insert(ident.into(), class.into());
    }

    /// Replace the identifier map.
    pub fn set_map(&mut self, map: BTreeMap<String, String>) {
        self.map = map;
    }

    /// Set the factory-level post-construction callback.
    pub fn set_callback<F>(&mut self, callback: F)
    where
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
    }

    /// Default constructor arguments.
    pub fn arguments(&self) -> &A {
        &self.arguments
    }

    /// Registered class names.
    pub fn classes(&self) -> Vec<String> {
        self.classes.keys().cloned().collect()
    }

    // =========================================================================
    // RESOLUTION
    // =========================================================================

    /// Resolve an identifier to a registered class name. Memoized.
    pub fn resolve(&self, ident: &str) -> Result<String, CharcoalError> {
        if let Some(class) = lock(&self.resolved)?.get(ident) {
            return Ok(class.clone());
        }

        let class = self.resolve_uncached(ident)?;
        debug!(ident, class = %class, "factory resolved identifier");
        lock(&self.resolved)?.insert(ident.to_string(), class.clone());
        Ok(class)
    }

    fn resolve_uncached(&self, ident: &str) -> Result<String, CharcoalError> {
        if let Some(class) = self.map.get(ident) {
            if self.classes.contains_key(class) {
                return Ok(class.clone());
            }
        } else if self.classes.contains_key(ident) {
            return Ok(ident.to_string());
        } else if let Some(resolver) = &self.resolver {
            let class = resolver.resolve(ident);
            if self.classes.contains_key(&class) {
                return Ok(class);
            }
        }

        match &self.default_class {
            Some(default) if self.classes.contains_key(default) => Ok(default.clone()),
            _ => Err(FactoryError::Unresolved {
                ident: ident.to_string(),
            }
            .into()),
        }
    }

    /// Whether `create(ident)` would find a class.
    pub fn is_resolvable(&self, ident: &str) -> bool {
        self.resolve(ident).is_ok()
    }

    fn entry(&self, ident: &str) -> Result<&ClassEntry<T, A>, CharcoalError> {
        let class = self.resolve(ident)?;
        let entry = self
            .classes
            .get(&class)
            .ok_or_else(|| FactoryError::Unresolved {
                ident: ident.to_string(),
            })?;

        if let Some(base) = &self.base_class {
            if &class != base && !entry.ancestors.contains(base) {
                return Err(FactoryError::InvalidType {
                    ident: ident.to_string(),
                    class,
                    base: base.clone(),
                }
                .into());
            }
        }
        Ok(entry)
    }

    // =========================================================================
    // CREATION
    // =========================================================================

    /// Create a new instance with the default arguments.
    pub fn create(&self, ident: &str) -> Result<T, CharcoalError> {
        self.create_with_callback(ident, &self.arguments, None::<fn(&mut T)>)
    }

    /// Create a new instance with explicit arguments.
    pub fn create_with(&self, ident: &str, arguments: &A) -> Result<T, CharcoalError> {
        self.create_with_callback(ident, arguments, None::<fn(&mut T)>)
    }

    /// Create a new instance and run `callback` on it after the
    /// factory-level callback.
    pub fn create_with_callback<F>(
        &self,
        ident: &str,
        arguments: &A,
        callback: Option<F>,
    ) -> Result<T, CharcoalError>
    where
        F: FnOnce(&mut T),
    {
        let entry = self.entry(ident)?;
        let mut instance = (entry.ctor)(ident, arguments)?;
        if let Some(factory_callback) = &self.callback {
            factory_callback(&mut instance);
        }
        if let Some(callback) = callback {
            callback(&mut instance);
        }
        Ok(instance)
    }

    /// Shared instance for an identifier, created on first use.
    pub fn get(&self, ident: &str) -> Result<Arc<T>, CharcoalError> {
        if let Some(instance) = lock(&self.instances)?.get(ident) {
            return Ok(instance.clone());
        }
        let instance = Arc::new(self.create(ident)?);
        lock(&self.instances)?.insert(ident.to_string(), instance.clone());
        Ok(instance)
    }
}

fn lock<V>(mutex: &Mutex<V>) -> Result<MutexGuard<'_, V>, CharcoalError> {
    mutex
        .lock()
        .map_err(|e| CharcoalError::Config(format!("factory state poisoned: {}", e)))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    struct Widget {
        class: &'static str,
        label: String,
    }

    fn widget_factory() -> Factory<Widget, String> {
        let mut factory = Factory::with_arguments("default".to_string())
            .with_resolver(Resolver::new().with_suffix("Widget"))
            .with_base_class("Widget");
        factory.register_class("TableWidget", &["Widget"], |_ident: &str, label: &String| {
            Ok(Widget {
                class: "TableWidget",
                label: label.clone(),
            })
        });
        factory.register_class("Admin\\FormWidget", &["Widget"], |_ident: &str, label: &String| {
            Ok(Widget {
                class: "Admin\\FormWidget",
                label: label.clone(),
            })
        });
        factory.register_class("Stray", &[], |_: &str, _: &String| {
            Ok(Widget {
                class: "Stray",
                label: String::new(),
            })
        });
        factory
    }

    #[test]
    fn resolves_through_resolver() {
        let factory = widget_factory();
        let widget = factory.create("table").unwrap();
        assert_eq!(widget.class, "TableWidget");
        assert_eq!(widget.label, "default");

        let form = factory.create_with("admin/form", &"custom".to_string()).unwrap();
        assert_eq!(form.class, "Admin\\FormWidget");
        assert_eq!(form.label, "custom");
    }

    #[test]
    fn map_takes_precedence() {
        let mut factory = widget_factory();
        factory.add_class_to_map("table", "Admin\\FormWidget");
        assert_eq!(factory.resolve("table").unwrap(), "Admin\\FormWidget");
    }

    #[test]
    fn resolution_is_idempotent() {
        let factory = widget_factory();
        let first = factory.resolve("table").unwrap();
        for _ in 0..5 {
            assert_eq!(factory.resolve("table").unwrap(), first);
        }
    }

    #[test]
    fn missing_and_invalid_fail_uniformly() {
        let factory = widget_factory();
        let missing = factory.create("nothing").unwrap_err();
        let invalid = factory.create("Stray").unwrap_err();

        assert!(matches!(
            missing,
            CharcoalError::Factory(FactoryError::Unresolved { .. })
        ));
        assert!(matches!(
            invalid,
            CharcoalError::Factory(FactoryError::InvalidType { .. })
        ));
        assert!(missing.to_string().contains("nothing"));
    }

    #[test]
    fn default_class_catches_unresolved() {
        let factory = widget_factory().with_default_class("TableWidget");
        assert_eq!(factory.create("nothing").unwrap().class, "TableWidget");
    }

    #[test]
    fn callbacks_run_in_order() {
        let mut factory = widget_factory();
        factory.set_callback(|w: &mut Widget| w.label.push_str("+factory"));
        let widget = factory
            .create_with_callback(
                "table",
                &"x".to_string(),
                Some(|w: &mut Widget| w.label.push_str("+call")),
            )
            .unwrap();
        assert_eq!(widget.label, "x+factory+call");
    }

    #[test]
    fn get_shares_instances() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        let mut factory: Factory<usize> = Factory::new();
        factory.register_class("counter", &[], move |_: &str, _: &()| {
            Ok(counter.fetch_add(1, Ordering::SeqCst))
        });

        let a = factory.get("counter").unwrap();
        let b = factory.get("counter").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }
}
