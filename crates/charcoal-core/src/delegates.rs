//! # Delegates
//!
//! Fallback lookup across an ordered stack of delegate objects.
//!
//! A config or entity that lacks a key asks its delegates, in order, and the
//! first delegate holding the key wins. Delegates are read-only from the
//! owner's point of view: setters on the owner never write into them.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// LOOKUP TRAIT
// =============================================================================

/// Array-style read access used by the delegate scan.
pub trait Lookup {
    /// Whether the key is defined on this object.
    fn has_key(&self, key: &str) -> bool;

    /// Get the value of a key, if defined.
    fn get_key(&self, key: &str) -> Option<Value>;
}

/// Shared handle to a delegate.
pub type Delegate = Arc<dyn Lookup + Send + Sync>;

// =============================================================================
// DELEGATE STACK
// =============================================================================

/// An ordered stack of delegates. Registration order is significant.
#[derive(Clone, Default)]
pub struct Delegates {
    stack: Vec<Delegate>,
}

impl fmt::Debug for Delegates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delegates")
            .field("len", &self.stack.len())
            .finish()
    }
}

impl Delegates {
    /// Create an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole stack.
    pub fn set_delegates(&mut self, delegates: Vec<Delegate>) {
        self.stack = delegates;
    }

    /// Append a delegate; it is consulted after every existing one.
    pub fn add_delegate(&mut self, delegate: Delegate) {
        self.stack.push(delegate);
    }

    /// Prepend a delegate; it is consulted before every existing one.
    pub fn prepend_delegate(&mut self, delegate: Delegate) {
        self.stack.insert(0, delegate);
    }

    /// Number of registered delegates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    /// Check whether no delegate is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Whether any delegate defines the key.
    #[must_use]
    pub fn has_in_delegates(&self, key: &str) -> bool {
        self.stack.iter().any(|d| d.has_key(key))
    }

    /// Value of the key from the first delegate that defines it.
    #[must_use]
    pub fn get_in_delegates(&self, key: &str) -> Option<Value> {
        self.stack
            .iter()
            .find(|d| d.has_key(key))
            .and_then(|d| d.get_key(key))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    struct Fixed(BTreeMap<String, Value>);

    impl Lookup for Fixed {
        fn has_key(&self, key: &str) -> bool {
            self.0.contains_key(key)
        }

        fn get_key(&self, key: &str) -> Option<Value> {
            self.0.get(key).cloned()
        }
    }

    fn fixed(pairs: &[(&str, Value)]) -> Delegate {
        Arc::new(Fixed(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
        ))
    }

    #[test]
    fn empty_stack_finds_nothing() {
        let delegates = Delegates::new();
        assert!(delegates.is_empty());
        assert!(!delegates.has_in_delegates("a"));
        assert_eq!(delegates.get_in_delegates("a"), None);
    }

    #[test]
    fn first_match_wins() {
        let mut delegates = Delegates::new();
        delegates.add_delegate(fixed(&[("a", json!(1))]));
        delegates.add_delegate(fixed(&[("a", json!(2)), ("b", json!(3))]));

        assert_eq!(delegates.get_in_delegates("a"), Some(json!(1)));
        assert_eq!(delegates.get_in_delegates("b"), Some(json!(3)));
    }

    #[test]
    fn prepend_changes_winner() {
        let mut delegates = Delegates::new();
        delegates.add_delegate(fixed(&[("a", json!("first"))]));
        delegates.prepend_delegate(fixed(&[("a", json!("prepended"))]));

        assert_eq!(delegates.len(), 2);
        assert_eq!(delegates.get_in_delegates("a"), Some(json!("prepended")));
    }

    #[test]
    fn set_delegates_replaces_stack() {
        let mut delegates = Delegates::new();
        delegates.add_delegate(fixed(&[("a", json!(1))]));
        delegates.set_delegates(vec![fixed(&[("b", json!(2))])]);

        assert!(!delegates.has_in_delegates("a"));
        assert!(delegates.has_in_delegates("b"));
    }
}
