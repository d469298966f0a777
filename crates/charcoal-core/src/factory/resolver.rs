//! Identifier-to-class naming strategy.
//!
//! `foo/bar-baz` resolves to `Foo\BarBaz`: the first character and every
//! character following a capital marker are upper-cased, then the
//! replacement table is applied, then prefix and suffix are added.

/// Naming strategy used by factories to turn identifiers into class names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolver {
    prefix: String,
    suffix: String,
    capitals: Vec<char>,
    replacements: Vec<(String, String)>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            suffix: String::new(),
            capitals: vec!['-', '\\', '/', '.', '_'],
            replacements: vec![
                ("-".to_string(), String::new()),
                ("/".to_string(), "\\".to_string()),
                (".".to_string(), "_".to_string()),
            ],
        }
    }
}

impl Resolver {
    /// Create a resolver with the default rules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend every resolved name with `prefix` (e.g. a namespace).
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Append `suffix` to every resolved name (e.g. `Widget`).
    #[must_use]
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Replace the capital markers.
    #[must_use]
    pub fn with_capitals(mut self, capitals: Vec<char>) -> Self {
        self.capitals = capitals;
        self
    }

    /// Replace the replacement table.
    #[must_use]
    pub fn with_replacements(mut self, replacements: Vec<(String, String)>) -> Self {
        self.replacements = replacements;
        self
    }

    /// Resolve an identifier into a class name.
    #[must_use]
    pub fn resolve(&self, ident: &str) -> String {
        let mut name = String::with_capacity(ident.len());
        let mut upper_next = true;
        for c in ident.chars() {
            if upper_next {
                name.extend(c.to_uppercase());
            } else {
                name.push(c);
            }
            upper_next = self.capitals.contains(&c);
        }
        for (from, to) in &self.replacements {
            name = name.replace(from.as_str(), to);
        }
        format!("{}{}{}", self.prefix, name, self.suffix)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn default_rules() {
        let resolver = Resolver::new();
        assert_eq!(resolver.resolve("foo/bar-baz"), "Foo\\BarBaz");
        assert_eq!(resolver.resolve("charcoal/cms/news"), "Charcoal\\Cms\\News");
        assert_eq!(resolver.resolve("a.b_c"), "A_B_C");
    }

    #[test]
    fn prefix_and_suffix() {
        let resolver = Resolver::new().with_prefix("\\App\\").with_suffix("Widget");
        assert_eq!(resolver.resolve("table"), "\\App\\TableWidget");
    }

    #[test]
    fn custom_tables() {
        let resolver = Resolver::new()
            .with_capitals(vec!['_'])
            .with_replacements(vec![("_".to_string(), "::".to_string())]);
        assert_eq!(resolver.resolve("core_model"), "Core::Model");
    }
}
