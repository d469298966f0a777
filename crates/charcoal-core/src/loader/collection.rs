//! Eagerly loaded model collections.

use crate::model::Model;
use crate::source::SqlValue;
use serde_json::Value;
use std::collections::BTreeMap;

/// Models in load order, addressable by key.
///
/// A model whose key is already present replaces the earlier one in
/// place. Models without a key are appended and only reachable by
/// iteration.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    models: Vec<Model>,
    index: BTreeMap<String, usize>,
}

fn index_key(id: &Value) -> String {
    SqlValue::from_json(id).key_string()
}

impl Collection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a model, replacing any model with the same key.
    pub fn push(&mut self, model: Model) {
        match model.id().map(index_key) {
            Some(key) => match self.index.get(&key) {
                Some(&position) => {
                    if let Some(slot) = self.models.get_mut(position) {
                        *slot = model;
                    }
                }
                None => {
                    self.index.insert(key, self.models.len());
                    self.models.push(model);
                }
            },
            None => self.models.push(model),
        }
    }

    /// Model stored under `id`.
    #[must_use]
    pub fn get(&self, id: &Value) -> Option<&Model> {
        self.index
            .get(&index_key(id))
            .and_then(|&position| self.models.get(position))
    }

    /// Keys of keyed models, in load order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.models
            .iter()
            .filter_map(|m| m.id().map(index_key))
            .collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Model> {
        self.models.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<Model> {
        self.models
    }
}

impl<'a> IntoIterator for &'a Collection {
    type Item = &'a Model;
    type IntoIter = std::slice::Iter<'a, Model>;

    fn into_iter(self) -> Self::IntoIter {
        self.models.iter()
    }
}

impl IntoIterator for Collection {
    type Item = Model;
    type IntoIter = std::vec::IntoIter<Model>;

    fn into_iter(self) -> Self::IntoIter {
        self.models.into_iter()
    }
}
