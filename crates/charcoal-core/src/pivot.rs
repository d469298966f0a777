//! # Pivots
//!
//! Join records attaching target models to a parent model, grouped and
//! ordered. Stored like any other item, through a `DatabaseSource` built on
//! fixed metadata.

use crate::metadata::Metadata;
use crate::model::Model;
use crate::query::{Filter, Order, Query};
use crate::source::{Connection, DatabaseSource, Source, SqlValue};
use crate::translation::Locales;
use crate::types::{CharcoalError, Data, Ident};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Type identifier of pivot records.
pub const PIVOT_IDENT: &str = "charcoal/pivot";

/// Table holding pivot records.
pub const PIVOT_TABLE: &str = "charcoal_pivots";

fn pivot_metadata() -> Result<Metadata, CharcoalError> {
    Ok(Metadata::new(
        Some(Ident::parse(PIVOT_IDENT)?),
        json!({
            "properties": {
                "id": {"type": "id"},
                "source_type": {"type": "string", "max_length": 255, "required": true},
                "source_id": {"type": "string", "max_length": 255, "required": true},
                "target_type": {"type": "string", "max_length": 255, "required": true},
                "target_id": {"type": "string", "max_length": 255, "required": true},
                "group": {"type": "string", "max_length": 255, "default": ""},
                "position": {"type": "integer", "default": 0}
            },
            "sources": {"default": {"table": PIVOT_TABLE}}
        }),
    ))
}

/// One join between a parent and a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pivot {
    pub id: Option<i64>,
    pub source_type: String,
    pub source_id: String,
    pub target_type: String,
    pub target_id: String,
    pub group: String,
    pub position: i64,
}

impl Pivot {
    fn from_data(data: &Data) -> Self {
        let text = |key: &str| match data.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        Self {
            id: data.get("id").and_then(Value::as_i64),
            source_type: text("source_type"),
            source_id: text("source_id"),
            target_type: text("target_type"),
            target_id: text("target_id"),
            group: text("group"),
            position: data.get("position").and_then(Value::as_i64).unwrap_or(0),
        }
    }
}

/// Reference to a stored model: its type and key.
fn model_ref(model: &Model) -> Result<(String, String), CharcoalError> {
    let id = model.id().ok_or_else(|| {
        CharcoalError::Persistence(format!(
            "model \"{}\" must be stored before it can be joined",
            model.obj_type()
        ))
    })?;
    Ok((
        model.obj_type().as_str().to_string(),
        SqlValue::from_json(id).key_string(),
    ))
}

/// Store of pivot records.
#[derive(Debug)]
pub struct Pivots {
    source: DatabaseSource,
}

impl Pivots {
    pub fn new(connection: Arc<dyn Connection>) -> Result<Self, CharcoalError> {
        let source = DatabaseSource::new(
            connection,
            Arc::new(pivot_metadata()?),
            Locales::default(),
        )?;
        Ok(Self { source })
    }

    /// Create the pivot table, or add what it lacks.
    pub fn install(&self) -> Result<(), CharcoalError> {
        self.source.create_or_alter()?;
        Ok(())
    }

    /// Join `target` to `parent` at the end of `group`.
    pub fn attach(&self, parent: &Model, target: &Model, group: &str) -> Result<Pivot, CharcoalError> {
        let (source_type, source_id) = model_ref(parent)?;
        let (target_type, target_id) = model_ref(target)?;
        let position = i64::try_from(self.source.count_items(&self.group_query(
            &source_type,
            &source_id,
            group,
        ))?)
        .map_err(|e| CharcoalError::Persistence(e.to_string()))?;

        let mut data = Data::new();
        data.insert("source_type".into(), json!(source_type));
        data.insert("source_id".into(), json!(source_id));
        data.insert("target_type".into(), json!(target_type));
        data.insert("target_id".into(), json!(target_id));
        data.insert("group".into(), json!(group));
        data.insert("position".into(), json!(position));
        let id = self.source.save_item(&data)?;
        data.insert("id".into(), id);
        Ok(Pivot::from_data(&data))
    }

    /// Remove every join of `target` to `parent` in `group`.
    pub fn detach(&self, parent: &Model, target: &Model, group: &str) -> Result<usize, CharcoalError> {
        let (source_type, source_id) = model_ref(parent)?;
        let (target_type, target_id) = model_ref(target)?;
        let query = self
            .group_query(&source_type, &source_id, group)
            .filter(Filter::eq("target_type", json!(target_type)))
            .filter(Filter::eq("target_id", json!(target_id)));
        self.delete_matching(&query)
    }

    /// Joins of `parent` in `group`, by position.
    pub fn targets(&self, parent: &Model, group: &str) -> Result<Vec<Pivot>, CharcoalError> {
        let (source_type, source_id) = model_ref(parent)?;
        let query = self
            .group_query(&source_type, &source_id, group)
            .order(Order::asc("position"))
            .order(Order::asc("id"));
        Ok(self
            .source
            .load_items(&query)?
            .iter()
            .map(Pivot::from_data)
            .collect())
    }

    /// Remove every join of `parent`, in all groups.
    pub fn delete_for(&self, parent: &Model) -> Result<usize, CharcoalError> {
        let (source_type, source_id) = model_ref(parent)?;
        let query = Query::new()
            .filter(Filter::eq("source_type", json!(source_type)))
            .filter(Filter::eq("source_id", json!(source_id)));
        self.delete_matching(&query)
    }

    /// Remove the joins of `parent`, then `parent` itself.
    pub fn delete_with_joins(&self, parent: &mut Model) -> Result<bool, CharcoalError> {
        let removed = self.delete_for(parent)?;
        tracing::debug!("Removed {} joins of {}", removed, parent.obj_type());
        parent.delete()
    }

    fn group_query(&self, source_type: &str, source_id: &str, group: &str) -> Query {
        Query::new()
            .filter(Filter::eq("source_type", json!(source_type)))
            .filter(Filter::eq("source_id", json!(source_id)))
            .filter(Filter::eq("group", json!(group)))
    }

    fn delete_matching(&self, query: &Query) -> Result<usize, CharcoalError> {
        let mut removed = 0;
        for item in self.source.load_items(query)? {
            if let Some(id) = item.get("id") {
                if self.source.delete_item(id)? {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::source::MemoryConnection;

    fn setup() -> (Arc<dyn Connection>, Pivots, Arc<DatabaseSource>) {
        let connection: Arc<dyn Connection> = Arc::new(MemoryConnection::new());
        let pivots = Pivots::new(connection.clone()).unwrap();
        pivots.install().unwrap();

        let meta = Metadata::new(
            Some(Ident::parse("blog/post").unwrap()),
            json!({"properties": {"id": {"type": "id"}, "title": {"type": "string"}}}),
        );
        let posts = Arc::new(
            DatabaseSource::new(connection.clone(), Arc::new(meta), Locales::default()).unwrap(),
        );
        posts.create_table().unwrap();
        (connection, pivots, posts)
    }

    fn post(source: &Arc<DatabaseSource>, title: &str) -> Model {
        let mut model = Model::new(Ident::parse("blog/post").unwrap(), source.metadata().clone())
            .with_source(source.clone());
        model.set("title", json!(title)).unwrap();
        model.save().unwrap();
        model
    }

    #[test]
    fn attach_orders_targets_by_position() {
        let (_conn, pivots, posts) = setup();
        let parent = post(&posts, "parent");
        let a = post(&posts, "a");
        let b = post(&posts, "b");

        pivots.attach(&parent, &b, "related").unwrap();
        pivots.attach(&parent, &a, "related").unwrap();
        pivots.attach(&parent, &a, "featured").unwrap();

        let related = pivots.targets(&parent, "related").unwrap();
        let ids: Vec<_> = related.iter().map(|p| p.target_id.as_str()).collect();
        assert_eq!(ids, vec!["3", "2"]);
        assert_eq!(related[1].position, 1);
        assert_eq!(pivots.targets(&parent, "featured").unwrap().len(), 1);

        assert_eq!(pivots.detach(&parent, &b, "related").unwrap(), 1);
        assert_eq!(pivots.targets(&parent, "related").unwrap().len(), 1);
    }

    #[test]
    fn unsaved_models_can_not_be_joined() {
        let (_conn, pivots, posts) = setup();
        let parent = post(&posts, "parent");
        let draft = Model::new(Ident::parse("blog/post").unwrap(), posts.metadata().clone());
        assert!(matches!(
            pivots.attach(&parent, &draft, "related"),
            Err(CharcoalError::Persistence(_))
        ));
    }

    #[test]
    fn deleting_parent_cascades_joins() {
        let (_conn, pivots, posts) = setup();
        let mut parent = post(&posts, "parent");
        let other = post(&posts, "other");
        let target = post(&posts, "target");
        pivots.attach(&parent, &target, "related").unwrap();
        pivots.attach(&parent, &target, "featured").unwrap();
        pivots.attach(&other, &target, "related").unwrap();

        assert!(pivots.delete_with_joins(&mut parent).unwrap());
        assert!(posts.load_item(&json!(1)).unwrap().is_none());
        assert!(pivots.targets(&parent, "related").unwrap().is_empty());
        assert!(pivots.targets(&parent, "featured").unwrap().is_empty());
        assert_eq!(pivots.targets(&other, "related").unwrap().len(), 1);
    }
}
