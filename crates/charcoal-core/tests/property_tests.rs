//! # Property-Based Tests
//!
//! Invariants of merging, resolution, hydration, lazy loading and
//! delegate lookup, checked with proptest.

use charcoal_core::{
    CollectionLoader, ConfigMap, Delegate, Delegates, Factory, Ident, MODEL_CLASS, MemoryConnection,
    Locales, Metadata, MetadataLoader, Model, ModelDependencies, Order, Resolver,
    merge_recursive, model_factory,
};
use proptest::collection::{btree_map, vec};
use proptest::prelude::*;
use serde_json::{Value, json};
use std::sync::Arc;

fn flat_object(map: &std::collections::BTreeMap<String, i64>) -> Value {
    Value::Object(map.iter().map(|(k, v)| (k.clone(), json!(v))).collect())
}

fn item_factory(rows: usize) -> Arc<charcoal_core::ModelFactory> {
    let mut loader = MetadataLoader::new("/nonexistent", Vec::new());
    loader.register(
        "test/item",
        json!({"properties": {"id": {"type": "id"}, "rank": {"type": "integer"}}}),
    );
    let deps = ModelDependencies::new(
        Arc::new(loader),
        Arc::new(MemoryConnection::new()),
        Locales::default(),
    );
    let mut factory = model_factory(deps);
    factory.add_class_to_map("test/item", MODEL_CLASS);

    let source = factory.arguments().source("test/item").expect("source");
    source.create_table().expect("create");
    for rank in 0..rows {
        let data = json!({"rank": rank});
        source.save_item(data.as_object().expect("object")).expect("save");
    }
    Arc::new(factory)
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Every key of both layers survives a merge; the overlay wins conflicts.
    #[test]
    fn merge_preserves_keys_and_overrides(
        a in btree_map("[a-e]{1,3}", any::<i64>(), 0..10),
        b in btree_map("[a-e]{1,3}", any::<i64>(), 0..10),
    ) {
        let merged = merge_recursive(&flat_object(&a), &flat_object(&b));
        let merged = merged.as_object().expect("object");

        for (k, v) in &a {
            prop_assert!(merged.contains_key(k));
            if !b.contains_key(k) {
                prop_assert_eq!(&merged[k], &json!(v));
            }
        }
        for (k, v) in &b {
            prop_assert_eq!(&merged[k], &json!(v));
        }
        prop_assert!(merged.len() <= a.len() + b.len());
    }

    /// Merging a layer onto itself changes nothing.
    #[test]
    fn merge_is_idempotent(a in btree_map("[a-z]{1,4}", any::<i64>(), 0..10)) {
        let value = flat_object(&a);
        prop_assert_eq!(merge_recursive(&value, &value), value);
    }

    /// Resolution is stable across calls and matches the resolver rules.
    #[test]
    fn resolution_is_idempotent(
        parts in vec("[a-z]{1,6}", 1..4),
        sep in prop::sample::select(vec!['/', '-', '.']),
    ) {
        let ident = parts.join(&sep.to_string());
        let resolver = Resolver::new();
        let class = resolver.resolve(&ident);

        let mut factory: Factory<String> = Factory::new().with_resolver(resolver);
        factory.register_class(class.clone(), &[], |ident: &str, _: &()| Ok(ident.to_string()));

        let first = factory.resolve(&ident).expect("resolve");
        let second = factory.resolve(&ident).expect("resolve");
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first, class);
        prop_assert_eq!(factory.create(&ident).expect("create"), ident);
    }

    /// Data assigned with set_data reads back unchanged, for declared
    /// typed properties as well as undeclared keys.
    #[test]
    fn set_data_round_trips_through_to_map(
        views in "[0-9]{1,4}|[a-z ]{0,6}",
        flag in "on|off|yes|0|1|maybe",
        published in "20[0-9]{2}-0[1-9]-1[0-9]( 0[0-9]:[0-5][0-9])?|soon",
        tags in "[a-z]{1,4}(,[a-z]{0,4}){0,3}",
        extra in btree_map("[a-z]{1,8}", "[ -~]{0,12}", 0..6),
    ) {
        let metadata = Metadata::new(None, json!({"properties": {
            "views": {"type": "integer"},
            "flag": {"type": "boolean"},
            "published": {"type": "date-time"},
            "tags": {"type": "string", "multiple": true}
        }}));
        let mut model = Model::new(Ident::parse("test/bag").expect("ident"), Arc::new(metadata));

        let mut map = charcoal_core::Data::new();
        map.insert("views".to_string(), json!(views));
        map.insert("flag".to_string(), json!(flag));
        map.insert("published".to_string(), json!(published));
        map.insert("tags".to_string(), json!(tags));
        for (k, v) in &extra {
            map.insert(k.clone(), json!(v));
        }

        model.set_data(&map).expect("set_data");
        prop_assert_eq!(model.to_map(), map);
    }

    /// A lazy pass yields every stored row once, whatever the chunk size.
    #[test]
    fn lazy_yields_every_row(rows in 0usize..25, chunk in 1u64..8) {
        let factory = item_factory(rows);
        let mut loader = CollectionLoader::new("test/item", factory).order(Order::asc("rank"));
        let mut lazy = loader.lazy(chunk);

        let ranks: Vec<i64> = lazy
            .iter()
            .expect("iter")
            .map(|m| m.expect("model").get("rank").and_then(Value::as_i64).expect("rank"))
            .collect();
        prop_assert_eq!(ranks, (0..rows as i64).collect::<Vec<_>>());
    }

    /// The first delegate holding a key wins, in registration order.
    #[test]
    fn delegate_order_decides(values in vec(prop::option::of(any::<i64>()), 1..6)) {
        let mut delegates = Delegates::new();
        for value in &values {
            let mut config = ConfigMap::new();
            if let Some(v) = value {
                config.set("shared.key", json!(v)).expect("set");
            }
            let delegate: Delegate = Arc::new(config);
            delegates.add_delegate(delegate);
        }

        let expected = values.iter().flatten().next().map(|v| json!(v));
        prop_assert_eq!(delegates.get_in_delegates("shared.key"), expected.clone());
        prop_assert_eq!(delegates.has_in_delegates("shared.key"), expected.is_some());
    }
}
