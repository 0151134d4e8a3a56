//! Behavior every real engine must share, run against each implementation.

use essaybook_core::{CollectionSchema, DatabaseSchema, IndexDef, RecordKey};
use serde_json::{json, Value};

use crate::error::StoreError;
use crate::storage::engine::{StorageEngine, WriteMode};
use crate::storage::record::into_document;

pub fn schema() -> DatabaseSchema {
    DatabaseSchema::new("conformance", 3)
        .with_collection(
            CollectionSchema::auto_increment("evaluations", "id")
                .with_index(IndexDef::on("created_at"))
                .with_index(IndexDef::on("student_class")),
        )
        .with_collection(
            CollectionSchema::keyed("items", "code")
                .with_index(IndexDef::on("label").unique())
                .with_index(IndexDef::on("rank")),
        )
}

fn write(
    engine: &dyn StorageEngine,
    collection: &str,
    value: Value,
    mode: WriteMode,
) -> Result<RecordKey, StoreError> {
    engine.write(collection, into_document(collection, value).unwrap(), mode)
}

fn ids(docs: &[serde_json::Map<String, Value>]) -> Vec<i64> {
    docs.iter().map(|d| d["id"].as_i64().unwrap()).collect()
}

pub fn generated_keys_are_sequential(engine: &dyn StorageEngine) {
    for name in ["Ana", "Bo", "Cy"] {
        write(engine, "evaluations", json!({"student_name": name}), WriteMode::Insert).unwrap();
    }

    let all = engine.get_all("evaluations", None).unwrap();
    assert_eq!(ids(&all), vec![1, 2, 3]);

    let second = engine
        .get("evaluations", &RecordKey::from(2_u64))
        .unwrap()
        .unwrap();
    assert_eq!(second["student_name"], json!("Bo"));
    assert_eq!(second["id"], json!(2));
}

pub fn insert_rejects_duplicate_keys(engine: &dyn StorageEngine) {
    write(engine, "items", json!({"code": "a", "label": "first"}), WriteMode::Insert).unwrap();

    let err = write(engine, "items", json!({"code": "a", "label": "second"}), WriteMode::Insert)
        .unwrap_err();
    assert!(matches!(err, StoreError::Constraint { .. }), "{err}");
    assert!(err.is_transaction_error());

    assert_eq!(engine.count("items").unwrap(), 1);
    let kept = engine.get("items", &RecordKey::from("a")).unwrap().unwrap();
    assert_eq!(kept["label"], json!("first"));
}

pub fn upsert_replaces_and_reindexes(engine: &dyn StorageEngine) {
    write(engine, "items", json!({"code": "a", "label": "x", "rank": 2}), WriteMode::Upsert)
        .unwrap();
    write(engine, "items", json!({"code": "a", "label": "y", "rank": 1}), WriteMode::Upsert)
        .unwrap();

    assert_eq!(engine.count("items").unwrap(), 1);
    let record = engine.get("items", &RecordKey::from("a")).unwrap().unwrap();
    assert_eq!(record["label"], json!("y"));

    let by_label = engine.get_all("items", Some("label")).unwrap();
    assert_eq!(by_label.len(), 1);
    assert_eq!(by_label[0]["label"], json!("y"));
    assert_eq!(engine.get_all("items", Some("rank")).unwrap().len(), 1);

    // The old label is free again.
    write(engine, "items", json!({"code": "b", "label": "x"}), WriteMode::Insert).unwrap();
}

pub fn unique_index_is_enforced(engine: &dyn StorageEngine) {
    write(engine, "items", json!({"code": "a", "label": "x"}), WriteMode::Insert).unwrap();

    let err = write(engine, "items", json!({"code": "b", "label": "x"}), WriteMode::Insert)
        .unwrap_err();
    assert!(matches!(err, StoreError::Constraint { .. }), "{err}");
    assert_eq!(engine.count("items").unwrap(), 1);
    assert_eq!(engine.get_all("items", Some("label")).unwrap().len(), 1);

    // Rewriting the owner of the value is not a clash.
    write(engine, "items", json!({"code": "a", "label": "x", "rank": 5}), WriteMode::Upsert)
        .unwrap();
}

pub fn index_order_breaks_ties_by_key(engine: &dyn StorageEngine) {
    for created_at in [Some("2026-01-02"), Some("2026-01-01"), Some("2026-01-02"), None] {
        let doc = match created_at {
            Some(at) => json!({"created_at": at}),
            None => json!({}),
        };
        write(engine, "evaluations", doc, WriteMode::Insert).unwrap();
    }

    let ordered = engine.get_all("evaluations", Some("created_at")).unwrap();
    assert_eq!(ids(&ordered), vec![2, 1, 3]);
    assert_eq!(engine.get_all("evaluations", None).unwrap().len(), 4);
}

pub fn delete_is_idempotent(engine: &dyn StorageEngine) {
    write(engine, "evaluations", json!({"created_at": "t"}), WriteMode::Insert).unwrap();

    engine.delete("evaluations", &RecordKey::from(99_u64)).unwrap();
    assert_eq!(engine.count("evaluations").unwrap(), 1);

    engine.delete("evaluations", &RecordKey::from(1_u64)).unwrap();
    assert_eq!(engine.count("evaluations").unwrap(), 0);
    assert!(engine.get_all("evaluations", Some("created_at")).unwrap().is_empty());

    engine.delete("evaluations", &RecordKey::from(1_u64)).unwrap();
}

pub fn clear_empties_collection_and_indexes(engine: &dyn StorageEngine) {
    for class in ["5A", "5B"] {
        write(engine, "evaluations", json!({"student_class": class}), WriteMode::Insert).unwrap();
    }

    engine.clear("evaluations").unwrap();
    assert!(engine.get_all("evaluations", None).unwrap().is_empty());
    assert!(engine.get_all("evaluations", Some("student_class")).unwrap().is_empty());
    assert_eq!(engine.count("evaluations").unwrap(), 0);

    let key = write(engine, "evaluations", json!({}), WriteMode::Insert).unwrap();
    assert_eq!(key, RecordKey::from(3_u64));
}

pub fn unknown_names_are_rejected(engine: &dyn StorageEngine) {
    let err = write(engine, "nope", json!({}), WriteMode::Insert).unwrap_err();
    assert!(matches!(err, StoreError::UnknownCollection(_)));

    let err = engine.get_all("evaluations", Some("nope")).unwrap_err();
    assert!(matches!(err, StoreError::UnknownIndex { .. }));

    assert!(engine.delete("nope", &RecordKey::from(1_u64)).is_err());
}
