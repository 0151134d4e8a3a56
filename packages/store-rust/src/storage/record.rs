//! Document model shared by every storage engine.
//!
//! Engines store schemaless JSON objects ([`Document`]). The helpers here
//! read primary keys and index values out of documents according to a
//! [`CollectionSchema`], inject store-assigned keys, and convert documents to
//! and from their persisted `MsgPack` form.

use essaybook_core::{CollectionSchema, IndexDef, RecordKey};
use serde_json::{Map, Value};

use crate::error::StoreError;

/// A stored record: a JSON object keyed by field name.
pub type Document = Map<String, Value>;

/// First key handed out by an auto-increment collection.
pub const FIRST_GENERATED_KEY: u64 = 1;

/// Largest integer a key generator will hand out (2^53, the limit of exact
/// integers representable in a key's numeric form).
pub const MAX_GENERATED_KEY: u64 = 1 << 53;

/// Determines the primary key for a write and injects it if generated.
///
/// `next_key` is the collection's key generator. It advances when a key is
/// generated, and jumps past any explicit integer key at or above it so
/// later generated keys never collide with caller-supplied ones.
///
/// # Errors
///
/// Returns [`StoreError::InvalidRecord`] when the key field holds a value
/// that cannot act as a key, or is absent on a collection without
/// auto-increment, and [`StoreError::Constraint`] when the generator is
/// exhausted.
pub fn resolve_key(
    schema: &CollectionSchema,
    doc: &mut Document,
    next_key: &mut u64,
) -> Result<RecordKey, StoreError> {
    if let Some(raw) = doc.get(&schema.key_path) {
        let key = RecordKey::from_json(raw).ok_or_else(|| {
            StoreError::invalid_record(
                &schema.name,
                format!("field '{}' is not a valid key: {raw}", schema.key_path),
            )
        })?;
        if schema.auto_increment {
            bump_generator(&key, next_key);
        }
        return Ok(key);
    }

    if !schema.auto_increment {
        return Err(StoreError::invalid_record(
            &schema.name,
            format!("missing key field '{}'", schema.key_path),
        ));
    }

    if *next_key > MAX_GENERATED_KEY {
        return Err(StoreError::constraint(&schema.name, "key generator exhausted"));
    }
    let generated = *next_key;
    *next_key += 1;
    doc.insert(schema.key_path.clone(), Value::from(generated));
    Ok(RecordKey::from(generated))
}

// Key values are bounded by MAX_GENERATED_KEY before the cast.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn bump_generator(key: &RecordKey, next_key: &mut u64) {
    let RecordKey::Number(n) = key else {
        return;
    };
    if *n < 1.0 {
        return;
    }
    let floor = n.floor().min(MAX_GENERATED_KEY as f64) as u64;
    if floor >= *next_key {
        *next_key = floor + 1;
    }
}

/// Reads the value a record contributes to an index.
///
/// Records whose indexed field is missing or not a valid key are simply not
/// part of that index.
#[must_use]
pub fn index_value(index: &IndexDef, doc: &Document) -> Option<RecordKey> {
    doc.get(&index.key_path).and_then(RecordKey::from_json)
}

/// Converts an arbitrary JSON value into a document.
///
/// # Errors
///
/// Returns [`StoreError::InvalidRecord`] if the value is not a JSON object.
pub fn into_document(collection: &str, value: Value) -> Result<Document, StoreError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::invalid_record(
            collection,
            format!("expected an object, got {other}"),
        )),
    }
}

/// Serializes a document to its persisted `MsgPack` form.
///
/// # Errors
///
/// Returns [`StoreError::Serialization`] if encoding fails.
pub fn encode_body(doc: &Document) -> Result<Vec<u8>, StoreError> {
    Ok(rmp_serde::to_vec_named(doc)?)
}

/// Deserializes a document from its persisted `MsgPack` form.
///
/// # Errors
///
/// Returns [`StoreError::Serialization`] if the bytes are not a document.
pub fn decode_body(bytes: &[u8]) -> Result<Document, StoreError> {
    Ok(rmp_serde::from_slice(bytes)?)
}
