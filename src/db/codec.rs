//! Record codec
//!
//! Records are stored as JSON objects with the primary key stripped out;
//! the key lives in the table's `id` column and is put back on decode.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use super::error::{StoreError, StoreResult};
use super::schema::Store;

/// A domain type persisted in one object store.
pub trait Record: Serialize + DeserializeOwned {
    const STORE: Store;

    /// Primary key. Zero until the engine assigns one.
    fn key(&self) -> i64;
}

pub fn encode<R: Record>(record: &R) -> StoreResult<String> {
    let mut map = into_object::<R>(serde_json::to_value(record)?)?;
    map.remove(R::STORE.schema().key_path);
    Ok(Value::Object(map).to_string())
}

pub fn decode<R: Record>(key: i64, raw: &str) -> StoreResult<R> {
    let mut map = into_object::<R>(serde_json::from_str(raw)?)?;
    map.insert(R::STORE.schema().key_path.to_string(), Value::from(key));
    Ok(serde_json::from_value(Value::Object(map))?)
}

fn into_object<R: Record>(value: Value) -> StoreResult<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::ConstraintViolation(format!(
            "{} record is not an object: {}",
            R::STORE.name(),
            other
        ))),
    }
}
