//! Schemaless item representation and the typed record boundary.

use crate::error::{StoreError, StoreResult};
use sentinel_core::VersionedRecord;
use serde::Serialize;
use serde_json::{Map, Value};

/// A stored item: string / number / map fields keyed by name.
pub type Item = Map<String, Value>;

/// Field carrying the record kind tag.
pub const KIND_FIELD: &str = "kind";
/// Field the store treats as a purge hint (epoch seconds).
pub const TTL_FIELD: &str = "ttl";

/// Encode a typed record into an item, validating it first.
pub fn encode_record<R: VersionedRecord>(record: &R) -> StoreResult<Item> {
    record.validate()?;
    match serde_json::to_value(record)? {
        Value::Object(mut item) => {
            item.insert(KIND_FIELD.to_string(), Value::String(R::KIND.to_string()));
            Ok(item)
        }
        other => Err(StoreError::Schema(format!(
            "{} did not serialize to a map: {other}",
            R::KIND
        ))),
    }
}

/// Decode an item into a typed record, checking kind, schema version and
/// record invariants.
pub fn decode_record<R: VersionedRecord>(mut item: Item) -> StoreResult<R> {
    match item.remove(KIND_FIELD) {
        Some(Value::String(kind)) if kind == R::KIND => {}
        Some(other) => {
            return Err(StoreError::Schema(format!(
                "expected kind {}, found {other}",
                R::KIND
            )))
        }
        None => {
            return Err(StoreError::Schema(format!(
                "item missing kind tag (expected {})",
                R::KIND
            )))
        }
    }
    let record: R = serde_json::from_value(Value::Object(item))?;
    record.validate()?;
    Ok(record)
}

/// Single-key update: overwrite some fields, atomically add to others,
/// optionally guarded by field equality conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemUpdate {
    set: Item,
    increment: Vec<(String, i64)>,
    require: Vec<(String, Value)>,
}

impl ItemUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite `field` with a raw value.
    #[must_use]
    pub fn set(mut self, field: &str, value: Value) -> Self {
        self.set.insert(field.to_string(), value);
        self
    }

    /// Overwrite `field` with any serializable value.
    pub fn set_value<T: Serialize>(self, field: &str, value: &T) -> StoreResult<Self> {
        let value = serde_json::to_value(value)?;
        Ok(self.set(field, value))
    }

    /// Add `delta` to a numeric field (missing fields count as zero).
    #[must_use]
    pub fn increment(mut self, field: &str, delta: i64) -> Self {
        self.increment.push((field.to_string(), delta));
        self
    }

    /// Only apply if `field` currently equals `value`.
    #[must_use]
    pub fn require(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.require.push((field.to_string(), value.into()));
        self
    }

    /// Only apply if `field` currently equals the serialized `value`.
    pub fn require_value<T: Serialize>(self, field: &str, value: &T) -> StoreResult<Self> {
        let value = serde_json::to_value(value)?;
        Ok(self.require(field, value))
    }

    /// Apply to an item in place, all or nothing. Backends holding the
    /// item under a per-key lock call this to make the update atomic.
    pub fn apply(&self, item: &mut Item) -> StoreResult<()> {
        if let Some((field, _)) = self
            .require
            .iter()
            .find(|(field, expected)| item.get(field) != Some(expected))
        {
            return Err(StoreError::ConditionFailed {
                field: field.clone(),
            });
        }

        let mut next = item.clone();
        for (field, delta) in &self.increment {
            let current = match next.get(field) {
                None | Some(Value::Null) => 0,
                Some(Value::Number(n)) => n.as_i64().ok_or_else(|| {
                    StoreError::Schema(format!("{field} is not an integer: {n}"))
                })?,
                Some(other) => {
                    return Err(StoreError::Schema(format!(
                        "{field} is not numeric: {other}"
                    )))
                }
            };
            next.insert(field.clone(), Value::from(current.saturating_add(*delta)));
        }
        for (field, value) in &self.set {
            next.insert(field.clone(), value.clone());
        }
        *item = next;
        Ok(())
    }
}

/// Prefix query with equality filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemQuery {
    pub key_prefix: String,
    pub filters: Vec<(String, Value)>,
}

impl ItemQuery {
    pub fn prefix(key_prefix: impl Into<String>) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            filters: Vec::new(),
        }
    }

    #[must_use]
    pub fn filter(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push((field.to_string(), value.into()));
        self
    }

    pub fn matches(&self, key: &str, item: &Item) -> bool {
        key.starts_with(&self.key_prefix)
            && self
                .filters
                .iter()
                .all(|(field, expected)| item.get(field) == Some(expected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use sentinel_core::{CorrelationId, FetchLockRecord};
    use serde_json::json;
    use std::time::Duration;

    fn sample_lock() -> FetchLockRecord {
        FetchLockRecord::new(
            "MSFT",
            "ingest",
            "bars-fetcher",
            CorrelationId::from("corr-9"),
            Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap(),
            Duration::from_secs(900),
        )
        .unwrap()
    }

    #[test]
    fn test_encode_tags_kind() {
        let item = encode_record(&sample_lock()).unwrap();
        assert_eq!(item.get(KIND_FIELD), Some(&json!("fetch_lock")));
        assert!(item.get(TTL_FIELD).and_then(Value::as_i64).is_some());
    }

    #[test]
    fn test_decode_rejects_wrong_kind() {
        let mut item = encode_record(&sample_lock()).unwrap();
        item.insert(KIND_FIELD.to_string(), json!("dedup"));
        let err = decode_record::<FetchLockRecord>(item).unwrap_err();
        assert!(matches!(err, StoreError::Schema(_)));
    }

    #[test]
    fn test_decode_rejects_future_schema() {
        let mut item = encode_record(&sample_lock()).unwrap();
        item.insert("schema_version".to_string(), json!(2));
        let err = decode_record::<FetchLockRecord>(item).unwrap_err();
        assert!(err.to_string().contains("schema version"));
    }

    #[test]
    fn test_decode_round_trips_record() {
        let record = sample_lock();
        let item = encode_record(&record).unwrap();
        assert_eq!(decode_record::<FetchLockRecord>(item).unwrap(), record);
    }

    #[test]
    fn test_update_increments_and_sets() {
        let mut item = Item::new();
        item.insert("repeat_count".to_string(), json!(4));

        let update = ItemUpdate::new()
            .increment("repeat_count", 1)
            .increment("fresh_counter", 3)
            .set("last_run_id", json!("run-7"));
        update.apply(&mut item).unwrap();

        assert_eq!(item["repeat_count"], json!(5));
        assert_eq!(item["fresh_counter"], json!(3));
        assert_eq!(item["last_run_id"], json!("run-7"));
    }

    #[test]
    fn test_update_rejects_non_numeric_increment() {
        let mut item = Item::new();
        item.insert("repeat_count".to_string(), json!("many"));
        let update = ItemUpdate::new()
            .set("last_run_id", json!("run-8"))
            .increment("repeat_count", 1);
        assert!(update.apply(&mut item).is_err());
        // Nothing applied
        assert!(item.get("last_run_id").is_none());
    }

    #[test]
    fn test_update_condition_guards_apply() {
        let mut item = Item::new();
        item.insert("status".to_string(), json!("RECOVERED"));

        let update = ItemUpdate::new()
            .require("status", "FAILING")
            .set("status", json!("RECOVERED"))
            .set("recovered_run_id", json!("run-2"));
        let err = update.apply(&mut item).unwrap_err();
        assert!(matches!(err, StoreError::ConditionFailed { ref field } if field == "status"));
        assert!(item.get("recovered_run_id").is_none());

        item.insert("status".to_string(), json!("FAILING"));
        update.apply(&mut item).unwrap();
        assert_eq!(item["recovered_run_id"], json!("run-2"));
    }

    #[test]
    fn test_require_value_compares_serialized_timestamp() {
        let notified = Utc.with_ymd_and_hms(2026, 3, 2, 14, 30, 0).unwrap()
            + chrono::Duration::milliseconds(123);
        let mut item = Item::new();
        ItemUpdate::new()
            .set_value("last_notified_at", &notified)
            .unwrap()
            .apply(&mut item)
            .unwrap();

        let stale = ItemUpdate::new()
            .require_value("last_notified_at", &(notified - chrono::Duration::hours(2)))
            .unwrap()
            .set("last_run_id", json!("r2"));
        assert!(stale.apply(&mut item).unwrap_err().is_condition_failed());

        let current = ItemUpdate::new()
            .require_value("last_notified_at", &notified)
            .unwrap()
            .set("last_run_id", json!("r2"));
        current.apply(&mut item).unwrap();
        assert_eq!(item["last_run_id"], json!("r2"));
    }

    #[test]
    fn test_query_matches_prefix_and_filters() {
        let mut item = Item::new();
        item.insert("status".to_string(), json!("FAILING"));

        let query = ItemQuery::prefix("ingest#prod#").filter("status", "FAILING");
        assert!(query.matches("ingest#prod#fetch#abcd1234", &item));
        assert!(!query.matches("ingest#staging#fetch#abcd1234", &item));

        item.insert("status".to_string(), json!("RECOVERED"));
        assert!(!query.matches("ingest#prod#fetch#abcd1234", &item));
    }
}
