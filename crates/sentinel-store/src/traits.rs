//! Store contracts consumed by the primitives.
//!
//! Methods return boxed futures so the traits stay dyn-compatible and can
//! be injected as `Arc<dyn CoordinationStore>`.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use sentinel_core::RunState;

use crate::error::StoreResult;
use crate::item::{Item, ItemQuery, ItemUpdate};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Logical tables in the coordination store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// PK = `FETCH#{resource_id}`.
    FetchLocks,
    /// PK = dedup key.
    DedupRecords,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchLocks => "fetch_locks",
            Self::DedupRecords => "dedup_records",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition attached to a create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateCondition {
    /// Succeed only if no item exists under the key.
    IfAbsent,
    /// Also succeed, replacing the item, if the existing item's `ttl`
    /// is at or before `cutoff_epoch_secs`.
    IfAbsentOrExpired { cutoff_epoch_secs: i64 },
}

/// Shared key-value coordination store.
///
/// Every operation touches a single key. An item's `ttl` field (epoch
/// seconds) tells the backend it may purge the item eventually; callers
/// must re-check their own logical expiry fields.
pub trait CoordinationStore: Send + Sync {
    /// Create `item` under `key` if `condition` holds, atomically.
    ///
    /// Returns `StoreError::AlreadyExists` when the condition fails.
    fn conditional_create<'a>(
        &'a self,
        table: Table,
        key: &'a str,
        item: Item,
        condition: CreateCondition,
    ) -> BoxFuture<'a, StoreResult<()>>;

    fn get<'a>(&'a self, table: Table, key: &'a str) -> BoxFuture<'a, StoreResult<Option<Item>>>;

    /// Delete unconditionally. Deleting a missing key is not an error.
    fn delete<'a>(&'a self, table: Table, key: &'a str) -> BoxFuture<'a, StoreResult<()>>;

    /// Apply `update` to an existing item atomically.
    ///
    /// Returns `StoreError::NotFound` when the key has no item and
    /// `StoreError::ConditionFailed` when a required field does not match.
    fn update<'a>(
        &'a self,
        table: Table,
        key: &'a str,
        update: ItemUpdate,
    ) -> BoxFuture<'a, StoreResult<()>>;

    /// All items whose key starts with the query prefix and whose fields
    /// match every filter, ordered by key.
    fn query<'a>(
        &'a self,
        table: Table,
        query: ItemQuery,
    ) -> BoxFuture<'a, StoreResult<Vec<(String, Item)>>>;
}

/// Read-only view of the external run ledger.
pub trait RunLedger: Send + Sync {
    /// `Ok(None)` when the run does not exist.
    fn get_run<'a>(&'a self, run_id: &'a str) -> BoxFuture<'a, StoreResult<Option<RunState>>>;
}

/// Arc wrapper for store trait objects.
pub type DynCoordinationStore = Arc<dyn CoordinationStore>;

/// Arc wrapper for ledger trait objects.
pub type DynRunLedger = Arc<dyn RunLedger>;
