//! In-memory store and ledger.
//!
//! Thread-safe: per-key atomicity comes from `DashMap` shard locks, which
//! is the same single-key guarantee a real coordination store gives.

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;
use sentinel_core::RunState;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{StoreError, StoreResult};
use crate::item::{Item, ItemQuery, ItemUpdate, TTL_FIELD};
use crate::traits::{BoxFuture, CoordinationStore, CreateCondition, RunLedger, Table};

// ============================================================================
// MemoryStore
// ============================================================================

/// In-memory coordination store.
///
/// TTL purge only happens when `purge_expired` is called.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: DashMap<(Table, String), Item>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Put an item directly, bypassing the conditional create.
    pub fn insert_raw(&self, table: Table, key: &str, item: Item) {
        self.items.insert((table, key.to_string()), item);
    }

    /// Read an item directly, ignoring availability.
    pub fn get_raw(&self, table: Table, key: &str) -> Option<Item> {
        self.items
            .get(&(table, key.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// Number of items currently held in `table` (expired or not).
    pub fn len(&self, table: Table) -> usize {
        self.items.iter().filter(|e| e.key().0 == table).count()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Purge items whose `ttl` is at or before `now_epoch_secs`.
    ///
    /// Returns the number of purged items.
    pub fn purge_expired(&self, now_epoch_secs: i64) -> usize {
        let before = self.items.len();
        self.items.retain(|_, item| {
            item.get(TTL_FIELD)
                .and_then(Value::as_i64)
                .map_or(true, |ttl| ttl > now_epoch_secs)
        });
        let purged = before - self.items.len();
        if purged > 0 {
            debug!(purged, now_epoch_secs, "Purged expired items");
        }
        purged
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn create_now(
        &self,
        table: Table,
        key: &str,
        item: Item,
        condition: CreateCondition,
    ) -> StoreResult<()> {
        self.check_available()?;
        match self.items.entry((table, key.to_string())) {
            Entry::Occupied(mut slot) => {
                let replaceable = match condition {
                    CreateCondition::IfAbsent => false,
                    CreateCondition::IfAbsentOrExpired { cutoff_epoch_secs } => slot
                        .get()
                        .get(TTL_FIELD)
                        .and_then(Value::as_i64)
                        .is_some_and(|ttl| ttl <= cutoff_epoch_secs),
                };
                if replaceable {
                    slot.insert(item);
                    trace!(%table, key, "Expired item replaced");
                    Ok(())
                } else {
                    Err(StoreError::AlreadyExists {
                        key: key.to_string(),
                    })
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(item);
                trace!(%table, key, "Item created");
                Ok(())
            }
        }
    }

    fn update_now(&self, table: Table, key: &str, update: &ItemUpdate) -> StoreResult<()> {
        self.check_available()?;
        match self.items.get_mut(&(table, key.to_string())) {
            Some(mut entry) => update.apply(entry.value_mut()),
            None => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
        }
    }

    fn query_now(&self, table: Table, query: &ItemQuery) -> StoreResult<Vec<(String, Item)>> {
        self.check_available()?;
        let mut found: Vec<(String, Item)> = self
            .items
            .iter()
            .filter(|e| e.key().0 == table && query.matches(&e.key().1, e.value()))
            .map(|e| (e.key().1.clone(), e.value().clone()))
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }
}

impl CoordinationStore for MemoryStore {
    fn conditional_create<'a>(
        &'a self,
        table: Table,
        key: &'a str,
        item: Item,
        condition: CreateCondition,
    ) -> BoxFuture<'a, StoreResult<()>> {
        let result = self.create_now(table, key, item, condition);
        Box::pin(async move { result })
    }

    fn get<'a>(&'a self, table: Table, key: &'a str) -> BoxFuture<'a, StoreResult<Option<Item>>> {
        let result = self.check_available().map(|()| self.get_raw(table, key));
        Box::pin(async move { result })
    }

    fn delete<'a>(&'a self, table: Table, key: &'a str) -> BoxFuture<'a, StoreResult<()>> {
        let result = self.check_available().map(|()| {
            self.items.remove(&(table, key.to_string()));
        });
        Box::pin(async move { result })
    }

    fn update<'a>(
        &'a self,
        table: Table,
        key: &'a str,
        update: ItemUpdate,
    ) -> BoxFuture<'a, StoreResult<()>> {
        let result = self.update_now(table, key, &update);
        Box::pin(async move { result })
    }

    fn query<'a>(
        &'a self,
        table: Table,
        query: ItemQuery,
    ) -> BoxFuture<'a, StoreResult<Vec<(String, Item)>>> {
        let result = self.query_now(table, &query);
        Box::pin(async move { result })
    }
}

// ============================================================================
// MemoryRunLedger
// ============================================================================

/// In-memory run ledger. Stands in for the external ledger's writer in tests.
#[derive(Debug, Default)]
pub struct MemoryRunLedger {
    runs: DashMap<String, RunState>,
    unavailable: AtomicBool,
}

impl MemoryRunLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a run snapshot.
    pub fn upsert(&self, run: RunState) {
        self.runs.insert(run.run_id.clone(), run);
    }

    /// Simulate a settled buy landing in the ledger.
    pub fn settle_buy(&self, run_id: &str, value: Decimal) -> bool {
        match self.runs.get_mut(run_id) {
            Some(mut run) => {
                run.cumulative_buy_succeeded_value += value;
                true
            }
            None => false,
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl RunLedger for MemoryRunLedger {
    fn get_run<'a>(&'a self, run_id: &'a str) -> BoxFuture<'a, StoreResult<Option<RunState>>> {
        let result = if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable(
                "run ledger marked unavailable".to_string(),
            ))
        } else {
            Ok(self.runs.get(run_id).map(|run| run.value().clone()))
        };
        Box::pin(async move { result })
    }
}
