//! Coordination store and run ledger contracts.
//!
//! The primitives never talk to a concrete backend. They consume:
//! - [`CoordinationStore`]: single-key conditional create, get, delete,
//!   update-with-increment and prefix query, with a `ttl` purge hint
//! - [`RunLedger`]: read-only run snapshots
//!
//! `MemoryStore` and `MemoryRunLedger` implement both contracts in-process
//! for tests and local runs. TTL purge in `MemoryStore` is explicit
//! (`purge_expired`), so callers cannot come to depend on purge timing.

pub mod error;
pub mod item;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use item::{decode_record, encode_record, Item, ItemQuery, ItemUpdate};
pub use memory::{MemoryRunLedger, MemoryStore};
pub use traits::{
    BoxFuture, CoordinationStore, CreateCondition, DynCoordinationStore, DynRunLedger, RunLedger,
    Table,
};
