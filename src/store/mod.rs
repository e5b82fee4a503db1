//! Record storage.
//!
//! The connection handler only talks to a [`RecordStore`].  Ownership is
//! checked inside the store: an operation naming a record owned by a
//! different address behaves exactly as if the record did not exist.

use std::net::Ipv6Addr;
use std::time::SystemTime;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::query::Filter;
use crate::types::{FieldMap, Record, RecordId};

pub mod memory;
pub mod sweep;

pub use memory::MemoryStore;
pub use sweep::Sweeper;

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Adds a freshly registered record.
    async fn insert(&self, record: Record) -> StoreResult<RecordId>;

    /// Records matching `filter` whose `last_seen` is at or after `cutoff`.
    async fn find_all(&self, filter: &Filter, cutoff: SystemTime) -> StoreResult<Vec<Record>>;

    /// Refreshes `last_seen` of a live record owned by `owner`.
    async fn touch(&self, id: RecordId, owner: Ipv6Addr) -> StoreResult<bool>;

    /// Refreshes `last_seen` and replaces the fields of a live record owned
    /// by `owner`.
    async fn update(&self, id: RecordId, owner: Ipv6Addr, fields: FieldMap) -> StoreResult<bool>;

    /// Removes a record owned by `owner`, live or not.
    async fn delete(&self, id: RecordId, owner: Ipv6Addr) -> StoreResult<Option<Record>>;

    /// Removes every record last seen before `cutoff`, returning how many
    /// went.
    async fn sweep(&self, cutoff: SystemTime) -> StoreResult<usize>;

    fn name(&self) -> &'static str;
}
