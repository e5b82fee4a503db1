//! In-memory record store.

use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use log::debug;
use tokio::sync::RwLock;

use super::{RecordStore, StoreResult};
use crate::contract::Contract;
use crate::query::Filter;
use crate::types::{liveness_cutoff, FieldMap, Record, RecordId};

/// Records indexed by id behind a single lock.  Queries share the read
/// side; every mutation takes the write side for the whole operation.
pub struct MemoryStore {
    records: RwLock<HashMap<RecordId, Record>>,
    contract: Arc<Contract>,
    timeout: Duration,
}

impl MemoryStore {
    /// `timeout` bounds how stale a record may be for `touch` and `update`
    /// to still accept it.
    pub fn new(contract: Arc<Contract>, timeout: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            contract,
            timeout,
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// The single deletion path: removes `id` if `condition` holds for it
    /// while the write lock is held.
    async fn remove_if<F>(&self, id: RecordId, condition: F) -> Option<Record>
    where
        F: FnOnce(&Record) -> bool,
    {
        let mut records = self.records.write().await;
        if records.get(&id).is_some_and(condition) {
            records.remove(&id)
        } else {
            None
        }
    }

    /// Runs `mutate` on `id` if it is alive and owned by `owner`.
    async fn with_live_owned<F>(&self, id: RecordId, owner: Ipv6Addr, mutate: F) -> bool
    where
        F: FnOnce(&mut Record),
    {
        let now = SystemTime::now();
        let cutoff = liveness_cutoff(now, self.timeout);
        let mut records = self.records.write().await;

        match records.get_mut(&id) {
            Some(record) if record.owner == owner && record.is_alive(cutoff) => {
                mutate(record);
                record.last_seen = now;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert(&self, record: Record) -> StoreResult<RecordId> {
        let id = record.id;
        self.records.write().await.insert(id, record);
        Ok(id)
    }

    async fn find_all(&self, filter: &Filter, cutoff: SystemTime) -> StoreResult<Vec<Record>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.is_alive(cutoff) && filter.matches(&r.fields, &self.contract))
            .cloned()
            .collect())
    }

    async fn touch(&self, id: RecordId, owner: Ipv6Addr) -> StoreResult<bool> {
        Ok(self.with_live_owned(id, owner, |_| {}).await)
    }

    async fn update(&self, id: RecordId, owner: Ipv6Addr, fields: FieldMap) -> StoreResult<bool> {
        Ok(self
            .with_live_owned(id, owner, |record| record.fields = fields)
            .await)
    }

    async fn delete(&self, id: RecordId, owner: Ipv6Addr) -> StoreResult<Option<Record>> {
        Ok(self.remove_if(id, |record| record.owner == owner).await)
    }

    async fn sweep(&self, cutoff: SystemTime) -> StoreResult<usize> {
        let expired: Vec<RecordId> = {
            let records = self.records.read().await;
            records
                .values()
                .filter(|r| !r.is_alive(cutoff))
                .map(|r| r.id)
                .collect()
        };

        let mut removed = 0;
        for id in expired {
            // Re-checked under the write lock: a touch may have landed since.
            if self.remove_if(id, |r| !r.is_alive(cutoff)).await.is_some() {
                debug!("Swept expired record {}", id);
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
