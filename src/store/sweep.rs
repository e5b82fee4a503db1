//! Periodic removal of expired records.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use log::{error, info};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::{RecordStore, StoreResult};
use crate::types::liveness_cutoff;

/// Deletes records that have not been seen within `timeout`, every
/// `period`.  Queries hide expired records on their own, so the sweep only
/// reclaims memory.
pub struct Sweeper {
    store: Arc<dyn RecordStore>,
    timeout: Duration,
    period: Duration,
}

impl Sweeper {
    pub fn new(store: Arc<dyn RecordStore>, timeout: Duration, period: Duration) -> Self {
        Self {
            store,
            timeout,
            period,
        }
    }

    /// One pass.
    pub async fn run_once(&self) -> StoreResult<usize> {
        let cutoff = liveness_cutoff(SystemTime::now(), self.timeout);
        let removed = self.store.sweep(cutoff).await?;
        if removed > 0 {
            info!("Swept {} expired record(s) from {} store", removed, self.store.name());
        }
        Ok(removed)
    }

    /// Runs passes forever on a background task.  Abort the handle to stop.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Sweeping expired records every {:?} (timeout {:?})",
                self.period, self.timeout
            );
            let mut timer = interval(self.period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                timer.tick().await;
                if let Err(e) = self.run_once().await {
                    error!("Sweep failed: {}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{fixtures, Filter};
    use crate::store::MemoryStore;
    use crate::types::{FieldMap, Record};
    use std::net::{IpAddr, Ipv6Addr};

    fn stale_record(age: Duration) -> Record {
        let mut record = Record::new(IpAddr::V6(Ipv6Addr::LOCALHOST), FieldMap::new());
        record.last_seen = SystemTime::now() - age;
        record
    }

    #[tokio::test]
    async fn run_once_uses_timeout() {
        let timeout = Duration::from_secs(20);
        let memory = Arc::new(MemoryStore::new(Arc::new(fixtures::contract()), timeout));
        memory.insert(stale_record(Duration::from_secs(30))).await.unwrap();
        memory.insert(stale_record(Duration::from_secs(1))).await.unwrap();

        let sweeper = Sweeper::new(memory.clone(), timeout, Duration::from_secs(60));
        assert_eq!(sweeper.run_once().await.unwrap(), 1);
        assert_eq!(sweeper.run_once().await.unwrap(), 0);
        assert_eq!(memory.len().await, 1);
    }

    #[tokio::test]
    async fn spawned_sweeper_runs_periodically() {
        let timeout = Duration::from_secs(20);
        let memory = Arc::new(MemoryStore::new(Arc::new(fixtures::contract()), timeout));
        memory.insert(stale_record(Duration::from_secs(45))).await.unwrap();

        let handle = Sweeper::new(memory.clone(), timeout, Duration::from_secs(5)).spawn();
        // The first tick fires immediately.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let left = memory.find_all(&Filter::all(), SystemTime::UNIX_EPOCH).await.unwrap();
        assert!(left.is_empty());
        handle.abort();
    }
}
