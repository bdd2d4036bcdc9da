use super::{
    CANDIDATE_RADIUS_DEG, ClusterStore, ConnectionParams, PersistentAddress, PersistentStore,
    StoreConnector, StoreError,
};
use crate::types::{SplitFeat, SplitFeatRecord};
use ahash::AHashMap;
use geo::{Distance, Euclidean};
use geo_types::Point;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cluster table held in memory, shared between every store it hands out
#[derive(Clone, Debug, Default)]
pub struct MemoryConnector {
    records: Arc<AHashMap<i64, SplitFeatRecord>>,
}

impl MemoryConnector {
    pub fn new(records: impl IntoIterator<Item = (i64, SplitFeatRecord)>) -> Self {
        Self {
            records: Arc::new(records.into_iter().collect()),
        }
    }
}

impl StoreConnector for MemoryConnector {
    type Store = MemoryClusterStore;

    async fn connect(&self, _params: &ConnectionParams) -> Result<MemoryClusterStore, StoreError> {
        Ok(MemoryClusterStore {
            records: Arc::clone(&self.records),
            closed: AtomicBool::new(false),
        })
    }
}

#[derive(Debug)]
pub struct MemoryClusterStore {
    records: Arc<AHashMap<i64, SplitFeatRecord>>,
    closed: AtomicBool,
}

impl MemoryClusterStore {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl ClusterStore for MemoryClusterStore {
    async fn fetch_split_feat(&self, id: i64) -> Result<SplitFeat, StoreError> {
        if self.is_closed() {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }

        let record = self.records.get(&id).ok_or(StoreError::NotFound(id))?;

        record
            .clone()
            .into_split_feat(id)
            .map_err(|source| StoreError::Malformed { id, source })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryPersistentStore {
    rows: Vec<PersistentAddress>,
}

impl MemoryPersistentStore {
    pub fn new(rows: Vec<PersistentAddress>) -> Self {
        Self { rows }
    }
}

impl PersistentStore for MemoryPersistentStore {
    async fn candidates(
        &self,
        number: &str,
        point: Point<f64>,
    ) -> Result<Vec<PersistentAddress>, StoreError> {
        Ok(self
            .rows
            .iter()
            .filter(|row| row.number == number)
            .filter(|row| Euclidean.distance(row.point, point) <= CANDIDATE_RADIUS_DEG)
            .cloned()
            .collect())
    }
}
