//! Read side of the address database: network clusters ready for splitting
//! and the persistent address table used by conflation.

pub mod memory;
pub mod postgres;

use crate::types::{JsonObject, Name, SplitFeat, SplitFeatError};
use geo_types::Point;
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;

pub use memory::{MemoryClusterStore, MemoryConnector, MemoryPersistentStore};
pub use postgres::{PgClusterStore, PgConnector, PgPersistentStore, cluster_ids, connect_pool};

/// Persistent addresses further than this (in degrees) from an incoming
/// address are never conflation candidates
pub const CANDIDATE_RADIUS_DEG: f64 = 0.02;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("network cluster {0} not found")]
    NotFound(i64),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("network cluster {id} is malformed: {source}")]
    Malformed { id: i64, source: SplitFeatError },
    #[error("network cluster {id} has unreadable json: {source}")]
    Json { id: i64, source: serde_json::Error },
    #[error("no database url configured: {0}")]
    Config(#[from] dotenvy::Error),
}

fn default_max_connections() -> u32 {
    2
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl StoreError {
    /// The cluster exists but its payload can't be turned into a `SplitFeat`
    pub fn is_malformed(&self) -> bool {
        matches!(self, StoreError::Malformed { .. } | StoreError::Json { .. })
    }
}

impl ConnectionParams {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: default_max_connections(),
        }
    }

    /// Reads `DATABASE_URL`, loading a `.env` file first when there is one
    pub fn from_env() -> Result<Self, StoreError> {
        Ok(Self::new(dotenvy::var("DATABASE_URL")?))
    }
}

/// A worker's exclusive handle on the cluster tables
pub trait ClusterStore: Send + Sync {
    fn fetch_split_feat(&self, id: i64) -> impl Future<Output = Result<SplitFeat, StoreError>> + Send;

    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Opens a fresh [`ClusterStore`]; every worker connects on its own
pub trait StoreConnector: Clone + Send + Sync + 'static {
    type Store: ClusterStore + 'static;

    fn connect(
        &self,
        params: &ConnectionParams,
    ) -> impl Future<Output = Result<Self::Store, StoreError>> + Send;
}

/// Row of the persistent address table
#[derive(Clone, Debug, PartialEq)]
pub struct PersistentAddress {
    pub id: i64,
    pub number: String,
    pub names: Vec<Name>,
    pub props: JsonObject,
    pub point: Point<f64>,
}

pub trait PersistentStore: Send + Sync {
    /// Addresses carrying `number` within [`CANDIDATE_RADIUS_DEG`] of `point`
    fn candidates(
        &self,
        number: &str,
        point: Point<f64>,
    ) -> impl Future<Output = Result<Vec<PersistentAddress>, StoreError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_params_default_pool_size() {
        let params: ConnectionParams =
            serde_json::from_str(r#"{ "database_url": "postgres://localhost/addr" }"#).unwrap();
        assert_eq!(params, ConnectionParams::new("postgres://localhost/addr"));
        assert_eq!(params.max_connections, 2);
    }

    #[test]
    fn store_errors_name_the_cluster() {
        let err = StoreError::Malformed {
            id: 7,
            source: SplitFeatError::MissingProperties(3),
        };
        assert_eq!(
            err.to_string(),
            "network cluster 7 is malformed: address key 3 has no properties record"
        );
        assert_eq!(StoreError::NotFound(9).to_string(), "network cluster 9 not found");
        assert!(err.is_malformed());
        assert!(!StoreError::NotFound(9).is_malformed());

        // a NULL geometry column reads as json `null`
        let null_network = StoreError::Json {
            id: 7,
            source: serde_json::from_str::<geojson::Geometry>("null").unwrap_err(),
        };
        assert!(null_network.is_malformed());
    }
}
