use super::{
    CANDIDATE_RADIUS_DEG, ClusterStore, ConnectionParams, PersistentAddress, PersistentStore,
    StoreConnector, StoreError,
};
use crate::WGS_84_SRID;
use crate::types::{AddressProps, JsonObject, Name, SplitFeat, SplitFeatRecord};
use geo_types::Point;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::debug;

// Geometry and json columns are read back as text and parsed here,
// the address ids ride along as the Z ordinate of the address multipoint.
const SPLIT_FEAT_QUERY: &str = "
SELECT
    (network_cluster.name || address_cluster.name)::TEXT AS name,
    ST_AsGeoJSON(network_cluster.geom) AS network,
    ST_AsGeoJSON(address_cluster.geom) AS address,
    (
        SELECT COALESCE(json_agg(json_build_object(
            'id', address.id,
            'number', address.number,
            'props', address.props,
            'output', address.output
        )), '[]'::JSON)
        FROM
            (SELECT ST_Z((ST_Dump(address_cluster.geom)).geom)::BIGINT AS id) a
            JOIN address ON a.id = address.id
    )::TEXT AS address_props
FROM
    network_cluster
    JOIN address_cluster ON network_cluster.address = address_cluster.id
WHERE
    network_cluster.id = $1
";

const CANDIDATE_QUERY: &str = "
SELECT
    p.id AS id,
    p.number AS number,
    p.name::TEXT AS name,
    p.props::TEXT AS props,
    ST_X(p.geom) AS x,
    ST_Y(p.geom) AS y
FROM
    persistent p
WHERE
    p.number = $1
    AND ST_DWithin(ST_SetSRID(ST_MakePoint($2, $3), $4), p.geom, $5)
ORDER BY p.id
";

pub async fn connect_pool(params: &ConnectionParams) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(params.max_connections)
        .connect(&params.database_url)
        .await?;

    Ok(pool)
}

/// Every network cluster id, ascending
pub async fn cluster_ids(pool: &PgPool) -> Result<Vec<i64>, StoreError> {
    let ids = sqlx::query_scalar::<_, i64>("SELECT id::BIGINT FROM network_cluster ORDER BY id")
        .fetch_all(pool)
        .await?;

    Ok(ids)
}

fn parse_json<T: serde::de::DeserializeOwned>(id: i64, text: &str) -> Result<T, StoreError> {
    serde_json::from_str(text).map_err(|source| StoreError::Json { id, source })
}

pub struct PgClusterStore {
    pool: PgPool,
}

impl PgClusterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ClusterStore for PgClusterStore {
    async fn fetch_split_feat(&self, id: i64) -> Result<SplitFeat, StoreError> {
        let Some(row) = sqlx::query(SPLIT_FEAT_QUERY)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Err(StoreError::NotFound(id));
        };

        let names: Option<String> = row.try_get("name")?;
        let network: Option<String> = row.try_get("network")?;
        let address: Option<String> = row.try_get("address")?;
        let address_props: String = row.try_get("address_props")?;

        let record = SplitFeatRecord {
            names: match names {
                Some(names) => parse_json::<Vec<Name>>(id, &names)?,
                None => Vec::new(),
            },
            network: parse_json(id, network.as_deref().unwrap_or("null"))?,
            address: parse_json(id, address.as_deref().unwrap_or("null"))?,
            address_props: parse_json::<Vec<AddressProps>>(id, &address_props)?,
        };

        debug!(
            cluster_id = id,
            addresses = record.address_props.len(),
            "fetched split feature"
        );

        record
            .into_split_feat(id)
            .map_err(|source| StoreError::Malformed { id, source })
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PgConnector;

impl StoreConnector for PgConnector {
    type Store = PgClusterStore;

    async fn connect(&self, params: &ConnectionParams) -> Result<PgClusterStore, StoreError> {
        Ok(PgClusterStore::new(connect_pool(params).await?))
    }
}

pub struct PgPersistentStore {
    pool: PgPool,
}

impl PgPersistentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl PersistentStore for PgPersistentStore {
    async fn candidates(
        &self,
        number: &str,
        point: Point<f64>,
    ) -> Result<Vec<PersistentAddress>, StoreError> {
        let rows = sqlx::query(CANDIDATE_QUERY)
            .bind(number)
            .bind(point.x())
            .bind(point.y())
            .bind(WGS_84_SRID as i32)
            .bind(CANDIDATE_RADIUS_DEG)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<PersistentAddress, StoreError> {
                let id: i64 = row.try_get("id")?;
                let names: Option<String> = row.try_get("name")?;
                let props: Option<String> = row.try_get("props")?;

                Ok(PersistentAddress {
                    id,
                    number: row.try_get("number")?,
                    names: match names {
                        Some(names) => parse_json(id, &names)?,
                        None => Vec::new(),
                    },
                    props: match props {
                        Some(props) => parse_json::<Option<JsonObject>>(id, &props)?
                            .unwrap_or_default(),
                        None => JsonObject::new(),
                    },
                    point: Point::new(row.try_get("x")?, row.try_get("y")?),
                })
            })
            .collect()
    }
}
