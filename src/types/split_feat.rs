use super::{AddressPoint, AddressProps, Name, sort_address_points};
use ahash::AHashMap;
use geo_types::{Coord, LineString, MultiLineString, coord};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum SplitFeatError {
    #[error("network geometry must be a LineString or MultiLineString, got {0}")]
    InvalidNetwork(&'static str),
    #[error("address geometry must be a MultiPoint, got {0}")]
    InvalidAddress(&'static str),
    #[error("address coordinate {index} has no property key ordinate")]
    MissingKey { index: usize },
    #[error("address key {0} has no properties record")]
    MissingProperties(i64),
}

/// Raw cluster payload as it comes out of a store, before validation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SplitFeatRecord {
    pub names: Vec<Name>,
    pub network: geojson::Geometry,
    pub address: geojson::Geometry,
    pub address_props: Vec<AddressProps>,
}

impl SplitFeatRecord {
    pub fn into_split_feat(self, id: i64) -> Result<SplitFeat, SplitFeatError> {
        SplitFeat::new(
            id,
            self.names,
            self.address_props,
            &self.network,
            &self.address,
        )
    }
}

/// Address coordinate carrying the key of its properties row
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KeyedCoord {
    pub coord: Coord<f64>,
    pub key: i64,
}

/// One network cluster with its address cluster, ready to be split
#[derive(Clone, Debug)]
pub struct SplitFeat {
    /// Network cluster id, used for debugging
    pub id: i64,
    pub names: Vec<Name>,
    /// key => properties row
    pub props: AHashMap<i64, AddressProps>,
    pub network: MultiLineString<f64>,
    pub address: Vec<KeyedCoord>,
}

impl SplitFeat {
    pub fn new(
        id: i64,
        names: Vec<Name>,
        props: Vec<AddressProps>,
        network: &geojson::Geometry,
        address: &geojson::Geometry,
    ) -> Result<Self, SplitFeatError> {
        let network = network_lines(&network.value)?;
        let address = keyed_coords(&address.value)?;

        let props: AHashMap<i64, AddressProps> =
            props.into_iter().map(|row| (row.id, row)).collect();

        if let Some(missing) = address.iter().find(|kc| !props.contains_key(&kc.key)) {
            return Err(SplitFeatError::MissingProperties(missing.key));
        }

        Ok(Self {
            id,
            names,
            props,
            network,
            address,
        })
    }

    /// At least one name has non-blank display text
    pub fn has_display_name(&self) -> bool {
        self.names.iter().any(|name| !name.is_blank())
    }

    /// Sort address coordinates in place for consistent interpolation input
    pub fn sort_address(&mut self) {
        let mut points = self.address_points();
        sort_address_points(&mut points);

        self.address = points
            .into_iter()
            .map(|point| KeyedCoord {
                coord: point.coord,
                key: point.props.id,
            })
            .collect();
    }

    /// Owned coordinate/properties pairs in the current address order
    pub fn address_points(&self) -> Vec<AddressPoint> {
        self.address
            .iter()
            .filter_map(|kc| {
                self.props
                    .get(&kc.key)
                    .map(|props| AddressPoint::new(kc.coord, props.clone()))
            })
            .collect()
    }
}

fn geometry_kind(value: &geojson::Value) -> &'static str {
    match value {
        geojson::Value::Point(_) => "Point",
        geojson::Value::MultiPoint(_) => "MultiPoint",
        geojson::Value::LineString(_) => "LineString",
        geojson::Value::MultiLineString(_) => "MultiLineString",
        geojson::Value::Polygon(_) => "Polygon",
        geojson::Value::MultiPolygon(_) => "MultiPolygon",
        geojson::Value::GeometryCollection(_) => "GeometryCollection",
    }
}

fn position_coord(position: &[f64]) -> Option<Coord<f64>> {
    match position {
        [x, y, ..] => Some(coord! { x: *x, y: *y }),
        _ => None,
    }
}

fn line_from_positions(positions: &[Vec<f64>]) -> LineString<f64> {
    positions
        .iter()
        .filter_map(|position| position_coord(position))
        .collect()
}

fn network_lines(value: &geojson::Value) -> Result<MultiLineString<f64>, SplitFeatError> {
    match value {
        geojson::Value::LineString(positions) => {
            Ok(MultiLineString::new(vec![line_from_positions(positions)]))
        }
        geojson::Value::MultiLineString(lines) => Ok(MultiLineString::new(
            lines
                .iter()
                .map(|positions| line_from_positions(positions))
                .collect(),
        )),
        other => Err(SplitFeatError::InvalidNetwork(geometry_kind(other))),
    }
}

fn keyed_coords(value: &geojson::Value) -> Result<Vec<KeyedCoord>, SplitFeatError> {
    let geojson::Value::MultiPoint(positions) = value else {
        return Err(SplitFeatError::InvalidAddress(geometry_kind(value)));
    };

    positions
        .iter()
        .enumerate()
        .map(|(index, position)| match position.as_slice() {
            [x, y, key, ..] if key.is_finite() && key.fract() == 0.0 => Ok(KeyedCoord {
                coord: coord! { x: *x, y: *y },
                key: *key as i64,
            }),
            _ => Err(SplitFeatError::MissingKey { index }),
        })
        .collect()
}
