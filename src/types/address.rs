use super::JsonObject;
use crate::misc::leading_int;
use geo_types::{Coord, Point};
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;

/// Properties row for a single address point
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AddressProps {
    pub id: i64,

    /// The address number, can be numeric or semi-numeric (100 vs 100a).
    /// Older rows stored it as a JSON number.
    #[serde(deserialize_with = "number_as_string")]
    pub number: String,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub props: JsonObject,

    /// Should the address feature be output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<bool>,
}

impl AddressProps {
    pub fn new(id: i64, number: impl Into<String>) -> Self {
        Self {
            id,
            number: number.into(),
            props: JsonObject::new(),
            output: None,
        }
    }

    /// Leading integer of the house number, `None` when it doesn't start with one
    pub fn house_number(&self) -> Option<i64> {
        leading_int(&self.number)
    }
}

fn number_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(number) => Ok(number),
        serde_json::Value::Number(number) => Ok(number.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "address number must be a string or number, got {}",
            other
        ))),
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<JsonObject, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<JsonObject>::deserialize(deserializer)?.unwrap_or_default())
}

/// An address coordinate paired with its properties row.
/// Pairing keeps coordinates and properties aligned through every re-partition.
#[derive(Clone, Debug, PartialEq)]
pub struct AddressPoint {
    pub coord: Coord<f64>,
    pub props: AddressProps,
}

impl AddressPoint {
    pub fn new(coord: Coord<f64>, props: AddressProps) -> Self {
        Self { coord, props }
    }

    pub fn point(&self) -> Point<f64> {
        Point::from(self.coord)
    }

    pub fn number(&self) -> &str {
        &self.props.number
    }
}

/// Ordering used before matching: house number ascending (numberless last),
/// then x, then y.
pub fn cmp_address_points(a: &AddressPoint, b: &AddressPoint) -> Ordering {
    let by_number = match (a.props.house_number(), b.props.house_number()) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };

    by_number
        .then_with(|| a.coord.x.total_cmp(&b.coord.x))
        .then_with(|| a.coord.y.total_cmp(&b.coord.y))
}

pub fn sort_address_points(points: &mut [AddressPoint]) {
    points.sort_by(cmp_address_points);
}
