//! Per-feature transforms applied after interpolation.
//! Every operation returns a feature; malformed input passes through as is.

use crate::types::JsonObject;
use geo::BoundingRect;
use geojson::Feature;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Largest integer a JSON consumer can represent exactly
const MAX_SAFE_ID: u64 = (1 << 53) - 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PostOp {
    /// Lift address properties shared by every address to the feature
    Props,
    /// Stable numeric id from geometry and names
    Id,
    /// Bounding box from the geometry
    Bbox,
}

pub fn default_post() -> Vec<PostOp> {
    vec![PostOp::Props]
}

#[derive(Clone, Debug)]
pub struct Post {
    ops: Vec<PostOp>,
}

impl Default for Post {
    fn default() -> Self {
        Self::new(&default_post())
    }
}

impl Post {
    pub fn new(ops: &[PostOp]) -> Self {
        let mut deduped: Vec<PostOp> = Vec::with_capacity(ops.len());
        for op in ops {
            if !deduped.contains(op) {
                deduped.push(*op);
            }
        }
        Self { ops: deduped }
    }

    pub fn ops(&self) -> &[PostOp] {
        &self.ops
    }

    pub fn feat(&self, feature: Feature) -> Feature {
        self.ops.iter().fold(feature, |feature, op| match op {
            PostOp::Props => lift_props(feature),
            PostOp::Id => assign_id(feature),
            PostOp::Bbox => assign_bbox(feature),
        })
    }
}

fn address_props_mut(properties: &mut JsonObject) -> Option<&mut Vec<Value>> {
    properties
        .get_mut("carmen:addressprops")?
        .as_array_mut()?
        .get_mut(1)?
        .as_array_mut()
}

fn lift_props(mut feature: Feature) -> Feature {
    if let Some(properties) = feature.properties.as_mut() {
        lift_shared_props(properties);
    }
    feature
}

/// Keys with the same value on every address row
fn shared_props(rows: &[Value]) -> JsonObject {
    let Some(Value::Object(first)) = rows.first() else {
        return JsonObject::new();
    };

    first
        .iter()
        .filter(|(key, value)| {
            rows.iter()
                .all(|row| row.as_object().and_then(|obj| obj.get(*key)) == Some(*value))
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn lift_shared_props(properties: &mut JsonObject) {
    let shared: JsonObject = match address_props_mut(properties) {
        Some(rows) => shared_props(rows),
        None => return,
    };

    let shared: JsonObject = shared
        .into_iter()
        .filter(|(key, _)| !properties.contains_key(key))
        .collect();

    if shared.is_empty() {
        return;
    }

    if let Some(rows) = address_props_mut(properties) {
        for row in rows.iter_mut() {
            if let Some(obj) = row.as_object_mut() {
                obj.retain(|key, _| !shared.contains_key(key));
            }
        }

        if rows
            .iter()
            .all(|row| row.as_object().is_some_and(|obj| obj.is_empty()))
        {
            properties.remove("carmen:addressprops");
        }
    }

    properties.extend(shared);
}

fn assign_id(mut feature: Feature) -> Feature {
    let geometry = feature
        .geometry
        .as_ref()
        .and_then(|geometry| serde_json::to_string(geometry).ok())
        .unwrap_or_default();
    let text = feature
        .properties
        .as_ref()
        .and_then(|properties| properties.get("carmen:text"))
        .map(|text| text.to_string())
        .unwrap_or_default();

    let hasher = ahash::RandomState::with_seeds(0, 0, 0, 0);
    let id = hasher.hash_one((geometry, text)) & MAX_SAFE_ID;

    feature.id = Some(geojson::feature::Id::Number(serde_json::Number::from(id)));
    feature
}

fn bounding_box(geometry: &geojson::Geometry) -> Option<Vec<f64>> {
    let geometry = geo_types::Geometry::<f64>::try_from(geometry.value.clone()).ok()?;
    let rect = geometry.bounding_rect()?;
    Some(vec![rect.min().x, rect.min().y, rect.max().x, rect.max().y])
}

fn assign_bbox(mut feature: Feature) -> Feature {
    if let Some(bbox) = feature.geometry.as_ref().and_then(bounding_box) {
        feature.bbox = Some(bbox);
    }
    feature
}
