use super::{AddressPoint, AddressProps};
use geo_types::{Coord, LineString};

/// A network line together with the address points matched to it.
/// Owns its copies so re-partitioning never touches the source cluster.
#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    pub network: LineString<f64>,
    pub points: Vec<AddressPoint>,
}

impl Segment {
    pub fn new(network: LineString<f64>, points: Vec<AddressPoint>) -> Self {
        Self { network, points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Coordinates, index-aligned with [`Segment::address_props`]
    pub fn address_points(&self) -> Vec<Coord<f64>> {
        self.points.iter().map(|point| point.coord).collect()
    }

    /// Property rows, index-aligned with [`Segment::address_points`]
    pub fn address_props(&self) -> Vec<&AddressProps> {
        self.points.iter().map(|point| &point.props).collect()
    }

    pub fn numbers(&self) -> Vec<&str> {
        self.points.iter().map(|point| point.number()).collect()
    }
}
