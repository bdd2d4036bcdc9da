use crate::cluster::break_segments;
use crate::explode::NetworkExploder;
use crate::matcher::distribute;
use crate::misc::has_dup_address_within;
use crate::types::{Segment, SplitFeat};
use geo_types::Coord;
use tracing::debug;

/// Matches a cluster's addresses to its network, isolating house numbers that
/// occur at two distinct places onto separate sub-networks when possible.
pub struct ClusterResolver<'a> {
    exploder: &'a dyn NetworkExploder,
}

impl<'a> ClusterResolver<'a> {
    pub fn new(exploder: &'a dyn NetworkExploder) -> Self {
        Self { exploder }
    }

    pub fn resolve(&self, feat: &SplitFeat) -> Vec<Segment> {
        let points = feat.address_points();
        let network = self.exploder.join(&feat.network.0);

        let numbers: Vec<&str> = points.iter().map(|p| p.number()).collect();
        let coords: Vec<Coord<f64>> = points.iter().map(|p| p.coord).collect();

        if !has_dup_address_within(&numbers, &coords) {
            return distribute(&self.exploder.split(&network), points);
        }

        debug!(cluster_id = feat.id, "ambiguous duplicate house numbers");

        let coarse = distribute(&network, points.clone());

        match break_segments(&coarse, feat.id) {
            Some(partitions) => partitions
                .into_iter()
                .flat_map(|partition| {
                    distribute(&self.exploder.split(&partition.network), partition.points)
                })
                .collect(),
            None => {
                debug!(
                    cluster_id = feat.id,
                    "could not break network, matching in a single pass"
                );
                distribute(&self.exploder.split(&network), points)
            }
        }
    }
}
