//! Re-partitioning of a network cluster that holds ambiguous duplicate
//! house numbers.

use crate::explode::node_key;
use crate::misc::is_ambiguous_pair;
use crate::types::{AddressPoint, Segment};
use geo_types::LineString;
use tracing::debug;

/// An independent slice of a network cluster with the addresses matched to it
#[derive(Clone, Debug, PartialEq)]
pub struct Partition {
    pub network: Vec<LineString<f64>>,
    pub points: Vec<AddressPoint>,
}

fn conflicting(a: &[AddressPoint], b: &[AddressPoint]) -> bool {
    a.iter().any(|pa| {
        b.iter()
            .any(|pb| is_ambiguous_pair(pa.number(), pa.coord, pb.number(), pb.coord))
    })
}

fn self_conflicting(points: &[AddressPoint]) -> bool {
    points
        .iter()
        .enumerate()
        .any(|(i, a)| conflicting(std::slice::from_ref(a), &points[i + 1..]))
}

fn touches(a: &LineString<f64>, b: &LineString<f64>) -> bool {
    let ends = |line: &LineString<f64>| {
        [line.0.first(), line.0.last()]
            .into_iter()
            .flatten()
            .map(|coord| node_key(*coord))
            .collect::<Vec<_>>()
    };

    let b_ends = ends(b);
    ends(a).iter().any(|key| b_ends.contains(key))
}

fn find(parent: &mut [usize], mut idx: usize) -> usize {
    while parent[idx] != idx {
        parent[idx] = parent[parent[idx]];
        idx = parent[idx];
    }
    idx
}

/// Carve coarse segments into sub-networks so that no two addresses sharing
/// a number at distinct locations end up on the same sub-network.
///
/// Segments start out alone and touching segments are merged in index order
/// unless the merge would bring an ambiguous pair together. Returns `None`
/// when the geometry doesn't allow a clean split: an ambiguous pair already
/// shares one segment, or everything collapses into a single partition.
pub fn break_segments(segments: &[Segment], id: i64) -> Option<Vec<Partition>> {
    if segments.len() < 2 {
        debug!(cluster_id = id, "single segment, nothing to break");
        return None;
    }

    if let Some(idx) = segments.iter().position(|seg| self_conflicting(&seg.points)) {
        debug!(
            cluster_id = id,
            segment = idx,
            "ambiguous duplicate shares a segment, cannot break"
        );
        return None;
    }

    let mut parent: Vec<usize> = (0..segments.len()).collect();
    let mut members: Vec<Vec<usize>> = (0..segments.len()).map(|idx| vec![idx]).collect();

    for i in 0..segments.len() {
        for j in (i + 1)..segments.len() {
            if !touches(&segments[i].network, &segments[j].network) {
                continue;
            }

            let root_i = find(&mut parent, i);
            let root_j = find(&mut parent, j);
            if root_i == root_j {
                continue;
            }

            let clash = members[root_i].iter().any(|&a| {
                members[root_j]
                    .iter()
                    .any(|&b| conflicting(&segments[a].points, &segments[b].points))
            });
            if clash {
                continue;
            }

            let (keep, absorb) = (root_i.min(root_j), root_i.max(root_j));
            parent[absorb] = keep;
            let moved = std::mem::take(&mut members[absorb]);
            members[keep].extend(moved);
        }
    }

    let partitions: Vec<Partition> = members
        .into_iter()
        .filter(|group| !group.is_empty())
        .map(|mut group| {
            group.sort_unstable();
            Partition {
                network: group
                    .iter()
                    .map(|&idx| segments[idx].network.clone())
                    .collect(),
                points: group
                    .iter()
                    .flat_map(|&idx| segments[idx].points.iter().cloned())
                    .collect(),
            }
        })
        .collect();

    if partitions.len() < 2 {
        debug!(cluster_id = id, "network collapsed into one partition");
        return None;
    }

    debug!(
        cluster_id = id,
        partitions = partitions.len(),
        "broke network cluster"
    );

    Some(partitions)
}
