//! Network topology normalisation.
//!
//! `join` merges lines that meet end to end at a node nothing else touches
//! into maximal lines. `split` is the inverse: it breaks lines at every
//! junction so each piece spans exactly one node-to-node edge.

use ahash::{AHashMap, AHashSet};
use geo_types::{Coord, LineString};

/// Snapping precision for node identity, roughly a centimetre in degrees
const NODE_PRECISION: f64 = 1e7;

/// Tolerance in degrees for a line endpoint landing on another line's interior
const ON_LINE_EPSILON: f64 = 1e-9;

pub type NodeKey = (i64, i64);

pub fn node_key(coord: Coord<f64>) -> NodeKey {
    (
        (coord.x * NODE_PRECISION).round() as i64,
        (coord.y * NODE_PRECISION).round() as i64,
    )
}

pub trait NetworkExploder: Send + Sync {
    /// Merge adjoining lines into maximal joined lines
    fn join(&self, lines: &[LineString<f64>]) -> Vec<LineString<f64>>;

    /// Break lines into atomic junction-to-junction segments
    fn split(&self, lines: &[LineString<f64>]) -> Vec<LineString<f64>>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Explode;

fn endpoints(line: &LineString<f64>) -> Option<(Coord<f64>, Coord<f64>)> {
    Some((*line.0.first()?, *line.0.last()?))
}

impl NetworkExploder for Explode {
    fn join(&self, lines: &[LineString<f64>]) -> Vec<LineString<f64>> {
        let lines: Vec<&LineString<f64>> = lines.iter().filter(|ln| ln.0.len() >= 2).collect();

        // node => indices of lines ending there
        let mut ends: AHashMap<NodeKey, Vec<usize>> = AHashMap::new();
        // nodes some line passes straight through
        let mut interior: AHashSet<NodeKey> = AHashSet::new();

        for (idx, line) in lines.iter().enumerate() {
            let Some((start, end)) = endpoints(line) else {
                continue;
            };
            ends.entry(node_key(start)).or_default().push(idx);
            ends.entry(node_key(end)).or_default().push(idx);

            for coord in &line.0[1..line.0.len() - 1] {
                interior.insert(node_key(*coord));
            }
        }

        let joinable = |key: &NodeKey| -> bool {
            !interior.contains(key) && ends.get(key).is_some_and(|at| at.len() == 2)
        };

        let mut used = vec![false; lines.len()];
        let mut joined = Vec::with_capacity(lines.len());

        for idx in 0..lines.len() {
            if used[idx] {
                continue;
            }
            used[idx] = true;

            let mut chain: Vec<Coord<f64>> = lines[idx].0.clone();

            // forward
            loop {
                let Some(tail) = chain.last().copied() else {
                    break;
                };
                let key = node_key(tail);
                if !joinable(&key) {
                    break;
                }
                let Some(next) = ends[&key].iter().copied().find(|&other| !used[other]) else {
                    break;
                };
                used[next] = true;

                let mut coords = lines[next].0.clone();
                if node_key(coords[0]) != key {
                    coords.reverse();
                }
                chain.extend(coords.into_iter().skip(1));
            }

            // backward
            loop {
                let Some(head) = chain.first().copied() else {
                    break;
                };
                let key = node_key(head);
                if !joinable(&key) {
                    break;
                }
                let Some(prev) = ends[&key].iter().copied().find(|&other| !used[other]) else {
                    break;
                };
                used[prev] = true;

                let mut coords = lines[prev].0.clone();
                if node_key(coords[coords.len() - 1]) != key {
                    coords.reverse();
                }
                coords.pop();
                coords.extend(chain);
                chain = coords;
            }

            joined.push(LineString::new(chain));
        }

        joined
    }

    fn split(&self, lines: &[LineString<f64>]) -> Vec<LineString<f64>> {
        let lines: Vec<LineString<f64>> = lines
            .iter()
            .filter(|ln| ln.0.len() >= 2)
            .enumerate()
            .map(|(idx, line)| insert_touching_endpoints(line, idx, lines))
            .collect();

        // a pass-through vertex counts twice, an endpoint once
        let mut incidence: AHashMap<NodeKey, usize> = AHashMap::new();
        for line in &lines {
            let last = line.0.len() - 1;
            for (pos, coord) in line.0.iter().enumerate() {
                let weight = if pos == 0 || pos == last { 1 } else { 2 };
                *incidence.entry(node_key(*coord)).or_default() += weight;
            }
        }

        let mut atomic = Vec::new();
        for line in lines {
            let last = line.0.len() - 1;
            let mut piece: Vec<Coord<f64>> = Vec::new();

            for (pos, coord) in line.0.into_iter().enumerate() {
                piece.push(coord);

                let junction = incidence
                    .get(&node_key(coord))
                    .is_some_and(|count| *count >= 3);

                if pos == last || (pos > 0 && junction) {
                    if piece.len() >= 2 {
                        atomic.push(LineString::new(std::mem::take(&mut piece)));
                    } else {
                        piece.clear();
                    }
                    piece.push(coord);
                }
            }
        }

        atomic
    }
}

/// Adds a vertex wherever another line's endpoint lands on this line between
/// two existing vertices, so T-junctions become shared nodes.
fn insert_touching_endpoints(
    line: &LineString<f64>,
    own_idx: usize,
    all: &[LineString<f64>],
) -> LineString<f64> {
    let touching: Vec<Coord<f64>> = all
        .iter()
        .filter(|ln| ln.0.len() >= 2)
        .enumerate()
        .filter(|(idx, _)| *idx != own_idx)
        .filter_map(|(_, other)| endpoints(other))
        .flat_map(|(start, end)| [start, end])
        .collect();

    let vertices: AHashSet<NodeKey> = line.0.iter().map(|c| node_key(*c)).collect();

    let mut coords = Vec::with_capacity(line.0.len());
    for segment in line.lines() {
        coords.push(segment.start);

        let mut hits: Vec<(f64, Coord<f64>)> = touching
            .iter()
            .filter(|c| !vertices.contains(&node_key(**c)))
            .filter_map(|c| position_on_segment(segment.start, segment.end, *c).map(|t| (t, *c)))
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0));
        hits.dedup_by(|a, b| node_key(a.1) == node_key(b.1));

        coords.extend(hits.into_iter().map(|(_, c)| c));
    }
    if let Some(last) = line.0.last() {
        coords.push(*last);
    }

    LineString::new(coords)
}

/// Fraction along `start..end` where `point` lies, if it lies strictly inside
fn position_on_segment(start: Coord<f64>, end: Coord<f64>, point: Coord<f64>) -> Option<f64> {
    let dx = end.x - start.x;
    let dy = end.y - start.y;
    let len_sq = dx * dx + dy * dy;
    if len_sq == 0.0 {
        return None;
    }

    let cross = dx * (point.y - start.y) - dy * (point.x - start.x);
    if cross.abs() / len_sq.sqrt() > ON_LINE_EPSILON {
        return None;
    }

    let t = ((point.x - start.x) * dx + (point.y - start.y) * dy) / len_sq;
    (t > 0.0 && t < 1.0).then_some(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ls(coords: &[(f64, f64)]) -> LineString<f64> {
        LineString::from(coords.to_vec())
    }

    #[test]
    fn join_merges_through_degree_two_nodes() {
        let lines = vec![
            ls(&[(0.0, 0.0), (1.0, 0.0)]),
            ls(&[(2.0, 0.0), (1.0, 0.0)]),
            ls(&[(2.0, 0.0), (3.0, 0.0)]),
        ];

        let joined = Explode.join(&lines);

        assert_eq!(joined.len(), 1);
        assert_eq!(
            joined[0],
            ls(&[(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (3.0, 0.0)])
        );
    }

    #[test]
    fn join_stops_at_branches() {
        let lines = vec![
            ls(&[(0.0, 0.0), (1.0, 0.0)]),
            ls(&[(1.0, 0.0), (2.0, 0.0)]),
            ls(&[(1.0, 0.0), (1.0, 1.0)]),
        ];

        let joined = Explode.join(&lines);

        assert_eq!(joined.len(), 3);
    }

    #[test]
    fn join_extends_backwards() {
        let lines = vec![
            ls(&[(1.0, 0.0), (2.0, 0.0)]),
            ls(&[(0.0, 0.0), (1.0, 0.0)]),
        ];

        let joined = Explode.join(&lines);

        assert_eq!(joined, vec![ls(&[(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)])]);
    }

    #[test]
    fn split_breaks_at_pass_through_junction() {
        let lines = vec![
            ls(&[(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)]),
            ls(&[(1.0, 0.0), (1.0, 1.0)]),
        ];

        let atomic = Explode.split(&lines);

        assert_eq!(
            atomic,
            vec![
                ls(&[(0.0, 0.0), (1.0, 0.0)]),
                ls(&[(1.0, 0.0), (2.0, 0.0)]),
                ls(&[(1.0, 0.0), (1.0, 1.0)]),
            ]
        );
    }

    #[test]
    fn split_inserts_t_junction_vertex() {
        let lines = vec![
            ls(&[(0.0, 0.0), (2.0, 0.0)]),
            ls(&[(1.0, 0.0), (1.0, 1.0)]),
        ];

        let atomic = Explode.split(&lines);

        assert_eq!(atomic.len(), 3);
        assert_eq!(atomic[0], ls(&[(0.0, 0.0), (1.0, 0.0)]));
        assert_eq!(atomic[1], ls(&[(1.0, 0.0), (2.0, 0.0)]));
    }

    #[test]
    fn split_keeps_curves_between_junctions() {
        let lines = vec![ls(&[(0.0, 0.0), (1.0, 0.5), (2.0, 0.0)])];

        assert_eq!(Explode.split(&lines), lines);
    }

    #[test]
    fn split_after_join_is_deterministic() {
        let lines = vec![
            ls(&[(0.0, 0.0), (1.0, 0.0)]),
            ls(&[(1.0, 0.0), (2.0, 0.0)]),
            ls(&[(1.0, 0.0), (1.0, 1.0)]),
        ];

        let first = Explode.split(&Explode.join(&lines));
        let second = Explode.split(&Explode.join(&lines));

        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }
}
