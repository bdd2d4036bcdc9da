use crate::misc::line_length_km;
use crate::types::{AddressPoint, Segment, sort_address_points};
use geo::{Closest, ClosestPoint, Distance, Haversine};
use geo_types::{LineString, Point};
use tracing::trace;

/// Lines this short (in km) are artifacts of geometry processing and never matched
pub const MIN_LINE_LENGTH_KM: f64 = 0.001;

/// Distance in metres from `point` to its projection on `line`
pub fn projected_distance(line: &LineString<f64>, point: Point<f64>) -> Option<f64> {
    match line.closest_point(&point) {
        Closest::Intersection(on_line) | Closest::SinglePoint(on_line) => {
            Some(Haversine.distance(on_line, point))
        }
        Closest::Indeterminate => None,
    }
}

/// Index of the line closest to `point`.
///
/// Only a strictly smaller distance replaces the current best, so on a tie the
/// line seen first wins.
pub fn nearest_line(lines: &[&LineString<f64>], point: Point<f64>) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;

    for (idx, line) in lines.iter().enumerate() {
        let Some(dist) = projected_distance(line, point) else {
            continue;
        };

        if best.is_none_or(|(_, best_dist)| dist < best_dist) {
            best = Some((idx, dist));
        }
    }

    best.map(|(idx, _)| idx)
}

/// Assign every address point to its nearest network line.
///
/// Points are sorted by number then coordinate first, so segment membership
/// and order don't depend on input order. Lines without any points are left
/// out. An empty or fully degenerate network gives no segments.
pub fn distribute(network: &[LineString<f64>], mut points: Vec<AddressPoint>) -> Vec<Segment> {
    let lines: Vec<&LineString<f64>> = network
        .iter()
        .filter(|line| line_length_km(line) > MIN_LINE_LENGTH_KM)
        .collect();

    sort_address_points(&mut points);

    if lines.is_empty() {
        trace!(points = points.len(), "no matchable lines");
        return Vec::new();
    }

    let mut buckets: Vec<Vec<AddressPoint>> = (0..lines.len()).map(|_| Vec::new()).collect();

    for point in points {
        match nearest_line(&lines, point.point()) {
            Some(idx) => buckets[idx].push(point),
            None => trace!(number = point.number(), "address point could not be projected"),
        }
    }

    lines
        .into_iter()
        .zip(buckets)
        .filter(|(_, points)| !points.is_empty())
        .map(|(line, points)| Segment::new(line.clone(), points))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AddressProps;
    use geo_types::coord;

    fn ls(coords: &[(f64, f64)]) -> LineString<f64> {
        LineString::from(coords.to_vec())
    }

    fn addr(id: i64, number: &str, x: f64, y: f64) -> AddressPoint {
        AddressPoint::new(coord! { x: x, y: y }, AddressProps::new(id, number))
    }

    #[test]
    fn assigns_points_to_nearest_line() {
        let network = vec![
            ls(&[(0.0, 0.0), (0.01, 0.0)]),
            ls(&[(0.0, 0.01), (0.01, 0.01)]),
        ];
        let points = vec![
            addr(1, "1", 0.005, 0.0001),
            addr(2, "2", 0.005, 0.0099),
            addr(3, "3", 0.002, 0.0002),
        ];

        let segments = distribute(&network, points);

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].network, network[0]);
        assert_eq!(segments[0].numbers(), vec!["1", "3"]);
        assert_eq!(segments[1].numbers(), vec!["2"]);
    }

    #[test]
    fn every_point_lands_in_exactly_one_segment() {
        let network = vec![
            ls(&[(0.0, 0.0), (0.01, 0.0)]),
            ls(&[(0.01, 0.0), (0.02, 0.0)]),
            ls(&[(0.01, 0.0), (0.01, 0.01)]),
        ];
        let points: Vec<AddressPoint> = (0..30)
            .map(|i| {
                let f = i as f64;
                addr(i, &(i * 2).to_string(), (f * 0.0007) % 0.02, (f * 0.0003) % 0.01)
            })
            .collect();

        let segments = distribute(&network, points.clone());

        let mut seen: Vec<i64> = segments
            .iter()
            .flat_map(|seg| seg.points.iter().map(|p| p.props.id))
            .collect();
        seen.sort();
        let expected: Vec<i64> = (0..30).collect();
        assert_eq!(seen, expected);

        for segment in &segments {
            assert_eq!(segment.address_points().len(), segment.address_props().len());
        }
    }

    #[test]
    fn degenerate_lines_are_never_matched() {
        let network = vec![
            ls(&[(0.005, 0.0001), (0.005, 0.0001)]),
            ls(&[(0.0, 0.001), (0.01, 0.001)]),
            ls(&[(0.005, 0.0), (0.005000001, 0.0)]),
        ];
        let points = vec![addr(1, "1", 0.005, 0.0001), addr(2, "3", 0.005, 0.0)];

        let segments = distribute(&network, points);

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].network, network[1]);
        assert_eq!(segments[0].len(), 2);
    }

    #[test]
    fn empty_network_matches_nothing() {
        let segments = distribute(&[], vec![addr(1, "1", 0.0, 0.0)]);
        assert!(segments.is_empty());

        let degenerate = vec![ls(&[(1.0, 1.0), (1.0, 1.0)])];
        assert!(distribute(&degenerate, vec![addr(1, "1", 0.0, 0.0)]).is_empty());
    }

    #[test]
    fn ties_go_to_first_line() {
        // point sits exactly between two parallel lines
        let network = vec![
            ls(&[(0.0, 0.001), (0.01, 0.001)]),
            ls(&[(0.0, -0.001), (0.01, -0.001)]),
        ];
        let segments = distribute(&network, vec![addr(1, "1", 0.005, 0.0)]);

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].network, network[0]);

        let reversed = vec![network[1].clone(), network[0].clone()];
        let segments = distribute(&reversed, vec![addr(1, "1", 0.005, 0.0)]);
        assert_eq!(segments[0].network, reversed[0]);
    }

    #[test]
    fn output_does_not_depend_on_input_order() {
        let network = vec![ls(&[(0.0, 0.0), (0.01, 0.0)])];
        let points = vec![
            addr(1, "16", 0.008, 0.0001),
            addr(2, "10", 0.002, 0.0001),
            addr(3, "14", 0.006, 0.0001),
            addr(4, "12", 0.004, 0.0001),
        ];
        let mut reversed = points.clone();
        reversed.reverse();

        let a = distribute(&network, points);
        let b = distribute(&network, reversed);

        assert_eq!(a, b);
        assert_eq!(a[0].numbers(), vec!["10", "12", "14", "16"]);
    }

    #[test]
    fn distribute_on_sorted_input_is_idempotent() {
        let network = vec![ls(&[(0.0, 0.0), (0.01, 0.0)])];
        let points = vec![addr(1, "2", 0.001, 0.0), addr(2, "1", 0.002, 0.0)];

        let once = distribute(&network, points);
        let twice = distribute(&network, once[0].points.clone());

        assert_eq!(once, twice);
    }
}
