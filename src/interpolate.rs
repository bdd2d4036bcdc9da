use crate::misc::leading_int;
use crate::types::{JsonObject, Segment};
use geo::LineLocatePoint;
use geo_types::{Coord, LineString, MultiLineString, MultiPoint, Point};
use geojson::{Feature, Geometry};
use serde_json::{Value, json};

#[derive(Clone, Copy, Debug, Default)]
pub struct InterpolateOptions {
    pub debug: bool,
}

/// Turns a matched segment into an address range feature.
/// `None` means the segment can't be interpolated, which is not an error.
pub trait Interpolator: Send + Sync {
    fn interpolate(&self, segment: &Segment, options: &InterpolateOptions) -> Option<Feature>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

struct Located {
    number: i64,
    fraction: f64,
    side: Side,
}

#[derive(Debug, PartialEq)]
enum SideRange {
    Empty,
    Range { from: i64, to: i64, parity: char },
}

impl SideRange {
    fn from_value(&self) -> Value {
        match self {
            SideRange::Empty => Value::Null,
            SideRange::Range { from, .. } => json!(from),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            SideRange::Empty => Value::Null,
            SideRange::Range { to, .. } => json!(to),
        }
    }

    fn parity_value(&self) -> Value {
        match self {
            SideRange::Empty => Value::Null,
            SideRange::Range { parity, .. } => json!(parity.to_string()),
        }
    }
}

/// TIGER style ranges: one from/to pair and parity per side of the line
#[derive(Clone, Copy, Debug, Default)]
pub struct TigerInterpolator;

/// Which side of the line the coordinate sits on, judged against the
/// nearest piece of the line. Points on the line count as right.
fn side_of_line(line: &LineString<f64>, coord: Coord<f64>) -> Side {
    let nearest = line.lines().min_by(|a, b| {
        let da = segment_distance_sq(a.start, a.end, coord);
        let db = segment_distance_sq(b.start, b.end, coord);
        da.total_cmp(&db)
    });

    match nearest {
        Some(piece) => {
            let cross = (piece.end.x - piece.start.x) * (coord.y - piece.start.y)
                - (piece.end.y - piece.start.y) * (coord.x - piece.start.x);
            if cross > 0.0 { Side::Left } else { Side::Right }
        }
        None => Side::Right,
    }
}

fn segment_distance_sq(start: Coord<f64>, end: Coord<f64>, p: Coord<f64>) -> f64 {
    let dx = end.x - start.x;
    let dy = end.y - start.y;
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq == 0.0 {
        0.0
    } else {
        (((p.x - start.x) * dx + (p.y - start.y) * dy) / len_sq).clamp(0.0, 1.0)
    };
    let px = start.x + t * dx - p.x;
    let py = start.y + t * dy - p.y;
    px * px + py * py
}

/// Points on one side ordered by position along the line
fn along(located: &[Located], side: Side) -> Vec<&Located> {
    let mut on_side: Vec<&Located> = located.iter().filter(|l| l.side == side).collect();
    on_side.sort_by(|a, b| {
        a.fraction
            .total_cmp(&b.fraction)
            .then_with(|| a.number.cmp(&b.number))
    });
    on_side
}

/// `None` when house numbers along this side go both up and down
fn side_range(located: &[&Located]) -> Option<SideRange> {
    let (Some(first), Some(last)) = (located.first(), located.last()) else {
        return Some(SideRange::Empty);
    };

    let numbers: Vec<i64> = located.iter().map(|l| l.number).collect();
    let ascending = numbers.windows(2).all(|w| w[0] <= w[1]);
    let descending = numbers.windows(2).all(|w| w[0] >= w[1]);
    if !ascending && !descending {
        return None;
    }

    let even = numbers.iter().all(|n| n % 2 == 0);
    let odd = numbers.iter().all(|n| n % 2 != 0);
    let parity = match (even, odd) {
        (true, _) => 'E',
        (_, true) => 'O',
        _ => 'B',
    };

    Some(SideRange::Range {
        from: first.number,
        to: last.number,
        parity,
    })
}

impl Interpolator for TigerInterpolator {
    fn interpolate(&self, segment: &Segment, options: &InterpolateOptions) -> Option<Feature> {
        let located: Vec<Located> = segment
            .points
            .iter()
            .filter_map(|point| {
                let number = leading_int(point.number())?;
                let fraction = segment.network.line_locate_point(&point.point())?;
                Some(Located {
                    number,
                    fraction,
                    side: side_of_line(&segment.network, point.coord),
                })
            })
            .collect();

        if located.len() < 2 {
            return None;
        }

        let left = side_range(&along(&located, Side::Left))?;
        let right = side_range(&along(&located, Side::Right))?;

        let network = MultiLineString::new(vec![segment.network.clone()]);
        let addresses: MultiPoint<f64> = segment
            .points
            .iter()
            .map(|point| Point::from(point.coord))
            .collect();

        let geometry = Geometry::new(geojson::Value::GeometryCollection(vec![
            Geometry::new(geojson::Value::from(&network)),
            Geometry::new(geojson::Value::from(&addresses)),
        ]));

        let numbers: Vec<Value> = segment
            .points
            .iter()
            .map(|point| json!(point.number()))
            .collect();
        let address_props: Vec<Value> = segment
            .points
            .iter()
            .map(|point| Value::Object(point.props.props.clone()))
            .collect();

        let mut properties = JsonObject::new();
        properties.insert("carmen:rangetype".into(), json!("tiger"));
        properties.insert("carmen:lfromhn".into(), json!([left.from_value(), null]));
        properties.insert("carmen:ltohn".into(), json!([left.to_value(), null]));
        properties.insert("carmen:rfromhn".into(), json!([right.from_value(), null]));
        properties.insert("carmen:rtohn".into(), json!([right.to_value(), null]));
        properties.insert("carmen:parityl".into(), json!([left.parity_value(), null]));
        properties.insert("carmen:parityr".into(), json!([right.parity_value(), null]));
        properties.insert("carmen:addressnumber".into(), json!([null, numbers]));
        properties.insert("carmen:addressprops".into(), json!([null, address_props]));

        if options.debug {
            let fractions: Vec<f64> = located.iter().map(|l| l.fraction).collect();
            properties.insert("internal:fractions".into(), json!(fractions));
        }

        Some(Feature {
            bbox: None,
            geometry: Some(geometry),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AddressPoint, AddressProps};
    use geo_types::coord;

    fn segment(points: &[(f64, f64, &str)]) -> Segment {
        Segment::new(
            LineString::from(vec![(0.0, 0.0), (0.01, 0.0)]),
            points
                .iter()
                .enumerate()
                .map(|(i, (x, y, number))| {
                    AddressPoint::new(coord! { x: *x, y: *y }, AddressProps::new(i as i64, *number))
                })
                .collect(),
        )
    }

    fn prop<'a>(feature: &'a Feature, key: &str) -> &'a Value {
        &feature.properties.as_ref().unwrap()[key]
    }

    #[test]
    fn interpolates_both_sides() {
        let seg = segment(&[
            (0.002, 0.0001, "1"),
            (0.008, 0.0001, "9"),
            (0.002, -0.0001, "2"),
            (0.008, -0.0001, "10"),
        ]);

        let feature = TigerInterpolator
            .interpolate(&seg, &InterpolateOptions::default())
            .unwrap();

        assert_eq!(prop(&feature, "carmen:lfromhn"), &json!([1, null]));
        assert_eq!(prop(&feature, "carmen:ltohn"), &json!([9, null]));
        assert_eq!(prop(&feature, "carmen:parityl"), &json!(["O", null]));
        assert_eq!(prop(&feature, "carmen:rfromhn"), &json!([2, null]));
        assert_eq!(prop(&feature, "carmen:rtohn"), &json!([10, null]));
        assert_eq!(prop(&feature, "carmen:parityr"), &json!(["E", null]));
        assert_eq!(
            prop(&feature, "carmen:addressnumber"),
            &json!([null, ["1", "9", "2", "10"]])
        );
        assert!(feature.properties.as_ref().unwrap().get("internal:fractions").is_none());
    }

    #[test]
    fn descending_ranges_are_kept() {
        let seg = segment(&[(0.002, 0.0001, "20"), (0.008, 0.0001, "10")]);

        let feature = TigerInterpolator
            .interpolate(&seg, &InterpolateOptions { debug: true })
            .unwrap();

        assert_eq!(prop(&feature, "carmen:lfromhn"), &json!([20, null]));
        assert_eq!(prop(&feature, "carmen:ltohn"), &json!([10, null]));
        assert_eq!(prop(&feature, "carmen:rfromhn"), &json!([null, null]));
        assert!(prop(&feature, "internal:fractions").is_array());
    }

    #[test]
    fn rejects_single_point() {
        let seg = segment(&[(0.002, 0.0001, "1")]);
        assert!(TigerInterpolator
            .interpolate(&seg, &InterpolateOptions::default())
            .is_none());
    }

    #[test]
    fn rejects_non_numeric_points() {
        let seg = segment(&[(0.002, 0.0001, "rear"), (0.004, 0.0001, "3")]);
        assert!(TigerInterpolator
            .interpolate(&seg, &InterpolateOptions::default())
            .is_none());
    }

    #[test]
    fn rejects_non_monotonic_side() {
        let seg = segment(&[
            (0.002, 0.0001, "1"),
            (0.005, 0.0001, "9"),
            (0.008, 0.0001, "3"),
        ]);
        assert!(TigerInterpolator
            .interpolate(&seg, &InterpolateOptions::default())
            .is_none());
    }

    #[test]
    fn mixed_parity_is_both() {
        let seg = segment(&[(0.002, 0.0001, "1"), (0.008, 0.0001, "4")]);

        let feature = TigerInterpolator
            .interpolate(&seg, &InterpolateOptions::default())
            .unwrap();

        assert_eq!(prop(&feature, "carmen:parityl"), &json!(["B", null]));
    }
}
