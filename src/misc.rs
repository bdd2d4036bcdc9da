use ahash::AHashMap;
use geo::{Distance, Haversine};
use geo_types::{Coord, LineString, Point};

/// Two addresses sharing a number further apart than this are distinct places
pub const DUPLICATE_SEPARATION_KM: f64 = 0.5;

/// Integer prefix of a house number, the way `parseInt` reads "12b" as 12.
pub fn leading_int(number: &str) -> Option<i64> {
    let trimmed = number.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());

    let value: i64 = digits[..end].parse().ok()?;
    Some(if negative { -value } else { value })
}

pub fn haversine_km(a: Coord<f64>, b: Coord<f64>) -> f64 {
    Haversine.distance(Point::from(a), Point::from(b)) / 1000.0
}

/// Haversine length of a line in kilometres
pub fn line_length_km(line: &LineString<f64>) -> f64 {
    line.lines()
        .map(|segment| haversine_km(segment.start, segment.end))
        .sum()
}

/// Same house number at two locations further apart than [`DUPLICATE_SEPARATION_KM`]
pub fn is_ambiguous_pair(
    number_a: &str,
    coord_a: Coord<f64>,
    number_b: &str,
    coord_b: Coord<f64>,
) -> bool {
    number_a == number_b && haversine_km(coord_a, coord_b) > DUPLICATE_SEPARATION_KM
}

/// Does any house number occur at two distinct locations?
///
/// `numbers` and `coords` are index aligned. Repeats of a number within
/// [`DUPLICATE_SEPARATION_KM`] of each other are genuine duplicates of one
/// address and don't count.
pub fn has_dup_address_within(numbers: &[&str], coords: &[Coord<f64>]) -> bool {
    let mut by_number: AHashMap<&str, Vec<Coord<f64>>> = AHashMap::new();

    for (number, coord) in numbers.iter().zip(coords) {
        by_number.entry(*number).or_default().push(*coord);
    }

    by_number.values().any(|coords| {
        coords.iter().enumerate().any(|(i, a)| {
            coords[i + 1..]
                .iter()
                .any(|b| haversine_km(*a, *b) > DUPLICATE_SEPARATION_KM)
        })
    })
}
