//! Geohash codec.
//!
//! Standard interleaved-bit geohash: even bits bisect longitude, odd bits
//! bisect latitude, and every 5 bits become one base-32 character. A hash
//! of precision `p` identifies a cell; every longer hash sharing it as a
//! prefix lies inside that cell, which is what makes prefix range scans
//! usable as "what is near here" queries.

use std::collections::BTreeSet;

use super::types::{BoundingBox, CoordError, Direction, GeoPoint, MAX_LAT, MAX_LON, MIN_LAT, MIN_LON};

/// Geohash alphabet (no a, i, l, o).
const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Highest supported precision.
pub const MAX_PRECISION: usize = 12;

/// Precision at which marker geohashes are stored.
pub const STORAGE_PRECISION: usize = 8;

/// Upper sentinel appended to a prefix to build an inclusive range scan.
pub const PREFIX_RANGE_SENTINEL: char = '\u{10FFFF}';

/// A decoded geohash cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeohashCell {
    /// Centre of the cell.
    pub center: GeoPoint,
    /// Cell boundaries.
    pub bbox: BoundingBox,
}

fn base32_value(c: u8) -> Option<u8> {
    BASE32.iter().position(|&b| b == c).map(|p| p as u8)
}

fn check_precision(precision: usize) -> Result<(), CoordError> {
    if (1..=MAX_PRECISION).contains(&precision) {
        Ok(())
    } else {
        Err(CoordError::InvalidPrecision(precision))
    }
}

/// Encodes a point into a geohash of `precision` characters.
///
/// # Errors
///
/// Returns `CoordError` for out-of-range coordinates or precision.
pub fn encode(lat: f64, lon: f64, precision: usize) -> Result<String, CoordError> {
    if !(MIN_LAT..=MAX_LAT).contains(&lat) {
        return Err(CoordError::InvalidLatitude(lat));
    }
    if !(MIN_LON..=MAX_LON).contains(&lon) {
        return Err(CoordError::InvalidLongitude(lon));
    }
    check_precision(precision)?;

    let (mut lat_lo, mut lat_hi) = (MIN_LAT, MAX_LAT);
    let (mut lon_lo, mut lon_hi) = (MIN_LON, MAX_LON);
    let mut hash = String::with_capacity(precision);
    let mut even = true;
    let mut bits = 0u8;
    let mut bit_count = 0;

    while hash.len() < precision {
        bits <<= 1;
        if even {
            let mid = (lon_lo + lon_hi) / 2.0;
            if lon >= mid {
                bits |= 1;
                lon_lo = mid;
            } else {
                lon_hi = mid;
            }
        } else {
            let mid = (lat_lo + lat_hi) / 2.0;
            if lat >= mid {
                bits |= 1;
                lat_lo = mid;
            } else {
                lat_hi = mid;
            }
        }
        even = !even;
        bit_count += 1;

        if bit_count == 5 {
            hash.push(BASE32[bits as usize] as char);
            bits = 0;
            bit_count = 0;
        }
    }

    Ok(hash)
}

/// Decodes a geohash into its cell.
///
/// Upper-case input is accepted.
pub fn decode(hash: &str) -> Result<GeohashCell, CoordError> {
    if hash.is_empty() {
        return Err(CoordError::InvalidGeohash {
            hash: hash.to_string(),
            reason: "empty",
        });
    }
    if hash.len() > MAX_PRECISION {
        return Err(CoordError::InvalidGeohash {
            hash: hash.to_string(),
            reason: "longer than 12 characters",
        });
    }

    let (mut lat_lo, mut lat_hi) = (MIN_LAT, MAX_LAT);
    let (mut lon_lo, mut lon_hi) = (MIN_LON, MAX_LON);
    let mut even = true;

    for c in hash.bytes() {
        let value = base32_value(c.to_ascii_lowercase()).ok_or_else(|| {
            CoordError::InvalidGeohash {
                hash: hash.to_string(),
                reason: "invalid character",
            }
        })?;
        for shift in (0..5).rev() {
            let bit = (value >> shift) & 1;
            if even {
                let mid = (lon_lo + lon_hi) / 2.0;
                if bit == 1 {
                    lon_lo = mid;
                } else {
                    lon_hi = mid;
                }
            } else {
                let mid = (lat_lo + lat_hi) / 2.0;
                if bit == 1 {
                    lat_lo = mid;
                } else {
                    lat_hi = mid;
                }
            }
            even = !even;
        }
    }

    let bbox = BoundingBox::new(lat_lo, lon_lo, lat_hi, lon_hi);
    Ok(GeohashCell {
        center: bbox.center(),
        bbox,
    })
}

/// Cell dimensions `(lat_height, lon_width)` in degrees at `precision`.
pub fn cell_size(precision: usize) -> (f64, f64) {
    let bits = 5 * precision as i32;
    let lon_bits = (bits + 1) / 2;
    let lat_bits = bits / 2;
    (180.0 / 2f64.powi(lat_bits), 360.0 / 2f64.powi(lon_bits))
}

/// The cell next to `hash` in `direction`, at the same precision.
///
/// Longitude wraps around the antimeridian; returns `None` past a pole.
pub fn adjacent(hash: &str, direction: Direction) -> Result<Option<String>, CoordError> {
    let cell = decode(hash)?;
    let (height, width) = cell_size(hash.len());
    let (dlat, dlon) = direction.offset();

    let lat = cell.center.lat + dlat * height;
    if !(MIN_LAT..=MAX_LAT).contains(&lat) {
        return Ok(None);
    }
    let lon = (cell.center.lon + dlon * width + 180.0).rem_euclid(360.0) - 180.0;
    encode(lat, lon, hash.len()).map(Some)
}

/// All existing neighbours of `hash`, clockwise from north.
pub fn neighbors(hash: &str) -> Result<Vec<String>, CoordError> {
    let mut out = Vec::with_capacity(8);
    for direction in Direction::ALL {
        if let Some(n) = adjacent(hash, direction)? {
            out.push(n);
        }
    }
    Ok(out)
}

/// Inclusive cell index ranges `(lat_start, lat_end, lon_start, lon_end)`.
fn cell_index_ranges(bbox: &BoundingBox, precision: usize) -> (i64, i64, i64, i64) {
    let (height, width) = cell_size(precision);
    let lat_cells = (180.0 / height) as i64;
    let lon_cells = (360.0 / width) as i64;
    let index = |value: f64, origin: f64, step: f64, count: i64| -> i64 {
        (((value - origin) / step).floor() as i64).clamp(0, count - 1)
    };

    (
        index(bbox.min_lat, MIN_LAT, height, lat_cells),
        index(bbox.max_lat, MIN_LAT, height, lat_cells),
        index(bbox.min_lon, MIN_LON, width, lon_cells),
        index(bbox.max_lon, MIN_LON, width, lon_cells),
    )
}

/// Geohash cells of `precision` that together cover `bbox`, sorted.
pub fn covering_cells(bbox: &BoundingBox, precision: usize) -> Result<Vec<String>, CoordError> {
    check_precision(precision)?;
    let (height, width) = cell_size(precision);
    let (lat_start, lat_end, lon_start, lon_end) = cell_index_ranges(bbox, precision);

    let mut cells = BTreeSet::new();
    for i in lat_start..=lat_end {
        let lat = MIN_LAT + (i as f64 + 0.5) * height;
        for j in lon_start..=lon_end {
            let lon = MIN_LON + (j as f64 + 0.5) * width;
            cells.insert(encode(lat, lon, precision)?);
        }
    }
    Ok(cells.into_iter().collect())
}

/// Number of cells [`covering_cells`] would return, without encoding them.
pub fn covering_cell_count(bbox: &BoundingBox, precision: usize) -> usize {
    let (lat_start, lat_end, lon_start, lon_end) = cell_index_ranges(bbox, precision);
    ((lat_end - lat_start + 1) * (lon_end - lon_start + 1)) as usize
}

/// Inclusive `[lower, upper]` bounds matching every hash starting with `prefix`.
pub fn prefix_range(prefix: &str) -> (String, String) {
    let mut upper = String::with_capacity(prefix.len() + 4);
    upper.push_str(prefix);
    upper.push(PREFIX_RANGE_SENTINEL);
    (prefix.to_string(), upper)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_hashes() {
        assert_eq!(encode(57.64911, 10.40744, 11).unwrap(), "u4pruydqqvj");
        assert_eq!(encode(42.6, -5.6, 5).unwrap(), "ezs42");
        assert_eq!(encode(0.0, 0.0, 1).unwrap(), "s");
    }

    #[test]
    fn test_decode_known_hash() {
        let cell = decode("ezs42").unwrap();
        assert!((cell.center.lat - 42.605).abs() < 0.01);
        assert!((cell.center.lon - (-5.603)).abs() < 0.01);
        assert!(cell.bbox.contains_point(42.6, -5.6));
    }

    #[test]
    fn test_decode_accepts_uppercase() {
        assert_eq!(decode("EZS42").unwrap(), decode("ezs42").unwrap());
    }

    #[test]
    fn test_encode_is_deterministic_and_prefix_stable() {
        let long = encode(40.7128, -74.0060, 8).unwrap();
        let short = encode(40.7128, -74.0060, 4).unwrap();
        assert_eq!(long, encode(40.7128, -74.0060, 8).unwrap());
        assert!(long.starts_with(&short));
    }

    #[test]
    fn test_encode_rejects_invalid_input() {
        assert!(matches!(
            encode(91.0, 0.0, 5),
            Err(CoordError::InvalidLatitude(_))
        ));
        assert!(matches!(
            encode(0.0, -180.5, 5),
            Err(CoordError::InvalidLongitude(_))
        ));
        assert!(matches!(
            encode(0.0, 0.0, 0),
            Err(CoordError::InvalidPrecision(0))
        ));
        assert!(matches!(
            encode(0.0, 0.0, 13),
            Err(CoordError::InvalidPrecision(13))
        ));
    }

    #[test]
    fn test_decode_rejects_invalid_characters() {
        assert!(decode("ab").is_err());
        assert!(decode("").is_err());
        assert!(decode("0123456789bcd").is_err());
    }

    #[test]
    fn test_poles_and_antimeridian() {
        for (lat, lon) in [(90.0, 180.0), (-90.0, -180.0), (90.0, -180.0), (-90.0, 180.0)] {
            let hash = encode(lat, lon, 6).unwrap();
            assert!(decode(&hash).unwrap().bbox.contains_point(lat, lon));
        }
    }

    #[test]
    fn test_cell_size() {
        let (h, w) = cell_size(1);
        assert_eq!((h, w), (45.0, 45.0));
        let (h, w) = cell_size(2);
        assert_eq!((h, w), (5.625, 11.25));
    }

    #[test]
    fn test_adjacent() {
        assert_eq!(adjacent("ezs42", Direction::North).unwrap().unwrap(), "ezs48");
        assert_eq!(adjacent("ezs42", Direction::East).unwrap().unwrap(), "ezs43");
        assert_eq!(adjacent("ezs42", Direction::South).unwrap().unwrap(), "ezs40");
        assert_eq!(adjacent("ezs42", Direction::West).unwrap().unwrap(), "ezefr");
    }

    #[test]
    fn test_adjacent_wraps_and_stops_at_pole() {
        let east_edge = encode(0.0, 179.99, 3).unwrap();
        let wrapped = adjacent(&east_edge, Direction::East).unwrap().unwrap();
        assert!(decode(&wrapped).unwrap().center.lon < -170.0);

        let north_edge = encode(89.99, 0.0, 3).unwrap();
        assert!(adjacent(&north_edge, Direction::North).unwrap().is_none());
    }

    #[test]
    fn test_neighbors() {
        let n = neighbors("ezs42").unwrap();
        assert_eq!(n.len(), 8);
        assert!(!n.contains(&"ezs42".to_string()));
    }

    #[test]
    fn test_covering_cells_single_cell() {
        let cell = decode("dr5r").unwrap();
        let inner = BoundingBox::new(
            cell.bbox.min_lat + 0.01,
            cell.bbox.min_lon + 0.01,
            cell.bbox.max_lat - 0.01,
            cell.bbox.max_lon - 0.01,
        );
        assert_eq!(covering_cells(&inner, 4).unwrap(), vec!["dr5r".to_string()]);
        assert_eq!(covering_cell_count(&inner, 4), 1);
    }

    #[test]
    fn test_covering_cells_cover_every_corner() {
        let bbox = BoundingBox::new(40.0, -75.0, 41.5, -72.5);
        let cells = covering_cells(&bbox, 3).unwrap();
        assert_eq!(cells.len(), covering_cell_count(&bbox, 3));

        for (lat, lon) in [
            (bbox.min_lat, bbox.min_lon),
            (bbox.min_lat, bbox.max_lon),
            (bbox.max_lat, bbox.min_lon),
            (bbox.max_lat, bbox.max_lon),
            (40.7, -74.0),
        ] {
            let hash = encode(lat, lon, 3).unwrap();
            assert!(cells.contains(&hash), "{} missing for ({}, {})", hash, lat, lon);
        }
    }

    #[test]
    fn test_prefix_range() {
        let (lo, hi) = prefix_range("dr5");
        assert_eq!(lo, "dr5");
        assert!(hi.starts_with("dr5"));
        assert!("dr5ru7" >= lo.as_str() && "dr5ru7" <= hi.as_str());
        assert!("dr6" > hi.as_str());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_roundtrip_contains_point(
                lat in -90.0..=90.0_f64,
                lon in -180.0..=180.0_f64,
                precision in 1usize..=12
            ) {
                let hash = encode(lat, lon, precision)?;
                prop_assert_eq!(hash.len(), precision);
                let cell = decode(&hash)?;
                prop_assert!(
                    cell.bbox.contains_point(lat, lon),
                    "({}, {}) not inside {} for {}", lat, lon, cell.bbox, hash
                );
            }

            #[test]
            fn test_shorter_hash_is_prefix(
                lat in -90.0..=90.0_f64,
                lon in -180.0..=180.0_f64,
                short in 1usize..=6,
                extra in 0usize..=6
            ) {
                let a = encode(lat, lon, short)?;
                let b = encode(lat, lon, short + extra)?;
                prop_assert!(b.starts_with(&a));
            }
        }
    }
}
