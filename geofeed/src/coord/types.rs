//! Geographic primitives: points, bounding boxes and viewports.

use std::fmt;

use thiserror::Error;

/// Minimum valid latitude in degrees.
pub const MIN_LAT: f64 = -90.0;

/// Maximum valid latitude in degrees.
pub const MAX_LAT: f64 = 90.0;

/// Minimum valid longitude in degrees.
pub const MIN_LON: f64 = -180.0;

/// Maximum valid longitude in degrees.
pub const MAX_LON: f64 = 180.0;

/// Errors raised by coordinate and geohash operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordError {
    #[error("Invalid latitude: {0} (must be within -90..=90)")]
    InvalidLatitude(f64),

    #[error("Invalid longitude: {0} (must be within -180..=180)")]
    InvalidLongitude(f64),

    #[error("Invalid geohash precision: {0} (must be within 1..=12)")]
    InvalidPrecision(usize),

    #[error("Invalid geohash '{hash}': {reason}")]
    InvalidGeohash { hash: String, reason: &'static str },
}

/// A point on the globe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Compass direction used for neighbour and adjacency lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

impl Direction {
    /// The four cardinal directions.
    pub const CARDINAL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    /// All eight directions, clockwise from north.
    pub const ALL: [Direction; 8] = [
        Direction::North,
        Direction::NorthEast,
        Direction::East,
        Direction::SouthEast,
        Direction::South,
        Direction::SouthWest,
        Direction::West,
        Direction::NorthWest,
    ];

    /// Unit offset as (lat steps, lon steps).
    pub fn offset(self) -> (f64, f64) {
        match self {
            Direction::North => (1.0, 0.0),
            Direction::NorthEast => (1.0, 1.0),
            Direction::East => (0.0, 1.0),
            Direction::SouthEast => (-1.0, 1.0),
            Direction::South => (-1.0, 0.0),
            Direction::SouthWest => (-1.0, -1.0),
            Direction::West => (0.0, -1.0),
            Direction::NorthWest => (1.0, -1.0),
        }
    }
}

/// Axis-aligned latitude/longitude rectangle.
///
/// Boxes never wrap the antimeridian: `min_lon <= max_lon` always holds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// Creates a box from its corners, normalising corner order.
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Self {
        Self {
            min_lat: min_lat.min(max_lat),
            min_lon: min_lon.min(max_lon),
            max_lat: max_lat.max(min_lat),
            max_lon: max_lon.max(min_lon),
        }
    }

    /// The whole globe.
    pub fn world() -> Self {
        Self::new(MIN_LAT, MIN_LON, MAX_LAT, MAX_LON)
    }

    pub fn contains_point(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }

    /// Returns true if `other` lies entirely inside this box.
    pub fn contains(&self, other: &BoundingBox) -> bool {
        other.min_lat >= self.min_lat
            && other.max_lat <= self.max_lat
            && other.min_lon >= self.min_lon
            && other.max_lon <= self.max_lon
    }

    /// Like [`contains`](Self::contains), but treats this box's max edges as
    /// open unless they lie on the edge of the world.
    ///
    /// Geohash cells own only their min edges, so a point on the max edge of
    /// an area assembled from cells is encoded into a cell outside it.
    pub fn contains_half_open(&self, other: &BoundingBox) -> bool {
        let lat_ok = other.max_lat < self.max_lat || self.max_lat >= MAX_LAT;
        let lon_ok = other.max_lon < self.max_lon || self.max_lon >= MAX_LON;
        other.min_lat >= self.min_lat && other.min_lon >= self.min_lon && lat_ok && lon_ok
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
            && self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
    }

    /// Smallest box covering both boxes.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_lat: self.min_lat.min(other.min_lat),
            min_lon: self.min_lon.min(other.min_lon),
            max_lat: self.max_lat.max(other.max_lat),
            max_lon: self.max_lon.max(other.max_lon),
        }
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }

    pub fn lat_span(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    pub fn lon_span(&self) -> f64 {
        self.max_lon - self.min_lon
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.5},{:.5} .. {:.5},{:.5}]",
            self.min_lat, self.min_lon, self.max_lat, self.max_lon
        )
    }
}

/// The visible map area a UI asks about.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub center_lat: f64,
    pub center_lon: f64,
    /// Full north-south extent in degrees.
    pub span_lat: f64,
    /// Full east-west extent in degrees.
    pub span_lon: f64,
}

impl Viewport {
    pub fn new(center_lat: f64, center_lon: f64, span_lat: f64, span_lon: f64) -> Self {
        Self {
            center_lat,
            center_lon,
            span_lat: span_lat.abs(),
            span_lon: span_lon.abs(),
        }
    }

    /// Viewport covering exactly `bbox`.
    pub fn from_bbox(bbox: &BoundingBox) -> Self {
        let center = bbox.center();
        Self::new(center.lat, center.lon, bbox.lat_span(), bbox.lon_span())
    }

    /// The viewport rectangle, clamped to valid coordinate ranges.
    pub fn bbox(&self) -> BoundingBox {
        let half_lat = self.span_lat / 2.0;
        let half_lon = self.span_lon / 2.0;
        BoundingBox::new(
            (self.center_lat - half_lat).clamp(MIN_LAT, MAX_LAT),
            (self.center_lon - half_lon).clamp(MIN_LON, MAX_LON),
            (self.center_lat + half_lat).clamp(MIN_LAT, MAX_LAT),
            (self.center_lon + half_lon).clamp(MIN_LON, MAX_LON),
        )
    }

    /// Returns true if the point is inside the (clamped) viewport.
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        self.bbox().contains_point(lat, lon)
    }

    /// The viewport of equal span moved one full span in `direction`.
    ///
    /// Returns `None` when the centre would leave the valid latitude range.
    pub fn shifted(&self, direction: Direction) -> Option<Viewport> {
        let (dlat, dlon) = direction.offset();
        let lat = self.center_lat + dlat * self.span_lat;
        if !(MIN_LAT..=MAX_LAT).contains(&lat) {
            return None;
        }
        let lon = self.center_lon + dlon * self.span_lon;
        if !(MIN_LON..=MAX_LON).contains(&lon) {
            return None;
        }
        Some(Viewport::new(lat, lon, self.span_lat, self.span_lon))
    }
}

impl fmt::Display for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({:.5},{:.5} ±{:.4}x{:.4})",
            self.center_lat, self.center_lon, self.span_lat, self.span_lon
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_normalises_corners() {
        let bbox = BoundingBox::new(10.0, 20.0, -10.0, -20.0);
        assert_eq!(bbox.min_lat, -10.0);
        assert_eq!(bbox.max_lon, 20.0);
    }

    #[test]
    fn test_bbox_contains_and_intersects() {
        let outer = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let inner = BoundingBox::new(2.0, 2.0, 3.0, 3.0);
        let straddling = BoundingBox::new(9.0, 9.0, 11.0, 11.0);
        let outside = BoundingBox::new(20.0, 20.0, 21.0, 21.0);

        assert!(outer.contains(&inner));
        assert!(!outer.contains(&straddling));
        assert!(outer.intersects(&straddling));
        assert!(!outer.intersects(&outside));
        assert!(outer.contains(&outer));
    }

    #[test]
    fn test_bbox_contains_half_open() {
        let outer = BoundingBox::new(10.0, 20.0, 11.0, 21.0);
        assert!(outer.contains_half_open(&BoundingBox::new(10.0, 20.0, 10.5, 20.5)));
        assert!(!outer.contains_half_open(&BoundingBox::new(10.5, 20.0, 11.0, 20.5)));
        assert!(!outer.contains_half_open(&BoundingBox::new(10.0, 20.5, 10.5, 21.0)));
        assert!(outer.contains(&BoundingBox::new(10.5, 20.5, 11.0, 21.0)));

        let world = BoundingBox::world();
        assert!(world.contains_half_open(&BoundingBox::new(80.0, 170.0, 90.0, 180.0)));
    }

    #[test]
    fn test_bbox_union() {
        let a = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        let b = BoundingBox::new(-1.0, 2.0, 0.5, 3.0);
        assert_eq!(a.union(&b), BoundingBox::new(-1.0, 0.0, 1.0, 3.0));
    }

    #[test]
    fn test_viewport_bbox_clamped() {
        let vp = Viewport::new(89.0, 179.0, 4.0, 4.0);
        let bbox = vp.bbox();
        assert_eq!(bbox.max_lat, MAX_LAT);
        assert_eq!(bbox.max_lon, MAX_LON);
        assert_eq!(bbox.min_lat, 87.0);
    }

    #[test]
    fn test_viewport_shifted() {
        let vp = Viewport::new(40.0, -74.0, 0.5, 1.0);

        let north = vp.shifted(Direction::North).unwrap();
        assert_eq!(north.center_lat, 40.5);
        assert_eq!(north.center_lon, -74.0);

        let west = vp.shifted(Direction::West).unwrap();
        assert_eq!(west.center_lon, -75.0);

        let polar = Viewport::new(89.9, 0.0, 1.0, 1.0);
        assert!(polar.shifted(Direction::North).is_none());
    }

    #[test]
    fn test_viewport_roundtrip_bbox() {
        let bbox = BoundingBox::new(1.0, 2.0, 3.0, 6.0);
        let vp = Viewport::from_bbox(&bbox);
        assert_eq!(vp.bbox(), bbox);
    }
}
