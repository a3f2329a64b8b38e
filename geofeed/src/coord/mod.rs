//! Geographic coordinates, geohash cells and precision selection.
//!
//! Markers carry a geohash computed server-side at [`STORAGE_PRECISION`].
//! Region queries pick a coarser precision with [`PrecisionSelector`],
//! enumerate the covering cells and scan each cell as a string prefix range.

pub mod geohash;
mod precision;
mod types;

pub use geohash::{
    adjacent, cell_size, covering_cell_count, covering_cells, decode, encode, neighbors,
    prefix_range, GeohashCell, MAX_PRECISION, PREFIX_RANGE_SENTINEL, STORAGE_PRECISION,
};
pub use precision::{
    PrecisionSelector, PrecisionStep, DEFAULT_MAX_PRECISION, DEFAULT_TINY_PRECISION,
    DEFAULT_TINY_SPAN,
};
pub use types::{
    BoundingBox, CoordError, Direction, GeoPoint, Viewport, MAX_LAT, MAX_LON, MIN_LAT, MIN_LON,
};
