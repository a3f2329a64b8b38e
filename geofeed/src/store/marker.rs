//! The marker model and its document mapping.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::coord::{self, CoordError, STORAGE_PRECISION};
use crate::error::{FetchError, FetchResult};
use crate::remote::Document;

/// Document field holding the latitude.
pub const FIELD_LATITUDE: &str = "latitude";

/// Document field holding the longitude.
pub const FIELD_LONGITUDE: &str = "longitude";

/// Document field holding the precomputed geohash.
pub const FIELD_GEOHASH: &str = "geohash";

/// A geotagged point of interest.
///
/// Markers are immutable once fetched. `geohash` is computed once at write
/// time at [`STORAGE_PRECISION`] and only ever read afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub geohash: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Marker {
    /// Creates a marker for writing, computing its storage geohash.
    pub fn new(
        id: impl Into<String>,
        latitude: f64,
        longitude: f64,
        attributes: Map<String, Value>,
    ) -> Result<Self, CoordError> {
        let geohash = coord::encode(latitude, longitude, STORAGE_PRECISION)?;
        Ok(Self {
            id: id.into(),
            latitude,
            longitude,
            geohash,
            attributes,
        })
    }

    /// Interprets a remote document as a marker.
    ///
    /// Every field other than the coordinates and geohash becomes an
    /// attribute.
    pub fn from_document(doc: &Document) -> FetchResult<Self> {
        let latitude = doc
            .get_f64(FIELD_LATITUDE)
            .ok_or_else(|| FetchError::malformed(doc.id.as_str(), "missing latitude"))?;
        let longitude = doc
            .get_f64(FIELD_LONGITUDE)
            .ok_or_else(|| FetchError::malformed(doc.id.as_str(), "missing longitude"))?;
        if !(coord::MIN_LAT..=coord::MAX_LAT).contains(&latitude)
            || !(coord::MIN_LON..=coord::MAX_LON).contains(&longitude)
        {
            return Err(FetchError::malformed(
                doc.id.as_str(),
                format!("coordinates out of range: {}, {}", latitude, longitude),
            ));
        }
        let geohash = doc
            .get_str(FIELD_GEOHASH)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| FetchError::malformed(doc.id.as_str(), "missing geohash"))?
            .to_string();

        let attributes = doc
            .fields
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), FIELD_LATITUDE | FIELD_LONGITUDE | FIELD_GEOHASH))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            id: doc.id.clone(),
            latitude,
            longitude,
            geohash,
            attributes,
        })
    }

    /// The document written to the remote store for this marker.
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new(self.id.as_str())
            .with_field(FIELD_LATITUDE, self.latitude)
            .with_field(FIELD_LONGITUDE, self.longitude)
            .with_field(FIELD_GEOHASH, self.geohash.as_str());
        for (k, v) in &self.attributes {
            doc.fields.insert(k.clone(), v.clone());
        }
        doc
    }
}
