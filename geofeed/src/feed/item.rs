//! Feed items, their document mapping, and the pagination cursor.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FetchError, FetchResult};
use crate::remote::Document;

/// Document field holding the producer ID.
pub const FIELD_PRODUCER: &str = "producer_id";

/// Document field holding the referenced marker ID.
pub const FIELD_MARKER: &str = "marker_id";

/// Document field holding the timestamp, in milliseconds since the epoch.
pub const FIELD_TIMESTAMP: &str = "timestamp";

/// One activity record from a producer, referencing a marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    /// Document ID of the post. Last tie-break when ordering.
    pub id: String,
    pub producer_id: String,
    pub marker_id: String,
    pub timestamp: DateTime<Utc>,
    /// Everything else on the document. Not interpreted here.
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl FeedItem {
    pub fn new(
        id: impl Into<String>,
        producer_id: impl Into<String>,
        marker_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            producer_id: producer_id.into(),
            marker_id: marker_id.into(),
            timestamp,
            payload: Map::new(),
        }
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn from_document(doc: &Document) -> FetchResult<Self> {
        let producer_id = doc
            .get_str(FIELD_PRODUCER)
            .ok_or_else(|| FetchError::malformed(doc.id.as_str(), "missing producer_id"))?;
        let marker_id = doc
            .get_str(FIELD_MARKER)
            .ok_or_else(|| FetchError::malformed(doc.id.as_str(), "missing marker_id"))?;
        let millis = doc
            .get_i64(FIELD_TIMESTAMP)
            .ok_or_else(|| FetchError::malformed(doc.id.as_str(), "missing timestamp"))?;
        let timestamp = DateTime::from_timestamp_millis(millis).ok_or_else(|| {
            FetchError::malformed(doc.id.as_str(), format!("timestamp out of range: {}", millis))
        })?;

        let payload = doc
            .fields
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), FIELD_PRODUCER | FIELD_MARKER | FIELD_TIMESTAMP))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            id: doc.id.clone(),
            producer_id: producer_id.to_string(),
            marker_id: marker_id.to_string(),
            timestamp,
            payload,
        })
    }

    pub fn to_document(&self) -> Document {
        let mut doc = Document::new(self.id.as_str())
            .with_field(FIELD_PRODUCER, self.producer_id.as_str())
            .with_field(FIELD_MARKER, self.marker_id.as_str())
            .with_field(FIELD_TIMESTAMP, self.timestamp.timestamp_millis());
        for (k, v) in &self.payload {
            doc.fields.insert(k.clone(), v.clone());
        }
        doc
    }

    /// Position of this item in feed order.
    pub fn cursor(&self) -> FeedCursor {
        FeedCursor {
            timestamp: self.timestamp,
            producer_id: self.producer_id.clone(),
            marker_id: self.marker_id.clone(),
            item_id: self.id.clone(),
        }
    }

    fn sort_key(&self) -> (i64, &str, &str, &str) {
        (
            self.timestamp.timestamp_millis(),
            &self.producer_id,
            &self.marker_id,
            &self.id,
        )
    }

    /// Feed order: newest first, ties broken by descending
    /// `(producer_id, marker_id, id)`.
    pub fn feed_order(a: &FeedItem, b: &FeedItem) -> Ordering {
        b.sort_key().cmp(&a.sort_key())
    }

    /// Returns true if this item comes after `cursor` in feed order.
    pub fn is_after(&self, cursor: &FeedCursor) -> bool {
        self.sort_key() < cursor.sort_key()
    }
}

/// Position of the last item of a page; the next page starts after it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeedCursor {
    pub timestamp: DateTime<Utc>,
    pub producer_id: String,
    pub marker_id: String,
    pub item_id: String,
}

impl FeedCursor {
    fn sort_key(&self) -> (i64, &str, &str, &str) {
        (
            self.timestamp.timestamp_millis(),
            &self.producer_id,
            &self.marker_id,
            &self.item_id,
        )
    }
}

impl fmt::Display for FeedCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.timestamp.to_rfc3339(),
            self.producer_id,
            self.marker_id,
            self.item_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    #[test]
    fn test_document_mapping() {
        let doc = Document::new("post-1")
            .with_field(FIELD_PRODUCER, "alice")
            .with_field(FIELD_MARKER, "m7")
            .with_field(FIELD_TIMESTAMP, 1_700_000_000_123i64)
            .with_field("text", "nice view");

        let item = FeedItem::from_document(&doc).unwrap();
        assert_eq!(item.producer_id, "alice");
        assert_eq!(item.marker_id, "m7");
        assert_eq!(item.timestamp.timestamp_millis(), 1_700_000_000_123);
        assert_eq!(item.payload.get("text"), Some(&json!("nice view")));
        assert_eq!(item.to_document(), doc);
    }

    #[test]
    fn test_malformed_documents() {
        let no_marker = Document::new("p")
            .with_field(FIELD_PRODUCER, "alice")
            .with_field(FIELD_TIMESTAMP, 1i64);
        assert!(FeedItem::from_document(&no_marker).is_err());

        let text_timestamp = Document::new("p")
            .with_field(FIELD_PRODUCER, "alice")
            .with_field(FIELD_MARKER, "m")
            .with_field(FIELD_TIMESTAMP, "yesterday");
        assert!(FeedItem::from_document(&text_timestamp).is_err());
    }

    #[test]
    fn test_feed_order_breaks_ties() {
        let mut items = vec![
            FeedItem::new("1", "alice", "m1", at(100)),
            FeedItem::new("2", "bob", "m1", at(200)),
            FeedItem::new("3", "bob", "m2", at(100)),
            FeedItem::new("4", "alice", "m2", at(100)),
        ];
        items.sort_by(FeedItem::feed_order);
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["2", "3", "4", "1"]);
    }

    #[test]
    fn test_is_after_cursor() {
        let cursor = FeedItem::new("4", "alice", "m2", at(100)).cursor();
        assert!(FeedItem::new("1", "alice", "m1", at(100)).is_after(&cursor));
        assert!(FeedItem::new("9", "zed", "m9", at(99)).is_after(&cursor));
        assert!(!FeedItem::new("4", "alice", "m2", at(100)).is_after(&cursor));
        assert!(!FeedItem::new("3", "bob", "m2", at(100)).is_after(&cursor));
    }
}
