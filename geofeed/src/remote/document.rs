//! Wire-level documents and range queries.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A document as returned by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Adds a field, builder style.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(Value::as_f64)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.fields.get(name).and_then(Value::as_i64)
    }

    /// The value of `name` as an index value, if it is indexable.
    pub fn index_value(&self, name: &str) -> Option<IndexValue> {
        match self.fields.get(name)? {
            Value::String(s) => Some(IndexValue::Text(s.clone())),
            Value::Number(n) => n.as_i64().map(IndexValue::Int),
            _ => None,
        }
    }
}

/// A value of an indexed field.
///
/// Values of different variants never compare equal; all integers sort
/// before all strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexValue {
    Int(i64),
    Text(String),
}

impl PartialOrd for IndexValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (IndexValue::Int(a), IndexValue::Int(b)) => a.cmp(b),
            (IndexValue::Text(a), IndexValue::Text(b)) => a.cmp(b),
            (IndexValue::Int(_), IndexValue::Text(_)) => Ordering::Less,
            (IndexValue::Text(_), IndexValue::Int(_)) => Ordering::Greater,
        }
    }
}

impl fmt::Display for IndexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexValue::Int(v) => write!(f, "{}", v),
            IndexValue::Text(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<&str> for IndexValue {
    fn from(s: &str) -> Self {
        IndexValue::Text(s.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(s: String) -> Self {
        IndexValue::Text(s)
    }
}

impl From<i64> for IndexValue {
    fn from(v: i64) -> Self {
        IndexValue::Int(v)
    }
}

/// An inclusive range scan over one indexed field.
///
/// An optional equality filter narrows the scan to documents whose
/// `filter.0` field equals `filter.1`, which is how per-producer recency
/// queries are expressed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RangeQuery {
    pub collection: String,
    pub field: String,
    pub lower: IndexValue,
    pub upper: IndexValue,
    pub filter: Option<(String, IndexValue)>,
    pub limit: usize,
    pub descending: bool,
}

impl RangeQuery {
    /// Ascending scan of `field` in `[lower, upper]`.
    pub fn new(
        collection: impl Into<String>,
        field: impl Into<String>,
        lower: impl Into<IndexValue>,
        upper: impl Into<IndexValue>,
        limit: usize,
    ) -> Self {
        Self {
            collection: collection.into(),
            field: field.into(),
            lower: lower.into(),
            upper: upper.into(),
            filter: None,
            limit,
            descending: false,
        }
    }

    /// Exact match on `field`.
    pub fn exact(
        collection: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<IndexValue>,
        limit: usize,
    ) -> Self {
        let value = value.into();
        Self::new(collection, field, value.clone(), value, limit)
    }

    pub fn with_filter(mut self, field: impl Into<String>, value: impl Into<IndexValue>) -> Self {
        self.filter = Some((field.into(), value.into()));
        self
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    /// Returns true if `doc` satisfies the range and filter.
    pub fn matches(&self, doc: &Document) -> bool {
        if let Some((field, expected)) = &self.filter {
            if doc.index_value(field).as_ref() != Some(expected) {
                return false;
            }
        }
        match doc.index_value(&self.field) {
            Some(value) => value >= self.lower && value <= self.upper,
            None => false,
        }
    }
}

impl fmt::Display for RangeQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} in [{}, {}] limit {}",
            self.collection, self.field, self.lower, self.upper, self.limit
        )?;
        if let Some((field, value)) = &self.filter {
            write!(f, " where {} = {}", field, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_index_value_ordering() {
        assert!(IndexValue::Int(5) < IndexValue::Int(6));
        assert!(IndexValue::from("u4") < IndexValue::from("u4\u{10FFFF}"));
        assert!(IndexValue::from("u4pr") < IndexValue::from("u4\u{10FFFF}"));
        assert!(IndexValue::Int(i64::MAX) < IndexValue::from(""));
    }

    #[test]
    fn test_range_query_matches() {
        let doc = Document::new("m1")
            .with_field("geohash", "u4pruydq")
            .with_field("owner", "alice");

        let prefix = RangeQuery::new("markers", "geohash", "u4p", "u4p\u{10FFFF}", 10);
        assert!(prefix.matches(&doc));

        let other = RangeQuery::new("markers", "geohash", "u4q", "u4q\u{10FFFF}", 10);
        assert!(!other.matches(&doc));

        let filtered = prefix.clone().with_filter("owner", "bob");
        assert!(!filtered.matches(&doc));
    }

    #[test]
    fn test_index_value_from_document() {
        let doc = Document::new("p")
            .with_field("timestamp", 1_700_000_000_000_i64)
            .with_field("payload", json!({"text": "hi"}));
        assert_eq!(
            doc.index_value("timestamp"),
            Some(IndexValue::Int(1_700_000_000_000))
        );
        assert_eq!(doc.index_value("payload"), None);
        assert_eq!(doc.index_value("missing"), None);
    }

    #[test]
    fn test_document_serde() {
        let doc: Document = serde_json::from_value(json!({
            "id": "m1",
            "fields": {"latitude": 1.5}
        }))
        .unwrap();
        assert_eq!(doc.get_f64("latitude"), Some(1.5));
    }
}
