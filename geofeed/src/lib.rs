//! GeoFeed - lazy-loading caches and geospatial queries for a marker feed
//!
//! This library sits between a UI and a remote document store holding
//! geotagged markers and the activity posts that reference them. It answers
//! "what is near here", "what are these IDs" and "what did these producers
//! post lately" without loading the whole dataset, without duplicate
//! concurrent requests, and with bounded memory.
//!
//! # Layers
//!
//! ```text
//!                          ┌──────────────┐
//!                          │   GeoFeed    │  service facade
//!                          └──────┬───────┘
//!          ┌──────────────────────┼───────────────────────┐
//!          ▼                      ▼                       ▼
//!   ┌─────────────┐      ┌─────────────────┐     ┌──────────────────┐
//!   │ MarkerStore │◄─────│ FeedAggregator  │     │MultiTierBlobCache│
//!   └──────┬──────┘      └────────┬────────┘     └────────┬─────────┘
//!          │ RegionResultCache    │ moka page cache       │ memory → disk
//!          │ BoundedCache         │                       │
//!          │ RequestCoalescer     │                       │ RequestCoalescer
//!          ▼                      ▼                       ▼
//!   ┌──────────────────────────────────────┐     ┌──────────────────┐
//!   │            RemoteStore               │     │    BlobStore     │
//!   └──────────────────────────────────────┘     └──────────────────┘
//! ```

pub mod blob;
pub mod cache;
pub mod coalesce;
pub mod config;
pub mod coord;
pub mod error;
pub mod feed;
pub mod logging;
pub mod region;
pub mod remote;
pub mod service;
pub mod store;

pub use error::{FetchError, FetchResult};
pub use service::{GeoFeed, ServiceConfig, ServiceStats};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
