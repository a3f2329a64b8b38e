//! Multi-tier cache for binary assets (images).
//!
//! # Tiers
//!
//! ```text
//! load(key)
//!    │
//!    ▼
//! ┌─────────────────────────────┐   hit
//! │ memory: full (10) | thumb (50)│ ──────► bytes
//! └──────────────┬──────────────┘
//!                │ miss (coalesced per URL from here on)
//!                ▼
//! ┌─────────────────────────────┐   hit: populate memory
//! │ disk: <dir>/blobs/<variant>/ │ ──────► bytes
//! └──────────────┬──────────────┘
//!                │ miss
//!                ▼
//! ┌─────────────────────────────┐
//! │ remote: BlobStore::get_blob │ ──────► write disk, populate memory
//! └─────────────────────────────┘
//! ```
//!
//! Full-size and thumbnail assets live in separate memory tiers. Memory
//! pressure and backgrounding clear the full-size tier only; thumbnails are
//! cheap and stay.

mod disk;
mod tiers;
mod view;

pub use disk::{DiskBlobTier, DiskTierStats, BLOBS_DIR, DEFAULT_DISK_IO_LIMIT};
pub use tiers::{
    BlobCacheConfig, BlobCacheStats, MultiTierBlobCache, DEFAULT_FULL_CAPACITY,
    DEFAULT_FULL_MAX_BYTES, DEFAULT_THUMBNAIL_CAPACITY, DEFAULT_THUMBNAIL_MAX_BYTES,
};
pub use view::BlobView;

use std::fmt;

/// Which memory tier an asset belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobVariant {
    /// Full-resolution asset. Large, few kept.
    Full,
    /// Thumbnail. Small, many kept.
    Thumbnail,
}

impl BlobVariant {
    pub const ALL: [BlobVariant; 2] = [BlobVariant::Full, BlobVariant::Thumbnail];

    /// Directory name used by the disk tier.
    pub fn as_str(&self) -> &'static str {
        match self {
            BlobVariant::Full => "full",
            BlobVariant::Thumbnail => "thumb",
        }
    }
}

impl fmt::Display for BlobVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a cached asset: its URL plus the tier it is cached in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobKey {
    pub url: String,
    pub variant: BlobVariant,
}

impl BlobKey {
    pub fn new(url: impl Into<String>, variant: BlobVariant) -> Self {
        Self {
            url: url.into(),
            variant,
        }
    }

    pub fn full(url: impl Into<String>) -> Self {
        Self::new(url, BlobVariant::Full)
    }

    pub fn thumbnail(url: impl Into<String>) -> Self {
        Self::new(url, BlobVariant::Thumbnail)
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.variant, self.url)
    }
}
