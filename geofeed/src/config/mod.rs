//! INI configuration file.
//!
//! The file lives at `<config_dir>/geofeed/config.ini`. A missing file means
//! defaults; keys that are absent keep their defaults too.
//!
//! ```ini
//! [cache]
//! directory = ~/.cache/geofeed
//! marker_capacity = 300
//! full_capacity = 10
//! thumbnail_capacity = 50
//! full_max_bytes = 64MB
//! thumbnail_max_bytes = 16MB
//! disk_io_limit = 16
//!
//! [region]
//! capacity = 20
//! ttl_secs = 300
//! max_cells = 32
//! prefetch = true
//! prefetch_debounce_ms = 500
//!
//! [remote]
//! fetch_timeout_secs = 15
//! max_ids_per_query = 10
//! retry_attempts = 3
//! retry_initial_delay_ms = 100
//! base_url = https://cdn.example.com/
//!
//! [feed]
//! cache_ttl_secs = 30
//! max_producers = 50
//! page_size = 20
//! collection = posts
//!
//! [logging]
//! directory =
//! file = geofeed.log
//! level = info
//! ```

mod keys;
mod size;

pub use keys::ConfigKey;
pub use size::{format_size, parse_size};

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;
use tracing::{debug, warn};

use crate::blob::{
    BlobCacheConfig, DEFAULT_DISK_IO_LIMIT, DEFAULT_FULL_CAPACITY, DEFAULT_FULL_MAX_BYTES,
    DEFAULT_THUMBNAIL_CAPACITY, DEFAULT_THUMBNAIL_MAX_BYTES,
};
use crate::coalesce::DEFAULT_FETCH_TIMEOUT;
use crate::feed::{
    FeedConfig, DEFAULT_FEED_CACHE_TTL, DEFAULT_FEED_COLLECTION, DEFAULT_MAX_PRODUCERS,
    DEFAULT_PAGE_SIZE,
};
use crate::logging::{LoggingConfig, DEFAULT_LOG_FILE, DEFAULT_LOG_LEVEL};
use crate::region::{DEFAULT_PREFETCH_DEBOUNCE, DEFAULT_REGION_CAPACITY, DEFAULT_REGION_TTL};
use crate::remote::{RetryPolicy, DEFAULT_INITIAL_DELAY_MS, DEFAULT_MAX_IDS_PER_QUERY};
use crate::service::ServiceConfig;
use crate::store::{
    MarkerStoreConfig, DEFAULT_MARKER_CAPACITY, DEFAULT_MAX_CELLS, DEFAULT_RETRY_ATTEMPTS,
};

/// Application directory name under the platform config and cache dirs.
pub const APP_DIR: &str = "geofeed";

/// Configuration file name.
pub const CONFIG_FILE: &str = "config.ini";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Invalid value '{value}' for {section}.{key}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
    },

    #[error("Unknown configuration key '{0}'")]
    UnknownKey(String),

    #[error("No configuration directory on this platform")]
    NoConfigDir,
}

/// `<config_dir>/geofeed/config.ini`.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
        .ok_or(ConfigError::NoConfigDir)
}

/// `<cache_dir>/geofeed`, falling back to the temp dir.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    pub directory: PathBuf,
    pub marker_capacity: usize,
    pub full_capacity: usize,
    pub thumbnail_capacity: usize,
    pub full_max_bytes: u64,
    pub thumbnail_max_bytes: u64,
    pub disk_io_limit: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            directory: default_cache_dir(),
            marker_capacity: DEFAULT_MARKER_CAPACITY,
            full_capacity: DEFAULT_FULL_CAPACITY,
            thumbnail_capacity: DEFAULT_THUMBNAIL_CAPACITY,
            full_max_bytes: DEFAULT_FULL_MAX_BYTES,
            thumbnail_max_bytes: DEFAULT_THUMBNAIL_MAX_BYTES,
            disk_io_limit: DEFAULT_DISK_IO_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionSettings {
    pub capacity: usize,
    pub ttl: Duration,
    pub max_cells: usize,
    pub prefetch: bool,
    pub prefetch_debounce: Duration,
}

impl Default for RegionSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_REGION_CAPACITY,
            ttl: DEFAULT_REGION_TTL,
            max_cells: DEFAULT_MAX_CELLS,
            prefetch: true,
            prefetch_debounce: DEFAULT_PREFETCH_DEBOUNCE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSettings {
    pub fetch_timeout: Duration,
    pub max_ids_per_query: usize,
    pub retry_attempts: u32,
    pub retry_initial_delay: Duration,
    /// Base URL relative blob paths are resolved against.
    pub base_url: Option<String>,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            max_ids_per_query: DEFAULT_MAX_IDS_PER_QUERY,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            base_url: None,
        }
    }
}

impl RemoteSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        if self.retry_attempts <= 1 {
            RetryPolicy::None
        } else {
            RetryPolicy::exponential_from(self.retry_attempts, self.retry_initial_delay)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedSettings {
    pub cache_ttl: Duration,
    pub max_producers: usize,
    pub page_size: usize,
    pub collection: String,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_FEED_CACHE_TTL,
            max_producers: DEFAULT_MAX_PRODUCERS,
            page_size: DEFAULT_PAGE_SIZE,
            collection: DEFAULT_FEED_COLLECTION.to_string(),
        }
    }
}

/// Parsed configuration file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigFile {
    pub cache: CacheSettings,
    pub region: RegionSettings,
    pub remote: RemoteSettings,
    pub feed: FeedSettings,
    pub logging: LoggingConfig,
}

impl ConfigFile {
    /// Loads the file at [`config_file_path`], or defaults if it is missing.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(config_file_path()?)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    /// Applies every recognised key in `ini` over the defaults.
    ///
    /// Unknown keys are logged and ignored.
    pub fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for (section, properties) in ini.iter() {
            let Some(section) = section else {
                continue;
            };
            for (key, value) in properties.iter() {
                match ConfigKey::find(section, key) {
                    Some(config_key) => config_key.set(&mut config, value)?,
                    None => warn!(section, key, "Ignoring unknown configuration key"),
                }
            }
        }
        Ok(config)
    }

    pub fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();
        for key in ConfigKey::all() {
            ini.with_section(Some(key.section()))
                .set(key.key_name(), key.get(self));
        }
        ini
    }

    /// Writes the file to [`config_file_path`].
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = config_file_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.to_ini().write_to_file(path)?;
        Ok(())
    }

    /// Component configuration for [`GeoFeed`](crate::service::GeoFeed).
    pub fn service_config(&self) -> ServiceConfig {
        let retry = self.remote.retry_policy();
        let timeout = self.remote.fetch_timeout;

        let store = MarkerStoreConfig::default()
            .with_marker_capacity(self.cache.marker_capacity)
            .with_region_capacity(self.region.capacity)
            .with_region_ttl(self.region.ttl)
            .with_max_cells(self.region.max_cells)
            .with_prefetch(self.region.prefetch)
            .with_prefetch_debounce(self.region.prefetch_debounce)
            .with_fetch_timeout(timeout)
            .with_max_ids_per_query(self.remote.max_ids_per_query)
            .with_retry(retry.clone());

        let blob = BlobCacheConfig::default()
            .with_full_capacity(self.cache.full_capacity)
            .with_thumbnail_capacity(self.cache.thumbnail_capacity)
            .with_full_max_bytes(Some(self.cache.full_max_bytes))
            .with_thumbnail_max_bytes(Some(self.cache.thumbnail_max_bytes))
            .with_disk_dir(&self.cache.directory)
            .with_disk_io_limit(self.cache.disk_io_limit)
            .with_fetch_timeout(timeout)
            .with_retry(retry.clone());

        let feed = FeedConfig::default()
            .with_collection(self.feed.collection.as_str())
            .with_page_size(self.feed.page_size)
            .with_max_producers(self.feed.max_producers)
            .with_cache_ttl(self.feed.cache_ttl)
            .with_fetch_timeout(timeout)
            .with_retry(retry);

        ServiceConfig::default()
            .with_store(store)
            .with_blob(blob)
            .with_feed(feed)
    }
}

fn invalid(section: &str, key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Parses a value that must be at least 1.
fn parse_positive<T>(section: &str, key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + From<u8>,
{
    match value.trim().parse::<T>() {
        Ok(v) if v >= T::from(1) => Ok(v),
        _ => Err(invalid(section, key, value)),
    }
}

fn parse_bool(section: &str, key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(invalid(section, key, value)),
    }
}

fn parse_secs(section: &str, key: &str, value: &str) -> Result<Duration, ConfigError> {
    parse_positive::<u64>(section, key, value).map(Duration::from_secs)
}

fn parse_millis(section: &str, key: &str, value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| invalid(section, key, value))
}

fn parse_bytes(section: &str, key: &str, value: &str) -> Result<u64, ConfigError> {
    match parse_size(value) {
        Some(bytes) if bytes > 0 => Ok(bytes),
        _ => Err(invalid(section, key, value)),
    }
}

/// Expands a leading `~` to the home directory.
fn expand_path(value: &str) -> PathBuf {
    match value.strip_prefix("~") {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest.trim_start_matches('/')),
            None => PathBuf::from(value),
        },
        None => PathBuf::from(value),
    }
}
