//! Addressable configuration keys (`section.key`).

use std::fmt;
use std::str::FromStr;

use super::{
    expand_path, invalid, parse_bool, parse_bytes, parse_millis, parse_positive, parse_secs,
    ConfigError, ConfigFile,
};

/// One configuration setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigKey {
    section: &'static str,
    key: &'static str,
}

const fn key(section: &'static str, key: &'static str) -> ConfigKey {
    ConfigKey { section, key }
}

const ALL_KEYS: &[ConfigKey] = &[
    key("cache", "directory"),
    key("cache", "marker_capacity"),
    key("cache", "full_capacity"),
    key("cache", "thumbnail_capacity"),
    key("cache", "full_max_bytes"),
    key("cache", "thumbnail_max_bytes"),
    key("cache", "disk_io_limit"),
    key("region", "capacity"),
    key("region", "ttl_secs"),
    key("region", "max_cells"),
    key("region", "prefetch"),
    key("region", "prefetch_debounce_ms"),
    key("remote", "fetch_timeout_secs"),
    key("remote", "max_ids_per_query"),
    key("remote", "retry_attempts"),
    key("remote", "retry_initial_delay_ms"),
    key("remote", "base_url"),
    key("feed", "cache_ttl_secs"),
    key("feed", "max_producers"),
    key("feed", "page_size"),
    key("feed", "collection"),
    key("logging", "directory"),
    key("logging", "file"),
    key("logging", "level"),
];

impl ConfigKey {
    /// Every key, grouped by section in file order.
    pub fn all() -> &'static [ConfigKey] {
        ALL_KEYS
    }

    pub fn find(section: &str, key: &str) -> Option<ConfigKey> {
        ALL_KEYS
            .iter()
            .copied()
            .find(|k| k.section == section && k.key == key)
    }

    pub fn section(&self) -> &'static str {
        self.section
    }

    pub fn key_name(&self) -> &'static str {
        self.key
    }

    /// `section.key`.
    pub fn name(&self) -> String {
        format!("{}.{}", self.section, self.key)
    }

    /// Current value as written to the file. Unset optional values are empty.
    pub fn get(&self, config: &ConfigFile) -> String {
        let c = config;
        match (self.section, self.key) {
            ("cache", "directory") => c.cache.directory.display().to_string(),
            ("cache", "marker_capacity") => c.cache.marker_capacity.to_string(),
            ("cache", "full_capacity") => c.cache.full_capacity.to_string(),
            ("cache", "thumbnail_capacity") => c.cache.thumbnail_capacity.to_string(),
            ("cache", "full_max_bytes") => c.cache.full_max_bytes.to_string(),
            ("cache", "thumbnail_max_bytes") => c.cache.thumbnail_max_bytes.to_string(),
            ("cache", "disk_io_limit") => c.cache.disk_io_limit.to_string(),
            ("region", "capacity") => c.region.capacity.to_string(),
            ("region", "ttl_secs") => c.region.ttl.as_secs().to_string(),
            ("region", "max_cells") => c.region.max_cells.to_string(),
            ("region", "prefetch") => c.region.prefetch.to_string(),
            ("region", "prefetch_debounce_ms") => c.region.prefetch_debounce.as_millis().to_string(),
            ("remote", "fetch_timeout_secs") => c.remote.fetch_timeout.as_secs().to_string(),
            ("remote", "max_ids_per_query") => c.remote.max_ids_per_query.to_string(),
            ("remote", "retry_attempts") => c.remote.retry_attempts.to_string(),
            ("remote", "retry_initial_delay_ms") => {
                c.remote.retry_initial_delay.as_millis().to_string()
            }
            ("remote", "base_url") => c.remote.base_url.clone().unwrap_or_default(),
            ("feed", "cache_ttl_secs") => c.feed.cache_ttl.as_secs().to_string(),
            ("feed", "max_producers") => c.feed.max_producers.to_string(),
            ("feed", "page_size") => c.feed.page_size.to_string(),
            ("feed", "collection") => c.feed.collection.clone(),
            ("logging", "directory") => c
                .logging
                .directory
                .as_ref()
                .map(|d| d.display().to_string())
                .unwrap_or_default(),
            ("logging", "file") => c.logging.file_name.clone(),
            ("logging", "level") => c.logging.level.clone(),
            _ => String::new(),
        }
    }

    /// Parses and applies `value`.
    pub fn set(&self, config: &mut ConfigFile, value: &str) -> Result<(), ConfigError> {
        let (s, k) = (self.section, self.key);
        let c = config;
        let text = value.trim();
        match (s, k) {
            ("cache", "directory") => {
                if text.is_empty() {
                    return Err(invalid(s, k, value));
                }
                c.cache.directory = expand_path(text);
            }
            ("cache", "marker_capacity") => c.cache.marker_capacity = parse_positive(s, k, value)?,
            ("cache", "full_capacity") => c.cache.full_capacity = parse_positive(s, k, value)?,
            ("cache", "thumbnail_capacity") => {
                c.cache.thumbnail_capacity = parse_positive(s, k, value)?
            }
            ("cache", "full_max_bytes") => c.cache.full_max_bytes = parse_bytes(s, k, value)?,
            ("cache", "thumbnail_max_bytes") => {
                c.cache.thumbnail_max_bytes = parse_bytes(s, k, value)?
            }
            ("cache", "disk_io_limit") => c.cache.disk_io_limit = parse_positive(s, k, value)?,
            ("region", "capacity") => c.region.capacity = parse_positive(s, k, value)?,
            ("region", "ttl_secs") => c.region.ttl = parse_secs(s, k, value)?,
            ("region", "max_cells") => c.region.max_cells = parse_positive(s, k, value)?,
            ("region", "prefetch") => c.region.prefetch = parse_bool(s, k, value)?,
            ("region", "prefetch_debounce_ms") => {
                c.region.prefetch_debounce = parse_millis(s, k, value)?
            }
            ("remote", "fetch_timeout_secs") => c.remote.fetch_timeout = parse_secs(s, k, value)?,
            ("remote", "max_ids_per_query") => {
                c.remote.max_ids_per_query = parse_positive(s, k, value)?
            }
            ("remote", "retry_attempts") => c.remote.retry_attempts = parse_positive(s, k, value)?,
            ("remote", "retry_initial_delay_ms") => {
                c.remote.retry_initial_delay = parse_millis(s, k, value)?
            }
            ("remote", "base_url") => {
                c.remote.base_url = (!text.is_empty()).then(|| text.to_string())
            }
            ("feed", "cache_ttl_secs") => c.feed.cache_ttl = parse_secs(s, k, value)?,
            ("feed", "max_producers") => c.feed.max_producers = parse_positive(s, k, value)?,
            ("feed", "page_size") => c.feed.page_size = parse_positive(s, k, value)?,
            ("feed", "collection") => {
                if text.is_empty() {
                    return Err(invalid(s, k, value));
                }
                c.feed.collection = text.to_string();
            }
            ("logging", "directory") => {
                c.logging.directory = (!text.is_empty()).then(|| expand_path(text))
            }
            ("logging", "file") => {
                if text.is_empty() {
                    return Err(invalid(s, k, value));
                }
                c.logging.file_name = text.to_string();
            }
            ("logging", "level") => {
                if text.is_empty() {
                    return Err(invalid(s, k, value));
                }
                c.logging.level = text.to_string();
            }
            _ => return Err(ConfigError::UnknownKey(self.name())),
        }
        Ok(())
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split_once('.')
            .and_then(|(section, key)| ConfigKey::find(section, key))
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.section, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key() {
        let key: ConfigKey = "feed.page_size".parse().unwrap();
        assert_eq!(key.section(), "feed");
        assert_eq!(key.key_name(), "page_size");
        assert!("feed.nope".parse::<ConfigKey>().is_err());
        assert!("page_size".parse::<ConfigKey>().is_err());
    }

    #[test]
    fn test_every_key_round_trips_its_default() {
        let defaults = ConfigFile::default();
        for key in ConfigKey::all() {
            let value = key.get(&defaults);
            let mut config = ConfigFile::default();
            // Optional values are empty by default and stay unset.
            key.set(&mut config, &value).unwrap();
            assert_eq!(config, defaults, "{}", key);
        }
    }

    #[test]
    fn test_set_and_get() {
        let mut config = ConfigFile::default();
        let key: ConfigKey = "region.prefetch".parse().unwrap();
        key.set(&mut config, "off").unwrap();
        assert_eq!(key.get(&config), "false");
        assert!(key.set(&mut config, "maybe").is_err());
    }
}
