//! CLI error type.

use std::fmt;

use geofeed::config::ConfigError;
use geofeed::coord::CoordError;
use geofeed::logging::LoggingError;
use geofeed::FetchError;

/// Errors surfaced to the user by CLI commands.
#[derive(Debug)]
pub enum CliError {
    Config(String),
    Coord(CoordError),
    Fetch(FetchError),
    Logging(LoggingError),
    CacheClear(String),
    CacheStats(String),
    Io(std::io::Error),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Coord(e) => write!(f, "{}", e),
            CliError::Fetch(e) => write!(f, "Fetch failed: {}", e),
            CliError::Logging(e) => write!(f, "Logging setup failed: {}", e),
            CliError::CacheClear(msg) => write!(f, "Failed to clear cache: {}", msg),
            CliError::CacheStats(msg) => write!(f, "Failed to read cache stats: {}", msg),
            CliError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for CliError {}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<CoordError> for CliError {
    fn from(e: CoordError) -> Self {
        CliError::Coord(e)
    }
}

impl From<FetchError> for CliError {
    fn from(e: FetchError) -> Self {
        CliError::Fetch(e)
    }
}

impl From<LoggingError> for CliError {
    fn from(e: LoggingError) -> Self {
        CliError::Logging(e)
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Io(e)
    }
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) => 2,
            CliError::Coord(_) => 3,
            _ => 1,
        }
    }
}
