//! Persistent blob cache commands.

use clap::Subcommand;
use geofeed::blob::DiskBlobTier;
use geofeed::config::{format_size, ConfigFile};

use crate::error::CliError;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Delete every blob in the persistent cache
    Clear,
    /// Show persistent cache statistics
    Stats,
}

pub async fn run(action: CacheAction, config: &ConfigFile) -> Result<(), CliError> {
    let cache_dir = &config.cache.directory;
    let tier = DiskBlobTier::new(cache_dir, config.cache.disk_io_limit);

    match action {
        CacheAction::Clear => {
            println!("Clearing blob cache at: {}", tier.root().display());
            let removed = tier
                .clear()
                .await
                .map_err(|e| CliError::CacheClear(e.to_string()))?;
            println!(
                "Deleted {} files, freed {}",
                removed.files,
                format_size(removed.bytes)
            );
        }
        CacheAction::Stats => {
            println!("Blob cache: {}", tier.root().display());
            let stats = tier
                .stats()
                .await
                .map_err(|e| CliError::CacheStats(e.to_string()))?;
            println!("  Files: {}", stats.files);
            println!("  Size:  {}", format_size(stats.bytes));
        }
    }
    Ok(())
}
