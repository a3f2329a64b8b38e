//! Fetch one blob over HTTP through the memory and disk tiers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use geofeed::blob::{BlobKey, MultiTierBlobCache};
use geofeed::config::{format_size, ConfigFile};
use geofeed::remote::HttpBlobStore;

use crate::error::CliError;

pub struct FetchArgs {
    pub url: String,
    pub thumbnail: bool,
    pub output: Option<PathBuf>,
}

pub async fn run(args: FetchArgs, config: &ConfigFile) -> Result<(), CliError> {
    let base_url = config.remote.base_url.clone().unwrap_or_default();
    let store = HttpBlobStore::with_timeout(base_url, config.remote.fetch_timeout)?;
    let cache = MultiTierBlobCache::new(Arc::new(store), config.service_config().blob);

    let key = if args.thumbnail {
        BlobKey::thumbnail(args.url)
    } else {
        BlobKey::full(args.url)
    };

    let started = Instant::now();
    let bytes = cache.load(&key).await?;
    let elapsed = started.elapsed();

    let stats = cache.stats();
    let source = if stats.disk_hits > 0 { "disk" } else { "remote" };
    println!(
        "{}: {} from {} in {:.1?}",
        key,
        format_size(bytes.len() as u64),
        source,
        elapsed
    );

    if let Some(path) = args.output {
        std::fs::write(&path, &bytes)?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}
