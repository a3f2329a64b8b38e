//! Demo command - runs the caches against an in-memory store and reports
//! what reached the "network".

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use console::style;
use geofeed::blob::BlobKey;
use geofeed::config::ConfigFile;
use geofeed::coord::Viewport;
use geofeed::feed::{FeedItem, FeedPage};
use geofeed::remote::{InMemoryBlobStore, InMemoryStore};
use geofeed::store::Marker;
use geofeed::GeoFeed;
use serde_json::{json, Map};
use tracing::info;

use crate::error::CliError;

pub struct DemoArgs {
    pub markers: usize,
    pub producers: usize,
    pub latency_ms: u64,
}

const CENTER_LAT: f64 = 48.8566;
const CENTER_LON: f64 = 2.3522;
const GRID_STEP: f64 = 0.025;
const GRID_ROWS: usize = 40;
const POSTS_PER_PRODUCER: usize = 15;
const CONCURRENT_VIEWS: usize = 5;

pub async fn run(args: DemoArgs, config: &ConfigFile) -> Result<(), CliError> {
    let latency = Duration::from_millis(args.latency_ms);
    let remote = Arc::new(InMemoryStore::new().with_latency(latency));
    let blobs = Arc::new(InMemoryBlobStore::new().with_latency(latency));

    let mut service_config = config.service_config();
    service_config.blob.disk_dir = None;
    let store_collection = service_config.store.collection.clone();
    let feed_collection = service_config.feed.collection.clone();
    let page_size = service_config.feed.page_size;

    let marker_ids = seed_markers(&remote, &store_collection, args.markers.max(1))?;
    let producers = seed_posts(&remote, &feed_collection, &marker_ids, args.producers.max(1));
    info!(
        markers = marker_ids.len(),
        producers = producers.len(),
        "Seeded in-memory store"
    );

    let service = GeoFeed::new(remote.clone(), blobs.clone(), service_config);

    heading("Region query");
    let viewport = Viewport::new(CENTER_LAT, CENTER_LON, 0.2, 0.3);
    let first = service.query_region(&viewport).await?;
    let calls_after_first = remote.call_counts().query_range;
    let zoomed = Viewport::new(CENTER_LAT, CENTER_LON, 0.1, 0.15);
    let second = service.query_region(&zoomed).await?;
    println!("  {} markers in {}", first.len(), viewport);
    println!("  {} markers in {} (zoomed in)", second.len(), zoomed);
    println!(
        "  range scans: {} for the first query, {} for the zoomed one",
        calls_after_first,
        remote.call_counts().query_range - calls_after_first
    );

    heading("By-ID query");
    let wanted: Vec<String> = marker_ids.iter().take(25).cloned().collect();
    let before = remote.call_counts().get_by_ids;
    let found = service.query_by_ids(&wanted).await?;
    println!(
        "  {} of {} markers in {} batch calls",
        found.len(),
        wanted.len(),
        remote.call_counts().get_by_ids - before
    );

    heading("Feed");
    let page = service.query_feed_page(&producers, None, page_size).await?;
    print_page(1, &page);
    if let Some(cursor) = &page.next_cursor {
        let next = service
            .query_feed_page(&producers, Some(cursor), page_size)
            .await?;
        print_page(2, &next);
    }

    heading("Blob loads");
    let url = blobs.insert("demo/photo.jpg", Bytes::from(vec![0u8; 256 * 1024]));
    let key = BlobKey::full(url);
    let handles: Vec<_> = (0..CONCURRENT_VIEWS)
        .map(|_| {
            let service = service.clone();
            let key = key.clone();
            tokio::spawn(async move { service.load_blob(&key).await })
        })
        .collect();
    let mut loaded = 0;
    for handle in handles {
        if let Ok(Ok(_)) = handle.await {
            loaded += 1;
        }
    }
    println!(
        "  {} concurrent loads served by {} remote transfer(s)",
        loaded,
        blobs.get_count()
    );

    heading("Statistics");
    for line in service.stats().to_string().lines() {
        println!("  {}", line);
    }
    Ok(())
}

fn heading(title: &str) {
    println!();
    println!("{}", style(title).bold().cyan());
}

fn print_page(number: usize, page: &FeedPage) {
    println!(
        "  page {}: {} items, {} distinct markers ({} resolved), more: {}",
        number,
        page.items.len(),
        page.marker_ids.len(),
        page.markers.len(),
        page.next_cursor.is_some()
    );
    for item in page.items.iter().take(3) {
        println!(
            "    {} {:<10} -> {}",
            item.timestamp.format("%H:%M"),
            item.producer_id,
            item.marker_id
        );
    }
}

/// A grid of markers centred on Paris.
fn seed_markers(
    remote: &InMemoryStore,
    collection: &str,
    count: usize,
) -> Result<Vec<String>, CliError> {
    let origin_lat = CENTER_LAT - GRID_STEP * GRID_ROWS as f64 / 2.0;
    let columns = count.div_ceil(GRID_ROWS);
    let origin_lon = CENTER_LON - GRID_STEP * columns as f64 / 2.0;

    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let lat = origin_lat + (i % GRID_ROWS) as f64 * GRID_STEP;
        let lon = origin_lon + (i / GRID_ROWS) as f64 * GRID_STEP;
        let mut attributes = Map::new();
        attributes.insert("title".to_string(), json!(format!("Spot {}", i)));
        let marker = Marker::new(format!("marker-{:04}", i), lat, lon, attributes)?;
        ids.push(marker.id.clone());
        remote.insert(collection, marker.to_document());
    }
    Ok(ids)
}

/// A minute-spaced history of posts per producer.
fn seed_posts(
    remote: &InMemoryStore,
    collection: &str,
    marker_ids: &[String],
    producers: usize,
) -> Vec<String> {
    let now = Utc::now().timestamp_millis();
    let names: Vec<String> = (0..producers).map(|p| format!("producer-{}", p)).collect();

    for (p, producer) in names.iter().enumerate() {
        for k in 0..POSTS_PER_PRODUCER {
            let marker = &marker_ids[(p * 37 + k * 11) % marker_ids.len()];
            let millis = now - ((k * producers + p) as i64) * 60_000;
            let Some(timestamp) = DateTime::from_timestamp_millis(millis) else {
                continue;
            };
            let item = FeedItem::new(format!("{}-{}", producer, k), producer, marker, timestamp);
            remote.insert(collection, item.to_document());
        }
    }
    names
}
