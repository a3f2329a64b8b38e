//! Geohash and precision commands.

use clap::Subcommand;
use geofeed::coord::{self, Direction, PrecisionSelector, STORAGE_PRECISION};

use crate::error::CliError;

#[derive(Debug, Subcommand)]
pub enum GeohashCommands {
    /// Encode a coordinate
    Encode {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// Number of characters
        #[arg(short, long, default_value_t = STORAGE_PRECISION)]
        precision: usize,
    },
    /// Show the cell a geohash denotes
    Decode { hash: String },
    /// List the eight surrounding cells
    Neighbors { hash: String },
}

pub fn run(command: GeohashCommands) -> Result<(), CliError> {
    match command {
        GeohashCommands::Encode {
            lat,
            lon,
            precision,
        } => {
            println!("{}", coord::encode(lat, lon, precision)?);
        }
        GeohashCommands::Decode { hash } => {
            let cell = coord::decode(&hash)?;
            let (lat_size, lon_size) = coord::cell_size(hash.len());
            println!("Geohash:   {}", hash);
            println!("Center:    {:.6}, {:.6}", cell.center.lat, cell.center.lon);
            println!("Bounds:    {}", cell.bbox);
            println!("Cell size: {:.5}° x {:.5}°", lat_size, lon_size);
        }
        GeohashCommands::Neighbors { hash } => {
            for direction in Direction::ALL {
                let neighbor = coord::adjacent(&hash, direction)?;
                println!(
                    "{:<10} {}",
                    format!("{:?}", direction),
                    neighbor.as_deref().unwrap_or("(past pole)")
                );
            }
        }
    }
    Ok(())
}

/// Prints the precision chosen for a latitude span.
pub fn run_precision(span: f64) -> Result<(), CliError> {
    let selector = PrecisionSelector::default();
    let precision = selector.select(span);
    let (lat_size, lon_size) = coord::cell_size(precision);
    println!(
        "span {}° -> precision {} (cells {:.4}° x {:.4}°)",
        span, precision, lat_size, lon_size
    );
    Ok(())
}
