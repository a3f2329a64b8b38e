//! GeoFeed CLI - inspect geohashes, configuration and the blob cache, and
//! run the caches against an in-memory store.

mod commands;
mod error;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use geofeed::config::{config_file_path, ConfigFile};
use geofeed::logging::init_logging;

use commands::cache::CacheAction;
use commands::config::ConfigCommands;
use commands::demo::DemoArgs;
use commands::fetch::FetchArgs;
use commands::geohash::GeohashCommands;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "geofeed")]
#[command(about = "Lazy-loading marker, feed and image caches")]
#[command(version = geofeed::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to <config dir>/geofeed/config.ini)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Encode, decode and walk geohashes
    Geohash {
        #[command(subcommand)]
        command: GeohashCommands,
    },

    /// Show the geohash precision chosen for a latitude span in degrees
    Precision { span: f64 },

    /// Manage the persistent blob cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// View or change configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Write a configuration file with defaults
    Init {
        /// Rewrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Load one blob over HTTP through the cache tiers
    Fetch {
        /// Absolute URL, or a path under remote.base_url
        url: String,

        /// Cache as a thumbnail rather than a full-size asset
        #[arg(long)]
        thumbnail: bool,

        /// Write the bytes to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Exercise every cache against synthetic in-memory data
    Demo {
        #[arg(long, default_value_t = 400)]
        markers: usize,

        #[arg(long, default_value_t = 5)]
        producers: usize,

        /// Simulated latency of every remote call
        #[arg(long, default_value_t = 20)]
        latency_ms: u64,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config_path = match cli.config {
        Some(path) => path,
        None => config_file_path()?,
    };

    // Commands that only touch the file itself work even when it is invalid.
    match cli.command {
        Commands::Config { command } => return commands::config::run(command, &config_path),
        Commands::Init { force } => return commands::init::run(&config_path, force),
        Commands::Geohash { command } => return commands::geohash::run(command),
        Commands::Precision { span } => return commands::geohash::run_precision(span),
        _ => {}
    }

    let config = ConfigFile::load_from(&config_path)?;
    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    let _guard = init_logging(&logging)?;
    tracing::debug!(config = %config_path.display(), "Loaded configuration");

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        match cli.command {
            Commands::Cache { action } => commands::cache::run(action, &config).await,
            Commands::Fetch {
                url,
                thumbnail,
                output,
            } => {
                let args = FetchArgs {
                    url,
                    thumbnail,
                    output,
                };
                commands::fetch::run(args, &config).await
            }
            Commands::Demo {
                markers,
                producers,
                latency_ms,
            } => {
                let args = DemoArgs {
                    markers,
                    producers,
                    latency_ms,
                };
                commands::demo::run(args, &config).await
            }
            Commands::Config { .. }
            | Commands::Init { .. }
            | Commands::Geohash { .. }
            | Commands::Precision { .. } => Ok(()),
        }
    })
}
