//! Configuration commands.

use std::path::Path;

use clap::Subcommand;
use geofeed::config::{ConfigFile, ConfigKey};

use crate::error::CliError;

#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Get a configuration value
    Get {
        /// Key in section.key form (e.g. feed.page_size)
        key: String,
    },

    /// Set a configuration value and save the file
    Set {
        /// Key in section.key form (e.g. feed.page_size)
        key: String,

        value: String,
    },

    /// Show the configuration file path
    Path,
}

pub fn run(command: ConfigCommands, path: &Path) -> Result<(), CliError> {
    match command {
        ConfigCommands::Show => run_show(path),
        ConfigCommands::Get { key } => run_get(path, &key),
        ConfigCommands::Set { key, value } => run_set(path, &key, &value),
        ConfigCommands::Path => {
            println!("{}", path.display());
            Ok(())
        }
    }
}

fn parse_key(key: &str) -> Result<ConfigKey, CliError> {
    key.parse().map_err(|_| {
        CliError::Config(format!(
            "Unknown configuration key '{}'. Use 'geofeed config show' to see available keys.",
            key
        ))
    })
}

fn run_show(path: &Path) -> Result<(), CliError> {
    let config = ConfigFile::load_from(path)?;
    println!("# {}", path.display());

    let mut current_section = "";
    for key in ConfigKey::all() {
        if key.section() != current_section {
            if !current_section.is_empty() {
                println!();
            }
            println!("[{}]", key.section());
            current_section = key.section();
        }
        let value = key.get(&config);
        if value.is_empty() {
            println!("{} = (not set)", key.key_name());
        } else {
            println!("{} = {}", key.key_name(), value);
        }
    }
    Ok(())
}

fn run_get(path: &Path, key: &str) -> Result<(), CliError> {
    let key = parse_key(key)?;
    let config = ConfigFile::load_from(path)?;
    let value = key.get(&config);
    if value.is_empty() {
        println!("(not set)");
    } else {
        println!("{}", value);
    }
    Ok(())
}

fn run_set(path: &Path, key: &str, value: &str) -> Result<(), CliError> {
    let key = parse_key(key)?;
    let mut config = ConfigFile::load_from(path)?;
    key.set(&mut config, value)?;
    config.save_to(path)?;
    println!("Set {} = {}", key, key.get(&config));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_set_persists_value() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.ini");

        run_set(&path, "feed.page_size", "7").unwrap();
        let config = ConfigFile::load_from(&path).unwrap();
        assert_eq!(config.feed.page_size, 7);

        assert!(run_set(&path, "feed.page_size", "-1").is_err());
        assert!(run_set(&path, "feed.colour", "red").is_err());
    }
}
