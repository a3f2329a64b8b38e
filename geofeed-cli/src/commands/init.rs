//! Init command - write a configuration file with every default spelled out.

use std::path::Path;

use geofeed::config::ConfigFile;

use crate::error::CliError;

pub fn run(path: &Path, force: bool) -> Result<(), CliError> {
    if path.exists() && !force {
        println!("Configuration file already exists: {}", path.display());
        println!("Use --force to rewrite it, filling in any missing keys.");
        return Ok(());
    }

    // Keep values already set when overwriting.
    let config = ConfigFile::load_from(path).unwrap_or_default();
    config.save_to(path)?;

    println!("Configuration file: {}", path.display());
    println!();
    println!("Edit this file to customize cache sizes, TTLs and logging.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_writes_loadable_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("geofeed").join("config.ini");

        run(&path, false).unwrap();
        assert!(path.exists());
        assert_eq!(ConfigFile::load_from(&path).unwrap(), ConfigFile::default());
    }
}
