//! Init command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::meta::Registry;
use std::path::PathBuf;
use tracing::info;

/// Write a default config, create the blob directory and the registry.
///
/// An existing config is only replaced with `force`.
pub async fn cmd_init(base_dir: Option<PathBuf>, force: bool) -> Result<Config> {
    let mut config = Config::default();
    config.init_paths(base_dir);

    if config.paths.config_file.exists() && !force {
        return Err(Error::Config(format!(
            "Config already exists at {}. Use --force to overwrite.",
            config.paths.config_file.display()
        )));
    }

    config.validate()?;
    config.save()?;

    let blob_dir = config.blob_dir();
    tokio::fs::create_dir_all(&blob_dir).await?;
    info!("Blob directory at {:?}", blob_dir);

    let registry = Registry::connect(&config).await?;
    registry.init_schema().await?;
    info!("Created database at {:?}", config.paths.db_file);

    Ok(config)
}

/// Print the post-init summary
pub fn print_init(config: &Config) {
    println!("✓ docpipe initialized successfully");
    println!("  Config: {}", config.paths.config_file.display());
    println!("  Database: {}", config.paths.db_file.display());
    println!("  Blobs: {}", config.blob_dir().display());
    println!("\nNext steps:");
    println!(
        "  1. Export the API keys named in the config ({}, {}, {})",
        config.ocr.api_key_env, config.completion.api_key_env, config.embedding.api_key_env
    );
    println!("  2. Start the server: docpipe serve");
    println!("  3. Upload a document: docpipe upload /path/to/scan.pdf");
}
