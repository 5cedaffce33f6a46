//! CLI commands implementation

pub mod document;
pub mod init;
pub mod query;
pub mod schemas;
pub mod status;

pub use document::*;
pub use init::*;
pub use query::*;
pub use schemas::*;
pub use status::*;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::meta::Registry;
use crate::pipeline::{Dispatcher, Pipeline, PipelineParts};

/// Open the registry of an initialized installation
pub async fn open_registry(config: &Config) -> Result<Registry> {
    if !config.is_initialized() {
        return Err(Error::Config(format!(
            "docpipe is not initialized at {}; run 'docpipe init' first",
            config.paths.base_dir.display()
        )));
    }
    let registry = Registry::connect(config).await?;
    registry.init_schema().await?;
    Ok(registry)
}

/// A pipeline that leaves stage chaining to the command driving it
pub async fn open_pipeline(config: &Config) -> Result<Pipeline> {
    let registry = open_registry(config).await?;
    let parts = PipelineParts::from_config(config, registry)?;
    Ok(Pipeline::new(parts, Dispatcher::Manual))
}
