//! Shared state for the HTTP server

use crate::chat::ChatRetriever;
use crate::config::Config;
use crate::error::Result;
use crate::llm::HttpCompletionClient;
use crate::meta::Registry;
use crate::pipeline::{Pipeline, PipelineParts};
use crate::search::HybridSearchEngine;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    pipeline: Arc<Pipeline>,
    search: HybridSearchEngine,
    chat: ChatRetriever,
}

impl AppState {
    pub fn new(
        config: Config,
        pipeline: Arc<Pipeline>,
        search: HybridSearchEngine,
        chat: ChatRetriever,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                pipeline,
                search,
                chat,
            }),
        }
    }

    /// Open the registry and build every capability the config names
    pub async fn from_config(config: Config) -> Result<Self> {
        let registry = Registry::connect(&config).await?;
        registry.init_schema().await?;
        info!("Registry ready at {:?}", config.paths.db_file);

        let parts = PipelineParts::from_config(&config, registry.clone())?;
        let embedder = Arc::clone(&parts.embedder);
        let completion = Arc::new(HttpCompletionClient::new(&config.completion, &config.retry)?);
        let pipeline = Pipeline::start(parts, &config)?;

        let search = HybridSearchEngine::new(registry, Some(Arc::clone(&embedder)), config.search.clone());
        let chat = ChatRetriever::new(search.clone(), embedder, completion, config.chat.clone());

        Ok(Self::new(config, pipeline, search, chat))
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.inner.pipeline
    }

    pub fn registry(&self) -> &Registry {
        self.inner.pipeline.registry()
    }

    pub fn search(&self) -> &HybridSearchEngine {
        &self.inner.search
    }

    pub fn chat(&self) -> &ChatRetriever {
        &self.inner.chat
    }
}
