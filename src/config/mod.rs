//! Configuration management for docpipe
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Blob storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Stage dispatch configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Remote OCR capability
    #[serde(default)]
    pub ocr: OcrConfig,

    /// Completion capability used for classification, extraction and chat
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Embedding capability
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Chunking configuration
    #[serde(default)]
    pub chunk: ChunkConfig,

    /// Hybrid search defaults
    #[serde(default)]
    pub search: SearchConfig,

    /// Chat retrieval defaults
    #[serde(default)]
    pub chat: ChatConfig,

    /// Retry policy for transient capability failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Base URL the server is reachable at; stage triggers are posted here
    #[serde(default = "default_public_url")]
    pub public_url: String,

    /// Maximum accepted upload body in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Blob storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for document blobs (defaults to `<base_dir>/blobs`)
    #[serde(default)]
    pub blob_dir: Option<PathBuf>,
}

/// How a finished stage invokes the next one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Queue the next stage onto an in-process worker
    #[default]
    InProcess,
    /// POST the next stage's trigger endpoint on `server.public_url`
    Http,
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchMode::InProcess => write!(f, "in_process"),
            DispatchMode::Http => write!(f, "http"),
        }
    }
}

/// Stage dispatch configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub dispatch: DispatchMode,
}

/// Remote OCR capability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "default_ocr_base_url")]
    pub base_url: String,

    #[serde(default = "default_ocr_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Average characters per page at which a PDF text layer is accepted
    #[serde(default = "default_min_chars_per_page")]
    pub min_chars_per_page: usize,
}

/// Completion capability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_base_url")]
    pub base_url: String,

    #[serde(default = "default_completion_model")]
    pub model: String,

    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Characters of OCR text sent to the classification prompt
    #[serde(default = "default_classify_max_chars")]
    pub classify_max_chars: usize,

    /// Characters of OCR text sent to the field extraction prompt
    #[serde(default = "default_extract_max_chars")]
    pub extract_max_chars: usize,

    /// Cap on fields kept from free-form extraction
    #[serde(default = "default_max_fallback_fields")]
    pub max_fallback_fields: usize,
}

/// Embedding capability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,

    /// Model name/identifier
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension (must match model)
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Window size in characters
    #[serde(default = "default_chunk_size")]
    pub size: usize,

    /// Overlap characters between consecutive windows
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

/// Hybrid search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_fulltext_weight")]
    pub fulltext_weight: f32,

    #[serde(default = "default_search_vector_weight")]
    pub vector_weight: f32,

    #[serde(default = "default_search_match_count")]
    pub match_count: usize,

    /// Leading characters of a document returned as its excerpt
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,

    /// FTS5 tokenizer declaration, applied when the index is first created
    #[serde(default = "default_fts_tokenizer")]
    pub fts_tokenizer: String,
}

/// Chat retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_chat_fulltext_weight")]
    pub fulltext_weight: f32,

    #[serde(default = "default_chat_vector_weight")]
    pub vector_weight: f32,

    #[serde(default = "default_chat_match_count")]
    pub match_count: usize,

    /// Most recent history turns included in the prompt
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

/// Retry configuration for transient capability failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the initial attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Timeout for a single capability request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for docpipe data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to SQLite database
    pub db_file: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            public_url: default_public_url(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            base_url: default_ocr_base_url(),
            model: default_ocr_model(),
            api_key_env: default_api_key_env(),
            min_chars_per_page: default_min_chars_per_page(),
        }
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: default_completion_base_url(),
            model: default_completion_model(),
            api_key_env: default_api_key_env(),
            classify_max_chars: default_classify_max_chars(),
            extract_max_chars: default_extract_max_chars(),
            max_fallback_fields: default_max_fallback_fields(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            size: default_chunk_size(),
            overlap: default_chunk_overlap(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            fulltext_weight: default_search_fulltext_weight(),
            vector_weight: default_search_vector_weight(),
            match_count: default_search_match_count(),
            excerpt_chars: default_excerpt_chars(),
            fts_tokenizer: default_fts_tokenizer(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            fulltext_weight: default_chat_fulltext_weight(),
            vector_weight: default_chat_vector_weight(),
            match_count: default_chat_match_count(),
            history_window: default_history_window(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Config {
    /// Get the default base directory for docpipe (~/.docpipe)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".docpipe")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Initialize paths configuration
    pub fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig {
            config_file: base.join("config.toml"),
            db_file: base.join("docpipe.db"),
            base_dir: base,
        };
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = PathsConfig {
            config_file: config_path.to_path_buf(),
            db_file: base.join("docpipe.db"),
            base_dir: base,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific base directory, falling back to defaults
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Directory blobs are written under
    pub fn blob_dir(&self) -> PathBuf {
        self.storage
            .blob_dir
            .clone()
            .unwrap_or_else(|| self.paths.base_dir.join("blobs"))
    }

    /// Check if docpipe is initialized (config and DB exist)
    pub fn is_initialized(&self) -> bool {
        self.paths.config_file.exists() && self.paths.db_file.exists()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.chunk.size == 0 {
            return Err(Error::Config("chunk.size must be positive".to_string()));
        }

        if self.chunk.overlap >= self.chunk.size {
            return Err(Error::Config(
                "chunk.overlap must be < chunk.size".to_string(),
            ));
        }

        check_weight("search.fulltext_weight", self.search.fulltext_weight)?;
        check_weight("search.vector_weight", self.search.vector_weight)?;
        check_weight("chat.fulltext_weight", self.chat.fulltext_weight)?;
        check_weight("chat.vector_weight", self.chat.vector_weight)?;

        if self.search.match_count == 0 || self.chat.match_count == 0 {
            return Err(Error::Config(
                "search.match_count and chat.match_count must be positive".to_string(),
            ));
        }

        if self.search.fts_tokenizer.trim().is_empty()
            || !self
                .search
                .fts_tokenizer
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ' ')
        {
            return Err(Error::Config(
                "search.fts_tokenizer may only contain letters, digits, '_' and spaces"
                    .to_string(),
            ));
        }

        if self.embedding.dimension == 0 {
            return Err(Error::Config(
                "embedding.dimension must be positive".to_string(),
            ));
        }

        if self.pipeline.dispatch == DispatchMode::Http {
            url::Url::parse(&self.server.public_url).map_err(|e| {
                Error::Config(format!(
                    "server.public_url must be a valid URL for http dispatch: {}",
                    e
                ))
            })?;
        }

        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(Error::Config(
                "retry.max_delay_ms must be >= retry.base_delay_ms".to_string(),
            ));
        }

        Ok(())
    }
}

fn check_weight(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(Error::Config(format!(
            "{} must be between 0.0 and 1.0",
            name
        )));
    }
    Ok(())
}

/// Read an API key from the environment variable a config section names
pub fn api_key_from_env(var: &str) -> Option<String> {
    if var.is_empty() {
        return None;
    }
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.chunk.size, 1000);
        assert_eq!(config.chunk.overlap, 200);
        assert_eq!(config.ocr.min_chars_per_page, 50);
        assert_eq!(config.search.match_count, 20);
        assert_eq!(config.chat.history_window, 10);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.pipeline.dispatch, DispatchMode::InProcess);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        config.search.match_count = 7;
        config.pipeline.dispatch = DispatchMode::Http;

        config.save().unwrap();
        assert!(config.paths.config_file.exists());

        let loaded = Config::load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(loaded.search.match_count, 7);
        assert_eq!(loaded.pipeline.dispatch, DispatchMode::Http);
        assert_eq!(loaded.blob_dir(), tmp.path().join("blobs"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.chunk.overlap = config.chunk.size;
        assert!(config.validate().is_err());

        config.chunk.overlap = 100;
        assert!(config.validate().is_ok());

        config.search.vector_weight = 1.5;
        assert!(config.validate().is_err());
        config.search.vector_weight = 0.6;

        config.chat.match_count = 0;
        assert!(config.validate().is_err());
        config.chat.match_count = 5;

        config.search.fts_tokenizer = "porter'); DROP TABLE documents; --".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_dispatch_mode_rejected() {
        let parsed: std::result::Result<Config, _> =
            toml::from_str("[pipeline]\ndispatch = \"carrier_pigeon\"\n");
        assert!(parsed.is_err());

        let parsed: Config = toml::from_str("[pipeline]\ndispatch = \"http\"\n").unwrap();
        assert_eq!(parsed.pipeline.dispatch, DispatchMode::Http);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let parsed: Config = toml::from_str("[chunk]\nsize = 500\n").unwrap();
        assert_eq!(parsed.chunk.size, 500);
        assert_eq!(parsed.chunk.overlap, 200);
        assert_eq!(parsed.completion.classify_max_chars, 4000);
    }
}
