//! Default values for configuration

/// Default bind host for the HTTP server
pub fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

/// Default HTTP port
pub fn default_server_port() -> u16 {
    8787
}

/// Default public URL stage triggers are posted to in `http` dispatch mode
pub fn default_public_url() -> String {
    std::env::var("DOCPIPE_PUBLIC_URL").unwrap_or_else(|_| "http://127.0.0.1:8787".to_string())
}

/// Default maximum upload size (50 MB)
pub fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

/// Default OCR service base URL
pub fn default_ocr_base_url() -> String {
    std::env::var("DOCPIPE_OCR_URL").unwrap_or_else(|_| "https://api.mistral.ai".to_string())
}

/// Default OCR model
pub fn default_ocr_model() -> String {
    "mistral-ocr-latest".to_string()
}

/// Default minimum average characters per page before a PDF text layer is trusted
pub fn default_min_chars_per_page() -> usize {
    50
}

/// Default completion service base URL
pub fn default_completion_base_url() -> String {
    std::env::var("DOCPIPE_COMPLETION_URL").unwrap_or_else(|_| "https://api.mistral.ai".to_string())
}

/// Default completion model
pub fn default_completion_model() -> String {
    "mistral-small-latest".to_string()
}

/// Default characters of OCR text sent to classification
pub fn default_classify_max_chars() -> usize {
    4000
}

/// Default characters of OCR text sent to field extraction
pub fn default_extract_max_chars() -> usize {
    8000
}

/// Default cap on free-form extracted fields
pub fn default_max_fallback_fields() -> usize {
    10
}

/// Default embedding service base URL
pub fn default_embedding_base_url() -> String {
    std::env::var("DOCPIPE_EMBEDDING_URL").unwrap_or_else(|_| "https://api.mistral.ai".to_string())
}

/// Default embedding model
pub fn default_embedding_model() -> String {
    "mistral-embed".to_string()
}

/// Default embedding dimension (mistral-embed)
pub fn default_embedding_dimension() -> usize {
    1024
}

/// Default environment variable holding the API key for all capabilities
pub fn default_api_key_env() -> String {
    "MISTRAL_API_KEY".to_string()
}

/// Default chunk window in characters
pub fn default_chunk_size() -> usize {
    1000
}

/// Default overlap between consecutive chunks
pub fn default_chunk_overlap() -> usize {
    200
}

/// Default full-text weight for search
pub fn default_search_fulltext_weight() -> f32 {
    0.4
}

/// Default vector weight for search
pub fn default_search_vector_weight() -> f32 {
    0.6
}

/// Default number of search results
pub fn default_search_match_count() -> usize {
    20
}

/// Default excerpt length in characters
pub fn default_excerpt_chars() -> usize {
    300
}

/// Default FTS5 tokenizer
pub fn default_fts_tokenizer() -> String {
    "unicode61 remove_diacritics 2".to_string()
}

/// Default full-text weight for chat retrieval
pub fn default_chat_fulltext_weight() -> f32 {
    0.3
}

/// Default vector weight for chat retrieval
pub fn default_chat_vector_weight() -> f32 {
    0.7
}

/// Default number of grounding documents for chat
pub fn default_chat_match_count() -> usize {
    5
}

/// Default number of history turns kept in the chat prompt
pub fn default_history_window() -> usize {
    10
}

/// Default retries after the first attempt
pub fn default_max_retries() -> u32 {
    3
}

/// Default base backoff delay (1 second)
pub fn default_base_delay_ms() -> u64 {
    1000
}

/// Default backoff ceiling (30 seconds)
pub fn default_max_delay_ms() -> u64 {
    30_000
}

/// Default per-request timeout for capability calls
pub fn default_request_timeout_secs() -> u64 {
    120
}
