use super::{OcrEngine, OcrPage};
use crate::backend::BackendClient;
use crate::config::{OcrConfig, RetryConfig};
use crate::error::Result;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize)]
struct OcrRequest<'a> {
    model: &'a str,
    document: DocumentInput,
    table_format: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DocumentInput {
    DocumentUrl { document_url: String },
    ImageUrl { image_url: String },
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    #[serde(default)]
    pages: Vec<OcrResponsePage>,
}

#[derive(Debug, Deserialize)]
struct OcrResponsePage {
    #[serde(default)]
    markdown: String,
    #[serde(default)]
    tables: Vec<OcrTable>,
}

#[derive(Debug, Deserialize)]
struct OcrTable {
    id: String,
    #[serde(default)]
    content: String,
}

/// Remote OCR over the `/v1/ocr` document protocol
pub struct HttpOcrClient {
    client: BackendClient,
    model: String,
}

impl HttpOcrClient {
    pub fn new(config: &OcrConfig, retry: &RetryConfig) -> Result<Self> {
        let client = BackendClient::from_env_key("OCR", &config.base_url, &config.api_key_env, retry)?;
        Ok(Self {
            client,
            model: config.model.clone(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.client = self.client.with_retry_policy(retry);
        self
    }
}

#[async_trait]
impl OcrEngine for HttpOcrClient {
    async fn recognize(&self, bytes: &[u8], mime_type: &str) -> Result<Vec<OcrPage>> {
        let data_url = format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes));
        let document = if mime_type.starts_with("image/") {
            DocumentInput::ImageUrl {
                image_url: data_url,
            }
        } else {
            DocumentInput::DocumentUrl {
                document_url: data_url,
            }
        };

        debug!("Remote OCR of {} bytes ({})", bytes.len(), mime_type);
        let request = OcrRequest {
            model: &self.model,
            document,
            table_format: "markdown",
        };
        let response: OcrResponse = self.client.post_json("v1/ocr", &request).await?;

        Ok(response
            .pages
            .into_iter()
            .map(|page| OcrPage {
                markdown: page.markdown,
                tables: page.tables.into_iter().map(|t| (t.id, t.content)).collect(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> HttpOcrClient {
        let config = OcrConfig {
            base_url: server.uri(),
            api_key_env: String::new(),
            ..OcrConfig::default()
        };
        HttpOcrClient::new(&config, &RetryConfig::default())
            .unwrap()
            .with_retry_policy(RetryPolicy::immediate(0))
    }

    #[tokio::test]
    async fn test_image_request_uses_image_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/ocr"))
            .and(body_partial_json(json!({
                "model": "mistral-ocr-latest",
                "table_format": "markdown",
                "document": {"type": "image_url", "image_url": "data:image/png;base64,AQID"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "pages": [{
                    "markdown": "Summe:\n[tbl-0.md](tbl-0.md)",
                    "tables": [{"id": "tbl-0.md", "content": "| a | b |"}]
                }]
            })))
            .mount(&server)
            .await;

        let pages = client(&server).recognize(&[1, 2, 3], "image/png").await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].render(), "Summe:\n| a | b |");
    }

    #[tokio::test]
    async fn test_pdf_request_uses_document_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "document": {"type": "document_url"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "pages": [{"markdown": "p1"}, {"markdown": "p2"}]
            })))
            .mount(&server)
            .await;

        let pages = client(&server)
            .recognize(b"%PDF", "application/pdf")
            .await
            .unwrap();
        assert_eq!(pages.len(), 2);
    }

    #[tokio::test]
    async fn test_server_error_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
            .mount(&server)
            .await;

        let err = client(&server)
            .recognize(b"%PDF", "application/pdf")
            .await
            .unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("500"));
    }
}
