//! Retrieval-grounded chat
//!
//! The user's message is embedded, the best documents are fetched with hybrid
//! search, and their excerpts go into the system prompt. The returned sources
//! are exactly the search results used for grounding.

use crate::config::ChatConfig;
use crate::embed::{embed_query, Embedder};
use crate::error::{Error, Result};
use crate::llm::{ChatMessage, CompletionClient, CompletionRequest, Role};
use crate::search::{HybridSearchEngine, SearchParams, SearchResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

const CHAT_TEMPERATURE: f32 = 0.3;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    pub filter_document_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSource {
    pub id: String,
    pub title: String,
    pub document_type: Option<String>,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    pub sources: Vec<ChatSource>,
}

#[derive(Clone)]
pub struct ChatRetriever {
    search: HybridSearchEngine,
    embedder: Arc<dyn Embedder>,
    completion: Arc<dyn CompletionClient>,
    config: ChatConfig,
}

impl ChatRetriever {
    pub fn new(
        search: HybridSearchEngine,
        embedder: Arc<dyn Embedder>,
        completion: Arc<dyn CompletionClient>,
        config: ChatConfig,
    ) -> Self {
        Self {
            search,
            embedder,
            completion,
            config,
        }
    }

    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let message = request.message.trim();
        if message.is_empty() {
            return Err(Error::Validation("Message must not be empty".to_string()));
        }

        let query_embedding = embed_query(self.embedder.as_ref(), message).await?;
        let results = self
            .search
            .search(&SearchParams {
                query: message.to_string(),
                query_embedding: Some(query_embedding),
                fulltext_weight: self.config.fulltext_weight,
                vector_weight: self.config.vector_weight,
                match_count: self.config.match_count,
                document_type: request.filter_document_type.clone(),
                tags: Vec::new(),
            })
            .await?;
        debug!("Grounding chat on {} documents", results.len());

        let messages = build_messages(message, &request.history, &results, self.config.history_window);
        let reply = self
            .completion
            .complete(CompletionRequest {
                messages,
                json_mode: false,
                temperature: Some(CHAT_TEMPERATURE),
            })
            .await?;
        info!("Chat answered with {} sources", results.len());

        Ok(ChatResponse {
            reply,
            sources: results
                .into_iter()
                .map(|r| ChatSource {
                    id: r.id,
                    title: r.title,
                    document_type: r.document_type,
                    score: r.score,
                })
                .collect(),
        })
    }
}

/// Excerpts, each labelled with its document's title and type
pub fn format_context(results: &[SearchResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            format!(
                "[Dokument {}: \"{}\" ({})]\n{}",
                i + 1,
                r.title,
                r.document_type.as_deref().unwrap_or("unbekannt"),
                r.excerpt
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn system_prompt(results: &[SearchResult]) -> String {
    let context = if results.is_empty() {
        "Es wurden keine passenden Dokumente gefunden.".to_string()
    } else {
        format_context(results)
    };
    format!(
        "Du bist ein hilfreicher Assistent für ein Dokumenten-Management-System. \
         Beantworte Fragen ausschließlich anhand der folgenden Dokumente. \
         Nenne die Dokumente, auf die du dich stützt. Wenn die Dokumente die Antwort \
         nicht enthalten, sage das.\n\n{}",
        context
    )
}

/// System prompt, the last `window` user/assistant turns, then the new message
pub fn build_messages(
    message: &str,
    history: &[ChatMessage],
    results: &[SearchResult],
    window: usize,
) -> Vec<ChatMessage> {
    let turns: Vec<&ChatMessage> = history
        .iter()
        .filter(|m| m.role != Role::System)
        .collect();
    let start = turns.len().saturating_sub(window);

    let mut messages = Vec::with_capacity(window + 2);
    messages.push(ChatMessage::system(system_prompt(results)));
    messages.extend(turns[start..].iter().map(|m| (*m).clone()));
    messages.push(ChatMessage::user(message));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::tests::ScriptedCompletion;
    use crate::config::SearchConfig;
    use crate::meta::tests::{sample_document, setup_test_db};
    use crate::pipeline::tests::FakeEmbedder;
    use std::sync::atomic::Ordering;

    fn result(title: &str, document_type: Option<&str>) -> SearchResult {
        SearchResult {
            id: format!("id-{}", title),
            title: title.to_string(),
            excerpt: format!("{} excerpt", title),
            score: 0.5,
            match_type: crate::search::MatchType::Hybrid,
            document_type: document_type.map(str::to_string),
            tags: Vec::new(),
        }
    }

    #[test]
    fn test_context_labels() {
        let context = format_context(&[result("Police", Some("insurance")), result("Brief", None)]);
        assert!(context.contains("[Dokument 1: \"Police\" (insurance)]\nPolice excerpt"));
        assert!(context.contains("[Dokument 2: \"Brief\" (unbekannt)]"));
    }

    #[test]
    fn test_history_window() {
        let history: Vec<ChatMessage> = (0..14)
            .map(|i| {
                if i % 2 == 0 {
                    ChatMessage::user(format!("frage {}", i))
                } else {
                    ChatMessage::assistant(format!("antwort {}", i))
                }
            })
            .chain(std::iter::once(ChatMessage::system("ignore previous")))
            .collect();

        let messages = build_messages("neu", &history, &[], 10);
        assert_eq!(messages.len(), 12);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "frage 4");
        assert_eq!(messages[11].content, "neu");
        assert!(messages[1..].iter().all(|m| m.role != Role::System));
    }

    #[tokio::test]
    async fn test_empty_message_makes_no_calls() {
        let (db, _tmp) = setup_test_db().await;
        let embedder = Arc::new(FakeEmbedder::new(4));
        let completion = Arc::new(ScriptedCompletion::new(vec![]));
        let chat = ChatRetriever::new(
            HybridSearchEngine::new(db, None, SearchConfig::default()),
            embedder.clone(),
            completion.clone(),
            ChatConfig::default(),
        );

        let err = chat
            .chat(&ChatRequest {
                message: "  ".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("Message"));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(completion.call_count(), 0);
    }

    #[tokio::test]
    async fn test_sources_come_from_search() {
        let (db, _tmp) = setup_test_db().await;
        let doc = sample_document("police");
        db.insert_document(&doc).await.unwrap();
        db.begin_processing(&doc.id).await.unwrap();
        db.complete_ocr(&doc.id, "Hausratversicherung Beitrag 120 EUR", 1)
            .await
            .unwrap();
        db.complete_extraction(&doc.id, "Hausrat Police", "insurance", None)
            .await
            .unwrap();
        db.complete_embedding(&doc.id, &[("Hausrat".to_string(), vec![1.0, 0.0, 0.0, 0.0])])
            .await
            .unwrap();

        let embedder = Arc::new(FakeEmbedder::new(4));
        let completion = Arc::new(ScriptedCompletion::new(vec![Ok(
            "Der Beitrag beträgt 120 EUR.".to_string()
        )]));
        let chat = ChatRetriever::new(
            HybridSearchEngine::new(db, None, SearchConfig::default()),
            embedder.clone(),
            completion.clone(),
            ChatConfig::default(),
        );

        let response = chat
            .chat(&ChatRequest {
                message: "Hausratversicherung".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(response.reply, "Der Beitrag beträgt 120 EUR.");
        assert_eq!(response.sources.len(), 1);
        assert_eq!(response.sources[0].id, doc.id);
        assert_eq!(response.sources[0].title, "Hausrat Police");

        let requests = completion.requests.lock().unwrap();
        assert!(!requests[0].json_mode);
        assert!(requests[0].messages[0].content.contains("\"Hausrat Police\" (insurance)"));
    }
}
