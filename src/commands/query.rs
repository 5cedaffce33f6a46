//! Search and chat commands

use super::open_registry;
use crate::chat::{ChatRequest, ChatResponse, ChatRetriever};
use crate::config::Config;
use crate::embed::{create_embedder, Embedder};
use crate::error::Result;
use crate::llm::{create_completion_client, CompletionClient};
use crate::search::{HybridSearchEngine, SearchRequest, SearchResponse};
use std::sync::Arc;
use tracing::info;

async fn search_engine(config: &Config) -> Result<(HybridSearchEngine, Arc<dyn Embedder>)> {
    let registry = open_registry(config).await?;
    let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&config.embedding, &config.retry)?);
    let engine = HybridSearchEngine::new(
        registry,
        Some(Arc::clone(&embedder)),
        config.search.clone(),
    );
    Ok((engine, embedder))
}

/// Hybrid search over ready documents
pub async fn cmd_search(config: &Config, request: &SearchRequest) -> Result<SearchResponse> {
    info!("Searching for: {}", request.query);
    let (engine, _) = search_engine(config).await?;
    engine.search_request(request).await
}

/// Answer a question from the best matching documents
pub async fn cmd_chat(config: &Config, request: &ChatRequest) -> Result<ChatResponse> {
    let (engine, embedder) = search_engine(config).await?;
    let completion: Arc<dyn CompletionClient> =
        Arc::from(create_completion_client(&config.completion, &config.retry)?);
    let retriever = ChatRetriever::new(engine, embedder, completion, config.chat.clone());
    retriever.chat(request).await
}

/// Print search results to console
pub fn print_search_results(response: &SearchResponse) {
    if response.results.is_empty() {
        println!("No results for \"{}\"", response.query);
        return;
    }

    println!("\n🔍 Results for \"{}\"\n", response.query);
    for (i, result) in response.results.iter().enumerate() {
        println!(
            "{}. {} [{:.3}, {:?}]",
            i + 1,
            result.title,
            result.score,
            result.match_type
        );
        println!("   ID: {}", result.id);
        if let Some(doc_type) = &result.document_type {
            println!("   Type: {}", doc_type);
        }
        if !result.tags.is_empty() {
            println!("   Tags: {}", result.tags.join(", "));
        }
        let excerpt = result.excerpt.replace('\n', " ");
        println!("   {}", excerpt.trim());
        println!();
    }
}

pub fn print_chat_response(response: &ChatResponse) {
    println!("\n{}\n", response.reply);
    if response.sources.is_empty() {
        return;
    }
    println!("Sources:");
    for source in &response.sources {
        println!("  • {} ({}) [{:.3}]", source.title, source.id, source.score);
    }
}
