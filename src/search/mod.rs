//! Hybrid full-text + vector search over ready documents
//!
//! Full-text rank comes from FTS5 `bm25`, normalised against the best hit in
//! the candidate set. Vector rank is the best cosine similarity between the
//! query embedding and any chunk of the document, clamped to [0, 1]. The two
//! are combined as a weighted sum; documents scoring 0 are dropped.

use crate::config::SearchConfig;
use crate::embed::{embed_query, Embedder};
use crate::error::{Error, Result};
use crate::meta::{DocumentStatus, Registry};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Separator for tag names packed by `group_concat`
const TAG_SEPARATOR: char = '\u{1f}';

/// Search request as accepted over HTTP
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    #[serde(default)]
    pub query: String,
    pub match_count: Option<usize>,
    pub fulltext_weight: Option<f32>,
    pub vector_weight: Option<f32>,
    pub filter_document_type: Option<String>,
    pub filter_tags: Option<Vec<String>>,
}

/// Fully resolved search parameters
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub query: String,
    /// Skips the vector signal when absent
    pub query_embedding: Option<Vec<f32>>,
    pub fulltext_weight: f32,
    pub vector_weight: f32,
    pub match_count: usize,
    pub document_type: Option<String>,
    /// Match documents carrying at least one of these
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Hybrid,
    Fulltext,
    Vector,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub excerpt: String,
    pub score: f32,
    pub match_type: MatchType,
    pub document_type: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub query: String,
}

#[derive(Debug, FromRow)]
struct Candidate {
    id: String,
    title: Option<String>,
    original_filename: String,
    document_type: Option<String>,
    excerpt: String,
    tags: Option<String>,
}

/// Reject an empty query before any capability is called
pub fn validate_query(query: &str) -> Result<&str> {
    let query = query.trim();
    if query.is_empty() {
        return Err(Error::Validation("Query must not be empty".to_string()));
    }
    Ok(query)
}

/// FTS5 MATCH expression: every term as a quoted prefix, all required
pub fn fts_match_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"*", t))
        .collect();
    (!terms.is_empty()).then(|| terms.join(" AND "))
}

/// Cosine similarity; None for mismatched lengths or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

fn check_weight(name: &str, weight: f32) -> Result<f32> {
    if !(0.0..=1.0).contains(&weight) {
        return Err(Error::Validation(format!(
            "{} must be between 0 and 1, got {}",
            name, weight
        )));
    }
    Ok(weight)
}

#[derive(Clone)]
pub struct HybridSearchEngine {
    registry: Registry,
    embedder: Option<Arc<dyn Embedder>>,
    config: SearchConfig,
}

impl HybridSearchEngine {
    pub fn new(registry: Registry, embedder: Option<Arc<dyn Embedder>>, config: SearchConfig) -> Self {
        Self {
            registry,
            embedder,
            config,
        }
    }

    /// Resolve a request against configured defaults, embedding the query
    /// only when the vector signal is weighted
    pub async fn search_request(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let query = validate_query(&request.query)?.to_string();
        let vector_weight = request.vector_weight.unwrap_or(self.config.vector_weight);

        let query_embedding = match &self.embedder {
            Some(embedder) if vector_weight > 0.0 => Some(embed_query(embedder.as_ref(), &query).await?),
            _ => None,
        };

        let params = SearchParams {
            query: query.clone(),
            query_embedding,
            fulltext_weight: request.fulltext_weight.unwrap_or(self.config.fulltext_weight),
            vector_weight,
            match_count: request.match_count.unwrap_or(self.config.match_count),
            document_type: request.filter_document_type.clone(),
            tags: request.filter_tags.clone().unwrap_or_default(),
        };

        let results = self.search(&params).await?;
        Ok(SearchResponse { results, query })
    }

    pub async fn search(&self, params: &SearchParams) -> Result<Vec<SearchResult>> {
        let query = validate_query(&params.query)?;
        let fulltext_weight = check_weight("fulltextWeight", params.fulltext_weight)?;
        let vector_weight = check_weight("vectorWeight", params.vector_weight)?;
        if params.match_count == 0 {
            return Err(Error::Validation("matchCount must be positive".to_string()));
        }

        let candidates = self.candidates(params).await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let fulltext = if fulltext_weight > 0.0 {
            self.fulltext_ranks(query, &candidates).await?
        } else {
            HashMap::new()
        };

        let vector = match &params.query_embedding {
            Some(embedding) if vector_weight > 0.0 && embedding.iter().any(|v| *v != 0.0) => {
                self.vector_ranks(embedding).await?
            }
            _ => HashMap::new(),
        };

        let mut results: Vec<SearchResult> = candidates
            .into_iter()
            .filter_map(|c| {
                let text_part = fulltext_weight * fulltext.get(&c.id).copied().unwrap_or(0.0);
                let vector_part = vector_weight * vector.get(&c.id).copied().unwrap_or(0.0);
                let score = text_part + vector_part;
                if score <= 0.0 {
                    return None;
                }
                let match_type = match (text_part > 0.0, vector_part > 0.0) {
                    (true, true) => MatchType::Hybrid,
                    (true, false) => MatchType::Fulltext,
                    _ => MatchType::Vector,
                };
                let tags = c
                    .tags
                    .map(|t| t.split(TAG_SEPARATOR).map(str::to_string).collect())
                    .unwrap_or_default();
                Some(SearchResult {
                    title: c.title.unwrap_or(c.original_filename),
                    id: c.id,
                    excerpt: c.excerpt,
                    score,
                    match_type,
                    document_type: c.document_type,
                    tags,
                })
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(params.match_count);

        debug!("Search {:?} -> {} results", query, results.len());
        Ok(results)
    }

    /// Ready documents passing the type and tag filters
    async fn candidates(&self, params: &SearchParams) -> Result<Vec<Candidate>> {
        let mut sql = format!(
            r#"
            SELECT d.id, d.title, d.original_filename, d.document_type,
                   substr(coalesce(d.ocr_text, ''), 1, ?) AS excerpt,
                   (SELECT group_concat(t.name, char(31))
                      FROM document_tags dt JOIN tags t ON t.id = dt.tag_id
                     WHERE dt.document_id = d.id) AS tags
            FROM documents d
            WHERE d.status = '{}'
            "#,
            DocumentStatus::Ready.as_str()
        );
        if params.document_type.is_some() {
            sql.push_str(" AND d.document_type = ?");
        }
        if !params.tags.is_empty() {
            let placeholders = vec!["?"; params.tags.len()].join(", ");
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM document_tags dt JOIN tags t ON t.id = dt.tag_id \
                 WHERE dt.document_id = d.id AND t.name COLLATE NOCASE IN ({}))",
                placeholders
            ));
        }

        let mut query = sqlx::query_as::<_, Candidate>(&sql).bind(self.config.excerpt_chars as i64);
        if let Some(document_type) = &params.document_type {
            query = query.bind(document_type);
        }
        for tag in &params.tags {
            query = query.bind(tag.trim());
        }
        Ok(query.fetch_all(self.registry.pool()).await?)
    }

    /// `-bm25` per candidate id, normalised against the best candidate hit
    async fn fulltext_ranks(
        &self,
        query: &str,
        candidates: &[Candidate],
    ) -> Result<HashMap<String, f32>> {
        let Some(expression) = fts_match_expression(query) else {
            return Ok(HashMap::new());
        };

        let rows: Vec<(String, f64)> = sqlx::query_as(
            r#"
            SELECT d.id, -bm25(documents_fts) AS rank
            FROM documents_fts
            JOIN documents d ON d.doc_no = documents_fts.rowid
            WHERE documents_fts MATCH ? AND d.status = 'ready'
            "#,
        )
        .bind(&expression)
        .fetch_all(self.registry.pool())
        .await?;

        let wanted: HashSet<&str> = candidates.iter().map(|c| c.id.as_str()).collect();
        let rows: Vec<(String, f64)> = rows
            .into_iter()
            .filter(|(id, _)| wanted.contains(id.as_str()))
            .collect();

        let best = rows.iter().map(|(_, r)| *r).fold(0.0f64, f64::max);
        if best <= 0.0 {
            return Ok(HashMap::new());
        }
        Ok(rows
            .into_iter()
            .filter(|(_, r)| *r > 0.0)
            .map(|(id, r)| (id, (r / best) as f32))
            .collect())
    }

    /// Best-chunk cosine per document id, clamped to [0, 1]
    async fn vector_ranks(&self, embedding: &[f32]) -> Result<HashMap<String, f32>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT e.document_id, e.embedding
            FROM document_embeddings e
            JOIN documents d ON d.id = e.document_id
            WHERE d.status = 'ready'
            "#,
        )
        .fetch_all(self.registry.pool())
        .await?;

        let mut ranks: HashMap<String, f32> = HashMap::new();
        let mut mismatched = 0usize;
        for (document_id, raw) in rows {
            let vector: Vec<f32> = serde_json::from_str(&raw)?;
            let Some(similarity) = cosine_similarity(embedding, &vector) else {
                mismatched += 1;
                continue;
            };
            let similarity = similarity.clamp(0.0, 1.0);
            let best = ranks.entry(document_id).or_insert(0.0);
            if similarity > *best {
                *best = similarity;
            }
        }
        if mismatched > 0 {
            warn!(
                "Skipped {} stored chunks whose embedding does not match the query dimension",
                mismatched
            );
        }
        Ok(ranks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::tests::{sample_document, setup_test_db};
    use crate::meta::Source;
    use tempfile::TempDir;

    /// Insert a ready document with one chunk embedding
    async fn seed(
        db: &Registry,
        title: &str,
        text: &str,
        document_type: &str,
        embedding: Vec<f32>,
    ) -> String {
        let doc = sample_document(text);
        db.insert_document(&doc).await.unwrap();
        db.begin_processing(&doc.id).await.unwrap();
        db.complete_ocr(&doc.id, text, 1).await.unwrap();
        db.complete_extraction(&doc.id, title, document_type, None)
            .await
            .unwrap();
        db.complete_embedding(&doc.id, &[(text.to_string(), embedding)])
            .await
            .unwrap();
        doc.id
    }

    async fn seeded() -> (HybridSearchEngine, Vec<String>, TempDir) {
        let (db, tmp) = setup_test_db().await;
        let ids = vec![
            seed(&db, "Stromrechnung", "Stadtwerke Stromrechnung für März", "invoice", vec![1.0, 0.0, 0.0]).await,
            seed(&db, "Mietvertrag", "Mietvertrag für die Wohnung in Köln", "contract", vec![0.0, 1.0, 0.0]).await,
            seed(&db, "Kontoauszug", "Kontoauszug der Sparkasse Januar", "statement", vec![0.0, 0.0, 1.0]).await,
        ];
        let engine = HybridSearchEngine::new(db, None, SearchConfig::default());
        (engine, ids, tmp)
    }

    fn params(query: &str) -> SearchParams {
        SearchParams {
            query: query.to_string(),
            query_embedding: None,
            fulltext_weight: 0.4,
            vector_weight: 0.6,
            match_count: 20,
            document_type: None,
            tags: Vec::new(),
        }
    }

    #[test]
    fn test_fts_expression() {
        assert_eq!(
            fts_match_expression("Strom, März!").as_deref(),
            Some("\"Strom\"* AND \"März\"*")
        );
        assert!(fts_match_expression("  ?! ").is_none());
    }

    #[test]
    fn test_cosine() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]).unwrap() - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap().abs() < 1e-6);
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).is_none());
        assert!(cosine_similarity(&[1.0], &[1.0, 0.0]).is_none());
    }

    #[tokio::test]
    async fn test_fulltext_only_with_zero_embedding() {
        let (engine, ids, _tmp) = seeded().await;
        let mut p = params("Mietvertrag");
        p.vector_weight = 0.0;
        p.query_embedding = Some(vec![0.0, 0.0, 0.0]);

        let results = engine.search(&p).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, ids[1]);
        assert_eq!(results[0].match_type, MatchType::Fulltext);
        assert!((results[0].score - 0.4).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_prefix_and_diacritics() {
        let (engine, ids, _tmp) = seeded().await;
        let results = engine.search(&params("koln")).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, ids[1]);

        let results = engine.search(&params("Strom")).await.unwrap();
        assert_eq!(results[0].id, ids[0]);
    }

    #[tokio::test]
    async fn test_hybrid_combines_signals() {
        let (engine, ids, _tmp) = seeded().await;
        let mut p = params("Kontoauszug");
        p.query_embedding = Some(vec![0.0, 0.2, 1.0]);

        let results = engine.search(&p).await.unwrap();
        assert_eq!(results[0].id, ids[2]);
        assert_eq!(results[0].match_type, MatchType::Hybrid);
        // Mietvertrag only matches through its vector
        let vector_only = results.iter().find(|r| r.id == ids[1]).unwrap();
        assert_eq!(vector_only.match_type, MatchType::Vector);
        // Stromrechnung is orthogonal and shares no terms
        assert!(results.iter().all(|r| r.id != ids[0]));
    }

    #[tokio::test]
    async fn test_filters() {
        let (engine, ids, _tmp) = seeded().await;
        let tag = engine
            .registry
            .find_or_create_tag("Wohnen", None)
            .await
            .unwrap();
        engine
            .registry
            .link_tag(&ids[1], &tag.id, Source::Manual, None)
            .await
            .unwrap();

        let mut p = params("für");
        let results = engine.search(&p).await.unwrap();
        assert_eq!(results.len(), 2);

        p.document_type = Some("invoice".to_string());
        let results = engine.search(&p).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, ids[0]);

        p.document_type = None;
        p.tags = vec!["wohnen".to_string(), "Steuer".to_string()];
        let results = engine.search(&p).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, ids[1]);
        assert_eq!(results[0].tags, vec!["Wohnen"]);
    }

    #[tokio::test]
    async fn test_filtered_top_hit_gets_full_fulltext_weight() {
        let (db, _tmp) = setup_test_db().await;
        seed(
            &db,
            "Stromrechnung",
            "Strom Strom Strom Strom Strom Stromzähler Strom",
            "invoice",
            vec![1.0, 0.0],
        )
        .await;
        let contract = seed(
            &db,
            "Stromvertrag",
            "Vertrag über die Lieferung von Strom an die Wohnung in Köln",
            "contract",
            vec![0.0, 1.0],
        )
        .await;
        let engine = HybridSearchEngine::new(db, None, SearchConfig::default());

        let mut p = params("Strom");
        p.vector_weight = 0.0;
        p.document_type = Some("contract".to_string());
        let results = engine.search(&p).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, contract);
        assert!((results[0].score - 0.4).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_non_ready_documents_are_hidden() {
        let (engine, _ids, _tmp) = seeded().await;
        let doc = sample_document("pending");
        engine.registry.insert_document(&doc).await.unwrap();
        engine.registry.begin_processing(&doc.id).await.unwrap();
        engine
            .registry
            .complete_ocr(&doc.id, "Mietvertrag Entwurf", 1)
            .await
            .unwrap();

        let results = engine.search(&params("Mietvertrag")).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let (engine, _ids, _tmp) = seeded().await;
        let err = engine.search(&params("   ")).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("Query"));
    }

    #[tokio::test]
    async fn test_excerpt_is_bounded() {
        let (db, _tmp) = setup_test_db().await;
        let long = format!("Versicherung {}", "ä".repeat(400));
        seed(&db, "Police", &long, "other", vec![1.0]).await;
        let engine = HybridSearchEngine::new(db, None, SearchConfig::default());

        let results = engine.search(&params("Versicherung")).await.unwrap();
        assert_eq!(results[0].excerpt.chars().count(), 300);
    }
}
