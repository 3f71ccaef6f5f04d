use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use diesel::prelude::*;
use diesel::sql_types::{Double, Integer, Jsonb, Text};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::llm::LLMProvider;
use crate::shared::outcome::Outcome;
use crate::shared::state::AppState;
use crate::shared::utils::DbPool;

const MAX_SEARCH_K: usize = 20;

/// A retrieved knowledge-base fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub content: String,
    pub source: Option<String>,
    pub page: Option<i64>,
    pub similarity: f64,
}

impl Snippet {
    pub fn new(content: &str, similarity: f64) -> Self {
        Self {
            content: content.to_string(),
            source: None,
            page: None,
            similarity: similarity.clamp(0.0, 1.0),
        }
    }
}

pub fn max_similarity(snippets: &[Snippet]) -> f64 {
    snippets.iter().map(|s| s.similarity).fold(0.0, f64::max)
}

/// Similarity search over the knowledge base. An empty result means "no matching
/// knowledge"; a degraded search reports `Outcome::Fallback` with an empty list.
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    async fn retrieve(&self, query: &str, k: usize, source_filter: Option<&str>) -> Outcome<Vec<Snippet>>;
}

#[derive(Debug, QueryableByName)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct MatchRow {
    #[diesel(sql_type = Text)]
    content: String,
    #[diesel(sql_type = Jsonb)]
    metadata: Value,
    #[diesel(sql_type = Double)]
    similarity: f64,
}

impl From<MatchRow> for Snippet {
    fn from(row: MatchRow) -> Self {
        let source = ["source", "file_name", "title"]
            .iter()
            .find_map(|key| row.metadata.get(*key).and_then(Value::as_str))
            .map(str::to_string);
        let page = row.metadata.get("page").and_then(|p| {
            p.as_i64()
                .or_else(|| p.as_str().and_then(|s| s.parse().ok()))
        });
        Self {
            content: row.content,
            source,
            page,
            similarity: row.similarity.clamp(0.0, 1.0),
        }
    }
}

fn vector_literal(embedding: &[f32]) -> String {
    let parts: Vec<String> = embedding.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(","))
}

/// pgvector-backed retriever calling the `match_documents` SQL function.
pub struct VectorRetriever {
    llm: Arc<dyn LLMProvider>,
    pool: DbPool,
}

impl VectorRetriever {
    pub fn new(llm: Arc<dyn LLMProvider>, pool: DbPool) -> Self {
        Self { llm, pool }
    }
}

#[async_trait]
impl KnowledgeRetriever for VectorRetriever {
    async fn retrieve(&self, query: &str, k: usize, source_filter: Option<&str>) -> Outcome<Vec<Snippet>> {
        if query.trim().is_empty() || k == 0 {
            return Outcome::Live(Vec::new());
        }

        let embedding = match self.llm.embed(query).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!("[KB] embedding failed, returning no snippets: {}", e);
                return Outcome::fallback(Vec::new(), format!("embedding failed: {}", e));
            }
        };

        let filter = match source_filter {
            Some(source_type) => json!({ "source_type": source_type }),
            None => json!({}),
        };
        let vector = vector_literal(&embedding);
        let pool = self.pool.clone();
        let limit = k.min(i32::MAX as usize) as i32;

        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| e.to_string())?;
            diesel::sql_query(
                "SELECT content, metadata, similarity FROM match_documents($1::vector, $2, $3)",
            )
            .bind::<Text, _>(vector)
            .bind::<Integer, _>(limit)
            .bind::<Jsonb, _>(filter)
            .load::<MatchRow>(&mut conn)
            .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| e.to_string())
        .and_then(|r| r);

        match result {
            Ok(rows) => {
                let mut snippets: Vec<Snippet> = rows.into_iter().map(Snippet::from).collect();
                snippets.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
                snippets.truncate(k);
                debug!(
                    "[KB] {} snippets, max similarity {:.3}",
                    snippets.len(),
                    max_similarity(&snippets)
                );
                Outcome::Live(snippets)
            }
            Err(e) => {
                warn!("[KB] vector search failed, returning no snippets: {}", e);
                Outcome::fallback(Vec::new(), format!("vector search failed: {}", e))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub k: Option<usize>,
    pub source_filter: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub snippets: Vec<Snippet>,
    pub max_similarity: f64,
    pub degraded: Option<String>,
}

pub async fn search_knowledge(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, (StatusCode, Json<Value>)> {
    if req.query.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, Json(json!({ "error": "query is required" }))));
    }
    let config = state.triage.config();
    let k = req.k.unwrap_or(config.retrieval_k).clamp(1, MAX_SEARCH_K);
    let filter = req.source_filter.as_deref().or(config.source_filter.as_deref());

    let outcome = state.retriever.retrieve(&req.query, k, filter).await;
    let degraded = outcome.fallback_reason().map(str::to_string);
    let snippets = outcome.into_value();
    Ok(Json(SearchResponse {
        max_similarity: max_similarity(&snippets),
        snippets,
        degraded,
    }))
}

pub fn configure_kb_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/ai/search", post(search_knowledge))
}
