use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use taskmesh_core::{MeshError, MeshResult};
use tokio::sync::RwLock;

/// One scored item returned by the retrieval collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredItem {
    /// Item identifier.
    pub id: String,
    /// Item content.
    pub content: String,
    /// Relevance score, higher is better.
    pub score: f32,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// The retrieval collaborator seam.
///
/// The retrieval worker delegates here; production deployments implement
/// this against their search service.
#[async_trait::async_trait]
pub trait Retriever: Send + Sync {
    /// Returns the `top_k` most relevant items for `query`, best first.
    async fn retrieve(&self, query: &str, top_k: usize) -> MeshResult<Vec<ScoredItem>>;
}

/// A document held by the in-memory retriever.
#[derive(Debug, Clone)]
struct Document {
    id: String,
    content: String,
    terms: Vec<String>,
}

/// In-memory [`Retriever`] using brute-force term overlap.
/// Suitable for tests and small corpora.
#[derive(Default)]
pub struct KeywordRetriever {
    documents: RwLock<Vec<Document>>,
}

fn terms_of(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

impl KeywordRetriever {
    /// Creates an empty retriever.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a document to the corpus.
    pub async fn add_document(&self, id: impl Into<String>, content: impl Into<String>) {
        let content = content.into();
        let terms = terms_of(&content);
        self.documents.write().await.push(Document {
            id: id.into(),
            content,
            terms,
        });
    }
}

#[async_trait::async_trait]
impl Retriever for KeywordRetriever {
    async fn retrieve(&self, query: &str, top_k: usize) -> MeshResult<Vec<ScoredItem>> {
        let query_terms = terms_of(query);
        if query_terms.is_empty() {
            return Err(MeshError::Llm("empty retrieval query".to_string()));
        }

        let documents = self.documents.read().await;
        let mut scored: Vec<ScoredItem> = documents
            .iter()
            .filter_map(|doc| {
                let hits = query_terms
                    .iter()
                    .filter(|t| doc.terms.contains(*t))
                    .count();
                if hits == 0 {
                    return None;
                }
                Some(ScoredItem {
                    id: doc.id.clone(),
                    content: doc.content.clone(),
                    score: hits as f32 / query_terms.len() as f32,
                    metadata: HashMap::new(),
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        Ok(scored)
    }
}
