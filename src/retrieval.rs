use std::collections::HashMap;

use anyhow::Result;

use crate::db::Database;
use crate::models::RetrievalResult;
use crate::ollama::OllamaClient;
use crate::qdrant_store::{QdrantStore, VectorHit};

#[derive(Clone)]
pub struct Retriever {
    db: Database,
    qdrant: QdrantStore,
    ollama: OllamaClient,
    embedding_model: String,
}

impl Retriever {
    pub fn new(
        db: Database,
        qdrant: QdrantStore,
        ollama: OllamaClient,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            db,
            qdrant,
            ollama,
            embedding_model: embedding_model.into(),
        }
    }

    /// The `top_k` chunks closest to `query`, best first.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievalResult>> {
        if query.trim().is_empty() || top_k == 0 {
            return Ok(vec![]);
        }

        let embedding = self.ollama.embed(&self.embedding_model, query).await?;
        let hits = self.qdrant.search(&embedding, top_k).await?;
        tracing::debug!("qdrant returned {} hits", hits.len());

        let ids: Vec<String> = hits.iter().map(|hit| hit.chunk_id.clone()).collect();
        let chunks = self.db.get_chunks_by_ids(&ids).await?;

        Ok(attach_scores(&hits, chunks))
    }
}

fn attach_scores(hits: &[VectorHit], chunks: Vec<crate::models::Chunk>) -> Vec<RetrievalResult> {
    let scores: HashMap<&str, f32> = hits
        .iter()
        .map(|hit| (hit.chunk_id.as_str(), hit.score))
        .collect();

    chunks
        .into_iter()
        .map(|chunk| {
            let score = scores.get(chunk.id.as_str()).copied().unwrap_or(0.0);
            RetrievalResult { chunk, score }
        })
        .collect()
}
