use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub chunk_id: String,
    pub score: f32,
}

#[derive(Clone)]
pub struct QdrantStore {
    client: Client,
    base_url: String,
    collection: String,
    known_vector_size: Arc<RwLock<Option<usize>>>,
}

impl QdrantStore {
    pub fn new(base_url: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            collection: collection.into(),
            known_vector_size: Arc::new(RwLock::new(None)),
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    pub async fn recreate_collection(&self, vector_size: usize) -> Result<()> {
        let _ = self.client.delete(self.collection_url()).send().await;
        *self.known_vector_size.write().await = None;

        self.ensure_collection(vector_size).await
    }

    pub async fn ensure_collection(&self, vector_size: usize) -> Result<()> {
        if *self.known_vector_size.read().await == Some(vector_size) {
            return Ok(());
        }

        let payload = json!({
            "vectors": {
                "size": vector_size,
                "distance": "Cosine"
            }
        });

        self.client
            .put(self.collection_url())
            .json(&payload)
            .send()
            .await
            .context("failed to contact qdrant while creating collection")?
            .error_for_status()
            .context("qdrant failed to create collection")?;

        *self.known_vector_size.write().await = Some(vector_size);
        Ok(())
    }

    pub async fn upsert_points(&self, points: &[QdrantPoint]) -> Result<()> {
        let Some(first) = points.first() else {
            return Ok(());
        };
        self.ensure_collection(first.vector.len()).await?;

        let url = format!("{}/points?wait=true", self.collection_url());
        self.client
            .put(url)
            .json(&json!({ "points": points }))
            .send()
            .await
            .context("failed to contact qdrant during upsert")?
            .error_for_status()
            .context("qdrant upsert returned non-success status")?;

        Ok(())
    }

    pub async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<VectorHit>> {
        if vector.is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        let url = format!("{}/points/search", self.collection_url());
        let body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .context("failed to contact qdrant during search")?
            .error_for_status()
            .context("qdrant search returned non-success status")?
            .json::<QdrantSearchResponse>()
            .await
            .context("failed to decode qdrant search response")?;

        Ok(hits_from_response(response))
    }
}

fn hits_from_response(response: QdrantSearchResponse) -> Vec<VectorHit> {
    response
        .result
        .into_iter()
        .filter_map(|point| {
            let payload = point.payload?;
            Some(VectorHit {
                chunk_id: payload.chunk_id,
                score: point.score,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct QdrantPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: QdrantPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QdrantPayload {
    pub chunk_id: String,
    pub document: String,
    pub page: u32,
}

#[derive(Debug, Deserialize)]
struct QdrantSearchResponse {
    result: Vec<QdrantResultPoint>,
}

#[derive(Debug, Deserialize)]
struct QdrantResultPoint {
    score: f32,
    payload: Option<QdrantPayload>,
}
