use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::citations::{NavigationState, OrganizedSources};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub document: String,
    pub page: u32,
    pub content: String,
    pub token_count: i64,
    pub source_hash: String,
}

/// The text of one PDF page, before chunking.
#[derive(Debug, Clone)]
pub struct PageUnit {
    pub document: String,
    pub page: u32,
    pub content: String,
    pub source_hash: String,
}

#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourcePreview {
    pub document: String,
    pub passage: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatAnswer {
    pub answer_markdown: String,
    pub sources_attached: bool,
    pub sources: Option<String>,
    pub documents: OrganizedSources,
    pub top_sources: Vec<SourcePreview>,
    pub latency_ms: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestManifest {
    pub corpus_hash: String,
    pub created_at: DateTime<Utc>,
    pub chunk_count: i64,
    pub document_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub pdf_dir: Option<String>,
    #[serde(default)]
    pub rebuild: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub job_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestStatus {
    pub job_id: String,
    pub status: String,
    pub stage: String,
    pub message: Option<String>,
    pub chunk_count: i64,
    pub document_count: i64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub question: String,
    #[serde(default = "default_true")]
    pub verbose: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    pub session_id: Option<String>,
    pub reset: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum NavigateRequest {
    SelectDocument { document: String },
    Next,
    Previous,
    Jump { page: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewerDocument {
    pub document: String,
    pub ranges: Vec<String>,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewerResponse {
    pub documents: Vec<ViewerDocument>,
    pub state: NavigationState,
    pub min_page: Option<u32>,
    pub max_page: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedPage {
    pub document: String,
    pub page: u32,
    pub png_base64: String,
}

fn default_true() -> bool {
    true
}
