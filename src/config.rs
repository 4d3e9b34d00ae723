use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::citations::gate::{default_references, DEFAULT_GATE_THRESHOLD};
use crate::citations::{AnswerGate, ReferencePhrase};

#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub answer_model: String,
    pub embedding_model: String,
    pub temperature: f32,
}

#[derive(Clone, Debug)]
pub struct TokenConfig {
    pub max_output_tokens: usize,
    pub chunk_target_tokens: usize,
    pub chunk_overlap_tokens: usize,
}

#[derive(Clone, Debug)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub top_sources_k: usize,
}

#[derive(Clone, Debug)]
pub struct GateConfig {
    pub threshold: f32,
    pub phrases_file: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub pdf_dir: PathBuf,
    pub ollama_base_url: String,
    pub qdrant_base_url: String,
    pub qdrant_collection: String,
    pub models: ModelConfig,
    pub tokens: TokenConfig,
    pub retrieval: RetrievalConfig,
    pub gate: GateConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let data_dir = env::var("COURSEBOT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        Self {
            bind_addr: env::var("COURSEBOT_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string()),
            data_dir,
            pdf_dir: env::var("COURSEBOT_PDF_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./courses")),
            ollama_base_url: env::var("OLLAMA_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:11434".to_string()),
            qdrant_base_url: env::var("QDRANT_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:6333".to_string()),
            qdrant_collection: env::var("QDRANT_COLLECTION")
                .unwrap_or_else(|_| "course_chunks".to_string()),
            models: ModelConfig {
                answer_model: env::var("ANSWER_MODEL").unwrap_or_else(|_| "llama3.1:8b".to_string()),
                embedding_model: env::var("EMBEDDING_MODEL")
                    .unwrap_or_else(|_| "mxbai-embed-large".to_string()),
                temperature: env_parse("ANSWER_TEMPERATURE", 0.3),
            },
            tokens: TokenConfig {
                max_output_tokens: env_parse("MAX_OUTPUT_TOKENS", 700),
                chunk_target_tokens: env_parse("CHUNK_TARGET_TOKENS", 350),
                chunk_overlap_tokens: env_parse("CHUNK_OVERLAP_TOKENS", 6),
            },
            retrieval: RetrievalConfig {
                top_k: env_parse("RETRIEVE_TOP_K", 4),
                top_sources_k: env_parse("TOP_SOURCES_K", 3),
            },
            gate: GateConfig {
                threshold: env_parse("GATE_THRESHOLD", DEFAULT_GATE_THRESHOLD),
                phrases_file: env::var("GATE_PHRASES_FILE").ok().map(PathBuf::from),
            },
        }
    }

    pub fn sqlite_dsn(&self) -> String {
        format!(
            "sqlite://{}",
            self.data_dir.join("coursebot.sqlite3").display()
        )
    }

    /// Builds the answer gate, reading reference phrases from
    /// `GATE_PHRASES_FILE` (a JSON array of `{label, phrase}`) when set.
    pub fn answer_gate(&self) -> Result<AnswerGate> {
        let references = match &self.gate.phrases_file {
            None => default_references(),
            Some(path) => {
                let raw = std::fs::read_to_string(path).with_context(|| {
                    format!("failed reading gate phrases from {}", path.display())
                })?;
                serde_json::from_str::<Vec<ReferencePhrase>>(&raw).with_context(|| {
                    format!("invalid gate phrases JSON in {}", path.display())
                })?
            }
        };

        Ok(AnswerGate::new(references, self.gate.threshold))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
