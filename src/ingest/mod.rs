pub mod pdf;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::config::AppConfig;
use crate::db::Database;
use crate::models::{Chunk, IngestManifest, IngestRequest, IngestStatus, PageUnit};
use crate::ollama::OllamaClient;
use crate::qdrant_store::{QdrantPayload, QdrantPoint, QdrantStore};

const UPSERT_BATCH: usize = 64;

#[derive(Clone)]
pub struct Ingestor {
    config: AppConfig,
    db: Database,
    ollama: OllamaClient,
    qdrant: QdrantStore,
}

#[derive(Debug, Clone)]
pub struct IngestResult {
    pub chunk_count: i64,
    pub document_count: i64,
    pub skipped: bool,
}

impl Ingestor {
    pub fn new(config: AppConfig, db: Database, ollama: OllamaClient, qdrant: QdrantStore) -> Self {
        Self {
            config,
            db,
            ollama,
            qdrant,
        }
    }

    pub async fn ingest<F>(
        &self,
        job_id: &str,
        request: IngestRequest,
        mut progress: F,
    ) -> Result<IngestResult>
    where
        F: FnMut(IngestStatus) + Send,
    {
        let now = Utc::now();
        let mut status = IngestStatus {
            job_id: job_id.to_string(),
            status: "running".to_string(),
            stage: "listing_pdfs".to_string(),
            message: None,
            chunk_count: 0,
            document_count: 0,
            started_at: now,
            updated_at: now,
        };
        self.report(&mut status, &mut progress).await?;

        let pdf_dir = request
            .pdf_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| self.config.pdf_dir.clone());
        let dir_for_listing = pdf_dir.clone();
        let pdfs = tokio::task::spawn_blocking(move || list_pdfs(&dir_for_listing))
            .await
            .context("PDF listing task panicked")??;
        if pdfs.is_empty() {
            anyhow::bail!("no PDF files found in {}", pdf_dir.display());
        }
        status.document_count = pdfs.len() as i64;

        status.stage = "hashing_sources".to_string();
        self.report(&mut status, &mut progress).await?;
        let corpus_hash = corpus_sha256(&pdfs).await?;

        if !request.rebuild {
            if let Some(latest) = self.db.latest_manifest().await? {
                if latest.corpus_hash == corpus_hash && self.db.count_chunks().await? > 0 {
                    status.status = "completed".to_string();
                    status.stage = "skipped_unchanged".to_string();
                    status.message = Some("Course PDFs unchanged; skipped re-ingest.".to_string());
                    status.chunk_count = latest.chunk_count;
                    status.document_count = latest.document_count;
                    self.report(&mut status, &mut progress).await?;

                    return Ok(IngestResult {
                        chunk_count: latest.chunk_count,
                        document_count: latest.document_count,
                        skipped: true,
                    });
                }
            }
        }

        status.stage = "extracting_pdf".to_string();
        self.report(&mut status, &mut progress).await?;

        let mut units: Vec<PageUnit> = Vec::new();
        for path in &pdfs {
            let file_hash = file_sha256(path).await?;
            match pdf::extract_pdf_pages(path, &file_hash).await {
                Ok(mut pages) => {
                    tracing::info!("extracted {} pages from {}", pages.len(), path.display());
                    units.append(&mut pages);
                }
                Err(err) => {
                    tracing::error!("failed to extract {}: {err:#}", path.display());
                }
            }
        }

        status.stage = "chunking".to_string();
        self.report(&mut status, &mut progress).await?;

        let chunks = build_chunks(
            units,
            self.config.tokens.chunk_target_tokens,
            self.config.tokens.chunk_overlap_tokens,
        );
        if chunks.is_empty() {
            anyhow::bail!("no chunks generated from PDFs in {}", pdf_dir.display());
        }
        status.chunk_count = chunks.len() as i64;

        status.stage = "embedding_and_indexing".to_string();
        self.report(&mut status, &mut progress).await?;

        let mut points = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let embedding = self
                .ollama
                .embed(&self.config.models.embedding_model, &chunk.content)
                .await
                .with_context(|| {
                    format!("failed embedding for {} page {}", chunk.document, chunk.page)
                })?;

            points.push(QdrantPoint {
                id: chunk.id.clone(),
                vector: embedding,
                payload: QdrantPayload {
                    chunk_id: chunk.id.clone(),
                    document: chunk.document.clone(),
                    page: chunk.page,
                },
            });
        }

        if let Some(first) = points.first() {
            self.qdrant.recreate_collection(first.vector.len()).await?;
        }
        for batch in points.chunks(UPSERT_BATCH) {
            self.qdrant.upsert_points(batch).await?;
        }

        self.db.replace_chunks(&chunks).await?;

        let document_count = pdfs.len() as i64;
        self.db
            .record_manifest(&IngestManifest {
                corpus_hash,
                created_at: Utc::now(),
                chunk_count: chunks.len() as i64,
                document_count,
            })
            .await?;

        status.status = "completed".to_string();
        status.stage = "done".to_string();
        self.report(&mut status, &mut progress).await?;

        Ok(IngestResult {
            chunk_count: chunks.len() as i64,
            document_count,
            skipped: false,
        })
    }

    async fn report<F>(&self, status: &mut IngestStatus, progress: &mut F) -> Result<()>
    where
        F: FnMut(IngestStatus) + Send,
    {
        status.updated_at = Utc::now();
        progress(status.clone());
        self.db.upsert_ingest_status(status).await
    }
}

/// `.pdf` files directly inside `dir`, sorted by name.
pub fn list_pdfs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut pdfs = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("failed listing {}", dir.display()))?;
        let is_pdf = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.ends_with(".pdf"));
        if entry.file_type().is_file() && is_pdf {
            pdfs.push(entry.into_path());
        }
    }

    if pdfs.is_empty() && !dir.is_dir() {
        anyhow::bail!("PDF folder does not exist: {}", dir.display());
    }

    pdfs.sort();
    Ok(pdfs)
}

fn build_chunks(units: Vec<PageUnit>, target_tokens: usize, overlap_tokens: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let target_tokens = target_tokens.max(1);
    let step = target_tokens.saturating_sub(overlap_tokens).max(1);

    for unit in units {
        let tokens: Vec<&str> = unit.content.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }

        let mut start = 0;
        loop {
            let end = (start + target_tokens).min(tokens.len());
            chunks.push(Chunk {
                id: Uuid::new_v4().to_string(),
                document: unit.document.clone(),
                page: unit.page,
                content: tokens[start..end].join(" "),
                token_count: (end - start) as i64,
                source_hash: unit.source_hash.clone(),
            });

            if end == tokens.len() {
                break;
            }
            start += step;
        }
    }

    chunks
}

async fn corpus_sha256(paths: &[PathBuf]) -> Result<String> {
    let mut hasher = Sha256::new();
    for path in paths {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed reading file for hash: {}", path.display()))?;
        hasher.update(pdf::document_name(path).as_bytes());
        hasher.update(&bytes);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

async fn file_sha256(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed reading file for hash: {}", path.display()))?;

    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(document: &str, page: u32, words: usize) -> PageUnit {
        PageUnit {
            document: document.to_string(),
            page,
            content: (1..=words).map(|n| format!("word{n}")).collect::<Vec<_>>().join(" "),
            source_hash: "h".to_string(),
        }
    }

    #[test]
    fn chunking_splits_long_pages_with_overlap() {
        let chunks = build_chunks(vec![unit("Cours.pdf", 4, 120)], 50, 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.document == "Cours.pdf" && c.page == 4));
        assert!(chunks[1].content.starts_with("word41 "));
        assert!(chunks[2].content.ends_with("word120"));
    }

    #[test]
    fn short_pages_stay_single_chunk_and_empty_pages_vanish() {
        let chunks = build_chunks(
            vec![unit("A.pdf", 1, 12), unit("A.pdf", 2, 0), unit("B.pdf", 7, 3)],
            50,
            10,
        );
        assert_eq!(chunks.len(), 2);
        assert_eq!((chunks[0].document.as_str(), chunks[0].page), ("A.pdf", 1));
        assert_eq!((chunks[1].document.as_str(), chunks[1].page), ("B.pdf", 7));
        assert_eq!(chunks[1].token_count, 3);
    }

    #[test]
    fn lists_only_top_level_pdfs_sorted() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("b.pdf"), b"%PDF").expect("write");
        std::fs::write(dir.path().join("a.pdf"), b"%PDF").expect("write");
        std::fs::write(dir.path().join("notes.txt"), b"x").expect("write");
        std::fs::create_dir(dir.path().join("nested")).expect("mkdir");
        std::fs::write(dir.path().join("nested").join("c.pdf"), b"%PDF").expect("write");

        let pdfs = list_pdfs(dir.path()).expect("list");
        let names: Vec<String> = pdfs.iter().map(|p| pdf::document_name(p)).collect();
        assert_eq!(names, vec!["a.pdf", "b.pdf"]);
    }

    #[test]
    fn missing_pdf_folder_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(list_pdfs(&dir.path().join("absent")).is_err());
    }
}
