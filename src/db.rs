use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::{Chunk, IngestManifest, IngestStatus};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;
        Self::connect(&config.sqlite_dsn()).await
    }

    pub async fn connect(dsn: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(dsn)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                document TEXT NOT NULL,
                page INTEGER NOT NULL,
                content TEXT NOT NULL,
                token_count INTEGER NOT NULL,
                source_hash TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS manifests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                corpus_hash TEXT NOT NULL,
                created_at TEXT NOT NULL,
                chunk_count INTEGER NOT NULL,
                document_count INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            );

            CREATE TABLE IF NOT EXISTS ingest_jobs (
                job_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                stage TEXT NOT NULL,
                message TEXT,
                chunk_count INTEGER NOT NULL,
                document_count INTEGER NOT NULL,
                started_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Replaces the whole chunk table in one transaction.
    pub async fn replace_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        for chunk in chunks {
            insert_chunk_tx(&mut tx, chunk).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        let row = sqlx::query(
            r#"
            SELECT id, document, page, content, token_count, source_hash
            FROM chunks
            WHERE id = ?
            "#,
        )
        .bind(chunk_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_chunk))
    }

    /// Loads chunks in the order of `ids`; unknown ids are skipped.
    pub async fn get_chunks_by_ids(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, document, page, content, token_count, source_hash FROM chunks WHERE id IN (",
        );
        let mut separated = qb.separated(",");
        for id in ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");

        let rows: Vec<SqliteRow> = qb.build().fetch_all(&self.pool).await?;
        let mut chunks: Vec<Chunk> = rows.into_iter().map(row_to_chunk).collect();

        chunks.sort_by_key(|chunk| {
            ids.iter()
                .position(|id| id == &chunk.id)
                .unwrap_or(usize::MAX)
        });

        Ok(chunks)
    }

    pub async fn count_chunks(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    pub async fn record_manifest(&self, manifest: &IngestManifest) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO manifests (corpus_hash, created_at, chunk_count, document_count)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&manifest.corpus_hash)
        .bind(manifest.created_at.to_rfc3339())
        .bind(manifest.chunk_count)
        .bind(manifest.document_count)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn latest_manifest(&self) -> Result<Option<IngestManifest>> {
        let row = sqlx::query(
            r#"
            SELECT corpus_hash, created_at, chunk_count, document_count
            FROM manifests
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| IngestManifest {
            corpus_hash: r.get("corpus_hash"),
            created_at: parse_timestamp(&r.get::<String, _>("created_at")),
            chunk_count: r.get("chunk_count"),
            document_count: r.get("document_count"),
        }))
    }

    pub async fn create_session(&self) -> Result<String> {
        let session_id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO sessions (id, created_at) VALUES (?, ?)")
            .bind(&session_id)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(session_id)
    }

    pub async fn ensure_session(&self, session_id: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO sessions (id, created_at) VALUES (?, ?)")
            .bind(session_id)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn delete_session_messages(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM messages WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn save_message(&self, session_id: &str, role: &str, content: &str) -> Result<()> {
        self.ensure_session(session_id).await?;
        sqlx::query(
            "INSERT INTO messages (session_id, role, content, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(role)
        .bind(content)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// The last `limit` messages of a session, oldest first.
    pub async fn latest_messages(
        &self,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query(
            r#"
            SELECT role, content
            FROM messages
            WHERE session_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut out: Vec<(String, String)> = rows
            .into_iter()
            .map(|r| (r.get::<String, _>("role"), r.get::<String, _>("content")))
            .collect();
        out.reverse();
        Ok(out)
    }

    pub async fn upsert_ingest_status(&self, status: &IngestStatus) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ingest_jobs (job_id, status, stage, message, chunk_count, document_count, started_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                status = excluded.status,
                stage = excluded.stage,
                message = excluded.message,
                chunk_count = excluded.chunk_count,
                document_count = excluded.document_count,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&status.job_id)
        .bind(&status.status)
        .bind(&status.stage)
        .bind(&status.message)
        .bind(status.chunk_count)
        .bind(status.document_count)
        .bind(status.started_at.to_rfc3339())
        .bind(status.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_ingest_status(&self, job_id: &str) -> Result<Option<IngestStatus>> {
        let row = sqlx::query(
            r#"
            SELECT job_id, status, stage, message, chunk_count, document_count, started_at, updated_at
            FROM ingest_jobs
            WHERE job_id = ?
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| IngestStatus {
            job_id: r.get("job_id"),
            status: r.get("status"),
            stage: r.get("stage"),
            message: r.get("message"),
            chunk_count: r.get("chunk_count"),
            document_count: r.get("document_count"),
            started_at: parse_timestamp(&r.get::<String, _>("started_at")),
            updated_at: parse_timestamp(&r.get::<String, _>("updated_at")),
        }))
    }
}

async fn insert_chunk_tx(tx: &mut Transaction<'_, Sqlite>, chunk: &Chunk) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO chunks (id, document, page, content, token_count, source_hash)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&chunk.id)
    .bind(&chunk.document)
    .bind(chunk.page)
    .bind(&chunk.content)
    .bind(chunk.token_count)
    .bind(&chunk.source_hash)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn row_to_chunk(row: SqliteRow) -> Chunk {
    Chunk {
        id: row.get("id"),
        document: row.get("document"),
        page: row.get("page"),
        content: row.get("content"),
        token_count: row.get("token_count"),
        source_hash: row.get("source_hash"),
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
