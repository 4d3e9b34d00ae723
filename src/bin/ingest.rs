use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use coursebot::config::AppConfig;
use coursebot::db::Database;
use coursebot::ingest::Ingestor;
use coursebot::models::IngestRequest;
use coursebot::ollama::OllamaClient;
use coursebot::qdrant_store::QdrantStore;

#[derive(Parser, Debug)]
#[command(name = "ingest")]
#[command(about = "Index a folder of course PDFs page by page")]
struct Cli {
    /// Folder of course PDFs; defaults to COURSEBOT_PDF_DIR.
    #[arg(long)]
    pdf_dir: Option<String>,
    #[arg(long, default_value_t = false)]
    rebuild: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = AppConfig::from_env();
    tokio::fs::create_dir_all(&config.data_dir).await?;

    let db = Database::new(&config).await?;
    let ollama = OllamaClient::new(config.ollama_base_url.clone());
    let qdrant = QdrantStore::new(
        config.qdrant_base_url.clone(),
        config.qdrant_collection.clone(),
    );
    let ingestor = Ingestor::new(config, db, ollama, qdrant);

    let req = IngestRequest {
        pdf_dir: cli.pdf_dir,
        rebuild: cli.rebuild,
    };

    let job_id = format!("cli-{}", uuid::Uuid::new_v4());
    let result = ingestor
        .ingest(&job_id, req, |status| {
            println!(
                "[{}] {} documents={} chunks={} {}",
                status.status,
                status.stage,
                status.document_count,
                status.chunk_count,
                status.message.unwrap_or_default()
            );
        })
        .await?;

    println!(
        "Ingest complete. skipped={} documents={} chunks={}",
        result.skipped, result.document_count, result.chunk_count
    );

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
