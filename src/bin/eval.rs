use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::Semaphore;

use coursebot::chat::ChatService;
use coursebot::citations::gate::cosine_distance;
use coursebot::config::AppConfig;
use coursebot::db::Database;
use coursebot::models::ChatRequest;
use coursebot::ollama::OllamaClient;
use coursebot::qdrant_store::QdrantStore;
use coursebot::retrieval::Retriever;

#[derive(Parser, Debug)]
#[command(name = "eval")]
#[command(about = "Compare answers with reference answers and measure source attachment")]
struct Cli {
    /// Tab-separated `question<TAB>expected_answer` lines; `#` starts a comment.
    #[arg(long, default_value = "eval/questions.tsv")]
    file: String,
    #[arg(long, default_value_t = false)]
    verbose: bool,
}

#[derive(Debug, PartialEq)]
struct EvalCase {
    question: String,
    expected: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::from_env();

    let gate = config.answer_gate()?;
    let db = Database::new(&config).await?;
    let ollama = OllamaClient::new(config.ollama_base_url.clone());
    let qdrant = QdrantStore::new(
        config.qdrant_base_url.clone(),
        config.qdrant_collection.clone(),
    );
    let retriever = Retriever::new(
        db.clone(),
        qdrant,
        ollama.clone(),
        config.models.embedding_model.clone(),
    );
    let embedding_model = config.models.embedding_model.clone();

    let chat = ChatService::new(
        config,
        db,
        ollama.clone(),
        retriever,
        gate,
        Arc::new(Semaphore::new(1)),
    );

    let raw = std::fs::read_to_string(&cli.file)
        .with_context(|| format!("failed opening {}", cli.file))?;
    let cases = parse_cases(&raw).with_context(|| format!("invalid eval file {}", cli.file))?;
    if cases.is_empty() {
        anyhow::bail!("no questions found in {}", cli.file);
    }

    let mut distances = Vec::with_capacity(cases.len());
    let mut attached = 0usize;

    for (idx, case) in cases.iter().enumerate() {
        let request = ChatRequest {
            session_id: format!("eval-{}", uuid::Uuid::new_v4()),
            question: case.question.clone(),
            verbose: false,
        };

        let answer = chat
            .answer(request)
            .await
            .with_context(|| format!("failed eval question {}", idx + 1))?;
        if answer.sources_attached {
            attached += 1;
        }

        let body = answer_body(&answer.answer_markdown);
        let answer_vec = ollama.embed(&embedding_model, body).await?;
        let expected_vec = ollama.embed(&embedding_model, &case.expected).await?;
        let distance = cosine_distance(&answer_vec, &expected_vec)?;
        distances.push(distance);

        if cli.verbose {
            println!("--- {} ---", idx + 1);
            println!("Q: {}", case.question);
            println!("A: {}", body.replace('\n', " "));
            println!("Distance: {distance:.3}  Sources: {}", answer.sources_attached);
            println!();
        }
    }

    println!("Eval questions: {}", cases.len());
    println!("Mean cosine distance: {:.3}", mean(&distances));
    println!(
        "Source attach rate: {:.1}%",
        ratio(attached, cases.len()) * 100.0
    );

    Ok(())
}

fn parse_cases(raw: &str) -> Result<Vec<EvalCase>> {
    let mut cases = Vec::new();

    for (idx, line) in raw.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let (question, expected) = trimmed
            .split_once('\t')
            .with_context(|| format!("line {} has no tab separator", idx + 1))?;
        cases.push(EvalCase {
            question: question.trim().to_string(),
            expected: expected.trim().to_string(),
        });
    }

    Ok(cases)
}

/// The answer without its appended sources block.
fn answer_body(markdown: &str) -> &str {
    markdown
        .split_once("\n\nSources:\n")
        .map_or(markdown, |(body, _)| body)
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

fn ratio(n: usize, d: usize) -> f32 {
    if d == 0 {
        return 0.0;
    }
    n as f32 / d as f32
}
