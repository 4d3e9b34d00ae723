use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use anyhow::{Context, Result};
use regex::Regex;
use tokio::sync::{RwLock, Semaphore};

use crate::citations::{
    dedupe, AnswerGate, Citation, CitationError, EmbeddingSimilarity,
    OrganizedSources,
};
use crate::config::AppConfig;
use crate::db::Database;
use crate::models::{ChatAnswer, ChatRequest, RetrievalResult, SourcePreview};
use crate::ollama::{ChatMessage, OllamaClient};
use crate::retrieval::Retriever;

pub const NO_ANSWER_MESSAGE: &str =
    "Aucune réponse pertinente n'a été générée pour votre question.";
pub const NO_SOURCES_MESSAGE: &str = "Aucune source pertinente trouvée.";
const EMPTY_SOURCES_MESSAGE: &str = "Aucune source fournie.";

const HISTORY_LIMIT: i64 = 8;
const PREVIEW_CHARS: usize = 400;

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^```[a-zA-Z]*\n(.*)\n```$").expect("code fence pattern compiles")
});

#[derive(Clone)]
pub struct ChatService {
    config: AppConfig,
    db: Database,
    ollama: OllamaClient,
    retriever: Retriever,
    gate: AnswerGate,
    generation_limit: Arc<Semaphore>,
    phrase_vectors: Arc<RwLock<HashMap<String, Vec<f32>>>>,
}

impl ChatService {
    pub fn new(
        config: AppConfig,
        db: Database,
        ollama: OllamaClient,
        retriever: Retriever,
        gate: AnswerGate,
        generation_limit: Arc<Semaphore>,
    ) -> Self {
        Self {
            config,
            db,
            ollama,
            retriever,
            gate,
            generation_limit,
            phrase_vectors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn answer(&self, request: ChatRequest) -> Result<ChatAnswer> {
        let started = Instant::now();

        self.db.ensure_session(&request.session_id).await?;
        let history = self
            .db
            .latest_messages(&request.session_id, HISTORY_LIMIT)
            .await?;
        self.db
            .save_message(&request.session_id, "user", &request.question)
            .await?;

        let hits = self
            .retriever
            .retrieve(&request.question, self.config.retrieval.top_k)
            .await?;
        let context = build_context(&hits);
        let messages = build_messages(&request.question, &context, &history);

        let generated = {
            let _permit = self.generation_limit.acquire().await?;
            self.ollama
                .chat(
                    &self.config.models.answer_model,
                    &messages,
                    self.config.tokens.max_output_tokens,
                    self.config.models.temperature,
                )
                .await
                .context("answer generation failed")?
        };
        let answer_text = sanitize_model_output(generated);

        let mut response = ChatAnswer {
            answer_markdown: String::new(),
            sources_attached: false,
            sources: None,
            documents: OrganizedSources::default(),
            top_sources: vec![],
            latency_ms: 0,
        };

        if answer_text.is_empty() {
            response.answer_markdown = NO_ANSWER_MESSAGE.to_string();
        } else if hits.is_empty() {
            response.answer_markdown = with_sources_block(&answer_text, NO_SOURCES_MESSAGE);
        } else {
            let organized = organize_hits(&hits);
            let serialized = if organized.is_empty() {
                EMPTY_SOURCES_MESSAGE.to_string()
            } else {
                organized.serialize()
            };

            let similarity = self.similarity_for(&answer_text).await?;
            let decision = self.gate.evaluate(&answer_text, &similarity)?;

            if decision.attach {
                response.answer_markdown = with_sources_block(&answer_text, &serialized);
                response.sources_attached = true;
                response.sources = Some(serialized);
                response.documents = organized;
            } else {
                response.answer_markdown = answer_text.clone();
            }
            response.top_sources = top_sources(&hits, self.config.retrieval.top_sources_k);
        }

        if request.verbose {
            tracing::info!(
                question = %request.question,
                sources = response.sources.as_deref().unwrap_or("-"),
                "answered"
            );
        }

        self.db
            .save_message(&request.session_id, "assistant", &response.answer_markdown)
            .await?;

        response.latency_ms = started.elapsed().as_millis();
        Ok(response)
    }

    /// Embeds the answer and every reference phrase so the gate can compare
    /// them. Phrase vectors are cached for the lifetime of the service.
    async fn similarity_for(&self, answer: &str) -> Result<EmbeddingSimilarity, CitationError> {
        let model = &self.config.models.embedding_model;
        let embed_err = |err: anyhow::Error| CitationError::Similarity(format!("{err:#}"));

        let mut similarity = EmbeddingSimilarity::new();
        similarity.insert(answer, self.ollama.embed(model, answer).await.map_err(embed_err)?);

        for reference in self.gate.references() {
            let phrase = &reference.phrase;
            let cached = self.phrase_vectors.read().await.get(phrase).cloned();
            let vector = match cached {
                Some(vector) => vector,
                None => {
                    let vector = self.ollama.embed(model, phrase).await.map_err(embed_err)?;
                    self.phrase_vectors
                        .write()
                        .await
                        .insert(phrase.clone(), vector.clone());
                    vector
                }
            };
            similarity.insert(phrase.clone(), vector);
        }

        Ok(similarity)
    }
}

fn organize_hits(hits: &[RetrievalResult]) -> OrganizedSources {
    let citations = dedupe(
        hits.iter()
            .map(|hit| Citation::new(hit.chunk.document.clone(), hit.chunk.page)),
    );
    OrganizedSources::from_citations(&citations)
}

fn with_sources_block(answer: &str, sources: &str) -> String {
    format!("{answer}\n\nSources:\n{sources}")
}

/// The first `k` distinct passages, for display under the answer.
pub fn top_sources(hits: &[RetrievalResult], k: usize) -> Vec<SourcePreview> {
    let mut seen = HashSet::new();
    let mut previews = Vec::new();
    for hit in hits {
        if previews.len() == k {
            break;
        }
        if seen.insert((hit.chunk.document.as_str(), hit.chunk.content.as_str())) {
            previews.push(SourcePreview {
                document: hit.chunk.document.clone(),
                passage: preview(&hit.chunk.content),
            });
        }
    }
    previews
}

fn preview(content: &str) -> String {
    match content.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}…", content[..cut].trim_end()),
        None => content.to_string(),
    }
}

fn build_context(hits: &[RetrievalResult]) -> String {
    hits.iter()
        .map(|hit| {
            format!(
                "[{} (Page : {})]\n{}",
                hit.chunk.document, hit.chunk.page, hit.chunk.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn build_messages(question: &str, context: &str, history: &[(String, String)]) -> Vec<ChatMessage> {
    let system = format!(
        "Tu es un professeur spécialisé en **marketing**. En te basant uniquement sur les sources suivantes :\n\
         -----\n{context}\n-----\n\
         et en suivant le fil de la discussion, réponds de manière détaillée et précise à la question posée, \
         sans trop t'éloigner du sujet.\n\n\
         ### Consignes :\n\
         - Si tu connais le chapitre ou la section, mentionne-le.\n\
         - Si tu n'as pas assez d'informations pour répondre, écris uniquement : \"{}\"\n\
         - Si la question est imprécise ou pas claire, réponds uniquement : \"{}\"\n\
         - Si la question est hors contexte ou inappropriée, réponds uniquement : \"{}\"\n\
         - Mets en **gras** les mots clés.\n\
         - Structure ta réponse avec des **listes** ou des **sections** si cela est pertinent.",
        crate::citations::gate::INSUFFICIENT_INFORMATION,
        crate::citations::gate::CLARIFICATION_REQUEST,
        crate::citations::gate::OUT_OF_SCOPE,
    );

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::new("system", system));
    messages.extend(
        history
            .iter()
            .map(|(role, content)| ChatMessage::new(role.clone(), content.clone())),
    );
    messages.push(ChatMessage::new("user", question));
    messages
}

fn sanitize_model_output(answer: String) -> String {
    let text = answer.trim();
    if !text.starts_with("```") {
        return text.to_string();
    }

    match CODE_FENCE.captures(text).and_then(|caps| caps.get(1)) {
        Some(body) => body.as_str().trim().to_string(),
        None => text.replace("```", "").trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn hit(document: &str, page: u32, content: &str) -> RetrievalResult {
        RetrievalResult {
            chunk: Chunk {
                id: format!("{document}-{page}-{}", content.len()),
                document: document.to_string(),
                page,
                content: content.to_string(),
                token_count: content.split_whitespace().count() as i64,
                source_hash: "h".to_string(),
            },
            score: 0.5,
        }
    }

    #[test]
    fn hits_collapse_into_grouped_sources() {
        let hits = vec![
            hit("A.pdf", 2, "deux"),
            hit("A.pdf", 1, "un"),
            hit("B.pdf", 9, "neuf"),
            hit("A.pdf", 2, "deux bis"),
            hit("A.pdf", 3, "trois"),
        ];

        let organized = organize_hits(&hits);
        assert_eq!(organized.serialize(), "A.pdf (Pages : 1-3)\nB.pdf (Pages : 9)");
    }

    #[test]
    fn parenthesised_file_names_survive_grouping() {
        let hits = vec![
            hit("Chapitre 1 (intro).pdf", 4, "quatre"),
            hit("Chapitre 1 (intro).pdf", 5, "cinq"),
        ];

        let organized = organize_hits(&hits);
        let names: Vec<&str> = organized.document_names().collect();
        assert_eq!(names, vec!["Chapitre 1 (intro).pdf"]);
        assert_eq!(organized.serialize(), "Chapitre 1 (intro).pdf (Pages : 4-5)");
    }

    #[test]
    fn sources_block_matches_display_format() {
        assert_eq!(
            with_sources_block("Réponse.", "A.pdf (Pages : 4)"),
            "Réponse.\n\nSources:\nA.pdf (Pages : 4)"
        );
        assert_eq!(
            with_sources_block("Réponse.", NO_SOURCES_MESSAGE),
            "Réponse.\n\nSources:\nAucune source pertinente trouvée."
        );
    }

    #[test]
    fn gate_decides_whether_block_is_appended() {
        let hits = vec![hit("A.pdf", 1, "le mix marketing")];
        let serialized = organize_hits(&hits).serialize();

        let gate = AnswerGate::default();
        let far = |_: &str, _: &str| -> Result<f32, CitationError> { Ok(0.6) };
        let near = |_: &str, _: &str| -> Result<f32, CitationError> { Ok(0.02) };

        assert!(gate.should_attach_sources("Le mix marketing...", &far).expect("gate"));
        assert!(!gate.should_attach_sources("Pourrais-tu préciser ?", &near).expect("gate"));
        assert_eq!(serialized, "A.pdf (Pages : 1)");
    }

    #[test]
    fn top_sources_skips_duplicate_passages() {
        let hits = vec![
            hit("A.pdf", 1, "même passage"),
            hit("A.pdf", 1, "même passage"),
            hit("B.pdf", 4, "autre passage"),
            hit("C.pdf", 7, "troisième"),
        ];

        let previews = top_sources(&hits, 2);
        assert_eq!(previews.len(), 2);
        assert_eq!(previews[0].document, "A.pdf");
        assert_eq!(previews[1].document, "B.pdf");
    }

    #[test]
    fn long_passages_are_shortened_on_char_boundaries() {
        let long = "é".repeat(PREVIEW_CHARS + 10);
        let shortened = preview(&long);
        assert!(shortened.ends_with('…'));
        assert_eq!(shortened.chars().count(), PREVIEW_CHARS + 1);
        assert_eq!(preview("court"), "court");
    }

    #[test]
    fn prompt_carries_context_history_and_fixed_phrases() {
        let history = vec![
            ("user".to_string(), "Bonjour".to_string()),
            ("assistant".to_string(), "Salut".to_string()),
        ];
        let context = build_context(&[hit("Cours.pdf", 12, "La segmentation du marché.")]);
        let messages = build_messages("Qu'est-ce que la segmentation ?", &context, &history);

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("[Cours.pdf (Page : 12)]"));
        assert!(messages[0]
            .content
            .contains(crate::citations::gate::CLARIFICATION_REQUEST));
        assert_eq!(messages[1], ChatMessage::new("user", "Bonjour"));
        assert_eq!(messages[3].content, "Qu'est-ce que la segmentation ?");
    }

    #[test]
    fn strips_markdown_fences() {
        let fenced = "```markdown\n**Réponse**\n```".to_string();
        assert_eq!(sanitize_model_output(fenced), "**Réponse**");
        assert_eq!(sanitize_model_output("  plain  ".to_string()), "plain");
    }
}
