use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::CitationError;

pub const DEFAULT_GATE_THRESHOLD: f32 = 0.1;

pub const INSUFFICIENT_INFORMATION: &str = "Je n'ai pas assez d'informations pour répondre. 🤔";
pub const CLARIFICATION_REQUEST: &str = "Pourrais-tu préciser ta question ? 🧐";
pub const OUT_OF_SCOPE: &str = "Ta question est hors de mon champs de compétences. 🤷‍♂️";
pub const GREETING: &str = "Bonjour! En tant que professeur spécialisé en marketing, je suis là pour répondre à ta question. Que puis-je faire pour t'aider aujourd'hui ?";

/// Distance between two texts in `[0, 1]`, lower meaning closer.
pub trait SimilarityService {
    fn distance(&self, a: &str, b: &str) -> Result<f32, CitationError>;
}

impl<F> SimilarityService for F
where
    F: Fn(&str, &str) -> Result<f32, CitationError>,
{
    fn distance(&self, a: &str, b: &str) -> Result<f32, CitationError> {
        self(a, b)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferencePhrase {
    pub label: String,
    pub phrase: String,
}

impl ReferencePhrase {
    pub fn new(label: impl Into<String>, phrase: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            phrase: phrase.into(),
        }
    }
}

pub fn default_references() -> Vec<ReferencePhrase> {
    vec![
        ReferencePhrase::new("insufficient_information", INSUFFICIENT_INFORMATION),
        ReferencePhrase::new("clarification", CLARIFICATION_REQUEST),
        ReferencePhrase::new("out_of_scope", OUT_OF_SCOPE),
        ReferencePhrase::new("greeting", GREETING),
    ]
}

#[derive(Debug, Clone, PartialEq)]
pub struct GateDecision {
    pub attach: bool,
    pub min_distance: f32,
    pub closest: Option<String>,
}

/// Suppresses citations when the answer is itself one of the canned
/// non-answers (refusal, clarification request, greeting).
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerGate {
    references: Vec<ReferencePhrase>,
    threshold: f32,
}

impl Default for AnswerGate {
    fn default() -> Self {
        Self::new(default_references(), DEFAULT_GATE_THRESHOLD)
    }
}

impl AnswerGate {
    pub fn new(references: Vec<ReferencePhrase>, threshold: f32) -> Self {
        Self {
            references,
            threshold,
        }
    }

    pub fn references(&self) -> &[ReferencePhrase] {
        &self.references
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn should_attach_sources<S>(&self, answer: &str, similarity: &S) -> Result<bool, CitationError>
    where
        S: SimilarityService + ?Sized,
    {
        Ok(self.evaluate(answer, similarity)?.attach)
    }

    /// Attaches only when the closest reference is strictly farther than the
    /// threshold; a tie counts as a match and suppresses.
    pub fn evaluate<S>(&self, answer: &str, similarity: &S) -> Result<GateDecision, CitationError>
    where
        S: SimilarityService + ?Sized,
    {
        let mut min_distance = f32::INFINITY;
        let mut closest = None;

        for reference in &self.references {
            let distance = similarity.distance(answer, &reference.phrase)?;
            if !distance.is_finite() {
                return Err(CitationError::Similarity(format!(
                    "non-finite distance {distance} against \"{}\"",
                    reference.label
                )));
            }
            if distance < min_distance {
                min_distance = distance;
                closest = Some(reference.label.clone());
            }
        }

        let attach = min_distance > self.threshold;
        tracing::debug!(
            min_distance,
            closest = closest.as_deref().unwrap_or("-"),
            attach,
            "answer gate decision"
        );

        Ok(GateDecision {
            attach,
            min_distance,
            closest,
        })
    }
}

/// Cosine distance over precomputed embeddings. Every text passed to
/// [`SimilarityService::distance`] must have been inserted first.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingSimilarity {
    vectors: HashMap<String, Vec<f32>>,
}

impl EmbeddingSimilarity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, text: impl Into<String>, vector: Vec<f32>) {
        self.vectors.insert(text.into(), vector);
    }

    pub fn contains(&self, text: &str) -> bool {
        self.vectors.contains_key(text)
    }

    fn vector(&self, text: &str) -> Result<&[f32], CitationError> {
        self.vectors
            .get(text)
            .map(Vec::as_slice)
            .ok_or_else(|| CitationError::Similarity(format!("no embedding for \"{text}\"")))
    }
}

impl SimilarityService for EmbeddingSimilarity {
    fn distance(&self, a: &str, b: &str) -> Result<f32, CitationError> {
        cosine_distance(self.vector(a)?, self.vector(b)?)
    }
}

pub fn cosine_distance(a: &[f32], b: &[f32]) -> Result<f32, CitationError> {
    if a.len() != b.len() {
        return Err(CitationError::Similarity(format!(
            "embedding dimensions differ: {} vs {}",
            a.len(),
            b.len()
        )));
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(CitationError::Similarity("zero-length embedding".to_string()));
    }

    Ok((1.0 - dot / (norm_a * norm_b)).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(distances: &'static [(&'static str, f32)]) -> impl Fn(&str, &str) -> Result<f32, CitationError> {
        move |_answer: &str, phrase: &str| {
            distances
                .iter()
                .find(|(candidate, _)| *candidate == phrase)
                .map(|(_, distance)| *distance)
                .ok_or_else(|| CitationError::Similarity(format!("unknown phrase {phrase}")))
        }
    }

    fn gate(threshold: f32) -> AnswerGate {
        AnswerGate::new(
            vec![
                ReferencePhrase::new("refusal", "refusal"),
                ReferencePhrase::new("clarify", "clarify"),
            ],
            threshold,
        )
    }

    fn exact_match_or_far(answer: &str, phrase: &str) -> Result<f32, CitationError> {
        Ok(if answer.trim() == phrase.trim() { 0.0 } else { 0.6 })
    }

    #[test]
    fn clarification_answer_suppresses_sources() {
        let gate = AnswerGate::default();
        let attach = gate
            .should_attach_sources("Pourrais-tu préciser ta question ? 🧐", &exact_match_or_far)
            .expect("gate decision");
        assert!(!attach);
    }

    #[test]
    fn substantive_answer_keeps_sources() {
        let gate = AnswerGate::default();
        let attach = gate
            .should_attach_sources(
                "Le marketing mix comprend 4 P : produit, prix, distribution, communication.",
                &exact_match_or_far,
            )
            .expect("gate decision");
        assert!(attach);
    }

    #[test]
    fn minimum_distance_decides_and_ties_suppress() {
        let decision = gate(0.1)
            .evaluate("answer", &fixed(&[("refusal", 0.8), ("clarify", 0.1)]))
            .expect("decision");
        assert!(!decision.attach);
        assert_eq!(decision.min_distance, 0.1);
        assert_eq!(decision.closest.as_deref(), Some("clarify"));

        let decision = gate(0.1)
            .evaluate("answer", &fixed(&[("refusal", 0.8), ("clarify", 0.11)]))
            .expect("decision");
        assert!(decision.attach);
    }

    #[test]
    fn raising_distances_never_flips_attach_to_suppress() {
        let base = [0.02f32, 0.05, 0.1, 0.15, 0.4];
        for shift in [0.0f32, 0.01, 0.05, 0.2] {
            for &d in &base {
                let low = d;
                let high = (d + shift).min(1.0);
                let at_low = move |_: &str, _: &str| -> Result<f32, CitationError> { Ok(low) };
                let at_high = move |_: &str, _: &str| -> Result<f32, CitationError> { Ok(high) };
                let before = gate(0.1).should_attach_sources("a", &at_low).expect("decision");
                let after = gate(0.1).should_attach_sources("a", &at_high).expect("decision");
                assert!(!before || after, "attach flipped to suppress at {d} + {shift}");
            }
        }
    }

    #[test]
    fn similarity_failure_propagates() {
        let failing = |_: &str, _: &str| -> Result<f32, CitationError> {
            Err(CitationError::Similarity("service down".to_string()))
        };
        let err = gate(0.1).should_attach_sources("answer", &failing).unwrap_err();
        assert!(matches!(err, CitationError::Similarity(_)));

        let nan = |_: &str, _: &str| -> Result<f32, CitationError> { Ok(f32::NAN) };
        assert!(gate(0.1).should_attach_sources("answer", &nan).is_err());
    }

    #[test]
    fn no_references_attaches() {
        let gate = AnswerGate::new(vec![], 0.1);
        let never_called = |_: &str, _: &str| -> Result<f32, CitationError> {
            Err(CitationError::Similarity("unexpected call".to_string()))
        };
        assert!(gate.should_attach_sources("anything", &never_called).expect("decision"));
    }

    #[test]
    fn embedding_similarity_uses_cosine_distance() {
        let mut similarity = EmbeddingSimilarity::new();
        similarity.insert("a", vec![1.0, 0.0]);
        similarity.insert("same", vec![2.0, 0.0]);
        similarity.insert("orthogonal", vec![0.0, 3.0]);

        let same = similarity.distance("a", "same").expect("distance");
        let orthogonal = similarity.distance("a", "orthogonal").expect("distance");
        assert!(same.abs() < 1e-6);
        assert!((orthogonal - 1.0).abs() < 1e-6);
        assert!(similarity.distance("a", "missing").is_err());
    }

    #[test]
    fn cosine_distance_rejects_bad_vectors() {
        assert!(cosine_distance(&[1.0, 0.0], &[1.0]).is_err());
        assert!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]).is_err());
    }
}
