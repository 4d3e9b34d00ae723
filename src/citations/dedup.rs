use std::collections::HashSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Citation {
    pub document: String,
    pub page: u32,
}

impl Citation {
    pub fn new(document: impl Into<String>, page: u32) -> Self {
        Self {
            document: document.into(),
            page,
        }
    }
}

/// Drops repeated `(document, page)` pairs, keeping each pair where it first
/// appeared. Retrieval returns several chunks of the same page, so this runs
/// before the citation block is built.
pub fn dedupe<I>(hits: I) -> Vec<Citation>
where
    I: IntoIterator<Item = Citation>,
{
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|citation| seen.insert(citation.clone()))
        .collect()
}

/// Renders citations as the raw `Doc.pdf (Page : N)` lines consumed by
/// [`OrganizedSources::parse`](super::OrganizedSources::parse).
pub fn citation_block(citations: &[Citation]) -> String {
    citations
        .iter()
        .map(|citation| format!("{} (Page : {})", citation.document, citation.page))
        .collect::<Vec<_>>()
        .join("\n")
}
