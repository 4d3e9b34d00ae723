//! Citation compaction: turning raw `(document, page)` retrieval hits into the
//! compact `Doc.pdf (Pages : 1-3, 9)` block attached to answers, and browsing
//! the cited pages afterwards.

pub mod dedup;
pub mod gate;
pub mod navigator;
pub mod organizer;
pub mod ranges;

use std::path::PathBuf;

use thiserror::Error;

pub use dedup::{citation_block, dedupe, Citation};
pub use gate::{AnswerGate, EmbeddingSimilarity, ReferencePhrase, SimilarityService};
pub use navigator::{NavigationError, NavigationState, PageNavigator};
pub use organizer::{DocumentRanges, FilePathIndex, OrganizedSources};
pub use ranges::{group_pages, PageRange};

#[derive(Debug, Error)]
pub enum CitationError {
    #[error("cannot group an empty page set")]
    EmptyPageSet,

    #[error("failed to list source folder {}: {message}", path.display())]
    Filesystem { path: PathBuf, message: String },

    #[error("similarity service failed: {0}")]
    Similarity(String),
}
