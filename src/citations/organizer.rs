use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use walkdir::WalkDir;

use super::dedup::Citation;
use super::ranges::{expand, group_pages, PageRange};
use super::CitationError;

// `Doc.pdf (Page : 3)` or the grouped `Doc.pdf (Pages : 1-3, 7)`. The name is
// the shortest run up to `.pdf` that is followed by the page marker, so it may
// contain parentheses but never spans a newline.
static CITATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([^\n]+?\.pdf) \(Pages? : ([0-9][0-9, -]*)\)")
        .expect("citation pattern compiles")
});

const MAX_PARSED_SPAN: u32 = 10_000;

fn range_width(range: &PageRange) -> u32 {
    match *range {
        PageRange::Single(_) => 0,
        PageRange::Span { start, end } => end - start,
    }
}

/// One cited document and its maximal page runs. Only built by
/// [`OrganizedSources`], so `ranges` is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentRanges {
    document: String,
    ranges: Vec<PageRange>,
}

impl DocumentRanges {
    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn ranges(&self) -> &[PageRange] {
        &self.ranges
    }

    pub fn pages(&self) -> BTreeSet<u32> {
        expand(&self.ranges)
    }
}

/// Per-document grouped pages for one answer.
///
/// Iteration follows the order in which documents were first cited; lookups by
/// name are linear, which is fine for the handful of documents one answer cites.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct OrganizedSources {
    documents: Vec<DocumentRanges>,
}

impl OrganizedSources {
    pub fn parse(raw: &str) -> Self {
        let mut collected = PageCollector::default();

        for captures in CITATION_PATTERN.captures_iter(raw) {
            let document = captures[1].trim();
            if document == ".pdf" {
                continue;
            }
            let ranges: Vec<PageRange> = captures[2]
                .split(',')
                .filter_map(|token| token.parse().ok())
                .filter(|range| range_width(range) <= MAX_PARSED_SPAN)
                .collect();
            for page in expand(&ranges).into_iter().filter(|&page| page > 0) {
                collected.add(document, page);
            }
        }

        collected.finish()
    }

    /// Groups structured citations directly, without going through the text
    /// form. Page `0` is skipped like in [`OrganizedSources::parse`].
    pub fn from_citations(citations: &[Citation]) -> Self {
        let mut collected = PageCollector::default();
        for citation in citations.iter().filter(|c| c.page > 0) {
            collected.add(&citation.document, citation.page);
        }
        collected.finish()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DocumentRanges> {
        self.documents.iter()
    }

    pub fn document_names(&self) -> impl Iterator<Item = &str> {
        self.documents.iter().map(|doc| doc.document.as_str())
    }

    pub fn get(&self, document: &str) -> Option<&[PageRange]> {
        self.documents
            .iter()
            .find(|doc| doc.document == document)
            .map(|doc| doc.ranges.as_slice())
    }

    pub fn contains(&self, document: &str) -> bool {
        self.get(document).is_some()
    }

    /// The documents sorted by name, for callers that want a stable listing
    /// instead of citation order.
    pub fn sorted(&self) -> Vec<&DocumentRanges> {
        let mut docs: Vec<&DocumentRanges> = self.documents.iter().collect();
        docs.sort_by(|a, b| a.document.cmp(&b.document));
        docs
    }

    pub fn serialize(&self) -> String {
        self.to_string()
    }

    pub fn resolve_paths(&self, folder: &Path) -> Result<FilePathIndex, CitationError> {
        let fs_error = |message: String| CitationError::Filesystem {
            path: folder.to_path_buf(),
            message,
        };

        let root = folder
            .canonicalize()
            .map_err(|err| fs_error(err.to_string()))?;
        if !root.is_dir() {
            return Err(fs_error("not a directory".to_string()));
        }

        let mut paths = HashMap::new();
        for entry in WalkDir::new(&root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|err| fs_error(err.to_string()))?;
            let Some(file_name) = entry.file_name().to_str() else {
                continue;
            };
            if entry.file_type().is_file() && file_name.ends_with(".pdf") && self.contains(file_name)
            {
                paths.insert(file_name.to_string(), entry.path().to_path_buf());
            }
        }

        Ok(FilePathIndex { paths })
    }
}

/// Pages per document in first-seen document order.
#[derive(Default)]
struct PageCollector {
    documents: Vec<(String, BTreeSet<u32>)>,
}

impl PageCollector {
    fn add(&mut self, document: &str, page: u32) {
        match self.documents.iter_mut().find(|(name, _)| name == document) {
            Some((_, pages)) => {
                pages.insert(page);
            }
            None => self
                .documents
                .push((document.to_string(), BTreeSet::from([page]))),
        }
    }

    fn finish(self) -> OrganizedSources {
        let documents = self
            .documents
            .into_iter()
            .map(|(document, pages)| {
                // Every entry is created with its first page.
                let ranges = group_pages(&pages).expect("collected documents always carry a page");
                DocumentRanges { document, ranges }
            })
            .collect();

        OrganizedSources { documents }
    }
}

impl fmt::Display for OrganizedSources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, doc) in self.documents.iter().enumerate() {
            if idx > 0 {
                f.write_str("\n")?;
            }
            let ranges = doc
                .ranges
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, "{} (Pages : {})", doc.document, ranges)?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a OrganizedSources {
    type Item = &'a DocumentRanges;
    type IntoIter = std::slice::Iter<'a, DocumentRanges>;

    fn into_iter(self) -> Self::IntoIter {
        self.documents.iter()
    }
}

/// Cited documents that exist in the course folder, by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilePathIndex {
    paths: HashMap<String, PathBuf>,
}

impl FilePathIndex {
    pub fn get(&self, document: &str) -> Option<&Path> {
        self.paths.get(document).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::citations::citation_block;

    fn ranges(sources: &OrganizedSources, document: &str) -> Vec<String> {
        sources
            .get(document)
            .unwrap_or_default()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn groups_interleaved_citations_per_document() {
        let sources = OrganizedSources::parse(
            "A.pdf (Page : 1) A.pdf (Page : 2) B.pdf (Page : 9) A.pdf (Page : 3)",
        );

        assert_eq!(sources.len(), 2);
        assert_eq!(ranges(&sources, "A.pdf"), vec!["1-3"]);
        assert_eq!(ranges(&sources, "B.pdf"), vec!["9"]);
        assert_eq!(sources.serialize(), "A.pdf (Pages : 1-3)\nB.pdf (Pages : 9)");
    }

    #[test]
    fn keeps_first_seen_document_order() {
        let sources = OrganizedSources::parse(
            "Zeta.pdf (Page : 4)\nAlpha.pdf (Page : 2)\nZeta.pdf (Page : 1)",
        );
        let names: Vec<&str> = sources.document_names().collect();
        assert_eq!(names, vec!["Zeta.pdf", "Alpha.pdf"]);

        let sorted: Vec<&str> = sources
            .sorted()
            .into_iter()
            .map(|doc| doc.document.as_str())
            .collect();
        assert_eq!(sorted, vec!["Alpha.pdf", "Zeta.pdf"]);
        assert_eq!(sources.serialize(), "Zeta.pdf (Pages : 1, 4)\nAlpha.pdf (Pages : 2)");
    }

    #[test]
    fn accepts_plural_keyword_and_duplicate_pages() {
        let sources = OrganizedSources::parse(
            "Marketing stratégique et opérationnel.pdf (Pages : 9)\n\
             Marketing stratégique et opérationnel.pdf (Page : 9)\n\
             Marketing stratégique et opérationnel.pdf (Page : 10)",
        );
        assert_eq!(
            sources.serialize(),
            "Marketing stratégique et opérationnel.pdf (Pages : 9-10)"
        );
    }

    #[test]
    fn ignores_malformed_fragments() {
        let sources = OrganizedSources::parse(
            "Sources:\nnotes.txt (Page : 3)\nA.pdf (Page: 4)\nA.pdf (Page : x)\n\
             A.pdf (Page : 0)\nB.pdf (Page : 7)\nrandom words",
        );
        assert_eq!(sources.serialize(), "B.pdf (Pages : 7)");

        assert!(OrganizedSources::parse("").is_empty());
        assert!(OrganizedSources::parse("nothing to see").is_empty());
    }

    #[test]
    fn names_do_not_span_lines() {
        let sources = OrganizedSources::parse("Sources:\nCours.pdf (Page : 2)");
        let names: Vec<&str> = sources.document_names().collect();
        assert_eq!(names, vec!["Cours.pdf"]);
    }

    #[test]
    fn serialized_output_is_a_fixpoint() {
        let inputs = [
            "A.pdf (Page : 1) A.pdf (Page : 2) B.pdf (Page : 9) A.pdf (Page : 3)",
            "ENT-Maketing_operationnel.pdf (Page : 1) ENT-Maketing_operationnel.pdf (Page : 2) \
             COURS_DE_MARKETING.pdf (Page : 102)",
            "X.pdf (Page : 5)\nX.pdf (Page : 7)\nX.pdf (Page : 6)\nY.pdf (Pages : 1)",
            "",
        ];

        for input in inputs {
            let first = OrganizedSources::parse(input);
            let second = OrganizedSources::parse(&first.serialize());
            assert_eq!(first, second, "not a fixpoint for {input:?}");
        }
    }

    #[test]
    fn grouped_lines_parse_back_into_their_pages() {
        let sources = OrganizedSources::parse(
            "A.pdf (Pages : 1-3, 7)\nB.pdf (Pages : 9, 4-2, 0)\nC.pdf (Pages : 1-900000)",
        );
        assert_eq!(ranges(&sources, "A.pdf"), vec!["1-3", "7"]);
        assert_eq!(ranges(&sources, "B.pdf"), vec!["9"]);
        assert!(!sources.contains("C.pdf"));
    }

    #[test]
    fn resolves_only_cited_pdfs_present_in_folder() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("A.pdf"), b"%PDF-1.4").expect("write A");
        std::fs::write(dir.path().join("C.pdf"), b"%PDF-1.4").expect("write C");
        std::fs::write(dir.path().join("B.txt"), b"not a pdf").expect("write B");

        let sources = OrganizedSources::parse("A.pdf (Page : 1)\nB.pdf (Page : 2)");
        let index = sources.resolve_paths(dir.path()).expect("resolve paths");

        assert_eq!(index.len(), 1);
        let path = index.get("A.pdf").expect("A.pdf resolved");
        assert!(path.is_absolute());
        assert!(path.ends_with("A.pdf"));
        assert!(index.get("B.pdf").is_none());
        assert!(index.get("C.pdf").is_none());
    }

    #[test]
    fn names_may_contain_parentheses() {
        let block = citation_block(&[
            Citation::new("Chapitre 1 (intro).pdf", 4),
            Citation::new("Chapitre 1 (intro).pdf", 5),
            Citation::new("Annexe (v2) final.pdf", 1),
        ]);
        let sources = OrganizedSources::parse(&block);

        let names: Vec<&str> = sources.document_names().collect();
        assert_eq!(names, vec!["Chapitre 1 (intro).pdf", "Annexe (v2) final.pdf"]);
        assert_eq!(
            sources.serialize(),
            "Chapitre 1 (intro).pdf (Pages : 4-5)\nAnnexe (v2) final.pdf (Pages : 1)"
        );
        assert_eq!(OrganizedSources::parse(&sources.serialize()), sources);
    }

    #[test]
    fn structured_citations_group_like_parsed_text() {
        let citations = [
            Citation::new("A.pdf", 1),
            Citation::new("A.pdf", 2),
            Citation::new("B (annexe).pdf", 9),
            Citation::new("A.pdf", 3),
            Citation::new("A.pdf", 0),
        ];
        let direct = OrganizedSources::from_citations(&citations);

        assert_eq!(direct, OrganizedSources::parse(&citation_block(&citations)));
        assert_eq!(direct.serialize(), "A.pdf (Pages : 1-3)\nB (annexe).pdf (Pages : 9)");
        assert!(OrganizedSources::from_citations(&[]).is_empty());
    }

    #[test]
    fn every_grouped_document_has_pages() {
        let sources = OrganizedSources::parse("A.pdf (Page : 7)\nB.pdf (Page : 0)\nC.pdf (Page : 2)");
        assert_eq!(sources.len(), 2);
        assert!(sources.iter().all(|doc| !doc.ranges().is_empty() && !doc.pages().is_empty()));
    }

    #[test]
    fn directories_named_like_pdfs_are_not_resolved() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("A.pdf")).expect("mkdir A.pdf");
        std::fs::write(dir.path().join("B.pdf"), b"%PDF-1.4").expect("write B");

        let sources = OrganizedSources::parse("A.pdf (Page : 1)\nB.pdf (Page : 2)");
        let index = sources.resolve_paths(dir.path()).expect("resolve paths");

        assert!(index.get("A.pdf").is_none());
        assert!(index.get("B.pdf").is_some());
    }

    #[test]
    fn missing_folder_is_an_error_not_an_empty_index() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope");
        let sources = OrganizedSources::parse("A.pdf (Page : 1)");

        let err = sources.resolve_paths(&missing).unwrap_err();
        assert!(matches!(err, CitationError::Filesystem { .. }));
    }
}
