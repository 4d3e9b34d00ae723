use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ranges::expand;
use super::OrganizedSources;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NavigationError {
    #[error("no cited documents to browse")]
    NoDocuments,

    #[error("no pages available for \"{0}\"")]
    NoPagesAvailable(String),
}

/// Where one session is looking: a cited document and the page shown.
///
/// `page` is `None` only while the selected document has no cited pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationState {
    pub document: String,
    pub page: Option<u32>,
}

/// Page-by-page browsing over the pages an answer cited. The navigator holds
/// no state of its own: every transition takes the session's state and
/// returns the next one.
#[derive(Debug, Clone, Copy)]
pub struct PageNavigator<'a> {
    sources: &'a OrganizedSources,
}

impl<'a> PageNavigator<'a> {
    pub fn new(sources: &'a OrganizedSources) -> Self {
        Self { sources }
    }

    pub fn start(&self) -> Result<NavigationState, NavigationError> {
        let first = self
            .sources
            .document_names()
            .next()
            .ok_or(NavigationError::NoDocuments)?;
        Ok(self.enter(first))
    }

    pub fn pages(&self, document: &str) -> BTreeSet<u32> {
        self.sources.get(document).map(expand).unwrap_or_default()
    }

    /// Inclusive `(min, max)` over every page cited for `document`, gaps included.
    pub fn bounds(&self, document: &str) -> Option<(u32, u32)> {
        let ranges = self.sources.get(document)?;
        let min = ranges.iter().map(|range| range.start()).min()?;
        let max = ranges.iter().map(|range| range.end()).max()?;
        Some((min, max))
    }

    pub fn select_document(&self, state: NavigationState, document: &str) -> NavigationState {
        if state.document == document {
            return state;
        }
        self.enter(document)
    }

    pub fn next_page(&self, state: NavigationState) -> Result<NavigationState, NavigationError> {
        self.move_within(state, |page, _, max| if page < max { page + 1 } else { page })
    }

    pub fn previous_page(
        &self,
        state: NavigationState,
    ) -> Result<NavigationState, NavigationError> {
        self.move_within(state, |page, min, _| if page > min { page - 1 } else { page })
    }

    pub fn jump_to_page(
        &self,
        state: NavigationState,
        page: u32,
    ) -> Result<NavigationState, NavigationError> {
        self.move_within(state, |_, min, max| page.clamp(min, max))
    }

    fn enter(&self, document: &str) -> NavigationState {
        NavigationState {
            document: document.to_string(),
            page: self.bounds(document).map(|(min, _)| min),
        }
    }

    fn move_within<F>(
        &self,
        state: NavigationState,
        step: F,
    ) -> Result<NavigationState, NavigationError>
    where
        F: FnOnce(u32, u32, u32) -> u32,
    {
        let (min, max) = self
            .bounds(&state.document)
            .ok_or_else(|| NavigationError::NoPagesAvailable(state.document.clone()))?;

        // A state carried over from an older answer may sit outside the bounds.
        let current = state.page.unwrap_or(min).clamp(min, max);
        Ok(NavigationState {
            page: Some(step(current, min, max)),
            document: state.document,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources() -> OrganizedSources {
        OrganizedSources::parse(
            "Cours.pdf (Page : 3)\nCours.pdf (Page : 4)\nCours.pdf (Page : 5)\n\
             Cours.pdf (Page : 10)\nAnnexe.pdf (Page : 7)",
        )
    }

    #[test]
    fn starts_on_first_document_minimum_page() {
        let sources = sources();
        let nav = PageNavigator::new(&sources);
        let state = nav.start().expect("start");
        assert_eq!(state.document, "Cours.pdf");
        assert_eq!(state.page, Some(3));
        assert_eq!(nav.bounds("Cours.pdf"), Some((3, 10)));
    }

    #[test]
    fn next_page_steps_by_one_and_stops_at_max() {
        let sources = sources();
        let nav = PageNavigator::new(&sources);
        let mut state = nav.start().expect("start");

        for _ in 0..3 {
            state = nav.next_page(state).expect("next");
        }
        assert_eq!(state.page, Some(6));

        state = nav.jump_to_page(state, 100).expect("jump");
        assert_eq!(state.page, Some(10));

        state = nav.next_page(state).expect("next at max");
        assert_eq!(state.page, Some(10));
    }

    #[test]
    fn previous_page_stops_at_min() {
        let sources = sources();
        let nav = PageNavigator::new(&sources);
        let state = nav.start().expect("start");

        let state = nav.previous_page(state).expect("previous at min");
        assert_eq!(state.page, Some(3));

        let state = nav.jump_to_page(state, 1).expect("jump below");
        assert_eq!(state.page, Some(3));

        let state = nav.jump_to_page(state, 5).expect("jump");
        let state = nav.previous_page(state).expect("previous");
        assert_eq!(state.page, Some(4));
    }

    #[test]
    fn switching_documents_resets_page() {
        let sources = sources();
        let nav = PageNavigator::new(&sources);
        let state = nav.start().expect("start");
        let state = nav.jump_to_page(state, 9).expect("jump");

        let same = nav.select_document(state.clone(), "Cours.pdf");
        assert_eq!(same, state);

        let other = nav.select_document(state, "Annexe.pdf");
        assert_eq!(other.document, "Annexe.pdf");
        assert_eq!(other.page, Some(7));

        let back = nav.select_document(other, "Cours.pdf");
        assert_eq!(back.page, Some(3));
    }

    #[test]
    fn single_page_document_never_moves() {
        let sources = sources();
        let nav = PageNavigator::new(&sources);
        let state = nav.select_document(nav.start().expect("start"), "Annexe.pdf");

        let state = nav.next_page(state).expect("next");
        let state = nav.previous_page(state).expect("previous");
        let state = nav.jump_to_page(state, 2).expect("jump");
        assert_eq!(state.page, Some(7));
    }

    #[test]
    fn document_without_pages_refuses_page_changes() {
        let sources = sources();
        let nav = PageNavigator::new(&sources);
        let state = nav.select_document(nav.start().expect("start"), "Inconnu.pdf");
        assert_eq!(state.page, None);
        assert!(nav.pages("Inconnu.pdf").is_empty());

        let err = nav.next_page(state.clone()).unwrap_err();
        assert_eq!(err, NavigationError::NoPagesAvailable("Inconnu.pdf".to_string()));
        assert!(nav.previous_page(state.clone()).is_err());
        assert!(nav.jump_to_page(state.clone(), 4).is_err());

        let recovered = nav.select_document(state, "Cours.pdf");
        assert_eq!(recovered.page, Some(3));
    }

    #[test]
    fn empty_sources_cannot_start() {
        let sources = OrganizedSources::default();
        let nav = PageNavigator::new(&sources);
        assert_eq!(nav.start().unwrap_err(), NavigationError::NoDocuments);
    }
}
