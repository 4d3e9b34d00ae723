use std::collections::BTreeSet;
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::CitationError;

/// A single cited page or a maximal run of consecutive pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PageRange {
    Single(u32),
    Span { start: u32, end: u32 },
}

impl PageRange {
    pub fn start(self) -> u32 {
        match self {
            PageRange::Single(page) => page,
            PageRange::Span { start, .. } => start,
        }
    }

    pub fn end(self) -> u32 {
        match self {
            PageRange::Single(page) => page,
            PageRange::Span { end, .. } => end,
        }
    }

    pub fn pages(self) -> RangeInclusive<u32> {
        self.start()..=self.end()
    }

    fn closing(start: u32, end: u32) -> Self {
        if start == end {
            PageRange::Single(start)
        } else {
            PageRange::Span { start, end }
        }
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageRange::Single(page) => write!(f, "{page}"),
            PageRange::Span { start, end } => write!(f, "{start}-{end}"),
        }
    }
}

impl FromStr for PageRange {
    type Err = String;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let token = token.trim();
        let parse = |raw: &str| {
            raw.trim()
                .parse::<u32>()
                .map_err(|err| format!("invalid page in range token \"{token}\": {err}"))
        };

        match token.split_once('-') {
            None => Ok(PageRange::Single(parse(token)?)),
            Some((start, end)) => {
                let (start, end) = (parse(start)?, parse(end)?);
                if start >= end {
                    return Err(format!("range token \"{token}\" is not ascending"));
                }
                Ok(PageRange::Span { start, end })
            }
        }
    }
}

impl Serialize for PageRange {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PageRange {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Collapses an ascending page set into maximal runs: `{1,2,3,9}` becomes `1-3, 9`.
///
/// An empty set means a document was recorded without any page, which only
/// happens when the caller mis-parsed its input, so it is rejected.
pub fn group_pages(pages: &BTreeSet<u32>) -> Result<Vec<PageRange>, CitationError> {
    let mut iter = pages.iter().copied();
    let Some(first) = iter.next() else {
        return Err(CitationError::EmptyPageSet);
    };

    let mut ranges = Vec::new();
    let mut start = first;
    let mut previous = first;

    for page in iter {
        if page != previous + 1 {
            ranges.push(PageRange::closing(start, previous));
            start = page;
        }
        previous = page;
    }
    ranges.push(PageRange::closing(start, previous));

    Ok(ranges)
}

/// Flattens grouped ranges back into the set of pages they cover.
pub fn expand(ranges: &[PageRange]) -> BTreeSet<u32> {
    ranges.iter().flat_map(|range| range.pages()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(pages: &[u32]) -> Vec<String> {
        let set: BTreeSet<u32> = pages.iter().copied().collect();
        group_pages(&set)
            .expect("non-empty page set")
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn groups_known_shapes() {
        assert_eq!(tokens(&[5]), vec!["5"]);
        assert_eq!(tokens(&[1, 2, 3, 9]), vec!["1-3", "9"]);
        assert_eq!(tokens(&[4, 5, 6, 7]), vec!["4-7"]);
        assert_eq!(tokens(&[1, 3, 5]), vec!["1", "3", "5"]);
        assert_eq!(tokens(&[2, 3, 7, 8, 9, 12]), vec!["2-3", "7-9", "12"]);
    }

    #[test]
    fn empty_page_set_is_rejected() {
        let err = group_pages(&BTreeSet::new()).unwrap_err();
        assert!(matches!(err, CitationError::EmptyPageSet));
    }

    #[test]
    fn expanding_groups_reproduces_the_input() {
        let samples: Vec<Vec<u32>> = vec![
            vec![1],
            vec![1, 2],
            vec![1, 3],
            vec![10, 11, 12, 40, 41, 99],
            (1..=50).collect(),
            (1..=50).filter(|n| n % 3 != 0).collect(),
            vec![u32::MAX - 1, u32::MAX],
        ];

        for pages in samples {
            let set: BTreeSet<u32> = pages.iter().copied().collect();
            let ranges = group_pages(&set).expect("non-empty page set");
            assert_eq!(expand(&ranges), set, "round trip failed for {pages:?}");

            for pair in ranges.windows(2) {
                assert!(
                    pair[0].end() + 1 < pair[1].start(),
                    "mergeable neighbours {} and {}",
                    pair[0],
                    pair[1]
                );
            }
        }
    }

    #[test]
    fn range_tokens_parse_back() {
        assert_eq!("9".parse::<PageRange>(), Ok(PageRange::Single(9)));
        assert_eq!(
            "4-7".parse::<PageRange>(),
            Ok(PageRange::Span { start: 4, end: 7 })
        );
        assert!("7-4".parse::<PageRange>().is_err());
        assert!("x".parse::<PageRange>().is_err());
    }

    #[test]
    fn ranges_serialize_as_tokens() {
        let ranges = vec![PageRange::Span { start: 1, end: 3 }, PageRange::Single(9)];
        let json = serde_json::to_string(&ranges).expect("serialize ranges");
        assert_eq!(json, r#"["1-3","9"]"#);
    }
}
