//! Citation handling for search-grounded summaries.
//!
//! Grounding URLs are long redirect links. Before summaries are fed back to
//! the model each one is replaced by a compact placeholder URL, and the
//! original is restored once the final answer has been written.

use crate::types::{GroundingChunk, GroundingMetadata};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Prefix for the compact placeholder URLs.
pub const SHORT_URL_PREFIX: &str = "https://vertexaisearch.cloud.google.com/id/";

/// One source backing a citation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CitationSegment {
    pub label: String,
    pub short_url: String,
    /// The original URL.
    pub value: String,
}

/// A span of text and the sources that support it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub start_index: usize,
    pub end_index: usize,
    pub segments: Vec<CitationSegment>,
}

/// Map every distinct chunk URI to a short URL unique to search `id`.
///
/// A URI seen several times keeps the index of its first occurrence.
pub fn resolve_urls(chunks: &[GroundingChunk], id: usize) -> HashMap<String, String> {
    let mut resolved = HashMap::new();
    for (idx, chunk) in chunks.iter().enumerate() {
        resolved
            .entry(chunk.uri.clone())
            .or_insert_with(|| format!("{SHORT_URL_PREFIX}{id}-{idx}"));
    }
    resolved
}

/// Chunk titles are usually domains; keep the part before the first dot.
fn label_for(title: &str) -> String {
    title.split('.').next().unwrap_or(title).to_string()
}

/// Build citations from grounding supports.
///
/// Supports without an end index are skipped, as are chunk indices that do
/// not refer to a known chunk.
pub fn get_citations(
    grounding: &GroundingMetadata,
    resolved: &HashMap<String, String>,
) -> Vec<Citation> {
    grounding
        .supports
        .iter()
        .filter_map(|support| {
            let end_index = support.end_index?;
            let segments = support
                .chunk_indices
                .iter()
                .filter_map(|&idx| grounding.chunks.get(idx))
                .map(|chunk| CitationSegment {
                    label: label_for(&chunk.title),
                    short_url: resolved
                        .get(&chunk.uri)
                        .cloned()
                        .unwrap_or_else(|| chunk.uri.clone()),
                    value: chunk.uri.clone(),
                })
                .collect();
            Some(Citation {
                start_index: support.start_index,
                end_index,
                segments,
            })
        })
        .collect()
}

/// Smallest char boundary at or after `idx`, clamped to the text length.
fn ceil_char_boundary(text: &str, idx: usize) -> usize {
    let mut idx = idx.min(text.len());
    while !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

/// Insert ` [label](short_url)` markers after each cited span.
///
/// Indices are UTF-8 byte offsets. Citations are applied from the end of the
/// text backwards so each insertion leaves earlier offsets untouched.
pub fn insert_citation_markers(text: &str, citations: &[Citation]) -> String {
    let mut ordered: Vec<&Citation> = citations.iter().collect();
    ordered.sort_by(|a, b| {
        b.end_index
            .cmp(&a.end_index)
            .then(b.start_index.cmp(&a.start_index))
    });

    let mut out = text.to_string();
    for citation in ordered {
        let marker: String = citation
            .segments
            .iter()
            .map(|s| format!(" [{}]({})", s.label, s.short_url))
            .collect();
        let at = ceil_char_boundary(text, citation.end_index);
        out.insert_str(at, &marker);
    }
    out
}

/// Restore original URLs in `answer` and keep only the sources it cites.
///
/// Only the markdown link target form `(short_url)` is matched, so `…/id/1-1`
/// never matches inside `…/id/1-10`.
pub fn replace_short_urls(
    answer: &str,
    sources: &[CitationSegment],
) -> (String, Vec<CitationSegment>) {
    let mut text = answer.to_string();
    let mut seen = HashSet::new();
    let mut used = Vec::new();
    for source in sources {
        let target = format!("({})", source.short_url);
        if !answer.contains(&target) || !seen.insert(source.short_url.clone()) {
            continue;
        }
        text = text.replace(&target, &format!("({})", source.value));
        used.push(source.clone());
    }
    (text, used)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GroundingSupport;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn chunk(uri: &str, title: &str) -> GroundingChunk {
        GroundingChunk {
            uri: uri.into(),
            title: title.into(),
        }
    }

    fn segment(label: &str, short: &str, long: &str) -> CitationSegment {
        CitationSegment {
            label: label.into(),
            short_url: short.into(),
            value: long.into(),
        }
    }

    #[test]
    fn test_resolve_urls_dedups_first_index() {
        let chunks = vec![
            chunk("https://a", "a.com"),
            chunk("https://b", "b.org"),
            chunk("https://a", "a.com"),
        ];
        let resolved = resolve_urls(&chunks, 7);
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved["https://a"], format!("{SHORT_URL_PREFIX}7-0"));
        assert_eq!(resolved["https://b"], format!("{SHORT_URL_PREFIX}7-1"));
    }

    #[test]
    fn test_get_citations() {
        let grounding = GroundingMetadata {
            chunks: vec![chunk("https://a", "uefa.com"), chunk("https://b", "bbc.co.uk")],
            supports: vec![
                GroundingSupport {
                    start_index: 0,
                    end_index: Some(5),
                    chunk_indices: vec![0, 1, 9],
                },
                GroundingSupport {
                    start_index: 6,
                    end_index: None,
                    chunk_indices: vec![0],
                },
            ],
            web_search_queries: vec![],
        };
        let resolved = resolve_urls(&grounding.chunks, 0);
        let citations = get_citations(&grounding, &resolved);
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].end_index, 5);
        let labels: Vec<_> = citations[0].segments.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["uefa", "bbc"]);
        assert_eq!(citations[0].segments[1].value, "https://b");
        assert_eq!(
            citations[0].segments[1].short_url,
            format!("{SHORT_URL_PREFIX}0-1")
        );
    }

    #[test]
    fn test_insert_markers_order_independent() {
        let text = "Spain won. Yamal scored.";
        let first = Citation {
            start_index: 0,
            end_index: 10,
            segments: vec![segment("uefa", "S0", "L0")],
        };
        let second = Citation {
            start_index: 11,
            end_index: 24,
            segments: vec![segment("bbc", "S1", "L1"), segment("espn", "S2", "L2")],
        };
        let expected = "Spain won. [uefa](S0) Yamal scored. [bbc](S1) [espn](S2)";
        assert_eq!(
            insert_citation_markers(text, &[first.clone(), second.clone()]),
            expected
        );
        assert_eq!(insert_citation_markers(text, &[second, first]), expected);
    }

    #[test]
    fn test_insert_markers_clamps_and_respects_char_boundaries() {
        let text = "café";
        let inside = Citation {
            start_index: 0,
            end_index: 4, // inside the two-byte 'é'
            segments: vec![segment("x", "S", "L")],
        };
        assert_eq!(insert_citation_markers(text, &[inside]), "café [x](S)");

        let past_end = Citation {
            start_index: 0,
            end_index: 100,
            segments: vec![segment("y", "T", "L")],
        };
        assert_eq!(insert_citation_markers(text, &[past_end]), "café [y](T)");
    }

    #[test]
    fn test_replace_short_urls_keeps_used_sources() {
        let sources = vec![
            segment("a", "https://s/0-0", "https://long/a"),
            segment("b", "https://s/0-1", "https://long/b"),
            segment("a", "https://s/0-0", "https://long/a"),
        ];
        let (text, used) = replace_short_urls("See [a](https://s/0-0).", &sources);
        assert_eq!(text, "See [a](https://long/a).");
        assert_eq!(used, vec![sources[0].clone()]);
    }

    #[test]
    fn test_replace_short_urls_prefix_ids_stay_distinct() {
        let short_1 = format!("{SHORT_URL_PREFIX}1-1");
        let short_10 = format!("{SHORT_URL_PREFIX}1-10");
        let sources = vec![
            segment("a", &short_1, "https://long/a"),
            segment("b", &short_10, "https://long/b"),
        ];
        let answer = format!("Only b is cited [b]({short_10}).");
        let (text, used) = replace_short_urls(&answer, &sources);
        assert_eq!(text, "Only b is cited [b](https://long/b).");
        assert_eq!(used, vec![sources[1].clone()]);
    }

    proptest! {
        #[test]
        fn prop_markers_never_split_chars(
            text in "\\PC{0,40}",
            ends in proptest::collection::vec(0usize..200, 0..6),
        ) {
            let citations: Vec<Citation> = ends
                .iter()
                .map(|&end| Citation {
                    start_index: 0,
                    end_index: end,
                    segments: vec![segment("src", "U", "L")],
                })
                .collect();
            let out = insert_citation_markers(&text, &citations);
            let stripped = out.replace(" [src](U)", "");
            prop_assert_eq!(stripped, text);
            prop_assert_eq!(out.matches(" [src](U)").count(), citations.len());
        }
    }
}
