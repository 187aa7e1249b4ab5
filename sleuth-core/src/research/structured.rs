//! Parsing of the JSON objects the model is asked to return.
//!
//! Models wrap JSON in prose or markdown fences often enough that strict
//! parsing is not an option. Unparseable output is never an error: each
//! parser falls back to a value that keeps the graph moving.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Search queries produced by the query generation node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQueryList {
    #[serde(default)]
    pub query: Vec<String>,
    #[serde(default = "default_rationale")]
    pub rationale: String,
}

fn default_rationale() -> String {
    "generated search queries".to_string()
}

/// Verdict produced by the reflection node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reflection {
    #[serde(default)]
    pub is_sufficient: bool,
    #[serde(default)]
    pub knowledge_gap: String,
    #[serde(default)]
    pub follow_up_queries: Vec<String>,
}

/// Locate the JSON object inside a model reply.
fn extract_json(text: &str) -> Option<&str> {
    const FENCE: &str = "```json";
    if let Some(start) = text.find(FENCE) {
        let body = &text[start + FENCE.len()..];
        let end = body.find("```").unwrap_or(body.len());
        return Some(body[..end].trim());
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

fn parse_json<T: for<'de> Deserialize<'de>>(text: &str, kind: &str) -> Option<T> {
    let Some(json) = extract_json(text) else {
        warn!(
            kind,
            raw_preview = preview(text).as_str(),
            "No JSON object found in model output"
        );
        return None;
    };
    match serde_json::from_str(json) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(
                kind,
                error = %e,
                raw_preview = preview(text).as_str(),
                "Failed to parse structured model output"
            );
            None
        }
    }
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}

/// Parse a `SearchQueryList`, keeping at most `max_queries` non-blank queries.
///
/// Falls back to searching `topic` itself when nothing usable is returned.
pub fn parse_search_query_list(text: &str, topic: &str, max_queries: usize) -> SearchQueryList {
    let mut list = parse_json::<SearchQueryList>(text, "SearchQueryList").unwrap_or_else(|| {
        SearchQueryList {
            query: Vec::new(),
            rationale: "fallback: searching the research topic directly".to_string(),
        }
    });

    list.query = list
        .query
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .take(max_queries.max(1))
        .collect();

    if list.query.is_empty() && !topic.trim().is_empty() {
        list.query.push(topic.trim().to_string());
    }
    list
}

/// Parse a `Reflection`. Unparseable output is treated as sufficient.
pub fn parse_reflection(text: &str) -> Reflection {
    let mut reflection = parse_json::<Reflection>(text, "Reflection").unwrap_or(Reflection {
        is_sufficient: true,
        knowledge_gap: String::new(),
        follow_up_queries: Vec::new(),
    });
    reflection.follow_up_queries = reflection
        .follow_up_queries
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect();
    reflection
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fenced_json() {
        let text = "Here you go:\n```json\n{\"query\": [\"a\", \"b\"], \"rationale\": \"r\"}\n```\nDone.";
        let list = parse_search_query_list(text, "topic", 3);
        assert_eq!(list.query, vec!["a", "b"]);
        assert_eq!(list.rationale, "r");
    }

    #[test]
    fn test_bare_json_with_prose() {
        let text = "Sure! {\"query\": [\"x\"]} hope that helps";
        let list = parse_search_query_list(text, "topic", 3);
        assert_eq!(list.query, vec!["x"]);
        assert_eq!(list.rationale, "generated search queries");
    }

    #[test]
    fn test_garbage_falls_back_to_topic() {
        let list = parse_search_query_list("no json here", "Who won Euro 2024?", 3);
        assert_eq!(list.query, vec!["Who won Euro 2024?"]);
    }

    #[test]
    fn test_invalid_json_falls_back_to_topic() {
        let list = parse_search_query_list("{\"query\": [\"a\",}", "topic", 3);
        assert_eq!(list.query, vec!["topic"]);
    }

    #[test]
    fn test_blank_queries_dropped_and_truncated() {
        let text = r#"{"query": ["  ", "one", "", "two", "three", "four"]}"#;
        let list = parse_search_query_list(text, "topic", 2);
        assert_eq!(list.query, vec!["one", "two"]);
    }

    #[test]
    fn test_empty_query_list_uses_topic() {
        let list = parse_search_query_list(r#"{"query": []}"#, "topic", 3);
        assert_eq!(list.query, vec!["topic"]);
    }

    #[test]
    fn test_reflection_parsed() {
        let text = r#"```json
{"is_sufficient": false, "knowledge_gap": "missing scorers", "follow_up_queries": ["euro 2024 final goals", " "]}
```"#;
        let reflection = parse_reflection(text);
        assert!(!reflection.is_sufficient);
        assert_eq!(reflection.knowledge_gap, "missing scorers");
        assert_eq!(reflection.follow_up_queries, vec!["euro 2024 final goals"]);
    }

    #[test]
    fn test_reflection_missing_fields_default() {
        let reflection = parse_reflection("{}");
        assert_eq!(reflection, Reflection::default());
    }

    #[test]
    fn test_reflection_garbage_is_sufficient() {
        let reflection = parse_reflection("I could not decide.");
        assert!(reflection.is_sufficient);
        assert!(reflection.follow_up_queries.is_empty());
    }

    #[test]
    fn test_unterminated_fence() {
        let reflection = parse_reflection("```json\n{\"is_sufficient\": true}");
        assert!(reflection.is_sufficient);
    }
}
