//! State carried between research graph nodes.

use super::citations::CitationSegment;
use crate::types::Message;
use serde::{Deserialize, Serialize};

/// The accumulated state of one research run.
///
/// List fields only ever grow: node outputs are appended, never replaced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OverallState {
    pub messages: Vec<Message>,
    /// Every query that was searched, in the order results were merged.
    pub search_query: Vec<String>,
    /// One cited summary per entry in `search_query`.
    pub web_research_result: Vec<String>,
    pub sources_gathered: Vec<CitationSegment>,
    /// Overrides `number_of_initial_queries` when set.
    pub initial_search_query_count: Option<usize>,
    /// Overrides `max_research_loops` when set.
    pub max_research_loops: Option<usize>,
    pub research_loop_count: usize,
    /// Overrides both the reflection and answer models when set.
    pub reasoning_model: Option<String>,
}

impl OverallState {
    /// Start a run from a conversation.
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    /// Start a run from a single question.
    pub fn from_question(question: impl Into<String>) -> Self {
        Self::from_messages(vec![Message::user(question)])
    }

    /// Append one web-research result.
    pub fn merge(&mut self, output: WebResearchOutput) {
        self.search_query.push(output.search_query);
        self.web_research_result.push(output.web_research_result);
        self.sources_gathered.extend(output.sources_gathered);
    }

    /// The final answer, if the run has produced one.
    pub fn answer(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.name.as_deref() == Some(super::graph::RESEARCHER_NAME))
    }
}

/// Output of the query generation node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryGenerationState {
    pub query_list: Vec<String>,
}

/// Input for a single web-research call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSearchState {
    pub search_query: String,
    /// Unique per run; used to build short citation URLs.
    pub id: usize,
}

/// Output of the reflection node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectionState {
    pub is_sufficient: bool,
    pub knowledge_gap: String,
    pub follow_up_queries: Vec<String>,
    pub research_loop_count: usize,
    pub number_of_ran_queries: usize,
}

/// Output of one web-research call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebResearchOutput {
    pub search_query: String,
    pub web_research_result: String,
    pub sources_gathered: Vec<CitationSegment>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_appends() {
        let mut state = OverallState::from_question("q");
        let seg = CitationSegment {
            label: "wiki".into(),
            short_url: "https://short/0-0".into(),
            value: "https://long".into(),
        };
        state.merge(WebResearchOutput {
            search_query: "a".into(),
            web_research_result: "summary a".into(),
            sources_gathered: vec![seg.clone()],
        });
        state.merge(WebResearchOutput {
            search_query: "b".into(),
            web_research_result: "summary b".into(),
            sources_gathered: vec![seg],
        });
        assert_eq!(state.search_query, vec!["a", "b"]);
        assert_eq!(state.web_research_result, vec!["summary a", "summary b"]);
        assert_eq!(state.sources_gathered.len(), 2);
    }

    #[test]
    fn test_answer_finds_researcher_message() {
        let mut state = OverallState::from_question("q");
        assert!(state.answer().is_none());
        state
            .messages
            .push(Message::assistant("final").with_name("researcher"));
        assert_eq!(state.answer().map(|m| m.content.as_str()), Some("final"));
    }

    #[test]
    fn test_state_deserializes_with_defaults() {
        let state: OverallState = serde_json::from_str(
            r#"{"messages":[{"role":"user","content":"hi"}],"max_research_loops":1}"#,
        )
        .unwrap();
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.max_research_loops, Some(1));
        assert_eq!(state.research_loop_count, 0);
    }
}
