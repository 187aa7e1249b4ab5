//! Iterative web research.
//!
//! A four-node graph: generate search queries, run grounded searches in
//! parallel, reflect on whether the summaries answer the question, then
//! either search again or write a cited answer.

pub mod citations;
pub mod graph;
pub mod prompts;
pub mod runner;
pub mod state;
pub mod structured;

pub use citations::{Citation, CitationSegment};
pub use graph::{RESEARCHER_NAME, Route};
pub use runner::{
    NoOpResearchCallback, RecordingCallback, ResearchCallback, ResearchEvent, ResearchGraph,
};
pub use state::{
    OverallState, QueryGenerationState, ReflectionState, WebResearchOutput, WebSearchState,
};
pub use structured::{Reflection, SearchQueryList};
