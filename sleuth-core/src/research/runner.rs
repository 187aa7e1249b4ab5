//! Drives the research graph from start to finish.
//!
//! ```text
//! START -> generate_query -> web_research (fan-out) -> reflection
//!                                  ^                       |
//!                                  +---- follow-ups -------+-> finalize_answer -> END
//! ```

use super::graph::{self, Route, node};
use super::prompts::get_research_topic;
use super::state::{OverallState, WebResearchOutput, WebSearchState};
use crate::brain::LlmClient;
use crate::config::ResearchConfig;
use crate::error::GraphError;
use futures::{StreamExt, TryStreamExt, stream};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{info, instrument};

/// Observer for research progress.
pub trait ResearchCallback: Send + Sync {
    /// A node is about to run.
    fn on_node_start(&self, node: &str);
    /// A node finished successfully.
    fn on_node_finish(&self, node: &str);
    /// One web search finished and its result was merged.
    fn on_query_complete(&self, query: &str, sources_found: usize);
    /// The run produced its final answer.
    fn on_complete(&self, state: &OverallState);
}

/// Callback that ignores every event.
pub struct NoOpResearchCallback;

impl ResearchCallback for NoOpResearchCallback {
    fn on_node_start(&self, _node: &str) {}
    fn on_node_finish(&self, _node: &str) {}
    fn on_query_complete(&self, _query: &str, _sources_found: usize) {}
    fn on_complete(&self, _state: &OverallState) {}
}

/// A recorded research event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ResearchEvent {
    NodeStart { node: String },
    NodeFinish { node: String },
    QueryComplete { query: String, sources_found: usize },
    Complete { sources: usize },
}

/// Callback that keeps every event in memory.
#[derive(Default)]
pub struct RecordingCallback {
    events: Mutex<Vec<ResearchEvent>>,
}

impl RecordingCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ResearchEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// How many times `node` started.
    pub fn node_runs(&self, node: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, ResearchEvent::NodeStart { node: n } if n == node))
            .count()
    }

    fn push(&self, event: ResearchEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

impl ResearchCallback for RecordingCallback {
    fn on_node_start(&self, node: &str) {
        self.push(ResearchEvent::NodeStart { node: node.into() });
    }

    fn on_node_finish(&self, node: &str) {
        self.push(ResearchEvent::NodeFinish { node: node.into() });
    }

    fn on_query_complete(&self, query: &str, sources_found: usize) {
        self.push(ResearchEvent::QueryComplete {
            query: query.into(),
            sources_found,
        });
    }

    fn on_complete(&self, state: &OverallState) {
        self.push(ResearchEvent::Complete {
            sources: state.sources_gathered.len(),
        });
    }
}

/// The compiled research graph.
pub struct ResearchGraph {
    client: Arc<LlmClient>,
    config: ResearchConfig,
    callback: Arc<dyn ResearchCallback>,
}

impl ResearchGraph {
    pub fn new(client: Arc<LlmClient>, config: ResearchConfig) -> Self {
        Self {
            client,
            config,
            callback: Arc::new(NoOpResearchCallback),
        }
    }

    pub fn with_callback(mut self, callback: Arc<dyn ResearchCallback>) -> Self {
        self.callback = callback;
        self
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    pub fn client(&self) -> &LlmClient {
        &self.client
    }

    /// Run the graph to completion and return the final state.
    ///
    /// Any node failure aborts the run.
    #[instrument(skip_all, fields(messages = state.messages.len()))]
    pub async fn invoke(&self, mut state: OverallState) -> Result<OverallState, GraphError> {
        if get_research_topic(&state.messages).trim().is_empty() {
            return Err(GraphError::EmptyTopic);
        }

        self.callback.on_node_start(node::GENERATE_QUERY);
        let queries = graph::generate_query(&state, &self.client, &self.config).await?;
        self.callback.on_node_finish(node::GENERATE_QUERY);

        let max_loops = state
            .max_research_loops
            .unwrap_or(self.config.max_research_loops);
        let mut pending = graph::continue_to_web_research(&queries);

        loop {
            self.run_searches(pending, &mut state).await?;

            if state.research_loop_count >= max_loops {
                break;
            }

            self.callback.on_node_start(node::REFLECTION);
            let reflection = graph::reflection(&mut state, &self.client, &self.config).await?;
            self.callback.on_node_finish(node::REFLECTION);

            match graph::evaluate_research(&reflection, &self.config, &state) {
                Route::WebResearch(follow_ups) => pending = follow_ups,
                Route::Finalize => break,
            }
        }

        self.callback.on_node_start(node::FINALIZE_ANSWER);
        graph::finalize_answer(&mut state, &self.client, &self.config).await?;
        self.callback.on_node_finish(node::FINALIZE_ANSWER);

        info!(
            loops = state.research_loop_count,
            queries = state.search_query.len(),
            sources = state.sources_gathered.len(),
            "Research complete"
        );
        self.callback.on_complete(&state);
        Ok(state)
    }

    /// Run searches concurrently and merge their results in id order.
    async fn run_searches(
        &self,
        searches: Vec<WebSearchState>,
        state: &mut OverallState,
    ) -> Result<(), GraphError> {
        let limit = self.config.max_parallel_searches.max(1);
        let client = &*self.client;
        let config = &self.config;
        let callback = &*self.callback;

        let mut outputs: Vec<(usize, WebResearchOutput)> = stream::iter(searches)
            .map(|search| async move {
                callback.on_node_start(node::WEB_RESEARCH);
                let output = graph::web_research(&search, client, config).await?;
                callback.on_node_finish(node::WEB_RESEARCH);
                Ok::<_, GraphError>((search.id, output))
            })
            .buffer_unordered(limit)
            .try_collect()
            .await?;

        outputs.sort_by_key(|(id, _)| *id);
        for (_, output) in outputs {
            self.callback
                .on_query_complete(&output.search_query, output.sources_gathered.len());
            state.merge(output);
        }
        Ok(())
    }
}
