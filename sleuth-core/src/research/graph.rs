//! Research graph nodes and routing.
//!
//! Each node is a plain async function over the shared state. The runner in
//! [`super::runner`] wires them together; tests can drive nodes one at a time.

use super::citations::{get_citations, insert_citation_markers, replace_short_urls, resolve_urls};
use super::prompts::{
    answer_prompt, current_date, get_research_topic, query_writer_prompt, reflection_prompt,
    web_searcher_prompt,
};
use super::state::{
    OverallState, QueryGenerationState, ReflectionState, WebResearchOutput, WebSearchState,
};
use super::structured::{parse_reflection, parse_search_query_list};
use crate::brain::{InvokeOptions, LlmClient};
use crate::config::ResearchConfig;
use crate::error::GraphError;
use crate::types::Message;
use tracing::{info, warn};

/// Author name attached to the final answer.
pub const RESEARCHER_NAME: &str = "researcher";

/// Node names, used in logs, callbacks and errors.
pub mod node {
    pub const GENERATE_QUERY: &str = "generate_query";
    pub const WEB_RESEARCH: &str = "web_research";
    pub const REFLECTION: &str = "reflection";
    pub const FINALIZE_ANSWER: &str = "finalize_answer";
}

/// Where the graph goes after reflection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    WebResearch(Vec<WebSearchState>),
    Finalize,
}

/// Ask the model for the initial search queries.
pub async fn generate_query(
    state: &OverallState,
    client: &LlmClient,
    config: &ResearchConfig,
) -> Result<QueryGenerationState, GraphError> {
    let count = state
        .initial_search_query_count
        .unwrap_or(config.number_of_initial_queries);
    let topic = get_research_topic(&state.messages);
    info!(node = node::GENERATE_QUERY, count, "Generating search queries");

    let prompt = query_writer_prompt(&topic, count, &current_date());
    let text = client
        .invoke(
            prompt,
            InvokeOptions::default()
                .model(&config.query_generator_model)
                .temperature(1.0),
        )
        .await
        .map_err(|e| GraphError::node(node::GENERATE_QUERY, e))?
        .text;

    let list = parse_search_query_list(&text, &topic, count);
    info!(
        node = node::GENERATE_QUERY,
        queries = list.query.len(),
        rationale = list.rationale.as_str(),
        "Search queries generated"
    );
    Ok(QueryGenerationState {
        query_list: list.query,
    })
}

/// Fan the generated queries out to web research, numbering them from 0.
pub fn continue_to_web_research(queries: &QueryGenerationState) -> Vec<WebSearchState> {
    queries
        .query_list
        .iter()
        .enumerate()
        .map(|(id, q)| WebSearchState {
            search_query: q.clone(),
            id,
        })
        .collect()
}

/// Run one grounded search and return its cited summary.
pub async fn web_research(
    search: &WebSearchState,
    client: &LlmClient,
    config: &ResearchConfig,
) -> Result<WebResearchOutput, GraphError> {
    info!(
        node = node::WEB_RESEARCH,
        id = search.id,
        query = search.search_query.as_str(),
        "Starting web research"
    );
    let prompt = web_searcher_prompt(&search.search_query, &current_date());
    let response = client
        .invoke(
            prompt,
            InvokeOptions::default()
                .model(&config.query_generator_model)
                .temperature(0.0)
                .grounded(),
        )
        .await
        .map_err(|e| GraphError::node(node::WEB_RESEARCH, e))?;

    let (text, sources) = match &response.grounding {
        Some(grounding) => {
            let resolved = resolve_urls(&grounding.chunks, search.id);
            let citations = get_citations(grounding, &resolved);
            let text = insert_citation_markers(&response.text, &citations);
            let sources = citations.into_iter().flat_map(|c| c.segments).collect();
            (text, sources)
        }
        None => {
            warn!(
                node = node::WEB_RESEARCH,
                id = search.id,
                "Response carried no grounding metadata; summary has no citations"
            );
            (response.text, Vec::new())
        }
    };

    info!(
        node = node::WEB_RESEARCH,
        id = search.id,
        sources = sources.len(),
        "Web research finished"
    );
    Ok(WebResearchOutput {
        search_query: search.search_query.clone(),
        web_research_result: text,
        sources_gathered: sources,
    })
}

/// Judge whether the summaries answer the topic. Increments the loop count.
pub async fn reflection(
    state: &mut OverallState,
    client: &LlmClient,
    config: &ResearchConfig,
) -> Result<ReflectionState, GraphError> {
    state.research_loop_count += 1;
    let model = state
        .reasoning_model
        .clone()
        .unwrap_or_else(|| config.reflection_model.clone());
    info!(
        node = node::REFLECTION,
        loop_count = state.research_loop_count,
        model = model.as_str(),
        "Reflecting on research"
    );

    let topic = get_research_topic(&state.messages);
    let prompt = reflection_prompt(&topic, &state.web_research_result, &current_date());
    let text = client
        .invoke(
            prompt,
            InvokeOptions::default().model(model).temperature(0.0),
        )
        .await
        .map_err(|e| GraphError::node(node::REFLECTION, e))?
        .text;

    let reflection = parse_reflection(&text);
    info!(
        node = node::REFLECTION,
        is_sufficient = reflection.is_sufficient,
        follow_ups = reflection.follow_up_queries.len(),
        "Reflection finished"
    );
    Ok(ReflectionState {
        is_sufficient: reflection.is_sufficient,
        knowledge_gap: reflection.knowledge_gap,
        follow_up_queries: reflection.follow_up_queries,
        research_loop_count: state.research_loop_count,
        number_of_ran_queries: state.search_query.len(),
    })
}

/// Decide between another round of web research and the final answer.
pub fn evaluate_research(
    reflection: &ReflectionState,
    config: &ResearchConfig,
    state: &OverallState,
) -> Route {
    let max_loops = state.max_research_loops.unwrap_or(config.max_research_loops);
    if reflection.research_loop_count >= max_loops {
        info!(max_loops, "Reached research loop limit");
        return Route::Finalize;
    }
    if reflection.is_sufficient {
        info!("Research judged sufficient");
        return Route::Finalize;
    }

    let follow_ups: Vec<WebSearchState> = reflection
        .follow_up_queries
        .iter()
        .map(|q| q.trim())
        .filter(|q| !q.is_empty())
        .enumerate()
        .map(|(idx, q)| WebSearchState {
            search_query: q.to_string(),
            id: reflection.number_of_ran_queries + idx,
        })
        .collect();

    if follow_ups.is_empty() {
        info!("No follow-up queries; finalizing");
        Route::Finalize
    } else {
        info!(follow_ups = follow_ups.len(), "Continuing research");
        Route::WebResearch(follow_ups)
    }
}

/// Write the final answer and keep only the sources it cites.
pub async fn finalize_answer(
    state: &mut OverallState,
    client: &LlmClient,
    config: &ResearchConfig,
) -> Result<(), GraphError> {
    let model = state
        .reasoning_model
        .clone()
        .unwrap_or_else(|| config.answer_model.clone());
    info!(node = node::FINALIZE_ANSWER, model = model.as_str(), "Writing final answer");

    let topic = get_research_topic(&state.messages);
    let prompt = answer_prompt(&topic, &state.web_research_result, &current_date());
    let text = client
        .invoke_text(
            prompt,
            InvokeOptions::default().model(model).temperature(0.0),
        )
        .await
        .map_err(|e| GraphError::node(node::FINALIZE_ANSWER, e))?;

    let (answer, used) = replace_short_urls(&text, &state.sources_gathered);
    info!(
        node = node::FINALIZE_ANSWER,
        sources = used.len(),
        "Final answer written"
    );
    state.sources_gathered = used;
    state
        .messages
        .push(Message::assistant(answer).with_name(RESEARCHER_NAME));
    Ok(())
}
