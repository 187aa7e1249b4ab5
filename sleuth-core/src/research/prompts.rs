//! Prompt templates for the research graph nodes.

use crate::types::{Message, Role};

/// Separator placed between web-research summaries in a prompt.
pub const SUMMARY_SEPARATOR: &str = "\n\n---\n\n";

/// Today's date, e.g. "October 18, 2026".
pub fn current_date() -> String {
    chrono::Local::now().format("%B %d, %Y").to_string()
}

/// Render the conversation as a research topic.
///
/// A single message is used verbatim; longer conversations are flattened
/// into `User:` / `Assistant:` lines. System messages are skipped.
pub fn get_research_topic(messages: &[Message]) -> String {
    if let [only] = messages {
        return only.content.clone();
    }
    messages
        .iter()
        .filter_map(|m| match m.role {
            Role::User => Some(format!("User: {}", m.content)),
            Role::Assistant => Some(format!("Assistant: {}", m.content)),
            Role::System => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn join_summaries(summaries: &[String]) -> String {
    summaries.join(SUMMARY_SEPARATOR)
}

const QUERY_JSON_FORMAT: &str = r#"Respond with a JSON object in exactly this format:
```json
{
    "query": ["first query", "second query"],
    "rationale": "Short explanation of why these queries are relevant"
}
```"#;

const REFLECTION_JSON_FORMAT: &str = r#"Respond with a JSON object in exactly this format:
```json
{
    "is_sufficient": true,
    "knowledge_gap": "What information is missing or needs clarification",
    "follow_up_queries": ["a specific follow-up question"]
}
```"#;

pub fn query_writer_prompt(topic: &str, number_queries: usize, date: &str) -> String {
    format!(
        "Your goal is to generate sophisticated and diverse web search queries. \
These queries are intended for an advanced automated web research tool capable of \
analyzing complex results, following links, and synthesizing information.

Instructions:
- Always prefer a single search query; only add another query if the original question \
requests multiple aspects or elements and one query is not enough.
- Each query should focus on one specific aspect of the original question.
- Don't produce more than {number_queries} queries.
- Queries should be diverse; if the topic is broad, generate more than 1 query.
- Don't generate multiple similar queries, 1 is enough.
- Queries should ensure that the most current information is gathered. The current date is {date}.

Context: {topic}

{QUERY_JSON_FORMAT}"
    )
}

pub fn web_searcher_prompt(query: &str, date: &str) -> String {
    format!(
        "Conduct targeted Google Searches to gather the most recent, credible information \
on \"{query}\" and synthesize it into a verifiable text artifact.

Instructions:
- Query should ensure that the most current information is gathered. The current date is {date}.
- Conduct multiple, diverse searches to gather comprehensive information.
- Consolidate key findings while meticulously tracking the source(s) for each specific piece of information.
- The output should be a well-written summary or report based on your search findings.
- Only include the information found in the search results, don't make up any information.

Research Topic:
{query}"
    )
}

pub fn reflection_prompt(topic: &str, summaries: &[String], date: &str) -> String {
    let summaries = join_summaries(summaries);
    format!(
        "You are an expert research assistant analyzing summaries about \"{topic}\". \
The current date is {date}.

Instructions:
- Identify knowledge gaps or areas that need deeper exploration and generate follow-up queries (1 or multiple).
- If the provided summaries are sufficient to answer the user's question, don't generate follow-up queries.
- If there is a knowledge gap, generate follow-up queries that would help expand understanding.
- Focus on technical details, implementation specifics, or emerging trends that weren't fully covered.

Requirements:
- Ensure each follow-up query is self-contained and includes the necessary context for web search.

Reflect carefully on the summaries to identify knowledge gaps and produce follow-up queries.

Summaries:
{summaries}

{REFLECTION_JSON_FORMAT}"
    )
}

pub fn answer_prompt(topic: &str, summaries: &[String], date: &str) -> String {
    let summaries = join_summaries(summaries);
    format!(
        "Generate a high-quality answer to the user's question based on the provided summaries.

Instructions:
- The current date is {date}.
- You are the final step of a multi-step research process; don't mention that you are the final step.
- You have access to all the information gathered from the previous steps.
- You have access to the user's question.
- Generate a high-quality answer to the user's question based on the provided summaries and the user's question.
- You MUST include all the citations from the summaries in the answer correctly.

User Context:
- {topic}

Summaries:
{summaries}"
    )
}
