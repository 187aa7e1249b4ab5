//! Core type definitions for Sleuth.
//!
//! Defines the conversation messages exchanged with the research graph and
//! the request/response shapes used by LLM providers, including the
//! grounding metadata returned by search-grounded generation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Represents a participant role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    #[serde(alias = "human")]
    User,
    #[serde(alias = "ai")]
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single message in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    /// Optional author name (the final answer is tagged `researcher`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a new message with auto-generated ID and current timestamp.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            name: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// Create an assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// Attach an author name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Token usage reported by a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl TokenUsage {
    pub fn total(&self) -> usize {
        self.input_tokens + self.output_tokens
    }

    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// A web source referenced by grounding metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingChunk {
    pub uri: String,
    pub title: String,
}

/// A span of generated text supported by one or more grounding chunks.
///
/// Indices are UTF-8 byte offsets into the generated text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingSupport {
    pub start_index: usize,
    pub end_index: Option<usize>,
    pub chunk_indices: Vec<usize>,
}

/// Grounding metadata attached to a search-grounded completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingMetadata {
    pub chunks: Vec<GroundingChunk>,
    pub supports: Vec<GroundingSupport>,
    #[serde(default)]
    pub web_search_queries: Vec<String>,
}

/// A stream event received during LLM response streaming.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Token(String),
    Done { usage: TokenUsage },
    Error(String),
}

/// The result of an LLM completion request.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub text: String,
    pub model: String,
    pub usage: TokenUsage,
    pub finish_reason: Option<String>,
    pub grounding: Option<GroundingMetadata>,
}

/// A single-prompt request to the LLM.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    /// Model override; the provider default is used when `None`.
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: Option<usize>,
    /// Enable the provider's search tool and return grounding metadata.
    pub grounded_search: bool,
}

impl Default for CompletionRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            model: None,
            temperature: 0.7,
            max_tokens: None,
            grounded_search: false,
        }
    }
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::user("Hello, world!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello, world!");
        assert!(msg.name.is_none());
    }

    #[test]
    fn test_message_with_name() {
        let msg = Message::assistant("done").with_name("researcher");
        assert_eq!(msg.name.as_deref(), Some("researcher"));
    }

    #[test]
    fn test_message_deserializes_minimal_json() {
        let msg: Message =
            serde_json::from_str(r#"{"role":"human","content":"Who won the Euro 2024?"}"#)
                .unwrap();
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Who won the Euro 2024?");
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::System.to_string(), "system");
        assert_eq!(Role::User.to_string(), "user");
        assert_eq!(Role::Assistant.to_string(), "assistant");
    }

    #[test]
    fn test_token_usage_accumulate() {
        let mut usage = TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
        };
        usage.accumulate(&TokenUsage {
            input_tokens: 3,
            output_tokens: 2,
        });
        assert_eq!(usage.input_tokens, 13);
        assert_eq!(usage.output_tokens, 7);
        assert_eq!(usage.total(), 20);
    }

    #[test]
    fn test_completion_request_defaults() {
        let req = CompletionRequest::new("hi");
        assert_eq!(req.prompt, "hi");
        assert!(!req.grounded_search);
        assert!(req.model.is_none());
    }
}
