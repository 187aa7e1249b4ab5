//! # Sleuth Core
//!
//! Core library for the Sleuth research agent.
//! Provides the LLM interface (brain), the Gemini provider, the iterative
//! research graph with citation handling, the HTTP API, configuration,
//! and connectivity diagnostics.

pub mod brain;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod persistence;
pub mod providers;
pub mod research;
pub mod server;
pub mod types;

// Re-export commonly used types at the crate root.
pub use brain::{InvokeOptions, LlmClient, LlmProvider, MockLlmProvider};
pub use config::{LlmConfig, ResearchConfig, ServerConfig, SleuthConfig, load_config};
pub use error::{ConfigError, GraphError, LlmError, Result, ServerError, SleuthError};
pub use providers::create_provider;
pub use research::{OverallState, ResearchCallback, ResearchGraph};
pub use types::{
    CompletionRequest, CompletionResponse, GroundingMetadata, Message, Role, StreamEvent,
    TokenUsage,
};
