//! Error types for the Sleuth research core.
//!
//! Uses `thiserror` for public API error types with structured error variants
//! covering LLM calls, configuration, the research graph, and the HTTP server.

/// Top-level error type for the Sleuth core library.
#[derive(Debug, thiserror::Error)]
pub enum SleuthError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Research graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from LLM provider interactions.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Streaming error: {message}")]
    Streaming { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },

    #[error("Model {model} returned an empty response")]
    EmptyResponse { model: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Errors raised while running the research graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Node '{node}' failed: {source}")]
    NodeFailed {
        node: String,
        #[source]
        source: LlmError,
    },

    #[error("Research topic is empty")]
    EmptyTopic,
}

/// Errors from the HTTP API server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Thread not found: {thread_id}")]
    ThreadNotFound { thread_id: String },

    #[error("Run not found: {run_id}")]
    RunNotFound { run_id: String },

    #[error("Invalid request: {message}")]
    BadRequest { message: String },

    #[error("Run {run_id} was aborted: {message}")]
    RunAborted { run_id: String, message: String },
}

impl GraphError {
    /// Wrap an LLM error with the name of the node that produced it.
    pub fn node(node: impl Into<String>, source: LlmError) -> Self {
        GraphError::NodeFailed {
            node: node.into(),
            source,
        }
    }
}

/// A type alias for results using the top-level `SleuthError`.
pub type Result<T> = std::result::Result<T, SleuthError>;
