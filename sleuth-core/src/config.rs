//! Configuration system for Sleuth.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from `~/.config/sleuth/config.toml` and/or `.sleuth/config.toml`
//! in the workspace directory.

use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default Gemini model used for every node unless overridden.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SleuthConfig {
    pub llm: LlmConfig,
    pub research: ResearchConfig,
    pub server: ServerConfig,
}

/// LLM provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name: "gemini" or "mock".
    pub provider: String,
    /// Default model identifier.
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Explicit API key. Takes precedence over `api_key_env` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Optional base URL override for the API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Default temperature for generation.
    pub temperature: f32,
    /// Upper bound for a single LLM call, including reading the body.
    pub request_timeout_secs: u64,
    /// TCP/TLS connect timeout for the HTTP client.
    pub connect_timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            api_key: None,
            base_url: None,
            max_tokens: 2048,
            temperature: 0.7,
            request_timeout_secs: 120,
            connect_timeout_secs: 10,
            retry: RetryConfig::default(),
        }
    }
}

impl LlmConfig {
    /// Resolve the API key from the explicit field or the configured env var.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|k| !k.trim().is_empty())
    }

    /// Validate this LLM config and return any warnings.
    ///
    /// Returns human-readable warning messages for problematic values; never errors.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.temperature < 0.0 || self.temperature > 2.0 {
            warnings.push(format!(
                "temperature ({}) is outside the typical range 0.0–2.0",
                self.temperature
            ));
        }
        if self.request_timeout_secs == 0 {
            warnings.push("request_timeout_secs is 0; every LLM call will time out".to_string());
        }
        if self.provider == "gemini" {
            match self.resolve_api_key() {
                None => warnings.push(format!(
                    "no API key found (set {} or llm.api_key)",
                    self.api_key_env
                )),
                Some(key) if !key.starts_with("AIza") => warnings.push(format!(
                    "{} does not start with 'AIza'; it may not be a valid Gemini key",
                    self.api_key_env
                )),
                Some(_) => {}
            }
        }
        warnings
    }
}

/// Retry policy for transient LLM failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: usize,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_secs: 1,
            max_backoff_secs: 32,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff for the given zero-based attempt, capped at `max_backoff_secs`.
    pub fn backoff_secs(&self, attempt: usize) -> u64 {
        let factor = 1u64.checked_shl(attempt as u32).unwrap_or(u64::MAX);
        self.initial_backoff_secs
            .saturating_mul(factor)
            .min(self.max_backoff_secs)
    }
}

/// Research graph configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    /// Model used for query generation and web research.
    pub query_generator_model: String,
    /// Model used for reflection.
    pub reflection_model: String,
    /// Model used for the final answer.
    pub answer_model: String,
    /// Number of search queries generated on the first pass.
    pub number_of_initial_queries: usize,
    /// Maximum reflection passes before the answer is forced.
    pub max_research_loops: usize,
    /// Web-research calls allowed in flight at once.
    pub max_parallel_searches: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            query_generator_model: DEFAULT_MODEL.to_string(),
            reflection_model: DEFAULT_MODEL.to_string(),
            answer_model: DEFAULT_MODEL.to_string(),
            number_of_initial_queries: 3,
            max_research_loops: 2,
            max_parallel_searches: 4,
        }
    }
}

impl ResearchConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.number_of_initial_queries == 0 {
            warnings.push(
                "number_of_initial_queries is 0; the research topic will be searched directly"
                    .to_string(),
            );
        }
        if self.max_research_loops == 0 {
            warnings.push(
                "max_research_loops is 0; no follow-up research will be performed".to_string(),
            );
        }
        if self.max_parallel_searches == 0 {
            warnings.push("max_parallel_searches is 0; treated as 1".to_string());
        }
        warnings
    }
}

/// HTTP API server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 2024,
        }
    }
}

impl SleuthConfig {
    /// Collect warnings from every section.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.llm.validate();
        warnings.extend(self.research.validate());
        warnings
    }
}

/// Location of the user-level config file, if a home directory is known.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "sleuth", "sleuth")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Location of the workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".sleuth").join("config.toml")
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `SLEUTH_`)
/// 3. Workspace-local config (`.sleuth/config.toml`)
/// 4. User config (`~/.config/sleuth/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&SleuthConfig>,
) -> Result<SleuthConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(SleuthConfig::default()));

    if let Some(user_config) = user_config_path()
        && user_config.exists()
    {
        figment = figment.merge(Toml::file(&user_config));
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // SLEUTH_LLM__MODEL, SLEUTH_RESEARCH__MAX_RESEARCH_LOOPS, ...
    figment = figment.merge(Env::prefixed("SLEUTH_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })
}
