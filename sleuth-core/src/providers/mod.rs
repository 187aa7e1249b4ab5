//! LLM provider implementations.
//!
//! Provides concrete implementations of the `LlmProvider` trait:
//! - Google Gemini API (search-grounded generation)
//! - A mock provider for offline runs and tests
//!
//! Use `create_provider()` to instantiate the appropriate provider based on config.

pub mod gemini;

use crate::brain::{LlmProvider, MockLlmProvider};
use crate::config::LlmConfig;
use crate::error::{ConfigError, LlmError, SleuthError};
use std::sync::Arc;

pub use gemini::GeminiProvider;

/// Instantiate the provider named in `config.provider`.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, SleuthError> {
    match config.provider.to_lowercase().as_str() {
        "gemini" | "google" => {
            let provider = GeminiProvider::new(config).map_err(|e| match e {
                LlmError::AuthFailed { .. } => SleuthError::Config(ConfigError::EnvVarMissing {
                    var: config.api_key_env.clone(),
                }),
                other => SleuthError::Llm(other),
            })?;
            Ok(Arc::new(provider))
        }
        "mock" => Ok(Arc::new(MockLlmProvider::new())),
        other => Err(SleuthError::Config(ConfigError::Invalid {
            message: format!("unknown LLM provider '{}' (expected gemini or mock)", other),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_mock_provider() {
        let config = LlmConfig {
            provider: "mock".into(),
            ..Default::default()
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), "mock-model");
    }

    #[test]
    fn test_create_gemini_provider_with_key() {
        let config = LlmConfig {
            provider: "Gemini".into(),
            api_key: Some("AIzaTest".into()),
            ..Default::default()
        };
        let provider = create_provider(&config).unwrap();
        assert!(provider.supports_grounding());
        assert_eq!(provider.model_name(), crate::config::DEFAULT_MODEL);
    }

    #[test]
    fn test_create_gemini_provider_missing_key() {
        let config = LlmConfig {
            api_key_env: "SLEUTH_PROVIDER_TEST_MISSING".into(),
            ..Default::default()
        };
        let err = create_provider(&config).err().unwrap();
        assert!(matches!(
            err,
            SleuthError::Config(ConfigError::EnvVarMissing { var }) if var == "SLEUTH_PROVIDER_TEST_MISSING"
        ));
    }

    #[test]
    fn test_create_unknown_provider() {
        let config = LlmConfig {
            provider: "openai".into(),
            ..Default::default()
        };
        assert!(matches!(
            create_provider(&config),
            Err(SleuthError::Config(ConfigError::Invalid { .. }))
        ));
    }
}
