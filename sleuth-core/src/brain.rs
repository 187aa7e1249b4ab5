//! Brain module: LLM provider abstraction and the call wrapper used by graph nodes.
//!
//! Defines the `LlmProvider` trait for model-agnostic completions and
//! `LlmClient`, which adds per-call timeouts, retry with exponential backoff,
//! and usage tracking on top of any provider.

use crate::config::{LlmConfig, RetryConfig};
use crate::error::LlmError;
use crate::types::{
    CompletionRequest, CompletionResponse, GroundingMetadata, StreamEvent, TokenUsage,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Trait for LLM providers, supporting both full and streaming completions.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Perform a streaming completion, sending events to the channel.
    async fn complete_streaming(
        &self,
        request: CompletionRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError>;

    /// Return the default model name.
    fn model_name(&self) -> &str;

    /// Whether this provider supports web grounding / search.
    fn supports_grounding(&self) -> bool {
        false
    }
}

/// Per-call options for [`LlmClient::invoke`].
#[derive(Debug, Clone)]
pub struct InvokeOptions {
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: Option<usize>,
    pub grounded_search: bool,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.7,
            max_tokens: None,
            grounded_search: false,
        }
    }
}

impl InvokeOptions {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn grounded(mut self) -> Self {
        self.grounded_search = true;
        self
    }
}

/// Wraps a shared provider with timeout, retry, and usage tracking.
///
/// Cheap to share behind an `Arc`; graph nodes running in parallel call
/// `invoke` concurrently.
pub struct LlmClient {
    provider: Arc<dyn LlmProvider>,
    retry: RetryConfig,
    timeout: Duration,
    max_tokens: usize,
    usage: Mutex<TokenUsage>,
    calls: Mutex<usize>,
}

impl LlmClient {
    pub fn new(provider: Arc<dyn LlmProvider>, config: &LlmConfig) -> Self {
        Self {
            provider,
            retry: config.retry.clone(),
            timeout: Duration::from_secs(config.request_timeout_secs),
            max_tokens: config.max_tokens,
            usage: Mutex::new(TokenUsage::default()),
            calls: Mutex::new(0),
        }
    }

    /// Send one prompt, retrying transient failures.
    pub async fn invoke(
        &self,
        prompt: impl Into<String>,
        options: InvokeOptions,
    ) -> Result<CompletionResponse, LlmError> {
        let request = CompletionRequest {
            prompt: prompt.into(),
            model: options.model,
            temperature: options.temperature,
            max_tokens: options.max_tokens.or(Some(self.max_tokens)),
            grounded_search: options.grounded_search,
        };
        let max_retries = self.retry.max_retries;

        for attempt in 0..=max_retries {
            match self.complete_once(request.clone()).await {
                Ok(response) => {
                    self.track_usage(&response.usage);
                    return Ok(response);
                }
                Err(e) if Self::is_retryable(&e) && attempt < max_retries => {
                    let backoff_secs = self.retry.backoff_secs(attempt);
                    let wait = match &e {
                        LlmError::RateLimited { retry_after_secs } => {
                            std::cmp::max(*retry_after_secs, backoff_secs)
                        }
                        _ => backoff_secs,
                    };
                    info!(
                        attempt = attempt + 1,
                        max_retries,
                        backoff_secs = wait,
                        error = %e,
                        "Retrying after transient error"
                    );
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(LlmError::Connection {
            message: "Max retries exceeded".to_string(),
        })
    }

    /// Like [`invoke`](Self::invoke) but returns only the text, failing on an empty reply.
    pub async fn invoke_text(
        &self,
        prompt: impl Into<String>,
        options: InvokeOptions,
    ) -> Result<String, LlmError> {
        let model = options
            .model
            .clone()
            .unwrap_or_else(|| self.provider.model_name().to_string());
        let response = self.invoke(prompt, options).await?;
        if response.text.trim().is_empty() {
            return Err(LlmError::EmptyResponse { model });
        }
        Ok(response.text)
    }

    /// Stream a single prompt. No retry: tokens may already have been delivered.
    pub async fn stream(
        &self,
        prompt: impl Into<String>,
        options: InvokeOptions,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError> {
        let request = CompletionRequest {
            prompt: prompt.into(),
            model: options.model,
            temperature: options.temperature,
            max_tokens: options.max_tokens.or(Some(self.max_tokens)),
            grounded_search: options.grounded_search,
        };
        self.provider.complete_streaming(request, tx).await
    }

    async fn complete_once(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, LlmError> {
        debug!(
            model = request.model.as_deref().unwrap_or(self.provider.model_name()),
            grounded = request.grounded_search,
            prompt_chars = request.prompt.len(),
            "Sending completion request"
        );
        *self.calls.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        match tokio::time::timeout(self.timeout, self.provider.complete(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "LLM call exceeded timeout"
                );
                Err(LlmError::Timeout {
                    timeout_secs: self.timeout.as_secs(),
                })
            }
        }
    }

    /// Check if an LLM error is transient and should be retried.
    pub fn is_retryable(error: &LlmError) -> bool {
        matches!(
            error,
            LlmError::RateLimited { .. } | LlmError::Timeout { .. } | LlmError::Connection { .. }
        )
    }

    fn track_usage(&self, usage: &TokenUsage) {
        self.usage
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .accumulate(usage);
    }

    /// Total token usage across all successful calls.
    pub fn total_usage(&self) -> TokenUsage {
        *self.usage.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of attempts sent to the provider, retries included.
    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Get the default model name.
    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Get a reference to the underlying LLM provider.
    pub fn provider(&self) -> &dyn LlmProvider {
        &*self.provider
    }
}

type MockHandler =
    Box<dyn Fn(&CompletionRequest) -> Result<CompletionResponse, LlmError> + Send + Sync>;

/// A mock LLM provider for testing and development.
///
/// Queued responses are returned first, in order. Once the queue is empty the
/// optional handler is consulted, then a fixed placeholder reply.
pub struct MockLlmProvider {
    model: String,
    responses: Mutex<VecDeque<Result<CompletionResponse, LlmError>>>,
    handler: Option<MockHandler>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            responses: Mutex::new(VecDeque::new()),
            handler: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a MockLlmProvider that always returns the given text.
    pub fn with_response(text: &str) -> Self {
        let text = text.to_string();
        Self::with_handler(move |_| Ok(Self::text_response(&text)))
    }

    /// Create a MockLlmProvider that computes each reply from the request.
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<CompletionResponse, LlmError> + Send + Sync + 'static,
    {
        Self {
            handler: Some(Box::new(handler)),
            ..Self::new()
        }
    }

    /// Queue a response to be returned by the next `complete` call.
    pub fn queue_response(&self, response: CompletionResponse) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Ok(response));
    }

    /// Queue an error to be returned by the next `complete` call.
    pub fn queue_error(&self, error: LlmError) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Err(error));
    }

    /// Requests seen so far, in call order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Create a simple text response for testing.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            text: text.to_string(),
            model: "mock-model".to_string(),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            finish_reason: Some("STOP".to_string()),
            grounding: None,
        }
    }

    /// Create a search-grounded response for testing.
    pub fn grounded_response(text: &str, grounding: GroundingMetadata) -> CompletionResponse {
        CompletionResponse {
            grounding: Some(grounding),
            ..Self::text_response(text)
        }
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        let queued = self
            .responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match (queued, &self.handler) {
            (Some(result), _) => result,
            (None, Some(handler)) => handler(&request),
            (None, None) => Ok(MockLlmProvider::text_response(
                "I'm a mock LLM. No queued responses available.",
            )),
        }
    }

    async fn complete_streaming(
        &self,
        request: CompletionRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError> {
        let response = self.complete(request).await?;
        for word in response.text.split_whitespace() {
            let _ = tx.send(StreamEvent::Token(format!("{} ", word))).await;
        }
        let _ = tx
            .send(StreamEvent::Done {
                usage: response.usage,
            })
            .await;
        Ok(())
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn supports_grounding(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_with(provider: Arc<MockLlmProvider>, max_retries: usize) -> LlmClient {
        let config = LlmConfig {
            provider: "mock".into(),
            request_timeout_secs: 5,
            retry: RetryConfig {
                max_retries,
                initial_backoff_secs: 1,
                max_backoff_secs: 4,
            },
            ..Default::default()
        };
        LlmClient::new(provider, &config)
    }

    #[tokio::test]
    async fn test_invoke_returns_queued_response() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_response(MockLlmProvider::text_response("hello"));
        let client = client_with(provider.clone(), 0);

        let response = client
            .invoke("prompt", InvokeOptions::default().temperature(0.0))
            .await
            .unwrap();
        assert_eq!(response.text, "hello");
        assert_eq!(client.total_usage().total(), 150);

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].temperature, 0.0);
        assert_eq!(requests[0].max_tokens, Some(2048));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoke_retries_transient_errors() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_error(LlmError::Connection {
            message: "reset".into(),
        });
        provider.queue_error(LlmError::RateLimited {
            retry_after_secs: 2,
        });
        provider.queue_response(MockLlmProvider::text_response("recovered"));
        let client = client_with(provider.clone(), 3);

        let response = client
            .invoke("prompt", InvokeOptions::default())
            .await
            .unwrap();
        assert_eq!(response.text, "recovered");
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoke_gives_up_after_max_retries() {
        let provider = Arc::new(MockLlmProvider::new());
        for _ in 0..3 {
            provider.queue_error(LlmError::Timeout { timeout_secs: 1 });
        }
        let client = client_with(provider.clone(), 2);

        let err = client
            .invoke("prompt", InvokeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Timeout { .. }));
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_returned_immediately() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_error(LlmError::AuthFailed {
            provider: "Gemini".into(),
        });
        let client = client_with(provider.clone(), 5);

        let err = client
            .invoke("prompt", InvokeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::AuthFailed { .. }));
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_invoke_text_rejects_empty_reply() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_response(MockLlmProvider::text_response("   "));
        let client = client_with(provider, 0);

        let err = client
            .invoke_text("prompt", InvokeOptions::default().model("gemini-x"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse { model } if model == "gemini-x"));
    }

    #[tokio::test]
    async fn test_stream_forwards_tokens() {
        let provider = Arc::new(MockLlmProvider::with_response("one two"));
        let client = client_with(provider, 0);
        let (tx, mut rx) = mpsc::channel(8);

        client
            .stream("prompt", InvokeOptions::default(), tx)
            .await
            .unwrap();

        let mut tokens = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Token(t) => tokens.push(t),
                StreamEvent::Done { .. } => break,
                StreamEvent::Error(e) => panic!("unexpected error {e}"),
            }
        }
        assert_eq!(tokens, vec!["one ", "two "]);
    }

    #[test]
    fn test_is_retryable() {
        assert!(LlmClient::is_retryable(&LlmError::Timeout {
            timeout_secs: 1
        }));
        assert!(!LlmClient::is_retryable(&LlmError::ResponseParse {
            message: "bad".into()
        }));
    }
}
