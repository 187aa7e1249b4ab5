//! Google Gemini API provider implementation.
//!
//! Implements the `LlmProvider` trait for the native Google Gemini REST API,
//! supporting plain and search-grounded completions, both full and streaming.
//!
//! Key details of the Gemini API:
//! - Auth via the `x-goog-api-key` header, so the key never appears in a URL
//! - Search grounding is enabled with a `google_search` tool entry
//! - Grounding metadata (`groundingChunks` / `groundingSupports`) lives on the candidate
//! - Streaming uses `?alt=sse` query parameter

use crate::brain::LlmProvider;
use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::types::{
    CompletionRequest, CompletionResponse, GroundingChunk, GroundingMetadata, GroundingSupport,
    StreamEvent, TokenUsage,
};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// The default Google Gemini API base URL.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Google Gemini API provider.
pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: usize,
}

impl GeminiProvider {
    /// Create a new Gemini provider from configuration.
    ///
    /// Reads the API key from `config.api_key` or the environment variable named by
    /// `config.api_key_env`. Returns `LlmError::AuthFailed` if neither is set.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config
            .resolve_api_key()
            .ok_or_else(|| LlmError::AuthFailed {
                provider: format!("Gemini (env var '{}' not set)", config.api_key_env),
            })?;
        Self::new_with_key(config, api_key)
    }

    /// Create a new Gemini provider with an explicitly provided API key.
    pub fn new_with_key(config: &LlmConfig, api_key: String) -> Result<Self, LlmError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| LlmError::Connection {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url,
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    /// Build the JSON request body for the Gemini API.
    fn build_request_body(&self, request: &CompletionRequest) -> Value {
        let max_tokens = request.max_tokens.unwrap_or(self.max_tokens);

        let mut body = serde_json::json!({
            "contents": [{
                "role": "user",
                "parts": [{"text": request.prompt}],
            }],
            "generationConfig": {
                "maxOutputTokens": max_tokens,
                "temperature": request.temperature,
            },
        });

        if request.grounded_search {
            body["tools"] = serde_json::json!([{"google_search": {}}]);
        }

        body
    }

    /// Parse a Gemini API response JSON into a `CompletionResponse`.
    fn parse_response(body: &Value) -> Result<CompletionResponse, LlmError> {
        let candidates = body["candidates"]
            .as_array()
            .ok_or_else(|| LlmError::ResponseParse {
                message: "Missing 'candidates' array in response".to_string(),
            })?;

        let candidate = candidates.first().ok_or_else(|| LlmError::ResponseParse {
            message: "Empty 'candidates' array in response".to_string(),
        })?;

        let text = candidate["content"]["parts"]
            .as_array()
            .map(|parts| Self::collect_text(parts))
            .unwrap_or_default();

        let finish_reason = candidate["finishReason"].as_str().map(|s| s.to_string());
        let grounding = Self::parse_grounding(&candidate["groundingMetadata"]);

        let model = body["modelVersion"]
            .as_str()
            .unwrap_or("gemini")
            .to_string();

        Ok(CompletionResponse {
            text,
            model,
            usage: Self::parse_usage(&body["usageMetadata"]),
            finish_reason,
            grounding,
        })
    }

    /// Concatenate the text of all non-thought parts.
    fn collect_text(parts: &[Value]) -> String {
        parts
            .iter()
            .filter(|p| !p["thought"].as_bool().unwrap_or(false))
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect()
    }

    fn parse_usage(usage_metadata: &Value) -> TokenUsage {
        TokenUsage {
            input_tokens: usage_metadata["promptTokenCount"].as_u64().unwrap_or(0) as usize,
            output_tokens: usage_metadata["candidatesTokenCount"].as_u64().unwrap_or(0) as usize,
        }
    }

    /// Extract grounding chunks and supports from a candidate's `groundingMetadata`.
    ///
    /// Returns `None` when the candidate carries no grounding metadata at all.
    fn parse_grounding(metadata: &Value) -> Option<GroundingMetadata> {
        if !metadata.is_object() {
            return None;
        }

        let chunks = metadata["groundingChunks"]
            .as_array()
            .map(|chunks| {
                chunks
                    .iter()
                    .map(|chunk| {
                        let web = &chunk["web"];
                        GroundingChunk {
                            uri: web["uri"].as_str().unwrap_or_default().to_string(),
                            title: web["title"].as_str().unwrap_or_default().to_string(),
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        let supports = metadata["groundingSupports"]
            .as_array()
            .map(|supports| {
                supports
                    .iter()
                    .map(|support| {
                        let segment = &support["segment"];
                        GroundingSupport {
                            start_index: segment["startIndex"].as_u64().unwrap_or(0) as usize,
                            end_index: segment["endIndex"].as_u64().map(|i| i as usize),
                            chunk_indices: support["groundingChunkIndices"]
                                .as_array()
                                .map(|idx| {
                                    idx.iter()
                                        .filter_map(|i| i.as_u64())
                                        .map(|i| i as usize)
                                        .collect()
                                })
                                .unwrap_or_default(),
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        let web_search_queries = metadata["webSearchQueries"]
            .as_array()
            .map(|q| {
                q.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        Some(GroundingMetadata {
            chunks,
            supports,
            web_search_queries,
        })
    }

    /// Map an HTTP status code to the appropriate `LlmError`.
    fn map_http_error(status: reqwest::StatusCode, body_text: &str) -> LlmError {
        match status.as_u16() {
            401 | 403 => LlmError::AuthFailed {
                provider: "Gemini".to_string(),
            },
            429 => LlmError::RateLimited {
                retry_after_secs: 30,
            },
            500..=599 => LlmError::Connection {
                message: format!("HTTP {} from Gemini API: {}", status, body_text),
            },
            _ => LlmError::ApiRequest {
                message: format!("HTTP {} from Gemini API: {}", status, body_text),
            },
        }
    }

    /// Map a transport-level reqwest error.
    ///
    /// The URL is stripped from the error before it is formatted.
    fn map_send_error(e: reqwest::Error) -> LlmError {
        let e = e.without_url();
        if e.is_timeout() {
            LlmError::Timeout { timeout_secs: 0 }
        } else if e.is_connect() {
            LlmError::Connection {
                message: format!("Could not connect to Gemini API: {}", e),
            }
        } else {
            LlmError::ApiRequest {
                message: format!("Request to Gemini API failed: {}", e),
            }
        }
    }

    /// Build the endpoint URL for a Gemini API call.
    fn endpoint_url(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, model, method)
    }

    /// Split complete lines off the front of `buffer`.
    ///
    /// Bytes after the last newline stay buffered, so a multi-byte character
    /// split across network chunks is decoded only once it is whole.
    fn drain_lines(buffer: &mut Vec<u8>) -> Vec<String> {
        let Some(last_newline) = buffer.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };
        let complete: Vec<u8> = buffer.drain(..=last_newline).collect();
        complete
            .split(|&b| b == b'\n')
            .map(|line| String::from_utf8_lossy(line).trim().to_string())
            .filter(|line| !line.is_empty())
            .collect()
    }

    /// Process a parsed SSE event and send the appropriate `StreamEvent` on the channel.
    async fn process_stream_chunk(
        data: &Value,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Option<TokenUsage> {
        // The API reports mid-stream failures as an `error` object.
        if let Some(message) = data["error"]["message"].as_str() {
            let _ = tx.send(StreamEvent::Error(message.to_string())).await;
            return None;
        }

        if let Some(parts) = data["candidates"][0]["content"]["parts"].as_array() {
            let text = Self::collect_text(parts);
            if !text.is_empty() {
                let _ = tx.send(StreamEvent::Token(text)).await;
            }
        }

        let usage_metadata = &data["usageMetadata"];
        usage_metadata
            .is_object()
            .then(|| Self::parse_usage(usage_metadata))
    }

    /// Parse one SSE line, forwarding any data payload.
    async fn handle_sse_line(
        line: &str,
        tx: &mpsc::Sender<StreamEvent>,
        total_usage: &mut TokenUsage,
    ) {
        let Some(data_str) = line.strip_prefix("data: ") else {
            return;
        };
        match serde_json::from_str::<Value>(data_str) {
            Ok(data_json) => {
                if let Some(usage) = Self::process_stream_chunk(&data_json, tx).await {
                    *total_usage = usage;
                }
            }
            Err(e) => {
                let preview: String = data_str.chars().take(200).collect();
                warn!(
                    error = %e,
                    data_preview = preview.as_str(),
                    "Failed to parse Gemini SSE JSON chunk"
                );
            }
        }
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    /// Perform a full (non-streaming) completion via the Gemini API.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let body = self.build_request_body(&request);
        let url = self.endpoint_url(model, "generateContent");

        debug!(
            model,
            grounded = request.grounded_search,
            "Sending Gemini completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = response.status();
        let body_text = response.text().await.map_err(|e| LlmError::ResponseParse {
            message: format!("Failed to read response body: {}", e.without_url()),
        })?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &body_text));
        }

        let response_json: Value =
            serde_json::from_str(&body_text).map_err(|e| LlmError::ResponseParse {
                message: format!("Invalid JSON in response: {}", e),
            })?;

        Self::parse_response(&response_json)
    }

    /// Perform a streaming completion via the Gemini API.
    ///
    /// Uses the `streamGenerateContent` endpoint with `?alt=sse`.
    async fn complete_streaming(
        &self,
        request: CompletionRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let body = self.build_request_body(&request);
        let url = format!(
            "{}?alt=sse",
            self.endpoint_url(model, "streamGenerateContent")
        );

        debug!(model, "Sending Gemini streaming request");

        let response = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Self::map_http_error(status, &body_text));
        }

        let mut byte_stream = response.bytes_stream();
        let mut total_usage = TokenUsage::default();
        let mut line_buffer: Vec<u8> = Vec::new();

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = chunk_result.map_err(|e| LlmError::Streaming {
                message: format!("Failed to read streaming chunk: {}", e.without_url()),
            })?;
            line_buffer.extend_from_slice(&chunk);

            for line in Self::drain_lines(&mut line_buffer) {
                Self::handle_sse_line(&line, &tx, &mut total_usage).await;
            }
        }

        let remaining = String::from_utf8_lossy(&line_buffer).trim().to_string();
        if !remaining.is_empty() {
            Self::handle_sse_line(&remaining, &tx, &mut total_usage).await;
        }

        let _ = tx.send(StreamEvent::Done { usage: total_usage }).await;

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

    fn test_config() -> LlmConfig {
        LlmConfig {
            model: "gemini-2.0-flash".to_string(),
            ..Default::default()
        }
    }

    fn make_provider() -> GeminiProvider {
        GeminiProvider::new_with_key(&test_config(), "test-gemini-key-12345".to_string())
            .expect("Provider creation should succeed")
    }

    #[test]
    fn test_new_with_key() {
        let provider = make_provider();
        assert_eq!(provider.api_key, "test-gemini-key-12345");
        assert_eq!(provider.model, "gemini-2.0-flash");
        assert_eq!(provider.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_new_missing_env_returns_auth_failed() {
        let config = LlmConfig {
            api_key_env: "SLEUTH_GEMINI_KEY_NEVER_SET_XYZ".to_string(),
            ..test_config()
        };
        match GeminiProvider::new(&config) {
            Err(LlmError::AuthFailed { provider }) => {
                assert!(provider.contains("SLEUTH_GEMINI_KEY_NEVER_SET_XYZ"));
            }
            Err(other) => panic!("Expected AuthFailed, got {:?}", other),
            Ok(_) => panic!("Expected AuthFailed, got a provider"),
        }
    }

    #[test]
    fn test_new_explicit_config_key() {
        let config = LlmConfig {
            api_key: Some("AIza-from-config".into()),
            base_url: Some("https://my-proxy.example.com/v1/".into()),
            ..test_config()
        };
        let provider = GeminiProvider::new(&config).unwrap();
        assert_eq!(provider.api_key, "AIza-from-config");
        assert_eq!(provider.base_url, "https://my-proxy.example.com/v1");
    }

    #[test]
    fn test_endpoint_url() {
        let provider = make_provider();
        assert_eq!(
            provider.endpoint_url("gemini-2.5-pro", "generateContent"),
            format!(
                "{}/models/gemini-2.5-pro:generateContent",
                DEFAULT_BASE_URL
            )
        );
    }

    #[test]
    fn test_drain_lines_keeps_split_multibyte_char() {
        let line = "data: café\n".as_bytes();
        // Split inside the two-byte 'é'.
        let cut = line.len() - 2;
        let mut buffer = line[..cut].to_vec();
        assert!(GeminiProvider::drain_lines(&mut buffer).is_empty());

        buffer.extend_from_slice(&line[cut..]);
        assert_eq!(GeminiProvider::drain_lines(&mut buffer), vec!["data: café"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drain_lines_leaves_partial_tail() {
        let mut buffer = b"data: a\r\n\ndata: b\ndata: par".to_vec();
        assert_eq!(
            GeminiProvider::drain_lines(&mut buffer),
            vec!["data: a", "data: b"]
        );
        assert_eq!(buffer, b"data: par");
    }

    #[test]
    fn test_build_request_body_plain() {
        let provider = make_provider();
        let request = CompletionRequest {
            prompt: "What is Rust?".into(),
            temperature: 1.0,
            ..Default::default()
        };
        let body = provider.build_request_body(&request);
        assert_eq!(body["contents"][0]["parts"][0]["text"], "What is Rust?");
        assert_eq!(body["generationConfig"]["temperature"], 1.0);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 2048);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_build_request_body_grounded() {
        let provider = make_provider();
        let request = CompletionRequest {
            prompt: "latest rust release".into(),
            temperature: 0.0,
            max_tokens: Some(512),
            grounded_search: true,
            ..Default::default()
        };
        let body = provider.build_request_body(&request);
        assert_eq!(body["tools"][0]["google_search"], serde_json::json!({}));
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 512);
    }

    #[test]
    fn test_parse_text_response() {
        let response_json = serde_json::json!({
            "candidates": [{
                "content": {
                    "parts": [{"text": "Hello! "}, {"text": "How can I help?"}],
                    "role": "model"
                },
                "finishReason": "STOP"
            }],
            "usageMetadata": {
                "promptTokenCount": 25,
                "candidatesTokenCount": 10,
                "totalTokenCount": 35
            },
            "modelVersion": "gemini-2.0-flash"
        });

        let result = GeminiProvider::parse_response(&response_json).unwrap();
        assert_eq!(result.text, "Hello! How can I help?");
        assert_eq!(result.model, "gemini-2.0-flash");
        assert_eq!(result.usage.input_tokens, 25);
        assert_eq!(result.usage.output_tokens, 10);
        assert_eq!(result.finish_reason.as_deref(), Some("STOP"));
        assert!(result.grounding.is_none());
    }

    #[test]
    fn test_parse_skips_thought_parts() {
        let response_json = serde_json::json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "thinking...", "thought": true},
                    {"text": "answer"}
                ]}
            }]
        });
        let result = GeminiProvider::parse_response(&response_json).unwrap();
        assert_eq!(result.text, "answer");
    }

    #[test]
    fn test_parse_grounded_response() {
        let response_json = serde_json::json!({
            "candidates": [{
                "content": {"parts": [{"text": "Spain won Euro 2024."}]},
                "groundingMetadata": {
                    "webSearchQueries": ["euro 2024 winner"],
                    "groundingChunks": [
                        {"web": {"uri": "https://redirect/a", "title": "uefa.com"}},
                        {"web": {"uri": "https://redirect/b", "title": "bbc.co.uk"}}
                    ],
                    "groundingSupports": [{
                        "segment": {"endIndex": 20, "text": "Spain won Euro 2024."},
                        "groundingChunkIndices": [0, 1]
                    }]
                }
            }]
        });

        let result = GeminiProvider::parse_response(&response_json).unwrap();
        let grounding = result.grounding.unwrap();
        assert_eq!(grounding.chunks.len(), 2);
        assert_eq!(grounding.chunks[1].title, "bbc.co.uk");
        assert_eq!(grounding.supports[0].start_index, 0);
        assert_eq!(grounding.supports[0].end_index, Some(20));
        assert_eq!(grounding.supports[0].chunk_indices, vec![0, 1]);
        assert_eq!(grounding.web_search_queries, vec!["euro 2024 winner"]);
    }

    #[test]
    fn test_parse_missing_candidates() {
        let err = GeminiProvider::parse_response(&serde_json::json!({})).unwrap_err();
        assert!(matches!(err, LlmError::ResponseParse { .. }));

        let err =
            GeminiProvider::parse_response(&serde_json::json!({"candidates": []})).unwrap_err();
        assert!(matches!(err, LlmError::ResponseParse { .. }));
    }

    #[test]
    fn test_map_http_error() {
        assert!(matches!(
            GeminiProvider::map_http_error(reqwest::StatusCode::FORBIDDEN, ""),
            LlmError::AuthFailed { .. }
        ));
        assert!(matches!(
            GeminiProvider::map_http_error(reqwest::StatusCode::TOO_MANY_REQUESTS, ""),
            LlmError::RateLimited { .. }
        ));
        assert!(matches!(
            GeminiProvider::map_http_error(reqwest::StatusCode::SERVICE_UNAVAILABLE, "down"),
            LlmError::Connection { .. }
        ));
        assert!(matches!(
            GeminiProvider::map_http_error(reqwest::StatusCode::BAD_REQUEST, "bad"),
            LlmError::ApiRequest { .. }
        ));
    }

    #[tokio::test]
    async fn test_process_stream_chunk() {
        let (tx, mut rx) = mpsc::channel(4);
        let chunk = serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "partial"}]}}],
            "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 1}
        });
        let usage = GeminiProvider::process_stream_chunk(&chunk, &tx).await;
        assert_eq!(usage.map(|u| u.total()), Some(4));
        match rx.recv().await {
            Some(StreamEvent::Token(t)) => assert_eq!(t, "partial"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_process_stream_error_chunk() {
        let (tx, mut rx) = mpsc::channel(4);
        let chunk = serde_json::json!({
            "error": {"code": 503, "message": "The model is overloaded.", "status": "UNAVAILABLE"}
        });
        assert!(GeminiProvider::process_stream_chunk(&chunk, &tx).await.is_none());
        match rx.recv().await {
            Some(StreamEvent::Error(message)) => assert_eq!(message, "The model is overloaded."),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
