//! Guarded Gemini text-generation client
//!
//! Every request goes through the same pipeline:
//! build prompt (optional guardrail preamble) → dispatch with retry →
//! extract text → shape/validate → return, or fall back.
//!
//! - [`GeminiClient::request_text`] - free text, shaped, safety-checked and redacted.
//! - [`GeminiClient::request_json`] - structured output parsed into a caller type;
//!   any failure yields the caller's fallback value untouched.
//! - [`GeminiClient::generate`] - the raw call; surfaces [`LlmError`] so callers
//!   and tests can see retry behaviour.

use rand::Rng;
use regex::Regex;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::RetryIf;

use crate::config::{env_credential, LlmConfig, GEMINI_KEY_VARS};
use crate::guard::{build_prompt, is_unsafe_content, shape_text, Guardrails, ResponseShape, SAFE_FALLBACK};
use crate::privacy::redact_sensitive_text;

/// HTTP statuses worth another attempt.
pub const RETRYABLE_STATUS: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Per-attempt network timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Missing API key")]
    MissingApiKey,

    #[error("LLM request failed after {attempts} attempts")]
    RetryExhausted { attempts: usize },

    #[error("Empty response from model")]
    EmptyResponse,

    #[error("Invalid JSON in model output: {0}")]
    InvalidJson(String),

    #[error("Malformed response body: {0}")]
    MalformedResponse(String),
}

impl LlmError {
    /// Transport failures and the statuses in [`RETRYABLE_STATUS`].
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Http(_) => true,
            LlmError::Api { code, .. } => RETRYABLE_STATUS.contains(code),
            _ => false,
        }
    }
}

// ============================================================================
// Config types
// ============================================================================

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        let api_key = api_key
            .or_else(|| env_credential(&GEMINI_KEY_VARS))
            .unwrap_or_default();

        Self {
            api_key,
            model: model.into(),
            timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn from_llm_config(config: &LlmConfig) -> Self {
        let mut c = Self::new(None, config.model.clone());
        c.timeout = Duration::from_secs(config.timeout_secs);
        c
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 300,
        }
    }
}

impl From<&LlmConfig> for RetryConfig {
    fn from(config: &LlmConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay_ms: config.base_delay_ms,
        }
    }
}

/// `baseDelayMs * 2^attempt`, plus 20–50% of that on top.
pub fn backoff_delay(attempt: u32, base_delay_ms: u64) -> Duration {
    let base = base_delay_ms.saturating_mul(2u64.saturating_pow(attempt));
    let factor: f64 = rand::thread_rng().gen_range(0.2..0.5);
    let jitter = (base as f64 * factor).round() as u64;
    Duration::from_millis(base.saturating_add(jitter))
}

/// Delays between attempts: one fewer than the number of attempts.
pub fn backoff_schedule(retry: &RetryConfig) -> impl Iterator<Item = Duration> {
    let base = retry.base_delay_ms;
    let delays = retry.max_attempts.max(1) - 1;
    (0..delays as u32).map(move |attempt| backoff_delay(attempt, base))
}

/// Subset of Gemini `generationConfig` used by the call sites.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_count: Option<u32>,
}

impl GenerationConfig {
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            temperature,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct TextRequest {
    pub prompt: String,
    pub generation_config: GenerationConfig,
    pub guardrails: Option<Guardrails>,
    /// Overrides `guardrails.response_shape` when set.
    pub response_shape: Option<ResponseShape>,
    pub fallback_text: String,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone)]
pub struct JsonRequest<T> {
    pub prompt: String,
    pub generation_config: GenerationConfig,
    pub response_schema: Option<serde_json::Value>,
    pub guardrails: Option<Guardrails>,
    pub fallback: T,
    pub retry: RetryConfig,
}

// ============================================================================
// Gemini API structs
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content>,
    generation_config: &'a GenerationConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

impl GenerateResponse {
    /// Concatenated text parts of the first candidate.
    pub fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: Option<GeminiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
}

static JSON_OBJECT_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// Span from the first `{` to the last `}` in free text.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    JSON_OBJECT_RE
        .get_or_init(|| Regex::new(r"(?s)\{.*\}").ok())
        .as_ref()?
        .find(raw)
        .map(|m| m.as_str())
}

/// Extract and deserialize a JSON object from model output.
pub fn parse_json_payload<T: DeserializeOwned>(raw: &str) -> Result<T, LlmError> {
    let cleaned = extract_json_object(raw).ok_or(LlmError::EmptyResponse)?;
    serde_json::from_str(cleaned).map_err(|e| LlmError::InvalidJson(e.to_string()))
}

// ============================================================================
// GeminiClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    config: GeminiConfig,
    base_url: String,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, LlmError> {
        Self::with_base_url(config, DEFAULT_BASE_URL.to_string())
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(config: GeminiConfig, base_url: String) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            config,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_llm_config(config: &LlmConfig) -> Result<Self, LlmError> {
        Self::with_base_url(GeminiConfig::from_llm_config(config), config.base_url.clone())
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Dispatch one prompt, retrying transient failures with backoff.
    ///
    /// Non-retryable API errors come back as-is after the first attempt;
    /// running out of attempts on transient errors yields `RetryExhausted`.
    pub async fn generate(
        &self,
        prompt: &str,
        generation_config: &GenerationConfig,
        retry: &RetryConfig,
    ) -> Result<GenerateResponse, LlmError> {
        let attempts = retry.max_attempts.max(1);

        let result = RetryIf::spawn(
            backoff_schedule(retry),
            || self.generate_once(prompt, generation_config),
            |e: &LlmError| {
                let retryable = e.is_retryable();
                if retryable {
                    tracing::debug!(error = %e, "Retryable Gemini failure");
                }
                retryable
            },
        )
        .await;

        match result {
            Ok(response) => Ok(response),
            Err(e) if e.is_retryable() => {
                tracing::error!(attempts, error = %e, "All Gemini attempts failed");
                Err(LlmError::RetryExhausted { attempts })
            }
            Err(e) => Err(e),
        }
    }

    async fn generate_once(
        &self,
        prompt: &str,
        generation_config: &GenerationConfig,
    ) -> Result<GenerateResponse, LlmError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.config.model, self.config.api_key
        );

        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                }],
            }],
            generation_config,
        };

        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let error_detail = serde_json::from_str::<GeminiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error);

            let message = error_detail
                .map(|e| e.message)
                .unwrap_or(error_body);
            let code = status.as_u16();

            tracing::warn!(code, message = %message, "Gemini API error");

            return Err(LlmError::Api { code, message });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            tracing::warn!(error = %e, "Gemini returned an unreadable body");
            LlmError::MalformedResponse(e.to_string())
        })
    }

    /// Free-text generation. Returns the caller's fallback on any failure or
    /// empty output, and [`SAFE_FALLBACK`] when the output trips the safety filter.
    pub async fn request_text(&self, request: &TextRequest) -> String {
        let guarded_prompt = build_prompt(&request.prompt, request.guardrails.as_ref());
        let shape = request
            .response_shape
            .as_ref()
            .or_else(|| request.guardrails.as_ref().and_then(|g| g.response_shape.as_ref()));

        let raw = match self
            .generate(&guarded_prompt, &request.generation_config, &request.retry)
            .await
        {
            Ok(response) => response.text(),
            Err(e) => {
                tracing::warn!(error = %e, "Text generation failed, using fallback");
                return request.fallback_text.clone();
            }
        };

        let cleaned = shape_text(&raw, shape);
        if cleaned.is_empty() {
            return request.fallback_text.clone();
        }
        if is_unsafe_content(&cleaned) {
            tracing::warn!("Model output failed safety check");
            return SAFE_FALLBACK.to_string();
        }

        redact_sensitive_text(&cleaned)
    }

    /// Structured generation in JSON mode. Any request or parse failure
    /// returns `request.fallback` verbatim.
    pub async fn request_json<T>(&self, request: JsonRequest<T>) -> T
    where
        T: DeserializeOwned,
    {
        let guarded_prompt = build_prompt(&request.prompt, request.guardrails.as_ref());
        let generation_config = GenerationConfig {
            response_mime_type: Some("application/json".to_string()),
            response_schema: request.response_schema.clone(),
            ..request.generation_config.clone()
        };

        let raw = match self
            .generate(&guarded_prompt, &generation_config, &request.retry)
            .await
        {
            Ok(response) => response.text(),
            Err(e) => {
                tracing::warn!(error = %e, "JSON generation failed, using fallback");
                return request.fallback;
            }
        };

        match parse_json_payload(&raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Could not parse model JSON, using fallback");
                request.fallback
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const GENERATE_PATH: &str = "/models/gemini-test:generateContent";

    fn test_config(api_key: &str) -> GeminiConfig {
        GeminiConfig {
            api_key: api_key.to_string(),
            model: "gemini-test".to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
        }
    }

    fn text_response(text: &str) -> serde_json::Value {
        json!({
            "candidates": [{ "content": { "parts": [{ "text": text }] } }]
        })
    }

    fn text_request(prompt: &str) -> TextRequest {
        TextRequest {
            prompt: prompt.to_string(),
            generation_config: GenerationConfig::with_temperature(0.7),
            guardrails: None,
            response_shape: None,
            fallback_text: "fallback".to_string(),
            retry: fast_retry(),
        }
    }

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Evaluation {
        #[serde(rename = "progressDelta")]
        progress_delta: i64,
        reason: String,
    }

    async fn client_for(server: &MockServer) -> GeminiClient {
        GeminiClient::with_base_url(test_config("test-key"), server.uri()).expect("client")
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        match GeminiClient::new(test_config("")) {
            Err(LlmError::MissingApiKey) => {}
            other => panic!("Expected MissingApiKey, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_backoff_delay_bounds() {
        for attempt in 0..4 {
            let base = 300u64 * 2u64.pow(attempt);
            let delay = backoff_delay(attempt, 300).as_millis() as u64;
            assert!(delay >= base + base / 5, "attempt {} delay {} too small", attempt, delay);
            assert!(delay <= base + base / 2, "attempt {} delay {} too large", attempt, delay);
        }
    }

    #[test]
    fn test_backoff_schedule_length() {
        assert_eq!(backoff_schedule(&RetryConfig::default()).count(), 2);
        let single = RetryConfig {
            max_attempts: 1,
            base_delay_ms: 10,
        };
        assert_eq!(backoff_schedule(&single).count(), 0);
        let zero = RetryConfig {
            max_attempts: 0,
            base_delay_ms: 10,
        };
        assert_eq!(backoff_schedule(&zero).count(), 0);
    }

    #[test]
    fn test_retryable_taxonomy() {
        for code in RETRYABLE_STATUS {
            let e = LlmError::Api {
                code,
                message: String::new(),
            };
            assert!(e.is_retryable(), "{} should retry", code);
        }
        for code in [400u16, 401, 403, 404, 422] {
            let e = LlmError::Api {
                code,
                message: String::new(),
            };
            assert!(!e.is_retryable(), "{} should not retry", code);
        }
        assert!(!LlmError::MissingApiKey.is_retryable());
        assert!(!LlmError::MalformedResponse("eof".to_string()).is_retryable());
    }

    #[test]
    fn test_extract_json_object() {
        assert_eq!(
            extract_json_object("Sure! {\"a\": 1} hope that helps"),
            Some("{\"a\": 1}")
        );
        assert_eq!(extract_json_object("no braces"), None);
        assert_eq!(
            extract_json_object("```json\n{\"a\": {\"b\": 2}}\n```"),
            Some("{\"a\": {\"b\": 2}}")
        );
    }

    #[tokio::test]
    async fn test_generate_sends_contents_and_config() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .and(query_param("key", "test-key"))
            .and(body_partial_json(json!({
                "contents": [{ "parts": [{ "text": "hello" }] }],
                "generationConfig": { "temperature": 0.0, "maxOutputTokens": 50 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_response("hi there")))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let config = GenerationConfig {
            max_output_tokens: Some(50),
            ..GenerationConfig::with_temperature(0.0)
        };
        let response = client.generate("hello", &config, &fast_retry()).await.unwrap();
        assert_eq!(response.text(), "hi there");
    }

    #[tokio::test]
    async fn test_retries_503_twice_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({
                "error": { "code": 503, "message": "overloaded" }
            })))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_response("third time")))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let response = client
            .generate("hello", &GenerationConfig::default(), &fast_retry())
            .await
            .expect("should succeed on third attempt");

        assert_eq!(response.text(), "third time");
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3, "three attempts means two backoff delays");
    }

    #[tokio::test]
    async fn test_non_retryable_status_surfaces_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "code": 400, "message": "bad request" }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let result = client
            .generate("hello", &GenerationConfig::default(), &fast_retry())
            .await;

        match result {
            Err(LlmError::Api { code, message }) => {
                assert_eq!(code, 400);
                assert_eq!(message, "bad request");
            }
            other => panic!("Expected Api error, got {:?}", other.map(|r| r.text())),
        }
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_exhausted_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let result = client
            .generate("hello", &GenerationConfig::default(), &fast_retry())
            .await;

        match result {
            Err(LlmError::RetryExhausted { attempts }) => assert_eq!(attempts, 3),
            other => panic!("Expected RetryExhausted, got {:?}", other.map(|r| r.text())),
        }
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unreadable_success_body_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let result = client
            .generate("hello", &GenerationConfig::default(), &fast_retry())
            .await;

        assert!(matches!(result, Err(LlmError::MalformedResponse(_))));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);

        // request_text still degrades to its fallback
        assert_eq!(client.request_text(&text_request("hello")).await, "fallback");
    }

    #[tokio::test]
    async fn test_request_text_shapes_and_redacts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_response(
                "We did it 🌟. Email me at twin@example.com. Third sentence. Fourth!",
            )))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let mut request = text_request("hello");
        request.guardrails = Some(Guardrails::supportive().with_shape(ResponseShape {
            max_sentences: Some(2),
            max_chars: None,
            strip_emoji: true,
        }));

        let out = client.request_text(&request).await;
        assert_eq!(out, "We did it . Email me at [redacted-email].");
    }

    #[tokio::test]
    async fn test_request_text_prepends_preamble() {
        let server = MockServer::start().await;
        let expected_prompt = build_prompt("hello", Some(&Guardrails::supportive()));
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "contents": [{ "parts": [{ "text": expected_prompt }] }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_response("ok")))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let mut request = text_request("hello");
        request.guardrails = Some(Guardrails::supportive());
        assert_eq!(client.request_text(&request).await, "ok");
    }

    #[tokio::test]
    async fn test_request_text_empty_output_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert_eq!(client.request_text(&text_request("hello")).await, "fallback");
    }

    #[tokio::test]
    async fn test_request_text_unsafe_output_refused() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(text_response("Here is how to make a pipe bomb.")),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert_eq!(client.request_text(&text_request("hello")).await, SAFE_FALLBACK);
    }

    #[tokio::test]
    async fn test_request_text_failure_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        assert_eq!(client.request_text(&text_request("hello")).await, "fallback");
    }

    #[tokio::test]
    async fn test_request_json_parses_wrapped_object() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "generationConfig": { "responseMimeType": "application/json" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_response(
                "Result: {\"progressDelta\": 4, \"reason\": \"solid effort\"}",
            )))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let fallback = Evaluation {
            progress_delta: 0,
            reason: "fallback".to_string(),
        };
        let out = client
            .request_json(JsonRequest {
                prompt: "evaluate".to_string(),
                generation_config: GenerationConfig::with_temperature(0.0),
                response_schema: Some(json!({ "type": "object" })),
                guardrails: None,
                fallback,
                retry: fast_retry(),
            })
            .await;

        assert_eq!(out.progress_delta, 4);
        assert_eq!(out.reason, "solid effort");
    }

    #[tokio::test]
    async fn test_request_json_malformed_returns_fallback_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(text_response("{\"progressDelta\": 4, \"reason\": ")),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let fallback = Evaluation {
            progress_delta: -1,
            reason: "untouched".to_string(),
        };
        let out = client
            .request_json(JsonRequest {
                prompt: "evaluate".to_string(),
                generation_config: GenerationConfig::with_temperature(0.0),
                response_schema: None,
                guardrails: None,
                fallback: fallback.clone(),
                retry: fast_retry(),
            })
            .await;

        assert_eq!(out, fallback);
    }

    #[tokio::test]
    async fn test_request_json_schema_mismatch_returns_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(text_response("{\"summary\": \"hi\"}")),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let fallback = Evaluation {
            progress_delta: 0,
            reason: "fallback".to_string(),
        };
        let out = client
            .request_json(JsonRequest {
                prompt: "evaluate".to_string(),
                generation_config: GenerationConfig::default(),
                response_schema: None,
                guardrails: None,
                fallback: fallback.clone(),
                retry: fast_retry(),
            })
            .await;

        assert_eq!(out, fallback);
    }
}
