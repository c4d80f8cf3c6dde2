/// LLM Client: the single point of entry for all Claude API calls in the harvester.
///
/// ARCHITECTURAL RULE: No other module may call the Anthropic API directly.
/// Pipeline stages depend on the `Extractor` trait, never on `LlmClient`.
///
/// One `extract` call is one HTTP request. Retry and backoff belong to the
/// extraction scheduler, which needs the rate-limit classification made here.
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub mod prompts;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// The model used for all extraction calls.
/// This is intentionally hardcoded to prevent accidental drift.
pub const MODEL: &str = "claude-sonnet-4-5";
const MAX_TOKENS: u32 = 4096;
/// Anthropic's "overloaded" status, treated like a 429.
const STATUS_OVERLOADED: u16 = 529;

/// Failure classes the scheduler acts on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("{0}")]
    Service(String),
}

/// Text-extraction capability: `extract(system_prompt, text) -> text`.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, system_prompt: &str, text: &str) -> Result<String, ExtractError>;
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub content: Vec<ContentBlock>,
    pub usage: Usage,
}

#[derive(Debug, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl LlmResponse {
    /// Extracts the text content from the first text block.
    pub fn text(&self) -> Option<&str> {
        self.content
            .iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    message: String,
}

/// Wraps the Anthropic Messages API behind the `Extractor` trait.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
}

impl LlmClient {
    pub fn new(api_key: String) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self { client, api_key })
    }

    /// Makes a single call to the Claude API and classifies any failure.
    pub async fn call(&self, prompt: &str, system: &str) -> Result<LlmResponse, ExtractError> {
        let request_body = AnthropicRequest {
            model: MODEL,
            max_tokens: MAX_TOKENS,
            system,
            messages: vec![AnthropicMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| ExtractError::Service(format!("HTTP error: {e}")))?;

        let status = response.status();

        if !status.is_success() {
            let header_hint = retry_after_header(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, header_hint, &body));
        }

        let llm_response: LlmResponse = response
            .json()
            .await
            .map_err(|e| ExtractError::Service(format!("undecodable response: {e}")))?;

        debug!(
            "LLM call succeeded: input_tokens={}, output_tokens={}",
            llm_response.usage.input_tokens, llm_response.usage.output_tokens
        );

        Ok(llm_response)
    }
}

#[async_trait]
impl Extractor for LlmClient {
    async fn extract(&self, system_prompt: &str, text: &str) -> Result<String, ExtractError> {
        let response = self.call(text, system_prompt).await?;
        Ok(response.text().unwrap_or_default().to_string())
    }
}

/// Maps a non-2xx response onto the scheduler's failure classes.
fn classify_failure(
    status: StatusCode,
    header_hint: Option<Duration>,
    body: &str,
) -> ExtractError {
    let message = serde_json::from_str::<AnthropicError>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string());

    if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == STATUS_OVERLOADED {
        let retry_after = header_hint.or_else(|| parse_retry_hint(&message));
        warn!("LLM API returned {}: {}", status, message);
        return ExtractError::RateLimited { retry_after };
    }

    ExtractError::Service(format!("API error (status {}): {}", status.as_u16(), message))
}

/// `retry-after` in whole or fractional seconds.
fn retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    let secs: f64 = value.trim().parse().ok()?;
    (secs.is_finite() && secs >= 0.0)
        .then(|| Duration::from_millis((secs * 1000.0).round() as u64))
}

static RETRY_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)try again in (\d+(?:\.\d+)?)\s*(ms|s)\b")
        .unwrap_or_else(|e| panic!("retry hint pattern: {e}"))
});

/// Reads a wait hint such as "Please try again in 607ms" or "... in 2.5s".
fn parse_retry_hint(message: &str) -> Option<Duration> {
    let caps = RETRY_HINT.captures(message)?;
    let amount: f64 = caps[1].parse().ok()?;
    match caps[2].to_ascii_lowercase().as_str() {
        "ms" => Some(Duration::from_micros((amount * 1000.0).round() as u64)),
        _ => Some(Duration::from_millis((amount * 1000.0).round() as u64)),
    }
}
