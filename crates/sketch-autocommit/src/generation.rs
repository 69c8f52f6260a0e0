//! Generation client: one chat completion in, one sketch out.
//!
//! The oracle sits behind `CompletionOracle` so the pipeline can be driven by
//! fakes. `OpenAiOracle` is the production implementation against any
//! OpenAI-compatible `/chat/completions` endpoint.
//!
//! A call is single-shot: exactly two turns (system, user), no history, no
//! retries at this layer.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::OracleConfig;
use crate::errors::GenerationError;
use crate::fence;
use crate::prompts::ChangeRequestPayload;

/// A text-completion service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionOracle: Send + Sync {
    /// Send one system turn and one user turn; return the raw reply text.
    async fn complete(&self, system: &str, user: &str) -> Result<String, GenerationError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

fn chat_request<'a>(
    model: &'a str,
    temperature: Option<f64>,
    system: &'a str,
    user: &'a str,
) -> ChatRequest<'a> {
    ChatRequest {
        model,
        messages: [
            ChatMessage {
                role: "system",
                content: system,
            },
            ChatMessage {
                role: "user",
                content: user,
            },
        ],
        temperature,
    }
}

/// Pull the first choice's text out of a completion document.
fn reply_text(body: &str) -> Result<String, GenerationError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;
    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .unwrap_or_default();
    if content.trim().is_empty() {
        return Err(GenerationError::EmptyResponse);
    }
    Ok(content)
}

fn status_error(status: u16, body: String) -> GenerationError {
    match status {
        401 | 403 => GenerationError::Authentication(status),
        _ => GenerationError::Rejected { status, body },
    }
}

/// OpenAI-compatible chat completion oracle.
pub struct OpenAiOracle {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: Option<f64>,
    timeout: Duration,
}

impl OpenAiOracle {
    pub fn new(config: &OracleConfig, api_key: impl Into<String>) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| GenerationError::Unreachable(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout: config.timeout(),
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> GenerationError {
        if err.is_timeout() {
            GenerationError::Timeout(self.timeout.as_secs())
        } else {
            GenerationError::Unreachable(err.to_string())
        }
    }
}

#[async_trait]
impl CompletionOracle for OpenAiOracle {
    async fn complete(&self, system: &str, user: &str) -> Result<String, GenerationError> {
        let request = chat_request(&self.model, self.temperature, system, user);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            return Err(status_error(status.as_u16(), body));
        }

        debug!(model = %self.model, bytes = body.len(), "oracle replied");
        reply_text(&body)
    }
}

/// Formats nothing itself: takes a ready payload, calls the oracle, and
/// returns the extracted code.
pub struct GenerationClient<O> {
    oracle: O,
}

impl<O: CompletionOracle> GenerationClient<O> {
    pub fn new(oracle: O) -> Self {
        Self { oracle }
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// Run one completion and extract the single fenced code block.
    pub async fn generate(&self, payload: &ChangeRequestPayload) -> Result<String, GenerationError> {
        let reply = self.oracle.complete(&payload.system, &payload.user).await?;
        fence::extract_code(&reply)
    }
}
