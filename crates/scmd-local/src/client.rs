//! HTTP client for llama-server's native completion API.

use std::time::Duration;

use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LocalError;
use crate::DEFAULT_PORT;

/// Tokens generated when the caller sets no limit.
pub const DEFAULT_MAX_TOKENS: u32 = 2048;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// End-of-turn markers for ChatML models.
pub const STOP_SEQUENCES: [&str; 2] = ["<|im_end|>", "<|endoftext|>"];

const GPU_TIMEOUT: Duration = Duration::from_secs(120);
/// CPU inference can be an order of magnitude slower.
const CPU_TIMEOUT: Duration = Duration::from_secs(600);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-request generation options. `None` uses the defaults above.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionParams {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub system: Option<String>,
}

impl CompletionParams {
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// `POST /completion` body.
#[derive(Debug, Serialize)]
struct CompletionRequest {
    prompt: String,
    n_predict: u32,
    temperature: f32,
    stop: [&'static str; 2],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    content: String,
    #[serde(default)]
    error: Option<ErrorField>,
}

/// llama-server reports errors either as a string or as `{message, ...}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorField {
    Message(String),
    Detailed { message: String },
    Other(serde_json::Value),
}

impl ErrorField {
    fn into_message(self) -> String {
        match self {
            ErrorField::Message(message) | ErrorField::Detailed { message } => message,
            ErrorField::Other(value) => value.to_string(),
        }
    }
}

/// Wrap a prompt in ChatML markup.
pub fn format_chatml(system: Option<&str>, prompt: &str) -> String {
    let mut out = String::new();
    if let Some(system) = system.filter(|s| !s.is_empty()) {
        out.push_str("<|im_start|>system\n");
        out.push_str(system);
        out.push_str("<|im_end|>\n");
    }
    out.push_str("<|im_start|>user\n");
    out.push_str(prompt);
    out.push_str("<|im_end|>\n<|im_start|>assistant\n");
    out
}

/// `GET /health`; any failure or non-2xx status means not ready.
pub(crate) async fn probe_health(
    client: &reqwest::Client,
    base_url: &str,
    timeout: Duration,
) -> Result<(), LocalError> {
    let response = client
        .get(format!("{}/health", base_url))
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                LocalError::ServerNotRunning(base_url.to_string())
            } else {
                LocalError::Http(e)
            }
        })?;

    if response.status().is_success() {
        Ok(())
    } else {
        Err(LocalError::ServerNotRunning(base_url.to_string()))
    }
}

/// Client for communicating with llama-server.
#[derive(Debug, Clone)]
pub struct InferenceClient {
    client: reqwest::Client,
    base_url: String,
    cpu_only: bool,
}

impl InferenceClient {
    /// Create a new client with a custom URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cpu_only: false,
        }
    }

    /// Create a new client with a custom port on localhost.
    pub fn for_port(port: u16) -> Self {
        Self::new(format!("http://127.0.0.1:{}", port))
    }

    /// Use the long timeout suited to CPU-only servers.
    pub fn with_cpu_only(mut self, cpu_only: bool) -> Self {
        self.cpu_only = cpu_only;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        if self.cpu_only {
            CPU_TIMEOUT
        } else {
            GPU_TIMEOUT
        }
    }

    /// Check if the server is running and healthy.
    pub async fn check_health(&self) -> Result<(), LocalError> {
        probe_health(&self.client, &self.base_url, HEALTH_TIMEOUT).await
    }

    /// Run a single non-streaming completion.
    pub async fn complete(
        &self,
        prompt: &str,
        params: &CompletionParams,
    ) -> Result<String, LocalError> {
        let request = CompletionRequest {
            prompt: format_chatml(params.system.as_deref(), prompt),
            n_predict: params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: params.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            stop: STOP_SEQUENCES,
            stream: false,
        };

        let url = format!("{}/completion", self.base_url);
        debug!(%url, n_predict = request.n_predict, "sending completion request");

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    LocalError::ServerNotRunning(self.base_url.clone())
                } else {
                    LocalError::Http(e)
                }
            })?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(LocalError::InferenceHttp {
                status: status.as_u16(),
                body,
            });
        }
        parse_completion(&body)
    }

    /// Streaming variant. llama-server is called without incremental
    /// delivery, so this yields the whole completion as one chunk.
    pub fn stream<'a>(
        &'a self,
        prompt: &'a str,
        params: &'a CompletionParams,
    ) -> BoxStream<'a, Result<String, LocalError>> {
        stream::once(self.complete(prompt, params)).boxed()
    }
}

impl Default for InferenceClient {
    fn default() -> Self {
        Self::for_port(DEFAULT_PORT)
    }
}

/// A 200 reply with no content is an error of its own; look for an embedded
/// error field before calling it empty.
fn parse_completion(body: &str) -> Result<String, LocalError> {
    if body.trim().is_empty() {
        return Err(LocalError::EmptyResponse);
    }

    let parsed: CompletionResponse = serde_json::from_str(body)?;
    if !parsed.content.trim().is_empty() {
        return Ok(parsed.content);
    }
    match parsed.error {
        Some(error) => Err(LocalError::InferenceApi(error.into_message())),
        None => Err(LocalError::EmptyResponse),
    }
}
