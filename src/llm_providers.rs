use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

use crate::config::LLMConfig;

/// Common message structure for LLM requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMMessage {
    pub role: String,
    pub content: String,
}

impl LLMMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A role-tagged prompt plus sampling parameters.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<LLMMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn from_prompt(prompt: impl Into<String>, max_tokens: u32, temperature: f32) -> Self {
        Self {
            messages: vec![LLMMessage::user(prompt)],
            max_tokens,
            temperature,
        }
    }

    pub fn prompt_length(&self) -> usize {
        self.messages.iter().map(|m| m.content.len()).sum()
    }
}

/// Ways a completion call can fail. All of them are surfaced to callers as a
/// generation failure; nothing here is retried.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("Completion service is not configured: {0}")]
    NotConfigured(String),

    #[error("Completion request timed out")]
    Timeout,

    #[error("Could not reach completion service: {0}")]
    Connection(String),

    #[error("Completion service returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Malformed completion response: {0}")]
    MalformedResponse(String),
}

impl From<reqwest::Error> for CompletionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CompletionError::Timeout
        } else if err.is_decode() {
            CompletionError::MalformedResponse(err.to_string())
        } else {
            CompletionError::Connection(err.to_string())
        }
    }
}

/// The external completion service as seen by the generation pipeline.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;

    /// Provider name for logging
    fn provider_name(&self) -> &'static str;

    fn model_name(&self) -> &str;
}

/// Enum-based LLM provider implementation
#[derive(Debug, Clone)]
pub enum LLMProvider {
    ChatCompletions(ChatCompletionsProvider),
    Gemini(GeminiProvider),
}

#[async_trait]
impl CompletionClient for LLMProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        match self {
            LLMProvider::ChatCompletions(provider) => provider.make_request(request).await,
            LLMProvider::Gemini(provider) => provider.make_request(request).await,
        }
    }

    fn provider_name(&self) -> &'static str {
        match self {
            LLMProvider::ChatCompletions(provider) => provider.provider_name(),
            LLMProvider::Gemini(provider) => provider.provider_name(),
        }
    }

    fn model_name(&self) -> &str {
        match self {
            LLMProvider::ChatCompletions(provider) => provider.model_name(),
            LLMProvider::Gemini(provider) => provider.model_name(),
        }
    }
}

fn build_http_client(timeout: Duration) -> Result<Client, CompletionError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| CompletionError::NotConfigured(format!("failed to build HTTP client: {}", e)))
}

fn ensure_api_key(api_key: &str, provider: &str) -> Result<(), CompletionError> {
    if api_key.trim().is_empty() {
        error!(provider = provider, "LLM API key not configured");
        return Err(CompletionError::NotConfigured("missing API key".to_string()));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Pull `error.message` out of a provider error body, falling back to the raw text.
pub(crate) fn provider_error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error)
        .and_then(|error| error.message)
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                "Unknown API error".to_string()
            } else {
                body.chars().take(500).collect()
            }
        })
}

async fn status_error(provider: &'static str, response: reqwest::Response) -> CompletionError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    error!(
        provider = provider,
        status = %status,
        error = %body,
        "LLM API request failed"
    );
    CompletionError::Status {
        status: status.as_u16(),
        message: provider_error_message(&body),
    }
}

/// OpenAI-compatible `/chat/completions` provider (OpenRouter, OpenAI, local proxies)
#[derive(Debug, Clone)]
pub struct ChatCompletionsProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    name: &'static str,
    /// `HTTP-Referer` and `X-Title` attribution headers sent to OpenRouter
    attribution: Option<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<LLMMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const OPENROUTER_DEFAULT_MODEL: &str = "mistralai/mistral-7b-instruct:free";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-2.0-flash";

impl ChatCompletionsProvider {
    pub fn openrouter(
        api_key: String,
        base_url: Option<String>,
        model: Option<String>,
        app_url: String,
        app_title: String,
        timeout: Duration,
    ) -> Result<Self, CompletionError> {
        Ok(Self {
            client: build_http_client(timeout)?,
            api_key,
            base_url: base_url.unwrap_or_else(|| OPENROUTER_BASE_URL.to_string()),
            model: model.unwrap_or_else(|| OPENROUTER_DEFAULT_MODEL.to_string()),
            name: "OpenRouter",
            attribution: Some((app_url, app_title)),
        })
    }

    pub fn openai(
        api_key: String,
        base_url: Option<String>,
        model: Option<String>,
        timeout: Duration,
    ) -> Result<Self, CompletionError> {
        Ok(Self {
            client: build_http_client(timeout)?,
            api_key,
            base_url: base_url.unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            model: model.unwrap_or_else(|| OPENAI_DEFAULT_MODEL.to_string()),
            name: "OpenAI",
            attribution: None,
        })
    }

    pub async fn make_request(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        ensure_api_key(&self.api_key, self.name)?;

        let request_body = ChatCompletionsRequest {
            model: self.model.clone(),
            messages: request.messages.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        info!(
            provider = self.provider_name(),
            model = %self.model,
            base_url = %self.base_url,
            prompt_length = request.prompt_length(),
            "Making LLM request"
        );

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json");

        if let Some((referer, title)) = &self.attribution {
            builder = builder.header("HTTP-Referer", referer).header("X-Title", title);
        }

        let response = builder.json(&request_body).send().await?;

        if !response.status().is_success() {
            return Err(status_error(self.provider_name(), response).await);
        }

        let completion: ChatCompletionsResponse = response.json().await?;

        let response_content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                CompletionError::MalformedResponse("no message content in choices".to_string())
            })?;

        info!(
            provider = self.provider_name(),
            response_length = response_content.len(),
            "Successfully received LLM response"
        );

        Ok(response_content)
    }

    pub fn provider_name(&self) -> &'static str {
        self.name
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Gemini provider implementation
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

impl GeminiProvider {
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        model: Option<String>,
        timeout: Duration,
    ) -> Result<Self, CompletionError> {
        Ok(Self {
            client: build_http_client(timeout)?,
            api_key,
            base_url: base_url.unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            model: model.unwrap_or_else(|| GEMINI_DEFAULT_MODEL.to_string()),
        })
    }

    pub async fn make_request(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        ensure_api_key(&self.api_key, self.provider_name())?;

        // Fold every message into one Gemini prompt.
        let full_prompt = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let request_body = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart { text: full_prompt }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            },
        };

        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );

        info!(
            provider = self.provider_name(),
            model = %self.model,
            base_url = %self.base_url,
            prompt_length = request.prompt_length(),
            "Making LLM request"
        );

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(self.provider_name(), response).await);
        }

        let gemini_response: GeminiResponse = response.json().await?;

        let response_content = gemini_response
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content.parts.into_iter().next())
            .map(|part| part.text)
            .ok_or_else(|| {
                CompletionError::MalformedResponse("no candidates in Gemini response".to_string())
            })?;

        info!(
            provider = self.provider_name(),
            response_length = response_content.len(),
            "Successfully received LLM response"
        );

        Ok(response_content)
    }

    pub fn provider_name(&self) -> &'static str {
        "Gemini"
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum LLMProviderType {
    OpenRouter,
    OpenAI,
    Gemini,
}

impl LLMProviderType {
    /// Parse a provider name, defaulting to OpenRouter for unknown values.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "openrouter" => LLMProviderType::OpenRouter,
            "openai" | "chatgpt" | "gpt" => LLMProviderType::OpenAI,
            "gemini" | "google" => LLMProviderType::Gemini,
            _ => {
                info!("Unknown LLM provider '{}', defaulting to OpenRouter", name);
                LLMProviderType::OpenRouter
            }
        }
    }
}

/// Factory for creating LLM providers based on provider type
pub struct LLMProviderFactory;

impl LLMProviderFactory {
    pub fn create_provider(config: &LLMConfig) -> Result<LLMProvider, CompletionError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let provider = match config.provider {
            LLMProviderType::OpenRouter => LLMProvider::ChatCompletions(ChatCompletionsProvider::openrouter(
                config.api_key.clone(),
                config.base_url.clone(),
                config.model.clone(),
                config.app_url.clone(),
                config.app_title.clone(),
                timeout,
            )?),
            LLMProviderType::OpenAI => LLMProvider::ChatCompletions(ChatCompletionsProvider::openai(
                config.api_key.clone(),
                config.base_url.clone(),
                config.model.clone(),
                timeout,
            )?),
            LLMProviderType::Gemini => LLMProvider::Gemini(GeminiProvider::new(
                config.api_key.clone(),
                config.base_url.clone(),
                config.model.clone(),
                timeout,
            )?),
        };
        Ok(provider)
    }
}
