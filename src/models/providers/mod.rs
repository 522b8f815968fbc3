use async_trait::async_trait;
use std::time::Duration;
use tracing::error;

use crate::errors::RewriteError;
use crate::models::config::{ProviderSettings, DEFAULT_TEMPERATURE};
use crate::models::{ModelInfo, ProviderKind};

pub mod gemini;
pub mod ollama;
pub mod openai;
pub mod prober;
mod selector;

pub use prober::AvailabilityProber;
pub use selector::ProviderSelector;

const GENERATION_TIMEOUT: Duration = Duration::from_secs(120);

#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn generate(&self, system_prompt: &str, user_prompt: &str)
        -> Result<String, RewriteError>;

    fn model_info(&self) -> ModelInfo;
}

/// Provider-neutral generation parameters, resolved from a settings block.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub model_name: String,
    pub temperature: f32,
    pub max_output_tokens: Option<u32>,
    pub streaming: bool,
}

impl GenerationParams {
    pub fn from_settings(settings: &ProviderSettings, fallback_model: &str) -> Self {
        Self {
            model_name: settings
                .model_name
                .clone()
                .unwrap_or_else(|| fallback_model.to_string()),
            temperature: settings.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            max_output_tokens: settings.max_output_tokens,
            streaming: settings.streaming.unwrap_or(false),
        }
    }

    pub fn model_info(&self, provider: ProviderKind) -> ModelInfo {
        ModelInfo {
            provider,
            model_name: self.model_name.clone(),
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
            streaming: self.streaming,
        }
    }
}

/// The adapter bound to one resolved provider.
#[derive(Debug, Clone)]
pub enum ModelAdapter {
    OpenAi(openai::OpenAiProvider),
    Gemini(gemini::GeminiProvider),
    Ollama(ollama::OllamaProvider),
}

impl ModelAdapter {
    pub fn new(
        provider: ProviderKind,
        settings: &ProviderSettings,
        client: reqwest::Client,
    ) -> Result<Self, RewriteError> {
        Ok(match provider {
            ProviderKind::Openai => Self::OpenAi(openai::OpenAiProvider::new(settings, client)?),
            ProviderKind::Gemini => Self::Gemini(gemini::GeminiProvider::new(settings, client)?),
            ProviderKind::Ollama => Self::Ollama(ollama::OllamaProvider::new(settings, client)),
        })
    }

    pub fn provider(&self) -> ProviderKind {
        match self {
            Self::OpenAi(_) => ProviderKind::Openai,
            Self::Gemini(_) => ProviderKind::Gemini,
            Self::Ollama(_) => ProviderKind::Ollama,
        }
    }
}

#[async_trait]
impl ModelProvider for ModelAdapter {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, RewriteError> {
        match self {
            Self::OpenAi(p) => p.generate(system_prompt, user_prompt).await,
            Self::Gemini(p) => p.generate(system_prompt, user_prompt).await,
            Self::Ollama(p) => p.generate(system_prompt, user_prompt).await,
        }
    }

    fn model_info(&self) -> ModelInfo {
        match self {
            Self::OpenAi(p) => p.model_info(),
            Self::Gemini(p) => p.model_info(),
            Self::Ollama(p) => p.model_info(),
        }
    }
}

pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

pub(crate) fn required_api_key(
    provider: ProviderKind,
    settings: &ProviderSettings,
) -> Result<String, RewriteError> {
    settings
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| RewriteError::generation(provider, "API key not configured"))
}

/// Sends a generation request and rejects non-success statuses.
pub(crate) async fn send(
    provider: ProviderKind,
    request: reqwest::RequestBuilder,
) -> Result<reqwest::Response, RewriteError> {
    let response = request
        .timeout(GENERATION_TIMEOUT)
        .send()
        .await
        .map_err(|e| RewriteError::generation(provider, e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        error!(provider = %provider, %status, "Generation request failed");
        let detail: String = body.chars().take(200).collect();
        return Err(RewriteError::generation(
            provider,
            format!("request failed with status {}: {}", status, detail),
        ));
    }

    Ok(response)
}

/// Yields the `data:` payloads of a server-sent-events body, up to `[DONE]`.
pub(crate) fn sse_payloads(body: &str) -> impl Iterator<Item = &str> {
    body.lines()
        .filter_map(|line| line.trim().strip_prefix("data:"))
        .map(str::trim)
        .filter(|payload| !payload.is_empty())
        .take_while(|payload| *payload != "[DONE]")
}

pub(crate) fn non_empty(provider: ProviderKind, text: String) -> Result<String, RewriteError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        error!(provider = %provider, "Received empty response");
        return Err(RewriteError::generation(provider, "empty response"));
    }
    Ok(trimmed.to_owned())
}
