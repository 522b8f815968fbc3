use super::{endpoint, non_empty, send, GenerationParams, ModelProvider};
use crate::errors::RewriteError;
use crate::models::config::{ProviderSettings, DEFAULT_MODEL_OLLAMA, DEFAULT_OLLAMA_BASE_URL};
use crate::models::{ModelInfo, ProviderKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: reqwest::Client,
    host: String,
    num_ctx: Option<u32>,
    params: GenerationParams,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
    options: Options,
}

#[derive(Serialize)]
struct Options {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_ctx: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    error: Option<String>,
}

impl OllamaProvider {
    pub fn new(settings: &ProviderSettings, client: reqwest::Client) -> Self {
        Self {
            client,
            host: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_BASE_URL.to_string()),
            num_ctx: settings.num_ctx,
            params: GenerationParams::from_settings(settings, DEFAULT_MODEL_OLLAMA),
        }
    }

    fn check(chunk: OllamaResponse) -> Result<String, RewriteError> {
        match chunk.error {
            Some(message) => {
                error!("Ollama reported an error: {}", message);
                Err(RewriteError::generation(ProviderKind::Ollama, message))
            }
            None => Ok(chunk.response),
        }
    }
}

#[async_trait]
impl ModelProvider for OllamaProvider {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, RewriteError> {
        let failed = |e: reqwest::Error| RewriteError::generation(ProviderKind::Ollama, e);

        let request = GenerateRequest {
            model: &self.params.model_name,
            system: system_prompt,
            prompt: user_prompt,
            stream: self.params.streaming,
            options: Options {
                temperature: self.params.temperature,
                num_predict: self.params.max_output_tokens,
                num_ctx: self.num_ctx,
            },
        };

        debug!(host = %self.host, model = %self.params.model_name, "Sending request to Ollama API");
        let response = send(
            ProviderKind::Ollama,
            self.client
                .post(endpoint(&self.host, "api/generate"))
                .json(&request),
        )
        .await?;

        let content = if self.params.streaming {
            // Newline-delimited JSON, one fragment per line.
            let body = response.text().await.map_err(failed)?;
            let mut text = String::new();
            for line in body.lines().filter(|l| !l.trim().is_empty()) {
                let chunk: OllamaResponse = serde_json::from_str(line)
                    .map_err(|e| RewriteError::generation(ProviderKind::Ollama, e))?;
                text.push_str(&Self::check(chunk)?);
            }
            text
        } else {
            Self::check(response.json::<OllamaResponse>().await.map_err(failed)?)?
        };

        info!("Successfully received response from Ollama");
        non_empty(ProviderKind::Ollama, content)
    }

    fn model_info(&self) -> ModelInfo {
        self.params.model_info(ProviderKind::Ollama)
    }
}
