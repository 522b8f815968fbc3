use super::{endpoint, non_empty, required_api_key, send, sse_payloads, GenerationParams, ModelProvider};
use crate::errors::RewriteError;
use crate::models::config::{ProviderSettings, DEFAULT_MODEL_OPENAI};
use crate::models::{ModelInfo, ProviderKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com";

#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    params: GenerationParams,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Default, Deserialize)]
struct Delta {
    content: Option<String>,
}

impl OpenAiProvider {
    pub fn new(settings: &ProviderSettings, client: reqwest::Client) -> Result<Self, RewriteError> {
        Ok(Self {
            client,
            api_key: required_api_key(ProviderKind::Openai, settings)?,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            params: GenerationParams::from_settings(settings, DEFAULT_MODEL_OPENAI),
        })
    }

    fn collect_stream(body: &str) -> Result<String, RewriteError> {
        let mut text = String::new();
        for payload in sse_payloads(body) {
            let chunk: ChatChunk = serde_json::from_str(payload)
                .map_err(|e| RewriteError::generation(ProviderKind::Openai, e))?;
            if let Some(delta) = chunk.choices.into_iter().next().and_then(|c| c.delta.content) {
                text.push_str(&delta);
            }
        }
        Ok(text)
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, RewriteError> {
        let failed = |e: reqwest::Error| RewriteError::generation(ProviderKind::Openai, e);
        debug!(model = %self.params.model_name, "Generating response with OpenAI API");

        let request = ChatRequest {
            model: &self.params.model_name,
            messages: vec![
                Message {
                    role: "system",
                    content: system_prompt,
                },
                Message {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature: self.params.temperature,
            max_tokens: self.params.max_output_tokens,
            stream: self.params.streaming,
        };

        let response = send(
            ProviderKind::Openai,
            self.client
                .post(endpoint(&self.base_url, "v1/chat/completions"))
                .bearer_auth(&self.api_key)
                .json(&request),
        )
        .await?;

        let content = if self.params.streaming {
            let body = response.text().await.map_err(failed)?;
            Self::collect_stream(&body)?
        } else {
            let body: ChatResponse = response.json().await.map_err(failed)?;
            body.choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| {
                    RewriteError::generation(ProviderKind::Openai, "Invalid response format")
                })?
        };

        info!("Successfully received response from OpenAI API");
        non_empty(ProviderKind::Openai, content)
    }

    fn model_info(&self) -> ModelInfo {
        self.params.model_info(ProviderKind::Openai)
    }
}
