use super::{endpoint, non_empty, required_api_key, send, sse_payloads, GenerationParams, ModelProvider};
use crate::errors::RewriteError;
use crate::models::config::{ProviderSettings, DEFAULT_MODEL_GEMINI};
use crate::models::{ModelInfo, ProviderKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    params: GenerationParams,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateContentResponse {
    fn text(self) -> String {
        self.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

impl GeminiProvider {
    pub fn new(settings: &ProviderSettings, client: reqwest::Client) -> Result<Self, RewriteError> {
        Ok(Self {
            client,
            api_key: required_api_key(ProviderKind::Gemini, settings)?,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            params: GenerationParams::from_settings(settings, DEFAULT_MODEL_GEMINI),
        })
    }

    fn method_url(&self) -> String {
        let model = self
            .params
            .model_name
            .strip_prefix("models/")
            .unwrap_or(&self.params.model_name);
        let method = if self.params.streaming {
            "streamGenerateContent"
        } else {
            "generateContent"
        };
        endpoint(
            &self.base_url,
            &format!("v1beta/models/{}:{}", model, method),
        )
    }
}

#[async_trait]
impl ModelProvider for GeminiProvider {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, RewriteError> {
        let failed = |e: reqwest::Error| RewriteError::generation(ProviderKind::Gemini, e);
        debug!(model = %self.params.model_name, "Generating response with Gemini API");

        let request = GenerateContentRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: system_prompt,
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: user_prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.params.temperature,
                max_output_tokens: self.params.max_output_tokens,
            },
        };

        let mut builder = self
            .client
            .post(self.method_url())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&request);
        if self.params.streaming {
            builder = builder.query(&[("alt", "sse")]);
        }
        let response = send(ProviderKind::Gemini, builder).await?;

        let content = if self.params.streaming {
            let body = response.text().await.map_err(failed)?;
            let mut text = String::new();
            for payload in sse_payloads(&body) {
                let chunk: GenerateContentResponse = serde_json::from_str(payload)
                    .map_err(|e| RewriteError::generation(ProviderKind::Gemini, e))?;
                text.push_str(&chunk.text());
            }
            text
        } else {
            response
                .json::<GenerateContentResponse>()
                .await
                .map_err(failed)?
                .text()
        };

        info!("Successfully received response from Gemini API");
        non_empty(ProviderKind::Gemini, content)
    }

    fn model_info(&self) -> ModelInfo {
        self.params.model_info(ProviderKind::Gemini)
    }
}
