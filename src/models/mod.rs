use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::RewriteError;

pub mod config;
pub mod providers;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase", try_from = "String")]
#[clap(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI chat completions (requires OPENAI_API_KEY)
    Openai,
    /// Google Gemini (requires GEMINI_API_KEY)
    Gemini,
    /// Self-hosted Ollama server
    Ollama,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [Self::Openai, Self::Gemini, Self::Ollama];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Openai => "openai",
            Self::Gemini => "gemini",
            Self::Ollama => "ollama",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = RewriteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::Openai),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            _ => Err(RewriteError::UnsupportedProvider(s.to_string())),
        }
    }
}

impl TryFrom<String> for ProviderKind {
    type Error = RewriteError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Liveness snapshot of every provider, recomputed on each probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProviderAvailability {
    pub openai: bool,
    pub gemini: bool,
    pub ollama: bool,
}

impl ProviderAvailability {
    pub fn is_available(&self, provider: ProviderKind) -> bool {
        match provider {
            ProviderKind::Openai => self.openai,
            ProviderKind::Gemini => self.gemini,
            ProviderKind::Ollama => self.ollama,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub provider: ProviderKind,
    pub model_name: String,
    pub temperature: f32,
    pub max_output_tokens: Option<u32>,
    pub streaming: bool,
}

#[derive(Debug, Clone)]
pub struct RewriteResult {
    pub text: String,
    pub provider: ProviderKind,
    pub char_count: usize,
    pub word_count: usize,
    pub elapsed: Duration,
}
