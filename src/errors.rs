use crate::models::ProviderKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("Failed to load configuration from {path}: {reason}")]
    ConfigLoad { path: String, reason: String },

    #[error("Failed to save configuration to {path}: {reason}")]
    ConfigSave { path: String, reason: String },

    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("Invalid value for '{key}': {reason}")]
    InvalidConfigValue { key: String, reason: String },

    #[error("No provider available (requested {requested}, fallbacks exhausted)")]
    NoProviderAvailable { requested: ProviderKind },

    #[error("Generation with {provider} failed: {reason}")]
    GenerationFailed {
        provider: ProviderKind,
        reason: String,
    },

    #[error("Content cannot be empty")]
    InvalidInput,
}

impl RewriteError {
    pub fn generation(provider: ProviderKind, reason: impl ToString) -> Self {
        Self::GenerationFailed {
            provider,
            reason: reason.to_string(),
        }
    }
}
