use crate::errors::RewriteError;
use crate::models::{ProviderAvailability, ProviderKind};
use tracing::{error, warn};

pub struct ProviderSelector;

impl ProviderSelector {
    /// Alternatives tried, in order, when `requested` is down. Cloud providers
    /// prefer the other cloud provider before the local one; the local
    /// provider prefers Gemini.
    pub fn fallback_order(requested: ProviderKind) -> [ProviderKind; 2] {
        match requested {
            ProviderKind::Openai => [ProviderKind::Gemini, ProviderKind::Ollama],
            ProviderKind::Gemini => [ProviderKind::Openai, ProviderKind::Ollama],
            ProviderKind::Ollama => [ProviderKind::Gemini, ProviderKind::Openai],
        }
    }

    pub fn resolve(
        requested: ProviderKind,
        availability: &ProviderAvailability,
    ) -> Result<ProviderKind, RewriteError> {
        if availability.is_available(requested) {
            return Ok(requested);
        }

        for candidate in Self::fallback_order(requested) {
            if availability.is_available(candidate) {
                warn!(
                    requested = %requested,
                    resolved = %candidate,
                    "Requested provider unavailable, falling back"
                );
                return Ok(candidate);
            }
        }

        error!(requested = %requested, "No provider available");
        Err(RewriteError::NoProviderAvailable { requested })
    }
}
