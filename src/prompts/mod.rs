use crate::models::ProviderKind;
use regex::{Captures, Regex};
use serde::Deserialize;
use std::collections::HashMap;
use std::error::Error;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, warn};

const SYSTEM_PROMPT: &str = "You are a professional content rewriting assistant. \
Rewrite the supplied text into a clearly structured, complete article of roughly \
500-1000 words. Keep a tone that fits the original context.";

const USER_PROMPT: &str = "Rewrite the following content into a clearly structured, \
coherent and engaging article. Keep the important facts and the main meaning of the \
original, but express them differently. Split it into sensible paragraphs and make \
sure the article is between 500 and 1000 words long:\n\n{content}";

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PromptTemplate {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Deserialize)]
struct PromptConfig {
    prompts: HashMap<ProviderKind, PromptTemplate>,
}

/// Per-provider rewrite prompts.
#[derive(Debug, Clone)]
pub struct PromptManager {
    prompts: HashMap<ProviderKind, PromptTemplate>,
}

impl Default for PromptManager {
    fn default() -> Self {
        let prompts = ProviderKind::ALL
            .into_iter()
            .map(|provider| {
                (
                    provider,
                    PromptTemplate {
                        system: SYSTEM_PROMPT.to_string(),
                        user: USER_PROMPT.to_string(),
                    },
                )
            })
            .collect();
        Self { prompts }
    }
}

impl PromptManager {
    /// Loads overrides from a YAML file; providers it does not mention keep
    /// the built-in templates.
    pub async fn from_file(path: &Path) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let config_str = tokio::fs::read_to_string(path).await?;
        let config: PromptConfig = serde_yaml::from_str(&config_str)?;
        debug!("Loaded {} prompt overrides", config.prompts.len());

        let mut manager = Self::default();
        manager.prompts.extend(config.prompts);
        Ok(manager)
    }

    pub fn template(&self, provider: ProviderKind) -> &PromptTemplate {
        // Every provider is seeded in `default`, overrides only replace entries.
        &self.prompts[&provider]
    }

    pub fn system_prompt(&self, provider: ProviderKind) -> &str {
        &self.template(provider).system
    }

    pub fn user_prompt(&self, provider: ProviderKind, content: &str) -> String {
        format_prompt(&self.template(provider).user, &[("content", content)])
    }

    /// A custom prompt may reference `{content}`; otherwise the content is
    /// appended after it.
    pub fn custom_prompt(custom: &str, content: &str) -> String {
        if placeholder_regex()
            .captures_iter(custom)
            .any(|c| &c[1] == "content")
        {
            format_prompt(custom, &[("content", content)])
        } else {
            format!("{}\n\n{}", custom.trim_end(), content)
        }
    }
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("Invalid placeholder regex pattern")
    })
}

/// Substitutes `{name}` placeholders. Unknown names are left in place.
pub fn format_prompt(template: &str, values: &[(&str, &str)]) -> String {
    placeholder_regex()
        .replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            match values.iter().find(|(key, _)| *key == name) {
                Some((_, value)) => value.to_string(),
                None => {
                    warn!("No value for placeholder '{}' in prompt", name);
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}
