use crate::errors::RewriteError;
use crate::models::ProviderKind;
use serde::Serialize;
use serde_json::{Map, Value};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

pub const DEFAULT_MODEL_OPENAI: &str = "gpt-3.5-turbo";
pub const DEFAULT_MODEL_GEMINI: &str = "gemini-1.5-flash-latest";
pub const DEFAULT_MODEL_OLLAMA: &str = "gemma2:latest";
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_PROVIDER: ProviderKind = ProviderKind::Gemini;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 8000;
const DEFAULT_NUM_CTX: u32 = 8192;

pub const TEMPERATURE_RANGE: RangeInclusive<f32> = 0.0..=2.0;

/// Process environment captured once at start-up.
#[derive(Debug, Clone, Default)]
pub struct EnvSettings {
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub ollama_base_url: Option<String>,
    pub ollama_model: Option<String>,
    pub gemini_model: Option<String>,
    pub default_provider: Option<String>,
}

impl EnvSettings {
    pub fn from_env() -> Self {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.trim().is_empty())
        }

        Self {
            openai_api_key: var("OPENAI_API_KEY"),
            gemini_api_key: var("GEMINI_API_KEY"),
            ollama_base_url: var("OLLAMA_BASE_URL"),
            ollama_model: var("OLLAMA_MODEL"),
            gemini_model: var("GEMINI_MODEL"),
            default_provider: var("DEFAULT_PROVIDER"),
        }
    }
}

/// Parameter block of a single provider namespace.
///
/// Every field is optional so a partially written file can be told apart from
/// a complete one; missing entries are backfilled from the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProviderSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streaming: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn backfill<T: Clone>(slot: &mut Option<T>, default: &Option<T>) {
    if slot.is_none() {
        slot.clone_from(default);
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> RewriteError {
    RewriteError::InvalidConfigValue {
        key: key.to_string(),
        reason: reason.into(),
    }
}

impl ProviderSettings {
    /// Copies every entry missing here from `defaults`. Present entries are kept.
    pub fn backfill(&mut self, defaults: &ProviderSettings) {
        backfill(&mut self.model_name, &defaults.model_name);
        backfill(&mut self.temperature, &defaults.temperature);
        backfill(&mut self.max_output_tokens, &defaults.max_output_tokens);
        backfill(&mut self.streaming, &defaults.streaming);
        backfill(&mut self.api_key, &defaults.api_key);
        backfill(&mut self.base_url, &defaults.base_url);
        backfill(&mut self.num_ctx, &defaults.num_ctx);
        for (key, value) in &defaults.extra {
            self.extra
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }

    /// Sets a single key. Known keys are type-checked and left untouched on
    /// error; unknown keys are stored as-is.
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), RewriteError> {
        match key {
            "model_name" | "model" => {
                let name = value
                    .as_str()
                    .filter(|s| !s.trim().is_empty())
                    .ok_or_else(|| invalid(key, "expected a non-empty string"))?;
                self.model_name = Some(name.to_string());
            }
            "temperature" => {
                let temperature = value
                    .as_f64()
                    .ok_or_else(|| invalid(key, "expected a number"))?
                    as f32;
                if !TEMPERATURE_RANGE.contains(&temperature) {
                    return Err(invalid(key, "must be between 0.0 and 2.0"));
                }
                self.temperature = Some(temperature);
            }
            "max_output_tokens" | "max_tokens" => {
                self.max_output_tokens = match value {
                    Value::Null => None,
                    other => Some(as_u32(key, &other)?),
                };
            }
            "streaming" | "stream" => {
                let streaming = value
                    .as_bool()
                    .ok_or_else(|| invalid(key, "expected a boolean"))?;
                self.streaming = Some(streaming);
            }
            "api_key" => self.api_key = as_optional_string(key, value)?,
            "base_url" => self.base_url = as_optional_string(key, value)?,
            "num_ctx" => self.num_ctx = Some(as_u32(key, &value)?),
            _ => {
                self.extra.insert(key.to_string(), value);
            }
        }
        Ok(())
    }
}

impl ProviderSettings {
    /// Reads a namespace from a config file entry by entry. Entries that
    /// fail validation are dropped with a warning and later backfilled, so
    /// one bad value never costs the rest of the block.
    fn from_stored(provider: ProviderKind, value: Value) -> Option<Self> {
        let entries = match value {
            Value::Object(entries) => entries,
            Value::Null => return None,
            other => {
                warn!(provider = %provider, value = %other, "Ignoring malformed settings block");
                return None;
            }
        };

        let mut settings = Self::default();
        for (key, value) in entries {
            let applied = match (key.as_str(), value.as_f64()) {
                // Clamped after the merge rather than rejected.
                ("temperature", Some(temperature)) => {
                    settings.temperature = Some(temperature as f32);
                    Ok(())
                }
                _ => settings.set(&key, value),
            };
            if let Err(e) = applied {
                warn!(provider = %provider, error = %e, "Dropping invalid configuration entry");
            }
        }
        Some(settings)
    }
}

fn as_u32(key: &str, value: &Value) -> Result<u32, RewriteError> {
    value
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| invalid(key, "expected a positive integer"))
}

fn as_optional_string(key: &str, value: Value) -> Result<Option<String>, RewriteError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => Ok(Some(s)),
        _ => Err(invalid(key, "expected a string")),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Configuration {
    pub active_provider: ProviderKind,
    pub openai: ProviderSettings,
    pub gemini: ProviderSettings,
    pub ollama: ProviderSettings,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// On-disk shape, where every top-level entry may be missing.
#[derive(Debug, Default)]
struct StoredConfig {
    active_provider: Option<ProviderKind>,
    openai: Option<ProviderSettings>,
    gemini: Option<ProviderSettings>,
    ollama: Option<ProviderSettings>,
    extra: Map<String, Value>,
}

impl StoredConfig {
    fn parse(raw: &str, yaml: bool) -> Result<Self, String> {
        let document: Value = if yaml {
            serde_yaml::from_str(raw).map_err(|e| e.to_string())?
        } else {
            serde_json::from_str(raw).map_err(|e| e.to_string())?
        };

        let mut root = match document {
            Value::Object(root) => root,
            Value::Null => Map::new(),
            other => return Err(format!("expected a mapping at the top level, found {}", other)),
        };

        let active_provider = Self::provider(&mut root, "active_provider");
        // Historical name of `active_provider`, read but never written.
        let legacy_provider = Self::provider(&mut root, "model_provider");
        let mut block = |kind: ProviderKind| {
            root.remove(kind.as_str())
                .and_then(|value| ProviderSettings::from_stored(kind, value))
        };
        let openai = block(ProviderKind::Openai);
        let gemini = block(ProviderKind::Gemini);
        let ollama = block(ProviderKind::Ollama);

        Ok(Self {
            active_provider: active_provider.or(legacy_provider),
            openai,
            gemini,
            ollama,
            extra: root,
        })
    }

    fn provider(root: &mut Map<String, Value>, key: &str) -> Option<ProviderKind> {
        match root.remove(key)? {
            Value::Null => None,
            Value::String(raw) => raw
                .parse()
                .map_err(|e: RewriteError| warn!(key, error = %e, "Ignoring configured provider"))
                .ok(),
            other => {
                warn!(key, value = %other, "Ignoring configured provider");
                None
            }
        }
    }
}

impl Configuration {
    pub fn defaults(env: &EnvSettings) -> Self {
        let active_provider = match env.default_provider.as_deref() {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(
                    value = raw,
                    "DEFAULT_PROVIDER is not a known provider, using {}", DEFAULT_PROVIDER
                );
                DEFAULT_PROVIDER
            }),
            None => DEFAULT_PROVIDER,
        };

        Self {
            active_provider,
            openai: ProviderSettings {
                model_name: Some(DEFAULT_MODEL_OPENAI.to_string()),
                temperature: Some(DEFAULT_TEMPERATURE),
                max_output_tokens: Some(DEFAULT_MAX_OUTPUT_TOKENS),
                streaming: Some(false),
                api_key: env.openai_api_key.clone(),
                ..Default::default()
            },
            gemini: ProviderSettings {
                model_name: Some(
                    env.gemini_model
                        .clone()
                        .unwrap_or_else(|| DEFAULT_MODEL_GEMINI.to_string()),
                ),
                temperature: Some(DEFAULT_TEMPERATURE),
                max_output_tokens: Some(DEFAULT_MAX_OUTPUT_TOKENS),
                streaming: Some(false),
                api_key: env.gemini_api_key.clone(),
                ..Default::default()
            },
            ollama: ProviderSettings {
                model_name: Some(
                    env.ollama_model
                        .clone()
                        .unwrap_or_else(|| DEFAULT_MODEL_OLLAMA.to_string()),
                ),
                temperature: Some(DEFAULT_TEMPERATURE),
                streaming: Some(false),
                base_url: Some(
                    env.ollama_base_url
                        .clone()
                        .unwrap_or_else(|| DEFAULT_OLLAMA_BASE_URL.to_string()),
                ),
                num_ctx: Some(DEFAULT_NUM_CTX),
                ..Default::default()
            },
            extra: Map::new(),
        }
    }

    fn merge(stored: StoredConfig, defaults: &Configuration) -> Self {
        let mut config = Self {
            active_provider: stored.active_provider.unwrap_or(defaults.active_provider),
            openai: stored.openai.unwrap_or_else(|| defaults.openai.clone()),
            gemini: stored.gemini.unwrap_or_else(|| defaults.gemini.clone()),
            ollama: stored.ollama.unwrap_or_else(|| defaults.ollama.clone()),
            extra: stored.extra,
        };
        config.backfill(defaults);
        config
    }

    /// Two-level merge: missing namespaces and missing keys inside a
    /// namespace come from `defaults`, existing values are never replaced.
    pub fn backfill(&mut self, defaults: &Configuration) {
        for kind in ProviderKind::ALL {
            self.settings_mut(kind).backfill(defaults.settings(kind));
        }
        for (key, value) in &defaults.extra {
            self.extra
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }

    pub fn settings(&self, provider: ProviderKind) -> &ProviderSettings {
        match provider {
            ProviderKind::Openai => &self.openai,
            ProviderKind::Gemini => &self.gemini,
            ProviderKind::Ollama => &self.ollama,
        }
    }

    pub fn settings_mut(&mut self, provider: ProviderKind) -> &mut ProviderSettings {
        match provider {
            ProviderKind::Openai => &mut self.openai,
            ProviderKind::Gemini => &mut self.gemini,
            ProviderKind::Ollama => &mut self.ollama,
        }
    }

    fn clamp_temperatures(&mut self) {
        for kind in ProviderKind::ALL {
            let settings = self.settings_mut(kind);
            if let Some(temperature) = settings.temperature {
                let clamped = temperature.clamp(*TEMPERATURE_RANGE.start(), *TEMPERATURE_RANGE.end());
                if clamped != temperature {
                    warn!(provider = %kind, temperature, clamped, "Temperature out of range, clamping");
                    settings.temperature = Some(clamped);
                }
            }
        }
    }

    /// Copy suitable for display, with API keys masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for kind in ProviderKind::ALL {
            let settings = copy.settings_mut(kind);
            if settings.api_key.is_some() {
                settings.api_key = Some("********".to_string());
            }
        }
        copy
    }
}

/// Outcome of a successful [`ConfigStore::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigUpdate {
    Stored,
    /// The active provider changed, its bound adapter must be rebuilt.
    ActiveProvider,
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// The live configuration plus the file it is persisted to, if any.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    config: Configuration,
    path: Option<PathBuf>,
}

impl ConfigStore {
    pub async fn open(path: Option<PathBuf>, defaults: &Configuration) -> Self {
        let config = Self::load(path.as_deref(), defaults).await;
        Self { config, path }
    }

    #[cfg(test)]
    pub fn in_memory(config: Configuration) -> Self {
        Self { config, path: None }
    }

    /// Never fails: a missing or broken file degrades to `defaults`.
    pub async fn load(path: Option<&Path>, defaults: &Configuration) -> Configuration {
        let Some(path) = path else {
            info!("No configuration file given, using defaults");
            return defaults.clone();
        };

        match Self::read(path, defaults).await {
            Ok(config) => {
                info!(path = %path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                warn!(error = %e, "Using default configuration");
                defaults.clone()
            }
        }
    }

    async fn read(path: &Path, defaults: &Configuration) -> Result<Configuration, RewriteError> {
        let load_error = |reason: String| RewriteError::ConfigLoad {
            path: path.display().to_string(),
            reason,
        };

        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| load_error(e.to_string()))?;
        debug!("Config file content length: {}", raw.len());

        let stored = StoredConfig::parse(&raw, is_yaml(path)).map_err(load_error)?;
        let mut config = Configuration::merge(stored, defaults);
        config.clamp_temperatures();
        Ok(config)
    }

    /// Writes `config` to `path`, creating parent directories. Failures are
    /// logged and reported as `false`.
    pub async fn save(config: &Configuration, path: &Path) -> bool {
        match Self::write(config, path).await {
            Ok(()) => {
                info!(path = %path.display(), "Saved configuration");
                true
            }
            Err(e) => {
                error!(error = %e, "Could not save configuration");
                false
            }
        }
    }

    async fn write(config: &Configuration, path: &Path) -> Result<(), RewriteError> {
        let save_error = |reason: String| RewriteError::ConfigSave {
            path: path.display().to_string(),
            reason,
        };

        let body = if is_yaml(path) {
            serde_yaml::to_string(config).map_err(|e| save_error(e.to_string()))?
        } else {
            serde_json::to_string_pretty(config).map_err(|e| save_error(e.to_string()))?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| save_error(e.to_string()))?;
        }

        tokio::fs::write(path, body)
            .await
            .map_err(|e| save_error(e.to_string()))
    }

    /// Saves to the bound path. Without one the configuration is in-memory
    /// only and this is a no-op.
    pub async fn persist(&self) -> bool {
        match &self.path {
            Some(path) => Self::save(&self.config, path).await,
            None => true,
        }
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub async fn update(
        &mut self,
        provider: &str,
        key: &str,
        value: Value,
    ) -> Result<ConfigUpdate, RewriteError> {
        let kind: ProviderKind = provider.parse()?;
        self.config.settings_mut(kind).set(key, value)?;

        if !self.persist().await {
            warn!(provider = %kind, key, "Configuration change kept in memory only");
        }

        Ok(if self.config.active_provider == kind {
            ConfigUpdate::ActiveProvider
        } else {
            ConfigUpdate::Stored
        })
    }

    pub async fn set_active_provider(&mut self, provider: ProviderKind) {
        self.config.active_provider = provider;
        if !self.persist().await {
            warn!(provider = %provider, "Provider switch kept in memory only");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_env() -> EnvSettings {
        EnvSettings {
            openai_api_key: Some("sk-test".to_string()),
            gemini_api_key: None,
            ollama_base_url: Some("http://ollama.local:11434".to_string()),
            ollama_model: None,
            gemini_model: Some("gemini-pro".to_string()),
            default_provider: Some("OpenAI".to_string()),
        }
    }

    #[test]
    fn test_defaults_from_env() {
        let config = Configuration::defaults(&test_env());
        assert_eq!(config.active_provider, ProviderKind::Openai);
        assert_eq!(config.openai.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.openai.model_name.as_deref(), Some(DEFAULT_MODEL_OPENAI));
        assert_eq!(config.gemini.model_name.as_deref(), Some("gemini-pro"));
        assert!(config.gemini.api_key.is_none());
        assert_eq!(config.ollama.model_name.as_deref(), Some(DEFAULT_MODEL_OLLAMA));
        assert_eq!(
            config.ollama.base_url.as_deref(),
            Some("http://ollama.local:11434")
        );
        assert_eq!(config.ollama.num_ctx, Some(8192));
    }

    #[test]
    fn test_unknown_default_provider_falls_back() {
        let env = EnvSettings {
            default_provider: Some("claude".to_string()),
            ..Default::default()
        };
        assert_eq!(Configuration::defaults(&env).active_provider, DEFAULT_PROVIDER);
        assert_eq!(
            Configuration::defaults(&EnvSettings::default()).active_provider,
            ProviderKind::Gemini
        );
    }

    #[test]
    fn test_merge_backfills_without_overwriting() {
        let defaults = Configuration::defaults(&test_env());
        let stored = StoredConfig::parse(
            r#"{"active_provider": "ollama", "openai": {"temperature": 0.2}}"#,
            false,
        )
        .unwrap();

        let config = Configuration::merge(stored, &defaults);

        assert_eq!(config.active_provider, ProviderKind::Ollama);
        assert_eq!(config.openai.temperature, Some(0.2));
        assert_eq!(config.openai.model_name.as_deref(), Some(DEFAULT_MODEL_OPENAI));
        assert_eq!(config.openai.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.gemini, defaults.gemini);
        assert_eq!(config.ollama, defaults.ollama);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let defaults = Configuration::defaults(&test_env());

        let mut merged = defaults.clone();
        merged.backfill(&defaults);
        assert_eq!(merged, defaults);

        let stored = StoredConfig::parse(r#"{"gemini": {"model": "custom"}}"#, false).unwrap();
        let once = Configuration::merge(stored, &defaults);
        let mut twice = once.clone();
        twice.backfill(&defaults);
        assert_eq!(once, twice);
        assert_eq!(once.gemini.model_name.as_deref(), Some("custom"));
    }

    #[test]
    fn test_legacy_keys_are_read() {
        let defaults = Configuration::defaults(&EnvSettings::default());
        let stored = StoredConfig::parse(
            r#"{
                "model_provider": "openai",
                "openai": {"model": "gpt-4o", "max_tokens": 1200, "stream": true}
            }"#,
            false,
        )
        .unwrap();

        let config = Configuration::merge(stored, &defaults);

        assert_eq!(config.active_provider, ProviderKind::Openai);
        assert_eq!(config.openai.model_name.as_deref(), Some("gpt-4o"));
        assert_eq!(config.openai.max_output_tokens, Some(1200));
        assert_eq!(config.openai.streaming, Some(true));
    }

    #[test]
    fn test_active_provider_wins_over_legacy_key() {
        let defaults = Configuration::defaults(&EnvSettings::default());
        let stored = StoredConfig::parse(
            r#"{"model_provider": "openai", "active_provider": "ollama"}"#,
            false,
        )
        .unwrap();
        assert_eq!(
            Configuration::merge(stored, &defaults).active_provider,
            ProviderKind::Ollama
        );
    }

    #[test]
    fn test_unknown_keys_survive_merge() {
        let defaults = Configuration::defaults(&EnvSettings::default());
        let stored = StoredConfig::parse(
            "ollama:\n  top_k: 40\nlanguage: vi\n",
            true,
        )
        .unwrap();

        let config = Configuration::merge(stored, &defaults);

        assert_eq!(config.ollama.extra.get("top_k"), Some(&json!(40)));
        assert_eq!(config.extra.get("language"), Some(&json!("vi")));
        assert_eq!(config.ollama.base_url, defaults.ollama.base_url);
    }

    #[test]
    fn test_provider_names_ignore_case() {
        let defaults = Configuration::defaults(&EnvSettings::default());
        for raw in [
            r#"{"active_provider": "OpenAI"}"#,
            r#"{"active_provider": "OPENAI"}"#,
            r#"{"model_provider": "Openai"}"#,
        ] {
            let stored = StoredConfig::parse(raw, false).unwrap();
            assert_eq!(
                Configuration::merge(stored, &defaults).active_provider,
                ProviderKind::Openai
            );
        }
    }

    #[test]
    fn test_unknown_provider_name_is_ignored() {
        let defaults = Configuration::defaults(&EnvSettings::default());
        let stored = StoredConfig::parse(
            r#"{"active_provider": "claude", "model_provider": "ollama", "gemini": {"temperature": 0.4}}"#,
            false,
        )
        .unwrap();

        let config = Configuration::merge(stored, &defaults);

        assert_eq!(config.active_provider, ProviderKind::Ollama);
        assert_eq!(config.gemini.temperature, Some(0.4));
    }

    #[test]
    fn test_bad_entry_is_dropped_and_backfilled() {
        let defaults = Configuration::defaults(&test_env());
        let stored = StoredConfig::parse(
            r#"{
                "model_provider": "ollama",
                "openai": {"temperature": 0.2, "max_tokens": "8000", "stream": "yes"},
                "gemini": "not a block"
            }"#,
            false,
        )
        .unwrap();

        let config = Configuration::merge(stored, &defaults);

        assert_eq!(config.active_provider, ProviderKind::Ollama);
        assert_eq!(config.openai.temperature, Some(0.2));
        assert_eq!(config.openai.max_output_tokens, defaults.openai.max_output_tokens);
        assert_eq!(config.openai.streaming, Some(false));
        assert!(!config.openai.extra.contains_key("max_tokens"));
        assert_eq!(config.gemini, defaults.gemini);
    }

    #[test]
    fn test_non_mapping_document_is_rejected() {
        assert!(StoredConfig::parse("[1, 2, 3]", false).is_err());
        assert!(StoredConfig::parse("- a\n- b\n", true).is_err());
    }

    #[test]
    fn test_set_validates_values() {
        let mut settings = ProviderSettings::default();

        assert!(settings.set("temperature", json!(0.9)).is_ok());
        assert_eq!(settings.temperature, Some(0.9));

        assert!(settings.set("temperature", json!(3.5)).is_err());
        assert!(settings.set("temperature", json!("hot")).is_err());
        assert_eq!(settings.temperature, Some(0.9));

        assert!(settings.set("model", json!("llama3")).is_ok());
        assert_eq!(settings.model_name.as_deref(), Some("llama3"));

        assert!(settings.set("max_tokens", json!(-1)).is_err());
        assert!(settings.set("max_output_tokens", json!(null)).is_ok());
        assert_eq!(settings.max_output_tokens, None);

        assert!(settings.set("top_p", json!(0.5)).is_ok());
        assert_eq!(settings.extra.get("top_p"), Some(&json!(0.5)));
    }

    #[test]
    fn test_redacted_masks_keys() {
        let config = Configuration::defaults(&test_env()).redacted();
        assert_eq!(config.openai.api_key.as_deref(), Some("********"));
        assert!(config.gemini.api_key.is_none());
    }

    #[tokio::test]
    async fn test_load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let defaults = Configuration::defaults(&test_env());

        let config = ConfigStore::load(Some(&dir.path().join("absent.json")), &defaults).await;
        assert_eq!(config, defaults);

        let config = ConfigStore::load(None, &defaults).await;
        assert_eq!(config, defaults);
    }

    #[tokio::test]
    async fn test_load_unparseable_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();
        let defaults = Configuration::defaults(&test_env());

        assert_eq!(ConfigStore::load(Some(&path), &defaults).await, defaults);
    }

    #[tokio::test]
    async fn test_load_keeps_file_despite_mixed_case_and_bad_types() {
        let dir = tempfile::tempdir().unwrap();
        let defaults = Configuration::defaults(&test_env());

        let path = dir.path().join("mixed.json");
        tokio::fs::write(&path, r#"{"active_provider":"OpenAI","openai":{"temperature":0.2}}"#)
            .await
            .unwrap();
        let config = ConfigStore::load(Some(&path), &defaults).await;
        assert_eq!(config.active_provider, ProviderKind::Openai);
        assert_eq!(config.openai.temperature, Some(0.2));

        let path = dir.path().join("typed.json");
        tokio::fs::write(
            &path,
            r#"{"model_provider":"ollama","openai":{"temperature":0.2,"max_tokens":"8000"}}"#,
        )
        .await
        .unwrap();
        let config = ConfigStore::load(Some(&path), &defaults).await;
        assert_eq!(config.active_provider, ProviderKind::Ollama);
        assert_eq!(config.openai.temperature, Some(0.2));
        assert_eq!(config.openai.max_output_tokens, Some(8000));
    }

    #[tokio::test]
    async fn test_load_clamps_temperature() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hot.json");
        tokio::fs::write(&path, r#"{"gemini": {"temperature": 5.0}}"#)
            .await
            .unwrap();
        let defaults = Configuration::defaults(&test_env());

        let config = ConfigStore::load(Some(&path), &defaults).await;
        assert_eq!(config.gemini.temperature, Some(2.0));
    }

    #[tokio::test]
    async fn test_save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let defaults = Configuration::defaults(&test_env());
        let mut config = defaults.clone();
        config.active_provider = ProviderKind::Ollama;
        config.ollama.temperature = Some(1.1);

        for name in ["nested/deeper/config.json", "nested/config.yaml"] {
            let path = dir.path().join(name);
            assert!(ConfigStore::save(&config, &path).await);
            assert_eq!(ConfigStore::load(Some(&path), &defaults).await, config);
        }

        let written = tokio::fs::read_to_string(dir.path().join("nested/deeper/config.json"))
            .await
            .unwrap();
        assert!(written.contains("\"active_provider\": \"ollama\""));
        assert!(!written.contains("model_provider"));
    }

    #[tokio::test]
    async fn test_save_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        tokio::fs::write(&blocker, "x").await.unwrap();
        let config = Configuration::defaults(&test_env());

        assert!(!ConfigStore::save(&config, &blocker.join("config.json")).await);
    }

    #[tokio::test]
    async fn test_update_persists_and_signals_active() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let defaults = Configuration::defaults(&test_env());
        let mut store = ConfigStore::open(Some(path.clone()), &defaults).await;

        let outcome = store
            .update("openai", "temperature", json!(0.3))
            .await
            .unwrap();
        assert_eq!(outcome, ConfigUpdate::ActiveProvider);

        let outcome = store.update("ollama", "model", json!("llama3")).await.unwrap();
        assert_eq!(outcome, ConfigUpdate::Stored);

        let reloaded = ConfigStore::load(Some(&path), &defaults).await;
        assert_eq!(reloaded.openai.temperature, Some(0.3));
        assert_eq!(reloaded.ollama.model_name.as_deref(), Some("llama3"));
    }

    #[tokio::test]
    async fn test_update_rejects_unknown_provider() {
        let defaults = Configuration::defaults(&test_env());
        let mut store = ConfigStore::in_memory(defaults.clone());

        let result = store.update("claude", "temperature", json!(0.5)).await;

        assert!(matches!(result, Err(RewriteError::UnsupportedProvider(_))));
        assert_eq!(store.config(), &defaults);
    }
}
