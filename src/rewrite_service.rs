use crate::errors::RewriteError;
use crate::models::config::{
    ConfigStore, ConfigUpdate, Configuration, EnvSettings, ProviderSettings,
};
use crate::models::providers::{
    AvailabilityProber, ModelAdapter, ModelProvider, ProviderSelector,
};
use crate::models::{ModelInfo, ProviderAvailability, ProviderKind, RewriteResult};
use crate::prompts::PromptManager;
use serde_json::Value;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Advisory output length; results outside it are logged, never rejected.
pub const TARGET_WORD_RANGE: RangeInclusive<usize> = 500..=1000;

struct BoundAdapter {
    adapter: ModelAdapter,
    settings: ProviderSettings,
}

struct ServiceState {
    store: ConfigStore,
    bound: Option<BoundAdapter>,
}

/// Rewrites text through whichever provider is currently usable.
///
/// The configuration and the bound adapter sit behind a single lock so that a
/// provider switch or config update is never observed half-applied.
pub struct RewriteService {
    state: Mutex<ServiceState>,
    prober: AvailabilityProber,
    prompts: PromptManager,
    client: reqwest::Client,
}

impl RewriteService {
    /// Loads the configuration and binds a model. Fails only when no provider
    /// at all can serve requests.
    pub async fn new(
        config_path: Option<PathBuf>,
        env: &EnvSettings,
        prompts: PromptManager,
    ) -> Result<Self, RewriteError> {
        let defaults = Configuration::defaults(env);
        let store = ConfigStore::open(config_path, &defaults).await;
        let client = reqwest::Client::new();
        let prober = AvailabilityProber::new(client.clone());
        Self::with_store(store, prober, prompts, client).await
    }

    pub async fn with_store(
        store: ConfigStore,
        prober: AvailabilityProber,
        prompts: PromptManager,
        client: reqwest::Client,
    ) -> Result<Self, RewriteError> {
        let service = Self {
            state: Mutex::new(ServiceState { store, bound: None }),
            prober,
            prompts,
            client,
        };

        {
            let mut state = service.state.lock().await;
            service.initialize_model(&mut state).await?;
        }

        Ok(service)
    }

    async fn initialize_model(&self, state: &mut ServiceState) -> Result<ProviderKind, RewriteError> {
        let config = state.store.config();
        let requested = config.active_provider;
        let availability = self.prober.probe(config).await;
        let resolved = ProviderSelector::resolve(requested, &availability)?;

        self.bind(state, resolved)?;
        info!(requested = %requested, provider = %resolved, "Initialized rewrite model");
        Ok(resolved)
    }

    fn bind(&self, state: &mut ServiceState, provider: ProviderKind) -> Result<(), RewriteError> {
        let settings = state.store.config().settings(provider).clone();
        let adapter = ModelAdapter::new(provider, &settings, self.client.clone())?;
        state.bound = Some(BoundAdapter { adapter, settings });
        Ok(())
    }

    /// Returns the adapter for `provider`, rebuilding it if the provider or
    /// its parameters changed since it was bound. `requested` is the active
    /// provider `provider` was resolved from; when a switch has replaced it
    /// in the meantime, the switch's binding is used as is.
    async fn adapter_for(
        &self,
        provider: ProviderKind,
        requested: ProviderKind,
    ) -> Result<ModelAdapter, RewriteError> {
        let mut state = self.state.lock().await;
        if state.store.config().active_provider != requested {
            if let Some(bound) = &state.bound {
                debug!(
                    requested = %requested,
                    bound = %bound.adapter.provider(),
                    "Active provider changed during rewrite, keeping the newer binding"
                );
                return Ok(bound.adapter.clone());
            }
        }

        let current = state.store.config().settings(provider);

        let up_to_date = state
            .bound
            .as_ref()
            .is_some_and(|b| b.adapter.provider() == provider && &b.settings == current);
        if !up_to_date {
            self.bind(&mut state, provider)?;
        }

        match &state.bound {
            Some(bound) => Ok(bound.adapter.clone()),
            None => Err(RewriteError::NoProviderAvailable {
                requested: provider,
            }),
        }
    }

    /// Rewrites `content`, returning the text and its metrics. Every failure
    /// is reported as a typed error. The text is the backend output with
    /// surrounding whitespace trimmed and is otherwise left as generated.
    #[tracing::instrument(skip_all, fields(custom_prompt = custom_prompt.is_some()))]
    pub async fn rewrite_detailed(
        &self,
        content: &str,
        custom_prompt: Option<&str>,
    ) -> Result<RewriteResult, RewriteError> {
        if content.trim().is_empty() {
            error!("Refusing to rewrite empty content");
            return Err(RewriteError::InvalidInput);
        }

        let config = self.state.lock().await.store.config().clone();
        let active = config.active_provider;

        let system_prompt = self.prompts.system_prompt(active);
        let user_prompt = match custom_prompt.filter(|p| !p.trim().is_empty()) {
            Some(custom) => PromptManager::custom_prompt(custom, content),
            None => self.prompts.user_prompt(active, content),
        };

        let availability = self.prober.probe(&config).await;
        let resolved = ProviderSelector::resolve(active, &availability)?;
        let adapter = self.adapter_for(resolved, active).await?;
        let provider = adapter.provider();

        let model = adapter.model_info();
        info!(
            "Rewriting content ({} chars) using {} ({})",
            content.chars().count(),
            provider,
            model.model_name
        );

        let started = Instant::now();
        let text = adapter
            .generate(system_prompt, &user_prompt)
            .await
            .inspect_err(|e| error!(error = %e, "Error while rewriting content"))?;
        let elapsed = started.elapsed();

        let word_count = text.split_whitespace().count();
        if !TARGET_WORD_RANGE.contains(&word_count) {
            warn!(
                "Rewritten content has {} words (target: {}-{})",
                word_count,
                TARGET_WORD_RANGE.start(),
                TARGET_WORD_RANGE.end()
            );
        }

        let char_count = text.chars().count();
        info!(
            "Rewriting completed in {:.2} seconds. Output: {} chars, {} words",
            elapsed.as_secs_f64(),
            char_count,
            word_count
        );

        Ok(RewriteResult {
            text,
            provider,
            char_count,
            word_count,
            elapsed,
        })
    }

    /// Fail-soft rewrite: a generation failure yields an empty string, which
    /// callers must treat as failure. Empty input and provider exhaustion are
    /// still returned as errors. Like [`rewrite_detailed`](Self::rewrite_detailed),
    /// only surrounding whitespace of the output is trimmed.
    pub async fn rewrite(
        &self,
        content: &str,
        custom_prompt: Option<&str>,
    ) -> Result<String, RewriteError> {
        match self.rewrite_detailed(content, custom_prompt).await {
            Ok(result) => Ok(result.text),
            Err(RewriteError::GenerationFailed { .. }) => Ok(String::new()),
            Err(e) => Err(e),
        }
    }

    /// Makes `provider` the active one and rebinds the model. On `false` the
    /// configuration may already hold the new provider; re-read it with
    /// [`get_config`](Self::get_config).
    pub async fn switch_provider(&self, provider: &str) -> bool {
        let kind = match provider.parse::<ProviderKind>() {
            Ok(kind) => kind,
            Err(e) => {
                error!(error = %e, "Cannot switch provider");
                return false;
            }
        };

        let mut state = self.state.lock().await;
        state.store.set_active_provider(kind).await;

        match self.initialize_model(&mut state).await {
            Ok(resolved) => {
                info!(provider = %kind, resolved = %resolved, "Switched provider");
                true
            }
            Err(e) => {
                error!(error = %e, "Error while switching provider");
                false
            }
        }
    }

    pub async fn update_config(&self, provider: &str, key: &str, value: Value) -> bool {
        let mut state = self.state.lock().await;

        let outcome = match state.store.update(provider, key, value).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Error while updating configuration");
                return false;
            }
        };

        if outcome == ConfigUpdate::ActiveProvider {
            if let Err(e) = self.initialize_model(&mut state).await {
                error!(error = %e, "Configuration updated but the model could not be rebuilt");
                return false;
            }
        }

        info!("Updated configuration {}.{}", provider, key);
        true
    }

    pub async fn get_config(&self) -> Configuration {
        self.state.lock().await.store.config().clone()
    }

    pub async fn get_model_info(&self) -> Option<ModelInfo> {
        self.state
            .lock()
            .await
            .bound
            .as_ref()
            .map(|b| b.adapter.model_info())
    }

    /// Fresh availability snapshot; never cached.
    pub async fn get_available_providers(&self) -> ProviderAvailability {
        let config = self.get_config().await;
        self.prober.probe(&config).await
    }
}
