use super::endpoint;
use super::gemini::{API_KEY_HEADER, GEMINI_BASE_URL};
use super::openai::OPENAI_BASE_URL;
use crate::models::config::{Configuration, ProviderSettings, DEFAULT_OLLAMA_BASE_URL};
use crate::models::{ProviderAvailability, ProviderKind};
use std::time::Duration;
use tracing::{debug, info, info_span, warn};
use tracing_futures::Instrument;

pub const CLOUD_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const LOCAL_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Checks, on every call, whether each provider can serve requests right now.
#[derive(Debug, Clone)]
pub struct AvailabilityProber {
    client: reqwest::Client,
    cloud_timeout: Duration,
    local_timeout: Duration,
}

impl AvailabilityProber {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            cloud_timeout: CLOUD_PROBE_TIMEOUT,
            local_timeout: LOCAL_PROBE_TIMEOUT,
        }
    }

    #[cfg(test)]
    pub fn with_timeouts(mut self, cloud: Duration, local: Duration) -> Self {
        self.cloud_timeout = cloud;
        self.local_timeout = local;
        self
    }

    pub async fn probe(&self, config: &Configuration) -> ProviderAvailability {
        let (openai, gemini, ollama) = futures::join!(
            self.probe_openai(&config.openai)
                .instrument(info_span!("probe", provider = "openai")),
            self.probe_gemini(&config.gemini)
                .instrument(info_span!("probe", provider = "gemini")),
            self.probe_ollama(&config.ollama)
                .instrument(info_span!("probe", provider = "ollama")),
        );

        let availability = ProviderAvailability {
            openai,
            gemini,
            ollama,
        };
        debug!(?availability, "Provider availability");
        availability
    }

    async fn probe_openai(&self, settings: &ProviderSettings) -> bool {
        let Some(api_key) = settings.api_key.as_deref().filter(|k| !k.trim().is_empty()) else {
            warn!("OpenAI API key not configured");
            return false;
        };
        let base = settings.base_url.as_deref().unwrap_or(OPENAI_BASE_URL);

        let request = self
            .client
            .get(endpoint(base, "v1/models"))
            .bearer_auth(api_key)
            .timeout(self.cloud_timeout);
        Self::check(ProviderKind::Openai, request).await
    }

    async fn probe_gemini(&self, settings: &ProviderSettings) -> bool {
        let Some(api_key) = settings.api_key.as_deref().filter(|k| !k.trim().is_empty()) else {
            warn!("Gemini API key not configured");
            return false;
        };
        let base = settings.base_url.as_deref().unwrap_or(GEMINI_BASE_URL);

        let request = self
            .client
            .get(endpoint(base, "v1beta/models"))
            .header(API_KEY_HEADER, api_key)
            .timeout(self.cloud_timeout);
        Self::check(ProviderKind::Gemini, request).await
    }

    async fn probe_ollama(&self, settings: &ProviderSettings) -> bool {
        let base = settings
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_OLLAMA_BASE_URL);

        let request = self
            .client
            .get(endpoint(base, "api/tags"))
            .timeout(self.local_timeout);
        Self::check(ProviderKind::Ollama, request).await
    }

    async fn check(provider: ProviderKind, request: reqwest::RequestBuilder) -> bool {
        match request.send().await {
            Ok(response) if response.status().is_success() => {
                info!(provider = %provider, "Provider available");
                true
            }
            Ok(response) => {
                warn!(provider = %provider, status = %response.status(), "Provider unavailable");
                false
            }
            Err(e) => {
                warn!(provider = %provider, error = %e, "Provider probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config::EnvSettings;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> Configuration {
        let mut config = Configuration::defaults(&EnvSettings {
            openai_api_key: Some("sk-test".to_string()),
            gemini_api_key: Some("g-key".to_string()),
            ollama_base_url: Some(server.uri()),
            ..Default::default()
        });
        config.openai.base_url = Some(server.uri());
        config.gemini.base_url = Some(server.uri());
        config
    }

    #[tokio::test]
    async fn test_probe_all_available() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1beta/models"))
            .and(header(API_KEY_HEADER, "g-key"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let prober = AvailabilityProber::new(reqwest::Client::new());
        let availability = prober.probe(&config_for(&server)).await;

        assert_eq!(
            availability,
            ProviderAvailability {
                openai: true,
                gemini: true,
                ollama: true
            }
        );
    }

    #[tokio::test]
    async fn test_probe_non_success_status_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1beta/models"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let prober = AvailabilityProber::new(reqwest::Client::new());
        let availability = prober.probe(&config_for(&server)).await;

        assert!(!availability.openai);
        assert!(!availability.gemini);
        assert!(availability.ollama);
    }

    #[tokio::test]
    async fn test_probe_without_api_key_skips_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut config = config_for(&server);
        config.openai.api_key = None;
        config.gemini.api_key = Some("  ".to_string());

        let prober = AvailabilityProber::new(reqwest::Client::new());
        let availability = prober.probe(&config).await;

        assert!(!availability.openai);
        assert!(!availability.gemini);
    }

    #[tokio::test]
    async fn test_probe_unreachable_host_is_unavailable() {
        let server = MockServer::start().await;
        let mut config = config_for(&server);
        // Nothing listens on the discard port.
        config.ollama.base_url = Some("http://127.0.0.1:9".to_string());

        let prober = AvailabilityProber::new(reqwest::Client::new())
            .with_timeouts(Duration::from_millis(500), Duration::from_millis(500));

        assert!(!prober.probe(&config).await.ollama);
    }

    #[tokio::test]
    async fn test_probe_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let prober = AvailabilityProber::new(reqwest::Client::new())
            .with_timeouts(Duration::from_millis(200), Duration::from_millis(200));

        assert!(!prober.probe(&config_for(&server)).await.ollama);
    }
}
