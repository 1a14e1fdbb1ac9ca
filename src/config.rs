use lucid_core::security::env_vars;
use lucid_core::{LucidError, ProviderKind};
use lucid_prompt::CacheTtl;
use lucid_telemetry::TelemetryConfig;

/// Client configuration. Credentials left unset here are read from the
/// environment when connecting.
#[derive(Clone, Debug)]
pub struct LucidConfig {
    pub api_key: Option<String>,
    pub agent_id: Option<String>,
    /// Backend base URL; the hosted service when `None`.
    pub base_url: Option<String>,
    pub provider: ProviderKind,
    /// TTL used by `Lucid::get_prompt` when the caller passes none.
    pub prompt_ttl: CacheTtl,
    pub telemetry: TelemetryConfig,
    /// End the active session on SIGINT/SIGTERM.
    pub handle_signals: bool,
}

impl Default for LucidConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            agent_id: None,
            base_url: None,
            provider: ProviderKind::None,
            prompt_ttl: CacheTtl::default(),
            telemetry: TelemetryConfig::default(),
            handle_signals: true,
        }
    }
}

impl LucidConfig {
    /// Defaults with the base URL and provider taken from the environment.
    pub fn from_env() -> Result<Self, LucidError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(env: impl Fn(&str) -> Option<String>) -> Result<Self, LucidError> {
        let mut config = Self::default();
        config.base_url = env(env_vars::BASE_URL).filter(|v| !v.is_empty());
        if let Some(raw) = env(env_vars::PROVIDER) {
            config.provider = raw.parse().map_err(|e: String| {
                LucidError::Config(format!("{}: {e}", env_vars::PROVIDER))
            })?;
        }
        Ok(config)
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_prompt_ttl(mut self, ttl: CacheTtl) -> Self {
        self.prompt_ttl = ttl;
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryConfig) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn without_signal_handler(mut self) -> Self {
        self.handle_signals = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn env_sets_provider_and_base_url() {
        let config = LucidConfig::from_lookup(lookup(&[
            (env_vars::PROVIDER, "langchain"),
            (env_vars::BASE_URL, "http://localhost:8000/api"),
        ]))
        .unwrap();
        assert_eq!(config.provider, ProviderKind::LangChain);
        assert_eq!(config.base_url.as_deref(), Some("http://localhost:8000/api"));
        assert!(config.api_key.is_none());
    }

    #[test]
    fn unknown_provider_is_config_error() {
        let err = LucidConfig::from_lookup(lookup(&[(env_vars::PROVIDER, "cohere")])).unwrap_err();
        assert!(matches!(err, LucidError::Config(_)));
    }

    #[test]
    fn builder_overrides() {
        let config = LucidConfig::default()
            .with_api_key("k")
            .with_agent_id("a")
            .with_provider(ProviderKind::OpenAi)
            .with_prompt_ttl(CacheTtl::Never)
            .without_signal_handler();
        assert_eq!(config.api_key.as_deref(), Some("k"));
        assert_eq!(config.agent_id.as_deref(), Some("a"));
        assert_eq!(config.provider, ProviderKind::OpenAi);
        assert_eq!(config.prompt_ttl, CacheTtl::Never);
        assert!(!config.handle_signals);
    }
}
