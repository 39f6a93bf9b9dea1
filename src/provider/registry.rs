//! Provider selection from the environment

use super::mock::DEFAULT_MOCK_LATENCY;
use super::{AssistantProvider, LoggingProvider, MockProvider, OpenAiProvider, ProviderError};
use crate::runtime::TokenStorage;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderKind {
    #[default]
    Mock,
    OpenAi,
}

impl ProviderKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mock" => Some(Self::Mock),
            "openai" => Some(Self::OpenAi),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mock => "mock",
            Self::OpenAi => "openai",
        }
    }
}

/// Configuration for assistant providers
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub mock_latency: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: DEFAULT_MODEL.to_string(),
            openai_api_key: None,
            openai_base_url: None,
            mock_latency: DEFAULT_MOCK_LATENCY,
        }
    }
}

impl ProviderConfig {
    pub fn from_env() -> Self {
        let provider = match std::env::var("PAGECHAT_PROVIDER") {
            Ok(value) => ProviderKind::parse(&value).unwrap_or_else(|| {
                tracing::warn!(value = %value, "Unknown PAGECHAT_PROVIDER, using mock");
                ProviderKind::Mock
            }),
            Err(_) => ProviderKind::default(),
        };

        Self {
            provider,
            model: std::env::var("PAGECHAT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            openai_base_url: std::env::var("OPENAI_BASE_URL").ok(),
            mock_latency: std::env::var("PAGECHAT_MOCK_LATENCY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map_or(DEFAULT_MOCK_LATENCY, Duration::from_millis),
        }
    }
}

/// Registry of available providers, each wrapped with logging
pub struct ProviderRegistry {
    providers: HashMap<&'static str, Arc<dyn AssistantProvider>>,
    default_provider: ProviderKind,
    default_model: String,
}

impl ProviderRegistry {
    pub fn new(config: &ProviderConfig, tokens: TokenStorage) -> Result<Self, ProviderError> {
        let mut providers: HashMap<&'static str, Arc<dyn AssistantProvider>> = HashMap::new();

        providers.insert(
            ProviderKind::Mock.as_str(),
            Arc::new(LoggingProvider::new(Arc::new(MockProvider::new(
                config.mock_latency,
            )))),
        );

        let openai = OpenAiProvider::new(
            config.openai_base_url.as_deref(),
            tokens,
            config.openai_api_key.clone(),
        )?;
        providers.insert(
            ProviderKind::OpenAi.as_str(),
            Arc::new(LoggingProvider::new(Arc::new(openai))),
        );

        Ok(Self {
            providers,
            default_provider: config.provider,
            default_model: config.model.clone(),
        })
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn AssistantProvider>> {
        self.providers.get(kind.as_str()).cloned()
    }

    /// The provider selected by configuration
    pub fn default_provider(&self) -> Option<Arc<dyn AssistantProvider>> {
        self.get(self.default_provider)
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn available(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.providers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
