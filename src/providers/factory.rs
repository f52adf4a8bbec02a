use super::anthropic::AnthropicProvider;
use super::gemini::GeminiProvider;
use super::ollama::OllamaProvider;
use super::openai::OpenAiProvider;
use super::openai_image::OpenAiImageProvider;
use super::stability::StabilityProvider;
use super::traits::GenerationProvider;
use super::build_provider_client_with_timeout;
use crate::config::ProvidersConfig;
use crate::error::ValidationError;
use std::collections::HashMap;
use std::sync::Arc;

/// Provider ids this crate ships adapters for.
pub const BUILTIN_PROVIDERS: [&str; 6] = [
    "openai",
    "anthropic",
    "gemini",
    "ollama",
    "openai-image",
    "stability",
];

/// Map aliases to canonical provider ids.
pub fn canonical_provider_id(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    match lower.as_str() {
        "google" | "google-gemini" => "gemini".into(),
        "claude" => "anthropic".into(),
        "dall-e" | "dalle" | "openai-images" => "openai-image".into(),
        "stability-ai" | "stabilityai" => "stability".into(),
        _ => lower,
    }
}

pub(crate) fn resolve_api_key(name: &str, explicit_api_key: Option<&str>) -> Option<String> {
    if let Some(key) = explicit_api_key.map(str::trim).filter(|k| !k.is_empty()) {
        return Some(key.to_string());
    }

    let provider_env_candidates: &[&str] = match name {
        "anthropic" => &["ANTHROPIC_OAUTH_TOKEN", "ANTHROPIC_API_KEY"],
        "openai" | "openai-image" => &["OPENAI_API_KEY"],
        "gemini" => &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
        "stability" => &["STABILITY_API_KEY"],
        _ => &[],
    };

    provider_env_candidates.iter().find_map(|env_var| {
        std::env::var(env_var)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

/// Build one adapter. Credentials are resolved here, once.
pub fn create_provider(
    name: &str,
    config: &ProvidersConfig,
) -> anyhow::Result<Arc<dyn GenerationProvider>> {
    let id = canonical_provider_id(name);
    let explicit_key = config.api_keys.get(&id).map(String::as_str);
    let resolved_key = resolve_api_key(&id, explicit_key);
    let api_key = resolved_key.as_deref();
    let base_url = config.base_urls.get(&id).map(String::as_str);
    let model = config.default_models.get(&id).map(String::as_str);
    let client = build_provider_client_with_timeout(config.timeout_secs);

    let provider: Arc<dyn GenerationProvider> = match id.as_str() {
        "openai" => Arc::new(
            OpenAiProvider::with_base_url(api_key, base_url)
                .with_default_model(model)
                .with_client(client),
        ),
        "anthropic" => Arc::new(
            AnthropicProvider::with_base_url(api_key, base_url)
                .with_default_model(model)
                .with_client(client),
        ),
        "gemini" => Arc::new(
            GeminiProvider::with_base_url(api_key, base_url)
                .with_default_model(model)
                .with_client(client),
        ),
        "ollama" => {
            let url = base_url.or(config.ollama_url.as_deref());
            Arc::new(OllamaProvider::new(url).with_default_model(model))
        }
        "openai-image" => Arc::new(
            OpenAiImageProvider::with_base_url(api_key, base_url)
                .with_default_model(model)
                .with_client(client),
        ),
        "stability" => Arc::new(
            StabilityProvider::with_base_url(api_key, base_url)
                .with_default_model(model)
                .with_client(client),
        ),
        _ => anyhow::bail!("Unknown provider: {name}"),
    };
    Ok(provider)
}

/// Provider lookup by id, in registration order.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn GenerationProvider>>,
    order: Vec<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every built-in adapter with settings from `config`.
    pub fn from_config(config: &ProvidersConfig) -> anyhow::Result<Self> {
        let mut registry = Self::new();
        for name in BUILTIN_PROVIDERS {
            registry.register(create_provider(name, config)?);
        }
        Ok(registry)
    }

    /// Add or replace a provider under its own name.
    pub fn register(&mut self, provider: Arc<dyn GenerationProvider>) {
        let id = canonical_provider_id(provider.name());
        if self.providers.insert(id.clone(), provider).is_none() {
            self.order.push(id);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn GenerationProvider>> {
        self.providers.get(&canonical_provider_id(name)).cloned()
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Look up `order` in sequence. Unknown ids fail the whole request.
    pub fn resolve(
        &self,
        order: &[String],
    ) -> Result<Vec<Arc<dyn GenerationProvider>>, ValidationError> {
        if order.is_empty() {
            return Err(ValidationError::EmptyProviderList);
        }
        order
            .iter()
            .map(|name| {
                self.get(name)
                    .ok_or_else(|| ValidationError::UnknownProvider(name.clone()))
            })
            .collect()
    }
}
