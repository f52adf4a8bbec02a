use crate::generation::types::{ContentKind, GeneratedContent, GenerationOptions, TokenUsage};
use std::future::Future;
use std::pin::Pin;

/// What a provider call produced, before the acceptance gate sees it.
#[derive(Debug, Clone)]
pub struct ProviderOutput {
    pub content: GeneratedContent,
    /// Model reported by the upstream API, when it names one.
    pub model: Option<String>,
    pub usage: Option<TokenUsage>,
}

impl ProviderOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: GeneratedContent::Text(text.into()),
            model: None,
            usage: None,
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    #[must_use]
    pub fn with_usage(mut self, usage: Option<TokenUsage>) -> Self {
        self.usage = usage;
        self
    }
}

/// A backend that turns a payload into text or images.
///
/// Adapters report failures as `anyhow` errors with sanitized messages; the
/// cascade decides whether to retry, move on, or fall back.
pub trait GenerationProvider: Send + Sync {
    /// Provider identifier (e.g. "openai", "stability").
    fn name(&self) -> &str;

    fn kind(&self) -> ContentKind;

    fn default_model(&self) -> &str;

    /// Whether credentials were resolved. Providers without them are skipped.
    fn has_credentials(&self) -> bool {
        true
    }

    /// Model used for a call with `options`. Only an override addressed to
    /// this provider applies.
    fn model_for<'a>(&'a self, options: &'a GenerationOptions) -> &'a str {
        options
            .model_override(self.name())
            .unwrap_or_else(|| self.default_model())
    }

    fn generate<'a>(
        &'a self,
        payload: &'a str,
        options: &'a GenerationOptions,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ProviderOutput>> + Send + 'a>>;
}
