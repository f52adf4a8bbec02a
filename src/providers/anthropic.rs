use super::{ProviderOutput, api_error, build_provider_client, traits::GenerationProvider};
use crate::generation::types::{ContentKind, GenerationOptions, TokenUsage};
use anyhow::Context;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    /// Pre-computed auth: `("Authorization", "Bearer <token>")` or `("x-api-key", "<key>")`.
    cached_auth: Option<(&'static str, String)>,
    cached_messages_url: String,
    default_model: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    content: Vec<ResponseContentBlock>,
    model: Option<String>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ResponseContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

impl AnthropicProvider {
    pub fn new(api_key: Option<&str>) -> Self {
        Self::with_base_url(api_key, None)
    }

    pub fn with_base_url(api_key: Option<&str>, base_url: Option<&str>) -> Self {
        let base = base_url
            .map_or("https://api.anthropic.com", |u| u.trim_end_matches('/'))
            .to_string();
        let cached_auth = api_key.map(str::trim).filter(|k| !k.is_empty()).map(|k| {
            if Self::is_setup_token(k) {
                ("Authorization", format!("Bearer {k}"))
            } else {
                ("x-api-key", k.to_string())
            }
        });
        Self {
            cached_auth,
            cached_messages_url: format!("{base}/v1/messages"),
            default_model: DEFAULT_MODEL.to_string(),
            client: build_provider_client(),
        }
    }

    #[must_use]
    pub fn with_default_model(mut self, model: Option<&str>) -> Self {
        if let Some(model) = model.map(str::trim).filter(|m| !m.is_empty()) {
            self.default_model = model.to_string();
        }
        self
    }

    #[must_use]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    fn is_setup_token(token: &str) -> bool {
        token.starts_with("sk-ant-oat01-")
    }

    fn build_request(payload: &str, model: &str, options: &GenerationOptions) -> ChatRequest {
        ChatRequest {
            model: model.to_string(),
            max_tokens: options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: options.system_prompt.clone(),
            messages: vec![Message {
                role: "user",
                content: payload.to_string(),
            }],
            temperature: options.temperature,
        }
    }

    fn extract_text(response: &ChatResponse) -> Option<String> {
        let text: Vec<&str> = response
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect();
        if text.is_empty() {
            None
        } else {
            Some(text.join(""))
        }
    }

    async fn call_api(&self, request: &ChatRequest) -> anyhow::Result<ChatResponse> {
        let (auth_name, auth_value) = self.cached_auth.as_ref().ok_or_else(|| {
            anyhow::anyhow!("Anthropic credentials not set. Set ANTHROPIC_API_KEY.")
        })?;

        let response = self
            .client
            .post(&self.cached_messages_url)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .header(*auth_name, auth_value)
            .json(request)
            .send()
            .await
            .context("Anthropic request failed")?;

        if !response.status().is_success() {
            return Err(api_error("Anthropic", response).await);
        }

        response
            .json()
            .await
            .context("Failed to decode Anthropic response")
    }
}

impl GenerationProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn kind(&self) -> ContentKind {
        ContentKind::Text
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn has_credentials(&self) -> bool {
        self.cached_auth.is_some()
    }

    fn generate<'a>(
        &'a self,
        payload: &'a str,
        options: &'a GenerationOptions,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ProviderOutput>> + Send + 'a>> {
        Box::pin(async move {
            let request = Self::build_request(payload, self.model_for(options), options);
            let response = self.call_api(&request).await?;
            let text = Self::extract_text(&response)
                .ok_or_else(|| anyhow::anyhow!("No response from Anthropic"))?;
            let usage = response.usage.as_ref().map(|u| TokenUsage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            });
            Ok(ProviderOutput::text(text)
                .with_model(response.model)
                .with_usage(usage))
        })
    }
}
