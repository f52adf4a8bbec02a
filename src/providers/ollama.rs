use super::{
    ProviderOutput, api_error, build_provider_client_with_timeout, traits::GenerationProvider,
};
use crate::generation::types::{ContentKind, GenerationOptions, TokenUsage};
use anyhow::Context;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

const DEFAULT_MODEL: &str = "llama3.2";

/// Local Ollama server. Needs no credentials.
pub struct OllamaProvider {
    base_url: String,
    default_model: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<Options>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct Options {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

impl OllamaProvider {
    pub fn new(base_url: Option<&str>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or("http://localhost:11434")
                .trim_end_matches('/')
                .to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            // Local models can be slow on first load.
            client: build_provider_client_with_timeout(300),
        }
    }

    #[must_use]
    pub fn with_default_model(mut self, model: Option<&str>) -> Self {
        if let Some(model) = model.map(str::trim).filter(|m| !m.is_empty()) {
            self.default_model = model.to_string();
        }
        self
    }

    fn build_request(payload: &str, model: &str, options: &GenerationOptions) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(sys) = options.system_prompt.as_deref() {
            messages.push(Message {
                role: "system",
                content: sys.to_string(),
            });
        }
        messages.push(Message {
            role: "user",
            content: payload.to_string(),
        });

        let tuning = (options.temperature.is_some() || options.max_tokens.is_some()).then(|| {
            Options {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            }
        });

        ChatRequest {
            model: model.to_string(),
            messages,
            stream: false,
            options: tuning,
        }
    }
}

impl GenerationProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn kind(&self) -> ContentKind {
        ContentKind::Text
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn generate<'a>(
        &'a self,
        payload: &'a str,
        options: &'a GenerationOptions,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ProviderOutput>> + Send + 'a>> {
        Box::pin(async move {
            let request = Self::build_request(payload, self.model_for(options), options);
            let url = format!("{}/api/chat", self.base_url);

            let response = self
                .client
                .post(&url)
                .json(&request)
                .send()
                .await
                .with_context(|| format!("Ollama request to {url} failed. Is Ollama running?"))?;

            if !response.status().is_success() {
                let err = api_error("Ollama", response).await;
                anyhow::bail!("{err}. Is Ollama running? (ollama serve)");
            }

            let chat_response: ChatResponse = response
                .json()
                .await
                .context("Failed to decode Ollama response")?;
            let usage = match (chat_response.prompt_eval_count, chat_response.eval_count) {
                (Some(input_tokens), Some(output_tokens)) => Some(TokenUsage {
                    input_tokens,
                    output_tokens,
                }),
                _ => None,
            };

            Ok(ProviderOutput::text(chat_response.message.content)
                .with_model(chat_response.model)
                .with_usage(usage))
        })
    }
}
