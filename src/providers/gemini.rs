use super::{
    ProviderOutput, api_error, build_provider_client, sanitize_api_error,
    traits::GenerationProvider,
};
use crate::generation::types::{ContentKind, GenerationOptions, TokenUsage};
use anyhow::Context;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 8192;

pub struct GeminiProvider {
    api_key: Option<String>,
    base_url: String,
    default_model: String,
    client: Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    usage_metadata: Option<UsageMetadata>,
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

impl GeminiProvider {
    pub fn new(api_key: Option<&str>) -> Self {
        Self::with_base_url(api_key, None)
    }

    pub fn with_base_url(api_key: Option<&str>, base_url: Option<&str>) -> Self {
        Self {
            api_key: api_key
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from),
            base_url: base_url
                .map_or(DEFAULT_BASE_URL, |u| u.trim_end_matches('/'))
                .to_string(),
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

    fn model_name(model: &str) -> String {
        if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        }
    }

    fn build_request(payload: &str, options: &GenerationOptions) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part {
                    text: payload.to_string(),
                }],
            }],
            system_instruction: options.system_prompt.as_ref().map(|sys| Content {
                role: None,
                parts: vec![Part { text: sys.clone() }],
            }),
            generation_config: GenerationConfig {
                temperature: options.temperature,
                max_output_tokens: options.max_tokens.unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS),
            },
        }
    }

    fn extract_text(response: &GenerateContentResponse) -> anyhow::Result<String> {
        let text = response
            .candidates
            .as_ref()
            .and_then(|c| c.first())
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();

        if text.is_empty() {
            anyhow::bail!("No response from Gemini");
        }

        Ok(text)
    }
}

impl GenerationProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn kind(&self) -> ContentKind {
        ContentKind::Text
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }

    fn generate<'a>(
        &'a self,
        payload: &'a str,
        options: &'a GenerationOptions,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ProviderOutput>> + Send + 'a>> {
        Box::pin(async move {
            let api_key = self.api_key.as_ref().ok_or_else(|| {
                anyhow::anyhow!("Gemini API key not set. Set GEMINI_API_KEY or GOOGLE_API_KEY.")
            })?;

            let model_name = Self::model_name(self.model_for(options));
            let url = format!("{}/v1beta/{model_name}:generateContent", self.base_url);
            let request = Self::build_request(payload, options);

            let response = self
                .client
                .post(&url)
                .query(&[("key", api_key.as_str())])
                .json(&request)
                .send()
                .await
                .map_err(|e| {
                    // reqwest errors echo the URL, which carries the key.
                    anyhow::anyhow!(
                        "Gemini request failed: {}",
                        sanitize_api_error(&e.to_string())
                    )
                })?;

            if !response.status().is_success() {
                return Err(api_error("Gemini", response).await);
            }

            let result: GenerateContentResponse = response
                .json()
                .await
                .context("Failed to decode Gemini response")?;
            let text = Self::extract_text(&result)?;
            let usage = result.usage_metadata.as_ref().map(|u| TokenUsage {
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count,
            });

            Ok(ProviderOutput::text(text)
                .with_model(result.model_version)
                .with_usage(usage))
        })
    }
}
