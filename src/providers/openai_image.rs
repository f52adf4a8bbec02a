use super::{ProviderOutput, api_error, build_provider_client, traits::GenerationProvider};
use crate::generation::types::{ContentKind, GeneratedContent, GenerationOptions, ImageData};
use anyhow::Context;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "dall-e-3";
const DEFAULT_SIZE: &str = "1024x1024";

/// OpenAI Images API (`/v1/images/generations`), base64 response format.
pub struct OpenAiImageProvider {
    cached_auth_header: Option<String>,
    cached_generations_url: String,
    default_model: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ImageRequest {
    model: String,
    prompt: String,
    n: u32,
    size: String,
    response_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    b64_json: Option<String>,
}

impl OpenAiImageProvider {
    pub fn new(api_key: Option<&str>) -> Self {
        Self::with_base_url(api_key, None)
    }

    pub fn with_base_url(api_key: Option<&str>, base_url: Option<&str>) -> Self {
        let base = base_url
            .map_or(DEFAULT_BASE_URL, |u| u.trim_end_matches('/'))
            .to_string();
        Self {
            cached_auth_header: api_key
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(|k| format!("Bearer {k}")),
            cached_generations_url: format!("{base}/v1/images/generations"),
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

    fn build_request(payload: &str, model: &str, options: &GenerationOptions) -> ImageRequest {
        ImageRequest {
            model: model.to_string(),
            prompt: payload.to_string(),
            n: options.image_count.unwrap_or(1).max(1),
            size: options
                .image_size
                .clone()
                .unwrap_or_else(|| DEFAULT_SIZE.to_string()),
            response_format: "b64_json",
        }
    }

    fn decode_images(response: ImageResponse) -> anyhow::Result<Vec<ImageData>> {
        let engine = base64::engine::general_purpose::STANDARD;
        response
            .data
            .into_iter()
            .filter_map(|datum| datum.b64_json)
            .map(|encoded| {
                let bytes = engine
                    .decode(encoded.trim())
                    .context("OpenAI image payload is not valid base64")?;
                Ok(ImageData::new("image/png", bytes))
            })
            .collect()
    }
}

impl GenerationProvider for OpenAiImageProvider {
    fn name(&self) -> &str {
        "openai-image"
    }

    fn kind(&self) -> ContentKind {
        ContentKind::Image
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn has_credentials(&self) -> bool {
        self.cached_auth_header.is_some()
    }

    fn generate<'a>(
        &'a self,
        payload: &'a str,
        options: &'a GenerationOptions,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ProviderOutput>> + Send + 'a>> {
        Box::pin(async move {
            let auth_header = self
                .cached_auth_header
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("OpenAI API key not set. Set OPENAI_API_KEY."))?;
            let model = self.model_for(options);
            let request = Self::build_request(payload, model, options);

            let response = self
                .client
                .post(&self.cached_generations_url)
                .header("Authorization", auth_header)
                .json(&request)
                .send()
                .await
                .context("OpenAI image request failed")?;

            if !response.status().is_success() {
                return Err(api_error("OpenAI Images", response).await);
            }

            let body: ImageResponse = response
                .json()
                .await
                .context("Failed to decode OpenAI image response")?;
            let images = Self::decode_images(body)?;

            Ok(ProviderOutput {
                content: GeneratedContent::Images(images),
                model: Some(model.to_string()),
                usage: None,
            })
        })
    }
}
