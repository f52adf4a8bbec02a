use super::{ProviderOutput, api_error, build_provider_client, traits::GenerationProvider};
use crate::generation::types::{ContentKind, GeneratedContent, GenerationOptions, ImageData};
use crate::media::resolve_image_mime;
use anyhow::Context;
use reqwest::Client;
use reqwest::multipart::Form;
use std::future::Future;
use std::pin::Pin;

const DEFAULT_BASE_URL: &str = "https://api.stability.ai";
const DEFAULT_MODEL: &str = "core";

/// Stability AI stable-image API. Returns raw image bytes.
pub struct StabilityProvider {
    cached_auth_header: Option<String>,
    base_url: String,
    default_model: String,
    client: Client,
}

impl StabilityProvider {
    pub fn new(api_key: Option<&str>) -> Self {
        Self::with_base_url(api_key, None)
    }

    pub fn with_base_url(api_key: Option<&str>, base_url: Option<&str>) -> Self {
        Self {
            cached_auth_header: api_key
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(|k| format!("Bearer {k}")),
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

    /// `core` and `ultra` have their own endpoints; SD3 variants share one.
    fn endpoint(&self, model: &str) -> String {
        let route = match model {
            "core" | "ultra" => model,
            _ => "sd3",
        };
        format!("{}/v2beta/stable-image/generate/{route}", self.base_url)
    }

    fn aspect_ratio(size: Option<&str>) -> Option<&'static str> {
        match size? {
            "1024x1024" | "512x512" | "square" => Some("1:1"),
            "1792x1024" | "landscape" => Some("16:9"),
            "1024x1792" | "portrait" => Some("9:16"),
            _ => None,
        }
    }

    fn build_form(payload: &str, model: &str, options: &GenerationOptions) -> Form {
        let mut form = Form::new()
            .text("prompt", payload.to_string())
            .text("output_format", "png");
        if model.starts_with("sd3") {
            form = form.text("model", model.to_string());
        }
        if let Some(ratio) = Self::aspect_ratio(options.image_size.as_deref()) {
            form = form.text("aspect_ratio", ratio);
        }
        form
    }
}

impl GenerationProvider for StabilityProvider {
    fn name(&self) -> &str {
        "stability"
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
            let auth_header = self.cached_auth_header.as_ref().ok_or_else(|| {
                anyhow::anyhow!("Stability API key not set. Set STABILITY_API_KEY.")
            })?;
            let model = self.model_for(options);

            let response = self
                .client
                .post(self.endpoint(model))
                .header("Authorization", auth_header)
                .header("Accept", "image/*")
                .multipart(Self::build_form(payload, model, options))
                .send()
                .await
                .context("Stability request failed")?;

            if !response.status().is_success() {
                return Err(api_error("Stability", response).await);
            }

            let declared = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let bytes = response
                .bytes()
                .await
                .context("Failed to read Stability image body")?
                .to_vec();
            let mime = resolve_image_mime(&declared, &bytes).unwrap_or_else(|| "image/png".into());

            Ok(ProviderOutput {
                content: GeneratedContent::Images(vec![ImageData::new(mime, bytes)]),
                model: Some(model.to_string()),
                usage: None,
            })
        })
    }
}
