use crate::error::ValidationError;
use crate::providers::canonical_provider_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ContentKind {
    Text,
    Image,
}

/// Names what is being generated. Unit of idempotence and of the canonical
/// latest artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetIdentity {
    pub subject_id: String,
    pub locale: String,
    pub variant: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<String>,
}

impl TargetIdentity {
    pub fn new(
        subject_id: impl Into<String>,
        locale: impl Into<String>,
        variant: impl Into<String>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            locale: locale.into(),
            variant: variant.into(),
            slot: None,
        }
    }

    #[must_use]
    pub fn with_slot(mut self, slot: impl Into<String>) -> Self {
        self.slot = Some(slot.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.subject_id.trim().is_empty() {
            return Err(ValidationError::MissingIdentityField("subject_id"));
        }
        if self.locale.trim().is_empty() {
            return Err(ValidationError::MissingIdentityField("locale"));
        }
        if self.variant.trim().is_empty() {
            return Err(ValidationError::MissingIdentityField("variant"));
        }
        Ok(())
    }
}

impl fmt::Display for TargetIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.subject_id, self.locale, self.variant)?;
        if let Some(slot) = &self.slot {
            write!(f, "#{slot}")?;
        }
        Ok(())
    }
}

/// Positional hint for image composition (e.g. where a label should sit).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub label: String,
    pub x: f64,
    pub y: f64,
}

impl Anchor {
    pub fn new(label: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            label: label.into(),
            x,
            y,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model overrides keyed by provider id. Providers not listed use their
    /// default model.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub models: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_count: Option<u32>,
    /// Display title, also used by the fallback generator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub anchors: Vec<Anchor>,
    /// Provider-specific knobs that change the output.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
    /// Skip the cache check. Never part of the idempotency key.
    #[serde(default)]
    pub force_regenerate: bool,
    /// Caller correlation id. Never part of the idempotency key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl GenerationOptions {
    /// Non-empty model override for `provider`, if one was given.
    pub fn model_override(&self, provider: &str) -> Option<&str> {
        let provider = canonical_provider_id(provider);
        self.models
            .iter()
            .find(|(id, _)| canonical_provider_id(id) == provider)
            .map(|(_, model)| model.trim())
            .filter(|model| !model.is_empty())
    }

    #[must_use]
    pub fn with_model(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.models.insert(provider.into(), model.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub kind: ContentKind,
    pub target: TargetIdentity,
    pub provider_order: Vec<String>,
    /// Prompt or source content.
    pub payload: String,
    pub options: GenerationOptions,
}

impl GenerationRequest {
    pub fn new(kind: ContentKind, target: TargetIdentity, payload: impl Into<String>) -> Self {
        Self {
            kind,
            target,
            provider_order: Vec::new(),
            payload: payload.into(),
            options: GenerationOptions::default(),
        }
    }

    pub fn text(target: TargetIdentity, payload: impl Into<String>) -> Self {
        Self::new(ContentKind::Text, target, payload)
    }

    pub fn image(target: TargetIdentity, payload: impl Into<String>) -> Self {
        Self::new(ContentKind::Image, target, payload)
    }

    #[must_use]
    pub fn with_providers<I, S>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.provider_order = providers.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    /// Identity and payload checks. The provider list is checked where it is
    /// resolved, since callers may defer to configured defaults.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.target.validate()?;
        if self.payload.trim().is_empty() {
            return Err(ValidationError::EmptyPayload);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ImageData {
    pub fn new(mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedContent {
    Text(String),
    Images(Vec<ImageData>),
}

impl GeneratedContent {
    pub fn kind(&self) -> ContentKind {
        match self {
            Self::Text(_) => ContentKind::Text,
            Self::Images(_) => ContentKind::Image,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Images(_) => None,
        }
    }

    pub fn images(&self) -> &[ImageData] {
        match self {
            Self::Text(_) => &[],
            Self::Images(images) => images,
        }
    }

    /// MIME type of the primary body.
    pub fn primary_mime(&self) -> &str {
        match self {
            Self::Text(_) => "text/markdown",
            Self::Images(images) => images
                .first()
                .map_or("application/octet-stream", |img| img.mime_type.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    RejectedByGate,
    ProviderError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationAttempt {
    pub provider_id: String,
    pub model: String,
    /// 1-based attempt number for this provider.
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

/// Append-only attempt trail. Entries cannot be edited once recorded.
#[derive(Debug, Clone, Default)]
pub struct AttemptLog {
    entries: Vec<GenerationAttempt>,
}

impl AttemptLog {
    pub fn record(&mut self, attempt: GenerationAttempt) {
        self.entries.push(attempt);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[GenerationAttempt] {
        &self.entries
    }

    pub fn into_vec(self) -> Vec<GenerationAttempt> {
        self.entries
    }
}

/// Where an artifact came from. Serialized as the provider id, `fallback`
/// or `manual`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum SourceTag {
    Provider(String),
    Fallback,
    Manual,
}

impl SourceTag {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Provider(name) => name,
            Self::Fallback => "fallback",
            Self::Manual => "manual",
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback)
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for SourceTag {
    fn from(value: String) -> Self {
        match value.as_str() {
            "fallback" => Self::Fallback,
            "manual" => Self::Manual,
            _ => Self::Provider(value),
        }
    }
}

impl From<&str> for SourceTag {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<SourceTag> for String {
    fn from(tag: SourceTag) -> Self {
        match tag {
            SourceTag::Provider(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ContentKind,
    pub target: TargetIdentity,
    pub checksum: String,
    /// Blob location; `None` until the artifact has been persisted.
    pub storage_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub metadata: Value,
    pub source_tag: SourceTag,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn is_fallback(&self) -> bool {
        self.source_tag.is_fallback()
    }
}

#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub success: bool,
    pub artifact: Option<Artifact>,
    /// Generated body. `None` on a cache hit; read it back via the blob store.
    pub content: Option<GeneratedContent>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub attempts: Vec<GenerationAttempt>,
    pub checksum: String,
    pub used_fallback: bool,
    pub cache_hit: bool,
    /// Providers passed over because no credentials were configured.
    pub skipped_providers: Vec<String>,
}

impl GenerationResult {
    pub fn source_tag(&self) -> Option<&SourceTag> {
        self.artifact.as_ref().map(|artifact| &artifact.source_tag)
    }

    pub fn attempt_outcomes(&self) -> Vec<(&str, AttemptOutcome)> {
        self.attempts
            .iter()
            .map(|attempt| (attempt.provider_id.as_str(), attempt.outcome))
            .collect()
    }
}
