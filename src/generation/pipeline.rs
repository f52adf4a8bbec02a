//! Caller-facing generation: idempotency check, cascade, persistence.
//!
//! Each request walks one explicit state machine:
//!
//! ```text
//! Requested -> KeyComputed -> CacheHit -> Done
//!                          -> CacheMiss -> Cascading -> Accepted -> Persisting
//!                                                   -> Exhausted -> Fallback -> Persisting
//! Persisting -> Done
//!            -> PersistenceFailed
//! ```

use super::cascade::{CascadeOrchestrator, RetryPolicy};
use super::fallback::FallbackGenerator;
use super::gate::{ContentGate, GatePolicy};
use super::idempotency::{compute_key, conflict_key, content_digest, normalize_text};
use super::types::{
    Artifact, ContentKind, GeneratedContent, GenerationRequest, GenerationResult, ImageData,
    SourceTag,
};
use crate::config::Config;
use crate::error::{ForgeError, PersistenceError, PersistenceErrorKind};
use crate::media::{ImageCompressor, PassthroughCompressor, detect_mime, extension_from_mime};
use crate::providers::ProviderRegistry;
use crate::storage::{ArtifactRow, BlobStore, RecordStore, SchemaAdaptiveWriter, may_replace};
use anyhow::Context;
use serde_json::Value;
use std::sync::Arc;

const PROMPT_EXCERPT_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Requested,
    KeyComputed,
    CacheHit,
    CacheMiss,
    Cascading,
    Accepted,
    Exhausted,
    Fallback,
    Persisting,
    Done,
    PersistenceFailed,
}

impl PipelineState {
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Requested, Self::KeyComputed)
                | (Self::KeyComputed, Self::CacheHit | Self::CacheMiss)
                | (Self::CacheHit, Self::Done)
                | (Self::CacheMiss, Self::Cascading)
                | (Self::Cascading, Self::Accepted | Self::Exhausted)
                | (Self::Exhausted, Self::Fallback)
                | (Self::Accepted | Self::Fallback, Self::Persisting)
                | (Self::Persisting, Self::Done | Self::PersistenceFailed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::PersistenceFailed)
    }
}

/// Per-request state with logged transitions.
struct StateTracker<'a> {
    state: PipelineState,
    conflict_key: &'a str,
}

impl<'a> StateTracker<'a> {
    fn new(conflict_key: &'a str) -> Self {
        Self {
            state: PipelineState::Requested,
            conflict_key,
        }
    }

    fn advance(&mut self, next: PipelineState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal pipeline transition {} -> {next}",
            self.state
        );
        tracing::debug!(
            conflict_key = self.conflict_key,
            from = %self.state,
            state = %next,
            "Pipeline state transition"
        );
        self.state = next;
    }
}

pub struct GenerationPipeline {
    registry: ProviderRegistry,
    orchestrator: CascadeOrchestrator,
    writer: SchemaAdaptiveWriter,
    blobs: Arc<dyn BlobStore>,
    compressor: Arc<dyn ImageCompressor>,
    text_order: Vec<String>,
    image_order: Vec<String>,
    max_image_bytes: usize,
    regenerate_fallback: bool,
}

impl GenerationPipeline {
    pub fn from_config(
        config: &Config,
        registry: ProviderRegistry,
        records: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> anyhow::Result<Self> {
        let orchestrator = CascadeOrchestrator::new(
            ContentGate::new(GatePolicy::from(&config.gate)),
            RetryPolicy::from(&config.reliability),
            FallbackGenerator::new().context("Failed to prepare fallback templates")?,
        );

        Ok(Self {
            registry,
            orchestrator,
            writer: SchemaAdaptiveWriter::new(records, config.storage.max_shed_iterations),
            blobs,
            compressor: Arc::new(PassthroughCompressor),
            text_order: config.providers.text_order.clone(),
            image_order: config.providers.image_order.clone(),
            max_image_bytes: config.media.max_image_bytes,
            regenerate_fallback: config.pipeline.regenerate_fallback,
        })
    }

    #[must_use]
    pub fn with_compressor(mut self, compressor: Arc<dyn ImageCompressor>) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        self.writer.store()
    }

    /// Configured cascade order for `kind`.
    pub fn default_order(&self, kind: ContentKind) -> &[String] {
        match kind {
            ContentKind::Text => &self.text_order,
            ContentKind::Image => &self.image_order,
        }
    }

    /// Generate (or reuse) the canonical artifact for `request`.
    ///
    /// Only validation failures and persistence failures are errors. A
    /// persistence failure still carries the generated result.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResult, ForgeError> {
        request.validate()?;
        let order = if request.provider_order.is_empty() {
            self.default_order(request.kind)
        } else {
            request.provider_order.as_slice()
        };
        let providers = self.registry.resolve(order)?;
        CascadeOrchestrator::check_contract(&providers, request)?;

        let conflict = conflict_key(request.kind, &request.target);
        let mut tracker = StateTracker::new(&conflict);
        let checksum = compute_key(request);
        tracker.advance(PipelineState::KeyComputed);

        if let Some(artifact) = self.cached_artifact(request, &conflict, &checksum).await {
            tracker.advance(PipelineState::CacheHit);
            tracing::info!(
                target_id = %request.target,
                checksum = checksum.as_str(),
                source = %artifact.source_tag,
                "Reusing stored artifact, no provider called"
            );
            tracker.advance(PipelineState::Done);
            return Ok(cache_hit_result(artifact, checksum));
        }
        tracker.advance(PipelineState::CacheMiss);

        tracker.advance(PipelineState::Cascading);
        let mut result = self.orchestrator.run(&providers, request).await?;
        if result.used_fallback {
            tracker.advance(PipelineState::Exhausted);
            tracker.advance(PipelineState::Fallback);
        } else {
            tracker.advance(PipelineState::Accepted);
        }

        tracker.advance(PipelineState::Persisting);
        match self.persist(request, &conflict, &mut result).await {
            Ok(()) => {
                tracker.advance(PipelineState::Done);
                Ok(result)
            }
            Err(source) => {
                tracker.advance(PipelineState::PersistenceFailed);
                tracing::error!(
                    conflict_key = conflict.as_str(),
                    kind = %source.kind,
                    error = source.message.as_str(),
                    "Artifact generated but not stored"
                );
                Err(ForgeError::PersistenceFailed {
                    source,
                    result: Box::new(result),
                })
            }
        }
    }

    /// Stored artifact whose checksum matches, unless regeneration is forced.
    async fn cached_artifact(
        &self,
        request: &GenerationRequest,
        conflict: &str,
        checksum: &str,
    ) -> Option<Artifact> {
        if request.options.force_regenerate {
            tracing::debug!(conflict_key = conflict, "Forced regeneration, skipping cache");
            return None;
        }

        let record = match self.records().find_latest(conflict).await {
            Ok(record) => record?,
            Err(e) => {
                tracing::warn!(
                    conflict_key = conflict,
                    error = %e,
                    "Cache lookup failed, regenerating"
                );
                return None;
            }
        };
        if record.checksum() != Some(checksum) {
            return None;
        }
        if record.is_fallback() && self.regenerate_fallback {
            tracing::info!(conflict_key = conflict, "Stored artifact is a fallback, regenerating");
            return None;
        }

        match record.to_artifact() {
            Ok(artifact) => Some(artifact),
            Err(e) => {
                tracing::warn!(
                    conflict_key = conflict,
                    error = %e,
                    "Stored record unreadable, regenerating"
                );
                None
            }
        }
    }

    async fn persist(
        &self,
        request: &GenerationRequest,
        conflict: &str,
        result: &mut GenerationResult,
    ) -> Result<(), PersistenceError> {
        let (Some(content), Some(artifact)) = (result.content.as_ref(), result.artifact.as_ref())
        else {
            return Err(PersistenceError::new(
                PersistenceErrorKind::Backend,
                "cascade returned no artifact to persist",
            ));
        };

        if artifact.is_fallback()
            && let Some(kept) = self.kept_over_fallback(artifact, conflict).await
        {
            adopt_kept_artifact(result, kept);
            return Ok(());
        }

        let stored = self.store_bodies(content).await?;
        let Some(primary) = stored.first() else {
            return Err(PersistenceError::new(
                PersistenceErrorKind::Blob,
                "generated content has no body",
            ));
        };

        let mut artifact = artifact.clone();
        artifact.storage_location = Some(primary.location.clone());
        artifact.mime_type = Some(primary.mime_type.clone());
        if stored.len() > 1
            && let Value::Object(metadata) = &mut artifact.metadata
        {
            let extra: Vec<&str> = stored[1..].iter().map(|b| b.location.as_str()).collect();
            metadata.insert("additional_locations".into(), Value::from(extra));
        }

        let mut row = ArtifactRow::from_artifact(&artifact, conflict);
        row.set("content_sha256", primary.digest.as_str())
            .set("byte_size", primary.byte_size)
            .set("attempt_count", result.attempts.len())
            .set("prompt_excerpt", prompt_excerpt(&request.payload));
        if !request.options.anchors.is_empty() {
            match serde_json::to_string(&request.options.anchors) {
                Ok(anchors) => {
                    row.set("anchors", anchors);
                }
                Err(e) => {
                    tracing::warn!(
                        conflict_key = conflict,
                        error = %e,
                        "Anchors not serializable, storing without them"
                    );
                }
            }
        }

        let outcome = self.writer.write_detailed(row, conflict).await?;
        if outcome.artifact.source_tag == artifact.source_tag {
            result.artifact = Some(outcome.artifact);
        } else {
            adopt_kept_artifact(result, outcome.artifact);
        }
        Ok(())
    }

    /// Stored non-fallback artifact a fallback must not replace, if any.
    async fn kept_over_fallback(&self, fallback: &Artifact, conflict: &str) -> Option<Artifact> {
        let existing = match self.records().find_latest(conflict).await {
            Ok(existing) => existing?,
            Err(e) => {
                tracing::warn!(
                    conflict_key = conflict,
                    error = %e,
                    "Existing record lookup failed"
                );
                return None;
            }
        };
        if may_replace(&existing, &ArtifactRow::from_artifact(fallback, conflict)) {
            return None;
        }
        existing.to_artifact().ok()
    }

    /// Write every body to blob storage, images through the compressor.
    async fn store_bodies(
        &self,
        content: &GeneratedContent,
    ) -> Result<Vec<StoredBody>, PersistenceError> {
        let mut stored = Vec::new();
        match content {
            GeneratedContent::Text(text) => {
                let body = self
                    .put_body(ContentKind::Text, "text/markdown", text.as_bytes())
                    .await?;
                stored.push(body);
            }
            GeneratedContent::Images(images) => {
                for image in images {
                    let bytes = self.compress(image).await;
                    stored.push(self.put_body(ContentKind::Image, &image.mime_type, &bytes).await?);
                }
            }
        }
        Ok(stored)
    }

    async fn compress(&self, image: &ImageData) -> Vec<u8> {
        match self
            .compressor
            .compress(&image.bytes, &image.mime_type, self.max_image_bytes)
            .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(
                    compressor = self.compressor.name(),
                    mime_type = image.mime_type.as_str(),
                    error = %e,
                    "Image compression failed, storing original bytes"
                );
                image.bytes.clone()
            }
        }
    }

    async fn put_body(
        &self,
        kind: ContentKind,
        mime_type: &str,
        bytes: &[u8],
    ) -> Result<StoredBody, PersistenceError> {
        let digest = content_digest(bytes);
        let key = blob_key(kind, &digest, mime_type);
        let location = self
            .blobs
            .put(&key, bytes)
            .await
            .map_err(|e| PersistenceError::new(PersistenceErrorKind::Blob, format!("{e:#}")))?;
        Ok(StoredBody {
            location,
            mime_type: mime_type.to_string(),
            digest,
            byte_size: bytes.len(),
        })
    }

    /// Read an artifact's primary body back from blob storage.
    pub async fn load_content(&self, artifact: &Artifact) -> anyhow::Result<GeneratedContent> {
        let location = artifact
            .storage_location
            .as_deref()
            .context("artifact has no storage location")?;
        let bytes = self.blobs.get(location).await?;

        match artifact.kind {
            ContentKind::Text => {
                let text = String::from_utf8(bytes).context("stored text is not UTF-8")?;
                Ok(GeneratedContent::Text(text))
            }
            ContentKind::Image => {
                let mime_type = artifact
                    .mime_type
                    .clone()
                    .or_else(|| detect_mime(&bytes))
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                Ok(GeneratedContent::Images(vec![ImageData::new(mime_type, bytes)]))
            }
        }
    }
}

struct StoredBody {
    location: String,
    mime_type: String,
    digest: String,
    byte_size: usize,
}

fn blob_key(kind: ContentKind, digest: &str, mime_type: &str) -> String {
    format!("{kind}/{digest}.{}", extension_from_mime(mime_type))
}

fn prompt_excerpt(payload: &str) -> String {
    normalize_text(payload).chars().take(PROMPT_EXCERPT_CHARS).collect()
}

/// Point `result` at the stored artifact that was kept instead of the
/// fallback. The fallback body is dropped, since it is not what is stored.
fn adopt_kept_artifact(result: &mut GenerationResult, kept: Artifact) {
    tracing::info!(
        checksum = kept.checksum.as_str(),
        kept = %kept.source_tag,
        "Fallback not stored over existing artifact with the same checksum"
    );
    result.provider = match &kept.source_tag {
        SourceTag::Provider(name) => Some(name.clone()),
        SourceTag::Fallback | SourceTag::Manual => None,
    };
    result.model = kept.model.clone();
    result.content = None;
    result.artifact = Some(kept);
}

fn cache_hit_result(artifact: Artifact, checksum: String) -> GenerationResult {
    let provider = match &artifact.source_tag {
        SourceTag::Provider(name) => Some(name.clone()),
        SourceTag::Fallback | SourceTag::Manual => None,
    };
    GenerationResult {
        success: true,
        provider,
        model: artifact.model.clone(),
        attempts: Vec::new(),
        checksum,
        used_fallback: artifact.is_fallback(),
        cache_hit: true,
        skipped_providers: Vec::new(),
        content: None,
        artifact: Some(artifact),
    }
}
