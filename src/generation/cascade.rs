use super::fallback::{FALLBACK_MODEL, FallbackGenerator};
use super::gate::{ContentGate, GateVerdict};
use super::idempotency::compute_key;
use super::types::{
    Artifact, AttemptLog, AttemptOutcome, GeneratedContent, GenerationAttempt, GenerationRequest,
    GenerationResult, SourceTag, TokenUsage,
};
use crate::config::ReliabilityConfig;
use crate::error::ValidationError;
use crate::providers::{GenerationProvider, sanitize_api_error};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const MIN_BACKOFF_MS: u64 = 50;

/// Check if an error is non-retryable (client errors that won't resolve with retries).
pub(crate) fn is_non_retryable(err: &anyhow::Error) -> bool {
    let msg = err.to_string();
    if is_quota_exhausted(&msg) {
        return true;
    }

    if let Some(reqwest_err) = err.downcast_ref::<reqwest::Error>()
        && let Some(status) = reqwest_err.status()
    {
        let code = status.as_u16();
        // 429 and 408 are transient.
        return status.is_client_error() && code != 429 && code != 408;
    }

    // Adapters format failures as "<provider> API error (<status>): ...".
    if let Some(rest) = msg.split_once("API error (").map(|(_, rest)| rest)
        && let Some(code) = rest
            .split(|c: char| !c.is_ascii_digit())
            .next()
            .and_then(|digits| digits.parse::<u16>().ok())
    {
        return (400..500).contains(&code) && code != 429 && code != 408;
    }
    false
}

fn is_quota_exhausted(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("insufficient_quota")
        || lower.contains("exceeded your current quota")
        || lower.contains("billing")
}

/// Bounded per-provider attempts with capped exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        let base = base_backoff_ms.max(MIN_BACKOFF_MS);
        Self {
            max_attempts: max_attempts.max(1),
            base_backoff: Duration::from_millis(base),
            max_backoff: Duration::from_millis(max_backoff_ms.max(base)),
        }
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ReliabilityConfig::default())
    }
}

impl From<&ReliabilityConfig> for RetryPolicy {
    fn from(config: &ReliabilityConfig) -> Self {
        Self::new(config.max_attempts, config.backoff_ms, config.max_backoff_ms)
    }
}

/// Drives providers in order until one output passes the gate.
///
/// Provider failures never escape: exhaustion is answered by the fallback
/// generator and the result is still `success`. Only contract violations
/// (empty provider list, wrong provider kind, malformed request) are errors.
/// Performs no persistence; the returned artifact has no storage location.
pub struct CascadeOrchestrator {
    gate: ContentGate,
    retry: RetryPolicy,
    fallback: FallbackGenerator,
}

struct Accepted<'a> {
    provider: &'a str,
    model: String,
    content: GeneratedContent,
    usage: Option<TokenUsage>,
}

impl CascadeOrchestrator {
    pub fn new(gate: ContentGate, retry: RetryPolicy, fallback: FallbackGenerator) -> Self {
        Self {
            gate,
            retry,
            fallback,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Request, provider-list and provider-kind checks run before any call.
    pub fn check_contract(
        providers: &[Arc<dyn GenerationProvider>],
        request: &GenerationRequest,
    ) -> Result<(), ValidationError> {
        request.validate()?;
        if providers.is_empty() {
            return Err(ValidationError::EmptyProviderList);
        }
        if let Some(provider) = providers.iter().find(|p| p.kind() != request.kind) {
            return Err(ValidationError::KindMismatch {
                provider: provider.name().to_string(),
                provider_kind: provider.kind().to_string(),
                requested: request.kind.to_string(),
            });
        }
        Ok(())
    }

    pub async fn run(
        &self,
        providers: &[Arc<dyn GenerationProvider>],
        request: &GenerationRequest,
    ) -> Result<GenerationResult, ValidationError> {
        Self::check_contract(providers, request)?;

        let checksum = compute_key(request);
        let locale = request.target.locale.as_str();
        let mut log = AttemptLog::default();
        let mut skipped = Vec::new();

        for provider in providers {
            let provider_name = provider.name();
            if !provider.has_credentials() {
                tracing::info!(
                    provider = provider_name,
                    "No credentials configured, skipping provider"
                );
                skipped.push(provider_name.to_string());
                continue;
            }

            let outcome = self
                .drive_provider(provider.as_ref(), request, locale, &mut log)
                .await;
            if let Some(accepted) = outcome {
                tracing::info!(
                    provider = accepted.provider,
                    model = accepted.model.as_str(),
                    attempts = log.len(),
                    "Provider output accepted"
                );
                return Ok(Self::accepted_result(request, checksum, accepted, log, skipped));
            }

            tracing::warn!(provider = provider_name, "Switching to next provider");
        }

        tracing::warn!(
            target_id = %request.target,
            attempts = log.len(),
            skipped = skipped.len(),
            "All providers exhausted, using fallback artifact"
        );
        Ok(self.fallback_result(request, checksum, log, skipped))
    }

    /// Up to `max_attempts` calls to one provider. Returns the accepted
    /// output, or `None` once this provider is exhausted.
    async fn drive_provider<'p>(
        &self,
        provider: &'p dyn GenerationProvider,
        request: &GenerationRequest,
        locale: &str,
        log: &mut AttemptLog,
    ) -> Option<Accepted<'p>> {
        let provider_name = provider.name();
        let requested_model = provider.model_for(&request.options).to_string();

        for attempt in 1..=self.retry.max_attempts {
            let started_at = Utc::now();
            let mut record = GenerationAttempt {
                provider_id: provider_name.to_string(),
                model: requested_model.clone(),
                attempt,
                started_at,
                outcome: AttemptOutcome::ProviderError,
                error_detail: None,
                usage: None,
            };

            match provider.generate(&request.payload, &request.options).await {
                Ok(output) => {
                    if let Some(model) = output.model {
                        record.model = model;
                    }
                    record.usage = output.usage;

                    match self.gate.evaluate(request.kind, locale, output.content) {
                        GateVerdict::Accepted(content) => {
                            record.outcome = AttemptOutcome::Success;
                            let model = record.model.clone();
                            log.record(record);
                            return Some(Accepted {
                                provider: provider_name,
                                model,
                                content,
                                usage: output.usage,
                            });
                        }
                        GateVerdict::Rejected(rejection) => {
                            tracing::warn!(
                                provider = provider_name,
                                attempt,
                                reason = %rejection,
                                "Output rejected by acceptance gate"
                            );
                            record.outcome = AttemptOutcome::RejectedByGate;
                            record.error_detail = Some(rejection.to_string());
                            log.record(record);
                        }
                    }
                }
                Err(e) => {
                    let non_retryable = is_non_retryable(&e);
                    let detail = sanitize_api_error(&format!("{e:#}"));
                    tracing::warn!(
                        provider = provider_name,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        error = detail.as_str(),
                        "Provider call failed"
                    );
                    record.error_detail = Some(detail);
                    log.record(record);

                    if non_retryable {
                        tracing::warn!(
                            provider = provider_name,
                            "Non-retryable error, switching provider"
                        );
                        return None;
                    }
                }
            }

            if attempt < self.retry.max_attempts {
                let delay = self.retry.delay_for(attempt - 1);
                tracing::debug!(
                    provider = provider_name,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Retrying provider"
                );
                tokio::time::sleep(delay).await;
            }
        }

        None
    }

    fn accepted_result(
        request: &GenerationRequest,
        checksum: String,
        accepted: Accepted<'_>,
        log: AttemptLog,
        skipped: Vec<String>,
    ) -> GenerationResult {
        let metadata = json!({
            "attempt_count": log.len(),
            "usage": accepted.usage,
            "skipped_providers": skipped,
        });
        let artifact = Artifact {
            kind: request.kind,
            target: request.target.clone(),
            checksum: checksum.clone(),
            storage_location: None,
            mime_type: Some(accepted.content.primary_mime().to_string()),
            model: Some(accepted.model.clone()),
            metadata,
            source_tag: SourceTag::Provider(accepted.provider.to_string()),
            created_at: Utc::now(),
        };

        GenerationResult {
            success: true,
            artifact: Some(artifact),
            content: Some(accepted.content),
            provider: Some(accepted.provider.to_string()),
            model: Some(accepted.model),
            attempts: log.into_vec(),
            checksum,
            used_fallback: false,
            cache_hit: false,
            skipped_providers: skipped,
        }
    }

    fn fallback_result(
        &self,
        request: &GenerationRequest,
        checksum: String,
        log: AttemptLog,
        skipped: Vec<String>,
    ) -> GenerationResult {
        let content = self.fallback.generate(request);
        let metadata = json!({
            "attempt_count": log.len(),
            "skipped_providers": skipped,
        });
        let artifact = Artifact {
            kind: request.kind,
            target: request.target.clone(),
            checksum: checksum.clone(),
            storage_location: None,
            mime_type: Some(content.primary_mime().to_string()),
            model: Some(FALLBACK_MODEL.to_string()),
            metadata,
            source_tag: SourceTag::Fallback,
            created_at: Utc::now(),
        };

        GenerationResult {
            success: true,
            artifact: Some(artifact),
            content: Some(content),
            provider: None,
            model: Some(FALLBACK_MODEL.to_string()),
            attempts: log.into_vec(),
            checksum,
            used_fallback: true,
            cache_hit: false,
            skipped_providers: skipped,
        }
    }
}
