pub mod cascade;
pub mod fallback;
pub mod gate;
pub mod idempotency;
pub mod pipeline;
pub mod types;

pub use cascade::{CascadeOrchestrator, RetryPolicy};
pub use fallback::{FALLBACK_MODEL, FallbackGenerator};
pub use gate::{ContentGate, GatePolicy, GateRejection, GateVerdict};
pub use idempotency::{compute_key, conflict_key};
pub use pipeline::{GenerationPipeline, PipelineState};
pub use types::{
    Anchor, Artifact, AttemptOutcome, ContentKind, GeneratedContent, GenerationAttempt,
    GenerationOptions, GenerationRequest, GenerationResult, ImageData, SourceTag, TargetIdentity,
    TokenUsage,
};
