use crate::generation::types::GenerationResult;
use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `contentforge`.
///
/// Only two failures ever reach a caller of the pipeline: a request that is
/// malformed before any provider runs, and an artifact that was generated but
/// could not be stored. Provider failures, gate rejections and provider
/// exhaustion are absorbed by the cascade and show up in the attempt trail
/// instead. Internal code keeps using `anyhow::Result` for context chains.
#[derive(Debug, Error)]
pub enum ForgeError {
    // ── Request validation ──────────────────────────────────────────────
    #[error("validation: {0}")]
    Validation(#[from] ValidationError),

    // ── Persistence ─────────────────────────────────────────────────────
    #[error("persistence: {source}")]
    PersistenceFailed {
        source: PersistenceError,
        /// The generated (or fallback) artifact, still held in memory.
        result: Box<GenerationResult>,
    },

    // ── Config ──────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Validation errors ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("provider list is empty")]
    EmptyProviderList,

    #[error("target identity field `{0}` is empty")]
    MissingIdentityField(&'static str),

    #[error("generation payload is empty")]
    EmptyPayload,

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("provider {provider} generates {provider_kind} content, request wants {requested}")]
    KindMismatch {
        provider: String,
        provider_kind: String,
        requested: String,
    },
}

// ─── Persistence errors ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum PersistenceErrorKind {
    /// Field shedding ran out of iterations or of sheddable fields.
    SchemaMismatchExhausted,
    /// The backend rejected a field the record cannot exist without.
    EssentialFieldRejected,
    /// Any other backend failure (constraint, I/O, connection).
    Backend,
    /// Artifact bytes could not be written to blob storage.
    Blob,
}

#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct PersistenceError {
    pub kind: PersistenceErrorKind,
    pub message: String,
    /// Fields removed from the row before the write gave up.
    pub shed_fields: Vec<String>,
}

impl PersistenceError {
    pub fn new(kind: PersistenceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            shed_fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_shed_fields(mut self, shed_fields: Vec<String>) -> Self {
        self.shed_fields = shed_fields;
        self
    }

    pub fn is_schema_mismatch(&self) -> bool {
        matches!(
            self.kind,
            PersistenceErrorKind::SchemaMismatchExhausted
                | PersistenceErrorKind::EssentialFieldRejected
        )
    }
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, ForgeError>;
