use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Workspace directory - computed from home, not serialized
    #[serde(skip)]
    pub workspace_dir: PathBuf,
    /// Path to config.toml - computed from home, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub reliability: ReliabilityConfig,

    #[serde(default)]
    pub gate: GateConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub media: MediaConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

// ── Providers ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Default cascade order for text requests.
    #[serde(default = "default_text_order")]
    pub text_order: Vec<String>,
    /// Default cascade order for image requests.
    #[serde(default = "default_image_order")]
    pub image_order: Vec<String>,
    /// Explicit API keys by provider id. Env vars are used when absent.
    #[serde(default)]
    pub api_keys: BTreeMap<String, String>,
    #[serde(default)]
    pub base_urls: BTreeMap<String, String>,
    #[serde(default)]
    pub default_models: BTreeMap<String, String>,
    #[serde(default)]
    pub ollama_url: Option<String>,
    /// HTTP request timeout for provider calls.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_text_order() -> Vec<String> {
    vec!["openai".into(), "anthropic".into(), "gemini".into()]
}

fn default_image_order() -> Vec<String> {
    vec!["openai-image".into(), "stability".into()]
}

fn default_timeout_secs() -> u64 {
    crate::providers::http_client::DEFAULT_TIMEOUT_SECS
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            text_order: default_text_order(),
            image_order: default_image_order(),
            api_keys: BTreeMap::new(),
            base_urls: BTreeMap::new(),
            default_models: BTreeMap::new(),
            ollama_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

// ── Reliability ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliabilityConfig {
    /// Attempts per provider before moving on (>= 1).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    2
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

// ── Acceptance gate ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,
    /// Placeholder phrases only reject output up to this many chars.
    #[serde(default = "default_placeholder_max_chars")]
    pub placeholder_max_chars: usize,
    #[serde(default = "default_allowed_image_mimes")]
    pub allowed_image_mimes: Vec<String>,
    /// Log (never block on) structural findings in accepted text.
    #[serde(default = "default_true")]
    pub structural_audit: bool,
    #[serde(default = "default_min_audit_paragraphs")]
    pub min_audit_paragraphs: usize,
}

fn default_min_text_chars() -> usize {
    200
}

fn default_placeholder_max_chars() -> usize {
    600
}

fn default_allowed_image_mimes() -> Vec<String> {
    vec![
        "image/png".into(),
        "image/jpeg".into(),
        "image/webp".into(),
        "image/svg+xml".into(),
    ]
}

fn default_true() -> bool {
    true
}

fn default_min_audit_paragraphs() -> usize {
    2
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_text_chars: default_min_text_chars(),
            placeholder_max_chars: default_placeholder_max_chars(),
            allowed_image_mimes: default_allowed_image_mimes(),
            structural_audit: true,
            min_audit_paragraphs: default_min_audit_paragraphs(),
        }
    }
}

// ── Storage ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Relative paths resolve against the workspace directory.
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_blob_dir")]
    pub blob_dir: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_max_shed_iterations")]
    pub max_shed_iterations: usize,
}

fn default_db_path() -> String {
    "artifacts.db".into()
}

fn default_blob_dir() -> String {
    "blobs".into()
}

fn default_table() -> String {
    "artifacts".into()
}

fn default_max_shed_iterations() -> usize {
    5
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            db_path: default_db_path(),
            blob_dir: default_blob_dir(),
            table: default_table(),
            max_shed_iterations: default_max_shed_iterations(),
        }
    }
}

// ── Media ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Byte budget handed to the image compressor.
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
}

fn default_max_image_bytes() -> usize {
    4 * 1024 * 1024
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_image_bytes: default_max_image_bytes(),
        }
    }
}

// ── Pipeline ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    /// Treat a cached fallback artifact as a cache miss.
    #[serde(default)]
    pub regenerate_fallback: bool,
}

// ── Derived paths + validation ───────────────────────────────────

impl Config {
    pub fn resolve_path(&self, raw: &str) -> PathBuf {
        let expanded = shellexpand::tilde(raw);
        let path = PathBuf::from(expanded.as_ref());
        if path.is_absolute() {
            path
        } else {
            self.workspace_dir.join(path)
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.resolve_path(&self.storage.db_path)
    }

    pub fn blob_dir(&self) -> PathBuf {
        self.resolve_path(&self.storage.blob_dir)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reliability.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "reliability.max_attempts must be at least 1".into(),
            ));
        }
        if self.gate.allowed_image_mimes.is_empty() {
            return Err(ConfigError::Validation(
                "gate.allowed_image_mimes must not be empty".into(),
            ));
        }
        if !is_valid_table_name(&self.storage.table) {
            return Err(ConfigError::Validation(format!(
                "storage.table `{}` must match [a-z_][a-z0-9_]*",
                self.storage.table
            )));
        }
        if self.storage.max_shed_iterations == 0 {
            return Err(ConfigError::Validation(
                "storage.max_shed_iterations must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

pub(crate) fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
