#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use contentforge::config::Config;
use contentforge::generation::{
    ContentKind, GenerationOptions, GenerationPipeline, GenerationRequest, ImageData,
    TargetIdentity,
};
use contentforge::providers::{GenerationProvider, ProviderOutput, ProviderRegistry};
use contentforge::storage::{FsBlobStore, RecordStore};

pub const PNG_BYTES: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52,
];

/// One scripted provider response.
#[derive(Debug, Clone)]
pub enum Step {
    Text(String),
    Image(&'static str, Vec<u8>),
    Fail(String),
    Timeout,
}

/// Provider that replays a fixed script and counts calls. Once the script
/// runs out every call fails.
pub struct ScriptedProvider {
    name: &'static str,
    kind: ContentKind,
    credentials: bool,
    script: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn text(name: &'static str, steps: Vec<Step>) -> Arc<Self> {
        Self::build(name, ContentKind::Text, true, steps)
    }

    pub fn image(name: &'static str, steps: Vec<Step>) -> Arc<Self> {
        Self::build(name, ContentKind::Image, true, steps)
    }

    pub fn without_credentials(name: &'static str, kind: ContentKind) -> Arc<Self> {
        Self::build(name, kind, false, Vec::new())
    }

    fn build(
        name: &'static str,
        kind: ContentKind,
        credentials: bool,
        steps: Vec<Step>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            kind,
            credentials,
            script: Mutex::new(steps.into()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Append responses for later calls.
    pub fn push(&self, step: Step) {
        self.script.lock().unwrap().push_back(step);
    }
}

impl GenerationProvider for ScriptedProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn kind(&self) -> ContentKind {
        self.kind
    }

    fn default_model(&self) -> &str {
        match self.kind {
            ContentKind::Text => "scripted-text-1",
            ContentKind::Image => "scripted-image-1",
        }
    }

    fn has_credentials(&self) -> bool {
        self.credentials
    }

    fn generate<'a>(
        &'a self,
        _payload: &'a str,
        _options: &'a GenerationOptions,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ProviderOutput>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.script.lock().unwrap().pop_front();
            match step {
                Some(Step::Text(text)) => Ok(ProviderOutput::text(text)),
                Some(Step::Image(mime, bytes)) => Ok(ProviderOutput {
                    content: contentforge::generation::GeneratedContent::Images(vec![
                        ImageData::new(mime, bytes),
                    ]),
                    model: None,
                    usage: None,
                }),
                Some(Step::Fail(message)) => Err(anyhow::anyhow!("{message}")),
                Some(Step::Timeout) => Err(anyhow::anyhow!("{} request timed out", self.name)),
                None => Err(anyhow::anyhow!("{} script exhausted", self.name)),
            }
        })
    }
}

/// Config rooted in `tmp` with one attempt per provider and minimal backoff.
pub fn test_config(tmp: &TempDir) -> Config {
    let mut config = Config {
        workspace_dir: tmp.path().to_path_buf(),
        ..Config::default()
    };
    config.reliability.max_attempts = 1;
    config.reliability.backoff_ms = 50;
    config.reliability.max_backoff_ms = 50;
    config
}

pub fn registry_of(providers: &[Arc<ScriptedProvider>]) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for provider in providers {
        registry.register(Arc::clone(provider) as Arc<dyn GenerationProvider>);
    }
    registry
}

pub fn pipeline(
    config: &Config,
    providers: &[Arc<ScriptedProvider>],
    records: Arc<dyn RecordStore>,
) -> GenerationPipeline {
    let blobs = Arc::new(FsBlobStore::new(config.blob_dir()));
    GenerationPipeline::from_config(config, registry_of(providers), records, blobs).unwrap()
}

pub fn text_request(providers: &[&str]) -> GenerationRequest {
    GenerationRequest::text(
        TargetIdentity::new("M1", "en", "textbook"),
        "Write a lesson on how plants turn light into chemical energy.",
    )
    .with_providers(providers.iter().copied())
}

/// Markdown article of roughly `words` words with headings and paragraphs.
pub fn article(words: usize) -> String {
    const SENTENCE: &str = "Plants capture light in their leaves and store the energy as sugar";
    let per_sentence = SENTENCE.split_whitespace().count();
    let mut out = String::from("# Photosynthesis\n\n");
    let mut written = 0;
    let mut section = 1;
    while written < words {
        out.push_str(&format!("## Part {section}\n\n"));
        for _ in 0..4 {
            out.push_str(SENTENCE);
            out.push_str(". ");
            written += per_sentence;
        }
        out.push_str("\n\n");
        section += 1;
    }
    out.trim_end().to_string()
}

/// A 40-character stub that reads like a placeholder.
pub fn placeholder_text() -> String {
    let text = "Coming soon: this lesson is being built.".to_string();
    assert_eq!(text.chars().count(), 40);
    text
}
