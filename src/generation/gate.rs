//! Acceptance gate for provider output.
//!
//! A rejection is a cascade-continuation signal: the orchestrator records it
//! as a failed attempt and moves on. Only accepted output may become a
//! canonical artifact.

use super::idempotency::normalize_locale;
use super::types::{ContentKind, GeneratedContent, ImageData};
use crate::config::GateConfig;
use crate::media::resolve_image_mime;
use std::borrow::Cow;
use std::fmt;

/// Stub phrases that mark output as not-yet-real content, keyed by primary
/// language subtag. English phrases are checked for every locale since
/// providers often fall back to English.
const PLACEHOLDER_PHRASES: &[(&str, &[&str])] = &[
    (
        "en",
        &[
            "coming soon",
            "lorem ipsum",
            "placeholder",
            "to be written",
            "content not available",
            "content unavailable",
            "under construction",
            "check back later",
            "[insert",
        ],
    ),
    (
        "es",
        &[
            "próximamente",
            "en construcción",
            "contenido no disponible",
            "disponible pronto",
        ],
    ),
    (
        "fr",
        &[
            "bientôt disponible",
            "prochainement",
            "en construction",
            "contenu à venir",
        ],
    ),
    (
        "de",
        &[
            "demnächst verfügbar",
            "in kürze verfügbar",
            "in bearbeitung",
            "platzhalter",
        ],
    ),
    (
        "pt",
        &["em breve", "em construção", "conteúdo indisponível"],
    ),
    ("it", &["prossimamente", "in costruzione", "in arrivo"]),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateRejection {
    EmptyText,
    TooShort { chars: usize, min: usize },
    Placeholder { phrase: &'static str, chars: usize },
    NoImages,
    EmptyImage { index: usize },
    DisallowedMime { index: usize, mime: String },
    KindMismatch { expected: ContentKind, actual: ContentKind },
}

impl fmt::Display for GateRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyText => f.write_str("text output is empty"),
            Self::TooShort { chars, min } => {
                write!(f, "text output has {chars} chars, minimum is {min}")
            }
            Self::Placeholder { phrase, chars } => {
                write!(f, "placeholder phrase \"{phrase}\" in {chars}-char output")
            }
            Self::NoImages => f.write_str("image output contains no images"),
            Self::EmptyImage { index } => write!(f, "image #{index} has no bytes"),
            Self::DisallowedMime { index, mime } => {
                write!(f, "image #{index} has disallowed mime type {mime}")
            }
            Self::KindMismatch { expected, actual } => {
                write!(f, "expected {expected} output, provider returned {actual}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateVerdict {
    /// Sanitized content, ready to become canonical.
    Accepted(GeneratedContent),
    Rejected(GateRejection),
}

/// Non-blocking structural observations about accepted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditFinding {
    MissingHeading,
    TooFewParagraphs { found: usize, min: usize },
    UnbalancedCodeFence,
    AbruptEnding,
}

impl fmt::Display for AuditFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingHeading => f.write_str("no markdown heading"),
            Self::TooFewParagraphs { found, min } => {
                write!(f, "{found} paragraphs, expected at least {min}")
            }
            Self::UnbalancedCodeFence => f.write_str("unbalanced code fence"),
            Self::AbruptEnding => f.write_str("text ends mid-sentence"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatePolicy {
    pub min_text_chars: usize,
    /// Placeholder phrases only reject output up to this length.
    pub placeholder_max_chars: usize,
    pub allowed_image_mimes: Vec<String>,
    pub structural_audit: bool,
    pub min_audit_paragraphs: usize,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self::from(&GateConfig::default())
    }
}

impl From<&GateConfig> for GatePolicy {
    fn from(config: &GateConfig) -> Self {
        Self {
            min_text_chars: config.min_text_chars,
            placeholder_max_chars: config.placeholder_max_chars,
            allowed_image_mimes: config
                .allowed_image_mimes
                .iter()
                .map(|m| m.trim().to_ascii_lowercase())
                .collect(),
            structural_audit: config.structural_audit,
            min_audit_paragraphs: config.min_audit_paragraphs,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContentGate {
    policy: GatePolicy,
}

impl ContentGate {
    pub fn new(policy: GatePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    pub fn evaluate(
        &self,
        kind: ContentKind,
        locale: &str,
        content: GeneratedContent,
    ) -> GateVerdict {
        if content.kind() != kind {
            return GateVerdict::Rejected(GateRejection::KindMismatch {
                expected: kind,
                actual: content.kind(),
            });
        }
        match content {
            GeneratedContent::Text(text) => match self.check_text(locale, &text) {
                Ok(clean) => GateVerdict::Accepted(GeneratedContent::Text(clean)),
                Err(rejection) => GateVerdict::Rejected(rejection),
            },
            GeneratedContent::Images(images) => match self.check_images(images) {
                Ok(images) => GateVerdict::Accepted(GeneratedContent::Images(images)),
                Err(rejection) => GateVerdict::Rejected(rejection),
            },
        }
    }

    fn check_text(&self, locale: &str, text: &str) -> Result<String, GateRejection> {
        let clean = sanitize_text(text).trim().to_string();
        let chars = clean.chars().count();
        if chars == 0 {
            return Err(GateRejection::EmptyText);
        }

        if chars <= self.policy.placeholder_max_chars
            && let Some(phrase) = find_placeholder(locale, &clean)
        {
            return Err(GateRejection::Placeholder { phrase, chars });
        }

        if chars < self.policy.min_text_chars {
            return Err(GateRejection::TooShort {
                chars,
                min: self.policy.min_text_chars,
            });
        }

        if self.policy.structural_audit {
            let findings = audit_structure(&clean, self.policy.min_audit_paragraphs);
            for finding in &findings {
                tracing::warn!(locale, %finding, "Structural audit finding (non-blocking)");
            }
        }

        Ok(clean)
    }

    fn check_images(&self, images: Vec<ImageData>) -> Result<Vec<ImageData>, GateRejection> {
        if images.is_empty() {
            return Err(GateRejection::NoImages);
        }

        let mut accepted = Vec::with_capacity(images.len());
        for (index, image) in images.into_iter().enumerate() {
            if image.bytes.is_empty() {
                return Err(GateRejection::EmptyImage { index });
            }
            let mime = resolve_image_mime(&image.mime_type, &image.bytes)
                .unwrap_or_else(|| image.mime_type.trim().to_ascii_lowercase());
            if !self.policy.allowed_image_mimes.iter().any(|m| *m == mime) {
                return Err(GateRejection::DisallowedMime { index, mime });
            }
            accepted.push(ImageData::new(mime, image.bytes));
        }
        Ok(accepted)
    }
}

/// Strip control characters other than newline and tab.
pub fn sanitize_text(input: &str) -> Cow<'_, str> {
    let is_stripped = |c: char| c.is_control() && c != '\n' && c != '\t';
    if !input.chars().any(is_stripped) {
        return Cow::Borrowed(input);
    }
    let unified = input.replace("\r\n", "\n");
    Cow::Owned(unified.chars().filter(|c| !is_stripped(*c)).collect())
}

/// First stub phrase found in `text` for `locale`, if any.
pub fn find_placeholder(locale: &str, text: &str) -> Option<&'static str> {
    let normalized = normalize_locale(locale);
    let language = normalized.split('-').next().unwrap_or_default();
    let haystack = text.to_lowercase();

    PLACEHOLDER_PHRASES
        .iter()
        .filter(|(lang, _)| *lang == "en" || *lang == language)
        .flat_map(|(_, phrases)| phrases.iter())
        .find(|phrase| haystack.contains(*phrase))
        .copied()
}

pub fn audit_structure(text: &str, min_paragraphs: usize) -> Vec<AuditFinding> {
    let mut findings = Vec::new();

    if !text.lines().any(|line| line.trim_start().starts_with('#')) {
        findings.push(AuditFinding::MissingHeading);
    }

    let paragraphs = text
        .split("\n\n")
        .map(str::trim)
        .filter(|block| !block.is_empty() && !block.starts_with('#'))
        .count();
    if paragraphs < min_paragraphs {
        findings.push(AuditFinding::TooFewParagraphs {
            found: paragraphs,
            min: min_paragraphs,
        });
    }

    if text.matches("```").count() % 2 != 0 {
        findings.push(AuditFinding::UnbalancedCodeFence);
    }

    let ends_cleanly = text
        .trim_end()
        .chars()
        .last()
        .is_some_and(|c| {
            matches!(
                c,
                '.' | '!' | '?' | '"' | '\'' | ')' | '`' | '*' | ':' | '»' | '”' | '。'
            )
        });
    if !ends_cleanly {
        findings.push(AuditFinding::AbruptEnding);
    }

    findings
}
