//! Idempotency keys for generation requests.
//!
//! A key is the SHA-256 of a canonical JSON document built from the target
//! identity, the normalized payload and every option that changes provider
//! output. Timestamps, request ids, retry counters, the provider order and
//! `force_regenerate` never enter the document, so equal inputs produce equal
//! keys across processes and restarts.

use super::types::{Anchor, ContentKind, GenerationOptions, GenerationRequest, TargetIdentity};
use crate::providers::canonical_provider_id;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Bumped whenever canonicalization changes, so old keys stop matching.
const KEY_VERSION: &str = "cf-key-v2";

/// Decimal places kept for floating point inputs.
const FLOAT_PRECISION: usize = 6;

/// Collapse whitespace so formatting-only edits map to the same key.
///
/// Line endings become `\n`, runs of spaces and tabs become one space,
/// trailing spaces are dropped per line, more than one blank line collapses
/// to a single blank line, and the whole text is trimmed.
pub fn normalize_text(input: &str) -> String {
    let unified = input.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines: Vec<String> = Vec::new();
    let mut blank_run = 0usize;

    for raw_line in unified.split('\n') {
        let line = raw_line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        lines.push(line);
    }

    lines.join("\n").trim().to_string()
}

/// `en_US`, `EN-us` and ` en-US ` all normalize to `en-us`.
pub fn normalize_locale(locale: &str) -> String {
    locale.trim().replace('_', "-").to_ascii_lowercase()
}

fn normalize_field(value: &str) -> String {
    value.trim().to_string()
}

fn normalize_slot(slot: Option<&str>) -> Option<String> {
    slot.map(str::trim).filter(|s| !s.is_empty()).map(String::from)
}

fn canonical_float(value: f64) -> String {
    let formatted = format!("{value:.prec$}", prec = FLOAT_PRECISION);
    // -0.0 and values that round to zero must agree with 0.0.
    match formatted.strip_prefix('-') {
        Some(magnitude) if magnitude.bytes().all(|b| b == b'0' || b == b'.') => {
            magnitude.to_string()
        }
        _ => formatted,
    }
}

/// Anchors are canonicalized before sorting, so the order only depends on
/// the canonical form.
fn canonical_anchors(anchors: &[Anchor]) -> Vec<Value> {
    let mut canonical: Vec<(String, String, String)> = anchors
        .iter()
        .map(|anchor| {
            (
                normalize_text(&anchor.label),
                canonical_float(anchor.x),
                canonical_float(anchor.y),
            )
        })
        .collect();
    canonical.sort();
    canonical
        .into_iter()
        .map(|(label, x, y)| json!({ "label": label, "x": x, "y": y }))
        .collect()
}

fn canonical_options(options: &GenerationOptions) -> Value {
    let mut map = Map::new();
    let mut put = |key: &str, value: Option<Value>| {
        if let Some(value) = value {
            map.insert(key.to_string(), value);
        }
    };

    let models: Map<String, Value> = options
        .models
        .iter()
        .map(|(provider, model)| (canonical_provider_id(provider), model.trim()))
        .filter(|(_, model)| !model.is_empty())
        .map(|(provider, model)| (provider, Value::from(model)))
        .collect();
    put("models", (!models.is_empty()).then_some(Value::Object(models)));
    put(
        "system_prompt",
        options
            .system_prompt
            .as_deref()
            .map(normalize_text)
            .filter(|s| !s.is_empty())
            .map(Value::from),
    );
    put(
        "temperature",
        options.temperature.map(|t| Value::from(canonical_float(t))),
    );
    put("max_tokens", options.max_tokens.map(Value::from));
    put(
        "image_size",
        options
            .image_size
            .as_deref()
            .map(|s| Value::from(s.trim().to_ascii_lowercase())),
    );
    put("image_count", options.image_count.map(Value::from));
    put(
        "title",
        options.title.as_deref().map(normalize_text).map(Value::from),
    );
    put(
        "category",
        options
            .category
            .as_deref()
            .map(normalize_text)
            .map(Value::from),
    );
    if !options.anchors.is_empty() {
        put("anchors", Some(Value::Array(canonical_anchors(&options.anchors))));
    }
    if !options.extra.is_empty() {
        let extra: BTreeMap<&str, &Value> = options
            .extra
            .iter()
            .map(|(k, v)| (k.trim(), v))
            .collect();
        put("extra", Some(json!(extra)));
    }

    Value::Object(map)
}

fn canonical_target(target: &TargetIdentity) -> Value {
    json!({
        "subject_id": normalize_field(&target.subject_id),
        "locale": normalize_locale(&target.locale),
        "variant": normalize_field(&target.variant),
        "slot": normalize_slot(target.slot.as_deref()),
    })
}

/// The canonical document a key is computed from.
pub fn canonical_request(request: &GenerationRequest) -> Value {
    json!({
        "version": KEY_VERSION,
        "kind": request.kind.to_string(),
        "target": canonical_target(&request.target),
        "payload": normalize_text(&request.payload),
        "options": canonical_options(&request.options),
    })
}

/// Serialize with object keys sorted at every depth.
pub fn to_canonical_json(value: &Value) -> String {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => value.to_string(),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(to_canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            let items: Vec<String> = sorted
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), to_canonical_json(v)))
                .collect();
            format!("{{{}}}", items.join(","))
        }
    }
}

/// Hex SHA-256 of the canonical request document.
pub fn compute_key(request: &GenerationRequest) -> String {
    let canonical = to_canonical_json(&canonical_request(request));
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Record key the persistence layer upserts on: one canonical artifact per
/// kind and target.
pub fn conflict_key(kind: ContentKind, target: &TargetIdentity) -> String {
    let mut key = format!(
        "{kind}:{}:{}:{}",
        normalize_field(&target.subject_id),
        normalize_locale(&target.locale),
        normalize_field(&target.variant),
    );
    if let Some(slot) = normalize_slot(target.slot.as_deref()) {
        key.push(':');
        key.push_str(&slot);
    }
    key
}

/// Hex SHA-256 of raw bytes, for stored blob digests.
pub fn content_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
