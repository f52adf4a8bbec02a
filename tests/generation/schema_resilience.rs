use std::sync::Arc;

use contentforge::error::{ForgeError, PersistenceErrorKind};
use contentforge::generation::{
    Anchor, ContentKind, GenerationOptions, GenerationRequest, SourceTag, TargetIdentity,
    conflict_key,
};
use contentforge::storage::{ESSENTIAL_FIELDS, MemoryRecordStore, RecordStore};
use tempfile::TempDir;

use super::provider_harness::{
    ScriptedProvider, Step, article, pipeline, test_config, text_request,
};

fn anchored_request() -> GenerationRequest {
    text_request(&["writer"]).with_options(GenerationOptions {
        anchors: vec![Anchor::new("leaf", 0.25, 0.5)],
        title: Some("Photosynthesis".into()),
        ..GenerationOptions::default()
    })
}

const LEAN_COLUMNS: [&str; 7] = [
    "used_fallback",
    "model",
    "mime_type",
    "metadata",
    "content_sha256",
    "byte_size",
    "attempt_count",
];

fn key() -> String {
    conflict_key(ContentKind::Text, &TargetIdentity::new("M1", "en", "textbook"))
}

#[tokio::test]
async fn full_schema_stores_anchors_as_json() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let records = Arc::new(MemoryRecordStore::default());
    let writer = ScriptedProvider::text("writer", vec![Step::Text(article(300))]);
    let pipeline = pipeline(&config, &[writer], records.clone());

    pipeline.generate(&anchored_request()).await.unwrap();

    let stored = records.find_latest(&key()).await.unwrap().unwrap();
    let raw = stored.row.get_str("anchors").expect("anchors column written");
    let anchors: Vec<Anchor> = serde_json::from_str(raw).unwrap();
    assert_eq!(anchors, vec![Anchor::new("leaf", 0.25, 0.5)]);
    assert_eq!(records.write_attempts().len(), 1);
}

#[tokio::test]
async fn store_without_rich_columns_keeps_everything_else() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let mut columns: Vec<&str> = ESSENTIAL_FIELDS.to_vec();
    columns.extend(LEAN_COLUMNS);
    let records = Arc::new(MemoryRecordStore::default().with_columns(columns.clone()));
    let writer = ScriptedProvider::text("writer", vec![Step::Text(article(300))]);
    let pipeline = pipeline(&config, &[writer], records.clone());

    let result = pipeline.generate(&anchored_request()).await.unwrap();

    let stored = records.find_latest(&key()).await.unwrap().unwrap();
    assert!(!stored.row.contains("prompt_excerpt"));
    assert!(!stored.row.contains("anchors"));
    for column in &columns {
        assert!(stored.row.contains(column), "column {column} was dropped");
    }
    assert_eq!(stored.source_tag(), Some(SourceTag::Provider("writer".into())));
    assert_eq!(stored.checksum(), Some(result.checksum.as_str()));

    let attempts = records.write_attempts();
    assert_eq!(attempts.len(), 3);
    assert!(attempts[0].iter().any(|field| field == "anchors"));
}

#[tokio::test]
async fn missing_essential_column_surfaces_with_the_result() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let columns: Vec<&str> = ESSENTIAL_FIELDS
        .iter()
        .copied()
        .filter(|column| *column != "storage_location")
        .chain(LEAN_COLUMNS)
        .collect();
    let records = Arc::new(MemoryRecordStore::default().with_columns(columns));
    let writer = ScriptedProvider::text("writer", vec![Step::Text(article(300))]);
    let pipeline = pipeline(&config, &[writer], records.clone());

    let err = pipeline.generate(&anchored_request()).await.unwrap_err();

    let ForgeError::PersistenceFailed { source, result } = err else {
        panic!("expected a persistence failure");
    };
    assert_eq!(source.kind, PersistenceErrorKind::EssentialFieldRejected);
    assert!(source.message.contains("storage_location"));
    assert_eq!(source.shed_fields, vec!["anchors", "prompt_excerpt"]);
    assert_eq!(result.provider.as_deref(), Some("writer"));
    assert_eq!(
        result.content.as_ref().and_then(|c| c.as_text()),
        Some(article(300).as_str())
    );
    assert!(records.is_empty());
}

#[tokio::test]
async fn oversized_rich_fields_are_stripped_together() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let records = Arc::new(MemoryRecordStore::default().with_payload_limit(160));
    let writer = ScriptedProvider::text("writer", vec![Step::Text(article(300))]);
    let pipeline = pipeline(&config, &[writer], records.clone());
    let mut request = anchored_request();
    request.payload = "Describe the light reactions in detail. ".repeat(10);

    pipeline.generate(&request).await.unwrap();

    let stored = records.find_latest(&key()).await.unwrap().unwrap();
    assert!(!stored.row.contains("prompt_excerpt"));
    assert!(!stored.row.contains("metadata"));
    assert!(!stored.row.contains("anchors"));
    assert!(stored.row.contains("checksum"));
    assert!(stored.row.contains("storage_location"));
}
