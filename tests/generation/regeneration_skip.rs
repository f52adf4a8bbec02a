use std::sync::Arc;

use contentforge::generation::{GenerationOptions, GenerationRequest, SourceTag, TargetIdentity};
use contentforge::storage::{MemoryRecordStore, RecordStore};
use tempfile::TempDir;

use super::provider_harness::{ScriptedProvider, Step, article, pipeline, test_config, text_request};

#[tokio::test]
async fn identical_request_reuses_stored_artifact() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let writer = ScriptedProvider::text("writer", vec![Step::Text(article(300))]);
    let pipeline = pipeline(&config, &[writer.clone()], Arc::new(MemoryRecordStore::default()));

    let first = pipeline.generate(&text_request(&["writer"])).await.unwrap();
    let second = pipeline.generate(&text_request(&["writer"])).await.unwrap();

    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert!(second.attempts.is_empty());
    assert_eq!(writer.calls(), 1);
    assert_eq!(first.checksum, second.checksum);
    assert_eq!(first.artifact, second.artifact);
}

#[tokio::test]
async fn whitespace_only_payload_edits_hit_the_cache() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let writer = ScriptedProvider::text("writer", vec![Step::Text(article(300))]);
    let pipeline = pipeline(&config, &[writer.clone()], Arc::new(MemoryRecordStore::default()));
    let target = TargetIdentity::new("M1", "en", "textbook");

    let tidy = GenerationRequest::text(target.clone(), "Explain photosynthesis.\n\nKeep it short.")
        .with_providers(["writer"]);
    let messy = GenerationRequest::text(
        target,
        "  Explain   photosynthesis.\r\n\r\n\r\nKeep it short.  \n",
    )
    .with_providers(["writer"]);

    pipeline.generate(&tidy).await.unwrap();
    let result = pipeline.generate(&messy).await.unwrap();

    assert!(result.cache_hit);
    assert_eq!(writer.calls(), 1);
}

#[tokio::test]
async fn provider_order_does_not_change_the_key() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let a = ScriptedProvider::text("a", vec![Step::Text(article(300))]);
    let b = ScriptedProvider::text("b", vec![Step::Text(article(300))]);
    let pipeline = pipeline(
        &config,
        &[a.clone(), b.clone()],
        Arc::new(MemoryRecordStore::default()),
    );

    let first = pipeline.generate(&text_request(&["a", "b"])).await.unwrap();
    let second = pipeline.generate(&text_request(&["b", "a"])).await.unwrap();

    assert!(second.cache_hit);
    assert_eq!(first.checksum, second.checksum);
    assert_eq!(a.calls() + b.calls(), 1);
}

#[tokio::test]
async fn changed_options_regenerate() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let writer = ScriptedProvider::text(
        "writer",
        vec![Step::Text(article(300)), Step::Text(article(400))],
    );
    let records = Arc::new(MemoryRecordStore::default());
    let pipeline = pipeline(&config, &[writer.clone()], records.clone());

    let first = pipeline.generate(&text_request(&["writer"])).await.unwrap();
    let warmer = text_request(&["writer"]).with_options(GenerationOptions {
        temperature: Some(0.9),
        ..GenerationOptions::default()
    });
    let second = pipeline.generate(&warmer).await.unwrap();

    assert!(!second.cache_hit);
    assert_ne!(first.checksum, second.checksum);
    assert_eq!(writer.calls(), 2);
    assert_eq!(records.len(), 1);

    let stored = records
        .find_latest(&contentforge::generation::conflict_key(
            contentforge::generation::ContentKind::Text,
            &TargetIdentity::new("M1", "en", "textbook"),
        ))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.checksum(), Some(second.checksum.as_str()));
}

#[tokio::test]
async fn forced_fallback_does_not_replace_provider_artifact() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let writer = ScriptedProvider::text("writer", vec![Step::Text(article(300))]);
    let pipeline = pipeline(&config, &[writer.clone()], Arc::new(MemoryRecordStore::default()));

    let original = pipeline.generate(&text_request(&["writer"])).await.unwrap();
    let original_artifact = original.artifact.unwrap();

    writer.push(Step::Fail("provider down".into()));
    let forced = text_request(&["writer"]).with_options(GenerationOptions {
        force_regenerate: true,
        ..GenerationOptions::default()
    });
    let retried = pipeline.generate(&forced).await.unwrap();

    assert!(retried.used_fallback);
    assert_eq!(writer.calls(), 2);
    assert_eq!(retried.provider.as_deref(), Some("writer"));
    assert_eq!(retried.model.as_deref(), Some("scripted-text-1"));
    assert!(retried.content.is_none());
    let kept = retried.artifact.unwrap();
    assert_eq!(kept.source_tag, SourceTag::Provider("writer".into()));
    assert_eq!(kept.storage_location, original_artifact.storage_location);
    assert_eq!(kept, original_artifact);

    let text_blobs = std::fs::read_dir(config.blob_dir().join("text"))
        .unwrap()
        .count();
    assert_eq!(text_blobs, 1);

    let body = pipeline.load_content(&kept).await.unwrap();
    assert_eq!(body.as_text(), Some(article(300).as_str()));
}

#[tokio::test]
async fn cached_fallback_is_retried_when_configured() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(&tmp);
    config.pipeline.regenerate_fallback = true;
    let writer = ScriptedProvider::text("writer", vec![Step::Timeout, Step::Text(article(300))]);
    let pipeline = pipeline(&config, &[writer.clone()], Arc::new(MemoryRecordStore::default()));

    let first = pipeline.generate(&text_request(&["writer"])).await.unwrap();
    let second = pipeline.generate(&text_request(&["writer"])).await.unwrap();

    assert!(first.used_fallback);
    assert!(!second.cache_hit);
    assert!(!second.used_fallback);
    assert_eq!(second.source_tag(), Some(&SourceTag::Provider("writer".into())));
}
