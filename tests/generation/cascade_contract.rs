use std::sync::Arc;

use contentforge::error::{ForgeError, ValidationError};
use contentforge::generation::{AttemptOutcome, ContentKind, SourceTag};
use contentforge::storage::MemoryRecordStore;
use tempfile::TempDir;

use super::provider_harness::{
    ScriptedProvider, Step, article, pipeline, placeholder_text, test_config, text_request,
};

#[tokio::test]
async fn first_accepted_output_stops_the_cascade() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(&tmp);
    config.reliability.max_attempts = 2;

    let a = ScriptedProvider::text("a", vec![Step::Fail("503 upstream".into()), Step::Timeout]);
    let b = ScriptedProvider::text("b", vec![Step::Text(article(300))]);
    let c = ScriptedProvider::text("c", vec![Step::Text(article(300))]);
    let pipeline = pipeline(
        &config,
        &[a.clone(), b.clone(), c.clone()],
        Arc::new(MemoryRecordStore::default()),
    );

    let result = pipeline.generate(&text_request(&["a", "b", "c"])).await.unwrap();

    assert_eq!(result.attempts.len(), 3);
    assert_eq!(
        result.attempt_outcomes(),
        vec![
            ("a", AttemptOutcome::ProviderError),
            ("a", AttemptOutcome::ProviderError),
            ("b", AttemptOutcome::Success),
        ]
    );
    assert_eq!(result.provider.as_deref(), Some("b"));
    assert_eq!(c.calls(), 0);
    assert!(!result.used_fallback);
}

#[tokio::test]
async fn failing_providers_still_yield_a_fallback_artifact() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let a = ScriptedProvider::text("a", vec![Step::Fail("boom".into())]);
    let b = ScriptedProvider::text("b", vec![Step::Timeout]);
    let pipeline = pipeline(&config, &[a, b], Arc::new(MemoryRecordStore::default()));

    let result = pipeline.generate(&text_request(&["a", "b"])).await.unwrap();

    assert!(result.success);
    assert!(result.used_fallback);
    assert_eq!(result.source_tag(), Some(&SourceTag::Fallback));
    assert_eq!(result.attempts.len(), 2);
    assert!(
        result
            .attempts
            .iter()
            .all(|attempt| attempt.outcome == AttemptOutcome::ProviderError)
    );
    let artifact = result.artifact.unwrap();
    assert!(artifact.storage_location.is_some());
    assert_eq!(artifact.mime_type.as_deref(), Some("text/markdown"));
}

#[tokio::test]
async fn gate_rejections_everywhere_still_yield_a_fallback_artifact() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let a = ScriptedProvider::text("a", vec![Step::Text(placeholder_text())]);
    let b = ScriptedProvider::text("b", vec![Step::Text("   \n\t ".into())]);
    let pipeline = pipeline(&config, &[a, b], Arc::new(MemoryRecordStore::default()));

    let result = pipeline.generate(&text_request(&["a", "b"])).await.unwrap();

    assert!(result.used_fallback);
    assert_eq!(
        result.attempt_outcomes(),
        vec![
            ("a", AttemptOutcome::RejectedByGate),
            ("b", AttemptOutcome::RejectedByGate),
        ]
    );
    let body = pipeline
        .load_content(result.artifact.as_ref().unwrap())
        .await
        .unwrap();
    let text = body.as_text().unwrap();
    assert!(!text.trim().is_empty());
    assert!(!text.contains("Coming soon"));
}

#[tokio::test]
async fn empty_provider_list_fails_before_any_call() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(&tmp);
    config.providers.text_order.clear();
    let a = ScriptedProvider::text("a", vec![Step::Text(article(300))]);
    let records = Arc::new(MemoryRecordStore::default());
    let pipeline = pipeline(&config, &[a.clone()], records.clone());

    let err = pipeline.generate(&text_request(&[])).await.unwrap_err();

    assert!(matches!(
        err,
        ForgeError::Validation(ValidationError::EmptyProviderList)
    ));
    assert_eq!(a.calls(), 0);
    assert!(records.is_empty());
}

#[tokio::test]
async fn image_provider_in_text_cascade_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let painter = ScriptedProvider::image("painter", Vec::new());
    let pipeline = pipeline(&config, &[painter.clone()], Arc::new(MemoryRecordStore::default()));

    let err = pipeline.generate(&text_request(&["painter"])).await.unwrap_err();

    assert!(matches!(
        err,
        ForgeError::Validation(ValidationError::KindMismatch { .. })
    ));
    assert_eq!(painter.calls(), 0);
}

#[tokio::test]
async fn placeholder_and_short_text_never_become_the_artifact() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let stub = ScriptedProvider::text("stub", vec![Step::Text(placeholder_text())]);
    let terse = ScriptedProvider::text("terse", vec![Step::Text("Plants make sugar.".into())]);
    let good = ScriptedProvider::text("good", vec![Step::Text(article(300))]);
    let pipeline = pipeline(
        &config,
        &[stub, terse, good],
        Arc::new(MemoryRecordStore::default()),
    );

    let result = pipeline
        .generate(&text_request(&["stub", "terse", "good"]))
        .await
        .unwrap();

    assert_eq!(result.provider.as_deref(), Some("good"));
    let details: Vec<&str> = result
        .attempts
        .iter()
        .filter_map(|attempt| attempt.error_detail.as_deref())
        .collect();
    assert_eq!(details.len(), 2);
    let stored = pipeline
        .load_content(result.artifact.as_ref().unwrap())
        .await
        .unwrap();
    assert_eq!(stored.as_text(), Some(article(300).as_str()));
}

#[tokio::test]
async fn providers_without_credentials_are_skipped() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let locked = ScriptedProvider::without_credentials("locked", ContentKind::Text);
    let open = ScriptedProvider::text("open", vec![Step::Text(article(300))]);
    let pipeline = pipeline(
        &config,
        &[locked.clone(), open],
        Arc::new(MemoryRecordStore::default()),
    );

    let result = pipeline
        .generate(&text_request(&["locked", "open"]))
        .await
        .unwrap();

    assert_eq!(result.skipped_providers, vec!["locked"]);
    assert_eq!(result.attempts.len(), 1);
    assert_eq!(locked.calls(), 0);
    assert_eq!(result.provider.as_deref(), Some("open"));
}
