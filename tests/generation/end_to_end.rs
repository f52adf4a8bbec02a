use contentforge::generation::{
    AttemptOutcome, GeneratedContent, GenerationRequest, SourceTag, TargetIdentity,
};
use contentforge::storage;
use tempfile::TempDir;

use super::provider_harness::{
    PNG_BYTES, ScriptedProvider, Step, article, pipeline, placeholder_text, test_config,
    text_request,
};

#[tokio::test]
async fn cascade_settles_on_third_provider_and_is_reused() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let records = storage::create_record_store(&config).await.unwrap();
    assert_eq!(records.name(), "sqlite");

    let p1 = ScriptedProvider::text("p1", vec![Step::Timeout]);
    let p2 = ScriptedProvider::text("p2", vec![Step::Text(placeholder_text())]);
    let p3 = ScriptedProvider::text("p3", vec![Step::Text(article(900))]);
    let pipeline = pipeline(&config, &[p1.clone(), p2.clone(), p3.clone()], records);
    let request = text_request(&["p1", "p2", "p3"]);

    let first = pipeline.generate(&request).await.unwrap();

    assert_eq!(first.provider.as_deref(), Some("p3"));
    assert_eq!(
        first.attempt_outcomes(),
        vec![
            ("p1", AttemptOutcome::ProviderError),
            ("p2", AttemptOutcome::RejectedByGate),
            ("p3", AttemptOutcome::Success),
        ]
    );
    let artifact = first.artifact.clone().unwrap();
    assert_eq!(artifact.source_tag, SourceTag::Provider("p3".into()));
    assert_eq!(artifact.checksum, first.checksum);
    let location = artifact.storage_location.clone().unwrap();
    assert!(location.starts_with("text/"));
    assert!(location.ends_with(".md"));
    assert!(tmp.path().join("blobs").join(&location).exists());

    let second = pipeline.generate(&request).await.unwrap();

    assert!(second.cache_hit);
    assert!(second.attempts.is_empty());
    assert_eq!(second.artifact.as_ref(), Some(&artifact));
    assert_eq!((p1.calls(), p2.calls(), p3.calls()), (1, 1, 1));

    let body = pipeline.load_content(&artifact).await.unwrap();
    assert_eq!(body.as_text(), Some(article(900).as_str()));
}

#[tokio::test]
async fn image_bytes_are_stored_and_read_back() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let records = storage::create_record_store(&config).await.unwrap();
    let painter = ScriptedProvider::image(
        "painter",
        vec![Step::Image("application/octet-stream", PNG_BYTES.to_vec())],
    );
    let pipeline = pipeline(&config, &[painter], records);
    let request = GenerationRequest::image(
        TargetIdentity::new("M1", "en", "textbook").with_slot("hero"),
        "A leaf in sunlight, cross-section diagram",
    )
    .with_providers(["painter"]);

    let result = pipeline.generate(&request).await.unwrap();

    let artifact = result.artifact.unwrap();
    assert_eq!(artifact.mime_type.as_deref(), Some("image/png"));
    assert_eq!(artifact.target.slot.as_deref(), Some("hero"));
    assert!(artifact.storage_location.as_deref().unwrap().ends_with(".png"));
    let GeneratedContent::Images(images) = pipeline.load_content(&artifact).await.unwrap() else {
        panic!("expected image content");
    };
    assert_eq!(images[0].bytes, PNG_BYTES);
    assert_eq!(images[0].mime_type, "image/png");
}

#[tokio::test]
async fn failed_image_cascade_stores_svg_fallback() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let records = storage::create_record_store(&config).await.unwrap();
    let painter = ScriptedProvider::image("painter", vec![Step::Fail("500 server error".into())]);
    let pipeline = pipeline(&config, &[painter], records);
    let request = GenerationRequest::image(
        TargetIdentity::new("M1", "en", "textbook"),
        "A leaf in sunlight",
    )
    .with_providers(["painter"]);

    let result = pipeline.generate(&request).await.unwrap();

    assert!(result.used_fallback);
    let artifact = result.artifact.unwrap();
    assert!(artifact.is_fallback());
    assert_eq!(artifact.mime_type.as_deref(), Some("image/svg+xml"));
    assert!(artifact.storage_location.as_deref().unwrap().ends_with(".svg"));
    let GeneratedContent::Images(images) = pipeline.load_content(&artifact).await.unwrap() else {
        panic!("expected image content");
    };
    let svg = String::from_utf8(images[0].bytes.clone()).unwrap();
    assert!(svg.contains("<svg"));
}
