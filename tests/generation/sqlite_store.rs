use std::sync::Arc;

use contentforge::generation::{ContentKind, SourceTag, TargetIdentity, conflict_key};
use contentforge::storage::{RecordStore, SqliteRecordStore};
use sqlx::sqlite::SqlitePoolOptions;
use tempfile::TempDir;

use super::provider_harness::{ScriptedProvider, Step, article, pipeline, test_config, text_request};

const LEGACY_DDL: &str = "CREATE TABLE artifacts (
    conflict_key TEXT, kind TEXT, subject_id TEXT, locale TEXT,
    variant TEXT, slot TEXT, checksum TEXT, storage_location TEXT,
    source_tag TEXT, created_at TEXT, model TEXT, mime_type TEXT,
    metadata TEXT, used_fallback INTEGER
)";

fn key() -> String {
    conflict_key(ContentKind::Text, &TargetIdentity::new("M1", "en", "textbook"))
}

#[tokio::test]
async fn legacy_table_sheds_columns_it_lacks() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let url = format!("sqlite://{}?mode=rwc", config.db_path().display());
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&url)
        .await
        .unwrap();
    sqlx::query(LEGACY_DDL).execute(&pool).await.unwrap();

    let records = Arc::new(SqliteRecordStore::from_pool(pool, "artifacts").await.unwrap());
    assert!(!records.enforces_uniqueness());
    let writer = ScriptedProvider::text("writer", vec![Step::Text(article(300))]);
    let pipeline = pipeline(&config, &[writer.clone()], records.clone());

    let first = pipeline.generate(&text_request(&["writer"])).await.unwrap();
    let second = pipeline.generate(&text_request(&["writer"])).await.unwrap();

    let stored = records.find_latest(&key()).await.unwrap().unwrap();
    assert_eq!(stored.checksum(), Some(first.checksum.as_str()));
    assert_eq!(stored.source_tag(), Some(SourceTag::Provider("writer".into())));
    assert!(!stored.row.contains("prompt_excerpt"));
    assert!(!stored.row.contains("content_sha256"));
    assert!(stored.row.contains("metadata"));
    assert_eq!(stored.row.get_str("model"), Some("scripted-text-1"));
    assert!(second.cache_hit);
    assert_eq!(writer.calls(), 1);
}

#[tokio::test]
async fn stored_artifacts_survive_a_restart() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let request = text_request(&["writer"]);

    let first = {
        let records = SqliteRecordStore::open(&config.db_path(), "artifacts").await.unwrap();
        let writer = ScriptedProvider::text("writer", vec![Step::Text(article(300))]);
        let pipeline = pipeline(&config, &[writer], Arc::new(records));
        pipeline.generate(&request).await.unwrap()
    };

    let records = SqliteRecordStore::open(&config.db_path(), "artifacts").await.unwrap();
    assert!(records.enforces_uniqueness());
    let writer = ScriptedProvider::text("writer", vec![Step::Text(article(400))]);
    let pipeline = pipeline(&config, &[writer.clone()], Arc::new(records));
    let second = pipeline.generate(&request).await.unwrap();

    assert!(second.cache_hit);
    assert_eq!(writer.calls(), 0);
    assert_eq!(second.artifact, first.artifact);
    let body = pipeline
        .load_content(second.artifact.as_ref().unwrap())
        .await
        .unwrap();
    assert_eq!(body.as_text(), Some(article(300).as_str()));
}

#[tokio::test]
async fn one_row_per_target_after_regeneration() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let records = Arc::new(
        SqliteRecordStore::open(&config.db_path(), "artifacts")
            .await
            .unwrap(),
    );
    let writer = ScriptedProvider::text(
        "writer",
        vec![Step::Text(article(300)), Step::Text(article(400))],
    );
    let pipeline = pipeline(&config, &[writer], records.clone());

    pipeline.generate(&text_request(&["writer"])).await.unwrap();
    let mut changed = text_request(&["writer"]);
    changed.payload.push_str(" Include a diagram legend.");
    let latest = pipeline.generate(&changed).await.unwrap();

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM artifacts")
        .fetch_one(records.pool())
        .await
        .unwrap();
    assert_eq!(count, 1);
    let stored = records.find_latest(&key()).await.unwrap().unwrap();
    assert_eq!(stored.checksum(), Some(latest.checksum.as_str()));
}
