//! Schema-adaptive record writes.
//!
//! The writer upserts a row and, when the backend rejects it, asks the
//! classifier what kind of rejection it was and applies the matching
//! shedding strategy: unknown fields are dropped one at a time, a malformed
//! payload strips the rich fields once. Essential fields are never dropped.

use super::classify::{RejectionKind, ShedStrategy, strategy_for};
use super::row::{ArtifactRow, StoredRecord, is_essential};
use super::traits::{RecordStore, StoreRejection};
use crate::error::{PersistenceError, PersistenceErrorKind};
use crate::generation::types::Artifact;
use std::sync::Arc;

pub const DEFAULT_MAX_SHED_ITERATIONS: usize = 5;

/// A successful write and what it cost.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub artifact: Artifact,
    pub record: StoredRecord,
    /// Fields removed from the row, in shedding order.
    pub shed_fields: Vec<String>,
}

pub struct SchemaAdaptiveWriter {
    store: Arc<dyn RecordStore>,
    max_shed_iterations: usize,
}

impl SchemaAdaptiveWriter {
    pub fn new(store: Arc<dyn RecordStore>, max_shed_iterations: usize) -> Self {
        Self {
            store,
            max_shed_iterations,
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub async fn write(
        &self,
        row: ArtifactRow,
        conflict_key: &str,
    ) -> Result<Artifact, PersistenceError> {
        self.write_detailed(row, conflict_key)
            .await
            .map(|outcome| outcome.artifact)
    }

    /// Upsert `row`, shedding at most `max_shed_iterations` times.
    pub async fn write_detailed(
        &self,
        mut row: ArtifactRow,
        conflict_key: &str,
    ) -> Result<WriteOutcome, PersistenceError> {
        let mut shed_fields: Vec<String> = Vec::new();
        let mut rich_stripped = false;

        for iteration in 0..=self.max_shed_iterations {
            let rejection = match self.store.upsert(&row, conflict_key).await {
                Ok(record) => {
                    let artifact = record.to_artifact().map_err(|e| {
                        PersistenceError::new(PersistenceErrorKind::Backend, format!("{e:#}"))
                            .with_shed_fields(shed_fields.clone())
                    })?;
                    if !shed_fields.is_empty() {
                        tracing::info!(
                            conflict_key,
                            store = self.store.name(),
                            shed = shed_fields.join(","),
                            "Record stored after shedding fields"
                        );
                    }
                    return Ok(WriteOutcome {
                        artifact,
                        record,
                        shed_fields,
                    });
                }
                Err(rejection) => rejection,
            };

            if iteration == self.max_shed_iterations {
                return Err(exhausted(
                    format!(
                        "gave up after {} shedding iterations: {}",
                        self.max_shed_iterations, rejection.message
                    ),
                    shed_fields,
                ));
            }

            match strategy_for(&rejection.kind) {
                ShedStrategy::Surface => {
                    return Err(PersistenceError::new(
                        PersistenceErrorKind::Backend,
                        rejection.message,
                    )
                    .with_shed_fields(shed_fields));
                }
                ShedStrategy::DropField => {
                    let field = unknown_field(&rejection);
                    if is_essential(field) {
                        return Err(PersistenceError::new(
                            PersistenceErrorKind::EssentialFieldRejected,
                            format!(
                                "backend rejected essential field `{field}`: {}",
                                rejection.message
                            ),
                        )
                        .with_shed_fields(shed_fields));
                    }
                    if row.remove(field).is_none() {
                        return Err(exhausted(
                            format!(
                                "rejected field `{field}` is not in the row: {}",
                                rejection.message
                            ),
                            shed_fields,
                        ));
                    }
                    tracing::warn!(
                        conflict_key,
                        field,
                        iteration = iteration + 1,
                        "Backend rejected unknown field, retrying without it"
                    );
                    shed_fields.push(field.to_string());
                }
                ShedStrategy::DropRichFields => {
                    if rich_stripped {
                        return Err(exhausted(
                            format!(
                                "payload still malformed without rich fields: {}",
                                rejection.message
                            ),
                            shed_fields,
                        ));
                    }
                    rich_stripped = true;
                    let removed = row.strip_rich_fields();
                    if removed.is_empty() {
                        return Err(exhausted(
                            format!(
                                "malformed payload and no rich fields to strip: {}",
                                rejection.message
                            ),
                            shed_fields,
                        ));
                    }
                    tracing::warn!(
                        conflict_key,
                        fields = removed.join(","),
                        "Backend rejected payload encoding, retrying without rich fields"
                    );
                    shed_fields.extend(removed);
                }
            }
        }

        Err(exhausted("no write attempted".to_string(), shed_fields))
    }
}

fn unknown_field(rejection: &StoreRejection) -> &str {
    match &rejection.kind {
        RejectionKind::UnknownField(field) => field,
        RejectionKind::MalformedPayload | RejectionKind::Other => "",
    }
}

fn exhausted(message: String, shed_fields: Vec<String>) -> PersistenceError {
    PersistenceError::new(PersistenceErrorKind::SchemaMismatchExhausted, message)
        .with_shed_fields(shed_fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryRecordStore;
    use crate::storage::row::ESSENTIAL_FIELDS;
    use serde_json::Value;

    fn full_row() -> ArtifactRow {
        ArtifactRow::new()
            .with("conflict_key", "text:M1:en:textbook")
            .with("kind", "text")
            .with("subject_id", "M1")
            .with("locale", "en")
            .with("variant", "textbook")
            .with("slot", Value::Null)
            .with("checksum", "abc")
            .with("storage_location", "text/abc.md")
            .with("source_tag", "openai")
            .with("created_at", "2026-01-02T03:04:05Z")
            .with("model", "gpt-4o-mini")
            .with("content_sha256", "def")
            .with("metadata", "{\"attempt_count\":1}")
            .with("prompt_excerpt", "Explain photosynthesis")
            .with("anchors", "[]")
    }

    fn writer(
        store: MemoryRecordStore,
        max: usize,
    ) -> (Arc<MemoryRecordStore>, SchemaAdaptiveWriter) {
        let store = Arc::new(store);
        let writer = SchemaAdaptiveWriter::new(store.clone(), max);
        (store, writer)
    }

    #[tokio::test]
    async fn accepted_row_is_written_unchanged() {
        let (store, writer) = writer(MemoryRecordStore::default(), 5);
        let outcome = writer
            .write_detailed(full_row(), "text:M1:en:textbook")
            .await
            .unwrap();
        assert!(outcome.shed_fields.is_empty());
        assert_eq!(outcome.record.row, full_row());
        assert_eq!(outcome.artifact.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(store.write_attempts().len(), 1);
    }

    #[tokio::test]
    async fn unknown_fields_are_shed_one_at_a_time() {
        let mut columns: Vec<&str> = ESSENTIAL_FIELDS.to_vec();
        columns.extend(["model", "metadata", "prompt_excerpt"]);
        let (store, writer) = writer(MemoryRecordStore::default().with_columns(columns), 5);

        let outcome = writer
            .write_detailed(full_row(), "text:M1:en:textbook")
            .await
            .unwrap();

        assert_eq!(outcome.shed_fields, vec!["anchors", "content_sha256"]);
        let stored = &outcome.record.row;
        assert!(!stored.contains("anchors"));
        assert!(!stored.contains("content_sha256"));
        let mut expected = full_row();
        expected.remove("anchors");
        expected.remove("content_sha256");
        assert_eq!(stored, &expected);
        assert_eq!(store.write_attempts().len(), 3);
    }

    #[tokio::test]
    async fn essential_field_rejection_is_surfaced() {
        let columns: Vec<&str> = ESSENTIAL_FIELDS
            .iter()
            .copied()
            .filter(|field| *field != "checksum")
            .chain(["model", "content_sha256", "metadata", "prompt_excerpt", "anchors"])
            .collect();
        let (_, writer) = writer(MemoryRecordStore::default().with_columns(columns), 5);

        let err = writer
            .write(full_row(), "text:M1:en:textbook")
            .await
            .unwrap_err();
        assert_eq!(err.kind, PersistenceErrorKind::EssentialFieldRejected);
        assert!(err.message.contains("checksum"));
    }

    #[tokio::test]
    async fn shedding_is_bounded() {
        let (store, writer) = writer(
            MemoryRecordStore::default().with_columns(ESSENTIAL_FIELDS),
            2,
        );
        let err = writer
            .write(full_row(), "text:M1:en:textbook")
            .await
            .unwrap_err();
        assert_eq!(err.kind, PersistenceErrorKind::SchemaMismatchExhausted);
        assert_eq!(err.shed_fields.len(), 2);
        assert!(err.is_schema_mismatch());
        assert_eq!(store.write_attempts().len(), 3);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_strips_rich_fields_once() {
        let (_, writer) = writer(MemoryRecordStore::default().with_payload_limit(40), 5);
        let row = full_row().with("prompt_excerpt", "x".repeat(200));

        let outcome = writer.write_detailed(row, "text:M1:en:textbook").await.unwrap();
        assert_eq!(
            outcome.shed_fields,
            vec!["metadata", "prompt_excerpt", "anchors"]
        );
        assert!(outcome.record.row.contains("model"));
    }

    #[tokio::test]
    async fn malformed_payload_after_stripping_is_exhausted() {
        let (_, writer) = writer(MemoryRecordStore::default().with_payload_limit(4), 5);
        let err = writer
            .write(full_row(), "text:M1:en:textbook")
            .await
            .unwrap_err();
        assert_eq!(err.kind, PersistenceErrorKind::SchemaMismatchExhausted);
        assert!(err.message.contains("without rich fields"));
    }
}
