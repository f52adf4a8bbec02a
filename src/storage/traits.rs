use super::classify::{RejectionKind, classify};
use super::row::{ArtifactRow, StoredRecord};
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// A write the backend refused, classified once at the store boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRejection {
    pub kind: RejectionKind,
    pub message: String,
}

impl StoreRejection {
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: classify(&message),
            message,
        }
    }
}

impl fmt::Display for StoreRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl std::error::Error for StoreRejection {}

/// Record persistence contract for artifact rows.
pub trait RecordStore: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the backend enforces one record per conflict key. When it
    /// does not, writes degrade to update-latest-or-insert.
    fn enforces_uniqueness(&self) -> bool;

    /// Insert-or-replace the record for `conflict_key`. A fallback row never
    /// replaces a non-fallback row carrying the same checksum; in that case
    /// the existing record is returned unchanged.
    fn upsert<'a>(
        &'a self,
        row: &'a ArtifactRow,
        conflict_key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<StoredRecord, StoreRejection>> + Send + 'a>>;

    /// Latest record for `conflict_key`, if any.
    fn find_latest<'a>(
        &'a self,
        conflict_key: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<StoredRecord>>> + Send + 'a>>;
}

/// Artifact body storage addressed by relative key.
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key` and return the location to persist.
    fn put<'a>(
        &'a self,
        key: &'a str,
        bytes: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>>;

    fn get<'a>(
        &'a self,
        location: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<u8>>> + Send + 'a>>;
}

/// Whether `incoming` may replace `existing` under the conflict policy.
pub fn may_replace(existing: &StoredRecord, incoming: &ArtifactRow) -> bool {
    let incoming_is_fallback = incoming.get_str("source_tag") == Some("fallback");
    !(incoming_is_fallback
        && !existing.is_fallback()
        && existing.checksum().is_some()
        && existing.checksum() == incoming.get_str("checksum"))
}
