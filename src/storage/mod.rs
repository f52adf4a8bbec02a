pub mod blob;
pub mod classify;
pub mod memory;
pub mod row;
pub mod sqlite;
pub mod traits;
pub mod writer;

pub use blob::FsBlobStore;
pub use classify::{RejectionKind, ShedStrategy, classify, strategy_for};
pub use memory::MemoryRecordStore;
pub use row::{ArtifactRow, ESSENTIAL_FIELDS, RICH_FIELDS, StoredRecord};
pub use sqlite::SqliteRecordStore;
pub use traits::{BlobStore, RecordStore, StoreRejection, may_replace};
pub use writer::{SchemaAdaptiveWriter, WriteOutcome};

use crate::config::{Config, StorageBackend};
use std::sync::Arc;

/// Open the record store selected by `[storage] backend`.
pub async fn create_record_store(config: &Config) -> anyhow::Result<Arc<dyn RecordStore>> {
    let table = config.storage.table.as_str();
    match config.storage.backend {
        StorageBackend::Sqlite => {
            let store = SqliteRecordStore::open(&config.db_path(), table).await?;
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => Ok(Arc::new(MemoryRecordStore::new(table))),
    }
}

pub fn create_blob_store(config: &Config) -> Arc<dyn BlobStore> {
    Arc::new(FsBlobStore::new(config.blob_dir()))
}
