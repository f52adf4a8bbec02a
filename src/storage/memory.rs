use super::row::{ArtifactRow, StoredRecord};
use super::traits::{RecordStore, StoreRejection, may_replace};
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};

/// In-process record store.
///
/// By default it accepts any field and enforces one record per conflict key.
/// `with_columns` restricts the accepted field set and `with_payload_limit`
/// caps the encoded size of a single value, which is how a lagging remote
/// schema is reproduced without a real backend.
pub struct MemoryRecordStore {
    table: String,
    columns: Option<BTreeSet<String>>,
    max_value_bytes: Option<usize>,
    unique: bool,
    records: Mutex<Vec<StoredRecord>>,
    write_attempts: Mutex<Vec<Vec<String>>>,
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new("artifacts")
    }
}

impl MemoryRecordStore {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: None,
            max_value_bytes: None,
            unique: true,
            records: Mutex::new(Vec::new()),
            write_attempts: Mutex::new(Vec::new()),
        }
    }

    /// Accept only these fields.
    #[must_use]
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Reject any single value whose JSON encoding exceeds `max_bytes`.
    #[must_use]
    pub fn with_payload_limit(mut self, max_bytes: usize) -> Self {
        self.max_value_bytes = Some(max_bytes);
        self
    }

    /// Without uniqueness every write for a new key inserts and later writes
    /// update the latest row for that key.
    #[must_use]
    pub fn without_uniqueness(mut self) -> Self {
        self.unique = false;
        self
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Field names of every upsert attempt, in order, including rejected ones.
    pub fn write_attempts(&self) -> Vec<Vec<String>> {
        self.write_attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn check_row(&self, row: &ArtifactRow) -> Result<(), StoreRejection> {
        if let Some(columns) = &self.columns
            && let Some(unknown) = row.field_names().find(|name| !columns.contains(*name))
        {
            return Err(StoreRejection::from_message(format!(
                "table {} has no column named {unknown}",
                self.table
            )));
        }

        if let Some(limit) = self.max_value_bytes
            && row.iter().any(|(_, value)| value.to_string().len() > limit)
        {
            return Err(StoreRejection::from_message("string or blob too big"));
        }

        Ok(())
    }

    fn store(&self, row: &ArtifactRow, conflict_key: &str) -> StoredRecord {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let incoming = StoredRecord {
            conflict_key: conflict_key.to_string(),
            row: row.clone(),
        };

        let latest = records
            .iter_mut()
            .rev()
            .find(|record| record.conflict_key == conflict_key);
        match latest {
            Some(existing) if !may_replace(existing, row) => existing.clone(),
            Some(existing) => {
                *existing = incoming.clone();
                incoming
            }
            None => {
                records.push(incoming.clone());
                incoming
            }
        }
    }
}

impl RecordStore for MemoryRecordStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn enforces_uniqueness(&self) -> bool {
        self.unique
    }

    fn upsert<'a>(
        &'a self,
        row: &'a ArtifactRow,
        conflict_key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<StoredRecord, StoreRejection>> + Send + 'a>> {
        Box::pin(async move {
            self.write_attempts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(row.field_names().map(String::from).collect());
            self.check_row(row)?;
            Ok(self.store(row, conflict_key))
        })
    }

    fn find_latest<'a>(
        &'a self,
        conflict_key: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<StoredRecord>>> + Send + 'a>> {
        Box::pin(async move {
            let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
            Ok(records
                .iter()
                .rev()
                .find(|record| record.conflict_key == conflict_key)
                .cloned())
        })
    }
}
