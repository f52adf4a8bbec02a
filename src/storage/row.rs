use crate::generation::types::{Artifact, ContentKind, SourceTag, TargetIdentity};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Fields a record cannot exist without. Never shed.
pub const ESSENTIAL_FIELDS: [&str; 10] = [
    "conflict_key",
    "kind",
    "subject_id",
    "locale",
    "variant",
    "slot",
    "checksum",
    "storage_location",
    "source_tag",
    "created_at",
];

/// Free-form fields stripped together on malformed-payload rejections.
pub const RICH_FIELDS: [&str; 3] = ["metadata", "prompt_excerpt", "anchors"];

pub fn is_essential(field: &str) -> bool {
    ESSENTIAL_FIELDS.contains(&field)
}

/// One artifact record as an ordered field map. Values are JSON scalars;
/// nested values are stored as JSON text by backends that need it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArtifactRow {
    fields: BTreeMap<String, Value>,
}

impl ArtifactRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Remove every present rich field, returning the names removed.
    pub fn strip_rich_fields(&mut self) -> Vec<String> {
        RICH_FIELDS
            .iter()
            .filter(|field| self.fields.remove(**field).is_some())
            .map(|field| (*field).to_string())
            .collect()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Essential fields plus the optional columns an artifact carries itself.
    pub fn from_artifact(artifact: &Artifact, conflict_key: &str) -> Self {
        let mut row = Self::new()
            .with("conflict_key", conflict_key)
            .with("kind", artifact.kind.to_string())
            .with("subject_id", artifact.target.subject_id.as_str())
            .with("locale", artifact.target.locale.as_str())
            .with("variant", artifact.target.variant.as_str())
            .with("slot", artifact.target.slot.clone())
            .with("checksum", artifact.checksum.as_str())
            .with("storage_location", artifact.storage_location.clone())
            .with("source_tag", artifact.source_tag.as_str())
            .with("created_at", artifact.created_at.to_rfc3339())
            .with("used_fallback", artifact.is_fallback());
        if let Some(model) = &artifact.model {
            row.set("model", model.as_str());
        }
        if let Some(mime_type) = &artifact.mime_type {
            row.set("mime_type", mime_type.as_str());
        }
        if !artifact.metadata.is_null() {
            row.set("metadata", artifact.metadata.to_string());
        }
        row
    }

    /// Rebuild the artifact a stored row describes.
    pub fn to_artifact(&self) -> anyhow::Result<Artifact> {
        let required = |field: &str| {
            self.get_str(field)
                .with_context(|| format!("stored record is missing `{field}`"))
        };

        let kind = ContentKind::from_str(required("kind")?)
            .map_err(|e| anyhow::anyhow!("stored record has an unknown kind: {e}"))?;
        let mut target = TargetIdentity::new(
            required("subject_id")?,
            required("locale")?,
            required("variant")?,
        );
        target.slot = self
            .get_str("slot")
            .filter(|s| !s.is_empty())
            .map(String::from);

        let created_at = DateTime::parse_from_rfc3339(required("created_at")?)
            .context("stored record has an invalid created_at")?
            .with_timezone(&Utc);

        let metadata = match self.get("metadata") {
            Some(Value::String(raw)) => {
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
            }
            Some(other) => other.clone(),
            None => Value::Object(Map::new()),
        };

        Ok(Artifact {
            kind,
            target,
            checksum: required("checksum")?.to_string(),
            storage_location: self.get_str("storage_location").map(String::from),
            mime_type: self.get_str("mime_type").map(String::from),
            model: self.get_str("model").map(String::from),
            metadata,
            source_tag: SourceTag::from(required("source_tag")?),
            created_at,
        })
    }
}

/// A record as read back from a store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub conflict_key: String,
    pub row: ArtifactRow,
}

impl StoredRecord {
    pub fn checksum(&self) -> Option<&str> {
        self.row.get_str("checksum")
    }

    pub fn source_tag(&self) -> Option<SourceTag> {
        self.row.get_str("source_tag").map(SourceTag::from)
    }

    pub fn is_fallback(&self) -> bool {
        self.source_tag().is_some_and(|tag| tag.is_fallback())
    }

    pub fn to_artifact(&self) -> anyhow::Result<Artifact> {
        self.row.to_artifact()
    }
}
