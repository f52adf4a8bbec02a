use super::traits::BlobStore;
use anyhow::Context;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

/// Artifact bodies as files under one root directory.
///
/// Locations are root-relative keys such as `text/<checksum>.md`. Writes go
/// to a temporary sibling first and are renamed into place, so readers never
/// observe a partial body.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> anyhow::Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

/// Keys are `/`-separated segments of `[A-Za-z0-9._-]`, never `.` or `..`.
fn validate_key(key: &str) -> anyhow::Result<()> {
    anyhow::ensure!(!key.is_empty(), "blob key is empty");
    for segment in key.split('/') {
        anyhow::ensure!(
            !segment.is_empty() && segment != "." && segment != "..",
            "invalid blob key: {key}"
        );
        anyhow::ensure!(
            segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')),
            "invalid blob key: {key}"
        );
    }
    Ok(())
}

impl BlobStore for FsBlobStore {
    fn put<'a>(
        &'a self,
        key: &'a str,
        bytes: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let path = self.resolve(key)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| {
                        format!("Failed to create blob directory: {}", parent.display())
                    })?;
            }

            let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
            tokio::fs::write(&tmp, bytes)
                .await
                .with_context(|| format!("Failed to write blob: {}", tmp.display()))?;
            if let Err(e) = tokio::fs::rename(&tmp, &path).await {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(e).with_context(|| format!("Failed to move blob into place: {key}"));
            }

            tracing::debug!(key, bytes = bytes.len(), "Stored blob");
            Ok(key.to_string())
        })
    }

    fn get<'a>(
        &'a self,
        location: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<u8>>> + Send + 'a>> {
        Box::pin(async move {
            let path = self.resolve(location)?;
            tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read blob: {location}"))
        })
    }
}
