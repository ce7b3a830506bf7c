//! Storage relay: hands buffered files to an [`ObjectStorage`] backend and
//! reports a per-file outcome.

use crate::upload::UploadedFile;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Errors reported by a storage backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),
}

/// Where a stored object ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
}

/// Anything that can store a named byte buffer under a folder
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put(&self, file: &UploadedFile, folder: &str) -> Result<StoredObject, StorageError>;
}

/// Outcome of relaying one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadResult {
    pub fn stored(object: StoredObject) -> Self {
        Self {
            success: true,
            key: Some(object.key),
            url: Some(object.url),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            key: None,
            url: None,
            error: Some(error.into()),
        }
    }
}

/// Forwards uploads to the configured backend
pub struct StorageRelay {
    storage: Arc<dyn ObjectStorage>,
    concurrency: usize,
}

impl StorageRelay {
    pub fn new(storage: Arc<dyn ObjectStorage>, concurrency: usize) -> Self {
        Self {
            storage,
            concurrency: concurrency.max(1),
        }
    }

    /// Upload one file
    #[instrument(skip(self, file), fields(file_name = %file.original_name, size_bytes = file.size))]
    pub async fn upload_file(&self, file: &UploadedFile, folder: &str) -> UploadResult {
        metrics::histogram!("relay_upload_bytes").record(file.size as f64);

        match self.storage.put(file, folder).await {
            Ok(object) => {
                metrics::counter!("relay_uploads_total", "outcome" => "success").increment(1);
                info!(key = %object.key, "File relayed to storage");
                UploadResult::stored(object)
            }
            Err(e) => {
                metrics::counter!("relay_uploads_total", "outcome" => "failure").increment(1);
                warn!(error = %e, "File relay failed");
                UploadResult::failed(e.to_string())
            }
        }
    }

    /// Upload several files concurrently; results come back in input order
    #[instrument(skip(self, files), fields(file_count = files.len()))]
    pub async fn upload_files(&self, files: &[UploadedFile], folder: &str) -> Vec<UploadResult> {
        let uploads: Vec<_> = files
            .iter()
            .map(|file| self.upload_file(file, folder))
            .collect();

        stream::iter(uploads)
            .buffered(self.concurrency)
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str) -> UploadedFile {
        UploadedFile::new(name, "text/plain", name.as_bytes().to_vec())
    }

    fn stored_under(file: &UploadedFile, folder: &str) -> StoredObject {
        let key = format!("{folder}/{}", file.original_name);
        StoredObject {
            url: format!("https://cdn.example.com/{key}"),
            key,
        }
    }

    #[tokio::test]
    async fn test_upload_file_success() {
        let mut storage = MockObjectStorage::new();
        storage
            .expect_put()
            .withf(|file, folder| file.original_name == "a.txt" && folder == "docs")
            .times(1)
            .returning(|file, folder| Ok(stored_under(file, folder)));

        let relay = StorageRelay::new(Arc::new(storage), 2);
        let result = relay.upload_file(&file("a.txt"), "docs").await;

        assert!(result.success);
        assert_eq!(result.key.as_deref(), Some("docs/a.txt"));
        assert_eq!(
            result.url.as_deref(),
            Some("https://cdn.example.com/docs/a.txt")
        );
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_upload_file_failure_carries_message() {
        let mut storage = MockObjectStorage::new();
        storage
            .expect_put()
            .returning(|_, _| Err(StorageError::Backend("access denied".to_string())));

        let relay = StorageRelay::new(Arc::new(storage), 2);
        let result = relay.upload_file(&file("a.txt"), "uploads").await;

        assert!(!result.success);
        assert!(result.key.is_none());
        assert_eq!(
            result.error.as_deref(),
            Some("Storage backend error: access denied")
        );
    }

    #[tokio::test]
    async fn test_upload_files_partial_failure_keeps_order() {
        let mut storage = MockObjectStorage::new();
        storage
            .expect_put()
            .times(3)
            .returning(|file, folder| {
                if file.original_name == "bad.txt" {
                    Err(StorageError::Backend("boom".to_string()))
                } else {
                    Ok(stored_under(file, folder))
                }
            });

        let relay = StorageRelay::new(Arc::new(storage), 3);
        let files = vec![file("one.txt"), file("bad.txt"), file("three.txt")];
        let results = relay.upload_files(&files, "batch").await;

        let outcomes: Vec<_> = results.iter().map(|r| r.success).collect();
        assert_eq!(outcomes, [true, false, true]);
        assert_eq!(results[0].key.as_deref(), Some("batch/one.txt"));
        assert_eq!(results[2].key.as_deref(), Some("batch/three.txt"));
    }

    #[tokio::test]
    async fn test_upload_files_uses_given_folder() {
        let mut storage = MockObjectStorage::new();
        storage
            .expect_put()
            .withf(|_, folder| folder == "reports")
            .times(2)
            .returning(|file, folder| Ok(stored_under(file, folder)));

        let relay = StorageRelay::new(Arc::new(storage), 1);
        let results = relay
            .upload_files(&[file("x"), file("y")], "reports")
            .await;
        assert!(results.iter().all(|r| r.success));
    }

    #[test]
    fn test_result_serialization_omits_absent_fields() {
        let json = serde_json::to_value(UploadResult::failed("nope")).unwrap();
        assert_eq!(json, serde_json::json!({ "success": false, "error": "nope" }));
    }
}
