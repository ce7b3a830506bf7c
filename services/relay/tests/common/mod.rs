//! Shared helpers for API integration tests.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use relay_service::{
    create_router, AppState, Config, ObjectStorage, StorageError, StorageRelay, StoredObject,
    UploadedFile,
};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

pub const API_KEY: &str = "test-api-key";
pub const BOUNDARY: &str = "----relay-integration-boundary";

/// One recorded call into the storage backend
#[derive(Debug, Clone)]
pub struct RecordedPut {
    pub name: String,
    pub folder: String,
    pub size: usize,
}

/// Storage fake that records every call.
///
/// Files whose name starts with `fail` are rejected; a `delay-<ms>` prefix
/// holds the upload for that many milliseconds.
#[derive(Default)]
pub struct SpyStorage {
    calls: Mutex<Vec<RecordedPut>>,
}

impl SpyStorage {
    pub fn calls(&self) -> Vec<RecordedPut> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStorage for SpyStorage {
    async fn put(&self, file: &UploadedFile, folder: &str) -> Result<StoredObject, StorageError> {
        self.calls.lock().unwrap().push(RecordedPut {
            name: file.original_name.clone(),
            folder: folder.to_string(),
            size: file.size,
        });

        if let Some(rest) = file.original_name.strip_prefix("delay-") {
            let millis: u64 = rest
                .split(|c: char| !c.is_ascii_digit())
                .next()
                .and_then(|d| d.parse().ok())
                .unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }

        if file.original_name.starts_with("fail") {
            return Err(StorageError::Backend("bucket unavailable".to_string()));
        }

        let key = format!("{folder}/{}", file.original_name);
        Ok(StoredObject {
            url: format!("https://files.example.com/{key}"),
            key,
        })
    }
}

pub struct TestApp {
    pub router: Router,
    pub storage: Arc<SpyStorage>,
}

impl TestApp {
    pub fn new() -> Self {
        let mut config = Config::default();
        config.api.api_key = API_KEY.to_string();
        config.s3.bucket = "test-bucket".to_string();

        let storage = Arc::new(SpyStorage::default());
        let relay = Arc::new(StorageRelay::new(storage.clone(), 4));
        let router = create_router(AppState::new(relay, &config), &config);

        Self { router, storage }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }
}

/// A part of a multipart body
pub enum Part {
    File {
        field: &'static str,
        name: String,
        data: Vec<u8>,
    },
    Text {
        field: &'static str,
        value: String,
    },
}

impl Part {
    pub fn file(field: &'static str, name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Part::File {
            field,
            name: name.into(),
            data: data.into(),
        }
    }

    pub fn text(field: &'static str, value: impl Into<String>) -> Self {
        Part::Text {
            field,
            value: value.into(),
        }
    }
}

pub fn multipart_body(parts: &[Part]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::File { field, name, data } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{field}\"; filename=\"{name}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
            Part::Text { field, value } => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{field}\"\r\n\r\n{value}")
                        .as_bytes(),
                );
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn upload_request(uri: &str, api_key: Option<&str>, parts: &[Part]) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
    if let Some(key) = api_key {
        builder = builder.header("x-api-key", key);
    }
    builder.body(Body::from(multipart_body(parts))).unwrap()
}
