//! Relay Service
//!
//! Authenticated HTTP upload relay in front of S3-compatible object storage.
//! Clients post `multipart/form-data` bodies; the service buffers each file in
//! memory, stores it in the configured bucket and answers with the object key
//! and its public URL.
//!
//! ## Features
//!
//! - **API-key gate**: every upload route requires a shared secret header
//! - **Bounded uploads**: per-file size ceiling and a maximum batch size,
//!   enforced while the body is read
//! - **Ordered batches**: files in a batch upload concurrently, results are
//!   reported in submission order with per-file success or failure
//! - **Pluggable storage**: the relay talks to an [`ObjectStorage`] trait;
//!   [`S3Storage`] is the production implementation
//!
//! ## Architecture
//!
//! ```text
//!  Client
//!    │ POST /api/s3/upload, /api/s3/upload-multiple
//!    ▼
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Access Gate  │──▶│ Upload       │──▶│ Storage      │──▶│ S3 Bucket    │
//! │ (x-api-key)  │   │ Adapter      │   │ Relay        │   │ {folder}/... │
//! └──────────────┘   └──────────────┘   └──────────────┘   └──────────────┘
//!        │ 401              │ 400              │ key/url or error
//!        ▼                  ▼                  ▼
//!                    JSON response shaping
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod relay;
pub mod s3_uploader;
pub mod upload;

pub use api::{create_router, start_api_server, ApiError, AppState};
pub use config::Config;
pub use relay::{ObjectStorage, StorageError, StorageRelay, StoredObject, UploadResult};
pub use s3_uploader::S3Storage;
pub use upload::{UploadError, UploadLimits, UploadedFile};
