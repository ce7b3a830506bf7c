//! Multipart body adapter.
//!
//! Turns a `multipart/form-data` request into in-memory [`UploadedFile`]
//! buffers, enforcing the per-file size ceiling and the batch size before
//! anything reaches storage.

use crate::config::UploadConfig;
use axum::body::Bytes;
use axum::extract::multipart::{Field, Multipart, MultipartError};
use axum::http::StatusCode;
use thiserror::Error;
use tracing::debug;

/// Form field carrying the file on the single-file endpoint
pub const SINGLE_FILE_FIELD: &str = "file";
/// Form field carrying the files on the multi-file endpoint
pub const MULTI_FILE_FIELD: &str = "files";
/// Optional text field naming the destination folder
pub const FOLDER_FIELD: &str = "folder";

/// Errors produced while reading an upload request
#[derive(Error, Debug, PartialEq, Eq)]
pub enum UploadError {
    #[error("No file provided")]
    NoFile,

    #[error("No files provided")]
    NoFiles,

    #[error("Too many files: at most {max} files per request")]
    TooManyFiles { max: usize },

    #[error("File {name} exceeds the maximum size of {limit} bytes")]
    FileTooLarge { name: String, limit: usize },

    #[error("Unexpected field: {0}")]
    UnexpectedField(String),

    #[error("Request body exceeds the allowed size")]
    PayloadTooLarge,

    #[error("Malformed multipart body: {0}")]
    Malformed(String),
}

/// A file held in memory for the duration of one request
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedFile {
    pub buffer: Bytes,
    pub original_name: String,
    pub content_type: String,
    pub size: usize,
}

impl UploadedFile {
    pub fn new(
        original_name: impl Into<String>,
        content_type: impl Into<String>,
        buffer: impl Into<Bytes>,
    ) -> Self {
        let buffer = buffer.into();
        Self {
            size: buffer.len(),
            buffer,
            original_name: original_name.into(),
            content_type: content_type.into(),
        }
    }
}

/// Parsed body of a single-file request
#[derive(Debug)]
pub struct SingleUpload {
    pub file: UploadedFile,
    pub folder: String,
}

/// Parsed body of a multi-file request, files in submission order
#[derive(Debug)]
pub struct MultiUpload {
    pub files: Vec<UploadedFile>,
    pub folder: String,
}

/// Limits applied while reading multipart bodies
#[derive(Debug, Clone)]
pub struct UploadLimits {
    pub max_file_size: usize,
    pub max_files: usize,
    pub default_folder: String,
}

impl From<&UploadConfig> for UploadLimits {
    fn from(config: &UploadConfig) -> Self {
        Self {
            max_file_size: config.max_file_size_bytes,
            max_files: config.max_files,
            default_folder: config.default_folder.clone(),
        }
    }
}

impl UploadLimits {
    fn folder_or_default(&self, folder: Option<String>) -> String {
        match folder {
            Some(f) if !f.trim().is_empty() => f.trim().to_string(),
            _ => self.default_folder.clone(),
        }
    }
}

/// Read the `file` part and optional `folder` of a single-file request
pub async fn parse_single(
    mut multipart: Multipart,
    limits: &UploadLimits,
) -> Result<SingleUpload, UploadError> {
    let mut file = None;
    let mut folder = None;

    while let Some(field) = next_field(&mut multipart).await? {
        let name = field.name().unwrap_or_default().to_string();

        // Only parts with a filename are files; other text parts are ignored
        if field.file_name().is_none() {
            if name == FOLDER_FIELD {
                folder = Some(read_text(field).await?);
            }
        } else if name == SINGLE_FILE_FIELD && file.is_none() {
            file = Some(read_file(field, limits.max_file_size).await?);
        } else {
            return Err(UploadError::UnexpectedField(name));
        }
    }

    let file = file.ok_or(UploadError::NoFile)?;
    Ok(SingleUpload {
        file,
        folder: limits.folder_or_default(folder),
    })
}

/// Read up to `max_files` parts named `files` and optional `folder`
pub async fn parse_multiple(
    mut multipart: Multipart,
    limits: &UploadLimits,
) -> Result<MultiUpload, UploadError> {
    let mut files = Vec::new();
    let mut folder = None;

    while let Some(field) = next_field(&mut multipart).await? {
        let name = field.name().unwrap_or_default().to_string();

        if field.file_name().is_none() {
            if name == FOLDER_FIELD {
                folder = Some(read_text(field).await?);
            }
        } else if name == MULTI_FILE_FIELD {
            if files.len() == limits.max_files {
                return Err(UploadError::TooManyFiles {
                    max: limits.max_files,
                });
            }
            files.push(read_file(field, limits.max_file_size).await?);
        } else {
            return Err(UploadError::UnexpectedField(name));
        }
    }

    if files.is_empty() {
        return Err(UploadError::NoFiles);
    }

    Ok(MultiUpload {
        files,
        folder: limits.folder_or_default(folder),
    })
}

async fn next_field(multipart: &mut Multipart) -> Result<Option<Field<'_>>, UploadError> {
    multipart.next_field().await.map_err(multipart_error)
}

async fn read_text(field: Field<'_>) -> Result<String, UploadError> {
    field.text().await.map_err(multipart_error)
}

/// Buffer one file part, failing as soon as it grows past `limit`
async fn read_file(mut field: Field<'_>, limit: usize) -> Result<UploadedFile, UploadError> {
    let original_name = field
        .file_name()
        .filter(|n| !n.is_empty())
        .unwrap_or(SINGLE_FILE_FIELD)
        .to_string();
    let content_type = field
        .content_type()
        .map(str::to_string)
        .unwrap_or_else(|| guess_content_type(&original_name).to_string());

    let mut buffer = Vec::new();
    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => return Err(multipart_error(e)),
        };

        if buffer.len() + chunk.len() > limit {
            return Err(UploadError::FileTooLarge {
                name: original_name,
                limit,
            });
        }
        buffer.extend_from_slice(&chunk);
    }

    debug!(
        file_name = %original_name,
        size_bytes = buffer.len(),
        "Buffered uploaded file"
    );

    Ok(UploadedFile::new(original_name, content_type, buffer))
}

/// The route body limit covers every part, so tripping it blames no single file
fn multipart_error(err: MultipartError) -> UploadError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        UploadError::PayloadTooLarge
    } else {
        UploadError::Malformed(err.body_text())
    }
}

/// Guess a content type from a file name's extension
pub fn guess_content_type(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "json" => "application/json",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "mp4" => "video/mp4",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}
