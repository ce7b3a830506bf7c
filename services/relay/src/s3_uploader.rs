use crate::config::{S3Config, UploadConfig};
use crate::relay::{ObjectStorage, StorageError, StoredObject};
use crate::upload::UploadedFile;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use aws_types::region::Region;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// S3 rejects keys longer than this many bytes
const MAX_KEY_BYTES: usize = 1024;

/// S3-backed object storage
pub struct S3Storage {
    client: S3Client,
    bucket: String,
    config: S3Config,
    default_folder: String,
}

impl S3Storage {
    /// Create a new S3 storage client
    pub async fn new(config: &S3Config, upload: &UploadConfig) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/R2/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 storage initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            config: config.clone(),
            default_folder: upload.default_folder.clone(),
        })
    }

    /// Build the object key for a file
    /// Format: {folder}/{uuid}-{file name}
    pub fn object_key(&self, folder: &str, file_name: &str) -> String {
        build_object_key(folder, file_name, &self.default_folder, Uuid::new_v4())
    }

    /// URL under which a stored key is reachable
    pub fn public_url(&self, key: &str) -> String {
        public_url(&self.config, key)
    }

    /// Simple single-part upload for small files
    async fn simple_upload(&self, file: &UploadedFile, key: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(file.buffer.clone()))
            .content_type(&file.content_type)
            .metadata("original-name", sanitize_file_name(&file.original_name))
            .send()
            .await
            .context("Failed to upload file to S3")?;

        Ok(())
    }

    /// Multipart upload for large files
    async fn multipart_upload(&self, file: &UploadedFile, key: &str) -> Result<()> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(&file.content_type)
            .metadata("original-name", sanitize_file_name(&file.original_name))
            .send()
            .await
            .context("Failed to create multipart upload")?;

        let upload_id = create_response
            .upload_id()
            .context("No upload ID in response")?;

        match self.upload_parts(file, key, upload_id).await {
            Ok(completed) => {
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .multipart_upload(completed)
                    .send()
                    .await
                    .context("Failed to complete multipart upload")?;
                Ok(())
            }
            Err(e) => {
                // Leave no orphaned parts behind
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .send()
                    .await
                {
                    warn!(key = %key, error = %abort_err, "Failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        file: &UploadedFile,
        key: &str,
        upload_id: &str,
    ) -> Result<CompletedMultipartUpload> {
        let mut completed_parts = Vec::new();

        for (index, chunk) in file.buffer.chunks(self.config.part_size_bytes).enumerate() {
            let part_number = i32::try_from(index + 1).context("Too many parts")?;
            let body = ByteStream::from(file.buffer.slice_ref(chunk));

            let upload_part_response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(body)
                .send()
                .await
                .with_context(|| format!("Failed to upload part {part_number}"))?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(upload_part_response.e_tag().unwrap_or_default())
                    .build(),
            );
        }

        Ok(CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build())
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    #[instrument(skip(self, file), fields(file_name = %file.original_name))]
    async fn put(&self, file: &UploadedFile, folder: &str) -> Result<StoredObject, StorageError> {
        let key = self.object_key(folder, &file.original_name);
        if key.len() > MAX_KEY_BYTES {
            return Err(StorageError::InvalidKey(format!(
                "key is {} bytes, limit is {MAX_KEY_BYTES}",
                key.len()
            )));
        }

        debug!(key = %key, size_bytes = file.size, "Uploading file to S3");

        let uploaded = if file.size > self.config.multipart_threshold_bytes {
            self.multipart_upload(file, &key).await
        } else {
            self.simple_upload(file, &key).await
        };
        uploaded.map_err(|e| StorageError::Backend(format!("{e:#}")))?;

        info!(key = %key, size_bytes = file.size, "File uploaded to S3");

        Ok(StoredObject {
            url: self.public_url(&key),
            key,
        })
    }
}

fn build_object_key(folder: &str, file_name: &str, default_folder: &str, id: Uuid) -> String {
    let mut folder = sanitize_folder(folder);
    if folder.is_empty() {
        folder = sanitize_folder(default_folder);
    }

    let name = sanitize_file_name(file_name);
    let file_part = if name.is_empty() {
        id.to_string()
    } else {
        format!("{id}-{name}")
    };

    if folder.is_empty() {
        file_part
    } else {
        format!("{folder}/{file_part}")
    }
}

fn public_url(config: &S3Config, key: &str) -> String {
    if let Some(ref base) = config.public_base_url {
        return format!("{}/{key}", base.trim_end_matches('/'));
    }

    match config.endpoint_url {
        Some(ref endpoint) if config.force_path_style => {
            format!("{}/{}/{key}", endpoint.trim_end_matches('/'), config.bucket)
        }
        Some(ref endpoint) => match endpoint.split_once("://") {
            Some((scheme, host)) => format!(
                "{scheme}://{}.{}/{key}",
                config.bucket,
                host.trim_end_matches('/')
            ),
            None => format!("{}/{}/{key}", endpoint.trim_end_matches('/'), config.bucket),
        },
        None => format!(
            "https://{}.s3.{}.amazonaws.com/{key}",
            config.bucket, config.region
        ),
    }
}

/// Sanitize a path component to prevent path traversal
fn sanitize_path_component(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

/// Sanitize every segment of a folder path, dropping empty and dot segments
fn sanitize_folder(folder: &str) -> String {
    folder
        .split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .map(sanitize_path_component)
        .collect::<Vec<_>>()
        .join("/")
}

/// Like [`sanitize_path_component`] but keeps dots, minus any leading ones
fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();
    cleaned.trim_start_matches('.').to_string()
}
