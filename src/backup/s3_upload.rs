// mongobackup/src/backup/s3_upload.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::config::{Region, RequestChecksumCalculation, ResponseChecksumValidation};
use s3::error::DisplayErrorContext;
use s3::primitives::{ByteStream, Length};
use s3::types::{CompletedMultipartUpload, CompletedPart};
use std::path::Path;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::StorageConfig;
use crate::errors::UploadError;

/// Files at or above this size go through multipart upload.
const MULTIPART_THRESHOLD: u64 = 16 * 1024 * 1024;
const PART_SIZE: u64 = 8 * 1024 * 1024;
const MAX_PARTS: u64 = 10_000;

/// Bucket and object key a run uploads to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub bucket: String,
    pub key: String,
}

/// Where an uploaded artifact ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadLocation {
    pub bucket: String,
    pub key: String,
    pub url: String,
    pub e_tag: Option<String>,
}

#[async_trait]
pub trait UploadSink: Send + Sync {
    async fn upload(&self, local: &Path, target: &RemoteTarget) -> Result<UploadLocation, UploadError>;
}

/// Uploads to an S3-compatible object storage service (Storj, Spaces, MinIO...).
pub struct S3Uploader {
    client: s3::Client,
    endpoint_url: Url,
}

impl S3Uploader {
    pub async fn new(storage: &StorageConfig) -> Self {
        let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .endpoint_url(storage.endpoint_url.as_str())
            .region(Region::new(storage.region.clone()))
            .credentials_provider(s3::config::Credentials::new(
                &storage.access_key_id,
                &storage.secret_access_key,
                None, // session_token
                None, // expiry
                "Static", // provider_name
            ))
            .load()
            .await;

        // Non-AWS gateways do not resolve virtual-hosted bucket names, and
        // several reject aws-chunked bodies with trailing checksums.
        let s3_config = s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
            .response_checksum_validation(ResponseChecksumValidation::WhenRequired)
            .build();

        S3Uploader {
            client: s3::Client::from_conf(s3_config),
            endpoint_url: storage.endpoint_url.clone(),
        }
    }

    /// HEAD on the target bucket to confirm endpoint, credentials and bucket.
    pub async fn check_connection(&self, bucket: &str) -> Result<()> {
        info!("Checking S3 connection to endpoint: {}", self.endpoint_url);
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("{}", DisplayErrorContext(&e)))
            .with_context(|| {
                format!(
                    "Could not access bucket '{}' at {}. Check the endpoint, credentials and bucket name.",
                    bucket, self.endpoint_url
                )
            })?;
        info!("✓ Target bucket {} is accessible.", bucket);
        Ok(())
    }

    async fn put_single(&self, local: &Path, target: &RemoteTarget, len: u64) -> Result<Option<String>, UploadError> {
        let body = ByteStream::from_path(local)
            .await
            .map_err(|e| file_read_error(local, e))?;

        let output = self
            .client
            .put_object()
            .bucket(&target.bucket)
            .key(&target.key)
            .content_length(len as i64)
            .body(body)
            .send()
            .await
            .map_err(|e| transfer_error(target, e))?;

        Ok(output.e_tag().map(str::to_string))
    }

    async fn put_multipart(&self, local: &Path, target: &RemoteTarget, len: u64) -> Result<Option<String>, UploadError> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&target.bucket)
            .key(&target.key)
            .send()
            .await
            .map_err(|e| transfer_error(target, e))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| UploadError::Transfer {
                bucket: target.bucket.clone(),
                key: target.key.clone(),
                message: "CreateMultipartUpload returned no upload id".to_string(),
            })?
            .to_string();

        match self.send_parts(local, target, &upload_id, len).await {
            Ok(e_tag) => Ok(e_tag),
            Err(e) => {
                // Best effort: the part failure is what gets reported.
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&target.bucket)
                    .key(&target.key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(
                        upload_id = %upload_id,
                        "Failed to abort multipart upload: {}",
                        DisplayErrorContext(&abort_err)
                    );
                }
                Err(e)
            }
        }
    }

    async fn send_parts(
        &self,
        local: &Path,
        target: &RemoteTarget,
        upload_id: &str,
        len: u64,
    ) -> Result<Option<String>, UploadError> {
        let ranges = part_ranges(len, part_size_for(len));
        let total = ranges.len();
        let mut completed = Vec::with_capacity(total);

        for (index, (offset, size)) in ranges.into_iter().enumerate() {
            let part_number = (index + 1) as i32;
            let body = ByteStream::read_from()
                .path(local)
                .offset(offset)
                .length(Length::Exact(size))
                .build()
                .await
                .map_err(|e| file_read_error(local, e))?;

            let part = self
                .client
                .upload_part()
                .bucket(&target.bucket)
                .key(&target.key)
                .upload_id(upload_id)
                .part_number(part_number)
                .content_length(size as i64)
                .body(body)
                .send()
                .await
                .map_err(|e| transfer_error(target, e))?;

            debug!(part_number, total, "Uploaded part");
            completed.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(part.e_tag().map(str::to_string))
                    .build(),
            );
        }

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&target.bucket)
            .key(&target.key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| transfer_error(target, e))?;

        Ok(output.e_tag().map(str::to_string))
    }
}

#[async_trait]
impl UploadSink for S3Uploader {
    async fn upload(&self, local: &Path, target: &RemoteTarget) -> Result<UploadLocation, UploadError> {
        let len = tokio::fs::metadata(local)
            .await
            .map_err(|source| UploadError::FileRead {
                path: local.to_path_buf(),
                source,
            })?
            .len();

        info!(
            bytes = len,
            "Uploading {} to bucket {} as: {}",
            local.display(),
            target.bucket,
            target.key
        );

        let e_tag = if len >= MULTIPART_THRESHOLD {
            self.put_multipart(local, target, len).await?
        } else {
            self.put_single(local, target, len).await?
        };

        let location = UploadLocation {
            bucket: target.bucket.clone(),
            key: target.key.clone(),
            url: object_url(&self.endpoint_url, &target.bucket, &target.key),
            e_tag,
        };
        info!(e_tag = ?location.e_tag, "✅ Upload successful: {}", location.url);
        Ok(location)
    }
}

/// Path-style URL of an object: `<endpoint>/<bucket>/<key>`.
pub fn object_url(endpoint: &Url, bucket: &str, key: &str) -> String {
    format!(
        "{}/{}/{}",
        endpoint.as_str().trim_end_matches('/'),
        bucket,
        key.trim_start_matches('/')
    )
}

/// Grows the part size for very large files so the upload stays within the
/// S3 part-count limit.
fn part_size_for(len: u64) -> u64 {
    PART_SIZE.max(len.div_ceil(MAX_PARTS))
}

/// `(offset, length)` windows covering `len` bytes.
fn part_ranges(len: u64, part_size: u64) -> Vec<(u64, u64)> {
    let mut ranges = Vec::new();
    let mut offset = 0;
    while offset < len {
        let size = part_size.min(len - offset);
        ranges.push((offset, size));
        offset += size;
    }
    ranges
}

fn file_read_error<E>(path: &Path, err: E) -> UploadError
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    UploadError::FileRead {
        path: path.to_path_buf(),
        source: std::io::Error::other(err),
    }
}

fn transfer_error<E: std::error::Error>(target: &RemoteTarget, err: E) -> UploadError {
    UploadError::Transfer {
        bucket: target.bucket.clone(),
        key: target.key.clone(),
        message: DisplayErrorContext(&err).to_string(),
    }
}
