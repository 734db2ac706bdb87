//! Native AWS S3 SDK integration
//!
//! Implements [`ObjectStore`] on top of `aws-sdk-s3`. Workers are plain
//! threads, so every call is driven to completion on a shared multi-threaded
//! tokio runtime with `block_on`. Transient failures are retried here with
//! exponential backoff; the task layer above never retries.

use super::client::*;
use crate::error::{Result, TransferError};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    CompletedMultipartUpload, MetadataDirective, ObjectCannedAcl, StorageClass,
};
use std::future::Future;
use std::io::Cursor;
use std::time::{Duration, SystemTime};
use tokio::runtime::Runtime;

/// Maximum retry delay cap in seconds.
const MAX_RETRY_DELAY_SECS: u64 = 64;

/// Configuration for the native S3 client.
#[derive(Debug, Clone)]
pub struct NativeS3Config {
    /// AWS region (e.g., "us-east-1")
    pub region: String,
    /// Custom endpoint URL for S3-compatible services (MinIO, Wasabi)
    pub endpoint_url: Option<String>,
    /// Maximum number of retries per operation
    pub max_retries: u32,
    /// Force path-style access (required for some S3-compatible services)
    pub force_path_style: bool,
    /// Access key ID (optional, falls back to AWS credential chain)
    pub access_key_id: Option<String>,
    /// Secret access key (optional, falls back to AWS credential chain)
    pub secret_access_key: Option<String>,
    /// Runtime threads driving SDK requests
    pub runtime_threads: usize,
}

impl Default for NativeS3Config {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint_url: None,
            max_retries: 5,
            force_path_style: false,
            access_key_id: None,
            secret_access_key: None,
            runtime_threads: 4,
        }
    }
}

/// Blocking S3 client over the AWS SDK
pub struct NativeS3Client {
    client: aws_sdk_s3::Client,
    config: NativeS3Config,
    runtime: Runtime,
}

impl NativeS3Client {
    /// Create a new S3 client from configuration.
    pub fn new(config: NativeS3Config) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.runtime_threads.max(1))
            .thread_name("s3-runtime")
            .enable_all()
            .build()
            .map_err(|source| TransferError::Spawn {
                name: "s3-runtime".to_string(),
                source,
            })?;

        let mut aws_config_builder = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));

        // Set custom endpoint for S3-compatible services
        if let Some(ref endpoint) = config.endpoint_url {
            aws_config_builder = aws_config_builder.endpoint_url(endpoint);
        }

        // Set explicit credentials if provided
        if let (Some(ref key_id), Some(ref secret)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let creds = aws_credential_types::Credentials::new(
                key_id,
                secret,
                None, // session token
                None, // expiry
                "s3ferry-static",
            );
            aws_config_builder = aws_config_builder.credentials_provider(creds);
        }

        let aws_config = runtime.block_on(aws_config_builder.load());

        let mut s3_config = aws_sdk_s3::config::Builder::from(&aws_config);
        if config.force_path_style {
            s3_config = s3_config.force_path_style(true);
        }

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(s3_config.build()),
            config,
            runtime,
        })
    }

    /// Run one request to completion, retrying transient failures
    fn call<T, F, Fut>(&self, operation: &'static str, request: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, String>>,
    {
        let mut retries = 0;
        loop {
            match self.runtime.block_on(request()) {
                Ok(value) => return Ok(value),
                Err(e) if retries < self.config.max_retries => {
                    retries += 1;
                    let delay = exponential_backoff_delay(retries);
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                        operation,
                        retries,
                        self.config.max_retries,
                        e,
                        delay
                    );
                    std::thread::sleep(delay);
                }
                Err(e) => return Err(TransferError::remote(operation, e)),
            }
        }
    }
}

fn sdk_error(e: impl std::error::Error) -> String {
    DisplayErrorContext(e).to_string()
}

fn acl(value: &Option<String>) -> Option<ObjectCannedAcl> {
    value.as_deref().map(ObjectCannedAcl::from)
}

fn storage_class(value: &Option<String>) -> Option<StorageClass> {
    value.as_deref().map(StorageClass::from)
}

impl ObjectStore for NativeS3Client {
    fn put_object(&self, request: PutObjectRequest) -> Result<PutObjectOutput> {
        let request = &request;
        self.call("PutObject", || async move {
            let output = self
                .client
                .put_object()
                .bucket(&request.bucket)
                .key(&request.key)
                .body(ByteStream::from(request.body.clone()))
                .set_content_type(request.content_type.clone())
                .set_acl(acl(&request.acl))
                .set_storage_class(storage_class(&request.storage_class))
                .send()
                .await
                .map_err(sdk_error)?;
            Ok::<_, String>(PutObjectOutput {
                e_tag: output.e_tag().map(str::to_string),
            })
        })
    }

    fn create_multipart_upload(
        &self,
        request: CreateMultipartUploadRequest,
    ) -> Result<CreateMultipartUploadOutput> {
        let request = &request;
        self.call("CreateMultipartUpload", || async move {
            let output = self
                .client
                .create_multipart_upload()
                .bucket(&request.bucket)
                .key(&request.key)
                .set_content_type(request.content_type.clone())
                .set_acl(acl(&request.acl))
                .set_storage_class(storage_class(&request.storage_class))
                .send()
                .await
                .map_err(sdk_error)?;
            Ok::<_, String>(CreateMultipartUploadOutput {
                upload_id: output.upload_id().map(str::to_string),
            })
        })
    }

    fn upload_part(&self, request: UploadPartRequest) -> Result<UploadPartOutput> {
        let request = &request;
        self.call("UploadPart", || async move {
            let output = self
                .client
                .upload_part()
                .bucket(&request.bucket)
                .key(&request.key)
                .upload_id(&request.upload_id)
                .part_number(request.part_number as i32)
                .body(ByteStream::from(request.body.clone()))
                .send()
                .await
                .map_err(sdk_error)?;
            Ok::<_, String>(UploadPartOutput {
                e_tag: output.e_tag().map(str::to_string),
            })
        })
    }

    fn upload_part_copy(&self, request: UploadPartCopyRequest) -> Result<UploadPartCopyOutput> {
        let request = &request;
        self.call("UploadPartCopy", || async move {
            let output = self
                .client
                .upload_part_copy()
                .bucket(&request.bucket)
                .key(&request.key)
                .upload_id(&request.upload_id)
                .part_number(request.part_number as i32)
                .copy_source(&request.copy_source)
                .copy_source_range(&request.copy_source_range)
                .send()
                .await
                .map_err(sdk_error)?;
            Ok::<_, String>(UploadPartCopyOutput {
                copy_part_result: output.copy_part_result().map(|result| CopyPartResult {
                    e_tag: result.e_tag().map(str::to_string),
                }),
            })
        })
    }

    fn complete_multipart_upload(&self, request: CompleteMultipartUploadRequest) -> Result<()> {
        let parts: Vec<_> = request
            .parts
            .iter()
            .map(|part| {
                aws_sdk_s3::types::CompletedPart::builder()
                    .part_number(part.part_number as i32)
                    .e_tag(&part.e_tag)
                    .build()
            })
            .collect();
        let parts = &parts;
        let request = &request;

        self.call("CompleteMultipartUpload", || async move {
            let completed = CompletedMultipartUpload::builder()
                .set_parts(Some(parts.to_vec()))
                .build();
            self.client
                .complete_multipart_upload()
                .bucket(&request.bucket)
                .key(&request.key)
                .upload_id(&request.upload_id)
                .multipart_upload(completed)
                .send()
                .await
                .map_err(sdk_error)?;
            Ok::<_, String>(())
        })
    }

    fn abort_multipart_upload(&self, request: AbortMultipartUploadRequest) -> Result<()> {
        let request = &request;
        self.call("AbortMultipartUpload", || async move {
            self.client
                .abort_multipart_upload()
                .bucket(&request.bucket)
                .key(&request.key)
                .upload_id(&request.upload_id)
                .send()
                .await
                .map_err(sdk_error)?;
            Ok::<_, String>(())
        })
    }

    fn copy_object(&self, request: CopyObjectRequest) -> Result<()> {
        let request = &request;
        self.call("CopyObject", || async move {
            let mut builder = self
                .client
                .copy_object()
                .bucket(&request.bucket)
                .key(&request.key)
                .copy_source(&request.copy_source)
                .set_acl(acl(&request.acl))
                .set_storage_class(storage_class(&request.storage_class));
            if let Some(content_type) = &request.content_type {
                builder = builder
                    .content_type(content_type)
                    .metadata_directive(MetadataDirective::Replace);
            }
            builder.send().await.map_err(sdk_error)?;
            Ok::<_, String>(())
        })
    }

    fn get_object(&self, request: GetObjectRequest) -> Result<GetObjectOutput> {
        let request = &request;
        self.call("GetObject", || async move {
            let output = self
                .client
                .get_object()
                .bucket(&request.bucket)
                .key(&request.key)
                .set_range(request.range.clone())
                .send()
                .await
                .map_err(sdk_error)?;
            let e_tag = output.e_tag().map(str::to_string);
            let bytes = output
                .body
                .collect()
                .await
                .map_err(|e| format!("body read failed: {}", e))?
                .into_bytes();
            Ok::<_, String>(GetObjectOutput {
                body: Some(Box::new(Cursor::new(bytes.to_vec()))),
                e_tag,
            })
        })
    }

    fn head_object(&self, request: HeadObjectRequest) -> Result<HeadObjectOutput> {
        let request = &request;
        self.call("HeadObject", || async move {
            let output = self
                .client
                .head_object()
                .bucket(&request.bucket)
                .key(&request.key)
                .send()
                .await
                .map_err(sdk_error)?;
            Ok::<_, String>(HeadObjectOutput {
                content_length: output.content_length().unwrap_or(0).max(0) as u64,
                last_modified: output
                    .last_modified()
                    .and_then(|time| SystemTime::try_from(*time).ok()),
            })
        })
    }

    fn delete_object(&self, request: DeleteObjectRequest) -> Result<()> {
        let request = &request;
        self.call("DeleteObject", || async move {
            self.client
                .delete_object()
                .bucket(&request.bucket)
                .key(&request.key)
                .send()
                .await
                .map_err(sdk_error)?;
            Ok::<_, String>(())
        })
    }

    fn delete_bucket(&self, request: DeleteBucketRequest) -> Result<()> {
        let request = &request;
        self.call("DeleteBucket", || async move {
            self.client
                .delete_bucket()
                .bucket(&request.bucket)
                .send()
                .await
                .map_err(sdk_error)?;
            Ok::<_, String>(())
        })
    }
}

/// Calculate exponential backoff delay: 2^retries seconds, capped at MAX_RETRY_DELAY_SECS.
fn exponential_backoff_delay(retries: u32) -> Duration {
    let secs = (1u64 << retries.min(16)).min(MAX_RETRY_DELAY_SECS);
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NativeS3Config::default();
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.max_retries, 5);
        assert!(!config.force_path_style);
        assert!(config.runtime_threads >= 1);
    }

    #[test]
    fn test_exponential_backoff() {
        assert_eq!(exponential_backoff_delay(1), Duration::from_secs(2));
        assert_eq!(exponential_backoff_delay(2), Duration::from_secs(4));
        assert_eq!(exponential_backoff_delay(6), Duration::from_secs(64));
        // Should cap at 64 seconds
        assert_eq!(exponential_backoff_delay(40), Duration::from_secs(64));
    }

    #[test]
    fn test_option_conversions() {
        assert_eq!(
            acl(&Some("public-read".to_string())),
            Some(ObjectCannedAcl::PublicRead)
        );
        assert_eq!(
            storage_class(&Some("STANDARD_IA".to_string())),
            Some(StorageClass::StandardIa)
        );
        assert_eq!(acl(&None), None);
    }
}
