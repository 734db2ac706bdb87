//! Remote object-store interface
//!
//! Tasks talk to the provider only through [`ObjectStore`]. Implementations
//! issue one remote call per method, block until it completes and return the
//! parsed response; retry policy belongs to the implementation.

use crate::error::Result;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::fmt;
use std::io::Read;
use std::time::SystemTime;

/// Characters left unescaped in a copy source: unreserved characters and `/`
const COPY_SOURCE_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Build the `CopySource` value for a server-side copy
pub fn encode_copy_source(bucket: &str, key: &str) -> String {
    format!("{}/{}", bucket, utf8_percent_encode(key, COPY_SOURCE_SAFE))
}

/// Guess a `Content-Type` from a file name's extension
pub fn guess_content_type(name: &str) -> Option<&'static str> {
    let (_, extension) = name.rsplit_once('.')?;
    let content_type = match extension.to_ascii_lowercase().as_str() {
        "txt" | "text" | "log" => "text/plain",
        "htm" | "html" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" | "tgz" => "application/gzip",
        "tar" => "application/x-tar",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "wasm" => "application/wasm",
        _ => return None,
    };
    Some(content_type)
}

/// PutObject parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutObjectRequest {
    pub bucket: String,
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub acl: Option<String>,
    pub storage_class: Option<String>,
}

/// PutObject response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutObjectOutput {
    pub e_tag: Option<String>,
}

/// CreateMultipartUpload parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateMultipartUploadRequest {
    pub bucket: String,
    pub key: String,
    pub content_type: Option<String>,
    pub acl: Option<String>,
    pub storage_class: Option<String>,
}

/// CreateMultipartUpload response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateMultipartUploadOutput {
    pub upload_id: Option<String>,
}

/// UploadPart parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPartRequest {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub part_number: u32,
    pub body: Vec<u8>,
}

/// UploadPart response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadPartOutput {
    pub e_tag: Option<String>,
}

/// UploadPartCopy parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPartCopyRequest {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub part_number: u32,
    pub copy_source: String,
    pub copy_source_range: String,
}

/// Result block of an UploadPartCopy response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyPartResult {
    pub e_tag: Option<String>,
}

/// UploadPartCopy response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadPartCopyOutput {
    pub copy_part_result: Option<CopyPartResult>,
}

/// One entry of a completed multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub e_tag: String,
}

/// CompleteMultipartUpload parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteMultipartUploadRequest {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub parts: Vec<CompletedPart>,
}

/// AbortMultipartUpload parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortMultipartUploadRequest {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
}

/// CopyObject parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyObjectRequest {
    pub bucket: String,
    pub key: String,
    pub copy_source: String,
    pub content_type: Option<String>,
    pub acl: Option<String>,
    pub storage_class: Option<String>,
}

/// GetObject parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetObjectRequest {
    pub bucket: String,
    pub key: String,
    pub range: Option<String>,
}

/// GetObject response
#[derive(Default)]
pub struct GetObjectOutput {
    pub body: Option<Box<dyn Read + Send>>,
    pub e_tag: Option<String>,
}

impl fmt::Debug for GetObjectOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GetObjectOutput")
            .field("body", &self.body.as_ref().map(|_| ".."))
            .field("e_tag", &self.e_tag)
            .finish()
    }
}

/// HeadObject parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadObjectRequest {
    pub bucket: String,
    pub key: String,
}

/// HeadObject response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadObjectOutput {
    pub content_length: u64,
    pub last_modified: Option<SystemTime>,
}

/// DeleteObject parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteObjectRequest {
    pub bucket: String,
    pub key: String,
}

/// DeleteBucket parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteBucketRequest {
    pub bucket: String,
}

/// Blocking object-store client
pub trait ObjectStore: Send + Sync {
    /// Upload a whole object in one request
    fn put_object(&self, request: PutObjectRequest) -> Result<PutObjectOutput>;

    /// Start a multipart upload
    fn create_multipart_upload(
        &self,
        request: CreateMultipartUploadRequest,
    ) -> Result<CreateMultipartUploadOutput>;

    /// Upload one part of a multipart upload
    fn upload_part(&self, request: UploadPartRequest) -> Result<UploadPartOutput>;

    /// Copy one byte range of an existing object into a multipart upload
    fn upload_part_copy(&self, request: UploadPartCopyRequest) -> Result<UploadPartCopyOutput>;

    /// Assemble the uploaded parts into the final object
    fn complete_multipart_upload(&self, request: CompleteMultipartUploadRequest) -> Result<()>;

    /// Discard a multipart upload and its parts
    fn abort_multipart_upload(&self, request: AbortMultipartUploadRequest) -> Result<()>;

    /// Server-side copy of a whole object
    fn copy_object(&self, request: CopyObjectRequest) -> Result<()>;

    /// Fetch an object or a byte range of it
    fn get_object(&self, request: GetObjectRequest) -> Result<GetObjectOutput>;

    /// Fetch object metadata
    fn head_object(&self, request: HeadObjectRequest) -> Result<HeadObjectOutput>;

    /// Delete an object
    fn delete_object(&self, request: DeleteObjectRequest) -> Result<()>;

    /// Delete an empty bucket
    fn delete_bucket(&self, request: DeleteBucketRequest) -> Result<()>;
}
