//! Scripted object store for tests
//!
//! Records every call it receives and answers from a queue of canned
//! responses. A call with no response left fails like an unexpected request
//! against a real endpoint would.

use super::client::*;
use crate::error::{Result, TransferError};
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A recorded remote call with its parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    PutObject(PutObjectRequest),
    CreateMultipartUpload(CreateMultipartUploadRequest),
    UploadPart(UploadPartRequest),
    UploadPartCopy(UploadPartCopyRequest),
    CompleteMultipartUpload(CompleteMultipartUploadRequest),
    AbortMultipartUpload(AbortMultipartUploadRequest),
    CopyObject(CopyObjectRequest),
    GetObject(GetObjectRequest),
    HeadObject(HeadObjectRequest),
    DeleteObject(DeleteObjectRequest),
    DeleteBucket(DeleteBucketRequest),
}

impl RemoteCall {
    /// Operation name
    pub fn name(&self) -> &'static str {
        match self {
            Self::PutObject(_) => "PutObject",
            Self::CreateMultipartUpload(_) => "CreateMultipartUpload",
            Self::UploadPart(_) => "UploadPart",
            Self::UploadPartCopy(_) => "UploadPartCopy",
            Self::CompleteMultipartUpload(_) => "CompleteMultipartUpload",
            Self::AbortMultipartUpload(_) => "AbortMultipartUpload",
            Self::CopyObject(_) => "CopyObject",
            Self::GetObject(_) => "GetObject",
            Self::HeadObject(_) => "HeadObject",
            Self::DeleteObject(_) => "DeleteObject",
            Self::DeleteBucket(_) => "DeleteBucket",
        }
    }
}

/// A canned response
#[derive(Debug, Clone)]
pub enum Response {
    PutObject(PutObjectOutput),
    CreateMultipartUpload(CreateMultipartUploadOutput),
    UploadPart(UploadPartOutput),
    UploadPartCopy(UploadPartCopyOutput),
    GetObject(Option<Vec<u8>>),
    HeadObject(HeadObjectOutput),
    /// Success without a payload
    Empty,
    /// Remote error with the given message
    Error(String),
    /// Panic inside the call
    Panic(String),
}

impl Response {
    pub fn put() -> Self {
        Self::PutObject(PutObjectOutput {
            e_tag: Some("\"120ea8a25e5d487bf68b5f7096440019\"".to_string()),
        })
    }

    pub fn create(upload_id: &str) -> Self {
        Self::CreateMultipartUpload(CreateMultipartUploadOutput {
            upload_id: Some(upload_id.to_string()),
        })
    }

    pub fn part(e_tag: &str) -> Self {
        Self::UploadPart(UploadPartOutput {
            e_tag: Some(e_tag.to_string()),
        })
    }

    pub fn copy_part(e_tag: &str) -> Self {
        Self::UploadPartCopy(UploadPartCopyOutput {
            copy_part_result: Some(CopyPartResult {
                e_tag: Some(e_tag.to_string()),
            }),
        })
    }

    pub fn body(data: &[u8]) -> Self {
        Self::GetObject(Some(data.to_vec()))
    }

    pub fn error(message: &str) -> Self {
        Self::Error(message.to_string())
    }

    /// Successful answer to any call of `call`'s kind
    fn success_for(call: &RemoteCall) -> Self {
        match call {
            RemoteCall::PutObject(_) => Self::put(),
            RemoteCall::CreateMultipartUpload(_) => Self::create("upload-id"),
            RemoteCall::UploadPart(request) => Self::part(&format!("etag-{}", request.part_number)),
            RemoteCall::UploadPartCopy(request) => {
                Self::copy_part(&format!("etag-{}", request.part_number))
            }
            RemoteCall::GetObject(_) => Self::body(b""),
            _ => Self::Empty,
        }
    }
}

type CallHook = Box<dyn Fn(&RemoteCall) + Send + Sync>;

#[derive(Default)]
struct Script {
    calls: Vec<RemoteCall>,
    responses: VecDeque<Response>,
}

/// Recording store answering from a script
#[derive(Default)]
pub struct ScriptedStore {
    script: Mutex<Script>,
    objects: HashMap<(String, String), Vec<u8>>,
    answer_all: bool,
    on_call: Option<CallHook>,
}

impl ScriptedStore {
    /// Create a store with no scripted responses
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store answering with `responses` in order
    pub fn with_responses(responses: impl IntoIterator<Item = Response>) -> Self {
        let store = Self::default();
        store.lock().responses.extend(responses);
        store
    }

    /// Serve GetObject for `bucket/key` from `data`, honoring ranges,
    /// instead of from the script
    pub fn with_object(mut self, bucket: &str, key: &str, data: &[u8]) -> Self {
        self.objects
            .insert((bucket.to_string(), key.to_string()), data.to_vec());
        self
    }

    /// Answer calls with a generic success once the script runs out
    pub fn answer_all(mut self) -> Self {
        self.answer_all = true;
        self
    }

    /// Run `hook` at the start of every scripted call
    pub fn on_call(mut self, hook: impl Fn(&RemoteCall) + Send + Sync + 'static) -> Self {
        self.on_call = Some(Box::new(hook));
        self
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every call received so far, in arrival order
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    /// Names of every call received so far
    pub fn operation_names(&self) -> Vec<&'static str> {
        self.lock().calls.iter().map(RemoteCall::name).collect()
    }

    /// Number of scripted responses not consumed
    pub fn remaining(&self) -> usize {
        self.lock().responses.len()
    }

    fn respond(&self, call: RemoteCall) -> Result<Response> {
        if let Some(hook) = &self.on_call {
            hook(&call);
        }
        let name = call.name();
        let fallback = self.answer_all.then(|| Response::success_for(&call));
        let mut script = self.lock();
        script.calls.push(call);
        let response = script.responses.pop_front().or(fallback);
        drop(script);

        match response {
            None => Err(TransferError::remote(name, "unexpected call")),
            Some(Response::Error(message)) => Err(TransferError::remote(name, message)),
            Some(Response::Panic(message)) => panic!("{}", message),
            Some(response) => Ok(response),
        }
    }

    fn serve_object(&self, request: &GetObjectRequest) -> Option<Result<GetObjectOutput>> {
        let data = self
            .objects
            .get(&(request.bucket.clone(), request.key.clone()))?;
        self.lock().calls.push(RemoteCall::GetObject(request.clone()));

        let (start, end) = match request.range.as_deref() {
            None => (0, data.len()),
            Some(range) => match parse_range(range, data.len()) {
                Some(bounds) => bounds,
                None => return Some(Err(TransferError::remote("GetObject", "InvalidRange"))),
            },
        };
        Some(Ok(GetObjectOutput {
            body: Some(Box::new(Cursor::new(data[start..end].to_vec()))),
            e_tag: None,
        }))
    }
}

fn parse_range(range: &str, len: usize) -> Option<(usize, usize)> {
    let (start, end) = range.strip_prefix("bytes=")?.split_once('-')?;
    let start: usize = start.parse().ok()?;
    let end = if end.is_empty() {
        len
    } else {
        end.parse::<usize>().ok()?.saturating_add(1).min(len)
    };
    (start <= end).then_some((start, end))
}

fn mismatch<T>(operation: &str, response: Response) -> Result<T> {
    Err(TransferError::remote(
        operation,
        format!("scripted response does not fit: {:?}", response),
    ))
}

impl ObjectStore for ScriptedStore {
    fn put_object(&self, request: PutObjectRequest) -> Result<PutObjectOutput> {
        match self.respond(RemoteCall::PutObject(request))? {
            Response::PutObject(output) => Ok(output),
            other => mismatch("PutObject", other),
        }
    }

    fn create_multipart_upload(
        &self,
        request: CreateMultipartUploadRequest,
    ) -> Result<CreateMultipartUploadOutput> {
        match self.respond(RemoteCall::CreateMultipartUpload(request))? {
            Response::CreateMultipartUpload(output) => Ok(output),
            other => mismatch("CreateMultipartUpload", other),
        }
    }

    fn upload_part(&self, request: UploadPartRequest) -> Result<UploadPartOutput> {
        match self.respond(RemoteCall::UploadPart(request))? {
            Response::UploadPart(output) => Ok(output),
            Response::Empty => Ok(UploadPartOutput::default()),
            other => mismatch("UploadPart", other),
        }
    }

    fn upload_part_copy(&self, request: UploadPartCopyRequest) -> Result<UploadPartCopyOutput> {
        match self.respond(RemoteCall::UploadPartCopy(request))? {
            Response::UploadPartCopy(output) => Ok(output),
            Response::Empty => Ok(UploadPartCopyOutput::default()),
            other => mismatch("UploadPartCopy", other),
        }
    }

    fn complete_multipart_upload(&self, request: CompleteMultipartUploadRequest) -> Result<()> {
        match self.respond(RemoteCall::CompleteMultipartUpload(request))? {
            Response::Empty => Ok(()),
            other => mismatch("CompleteMultipartUpload", other),
        }
    }

    fn abort_multipart_upload(&self, request: AbortMultipartUploadRequest) -> Result<()> {
        match self.respond(RemoteCall::AbortMultipartUpload(request))? {
            Response::Empty => Ok(()),
            other => mismatch("AbortMultipartUpload", other),
        }
    }

    fn copy_object(&self, request: CopyObjectRequest) -> Result<()> {
        match self.respond(RemoteCall::CopyObject(request))? {
            Response::Empty => Ok(()),
            other => mismatch("CopyObject", other),
        }
    }

    fn get_object(&self, request: GetObjectRequest) -> Result<GetObjectOutput> {
        if let Some(served) = self.serve_object(&request) {
            return served;
        }
        match self.respond(RemoteCall::GetObject(request))? {
            Response::GetObject(body) => Ok(GetObjectOutput {
                body: body.map(|data| Box::new(Cursor::new(data)) as Box<dyn std::io::Read + Send>),
                e_tag: None,
            }),
            other => mismatch("GetObject", other),
        }
    }

    fn head_object(&self, request: HeadObjectRequest) -> Result<HeadObjectOutput> {
        match self.respond(RemoteCall::HeadObject(request))? {
            Response::HeadObject(output) => Ok(output),
            other => mismatch("HeadObject", other),
        }
    }

    fn delete_object(&self, request: DeleteObjectRequest) -> Result<()> {
        match self.respond(RemoteCall::DeleteObject(request))? {
            Response::Empty => Ok(()),
            other => mismatch("DeleteObject", other),
        }
    }

    fn delete_bucket(&self, request: DeleteBucketRequest) -> Result<()> {
        match self.respond(RemoteCall::DeleteBucket(request))? {
            Response::Empty => Ok(()),
            other => mismatch("DeleteBucket", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_script_order_and_exhaustion() {
        let store = ScriptedStore::with_responses([Response::Empty]);
        let request = DeleteBucketRequest {
            bucket: "mybucket".into(),
        };
        assert!(store.delete_bucket(request.clone()).is_ok());
        let err = store.delete_bucket(request).unwrap_err();
        assert!(err.to_string().contains("unexpected call"));
        assert_eq!(store.operation_names(), vec!["DeleteBucket", "DeleteBucket"]);
    }

    #[test]
    fn test_answer_all_after_script() {
        let store = ScriptedStore::with_responses([Response::error("SlowDown")]).answer_all();
        let request = UploadPartRequest {
            bucket: "b".into(),
            key: "k".into(),
            upload_id: "u".into(),
            part_number: 4,
            body: Vec::new(),
        };
        assert!(store.upload_part(request.clone()).is_err());
        let output = store.upload_part(request).unwrap();
        assert_eq!(output.e_tag.as_deref(), Some("etag-4"));
    }

    #[test]
    fn test_object_ranges() {
        let store = ScriptedStore::new().with_object("b", "k", b"0123456789abcde");
        let mut body = String::new();
        store
            .get_object(GetObjectRequest {
                bucket: "b".into(),
                key: "k".into(),
                range: Some("bytes=10-".into()),
            })
            .unwrap()
            .body
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        assert_eq!(body, "abcde");
        assert_eq!(parse_range("bytes=5-9", 15), Some((5, 10)));
        assert_eq!(store.remaining(), 0);
    }
}
