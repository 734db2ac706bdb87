//! Logical transfer descriptions

use crate::error::{Result, TransferError};
use crate::storage::ObjectStore;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// URL scheme of remote locations
pub const REMOTE_SCHEME: &str = "s3://";

/// Requested file-level operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Upload,
    Download,
    Copy,
    Move,
    Delete,
    RemoveBucket,
}

impl OperationKind {
    /// Name used in status lines
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Download => "download",
            Self::Copy => "copy",
            Self::Move => "move",
            Self::Delete => "delete",
            Self::RemoveBucket => "remove_bucket",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One side of a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// Local filesystem path
    Local(PathBuf),
    /// Remote object
    Remote { bucket: String, key: String },
}

impl Location {
    /// Parse `s3://bucket/key` as remote and anything else as a local path
    pub fn parse(value: &str) -> Self {
        match value.strip_prefix(REMOTE_SCHEME) {
            Some(rest) => {
                let (bucket, key) = split_bucket_key(rest);
                Self::Remote {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            }
            None => Self::Local(PathBuf::from(value)),
        }
    }

    /// Remote location from a `bucket/key` string
    pub fn remote(bucket_key: &str) -> Self {
        let (bucket, key) = split_bucket_key(bucket_key);
        Self::Remote {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }

    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::Local(path.into())
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }

    /// Local path, if this is a local location
    pub fn as_local(&self) -> Option<&Path> {
        match self {
            Self::Local(path) => Some(path),
            Self::Remote { .. } => None,
        }
    }

    /// Bucket and key, if this is a remote location
    pub fn as_remote(&self) -> Option<(&str, &str)> {
        match self {
            Self::Remote { bucket, key } => Some((bucket, key)),
            Self::Local(_) => None,
        }
    }

    /// Final name component, used for content type guessing
    pub fn file_name(&self) -> Option<String> {
        match self {
            Self::Local(path) => path.file_name().map(|n| n.to_string_lossy().into_owned()),
            Self::Remote { key, .. } => key.rsplit('/').next().map(str::to_string),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote { bucket, key } => write!(f, "{}{}/{}", REMOTE_SCHEME, bucket, key),
        }
    }
}

/// Split `bucket/key/with/slashes` at the first slash
pub fn split_bucket_key(path: &str) -> (&str, &str) {
    path.split_once('/').unwrap_or((path, ""))
}

/// Concrete work a record resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Upload,
    Download,
    Copy,
    Delete,
    RemoveBucket,
}

/// One logical file-level operation
#[derive(Clone)]
pub struct TransferRecord {
    pub source: Location,
    pub destination: Option<Location>,
    pub kind: OperationKind,
    /// Size in bytes, 0 if unknown
    pub size: u64,
    /// Source modification time, applied to downloaded files
    pub last_modified: Option<SystemTime>,
    /// Opaque key used by higher-level sync logic
    pub compare_key: Option<String>,
    /// Client for the destination side, overriding the handler's default
    pub client: Option<Arc<dyn ObjectStore>>,
    /// Client for the source side, when it differs from the destination's
    pub source_client: Option<Arc<dyn ObjectStore>>,
}

impl fmt::Debug for TransferRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferRecord")
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("kind", &self.kind)
            .field("size", &self.size)
            .field("last_modified", &self.last_modified)
            .field("compare_key", &self.compare_key)
            .finish_non_exhaustive()
    }
}

impl TransferRecord {
    /// Create a record for an operation between two locations
    pub fn new(kind: OperationKind, source: Location, destination: Option<Location>) -> Self {
        Self {
            source,
            destination,
            kind,
            size: 0,
            last_modified: None,
            compare_key: None,
            client: None,
            source_client: None,
        }
    }

    pub fn upload(source: impl Into<PathBuf>, bucket_key: &str) -> Self {
        Self::new(
            OperationKind::Upload,
            Location::Local(source.into()),
            Some(Location::remote(bucket_key)),
        )
    }

    pub fn download(bucket_key: &str, destination: impl Into<PathBuf>) -> Self {
        Self::new(
            OperationKind::Download,
            Location::remote(bucket_key),
            Some(Location::Local(destination.into())),
        )
    }

    pub fn copy(source_bucket_key: &str, bucket_key: &str) -> Self {
        Self::new(
            OperationKind::Copy,
            Location::remote(source_bucket_key),
            Some(Location::remote(bucket_key)),
        )
    }

    pub fn move_between(source: Location, destination: Location) -> Self {
        Self::new(OperationKind::Move, source, Some(destination))
    }

    pub fn delete(target: Location) -> Self {
        Self::new(OperationKind::Delete, target, None)
    }

    pub fn remove_bucket(bucket: &str) -> Self {
        Self::new(
            OperationKind::RemoveBucket,
            Location::Remote {
                bucket: bucket.to_string(),
                key: String::new(),
            },
            None,
        )
    }

    /// Set the size in bytes
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// Set the source modification time
    pub fn with_last_modified(mut self, time: SystemTime) -> Self {
        self.last_modified = Some(time);
        self
    }

    /// Use a dedicated client for the source side
    pub fn with_source_client(mut self, client: Arc<dyn ObjectStore>) -> Self {
        self.source_client = Some(client);
        self
    }

    /// Use a dedicated client for the destination side
    pub fn with_client(mut self, client: Arc<dyn ObjectStore>) -> Self {
        self.client = Some(client);
        self
    }

    /// Human-readable `source to destination` description
    pub fn describe(&self) -> String {
        match &self.destination {
            Some(destination) => format!("{} to {}", self.source, destination),
            None => self.source.to_string(),
        }
    }

    /// Check the record's shape and resolve the concrete action
    pub fn action(&self) -> Result<Action> {
        let invalid = |msg: &str| -> Result<Action> {
            Err(TransferError::InvalidRecord(format!(
                "{}: {}",
                msg,
                self.describe()
            )))
        };

        if let Some((bucket, _)) = self.source.as_remote() {
            if bucket.is_empty() {
                return invalid("remote source has no bucket");
            }
        }
        if let Some((bucket, _)) = self.destination.as_ref().and_then(Location::as_remote) {
            if bucket.is_empty() {
                return invalid("remote destination has no bucket");
            }
        }

        match self.kind {
            OperationKind::RemoveBucket => {
                if self.destination.is_some() {
                    return invalid("remove_bucket takes no destination");
                }
                if !self.source.is_remote() {
                    return invalid("remove_bucket needs a remote bucket");
                }
                Ok(Action::RemoveBucket)
            }
            OperationKind::Delete => {
                if self.destination.is_some() {
                    return invalid("delete takes no destination");
                }
                Ok(Action::Delete)
            }
            kind => {
                let Some(destination) = &self.destination else {
                    return invalid("transfer needs a destination");
                };
                let action = match (self.source.is_remote(), destination.is_remote()) {
                    (false, true) => Action::Upload,
                    (true, false) => Action::Download,
                    (true, true) => Action::Copy,
                    (false, false) => return invalid("local to local transfers are not supported"),
                };
                let matches_kind = match kind {
                    OperationKind::Upload => action == Action::Upload,
                    OperationKind::Download => action == Action::Download,
                    OperationKind::Copy => action == Action::Copy,
                    _ => true,
                };
                if !matches_kind {
                    return invalid(&format!("locations do not fit a {}", kind));
                }
                Ok(action)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_bucket_key() {
        assert_eq!(split_bucket_key("mybucket/a/b.txt"), ("mybucket", "a/b.txt"));
        assert_eq!(split_bucket_key("mybucket"), ("mybucket", ""));
    }

    #[test]
    fn test_location_parse() {
        assert_eq!(
            Location::parse("s3://bucket/key+name"),
            Location::Remote {
                bucket: "bucket".into(),
                key: "key+name".into()
            }
        );
        assert_eq!(Location::parse("local/file"), Location::Local("local/file".into()));
    }

    #[test]
    fn test_describe() {
        let record = TransferRecord::upload("text1.txt", "mybucket/text1.txt");
        assert_eq!(record.describe(), "text1.txt to s3://mybucket/text1.txt");
        assert_eq!(
            TransferRecord::remove_bucket("mybucket").describe(),
            "s3://mybucket/"
        );
    }

    #[test]
    fn test_action_resolution() {
        assert_eq!(
            TransferRecord::upload("a", "b/c").action().unwrap(),
            Action::Upload
        );
        assert_eq!(
            TransferRecord::move_between(Location::remote("b/k"), Location::local("out"))
                .action()
                .unwrap(),
            Action::Download
        );
        assert_eq!(
            TransferRecord::move_between(Location::remote("b/k"), Location::remote("c/k"))
                .action()
                .unwrap(),
            Action::Copy
        );
        assert_eq!(
            TransferRecord::delete(Location::local("x")).action().unwrap(),
            Action::Delete
        );
    }

    #[test]
    fn test_invalid_records() {
        let mut record = TransferRecord::remove_bucket("mybucket");
        record.destination = Some(Location::local("x"));
        assert!(matches!(record.action(), Err(TransferError::InvalidRecord(_))));

        let record = TransferRecord::new(OperationKind::Upload, Location::local("a"), None);
        assert!(record.action().is_err());

        assert!(TransferRecord::upload("a", "/key").action().is_err());
        assert!(TransferRecord::download("b/k", "out")
            .with_size(3)
            .action()
            .is_ok());
        let local_only =
            TransferRecord::move_between(Location::local("a"), Location::local("b"));
        assert!(local_only.action().is_err());
        let mismatched = TransferRecord::new(
            OperationKind::Upload,
            Location::remote("b/k"),
            Some(Location::local("x")),
        );
        assert!(mismatched.action().is_err());
    }
}
