//! Remote blob storage holding per-level patch arrays and serialized indices
//!
//! Objects are addressed by bucket and object name. The HTTP store speaks the
//! public object endpoint of Google Cloud Storage; the directory store maps a
//! bucket to a subdirectory and is used for local mirrors and tests.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Failure modes of a blob transfer
#[derive(Debug)]
pub enum BlobError {
    /// The object does not exist in the bucket
    NotFound,
    /// The store refused access to the object
    AccessDenied,
    /// Fewer bytes arrived than the store announced
    Truncated {
        /// Announced object size in bytes
        expected: u64,
        /// Bytes actually received
        received: u64,
    },
    /// Network or local I/O failure
    Transport(String),
}

impl fmt::Display for BlobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "object not found"),
            Self::AccessDenied => write!(f, "access denied"),
            Self::Truncated { expected, received } => {
                write!(f, "truncated transfer ({received} of {expected} bytes)")
            }
            Self::Transport(reason) => write!(f, "transport error: {reason}"),
        }
    }
}

impl std::error::Error for BlobError {}

/// Read-only access to objects in a bucket
pub trait BlobStore: Send + Sync {
    /// Fetch the full contents of `object` from `bucket`
    ///
    /// # Errors
    ///
    /// Returns a [`BlobError`] when the object is missing, access is denied
    /// or the transfer does not complete.
    fn get(&self, bucket: &str, object: &str) -> Result<Vec<u8>, BlobError>;
}

/// Blob store backed by an HTTP object endpoint
#[derive(Debug, Clone)]
pub struct HttpBlobStore {
    endpoint: String,
    agent: ureq::Agent,
}

impl HttpBlobStore {
    /// Create a store for the given endpoint, e.g. `https://storage.googleapis.com`
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            agent: ureq::AgentBuilder::new().build(),
        }
    }

    /// Object URL for a bucket/object pair
    pub fn object_url(&self, bucket: &str, object: &str) -> String {
        format!("{}/{bucket}/{object}", self.endpoint)
    }
}

impl BlobStore for HttpBlobStore {
    fn get(&self, bucket: &str, object: &str) -> Result<Vec<u8>, BlobError> {
        let url = self.object_url(bucket, object);
        let response = match self.agent.get(&url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(404, _)) => return Err(BlobError::NotFound),
            Err(ureq::Error::Status(401 | 403, _)) => return Err(BlobError::AccessDenied),
            Err(ureq::Error::Status(code, _)) => {
                return Err(BlobError::Transport(format!("HTTP status {code}")));
            }
            Err(err) => return Err(BlobError::Transport(err.to_string())),
        };

        let expected = response
            .header("Content-Length")
            .and_then(|value| value.parse::<u64>().ok());

        let mut body = Vec::new();
        if let Err(err) = response.into_reader().read_to_end(&mut body) {
            // A dropped connection mid-body is reported as truncation when the size is known
            return match expected {
                Some(expected) => Err(BlobError::Truncated {
                    expected,
                    received: body.len() as u64,
                }),
                None => Err(BlobError::Transport(err.to_string())),
            };
        }

        check_length(expected, body.len())?;
        Ok(body)
    }
}

/// Blob store mapping `bucket/object` onto `root/bucket/object`
#[derive(Debug, Clone)]
pub struct DirectoryBlobStore {
    root: PathBuf,
}

impl DirectoryBlobStore {
    /// Create a store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory holding one subdirectory per bucket
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl BlobStore for DirectoryBlobStore {
    fn get(&self, bucket: &str, object: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.root.join(bucket).join(object);
        std::fs::read(&path).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => BlobError::NotFound,
            std::io::ErrorKind::PermissionDenied => BlobError::AccessDenied,
            _ => BlobError::Transport(format!("{}: {err}", path.display())),
        })
    }
}

/// Select a store from a configured endpoint: `file://<dir>` or an HTTP base URL
pub fn store_for_endpoint(endpoint: &str) -> Box<dyn BlobStore> {
    endpoint.strip_prefix("file://").map_or_else(
        || Box::new(HttpBlobStore::new(endpoint)) as Box<dyn BlobStore>,
        |dir| Box::new(DirectoryBlobStore::new(dir)),
    )
}

/// Compare an announced length with the received byte count
///
/// # Errors
///
/// Returns [`BlobError::Truncated`] when fewer bytes arrived than announced.
pub fn check_length(expected: Option<u64>, received: usize) -> Result<(), BlobError> {
    match expected {
        Some(expected) if (received as u64) < expected => Err(BlobError::Truncated {
            expected,
            received: received as u64,
        }),
        _ => Ok(()),
    }
}
