//! Error taxonomy for mosaic requests, provisioning and the local cache

use crate::io::blob::BlobError;
use std::fmt;
use std::path::PathBuf;

/// Main error type for all mosaic operations
#[derive(Debug)]
pub enum MosaicError {
    /// Missing or invalid configuration (levels, bucket, tuning parameters)
    Configuration {
        /// Name of the offending configuration field
        field: &'static str,
        /// Explanation of why the value is unusable
        reason: String,
    },

    /// A level's patch library or search index could not be loaded or built
    Provisioning {
        /// Block size being provisioned
        level: u32,
        /// Step that failed (for example "load index" or "parse library")
        operation: &'static str,
        /// Description of the failure
        reason: String,
    },

    /// Remote blob storage refused or failed a transfer
    Storage {
        /// Bucket the object was requested from
        bucket: String,
        /// Object name within the bucket
        object: String,
        /// Underlying storage failure
        source: BlobError,
    },

    /// Request rejected before any provisioning or compute work
    InvalidRequest {
        /// What is wrong with the request
        reason: String,
    },

    /// The image codec could not decode the payload
    ImageDecode {
        /// Underlying codec error
        source: image::ImageError,
    },

    /// Decoded image would exceed the configured pixel budget
    DecodeBombGuard {
        /// Declared image width
        width: u32,
        /// Declared image height
        height: u32,
        /// Maximum number of pixels accepted
        limit: u64,
    },

    /// Re-encoding the composed frames failed
    ImageEncode {
        /// Output format that was attempted
        format: image::ImageFormat,
        /// Underlying codec error
        source: image::ImageError,
    },

    /// General file system operation failure
    FileSystem {
        /// Path involved in the operation
        path: PathBuf,
        /// Description of the operation that failed
        operation: &'static str,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Internal computation produced an inconsistent result
    Computation {
        /// Name of the computation that failed
        operation: &'static str,
        /// Description of the failure
        reason: String,
    },

    /// The request was cancelled between frames
    Cancelled,
}

/// Coarse classification used by transport layers to choose a status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operator error; not retried
    Configuration,
    /// Remote fetch or local load/build failure; the whole request may be retried
    Provisioning,
    /// Caller error (bad level, undecodable image)
    InvalidRequest,
    /// Image too large to decode safely
    DecodeBombGuard,
    /// Caller abandoned the request
    Cancelled,
    /// Encoding, file system or invariant failure
    Internal,
}

impl ErrorKind {
    /// Stable lowercase name for envelopes and logs
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Provisioning => "provisioning",
            Self::InvalidRequest => "invalid_request",
            Self::DecodeBombGuard => "decode_bomb_guard",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

impl MosaicError {
    /// Classify the error for the request layer
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Provisioning { .. } | Self::Storage { .. } => ErrorKind::Provisioning,
            Self::InvalidRequest { .. } | Self::ImageDecode { .. } => ErrorKind::InvalidRequest,
            Self::DecodeBombGuard { .. } => ErrorKind::DecodeBombGuard,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::ImageEncode { .. } | Self::FileSystem { .. } | Self::Computation { .. } => {
                ErrorKind::Internal
            }
        }
    }

    /// Whether the caller may reasonably retry the whole request
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Provisioning)
    }
}

impl fmt::Display for MosaicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { field, reason } => {
                write!(f, "Invalid configuration for '{field}': {reason}")
            }
            Self::Provisioning {
                level,
                operation,
                reason,
            } => {
                write!(f, "Failed to {operation} for level {level}: {reason}")
            }
            Self::Storage {
                bucket,
                object,
                source,
            } => {
                write!(
                    f,
                    "Failed to fetch object '{object}' from bucket '{bucket}': {source}"
                )
            }
            Self::InvalidRequest { reason } => write!(f, "Invalid request: {reason}"),
            Self::ImageDecode { source } => write!(f, "Failed to decode image: {source}"),
            Self::DecodeBombGuard {
                width,
                height,
                limit,
            } => {
                write!(
                    f,
                    "Image of {width}x{height} pixels exceeds the decode limit of {limit} pixels"
                )
            }
            Self::ImageEncode { format, source } => {
                write!(f, "Failed to encode {format:?} output: {source}")
            }
            Self::FileSystem {
                path,
                operation,
                source,
            } => {
                write!(
                    f,
                    "File system error during {operation} on '{}': {source}",
                    path.display()
                )
            }
            Self::Computation { operation, reason } => {
                write!(f, "Computation error in {operation}: {reason}")
            }
            Self::Cancelled => write!(f, "Request cancelled"),
        }
    }
}

impl std::error::Error for MosaicError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ImageDecode { source } | Self::ImageEncode { source, .. } => Some(source),
            Self::FileSystem { source, .. } => Some(source),
            Self::Storage { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Convenience type alias for mosaic results
pub type Result<T> = std::result::Result<T, MosaicError>;

impl From<image::ImageError> for MosaicError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageDecode { source: err }
    }
}

impl From<std::io::Error> for MosaicError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("<unknown>"),
            operation: "unknown",
            source: err,
        }
    }
}

/// Create an invalid request error
pub fn invalid_request(reason: &impl ToString) -> MosaicError {
    MosaicError::InvalidRequest {
        reason: reason.to_string(),
    }
}

/// Create a configuration error
pub fn configuration_error(field: &'static str, reason: &impl ToString) -> MosaicError {
    MosaicError::Configuration {
        field,
        reason: reason.to_string(),
    }
}

/// Create a provisioning error for a level
pub fn provisioning_error(
    level: u32,
    operation: &'static str,
    reason: &impl ToString,
) -> MosaicError {
    MosaicError::Provisioning {
        level,
        operation,
        reason: reason.to_string(),
    }
}

/// Create a computation error
pub fn computation_error(operation: &'static str, reason: &impl ToString) -> MosaicError {
    MosaicError::Computation {
        operation,
        reason: reason.to_string(),
    }
}

/// Attach a path and operation to an I/O error
pub fn file_system_error(
    path: impl Into<PathBuf>,
    operation: &'static str,
) -> impl FnOnce(std::io::Error) -> MosaicError {
    let path = path.into();
    move |source| MosaicError::FileSystem {
        path,
        operation,
        source,
    }
}
