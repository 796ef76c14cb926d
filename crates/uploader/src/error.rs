//! Upload error types.

use std::fmt;

use partload_transfer::TransferError;

/// Coarse classification of an [`UploadError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Rejected before any network call.
    Validation,
    /// Network, timeout or server failure. Worth retrying.
    Transient,
    /// The backend or storage broke the protocol contract.
    Protocol,
    /// The backend reported a business error.
    Backend,
    /// The caller cancelled the upload.
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Transient => "transient",
            Self::Protocol => "protocol",
            Self::Backend => "backend",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Errors produced during a multipart upload.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("invalid upload: {0}")]
    Validation(String),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("missing presigned_url")]
    MissingPresignedUrl,

    #[error("missing ETag (check storage CORS ExposeHeaders: ETag)")]
    MissingEtag,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("{0}")]
    Backend(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cancelled")]
    Cancelled,

    #[error("part {part_number}: {source}")]
    Part {
        part_number: u32,
        #[source]
        source: Box<UploadError>,
    },
}

impl UploadError {
    /// Wraps `self` with the part it failed on.
    pub fn for_part(self, part_number: u32) -> Self {
        match self {
            Self::Part { .. } => self,
            other => Self::Part {
                part_number,
                source: Box::new(other),
            },
        }
    }

    /// Maps the error into the failure taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Transfer(TransferError::Io(_)) => ErrorKind::Transient,
            Self::Transfer(_) => ErrorKind::Validation,
            Self::Http(_) | Self::Status { .. } | Self::Timeout(_) => ErrorKind::Transient,
            // An empty URL is re-requested like a failed call.
            Self::MissingPresignedUrl => ErrorKind::Transient,
            Self::MissingEtag | Self::Protocol(_) | Self::Json(_) => ErrorKind::Protocol,
            Self::Backend(_) => ErrorKind::Backend,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Part { source, .. } => source.kind(),
        }
    }

    /// Returns `true` if the operation may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}
