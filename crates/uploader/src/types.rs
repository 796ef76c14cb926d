//! Request, outcome and event types of the upload flow.

use partload_protocol::ProgressSnapshot;
use partload_transfer::SessionState;
use serde_json::{Map, Value};

use crate::error::ErrorKind;

/// Content type sent when the caller does not provide one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Caller-supplied metadata for one upload.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    /// MIME type of the file. Defaults to [`DEFAULT_CONTENT_TYPE`].
    pub content_type: Option<String>,
    pub submission_id: Option<String>,
    /// Extra START fields, forwarded verbatim. `collection_name` is also
    /// echoed at COMPLETE.
    pub endpoint_params: Map<String, Value>,
}

impl UploadRequest {
    pub fn content_type(&self) -> &str {
        self.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE)
    }

    pub fn collection_name(&self) -> Option<String> {
        self.endpoint_params
            .get("collection_name")
            .and_then(Value::as_str)
            .map(String::from)
    }
}

/// Terminal result of [`UploadOrchestrator::upload`](crate::UploadOrchestrator::upload).
#[derive(Debug, Clone)]
pub enum UploadOutcome {
    /// COMPLETE succeeded; `response` is the backend's payload verbatim.
    Completed {
        file_id: String,
        upload_id: String,
        response: Value,
    },
    /// The upload stopped. `state` is the last state the session reached
    /// before failing.
    Failed {
        message: String,
        kind: ErrorKind,
        state: SessionState,
    },
}

impl UploadOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// The human-readable error, if the upload failed.
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed { message, .. } => Some(message),
            Self::Completed { .. } => None,
        }
    }
}

/// Events emitted while an upload runs.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    Progress(ProgressSnapshot),
    Completed { file_id: String },
    Failed { error: String },
}
