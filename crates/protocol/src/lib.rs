//! Wire types shared between the upload engine and the backend API.
//!
//! The backend speaks snake_case JSON over authenticated POST; part lists
//! use the storage service's `PartNumber`/`ETag` casing. Progress snapshots
//! are emitted to callers in camelCase.

pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use messages::{
    CompleteRequest, CompletedPart, PartUrlRequest, PartUrlResponse, StartRequest,
    StartResponse, backend_error,
};
pub use types::{Phase, ProgressSnapshot};
