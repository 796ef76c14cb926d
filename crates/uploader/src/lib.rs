//! Presigned-URL multipart upload flow.
//!
//! This crate implements the **network side** of the upload engine on top
//! of `partload-transfer`. Backend calls and part PUTs sit behind the
//! `UploadBackend` and `PartTransfer` traits, so the protocol sequencing
//! can be driven by mocks in tests and by reqwest in the binary.
//!
//! # Pipeline
//!
//! 1. **Validate**: size and part limits, before any network call
//! 2. **Checksum**: SHA-256 of the whole file, before START or alongside the parts
//! 3. **Start**: open the session and receive `file_id`/`upload_id`
//! 4. **Parts**: adaptive pool of workers, each getting a presigned URL and
//!    PUTting one part with retries
//! 5. **Complete**: send the sorted part list and the checksum

pub mod backend;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod part_client;
pub mod retry;
pub mod scheduler;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-export primary types for convenience.
pub use backend::{BackendFuture, HttpBackend, UploadBackend};
pub use config::{ChecksumPolicy, UploaderConfig};
pub use error::{ErrorKind, UploadError};
pub use orchestrator::UploadOrchestrator;
pub use part_client::{HttpPartTransfer, PartTransfer};
pub use retry::RetryPolicy;
pub use scheduler::{ConcurrencyState, PartJob, PartResults, PartScheduler};
pub use types::{DEFAULT_CONTENT_TYPE, UploadEvent, UploadOutcome, UploadRequest};
