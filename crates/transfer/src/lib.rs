//! Building blocks of the multipart upload engine.
//!
//! Everything here is transport-agnostic: part planning, the streaming
//! whole-file checksum, file sources, progress aggregation and the upload
//! session model. The HTTP side lives in `partload-uploader`.

mod hasher;
mod plan;
mod progress;
mod source;
mod types;
mod validation;

pub use hasher::{StreamingHasher, checksum_bytes, hash_source};
pub use plan::{ByteRange, PartPlan, PlannedPart};
pub use progress::{
    PartProgress, ProgressAggregator, ProgressEvent, ProgressThrottle, SpeedEstimator,
};
pub use source::{FileSource, LocalFile, MemorySource, SourceFuture};
pub use types::{FilePart, PartStatus, SessionState, UploadSession};
pub use validation::{validate_part_size, validate_upload_size};

/// Smallest part the storage backend accepts (except for the last part).
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Largest single part the storage backend accepts.
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Maximum number of parts in one multipart upload.
pub const MAX_PARTS: u64 = 10_000;

/// Default part size: 8 MiB.
pub const DEFAULT_PART_SIZE: u64 = 8 * 1024 * 1024;

/// Upper end of the percent band reported while checksumming before START.
pub const CHECKSUM_BAND_END: u8 = 20;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file too large: {size} bytes exceeds the {max} byte limit")]
    FileTooLarge { size: u64, max: u64 },

    #[error("invalid part size: {0}")]
    InvalidPartSize(String),

    #[error("too many parts: {parts} exceeds the {max} part limit")]
    TooManyParts { parts: u64, max: u64 },

    #[error("part number {part_number} out of range 1..={total_parts}")]
    InvalidPartNumber { part_number: u32, total_parts: u32 },
}
