//! Upload engine configuration.

use std::time::Duration;

use partload_transfer::{DEFAULT_PART_SIZE, validate_part_size};
use serde::{Deserialize, Serialize};

use crate::error::UploadError;
use crate::retry::RetryPolicy;

/// When the whole-file checksum is computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumPolicy {
    /// Hash before START and send it as `checksum_value`. Progress shows a
    /// checksum band before the upload.
    #[default]
    AtStart,
    /// Hash concurrently with the part uploads and send it only at COMPLETE.
    AtComplete,
}

/// Tunables of the upload engine. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploaderConfig {
    #[serde(default = "default_part_size")]
    pub part_size: u64,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_min_concurrency")]
    pub min_concurrency: u32,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
    /// Slow start: begin with this many workers instead of
    /// `clamp(parts, min, max)` and grow on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_concurrency: Option<u32>,
    #[serde(default)]
    pub checksum_policy: ChecksumPolicy,
    #[serde(default = "RetryPolicy::part_url")]
    pub part_url_retry: RetryPolicy,
    #[serde(default = "RetryPolicy::part_transfer")]
    pub part_transfer_retry: RetryPolicy,
    /// Upper bound on a single part PUT.
    #[serde(default = "default_part_timeout_secs")]
    pub part_timeout_secs: u64,
    /// Timeout of START, part URL and COMPLETE calls.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    /// Buffers hashed between cooperative yields.
    #[serde(default = "default_hash_yield_every")]
    pub hash_yield_every: u32,
    #[serde(default = "default_hash_buffer_size")]
    pub hash_buffer_size: usize,
}

fn default_part_size() -> u64 {
    DEFAULT_PART_SIZE
}

fn default_max_file_size() -> u64 {
    5 * 1024 * 1024 * 1024
}

fn default_min_concurrency() -> u32 {
    2
}

fn default_max_concurrency() -> u32 {
    8
}

fn default_part_timeout_secs() -> u64 {
    15 * 60
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_progress_interval_ms() -> u64 {
    150
}

fn default_hash_yield_every() -> u32 {
    8
}

fn default_hash_buffer_size() -> usize {
    256 * 1024
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            part_size: default_part_size(),
            max_file_size: default_max_file_size(),
            min_concurrency: default_min_concurrency(),
            max_concurrency: default_max_concurrency(),
            initial_concurrency: None,
            checksum_policy: ChecksumPolicy::default(),
            part_url_retry: RetryPolicy::part_url(),
            part_transfer_retry: RetryPolicy::part_transfer(),
            part_timeout_secs: default_part_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            progress_interval_ms: default_progress_interval_ms(),
            hash_yield_every: default_hash_yield_every(),
            hash_buffer_size: default_hash_buffer_size(),
        }
    }
}

impl UploaderConfig {
    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.min_concurrency == 0 {
            return Err(UploadError::Validation(
                "min_concurrency must be at least 1".into(),
            ));
        }
        if self.min_concurrency > self.max_concurrency {
            return Err(UploadError::Validation(format!(
                "min_concurrency {} exceeds max_concurrency {}",
                self.min_concurrency, self.max_concurrency
            )));
        }
        if self.hash_buffer_size == 0 {
            return Err(UploadError::Validation(
                "hash_buffer_size must be > 0".into(),
            ));
        }
        validate_part_size(self.part_size)?;
        Ok(())
    }

    pub fn part_timeout(&self) -> Duration {
        Duration::from_secs(self.part_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}
