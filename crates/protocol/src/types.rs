use serde::{Deserialize, Serialize};

/// Which stage of the upload a progress snapshot describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Whole-file checksum is being computed.
    Checksum,
    /// Parts are being transferred.
    Upload,
}

/// Progress of one upload call, as reported to the caller.
///
/// `percent` never decreases over the lifetime of one upload call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub percent: u8,
    pub phase: Phase,
    pub eta_seconds: Option<u64>,
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
}

impl ProgressSnapshot {
    /// Returns `true` once the upload phase has reached 100%.
    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Upload && self.percent >= 100
    }
}
