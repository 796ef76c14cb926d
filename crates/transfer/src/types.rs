use std::fmt;
use std::time::Instant;

use crate::TransferError;
use crate::plan::{ByteRange, PartPlan, PlannedPart};

/// Lifecycle of one upload call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Created,
    Started,
    Uploading,
    Completing,
    Completed,
    Failed,
}

impl SessionState {
    /// Returns `true` for `Completed` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// Any non-terminal state may fail; otherwise states only advance in
    /// protocol order.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Created, Started)
                | (Started, Uploading)
                | (Uploading, Completing)
                | (Completing, Completed)
                | (Created | Started | Uploading | Completing, Failed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::Uploading => "uploading",
            Self::Completing => "completing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One multipart upload attempt for one file.
///
/// Identifiers are assigned once by [`start`](Self::start) and never change.
#[derive(Debug, Clone)]
pub struct UploadSession {
    file_id: Option<String>,
    upload_id: Option<String>,
    plan: PartPlan,
    state: SessionState,
    created_at: Instant,
    completed_at: Option<Instant>,
    error: Option<String>,
}

impl UploadSession {
    pub fn new(plan: PartPlan) -> Self {
        Self {
            file_id: None,
            upload_id: None,
            plan,
            state: SessionState::Created,
            created_at: Instant::now(),
            completed_at: None,
            error: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn plan(&self) -> &PartPlan {
        &self.plan
    }

    pub fn total_size(&self) -> u64 {
        self.plan.total_size()
    }

    pub fn part_size(&self) -> u64 {
        self.plan.part_size()
    }

    pub fn total_parts(&self) -> u32 {
        self.plan.total_parts()
    }

    pub fn file_id(&self) -> Option<&str> {
        self.file_id.as_deref()
    }

    pub fn upload_id(&self) -> Option<&str> {
        self.upload_id.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Records the backend-issued identifiers and moves to `Started`.
    ///
    /// Returns `false` (and changes nothing) if the session already has
    /// identifiers or is not in `Created`.
    pub fn start(&mut self, file_id: String, upload_id: String) -> bool {
        if self.file_id.is_some() || !self.advance(SessionState::Started) {
            return false;
        }
        self.file_id = Some(file_id);
        self.upload_id = Some(upload_id);
        true
    }

    /// Moves to `next` if the transition is legal.
    pub fn advance(&mut self, next: SessionState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        if next.is_terminal() {
            self.completed_at = Some(Instant::now());
        }
        true
    }

    /// Moves to `Failed` and keeps the message. No-op when already terminal.
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.advance(SessionState::Failed) {
            self.error = Some(message.into());
        }
    }

    /// Time since creation, or total duration once terminal.
    pub fn elapsed(&self) -> std::time::Duration {
        match self.completed_at {
            Some(done) => done.duration_since(self.created_at),
            None => self.created_at.elapsed(),
        }
    }
}

/// Per-part transfer status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartStatus {
    Pending,
    InFlight,
    Done,
    Failed,
}

/// Worker-owned state of one claimed part.
#[derive(Debug, Clone)]
pub struct FilePart {
    part_number: u32,
    range: ByteRange,
    uploaded_bytes: u64,
    status: PartStatus,
    etag: Option<String>,
    attempts: u32,
}

impl FilePart {
    /// Creates the part for a claimed part number.
    pub fn claim(plan: &PartPlan, part_number: u32) -> Result<Self, TransferError> {
        Ok(Self::from(plan.part(part_number)?))
    }

    pub fn part_number(&self) -> u32 {
        self.part_number
    }

    pub fn range(&self) -> ByteRange {
        self.range
    }

    pub fn len(&self) -> u64 {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.uploaded_bytes
    }

    pub fn status(&self) -> PartStatus {
        self.status
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Begins a transfer attempt. A retry starts again from zero bytes.
    pub fn begin_attempt(&mut self) {
        self.status = PartStatus::InFlight;
        self.uploaded_bytes = 0;
        self.attempts += 1;
    }

    /// Records bytes sent by the current attempt. Never decreases within
    /// one attempt and never exceeds the part length.
    pub fn record_progress(&mut self, uploaded: u64) {
        self.uploaded_bytes = self.uploaded_bytes.max(uploaded.min(self.len()));
    }

    /// Marks the part done with its entity tag.
    pub fn complete(&mut self, etag: String) {
        self.uploaded_bytes = self.len();
        self.status = PartStatus::Done;
        self.etag = Some(etag);
    }

    pub fn fail(&mut self) {
        self.status = PartStatus::Failed;
    }
}

impl From<PlannedPart> for FilePart {
    fn from(p: PlannedPart) -> Self {
        Self {
            part_number: p.part_number,
            range: p.range,
            uploaded_bytes: 0,
            status: PartStatus::Pending,
            etag: None,
            attempts: 0,
        }
    }
}
