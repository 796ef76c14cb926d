use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use partload_protocol::{Phase, ProgressSnapshot};
use tokio::sync::mpsc;

/// Default interval between emitted snapshots.
const DEFAULT_INTERVAL: Duration = Duration::from_millis(150);

/// Smoothing factor of the throughput EMA.
const SMOOTHING: f64 = 0.25;

/// Minimum upload time before an ETA is reported.
const ETA_WARMUP: Duration = Duration::from_secs(1);

/// Raw progress reported by the hasher and the part workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Bytes consumed so far by the checksum pass.
    Checksum { processed: u64 },
    /// Bytes of `part_number` acknowledged so far by the current attempt.
    Part { part_number: u32, uploaded: u64 },
}

/// Handle given to one part transfer for reporting its byte count.
///
/// Sending never blocks; events are dropped once the aggregator is gone.
/// Clones share the last reported count.
#[derive(Debug, Clone)]
pub struct PartProgress {
    part_number: u32,
    tx: mpsc::UnboundedSender<ProgressEvent>,
    uploaded: Arc<AtomicU64>,
}

impl PartProgress {
    pub fn new(part_number: u32, tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self {
            part_number,
            tx,
            uploaded: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A handle whose reports go nowhere.
    pub fn detached(part_number: u32) -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self::new(part_number, tx)
    }

    pub fn part_number(&self) -> u32 {
        self.part_number
    }

    /// Last count passed to [`report`](Self::report).
    pub fn uploaded(&self) -> u64 {
        self.uploaded.load(Ordering::SeqCst)
    }

    /// Reports the total bytes of this part sent by the current attempt.
    pub fn report(&self, uploaded: u64) {
        self.uploaded.store(uploaded, Ordering::SeqCst);
        let _ = self.tx.send(ProgressEvent::Part {
            part_number: self.part_number,
            uploaded,
        });
    }

    /// Resets the part's counter before a retry.
    pub fn reset(&self) {
        self.report(0);
    }
}

// ---------------------------------------------------------------------------
// ProgressThrottle
// ---------------------------------------------------------------------------

/// Lets an event through at most once per interval.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Returns `true` and arms the throttle if the interval has elapsed.
    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SpeedEstimator
// ---------------------------------------------------------------------------

/// Exponentially smoothed average throughput.
#[derive(Debug, Clone, Default)]
pub struct SpeedEstimator {
    avg: Option<f64>,
}

impl SpeedEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds the mean speed `uploaded / elapsed` into the average.
    pub fn observe(&mut self, uploaded: u64, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return;
        }
        let speed = uploaded as f64 / secs;
        self.avg = Some(match self.avg {
            Some(avg) => avg * (1.0 - SMOOTHING) + speed * SMOOTHING,
            None => speed,
        });
    }

    /// Smoothed speed in bytes/second, if any sample was observed.
    pub fn bytes_per_second(&self) -> Option<f64> {
        self.avg
    }

    /// Estimated whole seconds to send `remaining` bytes.
    pub fn eta(&self, remaining: u64) -> Option<u64> {
        match self.avg {
            Some(speed) if speed > 0.0 => Some((remaining as f64 / speed).round() as u64),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// ProgressAggregator
// ---------------------------------------------------------------------------

/// Folds per-part byte counts into one monotonic global snapshot.
///
/// When a checksum pass precedes the upload it owns `0..band_start`, and
/// the upload fraction is remapped into `band_start..100`. The percent
/// returned never drops below a previously returned one, even when a part
/// counter is reset for a retry.
#[derive(Debug)]
pub struct ProgressAggregator {
    total_bytes: u64,
    band_start: u8,
    phase: Phase,
    parts: HashMap<u32, u64>,
    uploaded: u64,
    checksum_processed: u64,
    last_percent: u8,
    throttle: ProgressThrottle,
    speed: SpeedEstimator,
    upload_started: Option<Instant>,
}

impl ProgressAggregator {
    /// Creates an aggregator for `total_bytes`. `band_start` is the percent
    /// at which the upload phase begins (0 when no checksum band is shown).
    pub fn new(total_bytes: u64, band_start: u8) -> Self {
        let band_start = band_start.min(100);
        Self {
            total_bytes,
            band_start,
            phase: if band_start > 0 {
                Phase::Checksum
            } else {
                Phase::Upload
            },
            parts: HashMap::new(),
            uploaded: 0,
            checksum_processed: 0,
            last_percent: 0,
            throttle: ProgressThrottle::new(DEFAULT_INTERVAL),
            speed: SpeedEstimator::new(),
            upload_started: None,
        }
    }

    /// Overrides the emission interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.throttle = ProgressThrottle::new(interval);
        self
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.uploaded
    }

    pub fn last_percent(&self) -> u8 {
        self.last_percent
    }

    /// Records an event and returns a snapshot if the throttle allows one.
    pub fn apply(&mut self, event: ProgressEvent, now: Instant) -> Option<ProgressSnapshot> {
        match event {
            ProgressEvent::Checksum { processed } => self.record_checksum(processed),
            ProgressEvent::Part {
                part_number,
                uploaded,
            } => self.record_part(part_number, uploaded, now),
        }
        if self.throttle.ready(now) {
            Some(self.snapshot(now))
        } else {
            None
        }
    }

    /// Records checksum progress. Ignored once the upload phase has begun.
    pub fn record_checksum(&mut self, processed: u64) {
        if self.phase == Phase::Checksum {
            self.checksum_processed = processed.min(self.total_bytes);
        }
    }

    /// Records the byte count of one part, replacing its previous value.
    pub fn record_part(&mut self, part_number: u32, uploaded: u64, now: Instant) {
        self.begin_upload(now);
        let previous = self.parts.insert(part_number, uploaded).unwrap_or(0);
        self.uploaded = (self.uploaded.saturating_sub(previous) + uploaded).min(self.total_bytes);
    }

    /// Switches to the upload phase and starts the ETA clock.
    pub fn begin_upload(&mut self, now: Instant) {
        self.phase = Phase::Upload;
        self.upload_started.get_or_insert(now);
    }

    /// Marks every byte as uploaded and returns the final snapshot.
    pub fn finish(&mut self, now: Instant) -> ProgressSnapshot {
        self.begin_upload(now);
        self.uploaded = self.total_bytes;
        self.last_percent = 100;
        ProgressSnapshot {
            percent: 100,
            phase: Phase::Upload,
            eta_seconds: Some(0),
            uploaded_bytes: self.total_bytes,
            total_bytes: self.total_bytes,
        }
    }

    fn snapshot(&mut self, now: Instant) -> ProgressSnapshot {
        let raw = match self.phase {
            Phase::Checksum => {
                scale(self.band_start, ratio(self.checksum_processed, self.total_bytes))
            }
            Phase::Upload => {
                let span = 100 - self.band_start;
                self.band_start + scale(span, ratio(self.uploaded, self.total_bytes))
            }
        };
        let percent = raw.max(self.last_percent);
        self.last_percent = percent;

        ProgressSnapshot {
            percent,
            phase: self.phase,
            eta_seconds: self.estimate_eta(now),
            uploaded_bytes: self.uploaded,
            total_bytes: self.total_bytes,
        }
    }

    fn estimate_eta(&mut self, now: Instant) -> Option<u64> {
        let started = self.upload_started?;
        let elapsed = now.saturating_duration_since(started);
        if elapsed <= ETA_WARMUP || self.uploaded == 0 {
            return None;
        }
        self.speed.observe(self.uploaded, elapsed);
        self.speed.eta(self.total_bytes - self.uploaded)
    }
}

fn ratio(done: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (done as f64 / total as f64).min(1.0)
    }
}

fn scale(span: u8, ratio: f64) -> u8 {
    (f64::from(span) * ratio).round() as u8
}
