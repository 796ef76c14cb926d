//! Adaptive pool of concurrent part transfers.
//!
//! Worker slots are semaphore permits. The scheduler loop claims part
//! numbers from a monotonically increasing cursor and spawns one task per
//! claimed part while a slot is free. A success may grow the pool by one
//! slot; a failure shrinks it by one, stops further claims and fails the
//! run once the in-flight siblings have finished.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use partload_protocol::CompletedPart;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, UploadError};

/// Future returned by [`PartJob::run`].
pub type PartFuture<'a> = Pin<Box<dyn Future<Output = Result<CompletedPart, UploadError>> + Send + 'a>>;

/// The work done for one claimed part.
pub trait PartJob: Send + Sync + 'static {
    /// Uploads part `part_number`. `cancel` fires when the run is stopping.
    fn run(&self, part_number: u32, cancel: CancellationToken) -> PartFuture<'_>;
}

// ---------------------------------------------------------------------------
// ConcurrencyState
// ---------------------------------------------------------------------------

/// Claim cursor and concurrency target shared by the pool.
#[derive(Debug)]
pub struct ConcurrencyState {
    target: AtomicU32,
    active: AtomicU32,
    next_part: AtomicU32,
    total_parts: u32,
    min: u32,
    max: u32,
}

impl ConcurrencyState {
    /// Starts at `clamp(total_parts, min, max)` workers.
    pub fn new(total_parts: u32, min: u32, max: u32) -> Self {
        let max = max.max(1);
        let min = min.clamp(1, max);
        Self {
            target: AtomicU32::new(total_parts.min(max).max(min)),
            active: AtomicU32::new(0),
            next_part: AtomicU32::new(1),
            total_parts,
            min,
            max,
        }
    }

    pub fn target(&self) -> u32 {
        self.target.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> u32 {
        self.active.load(Ordering::SeqCst)
    }

    pub fn total_parts(&self) -> u32 {
        self.total_parts
    }

    /// Claims the next part number. Each number is handed out at most once.
    pub fn claim(&self) -> Option<u32> {
        self.next_part
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n <= self.total_parts).then_some(n + 1)
            })
            .ok()
    }

    /// Parts not yet claimed.
    pub fn unclaimed(&self) -> u32 {
        let next = self.next_part.load(Ordering::SeqCst);
        (self.total_parts + 1).saturating_sub(next)
    }

    fn enter(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    /// Raises the target by one if below `max` and more parts remain than
    /// workers running. Returns the new target when raised.
    pub fn on_success(&self) -> Option<u32> {
        self.target
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| {
                (t < self.max && self.unclaimed() > self.active()).then_some(t + 1)
            })
            .ok()
            .map(|t| t + 1)
    }

    /// Lowers the target by one, not below `min`. Returns the new target
    /// when lowered.
    pub fn on_failure(&self) -> Option<u32> {
        self.target
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| {
                (t > self.min).then_some(t - 1)
            })
            .ok()
            .map(|t| t - 1)
    }
}

// ---------------------------------------------------------------------------
// PartResults
// ---------------------------------------------------------------------------

/// Finished parts keyed by part number.
#[derive(Debug, Default)]
pub struct PartResults {
    parts: BTreeMap<u32, String>,
}

impl PartResults {
    /// Records a finished part. A second result for the same part number is
    /// a protocol error.
    pub fn insert(&mut self, part: CompletedPart) -> Result<(), UploadError> {
        if self.parts.contains_key(&part.part_number) {
            return Err(UploadError::Protocol(format!(
                "duplicate result for part {}",
                part.part_number
            )));
        }
        self.parts.insert(part.part_number, part.etag);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Returns the parts ascending by part number.
    pub fn into_sorted(self) -> Vec<CompletedPart> {
        self.parts
            .into_iter()
            .map(|(part_number, etag)| CompletedPart { part_number, etag })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// PartScheduler
// ---------------------------------------------------------------------------

/// Runs a [`PartJob`] for every part number in `1..=total_parts`.
pub struct PartScheduler {
    state: Arc<ConcurrencyState>,
}

impl PartScheduler {
    pub fn new(total_parts: u32, min_concurrency: u32, max_concurrency: u32) -> Self {
        Self {
            state: Arc::new(ConcurrencyState::new(
                total_parts,
                min_concurrency,
                max_concurrency,
            )),
        }
    }

    /// Starts below the default target and lets successes ramp it up.
    /// The value is clamped to `[min, max]`.
    pub fn with_initial_concurrency(self, initial: u32) -> Self {
        let state = &self.state;
        state
            .target
            .store(initial.clamp(state.min, state.max), Ordering::SeqCst);
        self
    }

    pub fn state(&self) -> &ConcurrencyState {
        &self.state
    }

    /// Runs all parts and returns them sorted by part number.
    ///
    /// The first failure stops new claims; parts already in flight are
    /// awaited before the error is returned. Cancelling `cancel` stops new
    /// claims and yields [`UploadError::Cancelled`].
    pub async fn run(
        &self,
        job: Arc<dyn PartJob>,
        cancel: &CancellationToken,
    ) -> Result<Vec<CompletedPart>, UploadError> {
        let stop = cancel.child_token();
        let slots = Arc::new(Semaphore::new(self.state.target() as usize));
        let mut tasks: JoinSet<(u32, Result<CompletedPart, UploadError>)> = JoinSet::new();
        let mut results = PartResults::default();
        let mut first_error: Option<UploadError> = None;
        let mut exhausted = false;

        info!(
            parts = self.state.total_parts(),
            concurrency = self.state.target(),
            "part scheduler started"
        );

        loop {
            if exhausted && tasks.is_empty() {
                break;
            }
            tokio::select! {
                biased;
                _ = stop.cancelled(), if !exhausted => {
                    exhausted = true;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    let outcome = match joined {
                        Ok((part_number, result)) => result.and_then(|part| {
                            debug!(part = part_number, "part recorded");
                            results.insert(part)
                        }),
                        Err(e) => Err(UploadError::Protocol(format!("part task failed: {e}"))),
                    };
                    if let Err(e) = outcome {
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                        stop.cancel();
                    }
                }
                permit = Arc::clone(&slots).acquire_owned(), if !exhausted => {
                    let Ok(permit) = permit else {
                        exhausted = true;
                        continue;
                    };
                    let Some(part_number) = self.state.claim() else {
                        exhausted = true;
                        continue;
                    };
                    debug!(part = part_number, active = self.state.active(), "part claimed");

                    let state = Arc::clone(&self.state);
                    let slots = Arc::clone(&slots);
                    let job = Arc::clone(&job);
                    let token = stop.clone();
                    tasks.spawn(async move {
                        state.enter();
                        let result = job.run(part_number, token).await;
                        state.leave();

                        match &result {
                            Ok(_) => {
                                if let Some(target) = state.on_success() {
                                    slots.add_permits(1);
                                    info!(concurrency = target, "concurrency raised");
                                }
                                drop(permit);
                            }
                            Err(e) if e.kind() == ErrorKind::Cancelled => {
                                debug!(part = part_number, "part cancelled");
                                drop(permit);
                            }
                            Err(e) => {
                                if let Some(target) = state.on_failure() {
                                    permit.forget();
                                    warn!(concurrency = target, "concurrency lowered");
                                }
                                warn!(part = part_number, error = %e, "part failed");
                            }
                        }
                        (part_number, result.map_err(|e| e.for_part(part_number)))
                    });
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        if results.len() != self.state.total_parts() as usize {
            return Err(UploadError::Protocol(format!(
                "{} of {} parts finished",
                results.len(),
                self.state.total_parts()
            )));
        }
        Ok(results.into_sorted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records claims and peak concurrency; fails the listed parts.
    struct MockJob {
        claimed: Mutex<Vec<u32>>,
        running: AtomicU32,
        peak: AtomicU32,
        fail: HashSet<u32>,
        delay: Duration,
    }

    impl MockJob {
        fn new(fail: &[u32]) -> Arc<Self> {
            Arc::new(Self {
                claimed: Mutex::new(Vec::new()),
                running: AtomicU32::new(0),
                peak: AtomicU32::new(0),
                fail: fail.iter().copied().collect(),
                delay: Duration::from_millis(5),
            })
        }

        fn claimed(&self) -> Vec<u32> {
            self.claimed.lock().unwrap().clone()
        }
    }

    impl PartJob for MockJob {
        fn run(&self, part_number: u32, _cancel: CancellationToken) -> PartFuture<'_> {
            Box::pin(async move {
                self.claimed.lock().unwrap().push(part_number);
                let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(self.delay).await;
                self.running.fetch_sub(1, Ordering::SeqCst);

                if self.fail.contains(&part_number) {
                    Err(UploadError::Status {
                        status: 500,
                        body: String::new(),
                    })
                } else {
                    Ok(CompletedPart {
                        part_number,
                        etag: format!("etag-{part_number}"),
                    })
                }
            })
        }
    }

    #[test]
    fn initial_target_is_clamped() {
        assert_eq!(ConcurrencyState::new(1, 2, 8).target(), 2);
        assert_eq!(ConcurrencyState::new(5, 2, 8).target(), 5);
        assert_eq!(ConcurrencyState::new(100, 2, 8).target(), 8);
    }

    #[test]
    fn claim_is_monotonic_and_exhausts() {
        let s = ConcurrencyState::new(3, 1, 4);
        assert_eq!(s.unclaimed(), 3);
        assert_eq!(s.claim(), Some(1));
        assert_eq!(s.claim(), Some(2));
        assert_eq!(s.claim(), Some(3));
        assert_eq!(s.claim(), None);
        assert_eq!(s.claim(), None);
        assert_eq!(s.unclaimed(), 0);
    }

    #[test]
    fn target_moves_within_bounds() {
        let s = ConcurrencyState::new(20, 2, 4);
        assert_eq!(s.target(), 4);
        assert_eq!(s.on_success(), None);

        assert_eq!(s.on_failure(), Some(3));
        assert_eq!(s.on_failure(), Some(2));
        assert_eq!(s.on_failure(), None);
        assert_eq!(s.target(), 2);

        assert_eq!(s.on_success(), Some(3));
        assert_eq!(s.target(), 3);
    }

    #[test]
    fn no_growth_without_remaining_parts() {
        let s = ConcurrencyState::new(3, 1, 8);
        s.on_failure();
        s.on_failure();
        assert_eq!(s.target(), 1);
        for _ in 0..3 {
            s.claim();
        }
        assert_eq!(s.on_success(), None);
    }

    #[test]
    fn results_reject_duplicates_and_sort() {
        let mut r = PartResults::default();
        for n in [3, 1, 2] {
            r.insert(CompletedPart {
                part_number: n,
                etag: format!("e{n}"),
            })
            .unwrap();
        }
        assert!(
            r.insert(CompletedPart {
                part_number: 2,
                etag: "again".into()
            })
            .is_err()
        );
        let sorted: Vec<u32> = r.into_sorted().iter().map(|p| p.part_number).collect();
        assert_eq!(sorted, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn every_part_claimed_exactly_once() {
        for (total, min, max) in [(1, 1, 1), (3, 2, 8), (17, 1, 1), (50, 2, 8), (50, 4, 16)] {
            let job = MockJob::new(&[]);
            let scheduler = PartScheduler::new(total, min, max);
            let parts = scheduler
                .run(job.clone(), &CancellationToken::new())
                .await
                .unwrap();

            let mut claimed = job.claimed();
            assert_eq!(claimed.len(), total as usize, "total={total} max={max}");
            claimed.sort_unstable();
            assert_eq!(claimed, (1..=total).collect::<Vec<_>>());

            let numbers: Vec<u32> = parts.iter().map(|p| p.part_number).collect();
            assert_eq!(numbers, (1..=total).collect::<Vec<_>>());
            assert_eq!(parts[0].etag, "etag-1");
        }
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_max() {
        let job = MockJob::new(&[]);
        PartScheduler::new(40, 2, 3)
            .run(job.clone(), &CancellationToken::new())
            .await
            .unwrap();
        let peak = job.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak {peak}");
        assert!(peak >= 2, "peak {peak}");
    }

    #[tokio::test]
    async fn failure_stops_new_claims() {
        let job = MockJob::new(&[2]);
        let err = PartScheduler::new(10, 1, 1)
            .run(job.clone(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Part { part_number: 2, .. }));
        assert_eq!(job.claimed(), vec![1, 2]);
    }

    #[tokio::test]
    async fn failure_waits_for_in_flight_siblings() {
        let job = MockJob::new(&[1]);
        let scheduler = PartScheduler::new(3, 3, 3);
        let err = scheduler
            .run(job.clone(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Part { part_number: 1, .. }));
        // All three started together; none is still running.
        assert_eq!(job.claimed().len(), 3);
        assert_eq!(job.running.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.state().active(), 0);
    }

    #[tokio::test]
    async fn successes_grow_the_pool() {
        let job = MockJob::new(&[]);
        let scheduler = PartScheduler::new(24, 1, 4).with_initial_concurrency(1);
        assert_eq!(scheduler.state().target(), 1);

        let parts = scheduler
            .run(job.clone(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(parts.len(), 24);
        assert_eq!(scheduler.state().target(), 4);

        let peak = job.peak.load(Ordering::SeqCst);
        assert!(peak > 1, "pool never grew: peak {peak}");
        assert!(peak <= 4, "peak {peak}");
    }

    #[tokio::test]
    async fn failure_shrinks_the_pool() {
        let job = MockJob::new(&[1]);
        let scheduler = PartScheduler::new(3, 1, 3);
        assert_eq!(scheduler.state().target(), 3);

        let err = scheduler
            .run(job.clone(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Part { part_number: 1, .. }));
        assert_eq!(scheduler.state().target(), 2);
    }

    #[test]
    fn initial_concurrency_is_clamped() {
        let s = PartScheduler::new(50, 2, 6).with_initial_concurrency(0);
        assert_eq!(s.state().target(), 2);
        let s = PartScheduler::new(50, 2, 6).with_initial_concurrency(9);
        assert_eq!(s.state().target(), 6);
    }

    /// Parks until the run is cancelled.
    struct ParkedJob {
        started: AtomicU32,
    }

    impl PartJob for ParkedJob {
        fn run(&self, _part_number: u32, cancel: CancellationToken) -> PartFuture<'_> {
            Box::pin(async move {
                self.started.fetch_add(1, Ordering::SeqCst);
                cancel.cancelled().await;
                Err(UploadError::Cancelled)
            })
        }
    }

    #[tokio::test]
    async fn cancelled_parts_keep_the_target() {
        let job = Arc::new(ParkedJob {
            started: AtomicU32::new(0),
        });
        let scheduler = PartScheduler::new(8, 2, 4);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        let watcher = Arc::clone(&job);
        tokio::spawn(async move {
            while watcher.started.load(Ordering::SeqCst) < 4 {
                tokio::task::yield_now().await;
            }
            trigger.cancel();
        });

        let err = scheduler.run(job.clone(), &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(job.started.load(Ordering::SeqCst), 4);
        assert_eq!(scheduler.state().target(), 4);
        assert_eq!(scheduler.state().active(), 0);
    }

    #[tokio::test]
    async fn cancelled_run_claims_nothing() {
        let job = MockJob::new(&[]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = PartScheduler::new(5, 1, 2)
            .run(job.clone(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Cancelled));
        assert!(job.claimed().is_empty());
    }
}
