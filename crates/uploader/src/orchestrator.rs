//! Upload orchestrator: sequences START, the part transfers and COMPLETE.
//!
//! Progress snapshots and the terminal result are published on an event
//! channel. Intermediate snapshots are dropped while the reader lags; the
//! final snapshot and the terminal event always find a free slot.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use partload_protocol::{CompleteRequest, CompletedPart, PartUrlRequest, StartRequest};
use partload_transfer::{
    CHECKSUM_BAND_END, FilePart, FileSource, PartPlan, PartProgress, ProgressAggregator,
    ProgressEvent, SessionState, TransferError, UploadSession, hash_source, validate_upload_size,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::backend::{HttpBackend, UploadBackend};
use crate::config::{ChecksumPolicy, UploaderConfig};
use crate::error::UploadError;
use crate::part_client::{HttpPartTransfer, PartTransfer};
use crate::retry::RetryPolicy;
use crate::scheduler::{PartFuture, PartJob, PartScheduler};
use crate::types::{UploadEvent, UploadOutcome, UploadRequest};

/// Capacity of the caller-facing event channel.
const EVENT_CAPACITY: usize = 256;

/// Slots intermediate progress leaves free for the final snapshot and the
/// terminal event.
const TERMINAL_RESERVE: usize = 2;

/// Drives one multipart upload at a time against an [`UploadBackend`].
pub struct UploadOrchestrator {
    backend: Arc<dyn UploadBackend>,
    transfer: Arc<dyn PartTransfer>,
    config: UploaderConfig,
    events_tx: mpsc::Sender<UploadEvent>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
    cancel: CancellationToken,
}

impl UploadOrchestrator {
    /// Creates an orchestrator over the given collaborators.
    pub fn new(
        backend: Arc<dyn UploadBackend>,
        transfer: Arc<dyn PartTransfer>,
        config: UploaderConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        Self {
            backend,
            transfer,
            config,
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
        }
    }

    /// Creates an orchestrator talking HTTP to `api_endpoint`.
    pub fn with_http(
        api_endpoint: &str,
        auth_token: &str,
        config: UploaderConfig,
    ) -> Result<Self, UploadError> {
        let backend = HttpBackend::new(api_endpoint, auth_token, config.request_timeout())?;
        let transfer = HttpPartTransfer::new(config.part_timeout())?;
        Ok(Self::new(Arc::new(backend), Arc::new(transfer), config))
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    /// Returns a cancellation token for uploads run by this orchestrator.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &UploaderConfig {
        &self.config
    }

    /// Uploads `source` and returns the terminal outcome.
    ///
    /// Never panics or returns early with an error: every failure ends in
    /// [`UploadOutcome::Failed`].
    pub async fn upload(&self, source: Arc<dyn FileSource>, request: UploadRequest) -> UploadOutcome {
        let mut session: Option<UploadSession> = None;

        match self.run(&source, &request, &mut session).await {
            Ok((file_id, upload_id, response)) => {
                info!(
                    file = %source.name(),
                    file_id = %file_id,
                    elapsed_ms = session
                        .as_ref()
                        .map_or(0, |s| s.elapsed().as_millis() as u64),
                    "upload completed"
                );
                self.emit_terminal(UploadEvent::Completed {
                    file_id: file_id.clone(),
                })
                .await;
                UploadOutcome::Completed {
                    file_id,
                    upload_id,
                    response,
                }
            }
            Err(e) => {
                let message = e.to_string();
                let state = session
                    .as_ref()
                    .map(UploadSession::state)
                    .unwrap_or(SessionState::Created);
                if let Some(s) = session.as_mut() {
                    s.fail(message.clone());
                }
                error!(file = %source.name(), state = %state, error = %message, "upload failed");
                self.emit_terminal(UploadEvent::Failed {
                    error: message.clone(),
                })
                .await;
                UploadOutcome::Failed {
                    message,
                    kind: e.kind(),
                    state,
                }
            }
        }
    }

    async fn run(
        &self,
        source: &Arc<dyn FileSource>,
        request: &UploadRequest,
        session_slot: &mut Option<UploadSession>,
    ) -> Result<(String, String, Value), UploadError> {
        let total_size = source.size();
        self.config.validate()?;
        validate_upload_size(total_size, self.config.part_size, self.config.max_file_size)?;
        let plan = PartPlan::new(total_size, self.config.part_size)?;
        let session = session_slot.insert(UploadSession::new(plan));

        let policy = self.config.checksum_policy;
        let band_start = match policy {
            ChecksumPolicy::AtStart => CHECKSUM_BAND_END,
            ChecksumPolicy::AtComplete => 0,
        };
        let aggregator = ProgressAggregator::new(total_size, band_start)
            .with_interval(self.config.progress_interval());
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let progress_done = CancellationToken::new();
        let progress_task = self.spawn_progress(aggregator, progress_rx, progress_done.clone());

        let result = self
            .run_session(source, request, session, progress_tx)
            .await;

        progress_done.cancel();
        match (&result, progress_task.await) {
            (Ok(_), Ok(mut aggregator)) => {
                self.emit_terminal(UploadEvent::Progress(aggregator.finish(Instant::now())))
                    .await;
            }
            (_, Err(e)) => debug!(error = %e, "progress task ended abnormally"),
            _ => {}
        }
        result
    }

    async fn run_session(
        &self,
        source: &Arc<dyn FileSource>,
        request: &UploadRequest,
        session: &mut UploadSession,
        progress_tx: mpsc::UnboundedSender<ProgressEvent>,
    ) -> Result<(String, String, Value), UploadError> {
        let yield_every = self.config.hash_yield_every;

        // Checksum: before START, or concurrently with the parts.
        let checksum = match self.config.checksum_policy {
            ChecksumPolicy::AtStart => {
                let tx = progress_tx.clone();
                let hashing = hash_source(source.as_ref(), yield_every, move |processed| {
                    let _ = tx.send(ProgressEvent::Checksum { processed });
                });
                let value = self
                    .cancellable(async { hashing.await.map_err(UploadError::from) })
                    .await?;
                Checksum::Ready(value)
            }
            ChecksumPolicy::AtComplete => {
                let src = Arc::clone(source);
                Checksum::Pending(tokio::spawn(async move {
                    hash_source(src.as_ref(), yield_every, |_| {}).await
                }))
            }
        };
        let _abort_hash = AbortOnDrop(checksum.abort_handle());

        // START
        let start = StartRequest {
            file_name: source.name().to_string(),
            file_type: request.content_type().to_string(),
            file_size_bytes: session.total_size(),
            checksum_value: checksum.ready().map(String::from),
            submission_id: request.submission_id.clone(),
            endpoint_params: request.endpoint_params.clone(),
        };
        let started = self.cancellable(self.backend.start(start)).await?;
        let (Some(file_id), Some(upload_id)) = (started.file_id, started.upload_id) else {
            return Err(UploadError::Protocol(
                "START response is missing file_id or upload_id".into(),
            ));
        };
        if !session.start(file_id.clone(), upload_id.clone()) {
            return Err(UploadError::Protocol("session already started".into()));
        }
        info!(
            file = %source.name(),
            file_id = %file_id,
            bytes = session.total_size(),
            parts = session.total_parts(),
            "upload started"
        );

        // Parts
        session.advance(SessionState::Uploading);
        let job = Arc::new(UploadPartJob {
            backend: Arc::clone(&self.backend),
            transfer: Arc::clone(&self.transfer),
            source: Arc::clone(source),
            plan: *session.plan(),
            file_id: file_id.clone(),
            upload_id: upload_id.clone(),
            url_retry: self.config.part_url_retry,
            transfer_retry: self.config.part_transfer_retry,
            progress_tx,
        });
        let mut scheduler = PartScheduler::new(
            session.total_parts(),
            self.config.min_concurrency,
            self.config.max_concurrency,
        );
        if let Some(initial) = self.config.initial_concurrency {
            scheduler = scheduler.with_initial_concurrency(initial);
        }
        let parts = scheduler.run(job, &self.cancel).await?;

        // COMPLETE
        session.advance(SessionState::Completing);
        let checksum = match checksum {
            Checksum::Ready(value) => value,
            Checksum::Pending(handle) => {
                self.cancellable(async {
                    match handle.await {
                        Ok(result) => result.map_err(UploadError::from),
                        Err(e) => Err(UploadError::Protocol(format!("checksum task failed: {e}"))),
                    }
                })
                .await?
            }
        };

        let complete = CompleteRequest {
            file_id: file_id.clone(),
            upload_id: upload_id.clone(),
            parts,
            file_name: source.name().to_string(),
            collection_name: request.collection_name(),
            collection_path: started.collection_path,
            content_type: request.content_type().to_string(),
            checksum,
            final_file_size: session.total_size(),
        };
        let response = self.cancellable(self.backend.complete(complete)).await?;
        session.advance(SessionState::Completed);

        Ok((file_id, upload_id, response))
    }

    /// Folds progress events into snapshots until `done` fires or every
    /// sender is dropped. Events already queued at `done` are still applied.
    fn spawn_progress(
        &self,
        mut aggregator: ProgressAggregator,
        mut rx: mpsc::UnboundedReceiver<ProgressEvent>,
        done: CancellationToken,
    ) -> JoinHandle<ProgressAggregator> {
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let forward = |aggregator: &mut ProgressAggregator, event: ProgressEvent| {
                if let Some(snapshot) = aggregator.apply(event, Instant::now()) {
                    if events_tx.capacity() > TERMINAL_RESERVE {
                        let _ = events_tx.try_send(UploadEvent::Progress(snapshot));
                    }
                }
            };
            loop {
                tokio::select! {
                    biased;
                    event = rx.recv() => match event {
                        Some(event) => forward(&mut aggregator, event),
                        None => break,
                    },
                    _ = done.cancelled() => {
                        while let Ok(event) = rx.try_recv() {
                            forward(&mut aggregator, event);
                        }
                        break;
                    }
                }
            }
            aggregator
        })
    }

    /// Sends an event the caller must not miss. Waits for channel space once
    /// the receiver has been taken; before that nobody can drain it.
    async fn emit_terminal(&self, event: UploadEvent) {
        if self.events_rx.is_some() {
            let _ = self.events_tx.try_send(event);
            return;
        }
        let _ = self.events_tx.send(event).await;
    }

    async fn cancellable<T>(
        &self,
        fut: impl Future<Output = Result<T, UploadError>>,
    ) -> Result<T, UploadError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(UploadError::Cancelled),
            result = fut => result,
        }
    }
}

/// Whole-file checksum, computed up front or still running.
enum Checksum {
    Ready(String),
    Pending(JoinHandle<Result<String, TransferError>>),
}

impl Checksum {
    fn ready(&self) -> Option<&str> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Pending(_) => None,
        }
    }

    fn abort_handle(&self) -> Option<tokio::task::AbortHandle> {
        match self {
            Self::Ready(_) => None,
            Self::Pending(handle) => Some(handle.abort_handle()),
        }
    }
}

/// Aborts a background task when dropped.
struct AbortOnDrop(Option<tokio::task::AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = &self.0 {
            handle.abort();
        }
    }
}

/// Uploads one part: presigned URL, range read, PUT with retries.
struct UploadPartJob {
    backend: Arc<dyn UploadBackend>,
    transfer: Arc<dyn PartTransfer>,
    source: Arc<dyn FileSource>,
    plan: PartPlan,
    file_id: String,
    upload_id: String,
    url_retry: RetryPolicy,
    transfer_retry: RetryPolicy,
    progress_tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl UploadPartJob {
    async fn upload(&self, part_number: u32, cancel: CancellationToken) -> Result<CompletedPart, UploadError> {
        let mut part = FilePart::claim(&self.plan, part_number)?;

        let url = self
            .url_retry
            .execute("part_url", &cancel, |_| {
                self.backend.part_url(PartUrlRequest {
                    file_id: self.file_id.clone(),
                    upload_id: self.upload_id.clone(),
                    part_number,
                })
            })
            .await?;
        debug!(part = part_number, "presigned url acquired");

        let body = self
            .source
            .read_range(part.range())
            .await
            .map_err(TransferError::from)?;
        let progress = PartProgress::new(part_number, self.progress_tx.clone());

        let result = self
            .transfer_retry
            .execute("part_transfer", &cancel, |attempt| {
                part.begin_attempt();
                if attempt > 0 {
                    progress.reset();
                }
                self.transfer
                    .transfer(url.clone(), body.clone(), progress.clone())
            })
            .await;

        part.record_progress(progress.uploaded());
        match result {
            Ok(etag) => {
                part.complete(etag.clone());
                debug!(part = part_number, attempts = part.attempts(), "part done");
                Ok(CompletedPart { part_number, etag })
            }
            Err(e) => {
                debug!(
                    part = part_number,
                    attempts = part.attempts(),
                    uploaded = part.uploaded_bytes(),
                    "part gave up"
                );
                part.fail();
                Err(e)
            }
        }
    }
}

impl PartJob for UploadPartJob {
    fn run(&self, part_number: u32, cancel: CancellationToken) -> PartFuture<'_> {
        Box::pin(self.upload(part_number, cancel))
    }
}
