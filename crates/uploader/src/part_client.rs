//! PUT of one part to a presigned storage URL.

use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::{StreamExt, stream};
use partload_transfer::{PartProgress, ProgressThrottle};
use reqwest::StatusCode;
use reqwest::header::{CONTENT_LENGTH, ETAG};
use tracing::debug;

use crate::backend::BackendFuture;
use crate::error::UploadError;

/// Size of the body slices handed to the HTTP stack.
const SLICE_SIZE: usize = 64 * 1024;

/// Shortest timeout applied to any part.
const MIN_PART_TIMEOUT: Duration = Duration::from_secs(120);

/// Assumed worst-case throughput used to scale the timeout with part size.
const SLOWEST_BYTES_PER_SEC: u64 = 64 * 1024;

/// Default interval between per-part progress reports.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(120);

/// Transfers one part and returns its entity tag.
pub trait PartTransfer: Send + Sync {
    /// PUTs `body` to `url`, reporting sent bytes on `progress`.
    fn transfer(&self, url: String, body: Bytes, progress: PartProgress)
    -> BackendFuture<'_, String>;
}

/// [`PartTransfer`] over reqwest.
///
/// Presigned URLs carry their own authorization, so no auth header is sent.
pub struct HttpPartTransfer {
    http: reqwest::Client,
    max_timeout: Duration,
    progress_interval: Duration,
}

impl HttpPartTransfer {
    /// Creates a client whose per-part timeout never exceeds `max_timeout`.
    pub fn new(max_timeout: Duration) -> Result<Self, UploadError> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            max_timeout,
            progress_interval: PROGRESS_INTERVAL,
        })
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Timeout for a part of `len` bytes: grows with size from two minutes,
    /// capped at the configured maximum.
    pub fn timeout_for(&self, len: u64) -> Duration {
        let scaled = MIN_PART_TIMEOUT + Duration::from_secs(len / SLOWEST_BYTES_PER_SEC);
        scaled.min(self.max_timeout)
    }

    async fn put(&self, url: &str, body: Bytes, progress: PartProgress) -> Result<String, UploadError> {
        let len = body.len() as u64;
        let limit = self.timeout_for(len);
        let started = Instant::now();
        progress.report(0);

        let request = self
            .http
            .put(url)
            .header(CONTENT_LENGTH, len)
            .body(progress_body(body, progress.clone(), self.progress_interval));

        let resp = match tokio::time::timeout(limit, request.send()).await {
            Ok(resp) => resp?,
            Err(_) => return Err(UploadError::Timeout(limit)),
        };

        let status = resp.status();
        if status != StatusCode::OK && status != StatusCode::NO_CONTENT {
            let body = resp.text().await.unwrap_or_default();
            return Err(UploadError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let etag = resp
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.replace('"', ""))
            .filter(|v| !v.is_empty())
            .ok_or(UploadError::MissingEtag)?;

        progress.report(len);
        debug!(
            part = progress.part_number(),
            bytes = len,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "part transferred"
        );
        Ok(etag)
    }
}

impl PartTransfer for HttpPartTransfer {
    fn transfer(
        &self,
        url: String,
        body: Bytes,
        progress: PartProgress,
    ) -> BackendFuture<'_, String> {
        Box::pin(async move { self.put(&url, body, progress).await })
    }
}

/// Wraps `body` in a stream that reports bytes handed to the connection.
fn progress_body(body: Bytes, progress: PartProgress, interval: Duration) -> reqwest::Body {
    let total = body.len();
    let slices: Vec<Bytes> = (0..total)
        .step_by(SLICE_SIZE)
        .map(|start| body.slice(start..(start + SLICE_SIZE).min(total)))
        .collect();

    let mut sent = 0u64;
    let mut throttle = ProgressThrottle::new(interval);
    let stream = stream::iter(slices).map(move |slice| {
        sent += slice.len() as u64;
        if throttle.ready(Instant::now()) {
            progress.report(sent);
        }
        Ok::<_, std::io::Error>(slice)
    });
    reqwest::Body::wrap_stream(stream)
}
