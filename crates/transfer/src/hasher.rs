use std::io;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::TransferError;
use crate::source::FileSource;

/// Computes SHA-256 of `data` and returns the base64-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(data))
}

/// Incremental SHA-256 over a sequence of buffers.
///
/// Buffer boundaries do not affect the digest. After
/// [`finalize_base64`](Self::finalize_base64) the hasher is reset and can
/// be reused for another pass.
pub struct StreamingHasher {
    digest: Sha256,
    bytes: u64,
    buffers: u64,
    yield_every: u32,
}

impl StreamingHasher {
    /// Creates a hasher that yields to the runtime every `yield_every`
    /// buffers while consuming a stream (0 disables yielding).
    pub fn new(yield_every: u32) -> Self {
        Self {
            digest: Sha256::new(),
            bytes: 0,
            buffers: 0,
            yield_every,
        }
    }

    /// Feeds one buffer.
    pub fn update(&mut self, buf: &[u8]) {
        self.digest.update(buf);
        self.bytes += buf.len() as u64;
        self.buffers += 1;
    }

    /// Bytes consumed since the last reset.
    pub fn bytes_processed(&self) -> u64 {
        self.bytes
    }

    /// Discards all consumed input.
    pub fn reset(&mut self) {
        self.digest.reset();
        self.bytes = 0;
        self.buffers = 0;
    }

    /// Finalizes the digest, resets the hasher and returns standard base64
    /// of the raw 32 digest bytes.
    pub fn finalize_base64(&mut self) -> String {
        let out = self.digest.finalize_reset();
        self.bytes = 0;
        self.buffers = 0;
        STANDARD.encode(out)
    }

    /// Consumes `stream` to the end and returns the base64 digest.
    ///
    /// `on_progress` receives the running byte count after every buffer.
    pub async fn consume<S, F>(
        &mut self,
        mut stream: S,
        mut on_progress: F,
    ) -> Result<String, TransferError>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin,
        F: FnMut(u64),
    {
        self.reset();
        while let Some(buf) = stream.next().await {
            let buf = buf?;
            self.update(&buf);
            on_progress(self.bytes);

            if self.yield_every > 0 && self.buffers % u64::from(self.yield_every) == 0 {
                tokio::task::yield_now().await;
            }
        }
        Ok(self.finalize_base64())
    }
}

/// Hashes the whole content of `source` in one sequential pass.
pub async fn hash_source<F>(
    source: &dyn FileSource,
    yield_every: u32,
    on_progress: F,
) -> Result<String, TransferError>
where
    F: FnMut(u64),
{
    let started = std::time::Instant::now();
    let mut hasher = StreamingHasher::new(yield_every);
    let checksum = hasher.consume(source.buffers(), on_progress).await?;
    debug!(
        file = %source.name(),
        bytes = source.size(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "checksum computed"
    );
    Ok(checksum)
}
