use std::future::Future;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::pin::Pin;

use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::plan::ByteRange;

/// Default read buffer for sequential passes: 256 KiB.
const DEFAULT_BUFFER_SIZE: usize = 256 * 1024;

/// Boxed future returned by [`FileSource`] reads.
pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = io::Result<T>> + Send + 'a>>;

/// The file being uploaded.
///
/// Part transfers read disjoint ranges concurrently and out of order, while
/// the checksum pass consumes the content once, front to back.
pub trait FileSource: Send + Sync {
    /// File name reported to the backend.
    fn name(&self) -> &str;

    /// Total size in bytes, fixed for the lifetime of the source.
    fn size(&self) -> u64;

    /// Returns a fresh lazy stream of buffers covering the whole content.
    ///
    /// Every call starts again from offset 0.
    fn buffers(&self) -> BoxStream<'static, io::Result<Bytes>>;

    /// Reads exactly the bytes in `range`.
    fn read_range(&self, range: ByteRange) -> SourceFuture<'_, Bytes>;
}

// ---------------------------------------------------------------------------
// LocalFile
// ---------------------------------------------------------------------------

/// A file on the local filesystem.
///
/// The size is captured at [`open`](Self::open); reads never go past it.
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
    name: String,
    size: u64,
    buffer_size: usize,
}

impl LocalFile {
    /// Stats `path` and prepares it for reading.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path.display()),
            ));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            path,
            name,
            size: metadata.len(),
            buffer_size: DEFAULT_BUFFER_SIZE,
        })
    }

    /// Sets the buffer size used by [`FileSource::buffers`].
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FileSource for LocalFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn buffers(&self) -> BoxStream<'static, io::Result<Bytes>> {
        let path = self.path.clone();
        let size = self.size;
        let capacity = self.buffer_size;
        stream::once(async move { tokio::fs::File::open(path).await })
            .map_ok(move |file| ReaderStream::with_capacity(file.take(size), capacity))
            .try_flatten()
            .boxed()
    }

    fn read_range(&self, range: ByteRange) -> SourceFuture<'_, Bytes> {
        Box::pin(async move {
            if range.end > self.size || range.start > range.end {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("range {}..{} outside file of {} bytes", range.start, range.end, self.size),
                ));
            }
            let mut file = tokio::fs::File::open(&self.path).await?;
            file.seek(SeekFrom::Start(range.start)).await?;
            let mut buf = vec![0u8; range.len() as usize];
            file.read_exact(&mut buf).await?;
            Ok(Bytes::from(buf))
        })
    }
}

// ---------------------------------------------------------------------------
// MemorySource
// ---------------------------------------------------------------------------

/// Content already held in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    data: Bytes,
    buffer_size: usize,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Sets the buffer size used by [`FileSource::buffers`].
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }
}

impl FileSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn buffers(&self) -> BoxStream<'static, io::Result<Bytes>> {
        let data = self.data.clone();
        let step = self.buffer_size;
        let chunks: Vec<io::Result<Bytes>> = (0..data.len())
            .step_by(step)
            .map(|start| Ok(data.slice(start..(start + step).min(data.len()))))
            .collect();
        stream::iter(chunks).boxed()
    }

    fn read_range(&self, range: ByteRange) -> SourceFuture<'_, Bytes> {
        let result = if range.end > self.size() || range.start > range.end {
            Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "range {}..{} outside buffer of {} bytes",
                    range.start,
                    range.end,
                    self.size()
                ),
            ))
        } else {
            Ok(self.data.slice(range.start as usize..range.end as usize))
        };
        Box::pin(async move { result })
    }
}
