//! Byte sources the parser reads from.
//!
//! - [`local`]: positional reads on a local file
//! - [`mmap`]: read-only memory map of the whole file
//! - [`remote`]: HTTP byte-range reads through a bounded ring buffer
//!
//! All three expose the same contract: a total length and a positional
//! `read_at`. Local and mmap reads never suspend; remote reads may.

pub mod local;
pub mod mmap;
pub mod remote;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("I/O error at offset {offset}: {source}")]
    Io {
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected end of data at offset {0}")]
    UnexpectedEof(u64),

    #[error("page fault reading mapped bytes at offset {0}")]
    PageFault(u64),

    #[error("server does not support byte-range requests")]
    RangeNotSupported,

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request canceled")]
    Canceled,
}

/// Random-access byte source backing the GGUF parser.
///
/// `read_at` returns the number of bytes read, which may be short at
/// end of data. Callers that need the full buffer use
/// [`read_exact_at`](ByteSourceExt::read_exact_at).
#[async_trait]
pub trait ByteSource: Send {
    /// Total length of the underlying data in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read up to `buf.len()` bytes starting at `offset`.
    async fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, ReaderError>;
}

/// Extension helpers shared by every source.
#[async_trait]
pub trait ByteSourceExt: ByteSource {
    /// Read exactly `buf.len()` bytes or fail with `UnexpectedEof`.
    async fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), ReaderError> {
        let mut filled = 0usize;
        while filled < buf.len() {
            let n = self
                .read_at(offset + filled as u64, &mut buf[filled..])
                .await?;
            if n == 0 {
                return Err(ReaderError::UnexpectedEof(offset + filled as u64));
            }
            filled += n;
        }
        Ok(())
    }
}

#[async_trait]
impl<S: ByteSource + ?Sized> ByteSourceExt for S {}

/// Any of the concrete sources, picked at runtime by the CLI.
pub enum AnySource {
    File(local::FileSource),
    Mmap(mmap::MmapSource),
    Remote(remote::RemoteSource<remote::HttpTransport>),
}

#[async_trait]
impl ByteSource for AnySource {
    fn len(&self) -> u64 {
        match self {
            AnySource::File(s) => s.len(),
            AnySource::Mmap(s) => s.len(),
            AnySource::Remote(s) => s.len(),
        }
    }

    async fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, ReaderError> {
        match self {
            AnySource::File(s) => s.read_at(offset, buf).await,
            AnySource::Mmap(s) => s.read_at(offset, buf).await,
            AnySource::Remote(s) => s.read_at(offset, buf).await,
        }
    }
}

/// In-memory source, used by tests and benchmarks.
pub struct MemSource {
    data: Vec<u8>,
}

impl MemSource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

#[async_trait]
impl ByteSource for MemSource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, ReaderError> {
        if offset >= self.data.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }
}
