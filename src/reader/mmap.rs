//! Read-only memory map of a whole GGUF file.
//!
//! `read_at` is a bounds-checked copy out of the mapped region. The file
//! length is re-validated against the filesystem before each copy so a
//! file truncated while mapped surfaces as [`ReaderError::PageFault`]
//! instead of a fatal signal.

use std::fs::File;
use std::path::Path;

use async_trait::async_trait;
use memmap2::Mmap;
use tracing::debug;

use super::{ByteSource, ReaderError};

pub struct MmapSource {
    file: File,
    map: Mmap,
}

impl MmapSource {
    pub fn open(path: &Path) -> Result<Self, ReaderError> {
        let file = File::open(path).map_err(|source| ReaderError::Io { offset: 0, source })?;
        // Safety: the map is read-only; concurrent truncation is guarded
        // against in read_at before any mapped byte is touched.
        let map = unsafe {
            Mmap::map(&file).map_err(|source| ReaderError::Io { offset: 0, source })?
        };
        debug!(path = %path.display(), len = map.len(), "Mapped file");
        Ok(Self { file, map })
    }
}

#[async_trait]
impl ByteSource for MmapSource {
    fn len(&self) -> u64 {
        self.map.len() as u64
    }

    async fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, ReaderError> {
        let map_len = self.map.len() as u64;
        if offset >= map_len {
            return Ok(0);
        }
        let n = (buf.len() as u64).min(map_len - offset);

        // The pages backing [offset, offset + n) must still exist on disk.
        let live_len = self
            .file
            .metadata()
            .map_err(|source| ReaderError::Io { offset, source })?
            .len();
        if offset + n > live_len {
            return Err(ReaderError::PageFault(offset));
        }

        let start = offset as usize;
        buf[..n as usize].copy_from_slice(&self.map[start..start + n as usize]);
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::ByteSourceExt;
    use std::io::Write;

    #[tokio::test]
    async fn test_mapped_reads_match_contents() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&(0u8..=255).collect::<Vec<_>>()).unwrap();

        let mut src = MmapSource::open(tmp.path()).unwrap();
        assert_eq!(src.len(), 256);

        let mut buf = [0u8; 16];
        src.read_exact_at(240, &mut buf).await.unwrap();
        assert_eq!(buf[0], 240);
        assert_eq!(buf[15], 255);
    }

    #[tokio::test]
    async fn test_truncation_reports_page_fault() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&vec![7u8; 4096]).unwrap();

        let mut src = MmapSource::open(tmp.path()).unwrap();
        tmp.as_file().set_len(16).unwrap();

        let mut buf = [0u8; 64];
        let err = src.read_at(1024, &mut buf).await.unwrap_err();
        assert!(matches!(err, ReaderError::PageFault(1024)));
    }
}
