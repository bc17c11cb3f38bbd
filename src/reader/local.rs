//! Positional reads on a local file.

use std::fs::File;
use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use super::{ByteSource, ReaderError};

/// Local file source using positional reads, no shared cursor.
pub struct FileSource {
    file: File,
    len: u64,
}

impl FileSource {
    pub fn open(path: &Path) -> Result<Self, ReaderError> {
        let file = File::open(path).map_err(|source| ReaderError::Io { offset: 0, source })?;
        let len = file
            .metadata()
            .map_err(|source| ReaderError::Io { offset: 0, source })?
            .len();
        debug!(path = %path.display(), len, "Opened local file");
        Ok(Self { file, len })
    }

    #[cfg(unix)]
    fn pread(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        use std::os::unix::fs::FileExt;
        self.file.read_at(buf, offset)
    }

    #[cfg(windows)]
    fn pread(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        use std::os::windows::fs::FileExt;
        self.file.seek_read(buf, offset)
    }
}

#[async_trait]
impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    async fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, ReaderError> {
        self.pread(offset, buf)
            .map_err(|source| ReaderError::Io { offset, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::ByteSourceExt;
    use std::io::Write;

    #[tokio::test]
    async fn test_positional_reads() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();

        let mut src = FileSource::open(tmp.path()).unwrap();
        assert_eq!(src.len(), 10);

        let mut buf = [0u8; 4];
        src.read_exact_at(3, &mut buf).await.unwrap();
        assert_eq!(&buf, b"3456");

        // Reads are stateless: earlier offsets still work.
        src.read_exact_at(0, &mut buf).await.unwrap();
        assert_eq!(&buf, b"0123");
    }
}
