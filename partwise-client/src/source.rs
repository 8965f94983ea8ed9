//! Part sources: restartable-by-index views over upload data

use async_trait::async_trait;
use bytes::Bytes;
use partwise_core::{cache::now_ms, PartRange, SourceIdentity};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::Result;

/// Data to be uploaded, readable one part at a time in any order
#[async_trait]
pub trait PartSource: Send + Sync {
    /// Total size in bytes, if known up front
    fn size(&self) -> Option<u64>;

    /// Content identity used to fingerprint the upload
    fn identity(&self) -> Option<SourceIdentity>;

    /// Bytes of `range`, or `None` when the range starts past the end of the data
    async fn read_part(&self, range: PartRange) -> Result<Option<Bytes>>;
}

/// In-memory source
#[derive(Debug, Clone)]
pub struct BytesSource {
    data: Bytes,
    sized: bool,
}

impl BytesSource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        BytesSource {
            data: data.into(),
            sized: true,
        }
    }

    /// A source that does not reveal its size, like a stream
    pub fn without_size(data: impl Into<Bytes>) -> Self {
        BytesSource {
            data: data.into(),
            sized: false,
        }
    }
}

#[async_trait]
impl PartSource for BytesSource {
    fn size(&self) -> Option<u64> {
        self.sized.then_some(self.data.len() as u64)
    }

    fn identity(&self) -> Option<SourceIdentity> {
        Some(SourceIdentity::digest_of(&self.data))
    }

    async fn read_part(&self, range: PartRange) -> Result<Option<Bytes>> {
        let len = self.data.len() as u64;
        // An empty source still has one (empty) first part
        if range.offset > len || (range.offset == len && !(len == 0 && range.part_number == 1)) {
            return Ok(None);
        }
        let end = (range.offset + range.len).min(len);
        Ok(Some(self.data.slice(range.offset as usize..end as usize)))
    }
}

/// File on local disk, identified by name and modification time
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    size: u64,
    modified_ms: u64,
}

impl FileSource {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        let modified_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or_else(now_ms);
        Ok(FileSource {
            path,
            size: metadata.len(),
            modified_ms,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PartSource for FileSource {
    fn size(&self) -> Option<u64> {
        Some(self.size)
    }

    fn identity(&self) -> Option<SourceIdentity> {
        Some(SourceIdentity::File {
            name: self.path.to_string_lossy().into_owned(),
            modified_ms: self.modified_ms,
        })
    }

    async fn read_part(&self, range: PartRange) -> Result<Option<Bytes>> {
        if range.offset > self.size || (range.offset == self.size && range.part_number != 1) {
            return Ok(None);
        }
        let len = range.len.min(self.size - range.offset);
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(std::io::SeekFrom::Start(range.offset)).await?;
        let mut buffer = vec![0; len as usize];
        file.read_exact(&mut buffer).await?;
        Ok(Some(Bytes::from(buffer)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn range(part_number: u32, part_size: u64) -> PartRange {
        PartRange {
            part_number,
            offset: (part_number as u64 - 1) * part_size,
            len: part_size,
        }
    }

    #[tokio::test]
    async fn test_bytes_source_parts() {
        let source = BytesSource::new(&b"abcdefghij"[..]);
        assert_eq!(source.size(), Some(10));
        assert_eq!(source.read_part(range(1, 4)).await.unwrap().unwrap(), "abcd");
        assert_eq!(source.read_part(range(3, 4)).await.unwrap().unwrap(), "ij");
        assert!(source.read_part(range(4, 4)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bytes_source_out_of_order() {
        let source = BytesSource::new(&b"abcdefghij"[..]);
        assert_eq!(source.read_part(range(2, 4)).await.unwrap().unwrap(), "efgh");
        assert_eq!(source.read_part(range(1, 4)).await.unwrap().unwrap(), "abcd");
    }

    #[tokio::test]
    async fn test_unsized_source_ends_with_none() {
        let source = BytesSource::without_size(&b"abcdefgh"[..]);
        assert_eq!(source.size(), None);
        assert_eq!(source.read_part(range(2, 4)).await.unwrap().unwrap(), "efgh");
        assert!(source.read_part(range(3, 4)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_source_has_one_part() {
        let source = BytesSource::new(Bytes::new());
        assert_eq!(source.read_part(range(1, 4)).await.unwrap().unwrap().len(), 0);
        assert!(source.read_part(range(2, 4)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_source_parts_and_identity() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0123456789").unwrap();

        let source = FileSource::open(file.path()).await.unwrap();
        assert_eq!(source.size(), Some(10));
        assert!(matches!(source.identity(), Some(SourceIdentity::File { .. })));
        assert_eq!(source.read_part(range(2, 4)).await.unwrap().unwrap(), "4567");
        assert_eq!(source.read_part(range(3, 4)).await.unwrap().unwrap(), "89");
        assert!(source.read_part(range(4, 4)).await.unwrap().is_none());
    }
}
