//! Random-access byte sources the decoder reads from.

use crate::error::{GgufError, Result};
use memmap2::Mmap;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// Bounded random-access reads over a GGUF container.
///
/// `read_exact_at` either fills the whole buffer or fails; a range past
/// [`size`](ByteSource::size) is reported as [`GgufError::Truncated`].
pub trait ByteSource: Send {
    fn size(&self) -> u64;

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    fn read(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact_at(offset, &mut buf)?;
        Ok(buf)
    }
}

pub(crate) fn check_range(offset: u64, len: u64, size: u64) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(GgufError::Truncated { offset, needed: len, size }),
    }
}

/// Owned or borrowed in-memory bytes.
#[derive(Debug, Clone)]
pub struct SliceSource<B> {
    data: B,
}

impl<B: AsRef<[u8]>> SliceSource<B> {
    pub fn new(data: B) -> Self {
        Self { data }
    }

    pub fn into_inner(self) -> B {
        self.data
    }
}

impl<B: AsRef<[u8]> + Send> ByteSource for SliceSource<B> {
    fn size(&self) -> u64 {
        self.data.as_ref().len() as u64
    }

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len() as u64, self.size())?;
        let start = offset as usize;
        buf.copy_from_slice(&self.data.as_ref()[start..start + buf.len()]);
        Ok(())
    }
}

/// Read-only memory map of a local file. Pages fault in lazily.
pub struct MmapSource {
    mmap: Mmap,
}

impl MmapSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        // SAFETY: the mapping is read-only and never handed out mutably.
        // Concurrent truncation by another process is outside our control.
        let mmap = unsafe { Mmap::map(&file) }?;
        tracing::debug!(path = %path.display(), size = mmap.len(), "mapped GGUF file");
        Ok(Self { mmap })
    }
}

impl ByteSource for MmapSource {
    fn size(&self) -> u64 {
        self.mmap.len() as u64
    }

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len() as u64, self.size())?;
        let start = offset as usize;
        buf.copy_from_slice(&self.mmap[start..start + buf.len()]);
        Ok(())
    }
}

/// Buffered reads through a regular file handle.
pub struct FileSource {
    reader: BufReader<File>,
    size: u64,
    pos: u64,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self { reader: BufReader::new(file), size, pos: 0 })
    }

    fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        if offset == self.pos {
            return Ok(());
        }
        // Relative seeks keep the read buffer when the target is inside it.
        match i64::try_from(offset as i128 - self.pos as i128) {
            Ok(delta) => self.reader.seek_relative(delta)?,
            Err(_) => {
                self.reader.seek(SeekFrom::Start(offset))?;
            }
        }
        self.pos = offset;
        Ok(())
    }
}

impl ByteSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len() as u64, self.size)?;
        self.seek_to(offset)?;
        match self.reader.read_exact(buf) {
            Ok(()) => {
                self.pos += buf.len() as u64;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                // File shrank underneath us; position is now unknown.
                self.reader.seek(SeekFrom::Start(0))?;
                self.pos = 0;
                Err(GgufError::Truncated { offset, needed: buf.len() as u64, size: self.size })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn slice_reads_are_bounded() {
        let mut src = SliceSource::new(vec![1u8, 2, 3, 4]);
        assert_eq!(src.read(1, 2).unwrap(), vec![2, 3]);
        let err = src.read(3, 2).unwrap_err();
        assert!(matches!(err, GgufError::Truncated { offset: 3, needed: 2, size: 4 }));
        assert!(src.read(u64::MAX, 1).is_err());
    }

    #[test]
    fn file_and_mmap_agree() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..=255).collect();
        tmp.write_all(&data).unwrap();
        tmp.flush().unwrap();

        let mut file = FileSource::open(tmp.path()).unwrap();
        let mut mmap = MmapSource::open(tmp.path()).unwrap();
        for (offset, len) in [(0u64, 4usize), (200, 16), (10, 3), (252, 4)] {
            assert_eq!(file.read(offset, len).unwrap(), mmap.read(offset, len).unwrap());
        }
        assert!(matches!(file.read(250, 10), Err(GgufError::Truncated { .. })));
        assert!(matches!(mmap.read(250, 10), Err(GgufError::Truncated { .. })));
    }
}
