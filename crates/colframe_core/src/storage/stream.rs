//! Byte-stream abstraction over segment storage.
//!
//! The block format reads and writes through this trait so that segment
//! files can live on local disk, in memory (tests, cache sinks), or behind
//! any other transport a collaborator provides.

use std::fmt::Debug;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use colframe_error::{FrameError, Result, ResultExt};
use parking_lot::Mutex;

/// Health of a stream, mirroring the usual fstream-style status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// All prior operations succeeded.
    Good,
    /// An operation failed; the stream should not be used further.
    Bad,
}

/// A seekable byte stream.
///
/// `read`/`write`/`seek` return errors on failure and additionally latch
/// the status to `Bad`, so callers holding a stream across many operations
/// can check health once at the end.
pub trait ByteStream: Debug + Send {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn write(&mut self, buf: &[u8]) -> Result<usize>;
    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;
    fn close(&mut self) -> Result<()>;
    fn is_open(&self) -> bool;
    fn status(&self) -> StreamStatus;

    fn good(&self) -> bool {
        self.status() == StreamStatus::Good
    }

    fn bad(&self) -> bool {
        self.status() == StreamStatus::Bad
    }

    fn read_exact(&mut self, mut buf: &mut [u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.read(buf)?;
            if n == 0 {
                return Err(FrameError::new("unexpected end of stream"));
            }
            buf = &mut buf[n..];
        }
        Ok(())
    }

    fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.write(buf)?;
            if n == 0 {
                return Err(FrameError::new("stream refused write"));
            }
            buf = &buf[n..];
        }
        Ok(())
    }
}

/// Stream backed by a local file.
#[derive(Debug)]
pub struct FileStream {
    path: String,
    file: Option<File>,
    status: StreamStatus,
}

impl FileStream {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .context_fn(|| format!("failed to create '{}'", path.display()))?;
        Ok(FileStream {
            path: path.display().to_string(),
            file: Some(file),
            status: StreamStatus::Good,
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .context_fn(|| format!("failed to open '{}'", path.display()))?;
        Ok(FileStream {
            path: path.display().to_string(),
            file: Some(file),
            status: StreamStatus::Good,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn file_mut(&mut self) -> Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| FrameError::new("stream is closed"))
    }

    fn latch<T>(&mut self, res: std::io::Result<T>, what: &'static str) -> Result<T> {
        match res {
            Ok(v) => Ok(v),
            Err(e) => {
                self.status = StreamStatus::Bad;
                Err(FrameError::with_source(
                    format!("{what} failed on '{}'", self.path),
                    e,
                ))
            }
        }
    }
}

impl ByteStream for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let res = self.file_mut()?.read(buf);
        self.latch(res, "read")
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let res = self.file_mut()?.write(buf);
        self.latch(res, "write")
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let res = self.file_mut()?.seek(pos);
        self.latch(res, "seek")
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            let res = file.flush();
            self.latch(res, "flush")?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn status(&self) -> StreamStatus {
        self.status
    }
}

/// Shared growable byte buffer so an in-memory "file" written by one
/// stream can be reopened for reading by another.
pub type SharedBuffer = Arc<Mutex<Vec<u8>>>;

/// Stream backed by an in-memory buffer. Used by tests and by cache sinks
/// before they spill.
#[derive(Debug)]
pub struct MemoryStream {
    buffer: SharedBuffer,
    pos: usize,
    open: bool,
}

impl MemoryStream {
    pub fn new() -> Self {
        MemoryStream::with_buffer(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn with_buffer(buffer: SharedBuffer) -> Self {
        MemoryStream {
            buffer,
            pos: 0,
            open: true,
        }
    }

    pub fn buffer(&self) -> SharedBuffer {
        self.buffer.clone()
    }
}

impl Default for MemoryStream {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteStream for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let data = self.buffer.lock();
        if self.pos >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - self.pos);
        buf[..n].copy_from_slice(&data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let mut data = self.buffer.lock();
        if self.pos > data.len() {
            data.resize(self.pos, 0);
        }
        let end = self.pos + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[self.pos..end].copy_from_slice(buf);
        self.pos = end;
        Ok(buf.len())
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let len = self.buffer.lock().len() as i64;
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::End(n) => len + n,
            SeekFrom::Current(n) => self.pos as i64 + n,
        };
        if target < 0 {
            return Err(FrameError::new("seek before start of stream"));
        }
        self.pos = target as usize;
        Ok(self.pos as u64)
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn status(&self) -> StreamStatus {
        StreamStatus::Good
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_stream_round_trip() {
        let mut s = MemoryStream::new();
        s.write_all(b"hello world").unwrap();
        let buffer = s.buffer();

        let mut r = MemoryStream::with_buffer(buffer);
        r.seek(SeekFrom::Start(6)).unwrap();
        let mut out = [0u8; 5];
        r.read_exact(&mut out).unwrap();
        assert_eq!(&out, b"world");
    }

    #[test]
    fn read_past_end_is_eof() {
        let mut s = MemoryStream::new();
        s.write_all(b"abc").unwrap();
        s.seek(SeekFrom::Start(10)).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(s.read(&mut buf).unwrap(), 0);
    }
}
