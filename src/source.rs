//! Byte-source contracts for the read path.
//!
//! The reader never touches the file system directly: it is handed a
//! [`SourceFile`] and opens [`SeekableBytes`] streams from it. One stream is
//! owned for the lifetime of the reader; asynchronous reads open one
//! additional stream per consecutive part so no stream is ever shared
//! across threads.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;

/// A positioned, seekable byte stream.
///
/// `read_exact` (via the [`Read`] supertrait) must either fill the buffer or
/// fail; short reads surface as `UnexpectedEof`.
pub trait SeekableBytes: Read + Send {
    /// Position the stream at an absolute byte offset.
    fn seek_to(&mut self, pos: u64) -> io::Result<()>;

    /// Current absolute position.
    fn pos(&self) -> u64;
}

impl SeekableBytes for Box<dyn SeekableBytes> {
    fn seek_to(&mut self, pos: u64) -> io::Result<()> {
        self.as_mut().seek_to(pos)
    }

    fn pos(&self) -> u64 {
        self.as_ref().pos()
    }
}

/// A named, fixed-length byte source that can hand out independent streams.
pub trait SourceFile: Send + Sync {
    /// Total length of the source in bytes.
    fn len(&self) -> u64;

    /// True when the source holds no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Open a fresh stream positioned at offset zero.
    fn open(&self) -> io::Result<Box<dyn SeekableBytes>>;

    /// Human-readable identity used in error messages.
    fn describe(&self) -> String;
}

impl SourceFile for Arc<dyn SourceFile> {
    fn len(&self) -> u64 {
        self.as_ref().len()
    }

    fn open(&self) -> io::Result<Box<dyn SeekableBytes>> {
        self.as_ref().open()
    }

    fn describe(&self) -> String {
        self.as_ref().describe()
    }
}

/// [`SourceFile`] backed by a file on disk.
#[derive(Debug, Clone)]
pub struct FsSource {
    path: PathBuf,
    len: u64,
}

impl FsSource {
    /// Stat the file at `path` and capture its length.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let len = std::fs::metadata(&path)?.len();
        Ok(Self { path, len })
    }
}

impl SourceFile for FsSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn open(&self) -> io::Result<Box<dyn SeekableBytes>> {
        let file = File::open(&self.path)?;
        Ok(Box::new(FsStream { file, pos: 0 }))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

struct FsStream {
    file: File,
    pos: u64,
}

impl Read for FsStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.file.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl SeekableBytes for FsStream {
    fn seek_to(&mut self, pos: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(pos))?;
        self.pos = pos;
        Ok(())
    }

    fn pos(&self) -> u64 {
        self.pos
    }
}

/// [`SourceFile`] over an in-memory buffer. Streams are zero-copy slices.
#[derive(Debug, Clone)]
pub struct BytesSource {
    data: Bytes,
    name: String,
}

impl BytesSource {
    /// Wrap a buffer; `name` shows up in error messages.
    pub fn new(data: impl Into<Bytes>, name: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            name: name.into(),
        }
    }
}

impl SourceFile for BytesSource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn open(&self) -> io::Result<Box<dyn SeekableBytes>> {
        Ok(Box::new(BytesStream {
            data: self.data.clone(),
            pos: 0,
        }))
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

struct BytesStream {
    data: Bytes,
    pos: usize,
}

impl Read for BytesStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.data[self.pos.min(self.data.len())..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

impl SeekableBytes for BytesStream {
    fn seek_to(&mut self, pos: u64) -> io::Result<()> {
        if pos > self.data.len() as u64 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("seek to {pos} past end of {}-byte buffer", self.data.len()),
            ));
        }
        self.pos = pos as usize;
        Ok(())
    }

    fn pos(&self) -> u64 {
        self.pos as u64
    }
}
