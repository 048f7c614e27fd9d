//! The I/O engine.
//!
//! A consecutive part is read with exactly one seek. In synchronous mode
//! the calling thread fills the part's buffers before anything downstream
//! runs; in asynchronous mode a task on the injected I/O executor fills
//! them in the background and hands each one over a channel, so the chunk
//! decoder blocks only when it outruns the producer. Downstream code is
//! identical in both modes: a [`ChunkStream`] serves bytes from whatever
//! buffers have arrived.

use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::{GantryError, Result};
use crate::plan::{ChunkDescriptor, FilteredOffsetIndex};
use crate::source::{SeekableBytes, SourceFile};

/// Split `length` into allocations of at most `max_alloc` bytes.
fn allocation_sizes(length: u64, max_alloc: usize) -> impl Iterator<Item = usize> {
    let max_alloc = max_alloc as u64;
    let full = length / max_alloc;
    let last = (length % max_alloc) as usize;
    (0..full)
        .map(move |_| max_alloc as usize)
        .chain((last > 0).then_some(last))
}

/// Synchronously read one part: a single seek, then buffers of at most
/// `max_alloc` bytes summing to `length`.
pub(crate) fn read_part_sync(
    stream: &mut dyn SeekableBytes,
    offset: u64,
    length: u64,
    max_alloc: usize,
) -> Result<Vec<Bytes>> {
    stream.seek_to(offset)?;
    let mut buffers = Vec::new();
    for size in allocation_sizes(length, max_alloc) {
        let mut buf = vec![0u8; size];
        stream.read_exact(&mut buf)?;
        buffers.push(Bytes::from(buf));
    }
    Ok(buffers)
}

/// Kick off an asynchronous part fill on the I/O executor. The task owns
/// its stream; filled buffers arrive in order on the returned channel,
/// which closes when the part is complete (or after delivering an error).
pub(crate) fn read_part_async(
    io_executor: &Handle,
    mut stream: Box<dyn SeekableBytes>,
    offset: u64,
    length: u64,
    max_alloc: usize,
) -> (Receiver<io::Result<Bytes>>, JoinHandle<()>) {
    let (tx, rx) = unbounded();
    let task = io_executor.spawn_blocking(move || {
        if let Err(e) = stream.seek_to(offset) {
            let _ = tx.send(Err(e));
            return;
        }
        for size in allocation_sizes(length, max_alloc) {
            let mut buf = vec![0u8; size];
            if let Err(e) = stream.read_exact(&mut buf) {
                let _ = tx.send(Err(e));
                return;
            }
            // the consumer may have been dropped; stop quietly
            if tx.send(Ok(Bytes::from(buf))).is_err() {
                return;
            }
        }
    });
    (rx, task)
}

/// Byte stream over the buffers of one chunk.
///
/// Buffers are retained after consumption so a `mark`/`reset` pair can
/// replay the header bytes of the truncated-length workaround; they are a
/// few refcounted slices of the part buffers, released when the chunk is.
pub(crate) struct ChunkStream {
    buffers: Vec<Bytes>,
    idx: usize,
    off: usize,
    consumed: u64,
    feeds: VecDeque<Receiver<io::Result<Bytes>>>,
    mark: Option<(usize, usize, u64)>,
}

impl ChunkStream {
    pub(crate) fn new() -> Self {
        Self {
            buffers: Vec::new(),
            idx: 0,
            off: 0,
            consumed: 0,
            feeds: VecDeque::new(),
            mark: None,
        }
    }

    pub(crate) fn push_buffers(&mut self, buffers: impl IntoIterator<Item = Bytes>) {
        self.buffers.extend(buffers);
    }

    pub(crate) fn push_feed(&mut self, feed: Receiver<io::Result<Bytes>>) {
        self.feeds.push_back(feed);
    }

    /// Total bytes consumed so far.
    pub(crate) fn position(&self) -> u64 {
        self.consumed
    }

    /// Remember the current position for a later [`reset`](Self::reset).
    pub(crate) fn mark(&mut self) {
        self.mark = Some((self.idx, self.off, self.consumed));
    }

    /// Rewind to the most recent mark.
    pub(crate) fn reset(&mut self) {
        if let Some((idx, off, consumed)) = self.mark.take() {
            self.idx = idx;
            self.off = off;
            self.consumed = consumed;
        }
    }

    /// Receive one more buffer from the pending feeds. `Ok(false)` means
    /// every feed is exhausted.
    fn pull(&mut self) -> io::Result<bool> {
        while let Some(feed) = self.feeds.front() {
            match feed.recv() {
                Ok(Ok(buf)) => {
                    self.buffers.push(buf);
                    return Ok(true);
                }
                Ok(Err(e)) => {
                    self.feeds.clear();
                    return Err(e);
                }
                // sender dropped: this part is complete
                Err(_) => {
                    self.feeds.pop_front();
                }
            }
        }
        Ok(false)
    }

    /// Position `idx`/`off` at a non-exhausted buffer, pulling from the
    /// feeds as needed. `Ok(false)` means end of stream.
    fn ensure_current(&mut self) -> io::Result<bool> {
        loop {
            match self.buffers.get(self.idx) {
                Some(buf) if self.off < buf.len() => return Ok(true),
                Some(_) => {
                    self.idx += 1;
                    self.off = 0;
                }
                None => {
                    if !self.pull()? {
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// Take up to `size` bytes as zero-copy slices, stopping early at end
    /// of stream.
    pub(crate) fn slice_up_to(&mut self, size: usize) -> io::Result<Vec<Bytes>> {
        let mut out = Vec::new();
        let mut need = size;
        while need > 0 {
            if !self.ensure_current()? {
                break;
            }
            let buf = &self.buffers[self.idx];
            let take = need.min(buf.len() - self.off);
            out.push(buf.slice(self.off..self.off + take));
            self.off += take;
            self.consumed += take as u64;
            need -= take;
        }
        Ok(out)
    }

    /// Take exactly `size` bytes as zero-copy slices.
    pub(crate) fn slice_exact(&mut self, size: usize) -> io::Result<Vec<Bytes>> {
        let out = self.slice_up_to(size)?;
        let got: usize = out.iter().map(Bytes::len).sum();
        if got != size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("chunk stream ended after {got} of {size} bytes"),
            ));
        }
        Ok(out)
    }

    /// Skip exactly `size` bytes.
    pub(crate) fn skip(&mut self, size: usize) -> io::Result<()> {
        self.slice_exact(size).map(drop)
    }
}

impl Read for ChunkStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || !self.ensure_current()? {
            return Ok(0);
        }
        let current = &self.buffers[self.idx];
        let n = buf.len().min(current.len() - self.off);
        buf[..n].copy_from_slice(&current[self.off..self.off + n]);
        self.off += n;
        self.consumed += n as u64;
        Ok(n)
    }
}

/// Access to the bytes immediately after a part, for the historical
/// truncated-length workaround on the last chunk of the part: when the
/// recorded compressed length undercounts, the missing bytes are fetched
/// from a fresh stream positioned at the part end. The stream is opened on
/// first use and keeps its position across reads.
pub(crate) struct LastChunkTail {
    source: Arc<dyn SourceFile>,
    end_pos: u64,
    stream: Option<Box<dyn SeekableBytes>>,
}

impl LastChunkTail {
    pub(crate) fn new(source: Arc<dyn SourceFile>, end_pos: u64) -> Self {
        Self {
            source,
            end_pos,
            stream: None,
        }
    }

    fn stream(&mut self) -> io::Result<&mut Box<dyn SeekableBytes>> {
        if self.stream.is_none() {
            let mut stream = self.source.open()?;
            stream.seek_to(self.end_pos)?;
            self.stream = Some(stream);
        }
        Ok(self.stream.as_mut().unwrap())
    }

    /// Read exactly `size` bytes past the part end.
    pub(crate) fn read_exact_bytes(&mut self, size: usize) -> io::Result<Bytes> {
        let mut buf = vec![0u8; size];
        self.stream()?.read_exact(&mut buf)?;
        Ok(Bytes::from(buf))
    }
}

impl Read for LastChunkTail {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream()?.read(buf)
    }
}

/// Logical concatenation of the buffered chunk stream and the bytes after
/// the part, used to retry a header parse that ran off the buffer.
pub(crate) struct StreamWithTail<'a> {
    pub(crate) stream: &'a mut ChunkStream,
    pub(crate) tail: &'a mut LastChunkTail,
}

impl Read for StreamWithTail<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.stream.read(buf)?;
        if n > 0 {
            return Ok(n);
        }
        self.tail.read(buf)
    }
}

/// Everything the chunk decoder needs for one column chunk.
pub(crate) struct ChunkData {
    pub(crate) descriptor: ChunkDescriptor,
    pub(crate) stream: ChunkStream,
    pub(crate) tail: Option<LastChunkTail>,
    pub(crate) offset_index: Option<Arc<FilteredOffsetIndex>>,
}

impl ChunkData {
    /// Read exactly `size` bytes of page payload, completing from the tail
    /// when the recorded chunk length undercounts.
    pub(crate) fn read_page_bytes(&mut self, size: usize) -> Result<Bytes> {
        let mut slices = self.stream.slice_up_to(size)?;
        let got: usize = slices.iter().map(Bytes::len).sum();
        if got < size {
            let missing = size - got;
            let position = self.stream.position();
            let tail = self.tail.as_mut().ok_or_else(|| {
                GantryError::corrupt_page(
                    self.descriptor.metadata.path().string(),
                    format!("chunk ended {missing} bytes short of a page at offset {position}"),
                )
            })?;
            tracing::debug!(missing, "completing truncated column chunk from file stream");
            slices.push(tail.read_exact_bytes(missing)?);
        }
        Ok(concat_slices(slices, size))
    }
}

fn concat_slices(slices: Vec<Bytes>, size: usize) -> Bytes {
    if slices.len() == 1 {
        return slices.into_iter().next().unwrap();
    }
    let mut out = Vec::with_capacity(size);
    for slice in slices {
        out.extend_from_slice(&slice);
    }
    Bytes::from(out)
}

/// Concatenates the buffers (or feeds) of the discontinuous ranges of each
/// column produced by filtered planning, preserving column order.
pub(crate) struct ChunkListBuilder {
    entries: Vec<ChunkData>,
}

impl ChunkListBuilder {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn entry(&mut self, descriptor: &ChunkDescriptor) -> &mut ChunkData {
        if let Some(i) = self
            .entries
            .iter()
            .position(|e| e.descriptor.same_column(descriptor))
        {
            return &mut self.entries[i];
        }
        self.entries.push(ChunkData {
            descriptor: descriptor.clone(),
            stream: ChunkStream::new(),
            tail: None,
            offset_index: None,
        });
        self.entries.last_mut().unwrap()
    }

    pub(crate) fn add_buffers(&mut self, descriptor: &ChunkDescriptor, buffers: Vec<Bytes>) {
        self.entry(descriptor).stream.push_buffers(buffers);
    }

    pub(crate) fn add_feed(
        &mut self,
        descriptor: &ChunkDescriptor,
        feed: Receiver<io::Result<Bytes>>,
    ) {
        self.entry(descriptor).stream.push_feed(feed);
    }

    pub(crate) fn set_offset_index(
        &mut self,
        descriptor: &ChunkDescriptor,
        offset_index: Arc<FilteredOffsetIndex>,
    ) {
        self.entry(descriptor).offset_index = Some(offset_index);
    }

    pub(crate) fn set_tail(&mut self, descriptor: &ChunkDescriptor, tail: LastChunkTail) {
        self.entry(descriptor).tail = Some(tail);
    }

    pub(crate) fn build(self) -> Vec<ChunkData> {
        self.entries
    }
}
