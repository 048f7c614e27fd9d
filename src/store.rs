//! Per-row-group page store.
//!
//! [`ChunkPageStore`] owns one row group's worth of column chunk readers.
//! Each [`ColumnChunkPageReader`] drains its chunk's page FIFO, handing out
//! pages decompressed and in file order (dictionary first when present).
//! Advancing the row-group iterator closes the previous store, releasing
//! its buffers and cancelling any outstanding producer task.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_channel::{Receiver, TryRecvError};
use parquet::schema::types::ColumnPath;
use tokio::task::JoinHandle;

use crate::codec::Decompressor;
use crate::error::{GantryError, Result};
use crate::page::{DataPage, DataPageV1, DataPageV2, DictionaryPage, PageSlot};
use crate::ranges::RowRanges;

/// Row context of a store: either a plain row count or the surviving row
/// ranges of a filtered read.
#[derive(Clone, Debug)]
pub enum RowContext {
    Rows(i64),
    Ranges(RowRanges),
}

impl RowContext {
    pub fn row_count(&self) -> i64 {
        match self {
            RowContext::Rows(n) => *n,
            RowContext::Ranges(ranges) => ranges.row_count(),
        }
    }
}

/// Streams the pages of one column chunk, in file order.
pub struct ColumnChunkPageReader {
    column: String,
    decompressor: Arc<dyn Decompressor>,
    receiver: Receiver<PageSlot>,
    dictionary: Option<DictionaryPage>,
    value_count: i64,
    finished: bool,
    task: Option<JoinHandle<()>>,
}

impl ColumnChunkPageReader {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        column: String,
        decompressor: Arc<dyn Decompressor>,
        receiver: Receiver<PageSlot>,
        dictionary: Option<DictionaryPage>,
        value_count: i64,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            column,
            decompressor,
            receiver,
            dictionary,
            value_count,
            finished: false,
            task,
        }
    }

    /// Total values in the (unfiltered) chunk.
    pub fn value_count(&self) -> i64 {
        self.value_count
    }

    /// The chunk's dictionary page, decompressed, when it has one.
    pub fn dictionary_page(&self) -> Result<Option<DictionaryPage>> {
        let Some(dict) = &self.dictionary else {
            return Ok(None);
        };
        let buf = self
            .decompressor
            .decompress(&dict.buf, dict.uncompressed_page_size)
            .map_err(|e| self.with_column(e))?;
        Ok(Some(DictionaryPage {
            buf,
            uncompressed_page_size: dict.uncompressed_page_size,
            num_values: dict.num_values,
            encoding: dict.encoding,
            crc: dict.crc,
        }))
    }

    /// Next data page, decompressed; `None` after the terminal marker.
    ///
    /// Blocks while an asynchronous producer is still working on the page.
    pub fn next_page(&mut self) -> Result<Option<DataPage>> {
        if self.finished {
            return Ok(None);
        }
        match self.receiver.recv() {
            Ok(Ok(Some(page))) => self.decompress(page).map(Some),
            Ok(Ok(None)) => {
                self.finished = true;
                Ok(None)
            }
            Ok(Err(e)) => Err(e),
            // channel torn down without a terminal marker
            Err(_) => {
                self.finished = true;
                Err(GantryError::Interrupted)
            }
        }
    }

    fn decompress(&self, page: DataPage) -> Result<DataPage> {
        match page {
            DataPage::V1(page) => {
                let buf = self
                    .decompressor
                    .decompress(&page.buf, page.uncompressed_page_size)
                    .map_err(|e| self.with_column(e))?;
                Ok(DataPage::V1(DataPageV1 { buf, ..page }))
            }
            DataPage::V2(page) => {
                if !page.is_compressed {
                    return Ok(DataPage::V2(page));
                }
                let levels_len = page.rep_levels.len() + page.def_levels.len();
                let data_len = page.uncompressed_page_size.saturating_sub(levels_len);
                let data: Bytes = self
                    .decompressor
                    .decompress(&page.data, data_len)
                    .map_err(|e| self.with_column(e))?;
                Ok(DataPage::V2(DataPageV2 {
                    data,
                    is_compressed: false,
                    ..page
                }))
            }
        }
    }

    fn with_column(&self, e: GantryError) -> GantryError {
        match e {
            GantryError::CorruptPage { column, message } if column.is_empty() => {
                GantryError::CorruptPage {
                    column: self.column.clone(),
                    message,
                }
            }
            other => other,
        }
    }

    /// Best-effort cancellation of an outstanding producer task. Dropping
    /// the receiver afterwards unblocks a producer parked on a full FIFO.
    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                task.abort();
            }
        }
        // Drain whatever already sits in the queue so producer-side sends
        // that raced the abort do not linger.
        loop {
            match self.receiver.try_recv() {
                Ok(_) => {}
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        self.finished = true;
    }
}

impl Drop for ColumnChunkPageReader {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// One row group's pages: a reader per projected column plus the row
/// context the downstream decoder needs.
pub struct ChunkPageStore {
    row_context: RowContext,
    row_index_offset: i64,
    columns: HashMap<usize, ColumnChunkPageReader>,
    by_path: HashMap<String, usize>,
    io_tasks: Vec<JoinHandle<()>>,
}

impl ChunkPageStore {
    pub(crate) fn new(row_context: RowContext, row_index_offset: i64) -> Self {
        Self {
            row_context,
            row_index_offset,
            columns: HashMap::new(),
            by_path: HashMap::new(),
            io_tasks: Vec::new(),
        }
    }

    /// Track a background buffer-fill task for teardown.
    pub(crate) fn attach_io_task(&mut self, task: JoinHandle<()>) {
        self.io_tasks.push(task);
    }

    pub(crate) fn insert(&mut self, leaf_index: usize, path: String, reader: ColumnChunkPageReader) {
        self.by_path.insert(path, leaf_index);
        self.columns.insert(leaf_index, reader);
    }

    /// Rows selected in this group (all of them on the unfiltered path).
    pub fn row_count(&self) -> i64 {
        self.row_context.row_count()
    }

    /// The filtered row ranges, when this store came from a filtered read.
    pub fn row_ranges(&self) -> Option<&RowRanges> {
        match &self.row_context {
            RowContext::Rows(_) => None,
            RowContext::Ranges(ranges) => Some(ranges),
        }
    }

    /// Index of this group's first row within the file.
    pub fn row_index_offset(&self) -> i64 {
        self.row_index_offset
    }

    /// Leaf indexes of the columns present in this store.
    pub fn column_indexes(&self) -> impl Iterator<Item = usize> + '_ {
        self.columns.keys().copied()
    }

    pub fn page_reader(&mut self, path: &ColumnPath) -> Option<&mut ColumnChunkPageReader> {
        let leaf = *self.by_path.get(&path.string())?;
        self.columns.get_mut(&leaf)
    }

    pub fn page_reader_by_index(&mut self, leaf_index: usize) -> Option<&mut ColumnChunkPageReader> {
        self.columns.get_mut(&leaf_index)
    }

    /// Move a column's reader out of the store, e.g. to drain columns on
    /// separate threads.
    pub fn take_page_reader(&mut self, path: &ColumnPath) -> Option<ColumnChunkPageReader> {
        let leaf = *self.by_path.get(&path.string())?;
        self.columns.remove(&leaf)
    }

    /// The already-read dictionary page of a column, decompressed.
    pub fn dictionary_page(&self, path: &ColumnPath) -> Result<Option<DictionaryPage>> {
        let Some(leaf) = self.by_path.get(&path.string()) else {
            return Ok(None);
        };
        match self.columns.get(leaf) {
            Some(reader) => reader.dictionary_page(),
            None => Ok(None),
        }
    }

    /// Release buffers and cancel outstanding producers.
    pub fn close(&mut self) {
        for reader in self.columns.values_mut() {
            reader.cancel();
        }
        self.columns.clear();
        self.by_path.clear();
        for task in self.io_tasks.drain(..) {
            if !task.is_finished() {
                task.abort();
            }
        }
    }
}

impl Drop for ChunkPageStore {
    fn drop(&mut self) {
        self.close();
    }
}
