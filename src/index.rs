//! Column-index and offset-index access.
//!
//! Index blobs live outside the column chunks, addressed by
//! `(offset, length)` references in the chunk metadata. They are read lazily
//! through a per-row-group store and parsed at most once per column per
//! reader lifetime.

use std::collections::HashMap;
use std::sync::Arc;

use std::io::Cursor;

use parquet::format;
use parquet::thrift::TSerializable;
use thrift::protocol::TCompactInputProtocol;

use crate::crypto::{self, FileDecryptor, ModuleType};
use crate::error::{GantryError, Result};
use crate::metadata::{ColumnChunkMetadata, IndexRef};
use crate::source::SeekableBytes;

/// Byte location and row coverage of one page, from the offset index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageLocation {
    pub offset: i64,
    pub compressed_page_size: i32,
    pub first_row_index: i64,
}

/// Parsed offset index of one column chunk: page locations in file order
/// with strictly increasing offsets and first-row indexes.
#[derive(Clone, Debug)]
pub struct OffsetIndexMeta {
    page_locations: Vec<PageLocation>,
}

impl OffsetIndexMeta {
    pub fn page_locations(&self) -> &[PageLocation] {
        &self.page_locations
    }

    pub fn page_count(&self) -> usize {
        self.page_locations.len()
    }

    /// Closed row interval covered by page `i` within a `row_count`-row
    /// group.
    pub fn page_rows(&self, i: usize, row_count: i64) -> (i64, i64) {
        let from = self.page_locations[i].first_row_index;
        let to = match self.page_locations.get(i + 1) {
            Some(next) => next.first_row_index - 1,
            None => row_count - 1,
        };
        (from, to)
    }
}

/// Parsed column index of one column chunk, aligned 1-1 with the offset
/// index pages.
#[derive(Clone, Debug)]
pub struct ColumnIndexMeta {
    null_pages: Vec<bool>,
    min_values: Vec<Vec<u8>>,
    max_values: Vec<Vec<u8>>,
    null_counts: Option<Vec<i64>>,
}

impl ColumnIndexMeta {
    pub fn page_count(&self) -> usize {
        self.null_pages.len()
    }

    pub fn is_null_page(&self, i: usize) -> bool {
        self.null_pages[i]
    }

    /// Plain-encoded min bound of page `i`; `None` for all-null pages.
    pub fn min_value(&self, i: usize) -> Option<&[u8]> {
        (!self.null_pages[i]).then(|| self.min_values[i].as_slice())
    }

    /// Plain-encoded max bound of page `i`; `None` for all-null pages.
    pub fn max_value(&self, i: usize) -> Option<&[u8]> {
        (!self.null_pages[i]).then(|| self.max_values[i].as_slice())
    }

    pub fn null_count(&self, i: usize) -> Option<i64> {
        self.null_counts.as_ref().map(|counts| counts[i])
    }
}

/// Read and parse the column index of `chunk`, or `None` when the chunk
/// carries no reference.
pub(crate) fn read_column_index(
    stream: &mut dyn SeekableBytes,
    chunk: &ColumnChunkMetadata,
    decryptor: Option<&FileDecryptor>,
) -> Result<Option<ColumnIndexMeta>> {
    let Some(index_ref) = chunk.column_index_ref() else {
        return Ok(None);
    };
    let blob = read_index_blob(stream, index_ref, chunk, decryptor, ModuleType::ColumnIndex)?;
    let mut prot = TCompactInputProtocol::new(Cursor::new(&blob[..]));
    let index = format::ColumnIndex::read_from_in_protocol(&mut prot)
        .map_err(|e| corrupt_index(chunk, "column index", e))?;
    Ok(Some(ColumnIndexMeta {
        null_pages: index.null_pages,
        min_values: index.min_values,
        max_values: index.max_values,
        null_counts: index.null_counts,
    }))
}

/// Read and parse the offset index of `chunk`, or `None` when the chunk
/// carries no reference.
pub(crate) fn read_offset_index(
    stream: &mut dyn SeekableBytes,
    chunk: &ColumnChunkMetadata,
    decryptor: Option<&FileDecryptor>,
) -> Result<Option<OffsetIndexMeta>> {
    let Some(index_ref) = chunk.offset_index_ref() else {
        return Ok(None);
    };
    let blob = read_index_blob(stream, index_ref, chunk, decryptor, ModuleType::OffsetIndex)?;
    let mut prot = TCompactInputProtocol::new(Cursor::new(&blob[..]));
    let index = format::OffsetIndex::read_from_in_protocol(&mut prot)
        .map_err(|e| corrupt_index(chunk, "offset index", e))?;
    Ok(Some(OffsetIndexMeta {
        page_locations: index
            .page_locations
            .into_iter()
            .map(|loc| PageLocation {
                offset: loc.offset,
                compressed_page_size: loc.compressed_page_size,
                first_row_index: loc.first_row_index,
            })
            .collect(),
    }))
}

fn read_index_blob(
    stream: &mut dyn SeekableBytes,
    index_ref: IndexRef,
    chunk: &ColumnChunkMetadata,
    decryptor: Option<&FileDecryptor>,
    module: ModuleType,
) -> Result<Vec<u8>> {
    stream.seek_to(index_ref.offset as u64)?;
    let mut blob = vec![0u8; index_ref.length as usize];
    stream.read_exact(&mut blob)?;

    let Some(decryptor) = decryptor else {
        return Ok(blob);
    };
    let setup = decryptor.column_setup(
        chunk.path(),
        chunk.leaf_index() as i16,
        chunk.crypto.as_ref(),
    )?;
    if !setup.encrypted {
        return Ok(blob);
    }
    let aad = crypto::create_module_aad(
        decryptor.file_aad(),
        module,
        chunk.row_group_ordinal(),
        setup.ordinal,
        None,
    );
    let block = setup
        .metadata_decryptor
        .as_ref()
        .ok_or(GantryError::CryptoKeyMissing)?;
    let mut cursor: &[u8] = &blob;
    crypto::decrypt_module(&mut cursor, block.as_ref(), &aad)
}

fn corrupt_index(chunk: &ColumnChunkMetadata, what: &str, e: thrift::Error) -> GantryError {
    GantryError::corrupt_page(
        chunk.path().string(),
        format!("undecodable {what}: {e}"),
    )
}

/// Lazy per-row-group cache of parsed indexes, keyed by schema leaf index.
///
/// Each entry is loaded at most once; absent references cache as `None`.
#[derive(Default)]
pub(crate) struct RowGroupIndexStore {
    column_indexes: HashMap<usize, Option<Arc<ColumnIndexMeta>>>,
    offset_indexes: HashMap<usize, Option<Arc<OffsetIndexMeta>>>,
}

impl RowGroupIndexStore {
    pub(crate) fn column_index(
        &mut self,
        stream: &mut dyn SeekableBytes,
        chunk: &ColumnChunkMetadata,
        decryptor: Option<&FileDecryptor>,
    ) -> Result<Option<Arc<ColumnIndexMeta>>> {
        if let Some(cached) = self.column_indexes.get(&chunk.leaf_index()) {
            return Ok(cached.clone());
        }
        let index = read_column_index(stream, chunk, decryptor)?.map(Arc::new);
        self.column_indexes.insert(chunk.leaf_index(), index.clone());
        Ok(index)
    }

    pub(crate) fn offset_index(
        &mut self,
        stream: &mut dyn SeekableBytes,
        chunk: &ColumnChunkMetadata,
        decryptor: Option<&FileDecryptor>,
    ) -> Result<Option<Arc<OffsetIndexMeta>>> {
        if let Some(cached) = self.offset_indexes.get(&chunk.leaf_index()) {
            return Ok(cached.clone());
        }
        let index = read_offset_index(stream, chunk, decryptor)?.map(Arc::new);
        self.offset_indexes.insert(chunk.leaf_index(), index.clone());
        Ok(index)
    }
}
