//! Read planning: grouping the byte ranges of projected columns into
//! consecutive parts, each covered by a single seek.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{GantryError, Result};
use crate::index::{OffsetIndexMeta, PageLocation};
use crate::metadata::{ColumnChunkMetadata, RowGroupMetadata};
use crate::ranges::RowRanges;

/// Information needed to read a column chunk or a filtered part of it.
#[derive(Clone)]
pub(crate) struct ChunkDescriptor {
    pub(crate) metadata: ColumnChunkMetadata,
    pub(crate) file_offset: u64,
    pub(crate) size: u64,
}

impl ChunkDescriptor {
    /// Descriptors compare by column identity: there is one logical chunk
    /// per column within a row group, however many byte ranges feed it.
    pub(crate) fn same_column(&self, other: &ChunkDescriptor) -> bool {
        self.metadata.leaf_index() == other.metadata.leaf_index()
    }
}

/// A maximal contiguous byte span covering one or more chunk ranges.
pub(crate) struct ConsecutivePart {
    pub(crate) offset: u64,
    pub(crate) length: u64,
    pub(crate) chunks: Vec<ChunkDescriptor>,
}

impl ConsecutivePart {
    fn new(offset: u64) -> Self {
        Self {
            offset,
            length: 0,
            chunks: Vec::new(),
        }
    }

    /// Position following the last byte of this part.
    pub(crate) fn end_pos(&self) -> u64 {
        self.offset + self.length
    }

    fn add_chunk(&mut self, descriptor: ChunkDescriptor) {
        self.length += descriptor.size;
        self.chunks.push(descriptor);
    }
}

/// The pages of one chunk surviving row-range filtering, with their
/// ordinals in the unfiltered chunk (needed for AAD derivation).
#[derive(Debug)]
pub(crate) struct FilteredOffsetIndex {
    locations: Vec<PageLocation>,
    ordinals: Vec<usize>,
}

impl FilteredOffsetIndex {
    pub(crate) fn page_count(&self) -> usize {
        self.locations.len()
    }

    /// Ordinal of the `i`-th surviving page within the unfiltered chunk.
    pub(crate) fn page_ordinal(&self, i: usize) -> usize {
        self.ordinals[i]
    }
}

/// Keep the pages whose row intervals intersect `ranges`.
pub(crate) fn filter_offset_index(
    index: &OffsetIndexMeta,
    ranges: &RowRanges,
    row_count: i64,
) -> FilteredOffsetIndex {
    let mut locations = Vec::new();
    let mut ordinals = Vec::new();
    for i in 0..index.page_count() {
        let (from, to) = index.page_rows(i, row_count);
        if ranges.is_overlapping(from, to) {
            locations.push(index.page_locations()[i]);
            ordinals.push(i);
        }
    }
    FilteredOffsetIndex { locations, ordinals }
}

/// A surviving byte region of a filtered chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct OffsetRange {
    pub(crate) offset: u64,
    pub(crate) length: u64,
}

impl OffsetRange {
    fn extend(&mut self, offset: u64, length: u64) -> bool {
        if offset == self.offset + self.length {
            self.length += length;
            true
        } else {
            false
        }
    }
}

/// Recoalesce the surviving pages of one chunk into contiguous byte
/// ranges. When a dictionary page precedes the first data page, its bytes
/// are prepended so the chunk decoder always sees the dictionary.
pub(crate) fn calculate_offset_ranges(
    filtered: &FilteredOffsetIndex,
    chunk: &ColumnChunkMetadata,
    first_page_offset: i64,
) -> Vec<OffsetRange> {
    let mut ranges: Vec<OffsetRange> = Vec::new();
    if filtered.locations.is_empty() {
        return ranges;
    }

    let chunk_start = chunk.starting_pos();
    if chunk_start < first_page_offset {
        ranges.push(OffsetRange {
            offset: chunk_start as u64,
            length: (first_page_offset - chunk_start) as u64,
        });
    }

    for location in &filtered.locations {
        let offset = location.offset as u64;
        let length = location.compressed_page_size as u64;
        let extended = match ranges.last_mut() {
            Some(last) => last.extend(offset, length),
            None => false,
        };
        if !extended {
            ranges.push(OffsetRange { offset, length });
        }
    }
    ranges
}

/// Plan the unfiltered read of a row group: whole chunks of the projected
/// columns, merged into consecutive parts. In async mode every column
/// starts its own part (one independent stream per column).
pub(crate) fn plan_row_group(
    block: &RowGroupMetadata,
    projected: &HashSet<usize>,
    async_mode: bool,
) -> Vec<ConsecutivePart> {
    let mut parts: Vec<ConsecutivePart> = Vec::new();
    for chunk in block.columns() {
        if !projected.contains(&chunk.leaf_index()) {
            continue;
        }
        let starting_pos = chunk.starting_pos() as u64;
        let size = chunk.total_compressed_size() as u64;
        // In async mode every column gets a fresh part and hence its own
        // stream.
        push_range(
            &mut parts,
            ChunkDescriptor {
                metadata: chunk.clone(),
                file_offset: starting_pos,
                size,
            },
            async_mode,
        );
    }
    parts
}

/// Plan the filtered read of a row group from per-column filtered offset
/// indexes. Returns the parts plus the filtered index of each projected
/// column (keyed by leaf index), which the chunk decoder needs to emit the
/// right pages under the right ordinals.
pub(crate) fn plan_filtered_row_group(
    block: &RowGroupMetadata,
    projected: &HashSet<usize>,
    ranges: &RowRanges,
    mut offset_index: impl FnMut(&ColumnChunkMetadata) -> Result<Option<Arc<OffsetIndexMeta>>>,
    async_mode: bool,
) -> Result<(Vec<ConsecutivePart>, HashMap<usize, Arc<FilteredOffsetIndex>>)> {
    let mut parts: Vec<ConsecutivePart> = Vec::new();
    let mut filtered_indexes = HashMap::new();

    for chunk in block.columns() {
        if !projected.contains(&chunk.leaf_index()) {
            continue;
        }
        let index = offset_index(chunk)?.ok_or_else(|| GantryError::CorruptTrailer {
            message: format!(
                "column '{}' has no offset index; cannot read filtered pages",
                chunk.path()
            ),
        })?;
        let filtered = Arc::new(filter_offset_index(&index, ranges, block.num_rows()));
        let first_page_offset = index.page_locations()[0].offset;
        // The first range of each column forces a new part in async mode;
        // later ranges of the same column may still coalesce.
        let mut first_range = true;
        for range in calculate_offset_ranges(&filtered, chunk, first_page_offset) {
            push_range(
                &mut parts,
                ChunkDescriptor {
                    metadata: chunk.clone(),
                    file_offset: range.offset,
                    size: range.length,
                },
                async_mode && first_range,
            );
            first_range = false;
        }
        filtered_indexes.insert(chunk.leaf_index(), filtered);
    }
    Ok((parts, filtered_indexes))
}

fn push_range(parts: &mut Vec<ConsecutivePart>, descriptor: ChunkDescriptor, force_new: bool) {
    match parts.last_mut() {
        Some(part) if !force_new && part.end_pos() == descriptor.file_offset => {
            part.add_chunk(descriptor)
        }
        _ => {
            let mut part = ConsecutivePart::new(descriptor.file_offset);
            part.add_chunk(descriptor);
            parts.push(part);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_range_extends_only_when_contiguous() {
        let mut range = OffsetRange {
            offset: 100,
            length: 20,
        };
        assert!(range.extend(120, 5));
        assert_eq!(range.length, 25);
        assert!(!range.extend(130, 5));
    }
}
