//! The row-group reader facade.
//!
//! [`FileReader`] owns the base stream, the parsed footer, and the
//! per-row-group lazy caches (index stores and row ranges). It iterates row
//! groups in file order; advancing closes the previous [`ChunkPageStore`].
//! Dictionary pages, bloom filters and the page indexes of any column chunk
//! are also readable at random through the same reader.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;

use crossbeam_channel::{bounded, unbounded};
use parquet::schema::types::ColumnPath;

use crate::bloom::{Sbbf, UPPER_BOUND_BYTES};
use crate::chunk::{read_part_async, read_part_sync, ChunkListBuilder, ChunkStream, LastChunkTail};
use crate::crypto::{self, ColumnDecryptionSetup, ModuleType};
use crate::error::{GantryError, Result};
use crate::index::{ColumnIndexMeta, OffsetIndexMeta, RowGroupIndexStore};
use crate::metadata::{ColumnChunkMetadata, FileMetadata, Footer, RowGroupMetadata};
use crate::options::ReadOptions;
use crate::page::{
    read_encrypted_page_header, read_page_header, DictionaryPage, PageProducer,
    PAGE_QUEUE_CAPACITY,
};
use crate::plan::{plan_filtered_row_group, plan_row_group, ConsecutivePart};
use crate::predicate::{Predicate, TriState};
use crate::ranges::RowRanges;
use crate::select::{self, DictionaryValues};
use crate::source::{SeekableBytes, SourceFile};
use crate::store::{ChunkPageStore, ColumnChunkPageReader, RowContext};
use crate::trailer::read_footer_from;

use parquet::format;
use parquet::thrift::TSerializable;
use thrift::protocol::TCompactInputProtocol;

/// Byte-level append contract: a companion writer that can copy row groups
/// verbatim from a positioned stream.
pub trait RowGroupSink {
    /// Append the given row groups, reading their bytes from `stream`.
    fn append_row_groups(
        &mut self,
        stream: &mut dyn SeekableBytes,
        row_groups: &[RowGroupMetadata],
    ) -> Result<()>;
}

/// Reader over one columnar file.
pub struct FileReader {
    source: Arc<dyn SourceFile>,
    stream: Box<dyn SeekableBytes>,
    options: ReadOptions,
    footer: Footer,
    file_metadata: FileMetadata,
    row_groups: Vec<RowGroupMetadata>,
    projected: HashSet<usize>,
    block_index_stores: Vec<Option<RowGroupIndexStore>>,
    block_row_ranges: Vec<Option<RowRanges>>,
    current_block: usize,
    current_store: Option<ChunkPageStore>,
    async_warned: bool,
    planned_bytes: u64,
    read_bytes: u64,
    closed: bool,
}

impl std::fmt::Debug for FileReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileReader")
            .field("current_block", &self.current_block)
            .field("row_groups", &self.row_groups.len())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl FileReader {
    /// Open with default options.
    pub fn open(source: Arc<dyn SourceFile>) -> Result<Self> {
        Self::open_with_options(source, ReadOptions::default())
    }

    /// Open a file: parse the trailer, then apply the enabled filter
    /// levels to the row groups. The stream opened here is closed again if
    /// trailer parsing fails.
    pub fn open_with_options(source: Arc<dyn SourceFile>, options: ReadOptions) -> Result<Self> {
        let mut stream = source.open()?;
        let footer = read_footer_from(&source, &mut stream, &options)?;
        let file_metadata = footer.file_metadata().clone();
        let all_blocks = footer.row_groups().to_vec();

        let projected = (0..file_metadata.schema().num_columns()).collect();
        let mut reader = Self {
            source,
            stream,
            options,
            footer,
            file_metadata,
            row_groups: Vec::new(),
            projected,
            block_index_stores: Vec::new(),
            block_row_ranges: Vec::new(),
            current_block: 0,
            current_store: None,
            async_warned: false,
            planned_bytes: 0,
            read_bytes: 0,
            closed: false,
        };
        reader.row_groups = reader.filter_row_groups(all_blocks)?;
        reader.block_index_stores = (0..reader.row_groups.len()).map(|_| None).collect();
        reader.block_row_ranges = (0..reader.row_groups.len()).map(|_| None).collect();
        Ok(reader)
    }

    /// The parsed footer (after metadata filtering, before predicate
    /// filtering).
    pub fn footer(&self) -> &Footer {
        &self.footer
    }

    pub fn file_metadata(&self) -> &FileMetadata {
        &self.file_metadata
    }

    /// Row groups surviving the enabled filter levels, in file order.
    pub fn row_groups(&self) -> &[RowGroupMetadata] {
        &self.row_groups
    }

    /// Total rows across the surviving row groups.
    pub fn record_count(&self) -> i64 {
        self.row_groups.iter().map(RowGroupMetadata::num_rows).sum()
    }

    /// Rows surviving column-index filtering, or [`record_count`] when
    /// that level is disabled or there is no predicate.
    ///
    /// [`record_count`]: Self::record_count
    pub fn filtered_record_count(&mut self) -> Result<i64> {
        if !self.options.use_column_index_filter() || self.options.record_filter().is_none() {
            return Ok(self.record_count());
        }
        let mut total = 0;
        for i in 0..self.row_groups.len() {
            total += self.row_ranges(i)?.row_count();
        }
        Ok(total)
    }

    /// Restrict subsequent reads to the given column paths. Paths not in
    /// the schema are ignored.
    pub fn set_projection(&mut self, paths: &[ColumnPath]) {
        let schema = self.file_metadata.schema();
        let wanted: HashSet<String> = paths.iter().map(|p| p.string()).collect();
        self.projected = (0..schema.num_columns())
            .filter(|&i| wanted.contains(&schema.column(i).path().string()))
            .collect();
    }

    /// Bytes selected for reading so far.
    pub fn planned_bytes(&self) -> u64 {
        self.planned_bytes
    }

    /// Bytes handed to the I/O engine so far (sum of part lengths).
    pub fn bytes_read(&self) -> u64 {
        self.read_bytes
    }

    // -----------------------------------------------------------------
    // row-group iteration
    // -----------------------------------------------------------------

    /// Read the row group at `block_index` without touching the iterator
    /// state.
    pub fn read_row_group(&mut self, block_index: usize) -> Result<Option<ChunkPageStore>> {
        self.internal_read_row_group(block_index)
    }

    /// Read the next row group in file order. The previous row group's
    /// store is closed.
    pub fn read_next_row_group(&mut self) -> Result<Option<&mut ChunkPageStore>> {
        let Some(store) = self.internal_read_row_group(self.current_block)? else {
            return Ok(None);
        };
        if let Some(mut previous) = self.current_store.replace(store) {
            previous.close();
        }
        self.advance();
        Ok(self.current_store.as_mut())
    }

    /// Read the row group at `block_index`, skipping pages eliminated by
    /// the column-index filter. Returns `None` when no row survives.
    pub fn read_filtered_row_group(&mut self, block_index: usize) -> Result<Option<ChunkPageStore>> {
        if block_index >= self.row_groups.len() {
            return Ok(None);
        }
        if !self.options.use_column_index_filter() || self.options.record_filter().is_none() {
            return self.internal_read_row_group(block_index);
        }
        let row_count = self.row_groups[block_index].num_rows();
        if row_count == 0 {
            return Err(illegal_empty_row_group());
        }
        let ranges = self.row_ranges(block_index)?;
        if ranges.is_empty() {
            return Ok(None);
        }
        if ranges.row_count() == row_count {
            return self.internal_read_row_group(block_index);
        }
        self.internal_read_filtered_row_group(block_index, ranges)
            .map(Some)
    }

    /// Read the next row group, skipping pages eliminated by the
    /// column-index filter. Row groups whose surviving row ranges are
    /// empty are skipped entirely.
    pub fn read_next_filtered_row_group(&mut self) -> Result<Option<&mut ChunkPageStore>> {
        loop {
            if self.current_block == self.row_groups.len() {
                return Ok(None);
            }
            if !self.options.use_column_index_filter() || self.options.record_filter().is_none() {
                return self.read_next_row_group();
            }
            let block_index = self.current_block;
            let row_count = self.row_groups[block_index].num_rows();
            if row_count == 0 {
                return Err(illegal_empty_row_group());
            }
            let ranges = self.row_ranges(block_index)?;
            if ranges.is_empty() {
                self.advance();
                continue;
            }
            if ranges.row_count() == row_count {
                return self.read_next_row_group();
            }
            let store = self.internal_read_filtered_row_group(block_index, ranges)?;
            if let Some(mut previous) = self.current_store.replace(store) {
                previous.close();
            }
            self.advance();
            return Ok(self.current_store.as_mut());
        }
    }

    /// Advance past the next row group without reading it.
    pub fn skip_next_row_group(&mut self) -> bool {
        self.advance()
    }

    fn advance(&mut self) -> bool {
        if self.current_block == self.row_groups.len() {
            return false;
        }
        self.current_block += 1;
        true
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(GantryError::Io(io::Error::new(
                io::ErrorKind::Other,
                "reader is closed",
            )));
        }
        Ok(())
    }

    fn check_async(&mut self) -> bool {
        if !self.options.async_reader() {
            return false;
        }
        if self.options.async_ready() {
            return true;
        }
        if !self.async_warned {
            tracing::warn!(
                "asynchronous reads are configured but the executors have not been injected; \
                 falling back to synchronous reads"
            );
            self.async_warned = true;
        }
        false
    }

    fn internal_read_row_group(&mut self, block_index: usize) -> Result<Option<ChunkPageStore>> {
        self.ensure_open()?;
        if block_index >= self.row_groups.len() {
            return Ok(None);
        }
        let block = self.row_groups[block_index].clone();
        if block.num_rows() == 0 {
            return Err(illegal_empty_row_group());
        }
        let async_mode = self.check_async();
        let parts = plan_row_group(&block, &self.projected, async_mode);
        self.planned_bytes += parts.iter().map(|p| p.length).sum::<u64>();

        let mut builder = ChunkListBuilder::new();
        let mut store = ChunkPageStore::new(RowContext::Rows(block.num_rows()), block.row_index_offset());
        for part in &parts {
            self.read_part(part, async_mode, &mut builder, &mut store)?;
        }
        self.assemble_store(&block, builder, async_mode, &mut store)?;
        Ok(Some(store))
    }

    fn internal_read_filtered_row_group(
        &mut self,
        block_index: usize,
        ranges: RowRanges,
    ) -> Result<ChunkPageStore> {
        self.ensure_open()?;
        let block = self.row_groups[block_index].clone();
        let async_mode = self.check_async();
        let projected = self.projected.clone();

        let mut lookup = |chunk: &ColumnChunkMetadata| -> Result<Option<Arc<OffsetIndexMeta>>> {
            self.offset_index_cached(block_index, chunk)
        };
        let (parts, filtered_indexes) =
            plan_filtered_row_group(&block, &projected, &ranges, &mut lookup, async_mode)?;
        self.planned_bytes += parts.iter().map(|p| p.length).sum::<u64>();

        let mut builder = ChunkListBuilder::new();
        let mut store =
            ChunkPageStore::new(RowContext::Ranges(ranges), block.row_index_offset());
        for part in &parts {
            for descriptor in &part.chunks {
                if let Some(index) = filtered_indexes.get(&descriptor.metadata.leaf_index()) {
                    builder.set_offset_index(descriptor, Arc::clone(index));
                }
            }
            self.read_part(part, async_mode, &mut builder, &mut store)?;
        }
        self.assemble_store(&block, builder, async_mode, &mut store)?;
        Ok(store)
    }

    /// Read one consecutive part: exactly one seek, buffers capped at
    /// `max_allocation_size`. The part's last descriptor gets a tail so
    /// the historical truncated-length workaround can complete it.
    fn read_part(
        &mut self,
        part: &ConsecutivePart,
        async_mode: bool,
        builder: &mut ChunkListBuilder,
        store: &mut ChunkPageStore,
    ) -> Result<()> {
        self.read_bytes += part.length;
        if async_mode {
            // a fresh stream per part; the fill task owns it
            let part_stream = self.source.open()?;
            let io_executor = self.options.io_executor().expect("async mode checked").clone();
            let (feed, task) = read_part_async(
                &io_executor,
                part_stream,
                part.offset,
                part.length,
                self.options.max_allocation_size(),
            );
            // every chunk of an async part belongs to one column
            builder.add_feed(&part.chunks[0], feed);
            store.attach_io_task(task);
        } else {
            let buffers = read_part_sync(
                &mut self.stream,
                part.offset,
                part.length,
                self.options.max_allocation_size(),
            )?;
            let mut part_stream = ChunkStream::new();
            part_stream.push_buffers(buffers);
            for descriptor in &part.chunks {
                let slices = part_stream.slice_exact(descriptor.size as usize)?;
                builder.add_buffers(descriptor, slices);
            }
        }
        if let Some(last) = part.chunks.last() {
            builder.set_tail(
                last,
                LastChunkTail::new(Arc::clone(&self.source), part.end_pos()),
            );
        }
        Ok(())
    }

    /// Turn the built chunk list into page readers, decrypting and
    /// decoding pages synchronously or on the processing executor.
    fn assemble_store(
        &mut self,
        block: &RowGroupMetadata,
        builder: ChunkListBuilder,
        async_mode: bool,
        store: &mut ChunkPageStore,
    ) -> Result<()> {
        for chunk_data in builder.build() {
            let meta = chunk_data.descriptor.metadata.clone();
            let decompressor = self.options.codec_factory().decompressor(meta.codec())?;

            let (header_decryptor, data_decryptor, file_aad, column_ordinal) =
                match &self.file_metadata.decryptor {
                    Some(fd) => {
                        let setup = fd.column_setup(
                            meta.path(),
                            meta.leaf_index() as i16,
                            meta.crypto.as_ref(),
                        )?;
                        if setup.encrypted {
                            (
                                setup.metadata_decryptor.clone(),
                                setup.data_decryptor.clone(),
                                fd.file_aad().to_vec(),
                                setup.ordinal,
                            )
                        } else {
                            (None, None, Vec::new(), meta.leaf_index() as i16)
                        }
                    }
                    None => (None, None, Vec::new(), meta.leaf_index() as i16),
                };

            let (sender, receiver) = if async_mode {
                bounded(PAGE_QUEUE_CAPACITY)
            } else {
                unbounded()
            };
            let mut producer = PageProducer::new(
                chunk_data,
                self.options.page_checksum_verification(),
                header_decryptor,
                data_decryptor,
                file_aad,
                block.ordinal(),
                column_ordinal,
                sender,
            );

            let (dictionary, task) = if async_mode {
                // first page inline (the dictionary, when there is one);
                // the rest on the processing executor
                if producer.has_more_pages() {
                    producer.read_one_page()?;
                }
                let dictionary = producer.take_dictionary();
                let process = self
                    .options
                    .process_executor()
                    .expect("async mode checked")
                    .clone();
                (dictionary, Some(producer.fill_async(&process)))
            } else {
                (producer.fill_sync()?, None)
            };

            let reader = ColumnChunkPageReader::new(
                meta.path().string(),
                decompressor,
                receiver,
                dictionary,
                meta.num_values(),
                task,
            );
            store.insert(meta.leaf_index(), meta.path().string(), reader);
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // predicate push-down
    // -----------------------------------------------------------------

    /// Apply the enabled filter levels, cheapest first. A row group is
    /// kept unless some level proves the predicate false for it.
    fn filter_row_groups(
        &mut self,
        blocks: Vec<RowGroupMetadata>,
    ) -> Result<Vec<RowGroupMetadata>> {
        let Some(pred) = self.options.record_filter().cloned() else {
            return Ok(blocks);
        };
        let mut kept = Vec::with_capacity(blocks.len());
        for block in blocks {
            if self.options.use_stats_filter()
                && select::evaluate_statistics(&pred, &block) == TriState::False
            {
                continue;
            }
            if self.options.use_dictionary_filter() {
                let mut cache: HashMap<usize, Option<DictionaryValues>> = HashMap::new();
                let mut lookup = |chunk: &ColumnChunkMetadata| {
                    if let Some(values) = cache.get(&chunk.leaf_index()) {
                        return Ok(values.clone());
                    }
                    let values = self.dictionary_values(chunk)?;
                    cache.insert(chunk.leaf_index(), values.clone());
                    Ok(values)
                };
                if select::evaluate_dictionary(&pred, &block, &mut lookup)? == TriState::False {
                    continue;
                }
            }
            if self.options.use_bloom_filter() {
                let mut cache: HashMap<usize, Option<Sbbf>> = HashMap::new();
                let mut lookup = |chunk: &ColumnChunkMetadata| {
                    if let Some(bloom) = cache.get(&chunk.leaf_index()) {
                        return Ok(bloom.clone());
                    }
                    let bloom = self.read_bloom_filter(chunk)?;
                    cache.insert(chunk.leaf_index(), bloom.clone());
                    Ok(bloom)
                };
                if select::evaluate_bloom(&pred, &block, &mut lookup)? == TriState::False {
                    continue;
                }
            }
            kept.push(block);
        }
        Ok(kept)
    }

    /// The decoded dictionary of a chunk, but only when the chunk is
    /// provably all-dictionary-encoded (otherwise absence proves nothing).
    fn dictionary_values(&mut self, chunk: &ColumnChunkMetadata) -> Result<Option<DictionaryValues>> {
        if !select::all_pages_dictionary_encoded(chunk) {
            return Ok(None);
        }
        let Some(page) = self.read_dictionary(chunk)? else {
            return Ok(None);
        };
        let type_length = chunk.column_descriptor().type_length().max(0) as usize;
        Ok(select::decode_plain_dictionary(
            &page.buf,
            chunk.physical_type(),
            type_length,
        ))
    }

    /// Surviving row ranges of a row group under the column-index filter,
    /// computed once and cached.
    fn row_ranges(&mut self, block_index: usize) -> Result<RowRanges> {
        debug_assert!(
            self.options.record_filter().is_some(),
            "row ranges are only defined under a record filter"
        );
        if let Some(ranges) = &self.block_row_ranges[block_index] {
            return Ok(ranges.clone());
        }
        let pred: Arc<Predicate> = self
            .options
            .record_filter()
            .cloned()
            .expect("checked by callers");
        let block = self.row_groups[block_index].clone();
        let mut lookup = |chunk: &ColumnChunkMetadata| {
            Ok((
                self.column_index_cached(block_index, chunk)?,
                self.offset_index_cached(block_index, chunk)?,
            ))
        };
        let ranges = select::compute_row_ranges(&pred, &block, &mut lookup)?;
        self.block_row_ranges[block_index] = Some(ranges.clone());
        Ok(ranges)
    }

    fn column_index_cached(
        &mut self,
        block_index: usize,
        chunk: &ColumnChunkMetadata,
    ) -> Result<Option<Arc<ColumnIndexMeta>>> {
        let decryptor = self.file_metadata.decryptor.clone();
        let store = self.block_index_stores[block_index].get_or_insert_with(Default::default);
        store.column_index(&mut self.stream, chunk, decryptor.as_deref())
    }

    fn offset_index_cached(
        &mut self,
        block_index: usize,
        chunk: &ColumnChunkMetadata,
    ) -> Result<Option<Arc<OffsetIndexMeta>>> {
        let decryptor = self.file_metadata.decryptor.clone();
        let store = self.block_index_stores[block_index].get_or_insert_with(Default::default);
        store.offset_index(&mut self.stream, chunk, decryptor.as_deref())
    }

    // -----------------------------------------------------------------
    // random-access readers
    // -----------------------------------------------------------------

    /// Read and decompress the dictionary page of a column chunk, or
    /// `None` when the chunk has none.
    pub fn read_dictionary(&mut self, meta: &ColumnChunkMetadata) -> Result<Option<DictionaryPage>> {
        self.ensure_open()?;
        if !meta.has_dictionary_page() {
            return Ok(None);
        }
        if self.stream.pos() != meta.starting_pos() as u64 {
            self.stream.seek_to(meta.starting_pos() as u64)?;
        }

        let mut page_decryptor = None;
        let mut page_aad = Vec::new();
        let header = match self.column_setup(meta)? {
            Some((file_aad, setup)) => {
                let header_aad = crypto::create_module_aad(
                    &file_aad,
                    ModuleType::DictionaryPageHeader,
                    meta.row_group_ordinal(),
                    setup.ordinal,
                    None,
                );
                page_aad = crypto::create_module_aad(
                    &file_aad,
                    ModuleType::DictionaryPage,
                    meta.row_group_ordinal(),
                    setup.ordinal,
                    None,
                );
                page_decryptor = setup.data_decryptor.clone();
                read_encrypted_page_header(
                    &mut self.stream,
                    setup
                        .metadata_decryptor
                        .as_deref()
                        .ok_or(GantryError::CryptoKeyMissing)?,
                    &header_aad,
                )?
            }
            None => read_page_header(&mut self.stream).map_err(|e| {
                GantryError::corrupt_page(
                    meta.path().string(),
                    format!("undecodable page header: {e}"),
                )
            })?,
        };

        let Some(dict_header) = header.dictionary_page_header else {
            return Ok(None);
        };
        let compressed_size = usize::try_from(header.compressed_page_size).map_err(|_| {
            GantryError::corrupt_page(meta.path().string(), "negative compressed_page_size")
        })?;
        let uncompressed_size = usize::try_from(header.uncompressed_page_size).map_err(|_| {
            GantryError::corrupt_page(meta.path().string(), "negative uncompressed_page_size")
        })?;

        let mut bytes = vec![0u8; compressed_size];
        self.stream.read_exact(&mut bytes)?;
        if let Some(decryptor) = page_decryptor {
            let mut cursor: &[u8] = &bytes;
            bytes = crypto::decrypt_module(&mut cursor, decryptor.as_ref(), &page_aad)?;
        }

        let decompressor = self.options.codec_factory().decompressor(meta.codec())?;
        let buf = decompressor.decompress(&bytes, uncompressed_size)?;
        Ok(Some(DictionaryPage {
            buf,
            uncompressed_page_size: uncompressed_size,
            num_values: dict_header.num_values,
            encoding: parquet::basic::Encoding::try_from(dict_header.encoding)?,
            crc: header.crc.map(|c| c as u32),
        }))
    }

    /// Read the bloom filter of a column chunk. Unsupported headers
    /// (out-of-range sizes, unknown algorithm/hash/compression) degrade to
    /// `None` with a warning; I/O failures surface as errors.
    pub fn read_bloom_filter(&mut self, meta: &ColumnChunkMetadata) -> Result<Option<Sbbf>> {
        self.ensure_open()?;
        let Some(offset) = meta.bloom_filter_offset() else {
            return Ok(None);
        };
        if offset < 0 {
            return Ok(None);
        }
        self.stream.seek_to(offset as u64)?;

        let crypto_setup = self.column_setup(meta)?;
        let (header, bitset_decryptor, bitset_aad) = match &crypto_setup {
            Some((file_aad, setup)) => {
                let header_aad = crypto::create_module_aad(
                    file_aad,
                    ModuleType::BloomFilterHeader,
                    meta.row_group_ordinal(),
                    setup.ordinal,
                    None,
                );
                let bitset_aad = crypto::create_module_aad(
                    file_aad,
                    ModuleType::BloomFilterBitset,
                    meta.row_group_ordinal(),
                    setup.ordinal,
                    None,
                );
                let decryptor = setup
                    .metadata_decryptor
                    .as_deref()
                    .ok_or(GantryError::CryptoKeyMissing)?;
                let plaintext =
                    crypto::decrypt_module(&mut self.stream, decryptor, &header_aad)?;
                let mut prot = TCompactInputProtocol::new(io::Cursor::new(&plaintext[..]));
                match format::BloomFilterHeader::read_from_in_protocol(&mut prot) {
                    Ok(header) => (header, setup.metadata_decryptor.clone(), Some(bitset_aad)),
                    Err(e) => {
                        tracing::warn!(column = %meta.path(), error = %e, "unreadable bloom filter header");
                        return Ok(None);
                    }
                }
            }
            None => {
                let mut prot = TCompactInputProtocol::new(&mut self.stream);
                match format::BloomFilterHeader::read_from_in_protocol(&mut prot) {
                    Ok(header) => (header, None, None),
                    Err(e) => {
                        tracing::warn!(column = %meta.path(), error = %e, "unreadable bloom filter header");
                        return Ok(None);
                    }
                }
            }
        };

        let num_bytes = header.num_bytes;
        if num_bytes <= 0 || num_bytes as usize > UPPER_BOUND_BYTES {
            tracing::warn!(
                column = %meta.path(),
                num_bytes,
                "bloom filter bitset size out of range"
            );
            return Ok(None);
        }
        // Supported tuple is BLOCK / XXHASH / UNCOMPRESSED. The thrift
        // unions carry exactly those variants, so any other algorithm in
        // the file fails header decoding and lands in the warn-and-none
        // branch above.
        let format::BloomFilterAlgorithm::BLOCK(_) = header.algorithm;
        let format::BloomFilterHash::XXHASH(_) = header.hash;
        let format::BloomFilterCompression::UNCOMPRESSED(_) = header.compression;

        let bitset = match (bitset_decryptor, bitset_aad) {
            (Some(decryptor), Some(aad)) => {
                let bitset =
                    crypto::decrypt_module(&mut self.stream, decryptor.as_ref(), &aad)?;
                if bitset.len() != num_bytes as usize {
                    return Err(GantryError::CryptoLengthMismatch {
                        expected: num_bytes as usize,
                        actual: bitset.len(),
                    });
                }
                bitset
            }
            _ => {
                let mut bitset = vec![0u8; num_bytes as usize];
                self.stream.read_exact(&mut bitset)?;
                bitset
            }
        };
        Ok(Some(Sbbf::new(&bitset)))
    }

    /// Read the column index of a column chunk, or `None` when the chunk
    /// carries no reference.
    pub fn read_column_index(
        &mut self,
        meta: &ColumnChunkMetadata,
    ) -> Result<Option<ColumnIndexMeta>> {
        self.ensure_open()?;
        crate::index::read_column_index(
            &mut self.stream,
            meta,
            self.file_metadata.decryptor.as_deref(),
        )
    }

    /// Read the offset index of a column chunk, or `None` when the chunk
    /// carries no reference.
    pub fn read_offset_index(
        &mut self,
        meta: &ColumnChunkMetadata,
    ) -> Result<Option<OffsetIndexMeta>> {
        self.ensure_open()?;
        crate::index::read_offset_index(
            &mut self.stream,
            meta,
            self.file_metadata.decryptor.as_deref(),
        )
    }

    /// Dictionary reader for the row group [`read_next_row_group`] would
    /// return next.
    ///
    /// [`read_next_row_group`]: Self::read_next_row_group
    pub fn next_dictionary_reader(&mut self) -> Option<DictionaryReader<'_>> {
        self.dictionary_reader(self.current_block)
    }

    /// Dictionary reader for the row group at `block_index`.
    pub fn dictionary_reader(&mut self, block_index: usize) -> Option<DictionaryReader<'_>> {
        if block_index >= self.row_groups.len() {
            return None;
        }
        Some(DictionaryReader {
            reader: self,
            block_index,
            cache: HashMap::new(),
        })
    }

    /// Copy this file's surviving row groups into a companion writer,
    /// byte for byte.
    pub fn append_to(&mut self, sink: &mut dyn RowGroupSink) -> Result<()> {
        self.ensure_open()?;
        let row_groups = self.row_groups.clone();
        sink.append_row_groups(&mut self.stream, &row_groups)
    }

    /// Close the reader: the current row group store (cancelling its
    /// outstanding tasks), then the codec factory. Idempotent; also runs
    /// on drop.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(mut store) = self.current_store.take() {
            store.close();
        }
        self.options.codec_factory().release();
    }

    /// Decryption setup of a column, when the file is encrypted and the
    /// column actually uses encryption. Returns the file AAD alongside.
    fn column_setup(
        &self,
        meta: &ColumnChunkMetadata,
    ) -> Result<Option<(Vec<u8>, Arc<ColumnDecryptionSetup>)>> {
        let Some(fd) = &self.file_metadata.decryptor else {
            return Ok(None);
        };
        let setup = fd.column_setup(meta.path(), meta.leaf_index() as i16, meta.crypto.as_ref())?;
        if !setup.encrypted {
            return Ok(None);
        }
        Ok(Some((fd.file_aad().to_vec(), setup)))
    }
}

impl Drop for FileReader {
    fn drop(&mut self) {
        self.close();
    }
}

fn illegal_empty_row_group() -> GantryError {
    GantryError::CorruptTrailer {
        message: "illegal row group of 0 rows".into(),
    }
}

/// Random-access reader over one row group's dictionary pages, with a
/// per-column cache. When the reader's current row group is this one, the
/// already-read pages are served instead of re-reading the file.
pub struct DictionaryReader<'a> {
    reader: &'a mut FileReader,
    block_index: usize,
    cache: HashMap<String, Option<DictionaryPage>>,
}

impl DictionaryReader<'_> {
    /// The decompressed dictionary page of `path`, or `None` when the
    /// column has no dictionary.
    pub fn dictionary_page(&mut self, path: &ColumnPath) -> Result<Option<DictionaryPage>> {
        let key = path.string();
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.clone());
        }

        let block = &self.reader.row_groups[self.block_index];
        // avoid re-reading bytes when the current row group is attached
        if let Some(store) = &self.reader.current_store {
            if store.row_index_offset() == block.row_index_offset() {
                if let Some(page) = store.dictionary_page(path)? {
                    self.cache.insert(key, Some(page.clone()));
                    return Ok(Some(page));
                }
            }
        }

        let Some(chunk) = block
            .columns()
            .iter()
            .find(|c| c.path().string() == key)
            .cloned()
        else {
            return Ok(None);
        };
        let page = self.reader.read_dictionary(&chunk)?;
        self.cache.insert(key, page.clone());
        Ok(page)
    }
}
