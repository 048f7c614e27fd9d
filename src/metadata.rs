//! Footer data model.
//!
//! Thin owned wrappers over the thrift footer structs, resolved against the
//! schema descriptor so the rest of the crate never touches raw
//! `format::` types. Immutable after trailer load.

use std::collections::BTreeSet;
use std::io::Cursor;
use std::sync::Arc;

use parquet::basic::{Compression, Encoding, Type as PhysicalType};
use parquet::file::statistics::{self, Statistics};
use parquet::format;
use parquet::schema::types::{self, ColumnDescriptor, ColumnPath, SchemaDescriptor};
use parquet::thrift::TSerializable;
use thrift::protocol::TCompactInputProtocol;

use crate::crypto::{self, FileDecryptor, ModuleType};
use crate::error::{GantryError, Result};

/// Footer-level filter applied while the trailer is deserialized, dropping
/// row-group metadata the caller is not interested in.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum MetadataFilter {
    /// Keep every row group.
    #[default]
    None,
    /// Drop all row groups (schema-only reads).
    SkipRowGroups,
    /// Keep row groups whose midpoint offset (`starting byte +
    /// total_compressed_size / 2`) falls in `[start, end)`. Adjacent ranges
    /// partition the row groups of a file without overlap.
    RowGroupRange { start: u64, end: u64 },
    /// Keep row groups by position in the footer.
    RowGroupOrdinals(BTreeSet<usize>),
}

/// `(offset, length)` reference to an index blob stored outside the chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexRef {
    pub offset: i64,
    pub length: i32,
}

/// File-level metadata: schema, counts, provenance, decryption state.
#[derive(Clone)]
pub struct FileMetadata {
    version: i32,
    schema: Arc<SchemaDescriptor>,
    num_rows: i64,
    created_by: Option<String>,
    key_value_metadata: Option<Vec<format::KeyValue>>,
    pub(crate) decryptor: Option<Arc<FileDecryptor>>,
}

impl FileMetadata {
    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn schema(&self) -> &Arc<SchemaDescriptor> {
        &self.schema
    }

    pub fn num_rows(&self) -> i64 {
        self.num_rows
    }

    pub fn created_by(&self) -> Option<&str> {
        self.created_by.as_deref()
    }

    pub fn key_value_metadata(&self) -> Option<&[format::KeyValue]> {
        self.key_value_metadata.as_deref()
    }
}

/// The parsed footer: file metadata plus the surviving row groups.
#[derive(Clone)]
pub struct Footer {
    file_metadata: FileMetadata,
    row_groups: Vec<RowGroupMetadata>,
}

impl Footer {
    pub fn file_metadata(&self) -> &FileMetadata {
        &self.file_metadata
    }

    pub fn row_groups(&self) -> &[RowGroupMetadata] {
        &self.row_groups
    }
}

/// One horizontal partition of rows (a "block").
#[derive(Clone)]
pub struct RowGroupMetadata {
    ordinal: i16,
    num_rows: i64,
    total_byte_size: i64,
    row_index_offset: i64,
    columns: Vec<ColumnChunkMetadata>,
}

impl RowGroupMetadata {
    pub fn ordinal(&self) -> i16 {
        self.ordinal
    }

    pub fn num_rows(&self) -> i64 {
        self.num_rows
    }

    pub fn total_byte_size(&self) -> i64 {
        self.total_byte_size
    }

    /// Index of this group's first row within the whole file.
    pub fn row_index_offset(&self) -> i64 {
        self.row_index_offset
    }

    pub fn columns(&self) -> &[ColumnChunkMetadata] {
        &self.columns
    }
}

/// All pages of one column within one row group.
#[derive(Clone)]
pub struct ColumnChunkMetadata {
    column: Arc<ColumnDescriptor>,
    leaf_index: usize,
    codec: Compression,
    encodings: Vec<Encoding>,
    encoding_stats: Option<Vec<format::PageEncodingStats>>,
    num_values: i64,
    total_compressed_size: i64,
    total_uncompressed_size: i64,
    data_page_offset: i64,
    dictionary_page_offset: Option<i64>,
    statistics: Option<Statistics>,
    bloom_filter_offset: Option<i64>,
    bloom_filter_length: Option<i32>,
    column_index_ref: Option<IndexRef>,
    offset_index_ref: Option<IndexRef>,
    row_group_ordinal: i16,
    pub(crate) crypto: Option<format::ColumnCryptoMetaData>,
}

impl ColumnChunkMetadata {
    pub fn column_descriptor(&self) -> &Arc<ColumnDescriptor> {
        &self.column
    }

    pub fn path(&self) -> &ColumnPath {
        self.column.path()
    }

    /// Position of this column among the schema leaves (the column ordinal
    /// used in AAD derivation).
    pub fn leaf_index(&self) -> usize {
        self.leaf_index
    }

    pub fn physical_type(&self) -> PhysicalType {
        self.column.physical_type()
    }

    pub fn codec(&self) -> Compression {
        self.codec
    }

    pub fn encodings(&self) -> &[Encoding] {
        &self.encodings
    }

    /// Per-page-type encoding counts, when the writer recorded them.
    pub fn encoding_stats(&self) -> Option<&[format::PageEncodingStats]> {
        self.encoding_stats.as_deref()
    }

    pub fn num_values(&self) -> i64 {
        self.num_values
    }

    pub fn total_compressed_size(&self) -> i64 {
        self.total_compressed_size
    }

    pub fn total_uncompressed_size(&self) -> i64 {
        self.total_uncompressed_size
    }

    pub fn data_page_offset(&self) -> i64 {
        self.data_page_offset
    }

    pub fn dictionary_page_offset(&self) -> Option<i64> {
        self.dictionary_page_offset
    }

    pub fn has_dictionary_page(&self) -> bool {
        self.dictionary_page_offset.is_some()
    }

    /// First byte of the chunk: the dictionary page when there is one,
    /// otherwise the first data page.
    pub fn starting_pos(&self) -> i64 {
        self.dictionary_page_offset.unwrap_or(self.data_page_offset)
    }

    pub fn statistics(&self) -> Option<&Statistics> {
        self.statistics.as_ref()
    }

    pub fn bloom_filter_offset(&self) -> Option<i64> {
        self.bloom_filter_offset
    }

    pub fn bloom_filter_length(&self) -> Option<i32> {
        self.bloom_filter_length
    }

    pub fn column_index_ref(&self) -> Option<IndexRef> {
        self.column_index_ref
    }

    pub fn offset_index_ref(&self) -> Option<IndexRef> {
        self.offset_index_ref
    }

    pub fn row_group_ordinal(&self) -> i16 {
        self.row_group_ordinal
    }

    pub(crate) fn is_encrypted(&self) -> bool {
        self.crypto.is_some()
    }
}

/// Convert a deserialized thrift footer, applying the metadata filter.
///
/// Row-index offsets are accumulated over the unfiltered row-group list so
/// the kept groups keep their absolute first-row indexes.
pub(crate) fn footer_from_thrift(
    t: format::FileMetaData,
    filter: &MetadataFilter,
    decryptor: Option<Arc<FileDecryptor>>,
) -> Result<Footer> {
    let schema_tree = types::from_thrift(&t.schema)?;
    let schema = Arc::new(SchemaDescriptor::new(schema_tree));

    let mut row_groups = Vec::new();
    let mut row_index_offset = 0i64;
    for (position, rg) in t.row_groups.into_iter().enumerate() {
        let num_rows = rg.num_rows;
        if keep_row_group(&rg, position, filter) {
            row_groups.push(row_group_from_thrift(
                rg,
                position,
                row_index_offset,
                &schema,
                decryptor.as_deref(),
            )?);
        }
        row_index_offset += num_rows;
    }

    Ok(Footer {
        file_metadata: FileMetadata {
            version: t.version,
            schema,
            num_rows: t.num_rows,
            created_by: t.created_by,
            key_value_metadata: t.key_value_metadata,
            decryptor,
        },
        row_groups,
    })
}

fn keep_row_group(rg: &format::RowGroup, position: usize, filter: &MetadataFilter) -> bool {
    match filter {
        MetadataFilter::None => true,
        MetadataFilter::SkipRowGroups => false,
        MetadataFilter::RowGroupOrdinals(ordinals) => ordinals.contains(&position),
        MetadataFilter::RowGroupRange { start, end } => {
            let Some(first_byte) = row_group_start(rg) else {
                return false;
            };
            let total = rg
                .total_compressed_size
                .unwrap_or(rg.total_byte_size)
                .max(0);
            let midpoint = first_byte.saturating_add(total / 2) as u64;
            (*start..*end).contains(&midpoint)
        }
    }
}

fn row_group_start(rg: &format::RowGroup) -> Option<i64> {
    if let Some(offset) = rg.file_offset {
        return Some(offset);
    }
    let first = rg.columns.first()?;
    match &first.meta_data {
        Some(md) => Some(md.dictionary_page_offset.unwrap_or(md.data_page_offset)),
        // Encrypted column metadata: fall back to the chunk's file offset.
        None => Some(first.file_offset),
    }
}

fn row_group_from_thrift(
    rg: format::RowGroup,
    position: usize,
    row_index_offset: i64,
    schema: &Arc<SchemaDescriptor>,
    decryptor: Option<&FileDecryptor>,
) -> Result<RowGroupMetadata> {
    let ordinal = rg.ordinal.unwrap_or(position as i16);
    if rg.columns.len() != schema.num_columns() {
        return Err(GantryError::CorruptTrailer {
            message: format!(
                "row group {position} has {} column chunks for a {}-column schema",
                rg.columns.len(),
                schema.num_columns()
            ),
        });
    }
    let columns = rg
        .columns
        .into_iter()
        .enumerate()
        .map(|(leaf_index, cc)| {
            column_chunk_from_thrift(cc, leaf_index, ordinal, schema, decryptor)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(RowGroupMetadata {
        ordinal,
        num_rows: rg.num_rows,
        total_byte_size: rg.total_byte_size,
        row_index_offset,
        columns,
    })
}

fn column_chunk_from_thrift(
    mut cc: format::ColumnChunk,
    leaf_index: usize,
    row_group_ordinal: i16,
    schema: &Arc<SchemaDescriptor>,
    decryptor: Option<&FileDecryptor>,
) -> Result<ColumnChunkMetadata> {
    let column = schema.column(leaf_index);
    let md = match cc.meta_data.take() {
        Some(md) => md,
        None => {
            decrypt_column_metadata(&cc, column.as_ref(), leaf_index, row_group_ordinal, decryptor)?
        }
    };

    let statistics = statistics::from_thrift(column.physical_type(), md.statistics)?;
    let encodings = md
        .encodings
        .into_iter()
        .map(Encoding::try_from)
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(ColumnChunkMetadata {
        leaf_index,
        codec: Compression::try_from(md.codec)?,
        encodings,
        encoding_stats: md.encoding_stats,
        num_values: md.num_values,
        total_compressed_size: md.total_compressed_size,
        total_uncompressed_size: md.total_uncompressed_size,
        data_page_offset: md.data_page_offset,
        dictionary_page_offset: md.dictionary_page_offset,
        statistics,
        bloom_filter_offset: md.bloom_filter_offset,
        bloom_filter_length: md.bloom_filter_length,
        column_index_ref: index_ref(cc.column_index_offset, cc.column_index_length),
        offset_index_ref: index_ref(cc.offset_index_offset, cc.offset_index_length),
        row_group_ordinal,
        crypto: cc.crypto_metadata,
        column,
    })
}

fn decrypt_column_metadata(
    cc: &format::ColumnChunk,
    column: &ColumnDescriptor,
    leaf_index: usize,
    row_group_ordinal: i16,
    decryptor: Option<&FileDecryptor>,
) -> Result<format::ColumnMetaData> {
    let Some(ciphertext) = cc.encrypted_column_metadata.as_deref() else {
        return Err(GantryError::CorruptTrailer {
            message: format!("column chunk '{}' carries no metadata", column.path()),
        });
    };
    let decryptor = decryptor.ok_or(GantryError::CryptoKeyMissing)?;
    let setup = decryptor.column_setup(column.path(), leaf_index as i16, cc.crypto_metadata.as_ref())?;
    let block = setup
        .metadata_decryptor
        .as_ref()
        .ok_or(GantryError::CryptoKeyMissing)?;
    let aad = crypto::create_module_aad(
        decryptor.file_aad(),
        ModuleType::ColumnMetaData,
        row_group_ordinal,
        leaf_index as i16,
        None,
    );
    let plaintext = block.decrypt(ciphertext, &aad)?;
    let mut prot = TCompactInputProtocol::new(Cursor::new(&plaintext[..]));
    format::ColumnMetaData::read_from_in_protocol(&mut prot).map_err(|e| {
        GantryError::CorruptTrailer {
            message: format!(
                "undecodable encrypted column metadata for '{}': {e}",
                column.path()
            ),
        }
    })
}

fn index_ref(offset: Option<i64>, length: Option<i32>) -> Option<IndexRef> {
    match (offset, length) {
        (Some(offset), Some(length)) => Some(IndexRef { offset, length }),
        _ => None,
    }
}
