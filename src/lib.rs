//! Row-group read path for Parquet files.
//!
//! `gantry` turns a seekable byte source holding a self-describing
//! columnar file into a lazy sequence of decompressed pages, ready for
//! value-level decoding. It owns the wire-level work between the two:
//!
//! - trailer parsing, for plaintext, signed, and encrypted footers;
//! - row-group elimination by statistics, dictionaries, bloom filters,
//!   and column indexes (page-granular row ranges);
//! - coalescing the surviving byte ranges of projected columns into
//!   single-seek reads, optionally dispatched on injected executors;
//! - page-header decoding with per-page AAD decryption and CRC-32
//!   verification, feeding a bounded per-chunk page FIFO.
//!
//! Value decoding, record assembly, predicate compilation, codecs and
//! cipher primitives stay outside; the crate defines the contracts it
//! consumes them through ([`SourceFile`], [`CodecFactory`],
//! [`crypto::DecryptorFactory`], [`Predicate`]).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use gantry::{FileReader, FsSource, Predicate, ReadOptions, Value};
//!
//! # fn main() -> Result<(), gantry::GantryError> {
//! let source = Arc::new(FsSource::open("data.parquet")?);
//! let options = ReadOptions::builder()
//!     .record_filter(Predicate::eq("id", Value::Int64(42)))
//!     .build();
//!
//! let mut reader = FileReader::open_with_options(source, options)?;
//! while let Some(store) = reader.read_next_filtered_row_group()? {
//!     let columns: Vec<_> = store.column_indexes().collect();
//!     for leaf in columns {
//!         let column = store.page_reader_by_index(leaf).unwrap();
//!         while let Some(page) = column.next_page()? {
//!             // hand `page` to a value-level decoder
//!             let _ = page.num_values();
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod bloom;
mod chunk;
pub mod codec;
pub mod crypto;
pub mod error;
pub mod index;
pub mod metadata;
pub mod options;
pub mod page;
mod plan;
pub mod predicate;
pub mod ranges;
pub mod reader;
mod select;
pub mod source;
pub mod store;
pub mod trailer;

pub use bloom::Sbbf;
pub use codec::{BasicCodecFactory, CodecFactory, Decompressor};
pub use crypto::{BlockDecryptor, DecryptionProperties, DecryptorFactory};
pub use error::{GantryError, Result};
pub use index::{ColumnIndexMeta, OffsetIndexMeta, PageLocation};
pub use metadata::{
    ColumnChunkMetadata, FileMetadata, Footer, IndexRef, MetadataFilter, RowGroupMetadata,
};
pub use options::{ReadOptions, ReadOptionsBuilder};
pub use page::{DataPage, DataPageV1, DataPageV2, DictionaryPage};
pub use predicate::{CmpOp, Predicate, TriState, Value};
pub use ranges::{RowRange, RowRanges};
pub use reader::{DictionaryReader, FileReader, RowGroupSink};
pub use source::{BytesSource, FsSource, SeekableBytes, SourceFile};
pub use store::{ChunkPageStore, ColumnChunkPageReader, RowContext};
pub use trailer::{read_footer, read_footers, EFMAGIC, MAGIC};
