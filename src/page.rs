//! Page decoding: header parsing, checksum verification, decryption, and
//! the per-chunk page pipeline.
//!
//! A [`PageProducer`] walks one column chunk's byte stream, unwraps page
//! headers, and pushes data pages into a FIFO ending in exactly one
//! terminal marker, even on error, where the error slot precedes the
//! marker. The synchronous fill runs the producer to completion on the
//! calling thread; the asynchronous fill reads the first page (the
//! dictionary, when there is one) inline and produces the rest on the
//! injected processing executor.

use std::io::{Cursor, Read};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_channel::Sender;
use parquet::basic::{Encoding, Type as PhysicalType};
use parquet::file::statistics::{self, Statistics};
use parquet::format;
use parquet::format::PageType;
use parquet::thrift::TSerializable;
use thrift::protocol::TCompactInputProtocol;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::chunk::{ChunkData, StreamWithTail};
use crate::crypto::{self, BlockDecryptor, ModuleType};
use crate::error::{GantryError, Result};

/// Capacity of the page FIFO when it is filled from the processing
/// executor. A synchronous fill completes before the consumer exists and
/// uses an unbounded channel instead.
pub(crate) const PAGE_QUEUE_CAPACITY: usize = 16;

/// One slot in the page FIFO: a page, an error, or (`Ok(None)`) the
/// end-of-stream marker.
pub(crate) type PageSlot = Result<Option<DataPage>>;

/// A dictionary page. `buf` is compressed while the page sits in the
/// pipeline; readers hand out the decompressed form.
#[derive(Debug, Clone)]
pub struct DictionaryPage {
    pub buf: Bytes,
    pub uncompressed_page_size: usize,
    pub num_values: i32,
    pub encoding: Encoding,
    pub crc: Option<u32>,
}

/// A v1 data page. `buf` holds levels and values, compressed as a unit.
#[derive(Debug, Clone)]
pub struct DataPageV1 {
    pub buf: Bytes,
    pub num_values: i32,
    pub uncompressed_page_size: usize,
    pub statistics: Option<Statistics>,
    pub rep_level_encoding: Encoding,
    pub def_level_encoding: Encoding,
    pub encoding: Encoding,
    pub crc: Option<u32>,
}

/// A v2 data page: levels stored uncompressed ahead of the (optionally
/// compressed) data section.
#[derive(Debug, Clone)]
pub struct DataPageV2 {
    pub num_rows: i32,
    pub num_nulls: i32,
    pub num_values: i32,
    pub rep_levels: Bytes,
    pub def_levels: Bytes,
    pub encoding: Encoding,
    pub data: Bytes,
    pub uncompressed_page_size: usize,
    pub statistics: Option<Statistics>,
    pub is_compressed: bool,
}

/// A decoded data page, ready for value-level decoding once decompressed.
#[derive(Debug, Clone)]
pub enum DataPage {
    V1(DataPageV1),
    V2(DataPageV2),
}

impl DataPage {
    pub fn num_values(&self) -> i32 {
        match self {
            DataPage::V1(p) => p.num_values,
            DataPage::V2(p) => p.num_values,
        }
    }
}

/// Decode one page header straight off a byte stream.
pub(crate) fn read_page_header(
    reader: &mut impl Read,
) -> std::result::Result<format::PageHeader, thrift::Error> {
    let mut prot = TCompactInputProtocol::new(reader);
    format::PageHeader::read_from_in_protocol(&mut prot)
}

/// Decrypt and decode one page header (length-framed ciphertext).
pub(crate) fn read_encrypted_page_header(
    reader: &mut impl Read,
    decryptor: &dyn BlockDecryptor,
    aad: &[u8],
) -> Result<format::PageHeader> {
    let plaintext = crypto::decrypt_module(reader, decryptor, aad)?;
    let mut prot = TCompactInputProtocol::new(Cursor::new(&plaintext[..]));
    format::PageHeader::read_from_in_protocol(&mut prot)
        .map_err(|e| GantryError::crypto(format!("decrypted page header is undecodable: {e}")))
}

/// Walks one chunk and feeds its page FIFO.
pub(crate) struct PageProducer {
    chunk: ChunkData,
    column: String,
    physical_type: PhysicalType,
    value_count: i64,
    expects_dictionary: bool,
    verify_checksums: bool,

    header_decryptor: Option<Arc<dyn BlockDecryptor>>,
    data_decryptor: Option<Arc<dyn BlockDecryptor>>,
    file_aad: Vec<u8>,
    row_group_ordinal: i16,
    column_ordinal: i16,
    data_page_header_aad: Option<Vec<u8>>,
    data_page_aad: Option<Vec<u8>>,

    dictionary: Option<DictionaryPage>,
    dictionary_seen: bool,
    values_read: i64,
    data_pages_read: usize,

    sender: Sender<PageSlot>,
}

impl PageProducer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        chunk: ChunkData,
        verify_checksums: bool,
        header_decryptor: Option<Arc<dyn BlockDecryptor>>,
        data_decryptor: Option<Arc<dyn BlockDecryptor>>,
        file_aad: Vec<u8>,
        row_group_ordinal: i16,
        column_ordinal: i16,
        sender: Sender<PageSlot>,
    ) -> Self {
        let column = chunk.descriptor.metadata.path().string();
        let physical_type = chunk.descriptor.metadata.physical_type();
        let value_count = chunk.descriptor.metadata.num_values();
        let expects_dictionary = chunk.descriptor.metadata.has_dictionary_page();

        let data_page_header_aad = header_decryptor.as_ref().map(|_| {
            crypto::create_module_aad(
                &file_aad,
                ModuleType::DataPageHeader,
                row_group_ordinal,
                column_ordinal,
                Some(0),
            )
        });
        let data_page_aad = data_decryptor.as_ref().map(|_| {
            crypto::create_module_aad(
                &file_aad,
                ModuleType::DataPage,
                row_group_ordinal,
                column_ordinal,
                Some(0),
            )
        });

        Self {
            chunk,
            column,
            physical_type,
            value_count,
            expects_dictionary,
            verify_checksums,
            header_decryptor,
            data_decryptor,
            file_aad,
            row_group_ordinal,
            column_ordinal,
            data_page_header_aad,
            data_page_aad,
            dictionary: None,
            dictionary_seen: false,
            values_read: 0,
            data_pages_read: 0,
            sender,
        }
    }

    /// Hand the already-read dictionary page to the consumer side.
    pub(crate) fn take_dictionary(&mut self) -> Option<DictionaryPage> {
        self.dictionary.take()
    }

    pub(crate) fn has_more_pages(&self) -> bool {
        match &self.chunk.offset_index {
            Some(index) => self.data_pages_read < index.page_count(),
            None => self.values_read < self.value_count,
        }
    }

    /// The absolute page ordinal of the next data page: its index in the
    /// unfiltered chunk when an offset index is present, required for AAD
    /// correctness.
    fn page_ordinal(&self, data_pages_read: usize) -> u16 {
        match &self.chunk.offset_index {
            Some(index) => index.page_ordinal(data_pages_read) as u16,
            None => data_pages_read as u16,
        }
    }

    /// Run to termination on the calling thread, leaving the FIFO fully
    /// populated (terminal marker included). Returns the chunk's dictionary
    /// page, when one was present.
    pub(crate) fn fill_sync(mut self) -> Result<Option<DictionaryPage>> {
        let outcome = self.read_remaining();
        self.finish(outcome)?;
        Ok(self.dictionary.take())
    }

    /// Produce every remaining page on the processing executor. The FIFO
    /// terminates even when production fails; the error occupies the slot
    /// before the marker.
    pub(crate) fn fill_async(mut self, process_executor: &Handle) -> JoinHandle<()> {
        process_executor.spawn_blocking(move || {
            let outcome = self.read_remaining();
            let _ = self.finish(outcome);
        })
    }

    fn read_remaining(&mut self) -> Result<()> {
        while self.has_more_pages() {
            self.read_one_page()?;
        }
        if self.chunk.offset_index.is_none() && self.values_read != self.value_count {
            return Err(GantryError::corrupt_page(
                &self.column,
                format!(
                    "expected {} values but decoded {} over {} data pages",
                    self.value_count, self.values_read, self.data_pages_read
                ),
            ));
        }
        Ok(())
    }

    fn finish(&mut self, outcome: Result<()>) -> Result<()> {
        if let Err(e) = outcome {
            let _ = self.sender.send(Err(clone_for_queue(&e)));
            let _ = self.sender.send(Ok(None));
            return Err(e);
        }
        self.sender.send(Ok(None)).map_err(|_| GantryError::Interrupted)?;
        Ok(())
    }

    /// Read one page (of any type) and account for it.
    pub(crate) fn read_one_page(&mut self) -> Result<()> {
        let header = self.read_header()?;
        let uncompressed_size = usize::try_from(header.uncompressed_page_size)
            .map_err(|_| self.negative_size("uncompressed_page_size"))?;
        let compressed_size = usize::try_from(header.compressed_page_size)
            .map_err(|_| self.negative_size("compressed_page_size"))?;

        match header.type_ {
            PageType::DICTIONARY_PAGE => {
                if self.dictionary_seen {
                    return Err(GantryError::corrupt_page(
                        &self.column,
                        "more than one dictionary page in column chunk",
                    ));
                }
                let bytes = self.chunk.read_page_bytes(compressed_size)?;
                self.verify_crc(header.crc, &bytes)?;
                let bytes = self.decrypt_page(bytes, ModuleType::DictionaryPage, None)?;
                let dict_header = header.dictionary_page_header.ok_or_else(|| {
                    GantryError::corrupt_page(&self.column, "dictionary page without sub-header")
                })?;
                self.dictionary_seen = true;
                self.dictionary = Some(DictionaryPage {
                    buf: bytes,
                    uncompressed_page_size: uncompressed_size,
                    num_values: dict_header.num_values,
                    encoding: Encoding::try_from(dict_header.encoding)?,
                    crc: header.crc.map(|c| c as u32),
                });
            }
            PageType::DATA_PAGE => {
                let data_header = header.data_page_header.ok_or_else(|| {
                    GantryError::corrupt_page(&self.column, "data page without sub-header")
                })?;
                let bytes = self.chunk.read_page_bytes(compressed_size)?;
                self.verify_crc(header.crc, &bytes)?;
                let ordinal = self.page_ordinal(self.data_pages_read);
                let bytes = self.decrypt_page(bytes, ModuleType::DataPage, Some(ordinal))?;
                let page = DataPageV1 {
                    buf: bytes,
                    num_values: data_header.num_values,
                    uncompressed_page_size: uncompressed_size,
                    statistics: statistics::from_thrift(
                        self.physical_type,
                        data_header.statistics,
                    )?,
                    rep_level_encoding: Encoding::try_from(
                        data_header.repetition_level_encoding,
                    )?,
                    def_level_encoding: Encoding::try_from(
                        data_header.definition_level_encoding,
                    )?,
                    encoding: Encoding::try_from(data_header.encoding)?,
                    crc: header.crc.map(|c| c as u32),
                };
                self.values_read += i64::from(data_header.num_values);
                self.data_pages_read += 1;
                self.enqueue(DataPage::V1(page))?;
            }
            PageType::DATA_PAGE_V2 => {
                let data_header = header.data_page_header_v2.ok_or_else(|| {
                    GantryError::corrupt_page(&self.column, "data page v2 without sub-header")
                })?;
                let rep_len = usize::try_from(data_header.repetition_levels_byte_length)
                    .map_err(|_| self.negative_size("repetition_levels_byte_length"))?;
                let def_len = usize::try_from(data_header.definition_levels_byte_length)
                    .map_err(|_| self.negative_size("definition_levels_byte_length"))?;
                let data_size = compressed_size.checked_sub(rep_len + def_len).ok_or_else(
                    || {
                        GantryError::corrupt_page(
                            &self.column,
                            "level lengths exceed compressed_page_size",
                        )
                    },
                )?;
                // three consecutive regions, in file order
                let rep_levels = self.chunk.read_page_bytes(rep_len)?;
                let def_levels = self.chunk.read_page_bytes(def_len)?;
                let data = self.chunk.read_page_bytes(data_size)?;
                let ordinal = self.page_ordinal(self.data_pages_read);
                let data = self.decrypt_page(data, ModuleType::DataPage, Some(ordinal))?;
                let page = DataPageV2 {
                    num_rows: data_header.num_rows,
                    num_nulls: data_header.num_nulls,
                    num_values: data_header.num_values,
                    rep_levels,
                    def_levels,
                    encoding: Encoding::try_from(data_header.encoding)?,
                    data,
                    uncompressed_page_size: uncompressed_size,
                    statistics: statistics::from_thrift(
                        self.physical_type,
                        data_header.statistics,
                    )?,
                    is_compressed: data_header.is_compressed.unwrap_or(true),
                };
                self.values_read += i64::from(data_header.num_values);
                self.data_pages_read += 1;
                self.enqueue(DataPage::V2(page))?;
            }
            other => {
                tracing::debug!(page_type = other.0, size = compressed_size, "skipping page");
                self.chunk.stream.skip(compressed_size).map_err(|e| {
                    GantryError::corrupt_page(&self.column, format!("cannot skip page: {e}"))
                })?;
            }
        }
        Ok(())
    }

    fn read_header(&mut self) -> Result<format::PageHeader> {
        if let Some(header_decryptor) = self.header_decryptor.clone() {
            // File integrity: the first page of a chunk that declares a
            // dictionary must authenticate as a dictionary page header.
            let aad = if !self.dictionary_seen && self.expects_dictionary {
                crypto::create_module_aad(
                    &self.file_aad,
                    ModuleType::DictionaryPageHeader,
                    self.row_group_ordinal,
                    self.column_ordinal,
                    None,
                )
            } else {
                let ordinal = self.page_ordinal(self.data_pages_read);
                let header_aad = self.data_page_header_aad.as_mut().unwrap();
                crypto::quick_update_page_aad(header_aad, ordinal);
                header_aad.clone()
            };
            return match &mut self.chunk.tail {
                Some(tail) => {
                    let mut reader = StreamWithTail {
                        stream: &mut self.chunk.stream,
                        tail,
                    };
                    read_encrypted_page_header(&mut reader, header_decryptor.as_ref(), &aad)
                }
                None => read_encrypted_page_header(
                    &mut self.chunk.stream,
                    header_decryptor.as_ref(),
                    &aad,
                ),
            };
        }

        match &mut self.chunk.tail {
            None => read_page_header(&mut self.chunk.stream).map_err(|e| {
                GantryError::corrupt_page(&self.column, format!("undecodable page header: {e}"))
            }),
            Some(tail) => {
                // The recorded chunk length may undercount (historical
                // writer bug): retry the parse over the buffered bytes plus
                // the remainder of the file.
                self.chunk.stream.mark();
                match read_page_header(&mut self.chunk.stream) {
                    Ok(header) => Ok(header),
                    Err(_) => {
                        self.chunk.stream.reset();
                        tracing::debug!(column = %self.column, "completing the column chunk to read the page header");
                        let mut reader = StreamWithTail {
                            stream: &mut self.chunk.stream,
                            tail,
                        };
                        read_page_header(&mut reader).map_err(|e| {
                            GantryError::corrupt_page(
                                &self.column,
                                format!("undecodable page header: {e}"),
                            )
                        })
                    }
                }
            }
        }
    }

    fn verify_crc(&self, crc: Option<i32>, bytes: &[u8]) -> Result<()> {
        if !self.verify_checksums {
            return Ok(());
        }
        let Some(expected) = crc else { return Ok(()) };
        let expected = expected as u32;
        let computed = crc32fast::hash(bytes);
        if computed != expected {
            return Err(GantryError::ChecksumFailure {
                column: self.column.clone(),
                expected,
                computed,
            });
        }
        Ok(())
    }

    fn decrypt_page(
        &mut self,
        bytes: Bytes,
        module: ModuleType,
        page_ordinal: Option<u16>,
    ) -> Result<Bytes> {
        let Some(decryptor) = self.data_decryptor.clone() else {
            return Ok(bytes);
        };
        let aad = match module {
            ModuleType::DataPage => {
                let aad = self.data_page_aad.as_mut().unwrap();
                crypto::quick_update_page_aad(aad, page_ordinal.unwrap_or(0));
                aad.clone()
            }
            _ => crypto::create_module_aad(
                &self.file_aad,
                module,
                self.row_group_ordinal,
                self.column_ordinal,
                None,
            ),
        };
        let mut cursor: &[u8] = &bytes;
        let plaintext = crypto::decrypt_module(&mut cursor, decryptor.as_ref(), &aad)?;
        Ok(Bytes::from(plaintext))
    }

    fn enqueue(&mut self, page: DataPage) -> Result<()> {
        self.sender
            .send(Ok(Some(page)))
            .map_err(|_| GantryError::Interrupted)
    }

    fn negative_size(&self, field: &str) -> GantryError {
        GantryError::corrupt_page(&self.column, format!("negative {field}"))
    }
}

/// Errors cross the FIFO by value; keep the original for the caller and
/// send an equivalent description to the consumer.
fn clone_for_queue(e: &GantryError) -> GantryError {
    match e {
        GantryError::ChecksumFailure {
            column,
            expected,
            computed,
        } => GantryError::ChecksumFailure {
            column: column.clone(),
            expected: *expected,
            computed: *computed,
        },
        GantryError::CorruptPage { column, message } => GantryError::CorruptPage {
            column: column.clone(),
            message: message.clone(),
        },
        GantryError::Interrupted => GantryError::Interrupted,
        other => GantryError::corrupt_page(String::new(), other.to_string()),
    }
}
