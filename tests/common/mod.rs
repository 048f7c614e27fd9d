//! Shared harness: in-memory parquet files written with the parquet
//! writer, a thrift-level file builder for adversarial layouts, and a toy
//! AAD-checking cipher for the encryption tests.

#![allow(dead_code)]

use std::sync::Arc;

use gantry::crypto::{create_module_aad, ModuleType};
use gantry::{
    BlockDecryptor, BytesSource, DataPage, DecryptorFactory, GantryError, SourceFile,
};
use parquet::data_type::Int32Type;
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use parquet::file::writer::SerializedFileWriter;
use parquet::format;
use parquet::schema::parser::parse_message_type;
use parquet::schema::types::ColumnPath;
use parquet::thrift::TSerializable;
use thrift::protocol::TCompactOutputProtocol;

pub fn source(bytes: Vec<u8>) -> Arc<dyn SourceFile> {
    Arc::new(BytesSource::new(bytes, "test-file"))
}

pub fn column_a() -> ColumnPath {
    ColumnPath::new(vec!["a".to_string()])
}

// -------------------------------------------------------------------
// writer-produced files
// -------------------------------------------------------------------

/// One `required int32 a` column, one row group per entry.
pub fn write_i32_file(row_groups: &[Vec<i32>], props: WriterProperties) -> Vec<u8> {
    let schema = Arc::new(parse_message_type("message test { required int32 a; }").unwrap());
    let mut buf = Vec::new();
    let mut writer = SerializedFileWriter::new(&mut buf, schema, Arc::new(props)).unwrap();
    for values in row_groups {
        let mut rg = writer.next_row_group().unwrap();
        while let Some(mut col) = rg.next_column().unwrap() {
            col.typed::<Int32Type>()
                .write_batch(values, None, None)
                .unwrap();
            col.close().unwrap();
        }
        rg.close().unwrap();
    }
    writer.close().unwrap();
    buf
}

/// `num_columns` required int32 columns `c0..cN`, all holding `values`.
pub fn write_wide_i32_file(
    num_columns: usize,
    values: &[i32],
    props: WriterProperties,
) -> Vec<u8> {
    let fields: String = (0..num_columns)
        .map(|i| format!("required int32 c{i}; "))
        .collect();
    let schema =
        Arc::new(parse_message_type(&format!("message test {{ {fields} }}")).unwrap());
    let mut buf = Vec::new();
    let mut writer = SerializedFileWriter::new(&mut buf, schema, Arc::new(props)).unwrap();
    let mut rg = writer.next_row_group().unwrap();
    while let Some(mut col) = rg.next_column().unwrap() {
        col.typed::<Int32Type>()
            .write_batch(values, None, None)
            .unwrap();
        col.close().unwrap();
    }
    rg.close().unwrap();
    writer.close().unwrap();
    buf
}

/// Plain pages (no dictionary), page-level statistics, `page_rows` rows
/// per data page.
pub fn plain_page_props(page_rows: usize) -> WriterProperties {
    WriterProperties::builder()
        .set_dictionary_enabled(false)
        .set_statistics_enabled(EnabledStatistics::Page)
        .set_data_page_row_count_limit(page_rows)
        .set_write_batch_size(page_rows)
        .build()
}

// -------------------------------------------------------------------
// value decoding (required int32, PLAIN)
// -------------------------------------------------------------------

/// Decode a PLAIN v1/v2 data page of a `required int32` column.
pub fn decode_i32_page(page: &DataPage) -> Vec<i32> {
    let body = match page {
        DataPage::V1(p) => &p.buf,
        DataPage::V2(p) => &p.data,
    };
    body.chunks_exact(4)
        .map(|b| i32::from_le_bytes(b.try_into().unwrap()))
        .collect()
}

// -------------------------------------------------------------------
// toy cipher
// -------------------------------------------------------------------

pub const XOR_KEY: u8 = 0x5a;
pub const FILE_AAD: &[u8] = b"unique-aad";

fn aad_tag(data: &[u8]) -> [u8; 4] {
    let mut h: u32 = 0x811c_9dc5;
    for &b in data {
        h = (h ^ u32::from(b)).wrapping_mul(16_777_619);
    }
    h.to_le_bytes()
}

/// XOR "cipher" that binds a 4-byte AAD tag into every module. Real
/// cryptography is out of scope for the read path; what matters here is
/// that decryption fails loudly whenever the reader derives the wrong AAD.
pub struct XorCipher {
    key: u8,
}

impl XorCipher {
    pub fn new(key: u8) -> Self {
        Self { key }
    }

    pub fn encrypt(key: u8, plaintext: &[u8], aad: &[u8]) -> Vec<u8> {
        let mut out = aad_tag(aad).to_vec();
        out.extend(plaintext.iter().map(|b| b ^ key));
        out
    }

    pub fn signature(plaintext: &[u8], aad: &[u8]) -> [u8; 28] {
        let mut sig = [0u8; 28];
        sig[..4].copy_from_slice(&aad_tag(aad));
        sig[4..8].copy_from_slice(&aad_tag(plaintext));
        sig
    }
}

impl BlockDecryptor for XorCipher {
    fn decrypt(&self, ciphertext: &[u8], aad: &[u8]) -> gantry::Result<Vec<u8>> {
        if ciphertext.len() < 4 || ciphertext[..4] != aad_tag(aad) {
            return Err(GantryError::Crypto {
                message: "AAD mismatch".into(),
            });
        }
        Ok(ciphertext[4..].iter().map(|b| b ^ self.key).collect())
    }

    fn verify_signature(
        &self,
        plaintext: &[u8],
        signature: &[u8],
        aad: &[u8],
    ) -> gantry::Result<()> {
        if signature == XorCipher::signature(plaintext, aad) {
            Ok(())
        } else {
            Err(GantryError::Crypto {
                message: "bad footer signature".into(),
            })
        }
    }
}

pub struct XorFactory {
    pub key: u8,
}

impl DecryptorFactory for XorFactory {
    fn footer_decryptor(
        &self,
        _key_metadata: Option<&[u8]>,
    ) -> gantry::Result<Arc<dyn BlockDecryptor>> {
        Ok(Arc::new(XorCipher::new(self.key)))
    }

    fn column_decryptor(
        &self,
        _column: &ColumnPath,
        _key_metadata: Option<&[u8]>,
    ) -> gantry::Result<Arc<dyn BlockDecryptor>> {
        Ok(Arc::new(XorCipher::new(self.key)))
    }
}

// -------------------------------------------------------------------
// thrift-level file builder (single `required int32 a` column)
// -------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Crc {
    Absent,
    Valid,
    Corrupt,
}

pub struct PageSpec {
    pub values: Vec<i32>,
    pub crc: Crc,
}

impl PageSpec {
    pub fn plain(values: Vec<i32>) -> Self {
        Self {
            values,
            crc: Crc::Absent,
        }
    }

    pub fn with_crc(values: Vec<i32>) -> Self {
        Self {
            values,
            crc: Crc::Valid,
        }
    }

    pub fn with_bad_crc(values: Vec<i32>) -> Self {
        Self {
            values,
            crc: Crc::Corrupt,
        }
    }
}

pub struct BloomSpec {
    /// `num_bytes` recorded in the bloom filter header.
    pub declared_num_bytes: i32,
    /// Bitset bytes actually written (may disagree with the header).
    pub bitset: Vec<u8>,
}

#[derive(Default)]
pub struct RowGroupSpec {
    pub dictionary: Option<Vec<i32>>,
    pub pages: Vec<PageSpec>,
    /// Bytes subtracted from the recorded `total_compressed_size`,
    /// simulating the historical truncated-length writer bug.
    pub undercount: usize,
    /// Declared delta on the chunk's `num_values`, to provoke value-count
    /// mismatches.
    pub declared_values_delta: i64,
    pub bloom: Option<BloomSpec>,
}

#[derive(Default)]
pub struct FileSpec {
    pub row_groups: Vec<RowGroupSpec>,
    /// Encrypted footer (`PARE` tail) and footer-key-encrypted column.
    pub encrypted: bool,
    /// Plaintext footer carrying an encryption algorithm and a trailing
    /// signature (verified when decryption properties are supplied).
    pub signed: bool,
}

pub fn thrift_bytes<T: TSerializable>(value: &T) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut prot = TCompactOutputProtocol::new(&mut buf);
    value.write_to_out_protocol(&mut prot).unwrap();
    drop(prot);
    buf
}

fn framed(ciphertext: Vec<u8>) -> Vec<u8> {
    let mut out = (ciphertext.len() as u32).to_le_bytes().to_vec();
    out.extend(ciphertext);
    out
}

pub fn i32_body(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn crc_of(bytes: &[u8]) -> u32 {
    // Same polynomial as the reader's verification (CRC-32/ISO-HDLC),
    // bitwise so the harness does not depend on the crate internals.
    let mut crc = !0u32;
    for &b in bytes {
        crc ^= u32::from(b);
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xedb8_8320 & mask);
        }
    }
    !crc
}

fn schema_elements() -> Vec<format::SchemaElement> {
    vec![
        format::SchemaElement {
            type_: None,
            type_length: None,
            repetition_type: None,
            name: "test".to_string(),
            num_children: Some(1),
            converted_type: None,
            scale: None,
            precision: None,
            field_id: None,
            logical_type: None,
        },
        format::SchemaElement {
            type_: Some(format::Type::INT32),
            type_length: None,
            repetition_type: Some(format::FieldRepetitionType::REQUIRED),
            name: "a".to_string(),
            num_children: None,
            converted_type: None,
            scale: None,
            precision: None,
            field_id: None,
            logical_type: None,
        },
    ]
}

struct PageWrite {
    header: format::PageHeader,
    body: Vec<u8>,
}

fn encode_page(
    spec_values: &[i32],
    crc: Crc,
    is_dictionary: bool,
    encrypted: Option<(i16, i16, Option<u16>)>,
) -> PageWrite {
    let plain_body = i32_body(spec_values);
    let uncompressed = plain_body.len() as i32;

    let body = match encrypted {
        None => plain_body.clone(),
        Some((rg, col, ordinal)) => {
            let module = if is_dictionary {
                ModuleType::DictionaryPage
            } else {
                ModuleType::DataPage
            };
            let aad = create_module_aad(FILE_AAD, module, rg, col, ordinal);
            framed(XorCipher::encrypt(XOR_KEY, &plain_body, &aad))
        }
    };

    let crc_value = match crc {
        Crc::Absent => None,
        Crc::Valid => Some(crc_of(&body) as i32),
        Crc::Corrupt => Some((crc_of(&body) ^ 1) as i32),
    };

    let header = if is_dictionary {
        format::PageHeader {
            type_: format::PageType::DICTIONARY_PAGE,
            uncompressed_page_size: uncompressed,
            compressed_page_size: body.len() as i32,
            crc: crc_value,
            data_page_header: None,
            index_page_header: None,
            dictionary_page_header: Some(format::DictionaryPageHeader {
                num_values: spec_values.len() as i32,
                encoding: format::Encoding::PLAIN,
                is_sorted: Some(false),
            }),
            data_page_header_v2: None,
        }
    } else {
        format::PageHeader {
            type_: format::PageType::DATA_PAGE,
            uncompressed_page_size: uncompressed,
            compressed_page_size: body.len() as i32,
            crc: crc_value,
            data_page_header: Some(format::DataPageHeader {
                num_values: spec_values.len() as i32,
                encoding: format::Encoding::PLAIN,
                definition_level_encoding: format::Encoding::RLE,
                repetition_level_encoding: format::Encoding::RLE,
                statistics: None,
            }),
            index_page_header: None,
            dictionary_page_header: None,
            data_page_header_v2: None,
        }
    };
    PageWrite { header, body }
}

fn encode_page_header(
    page: &PageWrite,
    is_dictionary: bool,
    encrypted: Option<(i16, i16, Option<u16>)>,
) -> Vec<u8> {
    let plain = thrift_bytes(&page.header);
    match encrypted {
        None => plain,
        Some((rg, col, ordinal)) => {
            let module = if is_dictionary {
                ModuleType::DictionaryPageHeader
            } else {
                ModuleType::DataPageHeader
            };
            let aad = create_module_aad(FILE_AAD, module, rg, col, ordinal);
            framed(XorCipher::encrypt(XOR_KEY, &plain, &aad))
        }
    }
}

/// Serialize a complete single-column file from the spec.
pub fn build_file(spec: &FileSpec) -> Vec<u8> {
    let mut buf = b"PAR1".to_vec();
    let mut row_groups = Vec::new();
    let mut total_rows = 0i64;

    for (g, rg_spec) in spec.row_groups.iter().enumerate() {
        let ordinal = g as i16;
        let chunk_start = buf.len() as i64;
        let mut dictionary_page_offset = None;

        if let Some(dict_values) = &rg_spec.dictionary {
            dictionary_page_offset = Some(chunk_start);
            let enc = spec.encrypted.then_some((ordinal, 0, None));
            let page = encode_page(dict_values, Crc::Absent, true, enc);
            buf.extend(encode_page_header(&page, true, enc));
            buf.extend(&page.body);
        }

        let data_page_offset = buf.len() as i64;
        let mut num_values = 0i64;
        for (p, page_spec) in rg_spec.pages.iter().enumerate() {
            let enc = spec.encrypted.then_some((ordinal, 0, Some(p as u16)));
            let page = encode_page(&page_spec.values, page_spec.crc, false, enc);
            buf.extend(encode_page_header(&page, false, enc));
            buf.extend(&page.body);
            num_values += page_spec.values.len() as i64;
        }

        let real_size = buf.len() as i64 - chunk_start;
        let total_compressed_size = real_size - rg_spec.undercount as i64;

        let mut bloom_filter_offset = None;
        let mut bloom_filter_length = None;
        if let Some(bloom) = &rg_spec.bloom {
            bloom_filter_offset = Some(buf.len() as i64);
            let header = format::BloomFilterHeader {
                num_bytes: bloom.declared_num_bytes,
                algorithm: format::BloomFilterAlgorithm::BLOCK(format::SplitBlockAlgorithm {}),
                hash: format::BloomFilterHash::XXHASH(format::XxHash {}),
                compression: format::BloomFilterCompression::UNCOMPRESSED(
                    format::Uncompressed {},
                ),
            };
            if spec.encrypted {
                let header_aad =
                    create_module_aad(FILE_AAD, ModuleType::BloomFilterHeader, ordinal, 0, None);
                let bitset_aad =
                    create_module_aad(FILE_AAD, ModuleType::BloomFilterBitset, ordinal, 0, None);
                buf.extend(framed(XorCipher::encrypt(
                    XOR_KEY,
                    &thrift_bytes(&header),
                    &header_aad,
                )));
                buf.extend(framed(XorCipher::encrypt(XOR_KEY, &bloom.bitset, &bitset_aad)));
            } else {
                buf.extend(thrift_bytes(&header));
                buf.extend(&bloom.bitset);
            }
            bloom_filter_length = Some((buf.len() as i64 - bloom_filter_offset.unwrap()) as i32);
        }

        let meta = format::ColumnMetaData {
            type_: format::Type::INT32,
            encodings: vec![format::Encoding::PLAIN],
            path_in_schema: vec!["a".to_string()],
            codec: format::CompressionCodec::UNCOMPRESSED,
            num_values: num_values + rg_spec.declared_values_delta,
            total_uncompressed_size: total_compressed_size,
            total_compressed_size,
            key_value_metadata: None,
            data_page_offset,
            index_page_offset: None,
            dictionary_page_offset,
            statistics: None,
            encoding_stats: None,
            bloom_filter_offset,
            bloom_filter_length,
            size_statistics: None,
        };
        let crypto_metadata = spec.encrypted.then(|| {
            format::ColumnCryptoMetaData::ENCRYPTIONWITHFOOTERKEY(
                format::EncryptionWithFooterKey {},
            )
        });
        row_groups.push(format::RowGroup {
            columns: vec![format::ColumnChunk {
                file_path: None,
                file_offset: chunk_start,
                meta_data: Some(meta),
                offset_index_offset: None,
                offset_index_length: None,
                column_index_offset: None,
                column_index_length: None,
                crypto_metadata,
                encrypted_column_metadata: None,
            }],
            total_byte_size: total_compressed_size,
            num_rows: num_values,
            sorting_columns: None,
            file_offset: Some(chunk_start),
            total_compressed_size: Some(total_compressed_size),
            ordinal: Some(ordinal),
        });
        total_rows += num_values;
    }

    let algorithm = format::EncryptionAlgorithm::AESGCMV1(format::AesGcmV1 {
        aad_prefix: None,
        aad_file_unique: Some(FILE_AAD.to_vec()),
        supply_aad_prefix: Some(false),
    });
    let footer = format::FileMetaData {
        version: 2,
        schema: schema_elements(),
        num_rows: total_rows,
        row_groups,
        key_value_metadata: None,
        created_by: Some("gantry-test".to_string()),
        column_orders: None,
        encryption_algorithm: spec.signed.then(|| algorithm.clone()),
        footer_signing_key_metadata: spec.signed.then(|| b"footer-key".to_vec()),
    };
    let footer_bytes = thrift_bytes(&footer);

    let footer_start = buf.len();
    if spec.encrypted {
        let crypto = format::FileCryptoMetaData {
            encryption_algorithm: algorithm,
            key_metadata: Some(b"footer-key".to_vec()),
        };
        buf.extend(thrift_bytes(&crypto));
        let footer_aad = create_module_aad(FILE_AAD, ModuleType::Footer, 0, 0, None);
        buf.extend(framed(XorCipher::encrypt(XOR_KEY, &footer_bytes, &footer_aad)));
        let footer_len = (buf.len() - footer_start) as u32;
        buf.extend(footer_len.to_le_bytes());
        buf.extend(b"PARE");
    } else {
        buf.extend(&footer_bytes);
        if spec.signed {
            let footer_aad = create_module_aad(FILE_AAD, ModuleType::Footer, 0, 0, None);
            buf.extend(XorCipher::signature(&footer_bytes, &footer_aad));
        }
        let footer_len = (buf.len() - footer_start) as u32;
        buf.extend(footer_len.to_le_bytes());
        buf.extend(b"PAR1");
    }
    buf
}
