mod common;

use common::*;
use gantry::{FileReader, GantryError, ReadOptions};

fn checksum_options() -> ReadOptions {
    ReadOptions::builder().page_checksum_verification(true).build()
}

#[test]
fn valid_page_crc_passes_verification() {
    let bytes = build_file(&FileSpec {
        row_groups: vec![RowGroupSpec {
            pages: vec![PageSpec::with_crc(vec![1, 2, 3])],
            ..Default::default()
        }],
        ..Default::default()
    });
    let mut reader = FileReader::open_with_options(source(bytes), checksum_options()).unwrap();
    let store = reader.read_next_row_group().unwrap().unwrap();
    let column = store.page_reader(&column_a()).unwrap();
    let page = column.next_page().unwrap().unwrap();
    assert_eq!(decode_i32_page(&page), vec![1, 2, 3]);
}

#[test]
fn corrupted_page_body_fails_checksum_verification() {
    let bytes = build_file(&FileSpec {
        row_groups: vec![RowGroupSpec {
            pages: vec![PageSpec::with_bad_crc(vec![1, 2, 3])],
            ..Default::default()
        }],
        ..Default::default()
    });
    let mut reader = FileReader::open_with_options(source(bytes), checksum_options()).unwrap();
    let err = reader.read_next_row_group().unwrap_err();
    assert!(matches!(err, GantryError::ChecksumFailure { .. }), "{err}");
}

#[test]
fn checksum_mismatch_is_ignored_when_verification_is_off() {
    let bytes = build_file(&FileSpec {
        row_groups: vec![RowGroupSpec {
            pages: vec![PageSpec::with_bad_crc(vec![1, 2, 3])],
            ..Default::default()
        }],
        ..Default::default()
    });
    let mut reader = FileReader::open(source(bytes)).unwrap();
    let store = reader.read_next_row_group().unwrap().unwrap();
    let column = store.page_reader(&column_a()).unwrap();
    assert_eq!(
        decode_i32_page(&column.next_page().unwrap().unwrap()),
        vec![1, 2, 3]
    );
}

#[test]
fn truncated_dictionary_chunk_length_is_completed_from_the_file() {
    // the recorded chunk length undercounts by 16 bytes (historical
    // writer bug, typically 13..19); the tail of the last data page has
    // to be fetched past the buffered part
    let bytes = build_file(&FileSpec {
        row_groups: vec![RowGroupSpec {
            dictionary: Some(vec![7, 8, 9]),
            pages: vec![PageSpec::plain(vec![0, 1, 2, 3, 4, 5])],
            undercount: 16,
            ..Default::default()
        }],
        ..Default::default()
    });

    let mut reader = FileReader::open(source(bytes)).unwrap();
    let store = reader.read_next_row_group().unwrap().unwrap();
    let column = store.page_reader(&column_a()).unwrap();
    assert!(column.dictionary_page().unwrap().is_some());
    let page = column.next_page().unwrap().unwrap();
    assert_eq!(decode_i32_page(&page), vec![0, 1, 2, 3, 4, 5]);
    assert!(column.next_page().unwrap().is_none());
}

#[test]
fn truncated_page_header_is_retried_over_the_file_stream() {
    // undercount cuts into the second page header: 8 bytes of its body
    // plus 5 header bytes are missing from the buffered chunk
    let bytes = build_file(&FileSpec {
        row_groups: vec![RowGroupSpec {
            pages: vec![
                PageSpec::plain(vec![1, 2]),
                PageSpec::plain(vec![3, 4]),
            ],
            undercount: 13,
            ..Default::default()
        }],
        ..Default::default()
    });

    let mut reader = FileReader::open(source(bytes)).unwrap();
    let store = reader.read_next_row_group().unwrap().unwrap();
    let column = store.page_reader(&column_a()).unwrap();
    let mut values = Vec::new();
    while let Some(page) = column.next_page().unwrap() {
        values.extend(decode_i32_page(&page));
    }
    assert_eq!(values, vec![1, 2, 3, 4]);
}

#[test]
fn out_of_range_bloom_size_degrades_to_absent() {
    let bytes = build_file(&FileSpec {
        row_groups: vec![RowGroupSpec {
            pages: vec![PageSpec::plain(vec![1, 2, 3])],
            bloom: Some(BloomSpec {
                declared_num_bytes: -5,
                bitset: Vec::new(),
            }),
            ..Default::default()
        }],
        ..Default::default()
    });
    let mut reader = FileReader::open(source(bytes)).unwrap();
    let chunk = reader.row_groups()[0].columns()[0].clone();
    // warning, not an error
    assert!(reader.read_bloom_filter(&chunk).unwrap().is_none());
}

#[test]
fn well_formed_bloom_reads_back() {
    let bytes = build_file(&FileSpec {
        row_groups: vec![RowGroupSpec {
            pages: vec![PageSpec::plain(vec![1, 2, 3])],
            bloom: Some(BloomSpec {
                declared_num_bytes: 32,
                bitset: vec![0u8; 32],
            }),
            ..Default::default()
        }],
        ..Default::default()
    });
    let mut reader = FileReader::open(source(bytes)).unwrap();
    let chunk = reader.row_groups()[0].columns()[0].clone();
    let bloom = reader.read_bloom_filter(&chunk).unwrap().expect("present");
    assert!(!bloom.check_bytes(&1i32.to_le_bytes()));
}

#[test]
fn chunk_without_bloom_reference_reads_none() {
    let bytes = build_file(&FileSpec {
        row_groups: vec![RowGroupSpec {
            pages: vec![PageSpec::plain(vec![1, 2, 3])],
            ..Default::default()
        }],
        ..Default::default()
    });
    let mut reader = FileReader::open(source(bytes)).unwrap();
    let chunk = reader.row_groups()[0].columns()[0].clone();
    assert!(reader.read_bloom_filter(&chunk).unwrap().is_none());
}

#[test]
fn garbage_bytes_are_not_a_columnar_file() {
    let err = FileReader::open(source(b"definitely not a parquet file".to_vec())).unwrap_err();
    assert!(matches!(err, GantryError::NotAColumnarFile { .. }));
}
