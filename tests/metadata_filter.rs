mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use common::*;
use gantry::{read_footer, read_footers, FileReader, MetadataFilter, ReadOptions, SourceFile};
use parquet::file::properties::WriterProperties;

fn three_group_file() -> Vec<u8> {
    write_i32_file(
        &[
            (0..5).collect::<Vec<_>>(),
            (5..12).collect::<Vec<_>>(),
            (12..30).collect::<Vec<_>>(),
        ],
        WriterProperties::builder().build(),
    )
}

#[test]
fn skip_row_groups_keeps_only_file_metadata() {
    let options = ReadOptions::builder()
        .metadata_filter(MetadataFilter::SkipRowGroups)
        .build();
    let reader = FileReader::open_with_options(source(three_group_file()), options).unwrap();
    assert!(reader.row_groups().is_empty());
    assert_eq!(reader.record_count(), 0);
    // the schema is still there
    assert_eq!(reader.file_metadata().schema().num_columns(), 1);
    assert_eq!(reader.file_metadata().num_rows(), 30);
}

#[test]
fn ordinals_select_by_position_and_keep_row_offsets() {
    let options = ReadOptions::builder()
        .metadata_filter(MetadataFilter::RowGroupOrdinals(BTreeSet::from([1])))
        .build();
    let mut reader = FileReader::open_with_options(source(three_group_file()), options).unwrap();
    assert_eq!(reader.row_groups().len(), 1);
    assert_eq!(reader.row_groups()[0].num_rows(), 7);
    // absolute first-row index survives the filtering
    assert_eq!(reader.row_groups()[0].row_index_offset(), 5);

    let store = reader.read_next_row_group().unwrap().unwrap();
    assert_eq!(store.row_index_offset(), 5);
}

#[test]
fn range_filter_selects_by_midpoint() {
    let bytes = three_group_file();
    // discover the physical layout first
    let footer = read_footer(&source(bytes.clone()), &ReadOptions::default()).unwrap();
    let starts: Vec<u64> = footer
        .row_groups()
        .iter()
        .map(|rg| rg.columns()[0].starting_pos() as u64)
        .collect();

    // a range spanning exactly the second row group's bytes
    let options = ReadOptions::builder()
        .metadata_filter(MetadataFilter::RowGroupRange {
            start: starts[1],
            end: starts[2],
        })
        .build();
    let reader = FileReader::open_with_options(source(bytes), options).unwrap();
    assert_eq!(reader.row_groups().len(), 1);
    assert_eq!(reader.row_groups()[0].num_rows(), 7);
}

#[test]
fn range_filters_partition_without_overlap() {
    let bytes = three_group_file();
    let file_len = bytes.len() as u64;
    let split = file_len / 2;

    let count_in = |start: u64, end: u64| {
        let options = ReadOptions::builder()
            .metadata_filter(MetadataFilter::RowGroupRange { start, end })
            .build();
        FileReader::open_with_options(source(bytes.clone()), options)
            .unwrap()
            .row_groups()
            .len()
    };
    let first = count_in(0, split);
    let second = count_in(split, file_len);
    assert_eq!(first + second, 3, "every row group lands in exactly one split");
}

#[test]
fn batch_footer_reads_preserve_order() {
    let sources: Vec<Arc<dyn SourceFile>> = vec![
        source(write_i32_file(&[(0..4).collect::<Vec<_>>()], WriterProperties::builder().build())),
        source(three_group_file()),
        source(write_i32_file(&[(0..9).collect::<Vec<_>>()], WriterProperties::builder().build())),
    ];
    let options = ReadOptions::builder().parallelism(2).build();
    let footers = read_footers(&sources, &options).unwrap();
    let rows: Vec<i64> = footers
        .iter()
        .map(|f| f.file_metadata().num_rows())
        .collect();
    assert_eq!(rows, vec![4, 30, 9]);
}

#[test]
fn batch_footer_reads_surface_errors() {
    let sources: Vec<Arc<dyn SourceFile>> = vec![
        source(write_i32_file(&[(0..4).collect::<Vec<_>>()], WriterProperties::builder().build())),
        source(b"broken".to_vec()),
    ];
    assert!(read_footers(&sources, &ReadOptions::default()).is_err());
}
