mod common;

use common::*;
use gantry::{CmpOp, FileReader, Predicate, ReadOptions, Value};
use parquet::file::properties::{EnabledStatistics, WriterProperties};

fn chunk_stats_props() -> WriterProperties {
    WriterProperties::builder()
        .set_statistics_enabled(EnabledStatistics::Chunk)
        .build()
}

fn open_with_predicate(bytes: Vec<u8>, predicate: Predicate) -> FileReader {
    let options = ReadOptions::builder().record_filter(predicate).build();
    FileReader::open_with_options(source(bytes), options).unwrap()
}

#[test]
fn statistics_drop_non_matching_row_group() {
    let bytes = write_i32_file(
        &[(0..=10).collect::<Vec<_>>(), (100..=200).collect::<Vec<_>>()],
        chunk_stats_props(),
    );
    let reader = open_with_predicate(bytes, Predicate::eq("a", Value::Int32(5)));
    assert_eq!(reader.row_groups().len(), 1);
    assert_eq!(reader.row_groups()[0].num_rows(), 11);
    assert_eq!(reader.record_count(), 11);
}

#[test]
fn statistics_keep_everything_without_predicate() {
    let bytes = write_i32_file(
        &[(0..=10).collect::<Vec<_>>(), (100..=200).collect::<Vec<_>>()],
        chunk_stats_props(),
    );
    let reader = FileReader::open(source(bytes)).unwrap();
    assert_eq!(reader.row_groups().len(), 2);
}

#[test]
fn dictionary_proves_absence_inside_the_stats_range() {
    // 5 sits inside [1, 9] so statistics cannot eliminate the group; the
    // dictionary can.
    let bytes = write_i32_file(&[vec![1, 3, 9, 1, 3, 9]], chunk_stats_props());
    let reader = open_with_predicate(bytes.clone(), Predicate::eq("a", Value::Int32(5)));
    assert!(reader.row_groups().is_empty());

    // present value keeps the group
    let reader = open_with_predicate(bytes.clone(), Predicate::eq("a", Value::Int32(3)));
    assert_eq!(reader.row_groups().len(), 1);

    // dictionary level disabled: the group survives
    let options = ReadOptions::builder()
        .record_filter(Predicate::eq("a", Value::Int32(5)))
        .dictionary_filter(false)
        .bloom_filter(false)
        .build();
    let reader = FileReader::open_with_options(source(bytes), options).unwrap();
    assert_eq!(reader.row_groups().len(), 1);
}

#[test]
fn bloom_filter_proves_absence_for_plain_chunks() {
    let props = WriterProperties::builder()
        .set_statistics_enabled(EnabledStatistics::Chunk)
        .set_dictionary_enabled(false)
        .set_bloom_filter_enabled(true)
        .build();
    let bytes = write_i32_file(&[vec![1, 3, 9]], props);

    let reader = open_with_predicate(bytes.clone(), Predicate::eq("a", Value::Int32(5)));
    assert!(reader.row_groups().is_empty());

    let reader = open_with_predicate(bytes, Predicate::eq("a", Value::Int32(9)));
    assert_eq!(reader.row_groups().len(), 1);
}

#[test]
fn in_list_uses_every_level() {
    let bytes = write_i32_file(&[vec![1, 3, 9, 1, 3, 9]], chunk_stats_props());
    // neither 5 nor 7 exists
    let reader = open_with_predicate(
        bytes.clone(),
        Predicate::InList {
            column: "a".to_string(),
            values: vec![Value::Int32(5), Value::Int32(7)],
        },
    );
    assert!(reader.row_groups().is_empty());

    let reader = open_with_predicate(
        bytes,
        Predicate::InList {
            column: "a".to_string(),
            values: vec![Value::Int32(5), Value::Int32(9)],
        },
    );
    assert_eq!(reader.row_groups().len(), 1);
}

#[test]
fn is_null_on_required_column_eliminates() {
    let bytes = write_i32_file(&[(0..10).collect::<Vec<_>>()], chunk_stats_props());
    let reader = open_with_predicate(
        bytes,
        Predicate::IsNull {
            column: "a".to_string(),
            negated: false,
        },
    );
    assert!(reader.row_groups().is_empty());
}

#[test]
fn range_predicates_use_bounds() {
    let bytes = write_i32_file(
        &[(0..=10).collect::<Vec<_>>(), (100..=200).collect::<Vec<_>>()],
        chunk_stats_props(),
    );
    let reader = open_with_predicate(bytes.clone(), Predicate::cmp("a", CmpOp::Gt, Value::Int32(50)));
    assert_eq!(reader.row_groups().len(), 1);
    assert_eq!(reader.row_groups()[0].num_rows(), 101);

    let reader = open_with_predicate(bytes, Predicate::cmp("a", CmpOp::Lt, Value::Int32(0)));
    assert!(reader.row_groups().is_empty());
}

#[test]
fn filtered_record_count_tracks_surviving_ranges() {
    let bytes = write_i32_file(&[(0..30).collect::<Vec<_>>()], plain_page_props(10));
    let options = ReadOptions::builder()
        .record_filter(Predicate::eq("a", Value::Int32(5)))
        .build();
    let mut reader = FileReader::open_with_options(source(bytes), options).unwrap();
    assert_eq!(reader.record_count(), 30);
    // only the page holding rows 0..10 can match
    assert_eq!(reader.filtered_record_count().unwrap(), 10);

    // column-index level off: counts coincide
    let bytes2 = write_i32_file(&[(0..30).collect::<Vec<_>>()], plain_page_props(10));
    let options = ReadOptions::builder()
        .record_filter(Predicate::eq("a", Value::Int32(5)))
        .column_index_filter(false)
        .build();
    let mut reader = FileReader::open_with_options(source(bytes2), options).unwrap();
    assert_eq!(reader.filtered_record_count().unwrap(), 30);
}
