//! Row-group selection.
//!
//! A row group survives when the compiled predicate is not provably false
//! under every enabled filter level. Levels run cheapest-first: statistics
//! (already in the footer), then dictionaries, then bloom filters (both
//! need reads, served through the reader's caches). The column-index level
//! refines surviving groups to page-granular [`RowRanges`].
//!
//! Everything here is conservative: a missing statistic, an undecodable
//! dictionary, or a type mismatch evaluates to `Unknown`, which keeps the
//! data.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use parquet::basic::{Encoding, Type as PhysicalType};
use parquet::file::statistics::Statistics;

use crate::bloom::Sbbf;
use crate::error::Result;
use crate::index::{ColumnIndexMeta, OffsetIndexMeta};
use crate::metadata::{ColumnChunkMetadata, RowGroupMetadata};
use crate::predicate::{CmpOp, Predicate, TriState, Value};
use crate::ranges::RowRanges;

fn chunk_for<'a>(rg: &'a RowGroupMetadata, column: &str) -> Option<&'a ColumnChunkMetadata> {
    rg.columns().iter().find(|c| c.path().string() == column)
}

/// Does `x op v` hold, given `ord = v.cmp(x)` (the literal compared to the
/// candidate)?
fn op_matches(op: CmpOp, ord: Ordering) -> bool {
    match op {
        CmpOp::Eq => ord == Ordering::Equal,
        CmpOp::NotEq => ord != Ordering::Equal,
        // x < v exactly when v > x
        CmpOp::Lt => ord == Ordering::Greater,
        CmpOp::LtEq => ord != Ordering::Less,
        CmpOp::Gt => ord == Ordering::Less,
        CmpOp::GtEq => ord != Ordering::Greater,
    }
}

// ---------------------------------------------------------------------
// statistics level
// ---------------------------------------------------------------------

/// Evaluate the predicate against row-group statistics.
pub(crate) fn evaluate_statistics(pred: &Predicate, rg: &RowGroupMetadata) -> TriState {
    match pred {
        Predicate::True => TriState::True,
        Predicate::False => TriState::False,
        Predicate::Cmp { column, op, value } => chunk_for(rg, column)
            .map(|chunk| eval_cmp_stats(chunk, *op, value))
            .unwrap_or(TriState::Unknown),
        Predicate::InList { column, values } => chunk_for(rg, column)
            .map(|chunk| {
                values.iter().fold(TriState::False, |acc, value| {
                    acc.or(eval_cmp_stats(chunk, CmpOp::Eq, value))
                })
            })
            .unwrap_or(TriState::Unknown),
        Predicate::IsNull { column, negated } => chunk_for(rg, column)
            .map(|chunk| eval_is_null_stats(chunk, *negated))
            .unwrap_or(TriState::Unknown),
        Predicate::And(parts) => parts.iter().fold(TriState::True, |acc, part| {
            acc.and(evaluate_statistics(part, rg))
        }),
        Predicate::Or(parts) => parts.iter().fold(TriState::False, |acc, part| {
            acc.or(evaluate_statistics(part, rg))
        }),
        Predicate::Not(inner) => evaluate_statistics(inner, rg).not(),
    }
}

fn stats_bounds(stats: &Statistics) -> Option<(Value, Value)> {
    match stats {
        Statistics::Boolean(s) => Some((Value::Bool(*s.min_opt()?), Value::Bool(*s.max_opt()?))),
        Statistics::Int32(s) => Some((Value::Int32(*s.min_opt()?), Value::Int32(*s.max_opt()?))),
        Statistics::Int64(s) => Some((Value::Int64(*s.min_opt()?), Value::Int64(*s.max_opt()?))),
        Statistics::Int96(_) => None,
        Statistics::Float(s) => Some((Value::Float(*s.min_opt()?), Value::Float(*s.max_opt()?))),
        Statistics::Double(s) => {
            Some((Value::Double(*s.min_opt()?), Value::Double(*s.max_opt()?)))
        }
        Statistics::ByteArray(s) => Some((
            Value::Bytes(s.min_opt()?.data().to_vec()),
            Value::Bytes(s.max_opt()?.data().to_vec()),
        )),
        Statistics::FixedLenByteArray(s) => Some((
            Value::Bytes(s.min_opt()?.data().to_vec()),
            Value::Bytes(s.max_opt()?.data().to_vec()),
        )),
    }
}

fn cmp_same_kind(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Int32(x), Value::Int32(y)) => Some(x.cmp(y)),
        (Value::Int64(x), Value::Int64(y)) => Some(x.cmp(y)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (Value::Double(x), Value::Double(y)) => x.partial_cmp(y),
        (Value::Bytes(x), Value::Bytes(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn eval_cmp_stats(chunk: &ColumnChunkMetadata, op: CmpOp, value: &Value) -> TriState {
    let Some(stats) = chunk.statistics() else {
        return TriState::Unknown;
    };
    let null_count = stats.null_count_opt();
    let num_values = chunk.num_values().max(0) as u64;
    if null_count == Some(num_values) && num_values > 0 {
        // all-null chunk: no value satisfies a comparison
        return TriState::False;
    }
    let Some((min, max)) = stats_bounds(stats) else {
        return TriState::Unknown;
    };
    let (Some(vs_min), Some(vs_max)) = (cmp_same_kind(value, &min), cmp_same_kind(value, &max))
    else {
        return TriState::Unknown;
    };
    eval_cmp_bounds(op, vs_min, vs_max, null_count == Some(0))
}

/// Decide a comparison from the literal's ordering against the min and max
/// bounds. `no_nulls` gates the provably-true answers: a null row never
/// satisfies a comparison, so `True` requires every row to be non-null.
fn eval_cmp_bounds(op: CmpOp, vs_min: Ordering, vs_max: Ordering, no_nulls: bool) -> TriState {
    use Ordering::*;
    let provably_false = match op {
        CmpOp::Eq => vs_min == Less || vs_max == Greater,
        CmpOp::NotEq => vs_min == Equal && vs_max == Equal && no_nulls,
        CmpOp::Lt => vs_min != Greater,
        CmpOp::LtEq => vs_min == Less,
        CmpOp::Gt => vs_max != Less,
        CmpOp::GtEq => vs_max == Greater,
    };
    if provably_false {
        return TriState::False;
    }
    let provably_true = no_nulls
        && match op {
            CmpOp::Eq => vs_min == Equal && vs_max == Equal,
            CmpOp::NotEq => vs_min == Less || vs_max == Greater,
            CmpOp::Lt => vs_max == Greater,
            CmpOp::LtEq => vs_max != Less,
            CmpOp::Gt => vs_min == Less,
            CmpOp::GtEq => vs_min != Greater,
        };
    if provably_true {
        TriState::True
    } else {
        TriState::Unknown
    }
}

fn eval_is_null_stats(chunk: &ColumnChunkMetadata, negated: bool) -> TriState {
    let Some(null_count) = chunk.statistics().and_then(|s| s.null_count_opt()) else {
        return TriState::Unknown;
    };
    let num_values = chunk.num_values().max(0) as u64;
    let state = if null_count == 0 {
        TriState::False
    } else if null_count == num_values {
        TriState::True
    } else {
        TriState::Unknown
    };
    if negated {
        state.not()
    } else {
        state
    }
}

// ---------------------------------------------------------------------
// dictionary level
// ---------------------------------------------------------------------

/// Plain-encoded values of a decoded dictionary page.
pub(crate) type DictionaryValues = HashSet<Vec<u8>>;

/// A chunk's dictionary proves absence only when every data page is
/// dictionary-encoded. Page encoding stats decide exactly; without them,
/// fall back to the declared encodings minus the level encodings, which
/// must all be dictionary encodings.
pub(crate) fn all_pages_dictionary_encoded(chunk: &ColumnChunkMetadata) -> bool {
    use parquet::format::{self, PageType};

    if !chunk.has_dictionary_page() {
        return false;
    }
    if let Some(stats) = chunk.encoding_stats() {
        return stats
            .iter()
            .filter(|s| {
                matches!(s.page_type, PageType::DATA_PAGE | PageType::DATA_PAGE_V2)
                    && s.count > 0
            })
            .all(|s| {
                matches!(
                    s.encoding,
                    format::Encoding::PLAIN_DICTIONARY | format::Encoding::RLE_DICTIONARY
                )
            });
    }
    chunk
        .encodings()
        .iter()
        .filter(|e| !matches!(e, Encoding::RLE | Encoding::BIT_PACKED))
        .all(|e| matches!(e, Encoding::PLAIN_DICTIONARY | Encoding::RLE_DICTIONARY))
}

/// Decode the plain-encoded values of a dictionary page.
pub(crate) fn decode_plain_dictionary(
    bytes: &[u8],
    physical_type: PhysicalType,
    type_length: usize,
) -> Option<DictionaryValues> {
    let mut values = HashSet::new();
    match physical_type {
        PhysicalType::INT32 | PhysicalType::FLOAT => {
            for chunk in bytes.chunks(4) {
                if chunk.len() != 4 {
                    return None;
                }
                values.insert(chunk.to_vec());
            }
        }
        PhysicalType::INT64 | PhysicalType::DOUBLE => {
            for chunk in bytes.chunks(8) {
                if chunk.len() != 8 {
                    return None;
                }
                values.insert(chunk.to_vec());
            }
        }
        PhysicalType::BYTE_ARRAY => {
            let mut rest = bytes;
            while !rest.is_empty() {
                if rest.len() < 4 {
                    return None;
                }
                let len = u32::from_le_bytes(rest[..4].try_into().unwrap()) as usize;
                rest = &rest[4..];
                if rest.len() < len {
                    return None;
                }
                values.insert(rest[..len].to_vec());
                rest = &rest[len..];
            }
        }
        PhysicalType::FIXED_LEN_BYTE_ARRAY => {
            if type_length == 0 {
                return None;
            }
            for chunk in bytes.chunks(type_length) {
                if chunk.len() != type_length {
                    return None;
                }
                values.insert(chunk.to_vec());
            }
        }
        PhysicalType::BOOLEAN | PhysicalType::INT96 => return None,
    }
    Some(values)
}

/// Evaluate the predicate against chunk dictionaries. `lookup` returns the
/// decoded dictionary of a chunk, or `None` when the chunk cannot be
/// proven all-dictionary-encoded (or has no dictionary).
pub(crate) fn evaluate_dictionary(
    pred: &Predicate,
    rg: &RowGroupMetadata,
    lookup: &mut dyn FnMut(&ColumnChunkMetadata) -> Result<Option<DictionaryValues>>,
) -> Result<TriState> {
    Ok(match pred {
        Predicate::True => TriState::True,
        Predicate::False => TriState::False,
        Predicate::Cmp { column, op, value } => match chunk_for(rg, column) {
            Some(chunk) => match lookup(chunk)? {
                Some(dict) => dict_matches(&dict, *op, value),
                None => TriState::Unknown,
            },
            None => TriState::Unknown,
        },
        Predicate::InList { column, values } => match chunk_for(rg, column) {
            Some(chunk) => match lookup(chunk)? {
                Some(dict) => values.iter().fold(TriState::False, |acc, value| {
                    acc.or(dict_matches(&dict, CmpOp::Eq, value))
                }),
                None => TriState::Unknown,
            },
            None => TriState::Unknown,
        },
        // dictionaries carry no null information
        Predicate::IsNull { .. } => TriState::Unknown,
        Predicate::And(parts) => {
            let mut acc = TriState::True;
            for part in parts {
                acc = acc.and(evaluate_dictionary(part, rg, lookup)?);
                if acc == TriState::False {
                    break;
                }
            }
            acc
        }
        Predicate::Or(parts) => {
            let mut acc = TriState::False;
            for part in parts {
                acc = acc.or(evaluate_dictionary(part, rg, lookup)?);
            }
            acc
        }
        Predicate::Not(inner) => evaluate_dictionary(inner, rg, lookup)?.not(),
    })
}

/// `False` when no dictionary value satisfies the comparison (null rows
/// cannot satisfy it either), `Unknown` otherwise.
fn dict_matches(dict: &DictionaryValues, op: CmpOp, value: &Value) -> TriState {
    for encoded in dict {
        match value.compare_encoded(encoded) {
            Some(ord) if op_matches(op, ord) => return TriState::Unknown,
            Some(_) => {}
            None => return TriState::Unknown,
        }
    }
    TriState::False
}

// ---------------------------------------------------------------------
// bloom filter level
// ---------------------------------------------------------------------

/// Evaluate the predicate against bloom filters. Only equality carries
/// evidence; everything else is `Unknown`.
pub(crate) fn evaluate_bloom(
    pred: &Predicate,
    rg: &RowGroupMetadata,
    lookup: &mut dyn FnMut(&ColumnChunkMetadata) -> Result<Option<Sbbf>>,
) -> Result<TriState> {
    Ok(match pred {
        Predicate::True => TriState::True,
        Predicate::False => TriState::False,
        Predicate::Cmp {
            column,
            op: CmpOp::Eq,
            value,
        } => match chunk_for(rg, column) {
            Some(chunk) => match lookup(chunk)? {
                Some(bloom) => match bloom.check(value) {
                    Some(false) => TriState::False,
                    _ => TriState::Unknown,
                },
                None => TriState::Unknown,
            },
            None => TriState::Unknown,
        },
        Predicate::InList { column, values } => match chunk_for(rg, column) {
            Some(chunk) => match lookup(chunk)? {
                Some(bloom) => {
                    let mut any_possible = false;
                    for value in values {
                        match bloom.check(value) {
                            Some(false) => {}
                            _ => any_possible = true,
                        }
                    }
                    if any_possible {
                        TriState::Unknown
                    } else {
                        TriState::False
                    }
                }
                None => TriState::Unknown,
            },
            None => TriState::Unknown,
        },
        Predicate::Cmp { .. } | Predicate::IsNull { .. } => TriState::Unknown,
        Predicate::And(parts) => {
            let mut acc = TriState::True;
            for part in parts {
                acc = acc.and(evaluate_bloom(part, rg, lookup)?);
                if acc == TriState::False {
                    break;
                }
            }
            acc
        }
        Predicate::Or(parts) => {
            let mut acc = TriState::False;
            for part in parts {
                acc = acc.or(evaluate_bloom(part, rg, lookup)?);
            }
            acc
        }
        Predicate::Not(inner) => evaluate_bloom(inner, rg, lookup)?.not(),
    })
}

// ---------------------------------------------------------------------
// column-index level
// ---------------------------------------------------------------------

/// Both indexes of a column chunk, as served by the lazy index store.
pub(crate) type ChunkIndexes = (Option<Arc<ColumnIndexMeta>>, Option<Arc<OffsetIndexMeta>>);

/// Compute the rows of `rg` that can match the predicate, at page
/// granularity. Unsupported shapes and missing indexes widen to the full
/// row range, so the result is always safe to read.
pub(crate) fn compute_row_ranges(
    pred: &Predicate,
    rg: &RowGroupMetadata,
    lookup: &mut dyn FnMut(&ColumnChunkMetadata) -> Result<ChunkIndexes>,
) -> Result<RowRanges> {
    let full = || RowRanges::full(rg.num_rows());
    Ok(match pred {
        Predicate::True => full(),
        Predicate::False => RowRanges::empty(),
        Predicate::Cmp { column, op, value } => {
            column_page_ranges(rg, column, lookup, |index, page| {
                eval_cmp_page(index, page, *op, value)
            })?
        }
        Predicate::InList { column, values } => {
            column_page_ranges(rg, column, lookup, |index, page| {
                values.iter().fold(TriState::False, |acc, value| {
                    acc.or(eval_cmp_page(index, page, CmpOp::Eq, value))
                })
            })?
        }
        Predicate::IsNull { column, negated } => {
            column_page_ranges(rg, column, lookup, |index, page| {
                eval_is_null_page(index, page, *negated)
            })?
        }
        Predicate::And(parts) => {
            let mut acc = RowRanges::full(rg.num_rows());
            for part in parts {
                let part_ranges = compute_row_ranges(part, rg, lookup)?;
                acc = RowRanges::intersect(&acc, &part_ranges);
                if acc.is_empty() {
                    break;
                }
            }
            acc
        }
        Predicate::Or(parts) => {
            let mut acc = RowRanges::empty();
            for part in parts {
                let part_ranges = compute_row_ranges(part, rg, lookup)?;
                acc = RowRanges::union(&acc, &part_ranges);
            }
            acc
        }
        // Inverting a page selection is only sound when every page decided
        // definitively; stay conservative instead.
        Predicate::Not(_) => full(),
    })
}

fn column_page_ranges(
    rg: &RowGroupMetadata,
    column: &str,
    lookup: &mut dyn FnMut(&ColumnChunkMetadata) -> Result<ChunkIndexes>,
    eval_page: impl Fn(&ColumnIndexMeta, usize) -> TriState,
) -> Result<RowRanges> {
    let Some(chunk) = chunk_for(rg, column) else {
        return Ok(RowRanges::full(rg.num_rows()));
    };
    let (column_index, offset_index) = lookup(chunk)?;
    let (Some(column_index), Some(offset_index)) = (column_index, offset_index) else {
        return Ok(RowRanges::full(rg.num_rows()));
    };
    if column_index.page_count() != offset_index.page_count() {
        tracing::warn!(
            column,
            "column index and offset index disagree on page count; skipping page filtering"
        );
        return Ok(RowRanges::full(rg.num_rows()));
    }

    let row_count = rg.num_rows();
    let intervals = (0..offset_index.page_count())
        .filter(|&page| eval_page(&column_index, page) != TriState::False)
        .map(|page| offset_index.page_rows(page, row_count));
    Ok(RowRanges::from_intervals(intervals))
}

fn eval_cmp_page(index: &ColumnIndexMeta, page: usize, op: CmpOp, value: &Value) -> TriState {
    if index.is_null_page(page) {
        return TriState::False;
    }
    let (Some(min), Some(max)) = (index.min_value(page), index.max_value(page)) else {
        return TriState::Unknown;
    };
    let (Some(vs_min), Some(vs_max)) = (value.compare_encoded(min), value.compare_encoded(max))
    else {
        return TriState::Unknown;
    };
    let no_nulls = index.null_count(page) == Some(0);
    eval_cmp_bounds(op, vs_min, vs_max, no_nulls)
}

fn eval_is_null_page(index: &ColumnIndexMeta, page: usize, negated: bool) -> TriState {
    let state = if index.is_null_page(page) {
        TriState::True
    } else {
        match index.null_count(page) {
            Some(0) => TriState::False,
            Some(_) => TriState::True,
            None => TriState::Unknown,
        }
    };
    if negated {
        state.not()
    } else {
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmp_bounds_eq() {
        use Ordering::*;
        // value below min
        assert_eq!(eval_cmp_bounds(CmpOp::Eq, Less, Less, true), TriState::False);
        // value inside range
        assert_eq!(
            eval_cmp_bounds(CmpOp::Eq, Greater, Less, true),
            TriState::Unknown
        );
        // min == max == value, no nulls
        assert_eq!(eval_cmp_bounds(CmpOp::Eq, Equal, Equal, true), TriState::True);
        // same but with nulls: not provably true
        assert_eq!(
            eval_cmp_bounds(CmpOp::Eq, Equal, Equal, false),
            TriState::Unknown
        );
    }

    #[test]
    fn cmp_bounds_ordering() {
        use Ordering::*;
        // x < 5 with min = 5: provably false
        assert_eq!(eval_cmp_bounds(CmpOp::Lt, Equal, Less, true), TriState::False);
        // x < 5 with max = 3: provably true without nulls
        assert_eq!(
            eval_cmp_bounds(CmpOp::Lt, Greater, Greater, true),
            TriState::True
        );
        // x > 5 with max = 5: provably false
        assert_eq!(eval_cmp_bounds(CmpOp::Gt, Greater, Equal, true), TriState::False);
    }

    #[test]
    fn dictionary_eq_miss_is_false() {
        let mut dict = DictionaryValues::new();
        dict.insert(1i32.to_le_bytes().to_vec());
        dict.insert(2i32.to_le_bytes().to_vec());
        assert_eq!(
            dict_matches(&dict, CmpOp::Eq, &Value::Int32(3)),
            TriState::False
        );
        assert_eq!(
            dict_matches(&dict, CmpOp::Eq, &Value::Int32(2)),
            TriState::Unknown
        );
        assert_eq!(
            dict_matches(&dict, CmpOp::Gt, &Value::Int32(2)),
            TriState::False
        );
        assert_eq!(
            dict_matches(&dict, CmpOp::Lt, &Value::Int32(2)),
            TriState::Unknown
        );
    }

    #[test]
    fn decodes_byte_array_dictionary() {
        let mut bytes = Vec::new();
        for word in [b"ab".as_slice(), b"cde".as_slice()] {
            bytes.extend_from_slice(&(word.len() as u32).to_le_bytes());
            bytes.extend_from_slice(word);
        }
        let dict = decode_plain_dictionary(&bytes, PhysicalType::BYTE_ARRAY, 0).unwrap();
        assert!(dict.contains(b"ab".as_slice()));
        assert!(dict.contains(b"cde".as_slice()));
        assert_eq!(dict.len(), 2);
    }
}
