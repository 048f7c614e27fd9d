//! Row ranges surviving predicate push-down within one row group.

use roaring::RoaringBitmap;

/// A closed interval of row indexes, `from <= to`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RowRange {
    pub from: i64,
    pub to: i64,
}

impl RowRange {
    fn count(&self) -> i64 {
        self.to - self.from + 1
    }

    fn is_after(&self, other: &RowRange) -> bool {
        self.from > other.to + 1
    }

    fn union(a: RowRange, b: RowRange) -> RowRange {
        RowRange {
            from: a.from.min(b.from),
            to: a.to.max(b.to),
        }
    }

    fn intersection(a: RowRange, b: RowRange) -> Option<RowRange> {
        let from = a.from.max(b.from);
        let to = a.to.min(b.to);
        (from <= to).then_some(RowRange { from, to })
    }
}

/// Sorted, disjoint closed row-index intervals within a row group.
///
/// Adjacent intervals are always merged, so the internal representation is
/// canonical: two `RowRanges` are equal iff they select the same rows.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RowRanges {
    ranges: Vec<RowRange>,
}

impl RowRanges {
    /// No rows selected.
    pub fn empty() -> Self {
        Self::default()
    }

    /// All rows of a `row_count`-row group selected.
    pub fn full(row_count: i64) -> Self {
        if row_count <= 0 {
            return Self::empty();
        }
        Self {
            ranges: vec![RowRange {
                from: 0,
                to: row_count - 1,
            }],
        }
    }

    /// Build from closed intervals in ascending order of `from`; adjacent
    /// and overlapping intervals are merged.
    pub fn from_intervals(intervals: impl IntoIterator<Item = (i64, i64)>) -> Self {
        let mut out = Self::empty();
        for (from, to) in intervals {
            if from <= to {
                out.add(RowRange { from, to });
            }
        }
        out
    }

    fn add(&mut self, range: RowRange) {
        if let Some(last) = self.ranges.last_mut() {
            debug_assert!(range.from >= last.from);
            if !range.is_after(last) {
                *last = RowRange::union(*last, range);
                return;
            }
        }
        self.ranges.push(range);
    }

    /// Total number of selected rows.
    pub fn row_count(&self) -> i64 {
        self.ranges.iter().map(RowRange::count).sum()
    }

    /// The selected intervals in ascending order.
    pub fn ranges(&self) -> &[RowRange] {
        &self.ranges
    }

    /// True when no rows are selected.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// True when any selected row falls inside the closed interval
    /// `[from, to]`. Used to decide whether a page survives filtering.
    pub fn is_overlapping(&self, from: i64, to: i64) -> bool {
        self.ranges
            .binary_search_by(|r| {
                if r.to < from {
                    std::cmp::Ordering::Less
                } else if r.from > to {
                    std::cmp::Ordering::Greater
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .is_ok()
    }

    /// Union of two selections.
    pub fn union(left: &RowRanges, right: &RowRanges) -> RowRanges {
        let mut out = RowRanges::empty();
        let mut l = left.ranges.iter().peekable();
        let mut r = right.ranges.iter().peekable();
        loop {
            let next = match (l.peek(), r.peek()) {
                (Some(a), Some(b)) => {
                    if a.from <= b.from {
                        *l.next().unwrap()
                    } else {
                        *r.next().unwrap()
                    }
                }
                (Some(_), None) => *l.next().unwrap(),
                (None, Some(_)) => *r.next().unwrap(),
                (None, None) => break,
            };
            out.add(next);
        }
        out
    }

    /// Intersection of two selections.
    pub fn intersect(left: &RowRanges, right: &RowRanges) -> RowRanges {
        let mut out = RowRanges::empty();
        let (mut i, mut j) = (0, 0);
        while i < left.ranges.len() && j < right.ranges.len() {
            let a = left.ranges[i];
            let b = right.ranges[j];
            if let Some(overlap) = RowRange::intersection(a, b) {
                out.add(overlap);
            }
            if a.to <= b.to {
                i += 1;
            } else {
                j += 1;
            }
        }
        out
    }

    /// Selected row indexes as a bitmap, for consumers that synchronize
    /// columns through bitmaps. `None` when the group exceeds `u32` rows.
    pub fn to_bitmap(&self) -> Option<RoaringBitmap> {
        let mut bitmap = RoaringBitmap::new();
        for range in &self.ranges {
            let from = u32::try_from(range.from).ok()?;
            let to = u32::try_from(range.to).ok()?;
            bitmap.insert_range(from..=to);
        }
        Some(bitmap)
    }

    /// Iterate over every selected row index.
    pub fn iter_rows(&self) -> impl Iterator<Item = i64> + '_ {
        self.ranges.iter().flat_map(|r| r.from..=r.to)
    }
}
