//! Compiled predicate IR.
//!
//! Predicate compilation happens upstream; the read path consumes this
//! already-compiled form and evaluates it conservatively against row-group
//! statistics, dictionaries, bloom filters and column indexes. Every
//! evaluation yields a [`TriState`]: a row group or page is dropped only
//! when the predicate is provably `False` for it.

use std::cmp::Ordering;
use std::ops::{BitAnd, BitOr, Not};

/// Three-valued evaluation result.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TriState {
    True,
    False,
    Unknown,
}

impl TriState {
    pub(crate) fn and(self, other: Self) -> Self {
        match (self, other) {
            (TriState::False, _) | (_, TriState::False) => TriState::False,
            (TriState::True, TriState::True) => TriState::True,
            _ => TriState::Unknown,
        }
    }

    pub(crate) fn or(self, other: Self) -> Self {
        match (self, other) {
            (TriState::True, _) | (_, TriState::True) => TriState::True,
            (TriState::False, TriState::False) => TriState::False,
            _ => TriState::Unknown,
        }
    }

    pub(crate) fn not(self) -> Self {
        match self {
            TriState::True => TriState::False,
            TriState::False => TriState::True,
            TriState::Unknown => TriState::Unknown,
        }
    }
}

impl BitAnd for TriState {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        self.and(rhs)
    }
}

impl BitOr for TriState {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.or(rhs)
    }
}

impl Not for TriState {
    type Output = Self;

    fn not(self) -> Self::Output {
        TriState::not(self)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

/// A literal in a compiled predicate, carrying its physical representation.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    /// Raw bytes: BYTE_ARRAY and FIXED_LEN_BYTE_ARRAY columns, compared
    /// unsigned-lexicographically.
    Bytes(Vec<u8>),
}

impl Value {
    /// Convenience constructor for string literals.
    pub fn text(s: impl AsRef<str>) -> Self {
        Value::Bytes(s.as_ref().as_bytes().to_vec())
    }

    /// The plain encoding of this literal, as hashed by bloom filters.
    /// Booleans have no bloom encoding.
    pub(crate) fn plain_encoded(&self) -> Option<Vec<u8>> {
        match self {
            Value::Bool(_) => None,
            Value::Int32(v) => Some(v.to_le_bytes().to_vec()),
            Value::Int64(v) => Some(v.to_le_bytes().to_vec()),
            Value::Float(v) => Some(v.to_le_bytes().to_vec()),
            Value::Double(v) => Some(v.to_le_bytes().to_vec()),
            Value::Bytes(v) => Some(v.clone()),
        }
    }

    /// Compare this literal against a plain-encoded column-index bound.
    ///
    /// Returns `None` when the encoding does not match the literal's kind
    /// (evaluation then stays `Unknown`).
    pub(crate) fn compare_encoded(&self, encoded: &[u8]) -> Option<Ordering> {
        match self {
            Value::Bool(v) => {
                let other = *encoded.first()? != 0;
                Some(v.cmp(&other))
            }
            Value::Int32(v) => {
                let other = i32::from_le_bytes(encoded.try_into().ok()?);
                Some(v.cmp(&other))
            }
            Value::Int64(v) => {
                let other = i64::from_le_bytes(encoded.try_into().ok()?);
                Some(v.cmp(&other))
            }
            Value::Float(v) => {
                let other = f32::from_le_bytes(encoded.try_into().ok()?);
                v.partial_cmp(&other)
            }
            Value::Double(v) => {
                let other = f64::from_le_bytes(encoded.try_into().ok()?);
                v.partial_cmp(&other)
            }
            Value::Bytes(v) => Some(v.as_slice().cmp(encoded)),
        }
    }
}

/// Compiled predicate tree consumed by the row-group selector and the
/// column-index filter.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    /// Always true; keeps everything.
    True,
    /// Always false; drops everything.
    False,
    /// `column <op> value`
    Cmp {
        /// Dotted column path
        column: String,
        op: CmpOp,
        value: Value,
    },
    /// `column IN (values…)`
    InList {
        /// Dotted column path
        column: String,
        values: Vec<Value>,
    },
    /// `column IS [NOT] NULL`
    IsNull {
        /// Dotted column path
        column: String,
        negated: bool,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// Shorthand for an equality comparison.
    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Predicate::Cmp {
            column: column.into(),
            op: CmpOp::Eq,
            value,
        }
    }

    /// Shorthand for a comparison with an explicit operator.
    pub fn cmp(column: impl Into<String>, op: CmpOp, value: Value) -> Self {
        Predicate::Cmp {
            column: column.into(),
            op,
            value,
        }
    }

    /// Columns referenced anywhere in the tree, deduplicated.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out.dedup();
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Predicate::True | Predicate::False => {}
            Predicate::Cmp { column, .. }
            | Predicate::InList { column, .. }
            | Predicate::IsNull { column, .. } => {
                if !out.contains(&column.as_str()) {
                    out.push(column);
                }
            }
            Predicate::And(parts) | Predicate::Or(parts) => {
                for part in parts {
                    part.collect_columns(out);
                }
            }
            Predicate::Not(inner) => inner.collect_columns(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tri_state_algebra() {
        use TriState::*;
        assert_eq!(True & Unknown, Unknown);
        assert_eq!(False & Unknown, False);
        assert_eq!(True | Unknown, True);
        assert_eq!(False | Unknown, Unknown);
        assert_eq!(!Unknown, Unknown);
        assert_eq!(!True, False);
    }

    #[test]
    fn encoded_comparison_by_kind() {
        assert_eq!(
            Value::Int32(5).compare_encoded(&3i32.to_le_bytes()),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Value::Bytes(b"abc".to_vec()).compare_encoded(b"abd"),
            Some(Ordering::Less)
        );
        // Width mismatch stays undecided.
        assert_eq!(Value::Int64(5).compare_encoded(&3i32.to_le_bytes()), None);
    }

    #[test]
    fn collects_columns_once() {
        let p = Predicate::And(vec![
            Predicate::eq("a", Value::Int32(1)),
            Predicate::Or(vec![
                Predicate::eq("b", Value::Int32(2)),
                Predicate::eq("a", Value::Int32(3)),
            ]),
        ]);
        assert_eq!(p.columns(), vec!["a", "b"]);
    }
}
