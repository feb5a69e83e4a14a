//! Scalar values and logical column types.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use colframe_error::{FrameError, Result};

/// Logical element type of a column.
///
/// `Undefined` is the type of a column containing only nulls (e.g. the
/// right-side columns of unmatched rows in an outer join before any other
/// value is seen).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DataType {
    Undefined,
    Int64,
    Float64,
    Utf8,
}

impl DataType {
    /// Wire code stored in a block's `content_type` field.
    pub fn content_type(self) -> u16 {
        match self {
            DataType::Undefined => 0,
            DataType::Int64 => 1,
            DataType::Float64 => 2,
            DataType::Utf8 => 3,
        }
    }

    pub fn from_content_type(code: u16) -> Result<Self> {
        Ok(match code {
            0 => DataType::Undefined,
            1 => DataType::Int64,
            2 => DataType::Float64,
            3 => DataType::Utf8,
            other => return Err(FrameError::new(format!("unknown content type code {other}"))),
        })
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, DataType::Int64 | DataType::Float64)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::Undefined => "undefined",
            DataType::Int64 => "int64",
            DataType::Float64 => "float64",
            DataType::Utf8 => "utf8",
        };
        write!(f, "{s}")
    }
}

/// A single decoded element of a column.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int64(i64),
    Float64(f64),
    Utf8(String),
}

impl Value {
    pub fn dtype(&self) -> DataType {
        match self {
            Value::Null => DataType::Undefined,
            Value::Int64(_) => DataType::Int64,
            Value::Float64(_) => DataType::Float64,
            Value::Utf8(_) => DataType::Utf8,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int64(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    /// Estimated in-memory footprint, used for spill budgeting.
    pub fn approx_size(&self) -> usize {
        let heap = match self {
            Value::Utf8(s) => s.len(),
            _ => 0,
        };
        std::mem::size_of::<Value>() + heap
    }

    /// Total ordering over values of any type.
    ///
    /// Nulls sort before everything. Int64 and Float64 compare numerically
    /// against each other; otherwise values of different types order by a
    /// fixed type rank. Float comparison uses IEEE total ordering so NaN is
    /// well behaved under sort.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        use Value::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (Int64(a), Int64(b)) => a.cmp(b),
            (Float64(a), Float64(b)) => a.total_cmp(b),
            (Int64(a), Float64(b)) => (*a as f64).total_cmp(b),
            (Float64(a), Int64(b)) => a.total_cmp(&(*b as f64)),
            (Utf8(a), Utf8(b)) => a.cmp(b),
            (a, b) => a.type_rank().cmp(&b.type_rank()),
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Int64(_) | Value::Float64(_) => 1,
            Value::Utf8(_) => 2,
        }
    }

    /// Feed this value into a hasher.
    ///
    /// Hashing is by exact representation (floats by bit pattern). Join and
    /// group-by keys are validated to have matching types up front, so no
    /// cross-type normalization is needed here.
    pub fn hash_into<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => 0u8.hash(state),
            Value::Int64(v) => {
                1u8.hash(state);
                v.hash(state);
            }
            Value::Float64(v) => {
                2u8.hash(state);
                v.to_bits().hash(state);
            }
            Value::Utf8(s) => {
                3u8.hash(state);
                s.hash(state);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::Utf8(s) => write!(f, "{s}"),
        }
    }
}

/// A composite key usable in hash maps (group-by, hash join build tables).
///
/// Equality is by exact representation: floats compare by bit pattern so
/// that NaN keys group together.
#[derive(Debug, Clone)]
pub struct CompositeKey(pub Vec<Value>);

impl PartialEq for CompositeKey {
    fn eq(&self, other: &Self) -> bool {
        if self.0.len() != other.0.len() {
            return false;
        }
        self.0.iter().zip(&other.0).all(|(a, b)| match (a, b) {
            (Value::Float64(x), Value::Float64(y)) => x.to_bits() == y.to_bits(),
            (a, b) => a == b,
        })
    }
}

impl Eq for CompositeKey {}

impl Hash for CompositeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for v in &self.0 {
            v.hash_into(state);
        }
    }
}

/// Hash a row projection with the engine's standard hasher.
pub fn hash_values(values: &[Value]) -> u64 {
    hash_values_seeded(values, 0)
}

/// Seeded variant, used by the grace join to re-partition oversized
/// buckets with an independent hash per recursion level.
pub fn hash_values_seeded(values: &[Value], seed: u64) -> u64 {
    use std::hash::BuildHasher;
    let mut hasher = ahash::RandomState::with_seeds(17, 41, 173, 251).build_hasher();
    seed.hash(&mut hasher);
    for v in values {
        v.hash_into(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sorts_first() {
        let mut vals = vec![Value::Int64(3), Value::Null, Value::Int64(1)];
        vals.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(vals[0], Value::Null);
        assert_eq!(vals[1], Value::Int64(1));
    }

    #[test]
    fn cross_numeric_compare() {
        assert_eq!(
            Value::Int64(2).total_cmp(&Value::Float64(2.5)),
            Ordering::Less
        );
        assert_eq!(
            Value::Float64(3.0).total_cmp(&Value::Int64(3)),
            Ordering::Equal
        );
    }

    #[test]
    fn nan_keys_group_together() {
        let a = CompositeKey(vec![Value::Float64(f64::NAN)]);
        let b = CompositeKey(vec![Value::Float64(f64::NAN)]);
        assert_eq!(a, b);
        assert_eq!(hash_values(&a.0), hash_values(&b.0));
    }

    #[test]
    fn content_type_round_trip() {
        for dt in [
            DataType::Undefined,
            DataType::Int64,
            DataType::Float64,
            DataType::Utf8,
        ] {
            assert_eq!(DataType::from_content_type(dt.content_type()).unwrap(), dt);
        }
        assert!(DataType::from_content_type(99).is_err());
    }
}
