//! Out-of-core frame algorithms: shuffle, sort, group-by and join.
//!
//! Every algorithm here streams its inputs through the execution runtime,
//! buffers bounded state in [`WriteCache`](crate::cache::WriteCache)s and
//! writes its output back to block storage, so none of them require the
//! data to fit in memory.

pub mod groupby;
pub mod join;
pub mod shuffle;
pub mod sort;

use std::cmp::Ordering;

use colframe_error::{FrameError, Result};

use crate::frame::Frame;
use crate::values::Value;

pub use self::groupby::{group_by, Accumulator, AggregateFn, AggregateSpec, Aggregation};
pub use self::join::{join, JoinType};
pub use self::shuffle::{shuffle, shuffle_with};
pub use self::sort::sort;

/// Resolve key column names to positions, rejecting unknown names.
pub(crate) fn key_indices(frame: &Frame, keys: &[&str]) -> Result<Vec<usize>> {
    keys.iter()
        .map(|name| {
            frame
                .column_index(name)
                .ok_or_else(|| FrameError::new(format!("frame has no column named '{name}'")))
        })
        .collect()
}

/// Project the key columns out of a full row.
pub(crate) fn project(row: &[Value], indices: &[usize]) -> Vec<Value> {
    indices.iter().map(|&i| row[i].clone()).collect()
}

/// Lexicographic comparison of two key tuples.
pub(crate) fn compare_keys(a: &[Value], b: &[Value]) -> Ordering {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .map(|(x, y)| x.total_cmp(y))
        .find(|o| !o.is_eq())
        .unwrap_or(Ordering::Equal)
}

/// Lexicographic comparison honoring a per-key ascending flag.
pub(crate) fn compare_keys_directed(a: &[Value], b: &[Value], ascending: &[bool]) -> Ordering {
    debug_assert_eq!(a.len(), b.len());
    for ((x, y), asc) in a.iter().zip(b).zip(ascending) {
        let ord = x.total_cmp(y);
        if !ord.is_eq() {
            return if *asc { ord } else { ord.reverse() };
        }
    }
    Ordering::Equal
}
