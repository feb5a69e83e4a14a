//! A column: an ordered sequence of immutable on-disk segments.

use crate::storage::block_manager::CursorPart;
use crate::storage::index_file::{IndexColumn, IndexSegment};
use crate::values::DataType;

/// Reference to the physical storage of one column within one segment
/// file. Pure coordinates; the block manager owns the live handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRef {
    pub path: String,
    pub column: usize,
    pub num_rows: u64,
}

/// An immutable, segmented column of typed values.
#[derive(Debug, Clone)]
pub struct Column {
    dtype: DataType,
    segments: Vec<SegmentRef>,
}

impl Column {
    pub fn new(dtype: DataType, segments: Vec<SegmentRef>) -> Self {
        Column { dtype, segments }
    }

    /// A column with no segments (zero rows).
    pub fn empty(dtype: DataType) -> Self {
        Column {
            dtype,
            segments: Vec::new(),
        }
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn num_rows(&self) -> u64 {
        self.segments.iter().map(|s| s.num_rows).sum()
    }

    pub fn segments(&self) -> &[SegmentRef] {
        &self.segments
    }

    pub fn cursor_parts(&self) -> Vec<CursorPart> {
        self.segments
            .iter()
            .map(|s| CursorPart {
                path: s.path.clone(),
                column: s.column,
            })
            .collect()
    }

    pub(crate) fn to_index_column(&self, name: &str) -> IndexColumn {
        IndexColumn {
            name: name.to_string(),
            dtype: self.dtype,
            segments: self
                .segments
                .iter()
                .map(|s| IndexSegment {
                    path: s.path.clone(),
                    column: s.column,
                    num_rows: s.num_rows,
                })
                .collect(),
        }
    }

    pub(crate) fn from_index_column(col: &IndexColumn) -> Self {
        Column {
            dtype: col.dtype,
            segments: col
                .segments
                .iter()
                .map(|s| SegmentRef {
                    path: s.path.clone(),
                    column: s.column,
                    num_rows: s.num_rows,
                })
                .collect(),
        }
    }
}
