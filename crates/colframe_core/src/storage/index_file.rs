//! Frame index file.
//!
//! The index is the unit of persistence for a frame: it lists column
//! names, types and the ordered segment files backing each column. It is
//! written last, only after every referenced segment was closed
//! successfully, so a failed materialization never becomes visible.

use std::fs;
use std::path::Path;

use colframe_error::{FrameError, Result, ResultExt};
use serde::{Deserialize, Serialize};

use crate::values::DataType;

pub const INDEX_VERSION: u64 = 2;

/// One segment file reference within a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSegment {
    /// Path of the segment file.
    pub path: String,
    /// Column number within the segment file.
    pub column: usize,
    /// Rows stored in this segment.
    pub num_rows: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexColumn {
    pub name: String,
    pub dtype: DataType,
    pub segments: Vec<IndexSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameIndex {
    pub version: u64,
    pub columns: Vec<IndexColumn>,
}

impl FrameIndex {
    pub fn new(columns: Vec<IndexColumn>) -> Self {
        FrameIndex {
            version: INDEX_VERSION,
            columns,
        }
    }
}

pub fn write_index(path: impl AsRef<Path>, index: &FrameIndex) -> Result<()> {
    let encoded =
        serde_json::to_vec_pretty(index).context("failed to encode frame index")?;
    fs::write(path.as_ref(), encoded).context_fn(|| {
        format!("failed to write frame index '{}'", path.as_ref().display())
    })
}

pub fn read_index(path: impl AsRef<Path>) -> Result<FrameIndex> {
    let bytes = fs::read(path.as_ref()).context_fn(|| {
        format!("failed to read frame index '{}'", path.as_ref().display())
    })?;
    let index: FrameIndex =
        serde_json::from_slice(&bytes).context("failed to decode frame index")?;
    if index.version != INDEX_VERSION {
        return Err(FrameError::new(format!(
            "unsupported frame index version {}, expected {INDEX_VERSION}",
            index.version
        )));
    }
    Ok(index)
}
