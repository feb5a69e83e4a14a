//! The frame: an ordered, name-unique set of equally long columns.
//!
//! Frames are cheap to clone (columns are reference counted) and never
//! mutated in place; every transformation produces a new frame referencing
//! existing or freshly written segments.

pub mod column;

use std::path::Path;
use std::sync::Arc;

use colframe_error::{FrameError, Result};

pub use self::column::{Column, SegmentRef};
use crate::storage::block_manager::{BlockManager, ColumnCursor};
use crate::storage::index_file::{self, FrameIndex};
use crate::values::{DataType, Value};

#[derive(Debug, Clone, Default)]
pub struct Frame {
    columns: Vec<(String, Arc<Column>)>,
}

impl Frame {
    /// Build a frame from named columns. Names must be unique and all
    /// columns must have the same row count.
    pub fn new(columns: Vec<(String, Column)>) -> Result<Self> {
        let mut frame = Frame::default();
        for (name, col) in columns {
            frame = frame.add_column(name, col)?;
        }
        Ok(frame)
    }

    pub fn empty() -> Self {
        Frame::default()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_rows(&self) -> u64 {
        self.columns
            .first()
            .map(|(_, col)| col.num_rows())
            .unwrap_or(0)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn dtypes(&self) -> Vec<DataType> {
        self.columns.iter().map(|(_, col)| col.dtype()).collect()
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Arc<Column>)> {
        self.columns.iter().map(|(name, col)| (name.as_str(), col))
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|(n, _)| n == name)
    }

    pub fn column(&self, name: &str) -> Option<&Arc<Column>> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, col)| col)
    }

    pub fn column_at(&self, idx: usize) -> &Arc<Column> {
        &self.columns[idx].1
    }

    /// New frame with an extra column appended.
    pub fn add_column(&self, name: impl Into<String>, column: Column) -> Result<Frame> {
        let name = name.into();
        if self.column_index(&name).is_some() {
            return Err(FrameError::new(format!("duplicate column name '{name}'")));
        }
        if !self.columns.is_empty() && column.num_rows() != self.num_rows() {
            return Err(FrameError::new(format!(
                "column '{name}' has {} rows, frame has {}",
                column.num_rows(),
                self.num_rows()
            )));
        }
        let mut columns = self.columns.clone();
        columns.push((name, Arc::new(column)));
        Ok(Frame { columns })
    }

    /// New frame containing only the named columns, in the given order.
    pub fn select_columns(&self, names: &[&str]) -> Result<Frame> {
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            let idx = self.column_index(name).ok_or_else(|| {
                FrameError::new(format!("frame has no column named '{name}'"))
            })?;
            columns.push(self.columns[idx].clone());
        }
        Ok(Frame { columns })
    }

    pub fn to_index(&self) -> FrameIndex {
        FrameIndex::new(
            self.columns
                .iter()
                .map(|(name, col)| col.to_index_column(name))
                .collect(),
        )
    }

    pub fn from_index(index: &FrameIndex) -> Result<Frame> {
        let mut frame = Frame::default();
        for col in &index.columns {
            frame = frame.add_column(col.name.clone(), Column::from_index_column(col))?;
        }
        Ok(frame)
    }

    /// Persist the frame index file. Segment files are already on disk.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        index_file::write_index(path, &self.to_index())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Frame> {
        Frame::from_index(&index_file::read_index(path)?)
    }

    /// Read the whole frame back as rows. Debug/test helper; production
    /// consumers stream through the execution runtime instead.
    pub fn collect_rows(&self, manager: &Arc<BlockManager>) -> Result<Vec<Vec<Value>>> {
        let mut cols: Vec<Vec<Value>> = Vec::with_capacity(self.columns.len());
        for (_, col) in &self.columns {
            let mut cursor = ColumnCursor::new(manager.clone(), col.cursor_parts());
            let mut values = Vec::with_capacity(col.num_rows() as usize);
            while let Some(block) = cursor.next_block()? {
                values.extend(block);
            }
            cols.push(values);
        }

        let num_rows = cols.first().map(|c| c.len()).unwrap_or(0);
        debug_assert!(cols.iter().all(|c| c.len() == num_rows));

        let mut rows = Vec::with_capacity(num_rows);
        for i in 0..num_rows {
            rows.push(cols.iter().map(|c| c[i].clone()).collect());
        }
        Ok(rows)
    }
}
