//! Row sinks: the output-iterator contract exposed to consumers.
//!
//! External consumers (model-serving layers, RPC marshalling, tests)
//! receive rows or whole batches through this trait and never touch the
//! block format directly. [`SegmentSink`] is the engine's own consumer
//! that persists rows back into block storage.

use std::fmt;
use std::path::{Path, PathBuf};

use colframe_error::{FrameError, Result};
use tracing::debug;

use crate::execution::{EmitState, RowBatch};
use crate::frame::{Column, Frame, SegmentRef};
use crate::storage::block_file::SegmentWriter;
use crate::values::{DataType, Value};

pub trait RowSink: fmt::Debug {
    /// The state a driver should assume before anything was emitted.
    fn initial_state(&self) -> EmitState {
        EmitState::initial()
    }

    /// Accept one row.
    fn push_row(&mut self, row: &[Value]) -> Result<EmitState>;

    /// Accept a whole batch. The default forwards row by row, stopping
    /// early on a terminal state.
    fn push_batch(&mut self, batch: &RowBatch) -> Result<EmitState> {
        let mut state = EmitState::NeedsMore;
        for i in 0..batch.num_rows() {
            state = self.push_row(&batch.row(i))?;
            if state.is_terminal() {
                break;
            }
        }
        Ok(state)
    }

    /// Flush and finalize. Called exactly once after the last push.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Collects rows in memory. Optionally stops after a row limit, which
/// exercises the short-circuit path end to end.
#[derive(Debug, Default)]
pub struct VecSink {
    pub rows: Vec<Vec<Value>>,
    limit: Option<usize>,
}

impl VecSink {
    pub fn new() -> Self {
        VecSink::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        VecSink {
            rows: Vec::new(),
            limit: Some(limit),
        }
    }
}

impl RowSink for VecSink {
    fn push_row(&mut self, row: &[Value]) -> Result<EmitState> {
        self.rows.push(row.to_vec());
        match self.limit {
            Some(limit) if self.rows.len() >= limit => Ok(EmitState::Done),
            _ => Ok(EmitState::NeedsMore),
        }
    }
}

/// Adapts a closure to a row sink.
pub struct FnSink<F>(pub F);

impl<F> fmt::Debug for FnSink<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FnSink")
    }
}

impl<F> RowSink for FnSink<F>
where
    F: FnMut(&[Value]) -> Result<EmitState>,
{
    fn push_row(&mut self, row: &[Value]) -> Result<EmitState> {
        (self.0)(row)
    }
}

/// Writes rows into one multi-column segment file, buffering a block's
/// worth of values per column.
#[derive(Debug)]
pub struct SegmentSink {
    writer: Option<SegmentWriter>,
    path: PathBuf,
    dtypes: Vec<DataType>,
    buffers: Vec<Vec<Value>>,
    rows_per_block: usize,
    rows_written: u64,
    finished: bool,
}

impl SegmentSink {
    pub fn create(
        path: impl AsRef<Path>,
        dtypes: Vec<DataType>,
        rows_per_block: usize,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let writer = SegmentWriter::create(&path, dtypes.len())?;
        Ok(SegmentSink {
            writer: Some(writer),
            path,
            buffers: (0..dtypes.len()).map(|_| Vec::new()).collect(),
            dtypes,
            rows_per_block,
            rows_written: 0,
            finished: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    fn flush_blocks(&mut self) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| FrameError::new("segment sink already finished"))?;
        for (i, buffer) in self.buffers.iter_mut().enumerate() {
            writer.write_block(i, buffer)?;
            buffer.clear();
        }
        Ok(())
    }

    /// Build the column references for the written segment. Only valid
    /// after `finish`.
    pub fn into_segments(self) -> Vec<SegmentRef> {
        assert!(self.finished, "segment sink not finished");
        let path = self.path.display().to_string();
        (0..self.dtypes.len())
            .map(|column| SegmentRef {
                path: path.clone(),
                column,
                num_rows: self.rows_written,
            })
            .collect()
    }

    /// Build a frame over the written segment. Only valid after `finish`.
    pub fn into_frame(self, names: &[String]) -> Result<Frame> {
        assert_eq!(names.len(), self.dtypes.len());
        let dtypes = self.dtypes.clone();
        let segments = self.into_segments();
        let mut frame = Frame::empty();
        for ((name, dtype), seg) in names.iter().zip(dtypes).zip(segments) {
            frame = frame.add_column(name.clone(), Column::new(dtype, vec![seg]))?;
        }
        Ok(frame)
    }

    /// Drop the sink and delete the partially written file. Used when a
    /// materialization fails; partial output must never become visible.
    pub fn discard(mut self) {
        self.writer = None;
        debug!(path = %self.path.display(), "discarding partial segment");
        let _ = std::fs::remove_file(&self.path);
    }
}

impl RowSink for SegmentSink {
    fn push_row(&mut self, row: &[Value]) -> Result<EmitState> {
        assert_eq!(row.len(), self.buffers.len(), "row width mismatch");
        if self.buffers.is_empty() {
            return Ok(EmitState::NeedsMore);
        }
        for (buffer, value) in self.buffers.iter_mut().zip(row) {
            buffer.push(value.clone());
        }
        self.rows_written += 1;
        if self.buffers[0].len() >= self.rows_per_block {
            self.flush_blocks()?;
        }
        Ok(EmitState::NeedsMore)
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        if self.buffers.iter().any(|b| !b.is_empty()) || self.rows_written == 0 {
            self.flush_blocks()?;
        }
        let writer = self
            .writer
            .take()
            .ok_or_else(|| FrameError::new("segment sink already finished"))?;
        writer.close()?;
        self.finished = true;
        Ok(())
    }
}
