//! Physical operator implementations.

use std::collections::VecDeque;
use std::sync::Arc;

use colframe_error::{FrameError, Result};

use super::{NodeContext, Operator, RowBatch};
use crate::frame::Frame;
use crate::plan::{BinaryFn, PredicateFn, UnaryFn};
use crate::storage::block_manager::{BlockManager, ColumnCursor};
use crate::values::Value;

/// Leaf operator streaming a materialized frame's segments.
///
/// Each column has its own cross-segment cursor; decoded values are staged
/// in per-column queues so block boundaries never have to line up across
/// columns. The pull model gives no pipeline concurrency, so the scan
/// keeps one extra block of read-ahead per column.
#[derive(Debug)]
pub struct ScanOperator {
    cursors: Vec<ColumnCursor>,
    staged: Vec<VecDeque<Value>>,
    batch_size: usize,
}

impl ScanOperator {
    pub fn new(manager: Arc<BlockManager>, frame: &Frame, batch_size: usize) -> Self {
        let cursors: Vec<_> = frame
            .columns()
            .map(|(_, col)| ColumnCursor::new(manager.clone(), col.cursor_parts()))
            .collect();
        let staged = (0..cursors.len()).map(|_| VecDeque::new()).collect();
        ScanOperator {
            cursors,
            staged,
            batch_size,
        }
    }

    /// Fill staging queues until every column has at least `want` values
    /// or is exhausted. Returns the number of complete rows available.
    fn stage(&mut self, want: usize) -> Result<usize> {
        let mut available = usize::MAX;
        for (cursor, staged) in self.cursors.iter_mut().zip(&mut self.staged) {
            while staged.len() < want {
                match cursor.next_block()? {
                    Some(block) => staged.extend(block),
                    None => break,
                }
            }
            available = available.min(staged.len());
        }
        if self.cursors.is_empty() {
            return Ok(0);
        }
        Ok(available)
    }
}

impl Operator for ScanOperator {
    fn name(&self) -> &'static str {
        "scan"
    }

    fn output_width(&self) -> usize {
        self.cursors.len()
    }

    fn next(&mut self, ctx: &mut NodeContext) -> Result<Option<RowBatch>> {
        let n = self.stage(self.batch_size)?.min(self.batch_size);
        if n == 0 {
            return Ok(None);
        }

        let mut batch = ctx.output_buffer();
        for (i, staged) in self.staged.iter_mut().enumerate() {
            batch.column_mut(i).extend(staged.drain(..n));
        }

        // Read-ahead: keep the next block in flight for each column.
        self.stage(1)?;

        Ok(Some(batch))
    }

    fn skip(&mut self, _ctx: &mut NodeContext) -> Result<bool> {
        // Per column: drop staged rows first, skip whole blocks without
        // decoding, and decode only a partially skipped block.
        if self.cursors.is_empty() {
            return Ok(false);
        }

        let batch_size = self.batch_size;
        let mut advanced = false;
        for (cursor, staged) in self.cursors.iter_mut().zip(&mut self.staged) {
            let mut remaining = batch_size;

            let drop_now = remaining.min(staged.len());
            staged.drain(..drop_now);
            remaining -= drop_now;

            while remaining > 0 {
                match cursor.peek_block_elems()? {
                    Some(count) if (count as usize) <= remaining => {
                        cursor.skip_block()?;
                        remaining -= count as usize;
                    }
                    Some(_) => {
                        let block = cursor
                            .next_block()?
                            .expect("peeked block must be readable");
                        staged.extend(block.into_iter().skip(remaining));
                        remaining = 0;
                    }
                    None => break,
                }
            }
            advanced |= remaining < batch_size;
        }
        Ok(advanced)
    }
}

/// Leaf operator generating an integer sequence. Used by tests and as the
/// cheapest possible source for pipeline plumbing.
#[derive(Debug)]
pub struct RangeOperator {
    next: i64,
    stop: i64,
    batch_size: usize,
}

impl RangeOperator {
    pub fn new(start: i64, stop: i64, batch_size: usize) -> Self {
        RangeOperator {
            next: start,
            stop,
            batch_size,
        }
    }
}

impl Operator for RangeOperator {
    fn name(&self) -> &'static str {
        "range"
    }

    fn output_width(&self) -> usize {
        1
    }

    fn next(&mut self, ctx: &mut NodeContext) -> Result<Option<RowBatch>> {
        if self.next >= self.stop {
            return Ok(None);
        }
        let mut batch = ctx.output_buffer();
        let end = self.stop.min(self.next + self.batch_size as i64);
        batch.column_mut(0).extend((self.next..end).map(Value::Int64));
        self.next = end;
        Ok(Some(batch))
    }
}

/// Unary transform computed in place over its single input.
///
/// Ownership of the input buffer transfers to this operator and the same
/// buffer is returned as output when the widths line up, avoiding a copy.
#[derive(Debug)]
pub struct TransformOperator {
    func: DebugUnaryFn,
    output_width: usize,
}

/// Newtype so closures don't poison the operator's Debug impl.
pub struct DebugUnaryFn(pub UnaryFn);

impl std::fmt::Debug for DebugUnaryFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<fn>")
    }
}

impl TransformOperator {
    pub fn new(func: UnaryFn, output_width: usize) -> Self {
        TransformOperator {
            func: DebugUnaryFn(func),
            output_width,
        }
    }
}

impl Operator for TransformOperator {
    fn name(&self) -> &'static str {
        "transform"
    }

    fn output_width(&self) -> usize {
        self.output_width
    }

    fn next(&mut self, ctx: &mut NodeContext) -> Result<Option<RowBatch>> {
        let input = match ctx.get_next(0)? {
            Some(batch) => batch,
            None => return Ok(None),
        };

        let rows: Vec<Vec<Value>> = input.rows().collect();
        let mut out = if input.num_columns() == self.output_width {
            let mut out = input;
            out.clear();
            out
        } else {
            ctx.recycle(0, input);
            ctx.output_buffer()
        };

        for mut row in rows {
            (self.func.0)(&mut row);
            debug_assert_eq!(row.len(), self.output_width);
            out.push_row(&row);
        }
        Ok(Some(out))
    }
}

/// Binary in-place transform: rewrites rows of its first input using the
/// position-aligned rows of its second (auxiliary) input.
#[derive(Debug)]
pub struct BinaryTransformOperator {
    func: DebugBinaryFn,
    output_width: usize,
    aux: VecDeque<Vec<Value>>,
    aux_exhausted: bool,
}

pub struct DebugBinaryFn(pub BinaryFn);

impl std::fmt::Debug for DebugBinaryFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<fn>")
    }
}

impl BinaryTransformOperator {
    pub fn new(func: BinaryFn, output_width: usize) -> Self {
        BinaryTransformOperator {
            func: DebugBinaryFn(func),
            output_width,
            aux: VecDeque::new(),
            aux_exhausted: false,
        }
    }

    fn fill_aux(&mut self, ctx: &mut NodeContext, want: usize) -> Result<()> {
        while self.aux.len() < want && !self.aux_exhausted {
            match ctx.get_next(1)? {
                Some(batch) => {
                    self.aux.extend(batch.rows());
                    ctx.recycle(1, batch);
                }
                None => self.aux_exhausted = true,
            }
        }
        Ok(())
    }
}

impl Operator for BinaryTransformOperator {
    fn name(&self) -> &'static str {
        "binary_transform"
    }

    fn output_width(&self) -> usize {
        self.output_width
    }

    fn next(&mut self, ctx: &mut NodeContext) -> Result<Option<RowBatch>> {
        let input = match ctx.get_next(0)? {
            Some(batch) => batch,
            None => return Ok(None),
        };

        let n = input.num_rows();
        self.fill_aux(ctx, n)?;
        if self.aux.len() < n {
            return Err(FrameError::new(
                "binary transform inputs have mismatched lengths",
            ));
        }

        let rows: Vec<Vec<Value>> = input.rows().collect();
        let mut out = if input.num_columns() == self.output_width {
            let mut out = input;
            out.clear();
            out
        } else {
            ctx.recycle(0, input);
            ctx.output_buffer()
        };

        for mut row in rows {
            let aux = self.aux.pop_front().unwrap();
            (self.func.0)(&mut row, &aux);
            out.push_row(&row);
        }
        Ok(Some(out))
    }
}

/// Unary filter. Pulls until a non-empty output batch can be produced;
/// reuses the input buffer since the width never changes.
#[derive(Debug)]
pub struct FilterOperator {
    predicate: DebugPredicateFn,
    width: usize,
}

pub struct DebugPredicateFn(pub PredicateFn);

impl std::fmt::Debug for DebugPredicateFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<fn>")
    }
}

impl FilterOperator {
    pub fn new(predicate: PredicateFn, width: usize) -> Self {
        FilterOperator {
            predicate: DebugPredicateFn(predicate),
            width,
        }
    }
}

impl Operator for FilterOperator {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn output_width(&self) -> usize {
        self.width
    }

    fn next(&mut self, ctx: &mut NodeContext) -> Result<Option<RowBatch>> {
        loop {
            let mut batch = match ctx.get_next(0)? {
                Some(batch) => batch,
                None => return Ok(None),
            };

            let keep: Vec<bool> = batch.rows().map(|row| (self.predicate.0)(&row)).collect();
            if keep.iter().all(|k| !k) {
                ctx.recycle(0, batch);
                continue;
            }
            batch.retain_rows(&keep);
            return Ok(Some(batch));
        }
    }
}

/// Emit at most `limit` rows and then stop pulling upstream (the driver
/// sees exhaustion and cancels the pull chain promptly).
#[derive(Debug)]
pub struct HeadOperator {
    remaining: u64,
    width: usize,
}

impl HeadOperator {
    pub fn new(limit: u64, width: usize) -> Self {
        HeadOperator {
            remaining: limit,
            width,
        }
    }
}

impl Operator for HeadOperator {
    fn name(&self) -> &'static str {
        "head"
    }

    fn output_width(&self) -> usize {
        self.width
    }

    fn next(&mut self, ctx: &mut NodeContext) -> Result<Option<RowBatch>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let mut batch = match ctx.get_next(0)? {
            Some(batch) => batch,
            None => return Ok(None),
        };
        if (batch.num_rows() as u64) > self.remaining {
            batch.truncate(self.remaining as usize);
        }
        self.remaining -= batch.num_rows() as u64;
        Ok(Some(batch))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::ExecutionConfig;
    use crate::execution::context::QueryContext;
    use crate::execution::ExecutionNode;
    use crate::frame::Column;
    use crate::plan::PlanNode;
    use crate::sink::{RowSink, SegmentSink};
    use crate::values::DataType;

    fn int_segment(dir: &std::path::Path, name: &str, range: std::ops::Range<i64>) -> Frame {
        // 8 rows per block, so batch-sized skips cross block boundaries.
        let mut sink =
            SegmentSink::create(&dir.join(name), vec![DataType::Int64], 8).unwrap();
        for i in range {
            sink.push_row(&[Value::Int64(i)]).unwrap();
        }
        sink.finish().unwrap();
        sink.into_frame(&["n".to_string()]).unwrap()
    }

    fn pull_ints(node: &mut ExecutionNode) -> Vec<i64> {
        let batch = node.get_next().unwrap().expect("expected a batch");
        let got = batch
            .rows()
            .map(|row| match row[0] {
                Value::Int64(v) => v,
                _ => panic!("unexpected value"),
            })
            .collect();
        node.recycle(batch);
        got
    }

    #[test]
    fn scan_skip_interleaves_with_pulls() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ExecutionConfig::with_spill_dir(dir.path());
        config.batch_size = 10;
        let ctx = QueryContext::new(config);

        // Two segments split off a block boundary: skips have to drain
        // staged values, skip whole blocks, decode partial blocks and
        // cross the segment seam.
        let a = int_segment(dir.path(), "a.cfseg", 0..27);
        let b = int_segment(dir.path(), "b.cfseg", 27..60);
        let mut segments = a.column_at(0).segments().to_vec();
        segments.extend(b.column_at(0).segments().to_vec());
        let frame = Frame::new(vec![(
            "n".to_string(),
            Column::new(DataType::Int64, segments),
        )])
        .unwrap();
        assert_eq!(frame.num_rows(), 60);

        let mut node = ctx.compile(&PlanNode::scan(frame)).unwrap();
        assert!(node.skip_next().unwrap()); // rows 0..10
        assert_eq!(pull_ints(&mut node), (10..20).collect::<Vec<_>>());
        assert!(node.skip_next().unwrap()); // rows 20..30, across the seam
        assert_eq!(pull_ints(&mut node), (30..40).collect::<Vec<_>>());
        assert!(node.skip_next().unwrap()); // rows 40..50
        assert_eq!(pull_ints(&mut node), (50..60).collect::<Vec<_>>());
        assert!(node.get_next().unwrap().is_none());
        assert!(!node.skip_next().unwrap());
    }

    #[test]
    fn default_skip_drops_whole_batches() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ExecutionConfig::with_spill_dir(dir.path());
        config.batch_size = 10;
        let ctx = QueryContext::new(config);

        // Transforms have no skip of their own; the default materializes
        // and discards one output batch.
        let plan = PlanNode::transform(
            PlanNode::range(0, 25),
            vec![DataType::Int64],
            Arc::new(|row| {
                if let Value::Int64(v) = row[0] {
                    row[0] = Value::Int64(v * 2);
                }
            }),
        );
        let mut node = ctx.compile(&plan).unwrap();
        assert!(node.skip_next().unwrap()); // rows 0..10
        assert_eq!(
            pull_ints(&mut node),
            (10..20).map(|v| v * 2).collect::<Vec<_>>()
        );
        assert!(node.skip_next().unwrap()); // final short batch 20..25
        assert!(!node.skip_next().unwrap());
        assert!(node.get_next().unwrap().is_none());
    }
}
