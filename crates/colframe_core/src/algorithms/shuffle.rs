//! Hash shuffle: scatter a frame's rows into `n` output frames.
//!
//! Routing hashes the entire row, so identical rows always land in the
//! same output. Every output frame keeps the input schema even when it
//! receives no rows.

use colframe_error::{FrameError, Result};
use tracing::debug;

use crate::execution::context::QueryContext;
use crate::execution::EmitState;
use crate::frame::Frame;
use crate::plan::PlanNode;
use crate::sink::{FnSink, RowSink, SegmentSink};
use crate::util::unique_segment_path;
use crate::values::hash_values;

/// Shuffle by the engine's standard full-row hash.
pub fn shuffle(ctx: &QueryContext, frame: &Frame, n: usize) -> Result<Vec<Frame>> {
    shuffle_with(ctx, frame, n, hash_values)
}

/// Shuffle with a caller-provided row hash, e.g. to scatter on a key
/// projection instead of the whole row.
pub fn shuffle_with<F>(ctx: &QueryContext, frame: &Frame, n: usize, hash: F) -> Result<Vec<Frame>>
where
    F: Fn(&[crate::values::Value]) -> u64,
{
    if n == 0 {
        return Err(FrameError::new("shuffle requires at least one output"));
    }

    let dtypes = frame.dtypes();
    let names: Vec<String> = frame
        .column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();

    let mut sinks = Vec::with_capacity(n);
    for _ in 0..n {
        let path = unique_segment_path(&ctx.config().spill_dir, "shuffle");
        sinks.push(SegmentSink::create(
            &path,
            dtypes.clone(),
            ctx.config().rows_per_block(),
        )?);
    }

    let mut route = FnSink(|row: &[crate::values::Value]| {
        let target = (hash(row) % n as u64) as usize;
        sinks[target].push_row(row)?;
        Ok(EmitState::NeedsMore)
    });
    ctx.run(&PlanNode::scan(frame.clone()), &mut route)?;

    debug!(outputs = n, rows = frame.num_rows(), "shuffle complete");

    let mut frames = Vec::with_capacity(n);
    for mut sink in sinks {
        sink.finish()?;
        frames.push(sink.into_frame(&names)?);
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionConfig;
    use crate::values::Value;

    fn test_context(dir: &std::path::Path) -> QueryContext {
        let mut config = ExecutionConfig::with_spill_dir(dir);
        config.batch_size = 8;
        QueryContext::new(config)
    }

    #[test]
    fn preserves_rows_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());

        let frame = ctx
            .materialize(&PlanNode::range(0, 100), &["n".to_string()])
            .unwrap();
        let outputs = shuffle(&ctx, &frame, 4).unwrap();
        assert_eq!(outputs.len(), 4);

        let total: u64 = outputs.iter().map(Frame::num_rows).sum();
        assert_eq!(total, 100);
        for out in &outputs {
            assert_eq!(out.column_names(), vec!["n"]);
            assert_eq!(out.dtypes(), frame.dtypes());
        }
    }

    #[test]
    fn identical_rows_land_together() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());

        // 50 copies of each of two distinct rows.
        let plan = crate::plan::PlanNode::transform(
            PlanNode::range(0, 100),
            vec![crate::values::DataType::Int64],
            std::sync::Arc::new(|row| {
                if let Value::Int64(v) = row[0] {
                    row[0] = Value::Int64(v % 2);
                }
            }),
        );
        let frame = ctx.materialize(&plan, &["n".to_string()]).unwrap();

        let outputs = shuffle(&ctx, &frame, 8).unwrap();
        for out in outputs {
            let rows = out.collect_rows(ctx.manager()).unwrap();
            // Any non-empty output holds only one distinct row value.
            if let Some(first) = rows.first() {
                assert!(rows.iter().all(|r| r == first));
            }
        }
    }

    #[test]
    fn empty_input_still_yields_schemas() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());

        let frame = ctx
            .materialize(&PlanNode::range(0, 0), &["n".to_string()])
            .unwrap();
        let outputs = shuffle(&ctx, &frame, 3).unwrap();
        for out in outputs {
            assert_eq!(out.num_rows(), 0);
            assert_eq!(out.column_names(), vec!["n"]);
        }
    }

    #[test]
    fn custom_hash_routes_on_projection() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let frame = ctx
            .materialize(&PlanNode::range(0, 64), &["n".to_string()])
            .unwrap();

        // Route on key parity: evens to one output, odds to the other.
        let outputs = super::shuffle_with(&ctx, &frame, 2, |row| match row[0] {
            Value::Int64(v) => v as u64,
            _ => 0,
        })
        .unwrap();
        for out in outputs {
            let rows = out.collect_rows(ctx.manager()).unwrap();
            assert_eq!(rows.len(), 32);
            let parity = match rows[0][0] {
                Value::Int64(v) => v % 2,
                _ => panic!("unexpected value"),
            };
            assert!(rows
                .iter()
                .all(|r| matches!(r[0], Value::Int64(v) if v % 2 == parity)));
        }
    }

    #[test]
    fn zero_outputs_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let frame = ctx
            .materialize(&PlanNode::range(0, 1), &["n".to_string()])
            .unwrap();
        assert!(shuffle(&ctx, &frame, 0).is_err());
    }
}
