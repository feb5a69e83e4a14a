//! External sort: range-partition by sampled key quantiles, then sort each
//! partition independently.
//!
//! The input is streamed twice. The first pass sizes the data and feeds a
//! reservoir sketch of the keys; if everything fits the memory budget the
//! rows collected during that pass are sorted directly. Otherwise the
//! sketch picks partition boundaries, a second pass routes rows into
//! per-partition write caches, and the partitions are sorted in parallel
//! and concatenated in boundary order.

use colframe_error::{FrameError, Result};
use rayon::prelude::*;
use tracing::debug;

use super::{compare_keys_directed, key_indices, project};
use crate::cache::WriteCache;
use crate::execution::context::QueryContext;
use crate::execution::EmitState;
use crate::frame::{Column, Frame, SegmentRef};
use crate::plan::PlanNode;
use crate::sink::{FnSink, RowSink, SegmentSink};
use crate::statistics::ReservoirQuantile;
use crate::util::unique_segment_path;
use crate::values::Value;

pub fn sort(ctx: &QueryContext, frame: &Frame, keys: &[&str], ascending: &[bool]) -> Result<Frame> {
    if keys.is_empty() {
        return Err(FrameError::new("sort requires at least one key column"));
    }
    if keys.len() != ascending.len() {
        return Err(FrameError::new(format!(
            "sort got {} keys but {} order flags",
            keys.len(),
            ascending.len()
        )));
    }
    let key_idx = key_indices(frame, keys)?;

    let config = ctx.config();
    let dtypes = frame.dtypes();
    let names: Vec<String> = frame
        .column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();

    // Pass 1: sample keys and size the data. Rows are collected
    // opportunistically; once the budget is blown they are dropped and
    // only the sketch keeps running.
    let mut sketch = ReservoirQuantile::new(config.reservoir_capacity);
    let mut total_bytes = 0usize;
    let mut collected: Option<Vec<Vec<Value>>> = Some(Vec::new());
    let mut sampler = FnSink(|row: &[Value]| {
        sketch.push(&project(row, &key_idx));
        total_bytes += row.iter().map(Value::approx_size).sum::<usize>();
        if total_bytes <= config.max_buffer_size {
            if let Some(rows) = collected.as_mut() {
                rows.push(row.to_vec());
            }
        } else {
            collected = None;
        }
        Ok(EmitState::NeedsMore)
    });
    ctx.run(&PlanNode::scan(frame.clone()), &mut sampler)?;

    if let Some(mut rows) = collected {
        debug!(rows = rows.len(), bytes = total_bytes, "sorting in memory");
        rows.sort_by(|a, b| {
            compare_keys_directed(&project(a, &key_idx), &project(b, &key_idx), ascending)
        });
        return write_rows(ctx, &rows, frame);
    }

    // Pass 2: route rows to range partitions by sampled boundaries.
    let parts = (2 * total_bytes).div_ceil(config.max_buffer_size).max(2);
    let boundaries =
        sketch.boundaries(parts, |a, b| compare_keys_directed(a, b, ascending));
    debug!(
        bytes = total_bytes,
        partitions = boundaries.len() + 1,
        "external sort"
    );

    let caches: Vec<WriteCache> = (0..=boundaries.len())
        .map(|_| {
            WriteCache::new(
                dtypes.clone(),
                config.cache_capacity_bytes,
                unique_segment_path(&config.spill_dir, "sort"),
                config.rows_per_block(),
            )
        })
        .collect();

    let mut router = FnSink(|row: &[Value]| {
        let key = project(row, &key_idx);
        let target = boundaries
            .partition_point(|b| compare_keys_directed(b, &key, ascending).is_lt());
        caches[target].push_row(row)?;
        Ok(EmitState::NeedsMore)
    });
    ctx.run(&PlanNode::scan(frame.clone()), &mut router)?;

    let partitions = caches
        .into_iter()
        .map(WriteCache::finish)
        .collect::<Result<Vec<_>>>()?;

    // Sort partitions in parallel; each writes its own output segment.
    let mut sorted: Vec<(usize, Vec<SegmentRef>)> = partitions
        .into_par_iter()
        .enumerate()
        .map(|(i, data)| -> Result<(usize, Vec<SegmentRef>)> {
            let mut rows = data.collect_rows(ctx)?;

            // A partition whose keys are all equal (one heavy key straddling
            // a boundary) needs no sorting at all.
            let uniform = rows.first().map_or(true, |first| {
                let k0 = project(first, &key_idx);
                rows.iter()
                    .all(|r| compare_keys_directed(&project(r, &key_idx), &k0, ascending).is_eq())
            });
            if !uniform {
                rows.sort_by(|a, b| {
                    compare_keys_directed(
                        &project(a, &key_idx),
                        &project(b, &key_idx),
                        ascending,
                    )
                });
            }

            let path = unique_segment_path(&ctx.config().spill_dir, "sorted");
            let mut sink =
                SegmentSink::create(&path, frame.dtypes(), ctx.config().rows_per_block())?;
            for row in &rows {
                sink.push_row(row)?;
            }
            sink.finish()?;
            Ok((i, sink.into_segments()))
        })
        .collect::<Result<Vec<_>>>()?;
    sorted.sort_by_key(|(i, _)| *i);

    // Concatenate: partition p's segment for column c becomes the p-th
    // segment of output column c.
    let mut out = Frame::empty();
    for (c, (name, dtype)) in names.iter().zip(dtypes).enumerate() {
        let segments: Vec<SegmentRef> = sorted
            .iter()
            .map(|(_, segs)| segs[c].clone())
            .collect();
        out = out.add_column(name.clone(), Column::new(dtype, segments))?;
    }
    Ok(out)
}

fn write_rows(ctx: &QueryContext, rows: &[Vec<Value>], schema: &Frame) -> Result<Frame> {
    let path = unique_segment_path(&ctx.config().spill_dir, "sorted");
    let mut sink = SegmentSink::create(&path, schema.dtypes(), ctx.config().rows_per_block())?;
    for row in rows {
        sink.push_row(row)?;
    }
    sink.finish()?;
    let names: Vec<String> = schema
        .column_names()
        .iter()
        .map(|s| s.to_string())
        .collect();
    sink.into_frame(&names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionConfig;
    use crate::values::DataType;

    fn test_context(dir: &std::path::Path) -> QueryContext {
        let mut config = ExecutionConfig::with_spill_dir(dir);
        config.batch_size = 16;
        QueryContext::new(config)
    }

    fn frame_from_rows(
        ctx: &QueryContext,
        names: &[&str],
        dtypes: Vec<DataType>,
        rows: &[Vec<Value>],
    ) -> Frame {
        let path = unique_segment_path(&ctx.config().spill_dir, "fixture");
        let mut sink = SegmentSink::create(&path, dtypes, 8).unwrap();
        for row in rows {
            sink.push_row(row).unwrap();
        }
        sink.finish().unwrap();
        let names: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        sink.into_frame(&names).unwrap()
    }

    fn str_val(s: &str) -> Value {
        Value::Utf8(s.to_string())
    }

    #[test]
    fn sorts_two_column_frame_by_key() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let frame = frame_from_rows(
            &ctx,
            &["k", "v"],
            vec![DataType::Int64, DataType::Utf8],
            &[
                vec![Value::Int64(1), str_val("a")],
                vec![Value::Int64(3), str_val("b")],
                vec![Value::Int64(2), str_val("c")],
            ],
        );

        let sorted = sort(&ctx, &frame, &["k"], &[true]).unwrap();
        let rows = sorted.collect_rows(ctx.manager()).unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Value::Int64(1), str_val("a")],
                vec![Value::Int64(2), str_val("c")],
                vec![Value::Int64(3), str_val("b")],
            ]
        );
    }

    #[test]
    fn external_sort_is_a_sorted_permutation() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ExecutionConfig::with_spill_dir(dir.path());
        config.batch_size = 16;
        // Tiny budget forces the partitioned path.
        config.max_buffer_size = 2048;
        config.cache_capacity_bytes = 512;
        let ctx = QueryContext::new(config);

        // Pseudo-shuffled input: multiplication by a unit mod 1000.
        let rows: Vec<Vec<Value>> = (0..1000i64)
            .map(|i| vec![Value::Int64(i * 379 % 1000)])
            .collect();
        let frame = frame_from_rows(&ctx, &["k"], vec![DataType::Int64], &rows);

        let sorted = sort(&ctx, &frame, &["k"], &[true]).unwrap();
        let got = sorted.collect_rows(ctx.manager()).unwrap();
        let want: Vec<Vec<Value>> = (0..1000i64).map(|i| vec![Value::Int64(i)]).collect();
        assert_eq!(got, want);
    }

    #[test]
    fn descending_order_and_idempotence() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let rows: Vec<Vec<Value>> = (0..50i64)
            .map(|i| vec![Value::Int64(i * 17 % 50)])
            .collect();
        let frame = frame_from_rows(&ctx, &["k"], vec![DataType::Int64], &rows);

        let once = sort(&ctx, &frame, &["k"], &[false]).unwrap();
        let twice = sort(&ctx, &once, &["k"], &[false]).unwrap();
        let got_once = once.collect_rows(ctx.manager()).unwrap();
        let got_twice = twice.collect_rows(ctx.manager()).unwrap();

        let want: Vec<Vec<Value>> = (0..50i64).rev().map(|i| vec![Value::Int64(i)]).collect();
        assert_eq!(got_once, want);
        assert_eq!(got_twice, want);
    }

    #[test]
    fn nulls_sort_first() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let frame = frame_from_rows(
            &ctx,
            &["k"],
            vec![DataType::Int64],
            &[
                vec![Value::Int64(5)],
                vec![Value::Null],
                vec![Value::Int64(1)],
            ],
        );

        let sorted = sort(&ctx, &frame, &["k"], &[true]).unwrap();
        let rows = sorted.collect_rows(ctx.manager()).unwrap();
        assert_eq!(rows[0], vec![Value::Null]);
        assert_eq!(rows[1], vec![Value::Int64(1)]);
    }

    #[test]
    fn unknown_key_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let frame = frame_from_rows(&ctx, &["k"], vec![DataType::Int64], &[]);
        assert!(sort(&ctx, &frame, &["missing"], &[true]).is_err());
    }
}
