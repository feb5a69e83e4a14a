//! Grace hash join over block-stored frames.
//!
//! Both inputs are hash-partitioned on the key columns into matching
//! buckets, then each bucket pair is joined independently: the build side
//! is loaded into a hash table and the probe side streams past it. A
//! bucket whose build side outgrew its write cache is re-partitioned with
//! a fresh hash seed, up to a recursion limit; past the limit it is
//! joined in memory regardless.
//!
//! Null keys compare equal to each other, matching group-by semantics.

use colframe_error::{FrameError, Result};
use hashbrown::HashMap;
use tracing::debug;

use super::project;
use crate::cache::{CacheData, WriteCache};
use crate::execution::context::QueryContext;
use crate::execution::EmitState;
use crate::frame::Frame;
use crate::plan::PlanNode;
use crate::sink::{FnSink, RowSink, SegmentSink};
use crate::util::unique_segment_path;
use crate::values::{hash_values_seeded, CompositeKey, DataType, Value};

/// Recursion limit for re-partitioning oversized buckets.
const MAX_DEPTH: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinType {
    pub fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "inner" => JoinType::Inner,
            "left" => JoinType::Left,
            "right" => JoinType::Right,
            "full" | "outer" => JoinType::Full,
            other => {
                return Err(FrameError::new(format!(
                    "unknown join type '{other}' (expected inner, left, right or full)"
                )))
            }
        })
    }

    fn keeps_unmatched_left(self) -> bool {
        matches!(self, JoinType::Left | JoinType::Full)
    }

    fn keeps_unmatched_right(self) -> bool {
        matches!(self, JoinType::Right | JoinType::Full)
    }
}

/// Join two frames on the given `(left column, right column)` key pairs.
///
/// The output carries every left column followed by the right frame's
/// non-key columns; a right column whose name clashes gets a numeric
/// suffix. Unmatched rows from a kept side are null-filled, except that
/// an unmatched right row contributes its key values to the key columns.
/// Output row order is unspecified.
pub fn join(
    ctx: &QueryContext,
    left: &Frame,
    right: &Frame,
    how: JoinType,
    on: &[(&str, &str)],
) -> Result<Frame> {
    if on.is_empty() {
        return Err(FrameError::new("join requires at least one key column pair"));
    }

    let mut left_keys = Vec::with_capacity(on.len());
    let mut right_keys = Vec::with_capacity(on.len());
    for (lname, rname) in on {
        let li = left.column_index(lname).ok_or_else(|| {
            FrameError::new(format!("left frame has no column named '{lname}'"))
        })?;
        let ri = right.column_index(rname).ok_or_else(|| {
            FrameError::new(format!("right frame has no column named '{rname}'"))
        })?;

        let ldt = left.column_at(li).dtype();
        let rdt = right.column_at(ri).dtype();
        // An empty side or an all-null key column can't conflict.
        let comparable =
            left.num_rows() > 0 && right.num_rows() > 0 && ldt != DataType::Undefined
                && rdt != DataType::Undefined;
        if comparable && ldt != rdt {
            return Err(FrameError::new(format!(
                "join key type mismatch: '{lname}' is {ldt}, '{rname}' is {rdt}"
            )));
        }
        left_keys.push(li);
        right_keys.push(ri);
    }

    let right_nonkey: Vec<usize> = (0..right.num_columns())
        .filter(|i| !right_keys.contains(i))
        .collect();

    let out_names = output_names(left, right, &right_nonkey);
    let out_dtypes: Vec<DataType> = left
        .dtypes()
        .into_iter()
        .chain(right_nonkey.iter().map(|&i| right.column_at(i).dtype()))
        .collect();

    let config = ctx.config();
    let num_buckets = config.target_partitions.clamp(1, 32);

    let left_buckets = scatter_frame(ctx, left, &left_keys, 0, num_buckets, "join-left")?;
    let right_buckets = scatter_frame(ctx, right, &right_keys, 0, num_buckets, "join-right")?;

    let path = unique_segment_path(&config.spill_dir, "join");
    let mut out = SegmentSink::create(&path, out_dtypes, config.rows_per_block())?;

    let params = JoinParams {
        how,
        left_keys: &left_keys,
        right_keys: &right_keys,
        right_nonkey: &right_nonkey,
        left_width: left.num_columns(),
        left_dtypes: left.dtypes(),
        right_dtypes: right.dtypes(),
        num_buckets,
    };
    for (lb, rb) in left_buckets.into_iter().zip(right_buckets) {
        join_bucket(ctx, &params, lb, rb, 1, &mut out)?;
    }

    out.finish()?;
    out.into_frame(&out_names)
}

struct JoinParams<'a> {
    how: JoinType,
    left_keys: &'a [usize],
    right_keys: &'a [usize],
    right_nonkey: &'a [usize],
    left_width: usize,
    left_dtypes: Vec<DataType>,
    right_dtypes: Vec<DataType>,
    num_buckets: usize,
}

/// Hash-scatter a frame's rows into per-bucket write caches.
fn scatter_frame(
    ctx: &QueryContext,
    frame: &Frame,
    key_idx: &[usize],
    seed: u64,
    n: usize,
    tag: &str,
) -> Result<Vec<CacheData>> {
    let caches = new_bucket_caches(ctx, &frame.dtypes(), n, tag);
    let mut route = FnSink(|row: &[Value]| {
        let b = (hash_values_seeded(&project(row, key_idx), seed) % n as u64) as usize;
        caches[b].push_row(row)?;
        Ok(EmitState::NeedsMore)
    });
    ctx.run(&PlanNode::scan(frame.clone()), &mut route)?;
    caches.into_iter().map(WriteCache::finish).collect()
}

/// Re-scatter one finished bucket with a different hash seed.
fn scatter_data(
    ctx: &QueryContext,
    data: &CacheData,
    dtypes: &[DataType],
    key_idx: &[usize],
    seed: u64,
    n: usize,
    tag: &str,
) -> Result<Vec<CacheData>> {
    let caches = new_bucket_caches(ctx, dtypes, n, tag);
    data.for_each_row(ctx, |row| {
        let b = (hash_values_seeded(&project(row, key_idx), seed) % n as u64) as usize;
        caches[b].push_row(row)
    })?;
    caches.into_iter().map(WriteCache::finish).collect()
}

fn new_bucket_caches(
    ctx: &QueryContext,
    dtypes: &[DataType],
    n: usize,
    tag: &str,
) -> Vec<WriteCache> {
    (0..n)
        .map(|_| {
            WriteCache::new(
                dtypes.to_vec(),
                ctx.config().cache_capacity_bytes,
                unique_segment_path(&ctx.config().spill_dir, tag),
                ctx.config().rows_per_block(),
            )
        })
        .collect()
}

fn join_bucket(
    ctx: &QueryContext,
    params: &JoinParams<'_>,
    left_data: CacheData,
    right_data: CacheData,
    depth: u64,
    out: &mut SegmentSink,
) -> Result<()> {
    // A right join builds on the left so every right row streams through
    // as the probe. An inner join builds whichever side is smaller; the
    // outer types build on the right so unmatched-left emission happens
    // inline during the probe.
    let build_is_left = match params.how {
        JoinType::Right => true,
        JoinType::Inner => left_data.num_rows() < right_data.num_rows(),
        JoinType::Left | JoinType::Full => false,
    };
    let build_data = if build_is_left { &left_data } else { &right_data };

    // A spilled build side didn't fit its cache, so it won't comfortably
    // fit a hash table either. Split the bucket again with a new seed.
    if matches!(build_data, CacheData::Spilled(_)) && depth < MAX_DEPTH {
        debug!(depth, "join bucket build side spilled, re-partitioning");
        let sub_left = scatter_data(
            ctx,
            &left_data,
            &params.left_dtypes,
            params.left_keys,
            depth,
            params.num_buckets,
            "join-left",
        )?;
        let sub_right = scatter_data(
            ctx,
            &right_data,
            &params.right_dtypes,
            params.right_keys,
            depth,
            params.num_buckets,
            "join-right",
        )?;
        for (lb, rb) in sub_left.into_iter().zip(sub_right) {
            join_bucket(ctx, params, lb, rb, depth + 1, out)?;
        }
        return Ok(());
    }

    let build_keys = if build_is_left {
        params.left_keys
    } else {
        params.right_keys
    };
    let build_rows = build_data.collect_rows(ctx)?;

    let mut table: HashMap<CompositeKey, Vec<usize>> = HashMap::new();
    for (i, row) in build_rows.iter().enumerate() {
        table
            .entry(CompositeKey(project(row, build_keys)))
            .or_default()
            .push(i);
    }
    let mut matched = vec![false; build_rows.len()];

    if build_is_left {
        // Probe with right rows.
        right_data.for_each_row(ctx, |right_row| {
            let key = CompositeKey(project(right_row, params.right_keys));
            match table.get(&key) {
                Some(indices) => {
                    for &i in indices {
                        emit_match(out, &build_rows[i], right_row, params.right_nonkey)?;
                    }
                }
                None if params.how.keeps_unmatched_right() => {
                    emit_right_only(out, params, right_row)?;
                }
                None => {}
            }
            Ok(())
        })?;
    } else {
        left_data.for_each_row(ctx, |left_row| {
            let key = CompositeKey(project(left_row, params.left_keys));
            match table.get(&key) {
                Some(indices) => {
                    for &i in indices {
                        matched[i] = true;
                        emit_match(out, left_row, &build_rows[i], params.right_nonkey)?;
                    }
                }
                None if params.how.keeps_unmatched_left() => {
                    emit_left_only(out, left_row, params.right_nonkey.len())?;
                }
                None => {}
            }
            Ok(())
        })?;

        // Unmatched build (right) rows survive a full join.
        if params.how.keeps_unmatched_right() {
            for (i, right_row) in build_rows.iter().enumerate() {
                if !matched[i] {
                    emit_right_only(out, params, right_row)?;
                }
            }
        }
    }
    Ok(())
}

fn emit_match(
    out: &mut SegmentSink,
    left_row: &[Value],
    right_row: &[Value],
    right_nonkey: &[usize],
) -> Result<()> {
    let mut row = left_row.to_vec();
    row.extend(right_nonkey.iter().map(|&i| right_row[i].clone()));
    out.push_row(&row)?;
    Ok(())
}

fn emit_left_only(out: &mut SegmentSink, left_row: &[Value], nonkey_count: usize) -> Result<()> {
    let mut row = left_row.to_vec();
    row.extend(std::iter::repeat(Value::Null).take(nonkey_count));
    out.push_row(&row)?;
    Ok(())
}

/// An unmatched right row: nulls on the left except the key columns,
/// which take the right row's key values.
fn emit_right_only(
    out: &mut SegmentSink,
    params: &JoinParams<'_>,
    right_row: &[Value],
) -> Result<()> {
    let mut row = vec![Value::Null; params.left_width];
    for (&li, &ri) in params.left_keys.iter().zip(params.right_keys) {
        row[li] = right_row[ri].clone();
    }
    row.extend(params.right_nonkey.iter().map(|&i| right_row[i].clone()));
    out.push_row(&row)?;
    Ok(())
}

/// Left names, then right non-key names with numeric suffixes on clashes.
fn output_names(left: &Frame, right: &Frame, right_nonkey: &[usize]) -> Vec<String> {
    let mut names: Vec<String> = left.column_names().iter().map(|s| s.to_string()).collect();
    let right_names = right.column_names();
    for &i in right_nonkey {
        let base = right_names[i].to_string();
        let mut candidate = base.clone();
        let mut suffix = 0;
        while names.iter().any(|n| *n == candidate) {
            suffix += 1;
            candidate = format!("{base}.{suffix}");
        }
        names.push(candidate);
    }
    names
}
