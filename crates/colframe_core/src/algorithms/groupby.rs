//! Hash group-by with bounded memory.
//!
//! Groups accumulate in an in-memory hash table. When the table outgrows
//! the budget its contents are flushed as partial-aggregate rows into
//! hash-partitioned write caches and the table starts over; a second pass
//! then merges each bucket's partials. Keys that never spill take the
//! fast path with no extra IO.

use std::fmt;

use colframe_error::{FrameError, Result};
use hashbrown::HashMap;
use tracing::debug;

use super::{key_indices, project};
use crate::cache::WriteCache;
use crate::execution::context::QueryContext;
use crate::execution::EmitState;
use crate::frame::Frame;
use crate::plan::PlanNode;
use crate::sink::{FnSink, RowSink, SegmentSink};
use crate::util::unique_segment_path;
use crate::values::{hash_values, CompositeKey, DataType, Value};

/// Built-in aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Count,
    Sum,
    Min,
    Max,
    Avg,
    Var,
    Stdv,
}

/// The capability surface of an aggregate function: type checking,
/// partial-aggregate layout and accumulator construction.
pub trait AggregateFn: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the function accepts the given input column type.
    fn supports(&self, input: DataType) -> bool;

    /// Result type for the given input type.
    fn output_type(&self, input: DataType) -> DataType;

    /// Column types of this function's partial-aggregate representation,
    /// as flushed to spill buckets.
    fn partial_types(&self, input: DataType) -> Vec<DataType>;

    fn new_accumulator(&self) -> Box<dyn Accumulator>;
}

/// Per-group running state of one aggregate.
pub trait Accumulator: fmt::Debug + Send {
    /// Fold in one input value.
    fn add(&mut self, value: &Value);

    /// Snapshot the running state as partial-aggregate values.
    fn partial(&self) -> Vec<Value>;

    /// Fold in a previously snapshotted partial.
    fn combine_partial(&mut self, partial: &[Value]);

    fn finalize(&self) -> Value;
}

impl AggregateFn for Aggregation {
    fn name(&self) -> &'static str {
        match self {
            Aggregation::Count => "Count",
            Aggregation::Sum => "Sum",
            Aggregation::Min => "Min",
            Aggregation::Max => "Max",
            Aggregation::Avg => "Avg",
            Aggregation::Var => "Var",
            Aggregation::Stdv => "Stdv",
        }
    }

    fn supports(&self, input: DataType) -> bool {
        match self {
            Aggregation::Count | Aggregation::Min | Aggregation::Max => true,
            // All-null columns are typed Undefined and aggregate to null.
            Aggregation::Sum | Aggregation::Avg | Aggregation::Var | Aggregation::Stdv => {
                input.is_numeric() || input == DataType::Undefined
            }
        }
    }

    fn output_type(&self, input: DataType) -> DataType {
        match self {
            Aggregation::Count => DataType::Int64,
            Aggregation::Sum | Aggregation::Min | Aggregation::Max => input,
            Aggregation::Avg | Aggregation::Var | Aggregation::Stdv => DataType::Float64,
        }
    }

    fn partial_types(&self, input: DataType) -> Vec<DataType> {
        match self {
            Aggregation::Count => vec![DataType::Int64],
            Aggregation::Sum | Aggregation::Min | Aggregation::Max => vec![input],
            Aggregation::Avg => vec![DataType::Float64, DataType::Int64],
            Aggregation::Var | Aggregation::Stdv => {
                vec![DataType::Int64, DataType::Float64, DataType::Float64]
            }
        }
    }

    fn new_accumulator(&self) -> Box<dyn Accumulator> {
        match self {
            Aggregation::Count => Box::new(CountAcc { n: 0 }),
            Aggregation::Sum => Box::new(SumAcc { sum: Value::Null }),
            Aggregation::Min => Box::new(ExtremeAcc {
                best: Value::Null,
                want_min: true,
            }),
            Aggregation::Max => Box::new(ExtremeAcc {
                best: Value::Null,
                want_min: false,
            }),
            Aggregation::Avg => Box::new(AvgAcc { sum: 0.0, n: 0 }),
            Aggregation::Var => Box::new(VarAcc::new(false)),
            Aggregation::Stdv => Box::new(VarAcc::new(true)),
        }
    }
}

/// Counts rows, nulls included.
#[derive(Debug)]
struct CountAcc {
    n: i64,
}

impl Accumulator for CountAcc {
    fn add(&mut self, _value: &Value) {
        self.n += 1;
    }

    fn partial(&self) -> Vec<Value> {
        vec![Value::Int64(self.n)]
    }

    fn combine_partial(&mut self, partial: &[Value]) {
        if let Value::Int64(n) = partial[0] {
            self.n += n;
        }
    }

    fn finalize(&self) -> Value {
        Value::Int64(self.n)
    }
}

/// Sums non-null values. Stays integral until a float shows up; a group
/// with only nulls sums to null.
#[derive(Debug)]
struct SumAcc {
    sum: Value,
}

impl SumAcc {
    fn fold(&mut self, value: &Value) {
        match (&self.sum, value) {
            (_, Value::Null) => {}
            (Value::Null, v) => self.sum = v.clone(),
            (Value::Int64(a), Value::Int64(b)) => self.sum = Value::Int64(a.wrapping_add(*b)),
            (a, b) => {
                // Mixed or float arithmetic proceeds in f64.
                let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) else {
                    return;
                };
                self.sum = Value::Float64(a + b);
            }
        }
    }
}

impl Accumulator for SumAcc {
    fn add(&mut self, value: &Value) {
        self.fold(value);
    }

    fn partial(&self) -> Vec<Value> {
        vec![self.sum.clone()]
    }

    fn combine_partial(&mut self, partial: &[Value]) {
        self.fold(&partial[0]);
    }

    fn finalize(&self) -> Value {
        self.sum.clone()
    }
}

/// Min or max over non-null values.
#[derive(Debug)]
struct ExtremeAcc {
    best: Value,
    want_min: bool,
}

impl Accumulator for ExtremeAcc {
    fn add(&mut self, value: &Value) {
        if value.is_null() {
            return;
        }
        if self.best.is_null() {
            self.best = value.clone();
            return;
        }
        let take = if self.want_min {
            value.total_cmp(&self.best).is_lt()
        } else {
            value.total_cmp(&self.best).is_gt()
        };
        if take {
            self.best = value.clone();
        }
    }

    fn partial(&self) -> Vec<Value> {
        vec![self.best.clone()]
    }

    fn combine_partial(&mut self, partial: &[Value]) {
        self.add(&partial[0]);
    }

    fn finalize(&self) -> Value {
        self.best.clone()
    }
}

/// Arithmetic mean over non-null values; null when the group has none.
#[derive(Debug)]
struct AvgAcc {
    sum: f64,
    n: i64,
}

impl Accumulator for AvgAcc {
    fn add(&mut self, value: &Value) {
        if let Some(v) = value.as_f64() {
            self.sum += v;
            self.n += 1;
        }
    }

    fn partial(&self) -> Vec<Value> {
        vec![Value::Float64(self.sum), Value::Int64(self.n)]
    }

    fn combine_partial(&mut self, partial: &[Value]) {
        if let (Value::Float64(sum), Value::Int64(n)) = (&partial[0], &partial[1]) {
            self.sum += sum;
            self.n += n;
        }
    }

    fn finalize(&self) -> Value {
        if self.n == 0 {
            Value::Null
        } else {
            Value::Float64(self.sum / self.n as f64)
        }
    }
}

/// Population variance over non-null values via running moments (count,
/// mean, sum of squared deviations), merged with the parallel update rule.
/// Groups with fewer than two values have variance 0. With `sqrt` set this
/// is the standard deviation.
#[derive(Debug)]
struct VarAcc {
    n: i64,
    mean: f64,
    m2: f64,
    sqrt: bool,
}

impl VarAcc {
    fn new(sqrt: bool) -> Self {
        VarAcc {
            n: 0,
            mean: 0.0,
            m2: 0.0,
            sqrt,
        }
    }

    fn merge(&mut self, n: i64, mean: f64, m2: f64) {
        if n == 0 {
            return;
        }
        if self.n == 0 {
            self.n = n;
            self.mean = mean;
            self.m2 = m2;
            return;
        }
        let (a, b) = (self.n as f64, n as f64);
        let delta = mean - self.mean;
        self.mean = (self.mean * a + mean * b) / (a + b);
        self.m2 += m2 + delta * delta * a * b / (a + b);
        self.n += n;
    }
}

impl Accumulator for VarAcc {
    fn add(&mut self, value: &Value) {
        if let Some(v) = value.as_f64() {
            self.n += 1;
            let delta = v - self.mean;
            self.mean += delta / self.n as f64;
            self.m2 += delta * (v - self.mean);
        }
    }

    fn partial(&self) -> Vec<Value> {
        vec![
            Value::Int64(self.n),
            Value::Float64(self.mean),
            Value::Float64(self.m2),
        ]
    }

    fn combine_partial(&mut self, partial: &[Value]) {
        if let (Value::Int64(n), Value::Float64(mean), Value::Float64(m2)) =
            (&partial[0], &partial[1], &partial[2])
        {
            self.merge(*n, *mean, *m2);
        }
    }

    fn finalize(&self) -> Value {
        let var = if self.n <= 1 {
            0.0
        } else {
            self.m2 / self.n as f64
        };
        Value::Float64(if self.sqrt { var.sqrt() } else { var })
    }
}

/// One requested aggregate: function, input column and output name.
/// An empty output name is auto-generated from the function and column.
#[derive(Debug, Clone)]
pub struct AggregateSpec {
    pub agg: Aggregation,
    pub column: String,
    pub output: String,
}

impl AggregateSpec {
    pub fn new(agg: Aggregation, column: impl Into<String>) -> Self {
        AggregateSpec {
            agg,
            column: column.into(),
            output: String::new(),
        }
    }

    pub fn named(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }
}

/// Group `frame` by the key columns and compute the given aggregates.
///
/// Output columns are the keys followed by one column per aggregate, one
/// row per distinct key tuple (null keys form groups like any other
/// value). Row order of the output is unspecified. With no aggregates
/// this computes the distinct key tuples.
pub fn group_by(
    ctx: &QueryContext,
    frame: &Frame,
    keys: &[&str],
    aggs: &[AggregateSpec],
) -> Result<Frame> {
    if keys.is_empty() {
        return Err(FrameError::new("group-by requires at least one key column"));
    }
    let key_idx = key_indices(frame, keys)?;

    let mut agg_idx = Vec::with_capacity(aggs.len());
    let mut agg_input_types = Vec::with_capacity(aggs.len());
    for spec in aggs {
        let idx = frame.column_index(&spec.column).ok_or_else(|| {
            FrameError::new(format!("frame has no column named '{}'", spec.column))
        })?;
        let input = frame.column_at(idx).dtype();
        if !spec.agg.supports(input) {
            return Err(FrameError::new(format!(
                "{} does not support column '{}' of type {}",
                spec.agg.name(),
                spec.column,
                input
            )));
        }
        agg_idx.push(idx);
        agg_input_types.push(input);
    }

    let key_dtypes: Vec<DataType> = key_idx.iter().map(|&i| frame.column_at(i).dtype()).collect();
    let out_names = output_names(keys, aggs)?;
    let out_dtypes: Vec<DataType> = key_dtypes
        .iter()
        .copied()
        .chain(
            aggs.iter()
                .zip(&agg_input_types)
                .map(|(spec, &input)| spec.agg.output_type(input)),
        )
        .collect();

    // Partial rows flushed to spill buckets carry the keys followed by
    // each aggregate's partial representation.
    let partial_dtypes: Vec<DataType> = key_dtypes
        .iter()
        .copied()
        .chain(
            aggs.iter()
                .zip(&agg_input_types)
                .flat_map(|(spec, &input)| spec.agg.partial_types(input)),
        )
        .collect();

    let config = ctx.config();
    let num_buckets = config.target_partitions.max(1);
    let mut buckets: Option<Vec<WriteCache>> = None;

    let mut table: HashMap<CompositeKey, Vec<Box<dyn Accumulator>>> = HashMap::new();
    let mut table_bytes = 0usize;

    let mut consume = FnSink(|row: &[Value]| {
        let key = CompositeKey(project(row, &key_idx));
        let key_bytes = key.0.iter().map(Value::approx_size).sum::<usize>();
        let accs = table.entry(key).or_insert_with(|| {
            table_bytes += key_bytes + 64 * aggs.len().max(1);
            aggs.iter().map(|spec| spec.agg.new_accumulator()).collect()
        });
        for (acc, &idx) in accs.iter_mut().zip(&agg_idx) {
            acc.add(&row[idx]);
        }

        if table_bytes > config.max_buffer_size {
            let buckets = buckets.get_or_insert_with(|| {
                debug!(groups = table.len(), "group-by table exceeded budget");
                new_buckets(ctx, num_buckets, &partial_dtypes)
            });
            flush_partials(&mut table, buckets)?;
            table_bytes = 0;
        }
        Ok(EmitState::NeedsMore)
    });
    ctx.run(&PlanNode::scan(frame.clone()), &mut consume)?;

    let path = unique_segment_path(&config.spill_dir, "groupby");
    let mut out = SegmentSink::create(&path, out_dtypes, config.rows_per_block())?;

    match buckets {
        None => {
            // Everything fit: finalize straight out of the table.
            for (key, accs) in table.drain() {
                emit_group(&mut out, key, &accs)?;
            }
        }
        Some(buckets) => {
            flush_partials(&mut table, &buckets)?;
            let partial_widths: Vec<usize> = aggs
                .iter()
                .zip(&agg_input_types)
                .map(|(spec, &input)| spec.agg.partial_types(input).len())
                .collect();

            // Second pass: one bucket's groups at a time.
            for cache in buckets {
                let data = cache.finish()?;
                let mut merged: HashMap<CompositeKey, Vec<Box<dyn Accumulator>>> =
                    HashMap::new();
                data.for_each_row(ctx, |row| {
                    let key = CompositeKey(row[..key_idx.len()].to_vec());
                    let accs = merged.entry(key).or_insert_with(|| {
                        aggs.iter().map(|spec| spec.agg.new_accumulator()).collect()
                    });
                    let mut offset = key_idx.len();
                    for (acc, width) in accs.iter_mut().zip(&partial_widths) {
                        acc.combine_partial(&row[offset..offset + width]);
                        offset += width;
                    }
                    Ok(())
                })?;
                for (key, accs) in merged {
                    emit_group(&mut out, key, &accs)?;
                }
            }
        }
    }

    out.finish()?;
    out.into_frame(&out_names)
}

fn new_buckets(ctx: &QueryContext, n: usize, dtypes: &[DataType]) -> Vec<WriteCache> {
    (0..n)
        .map(|_| {
            WriteCache::new(
                dtypes.to_vec(),
                ctx.config().cache_capacity_bytes,
                unique_segment_path(&ctx.config().spill_dir, "groupby-partial"),
                ctx.config().rows_per_block(),
            )
        })
        .collect()
}

fn flush_partials(
    table: &mut HashMap<CompositeKey, Vec<Box<dyn Accumulator>>>,
    buckets: &[WriteCache],
) -> Result<()> {
    for (key, accs) in table.drain() {
        let target = (hash_values(&key.0) % buckets.len() as u64) as usize;
        let mut row = key.0;
        for acc in &accs {
            row.extend(acc.partial());
        }
        buckets[target].push_row(&row)?;
    }
    Ok(())
}

fn emit_group(
    out: &mut SegmentSink,
    key: CompositeKey,
    accs: &[Box<dyn Accumulator>],
) -> Result<()> {
    let mut row = key.0;
    row.extend(accs.iter().map(|acc| acc.finalize()));
    out.push_row(&row)?;
    Ok(())
}

/// Key names followed by aggregate output names; empty requested names
/// default to "<Fn> of <column>" ("Count" alone for counts) and clashes
/// get a numeric suffix.
fn output_names(keys: &[&str], aggs: &[AggregateSpec]) -> Result<Vec<String>> {
    let mut names: Vec<String> = keys.iter().map(|s| s.to_string()).collect();
    for spec in aggs {
        let base = if spec.output.is_empty() {
            match spec.agg {
                Aggregation::Count => "Count".to_string(),
                _ => format!("{} of {}", spec.agg.name(), spec.column),
            }
        } else {
            spec.output.clone()
        };
        let mut candidate = base.clone();
        let mut suffix = 0;
        while names.iter().any(|n| *n == candidate) {
            suffix += 1;
            candidate = format!("{base}.{suffix}");
        }
        names.push(candidate);
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionConfig;
    use crate::util::unique_segment_path;

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

    fn sorted_rows(frame: &Frame, ctx: &QueryContext) -> Vec<Vec<Value>> {
        let mut rows = frame.collect_rows(ctx.manager()).unwrap();
        rows.sort_by(|a, b| super::super::compare_keys(a, b));
        rows
    }

    #[test]
    fn count_sum_avg_per_group() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let frame = frame_from_rows(
            &ctx,
            &["k", "v"],
            vec![DataType::Int64, DataType::Int64],
            &[
                vec![Value::Int64(1), Value::Int64(10)],
                vec![Value::Int64(2), Value::Int64(5)],
                vec![Value::Int64(1), Value::Int64(20)],
                vec![Value::Int64(2), Value::Null],
            ],
        );

        let out = group_by(
            &ctx,
            &frame,
            &["k"],
            &[
                AggregateSpec::new(Aggregation::Count, "v"),
                AggregateSpec::new(Aggregation::Sum, "v"),
                AggregateSpec::new(Aggregation::Avg, "v"),
            ],
        )
        .unwrap();

        assert_eq!(
            out.column_names(),
            vec!["k", "Count", "Sum of v", "Avg of v"]
        );
        assert_eq!(
            sorted_rows(&out, &ctx),
            vec![
                vec![
                    Value::Int64(1),
                    Value::Int64(2),
                    Value::Int64(30),
                    Value::Float64(15.0),
                ],
                vec![
                    Value::Int64(2),
                    Value::Int64(2),
                    Value::Int64(5),
                    Value::Float64(5.0),
                ],
            ]
        );
    }

    #[test]
    fn counts_sum_to_total_rows_even_when_spilled() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ExecutionConfig::with_spill_dir(dir.path());
        config.batch_size = 16;
        // Force several partial flushes.
        config.max_buffer_size = 2048;
        config.cache_capacity_bytes = 512;
        config.target_partitions = 4;
        let ctx = QueryContext::new(config);

        let rows: Vec<Vec<Value>> = (0..2000i64)
            .map(|i| vec![Value::Int64(i % 97)])
            .collect();
        let frame = frame_from_rows(&ctx, &["k"], vec![DataType::Int64], &rows);

        let out = group_by(
            &ctx,
            &frame,
            &["k"],
            &[AggregateSpec::new(Aggregation::Count, "k")],
        )
        .unwrap();

        assert_eq!(out.num_rows(), 97);
        let total: i64 = out
            .collect_rows(ctx.manager())
            .unwrap()
            .iter()
            .map(|r| match r[1] {
                Value::Int64(n) => n,
                _ => panic!("count must be an integer"),
            })
            .sum();
        assert_eq!(total, 2000);
    }

    #[test]
    fn min_max_skip_nulls_and_null_keys_group() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let frame = frame_from_rows(
            &ctx,
            &["k", "v"],
            vec![DataType::Int64, DataType::Int64],
            &[
                vec![Value::Null, Value::Int64(7)],
                vec![Value::Null, Value::Null],
                vec![Value::Int64(1), Value::Int64(3)],
            ],
        );

        let out = group_by(
            &ctx,
            &frame,
            &["k"],
            &[
                AggregateSpec::new(Aggregation::Min, "v"),
                AggregateSpec::new(Aggregation::Max, "v"),
            ],
        )
        .unwrap();

        assert_eq!(
            sorted_rows(&out, &ctx),
            vec![
                vec![Value::Null, Value::Int64(7), Value::Int64(7)],
                vec![Value::Int64(1), Value::Int64(3), Value::Int64(3)],
            ]
        );
    }

    fn as_f64(v: &Value) -> f64 {
        match v {
            Value::Float64(x) => *x,
            _ => panic!("expected a float"),
        }
    }

    #[test]
    fn variance_and_stdv_per_group() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let frame = frame_from_rows(
            &ctx,
            &["k", "v"],
            vec![DataType::Int64, DataType::Int64],
            &[
                vec![Value::Int64(1), Value::Int64(2)],
                vec![Value::Int64(1), Value::Int64(4)],
                vec![Value::Int64(1), Value::Int64(6)],
                vec![Value::Int64(2), Value::Int64(9)],
            ],
        );

        let out = group_by(
            &ctx,
            &frame,
            &["k"],
            &[
                AggregateSpec::new(Aggregation::Var, "v"),
                AggregateSpec::new(Aggregation::Stdv, "v"),
            ],
        )
        .unwrap();

        assert_eq!(out.column_names(), vec!["k", "Var of v", "Stdv of v"]);
        let rows = sorted_rows(&out, &ctx);
        // Population variance of {2, 4, 6} is 8/3.
        let want = 8.0 / 3.0;
        assert!((as_f64(&rows[0][1]) - want).abs() < 1e-12);
        assert!((as_f64(&rows[0][2]) - want.sqrt()).abs() < 1e-12);
        // A single-value group has zero spread.
        assert_eq!(rows[1][1], Value::Float64(0.0));
        assert_eq!(rows[1][2], Value::Float64(0.0));
    }

    #[test]
    fn variance_merges_across_partial_spill() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ExecutionConfig::with_spill_dir(dir.path());
        config.batch_size = 16;
        config.max_buffer_size = 2048;
        config.cache_capacity_bytes = 512;
        config.target_partitions = 4;
        let ctx = QueryContext::new(config);

        // Each key sees ten values spaced 50 apart, so every group has the
        // same population variance: 50^2 * (10^2 - 1) / 12.
        let rows: Vec<Vec<Value>> = (0..500i64)
            .map(|i| vec![Value::Int64(i % 50), Value::Int64(i)])
            .collect();
        let frame = frame_from_rows(
            &ctx,
            &["k", "v"],
            vec![DataType::Int64, DataType::Int64],
            &rows,
        );

        let out = group_by(
            &ctx,
            &frame,
            &["k"],
            &[AggregateSpec::new(Aggregation::Var, "v")],
        )
        .unwrap();

        assert_eq!(out.num_rows(), 50);
        let want = 2500.0 * (100.0 - 1.0) / 12.0;
        for row in out.collect_rows(ctx.manager()).unwrap() {
            assert!((as_f64(&row[1]) - want).abs() / want < 1e-9);
        }
    }

    #[test]
    fn no_aggregates_yields_distinct_keys() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let rows: Vec<Vec<Value>> = (0..100i64).map(|i| vec![Value::Int64(i % 5)]).collect();
        let frame = frame_from_rows(&ctx, &["k"], vec![DataType::Int64], &rows);

        let out = group_by(&ctx, &frame, &["k"], &[]).unwrap();
        assert_eq!(out.num_rows(), 5);
    }

    #[test]
    fn duplicate_output_names_get_suffixes() {
        let names = output_names(
            &["k"],
            &[
                AggregateSpec::new(Aggregation::Sum, "v"),
                AggregateSpec::new(Aggregation::Sum, "v"),
            ],
        )
        .unwrap();
        assert_eq!(names, vec!["k", "Sum of v", "Sum of v.1"]);
    }

    #[test]
    fn sum_over_non_numeric_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let frame = frame_from_rows(
            &ctx,
            &["k", "s"],
            vec![DataType::Int64, DataType::Utf8],
            &[vec![Value::Int64(1), Value::Utf8("x".to_string())]],
        );
        let err = group_by(
            &ctx,
            &frame,
            &["k"],
            &[AggregateSpec::new(Aggregation::Sum, "s")],
        );
        assert!(err.is_err());
    }
}
