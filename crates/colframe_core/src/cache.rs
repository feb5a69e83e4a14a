//! Bounded in-memory write cache with transparent spill to block storage.
//!
//! Used by the out-of-core algorithms for sort partitions, join buckets
//! and group-by partials. Writers push rows through a shared reference;
//! when the memory budget is exceeded the cache atomically promotes to a
//! file-backed segment sink, and every subsequent writer observes the
//! promotion.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use colframe_error::{FrameError, Result};
use parking_lot::Mutex;
use tracing::debug;

use crate::execution::context::QueryContext;
use crate::execution::EmitState;
use crate::frame::Frame;
use crate::plan::PlanNode;
use crate::sink::{FnSink, RowSink, SegmentSink};
use crate::values::{DataType, Value};

#[derive(Debug)]
enum CacheState {
    Memory { rows: Vec<Vec<Value>>, bytes: usize },
    Spilled { sink: SegmentSink },
    Finished,
}

/// A bounded write-back row cache.
#[derive(Debug)]
pub struct WriteCache {
    dtypes: Vec<DataType>,
    capacity_bytes: usize,
    /// Retention limit: rows past this count are dropped instead of
    /// stored. None keeps everything.
    row_limit: Option<u64>,
    spill_path: PathBuf,
    rows_per_block: usize,
    total_pushed: AtomicU64,
    state: Mutex<CacheState>,
}

impl WriteCache {
    pub fn new(
        dtypes: Vec<DataType>,
        capacity_bytes: usize,
        spill_path: PathBuf,
        rows_per_block: usize,
    ) -> Self {
        WriteCache {
            dtypes,
            capacity_bytes,
            row_limit: None,
            spill_path,
            rows_per_block,
            total_pushed: AtomicU64::new(0),
            state: Mutex::new(CacheState::Memory {
                rows: Vec::new(),
                bytes: 0,
            }),
        }
    }

    pub fn with_row_limit(mut self, limit: u64) -> Self {
        self.row_limit = Some(limit);
        self
    }

    /// Rows pushed so far, including any dropped by the retention limit.
    pub fn total_pushed(&self) -> u64 {
        self.total_pushed.load(Ordering::Relaxed)
    }

    pub fn is_spilled(&self) -> bool {
        matches!(&*self.state.lock(), CacheState::Spilled { .. })
    }

    /// Append one row. Takes a shared reference so writers can share one
    /// cache (e.g. behind an `Arc` or across scoped threads); the state
    /// lock serializes pushes and makes the promotion visible to all of
    /// them.
    pub fn push_row(&self, row: &[Value]) -> Result<()> {
        let pushed = self.total_pushed.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(limit) = self.row_limit {
            if pushed > limit {
                return Ok(());
            }
        }

        let mut state = self.state.lock();
        match &mut *state {
            CacheState::Memory { rows, bytes } => {
                *bytes += row.iter().map(Value::approx_size).sum::<usize>();
                rows.push(row.to_vec());
                if *bytes > self.capacity_bytes {
                    // Promote: everything buffered goes to disk, then the
                    // cache stays file-backed.
                    debug!(
                        rows = rows.len(),
                        bytes = *bytes,
                        path = %self.spill_path.display(),
                        "write cache exceeded budget, spilling"
                    );
                    let mut sink = SegmentSink::create(
                        &self.spill_path,
                        self.dtypes.clone(),
                        self.rows_per_block,
                    )?;
                    for row in rows.drain(..) {
                        sink.push_row(&row)?;
                    }
                    *state = CacheState::Spilled { sink };
                }
                Ok(())
            }
            CacheState::Spilled { sink } => {
                sink.push_row(row)?;
                Ok(())
            }
            CacheState::Finished => Err(FrameError::new("push into finished write cache")),
        }
    }

    /// Finalize the cache, returning its contents.
    pub fn finish(self) -> Result<CacheData> {
        let state = std::mem::replace(&mut *self.state.lock(), CacheState::Finished);
        match state {
            CacheState::Memory { rows, .. } => Ok(CacheData::Memory(rows)),
            CacheState::Spilled { mut sink } => {
                sink.finish()?;
                let names: Vec<String> =
                    (0..self.dtypes.len()).map(|i| format!("c{i}")).collect();
                Ok(CacheData::Spilled(sink.into_frame(&names)?))
            }
            CacheState::Finished => Err(FrameError::new("write cache finished twice")),
        }
    }
}

/// Contents of a finished write cache: either still in memory, or a frame
/// over the spilled segment.
#[derive(Debug)]
pub enum CacheData {
    Memory(Vec<Vec<Value>>),
    Spilled(Frame),
}

impl CacheData {
    pub fn num_rows(&self) -> u64 {
        match self {
            CacheData::Memory(rows) => rows.len() as u64,
            CacheData::Spilled(frame) => frame.num_rows(),
        }
    }

    /// Stream every row through `f` in storage order.
    pub fn for_each_row<F>(&self, ctx: &QueryContext, mut f: F) -> Result<()>
    where
        F: FnMut(&[Value]) -> Result<()>,
    {
        match self {
            CacheData::Memory(rows) => {
                for row in rows {
                    f(row)?;
                }
                Ok(())
            }
            CacheData::Spilled(frame) => {
                let mut sink = FnSink(|row: &[Value]| {
                    f(row)?;
                    Ok(EmitState::NeedsMore)
                });
                ctx.run(&PlanNode::scan(frame.clone()), &mut sink)
            }
        }
    }

    /// Load everything into memory. Callers use this only when the data is
    /// known to fit the budget (e.g. one sort partition).
    pub fn collect_rows(&self, ctx: &QueryContext) -> Result<Vec<Vec<Value>>> {
        match self {
            CacheData::Memory(rows) => Ok(rows.clone()),
            CacheData::Spilled(frame) => frame.collect_rows(ctx.manager()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionConfig;

    fn int_rows(n: i64) -> impl Iterator<Item = Vec<Value>> {
        (0..n).map(|i| vec![Value::Int64(i)])
    }

    #[test]
    fn stays_in_memory_under_budget() {
        let dir = tempfile::tempdir().unwrap();
        let cache = WriteCache::new(
            vec![DataType::Int64],
            1 << 20,
            dir.path().join("spill.cfseg"),
            64,
        );
        for row in int_rows(100) {
            cache.push_row(&row).unwrap();
        }
        assert!(!cache.is_spilled());
        match cache.finish().unwrap() {
            CacheData::Memory(rows) => assert_eq!(rows.len(), 100),
            other => panic!("expected memory data, got {other:?}"),
        }
    }

    #[test]
    fn promotes_to_disk_when_full() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = QueryContext::new(ExecutionConfig::with_spill_dir(dir.path()));
        let cache = WriteCache::new(
            vec![DataType::Int64],
            256, // tiny budget forces the spill
            dir.path().join("spill.cfseg"),
            64,
        );
        for row in int_rows(500) {
            cache.push_row(&row).unwrap();
        }
        assert!(cache.is_spilled());

        let data = cache.finish().unwrap();
        assert_eq!(data.num_rows(), 500);

        // Order must survive the promotion.
        let mut seen = Vec::new();
        data.for_each_row(&ctx, |row| {
            seen.push(row[0].clone());
            Ok(())
        })
        .unwrap();
        let want: Vec<_> = (0..500).map(Value::Int64).collect();
        assert_eq!(seen, want);
    }

    #[test]
    fn concurrent_writers_share_one_promotion() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = QueryContext::new(ExecutionConfig::with_spill_dir(dir.path()));
        let cache = WriteCache::new(
            vec![DataType::Int64],
            256, // small enough that the spill happens mid-stream
            dir.path().join("spill.cfseg"),
            64,
        );

        std::thread::scope(|scope| {
            for t in 0..2i64 {
                let cache = &cache;
                scope.spawn(move || {
                    for i in 0..300 {
                        cache.push_row(&[Value::Int64(t * 1000 + i)]).unwrap();
                    }
                });
            }
        });

        assert!(cache.is_spilled());
        assert_eq!(cache.total_pushed(), 600);

        // Nothing lost or duplicated across the promotion.
        let data = cache.finish().unwrap();
        assert_eq!(data.num_rows(), 600);
        let mut got: Vec<i64> = data
            .collect_rows(&ctx)
            .unwrap()
            .iter()
            .map(|row| match row[0] {
                Value::Int64(v) => v,
                _ => panic!("unexpected value"),
            })
            .collect();
        got.sort_unstable();
        let want: Vec<i64> = (0..300).chain(1000..1300).collect();
        assert_eq!(got, want);
    }

    #[test]
    fn row_limit_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let cache = WriteCache::new(
            vec![DataType::Int64],
            1 << 20,
            dir.path().join("spill.cfseg"),
            64,
        )
        .with_row_limit(10);
        for row in int_rows(100) {
            cache.push_row(&row).unwrap();
        }
        assert_eq!(cache.total_pushed(), 100);
        assert_eq!(cache.finish().unwrap().num_rows(), 10);
    }
}
