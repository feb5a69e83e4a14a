//! Engine configuration.
//!
//! All tunables are plain values threaded explicitly through algorithm
//! entry points. Nothing here is read from ambient global state.

use std::path::PathBuf;

/// Configuration shared by the execution runtime and the out-of-core
/// algorithms.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Target number of rows per batch flowing between operators.
    pub batch_size: usize,
    /// Target parallelism for independent partitions/buckets.
    pub target_partitions: usize,
    /// Memory budget in bytes for sort partitions, join buckets and the
    /// group-by accumulator table.
    pub max_buffer_size: usize,
    /// In-memory capacity in bytes of a write cache before it promotes to
    /// file-backed block storage.
    pub cache_capacity_bytes: usize,
    /// Number of sampled keys kept by the sort partitioner's quantile
    /// sketch.
    pub reservoir_capacity: usize,
    /// Directory for spill files and materialized segments.
    pub spill_dir: PathBuf,
}

impl ExecutionConfig {
    /// Config with the given spill directory and all other knobs at their
    /// defaults.
    pub fn with_spill_dir(dir: impl Into<PathBuf>) -> Self {
        ExecutionConfig {
            spill_dir: dir.into(),
            ..Default::default()
        }
    }

    /// Target number of rows per block when writing segments.
    pub fn rows_per_block(&self) -> usize {
        self.batch_size * 4
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            batch_size: 1024,
            target_partitions: num_cpus::get(),
            max_buffer_size: 256 * 1024 * 1024,
            cache_capacity_bytes: 16 * 1024 * 1024,
            reservoir_capacity: 65536,
            spill_dir: std::env::temp_dir(),
        }
    }
}
