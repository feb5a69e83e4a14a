use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static SEGMENT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a fresh segment file path under `dir`.
///
/// Uniqueness comes from a process-wide counter plus the pid, so
/// concurrent pipelines spilling into the same directory never collide.
pub fn unique_segment_path(dir: &Path, tag: &str) -> PathBuf {
    let n = SEGMENT_COUNTER.fetch_add(1, Ordering::Relaxed);
    dir.join(format!("{tag}-{}-{n}.cfseg", std::process::id()))
}
