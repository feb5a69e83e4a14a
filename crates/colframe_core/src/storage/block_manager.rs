//! Process-wide manager of open segment files.
//!
//! The manager is the sole owner of live file handles, keyed by column
//! address. Opening the same segment for several columns (or several
//! readers) shares one handle via reference counting. The handle table is
//! guarded by a mutex; block reads only take the per-segment lock, not the
//! table lock.

use std::sync::Arc;

use colframe_error::{FrameError, Result};
use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::debug;

use super::block_file::{BlockInfo, SegmentReader};
use crate::values::Value;

/// Coordinates of one column within an open segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnAddress {
    pub segment_id: u64,
    pub column: usize,
}

/// Coordinates of one block of one column within an open segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockAddress {
    pub segment_id: u64,
    pub column: usize,
    pub block: usize,
}

impl BlockAddress {
    pub fn column_address(&self) -> ColumnAddress {
        ColumnAddress {
            segment_id: self.segment_id,
            column: self.column,
        }
    }
}

#[derive(Debug)]
struct SegmentHandle {
    path: String,
    refcount: usize,
    reader: Arc<Mutex<SegmentReader>>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    by_path: HashMap<String, u64>,
    segments: HashMap<u64, SegmentHandle>,
}

/// Tracks open segment files and decodes blocks out of them.
#[derive(Debug, Default)]
pub struct BlockManager {
    inner: Mutex<Inner>,
}

impl BlockManager {
    pub fn new() -> Self {
        BlockManager::default()
    }

    /// Open one column of a segment file, returning its address.
    ///
    /// The underlying file handle is shared and reference counted; every
    /// successful `open_column` must be paired with a `close_column`.
    pub fn open_column(&self, path: &str, column: usize) -> Result<ColumnAddress> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let segment_id = match inner.by_path.get(path).copied() {
            Some(id) => id,
            None => {
                let reader = SegmentReader::open(path)?;
                let id = inner.next_id;
                inner.next_id += 1;
                inner.by_path.insert(path.to_string(), id);
                inner.segments.insert(
                    id,
                    SegmentHandle {
                        path: path.to_string(),
                        refcount: 0,
                        reader: Arc::new(Mutex::new(reader)),
                    },
                );
                debug!(path, segment_id = id, "opened segment");
                id
            }
        };

        let handle = inner.segments.get(&segment_id).unwrap();
        let num_columns = handle.reader.lock().num_columns();
        if column >= num_columns {
            // Roll back the open if nothing else references the segment.
            if handle.refcount == 0 {
                inner.by_path.remove(path);
                inner.segments.remove(&segment_id);
            }
            return Err(FrameError::new(format!(
                "segment '{path}' has {num_columns} columns, column {column} requested"
            )));
        }
        inner.segments.get_mut(&segment_id).unwrap().refcount += 1;

        Ok(ColumnAddress { segment_id, column })
    }

    /// Release one reference to an open column. The file handle is closed
    /// when the last reference goes away.
    pub fn close_column(&self, addr: ColumnAddress) {
        let mut inner = self.inner.lock();
        let remove = match inner.segments.get_mut(&addr.segment_id) {
            Some(handle) => {
                assert!(handle.refcount > 0, "close of unreferenced column");
                handle.refcount -= 1;
                handle.refcount == 0
            }
            None => panic!("close of unknown segment {}", addr.segment_id),
        };
        if remove {
            let handle = inner.segments.remove(&addr.segment_id).unwrap();
            inner.by_path.remove(&handle.path);
            debug!(path = %handle.path, segment_id = addr.segment_id, "closed segment");
        }
    }

    pub fn num_blocks_in_column(&self, addr: ColumnAddress) -> Result<usize> {
        let reader = self.reader(addr.segment_id)?;
        let reader = reader.lock();
        Ok(reader.num_blocks(addr.column))
    }

    pub fn num_rows_in_column(&self, addr: ColumnAddress) -> Result<u64> {
        let reader = self.reader(addr.segment_id)?;
        let reader = reader.lock();
        Ok(reader.num_rows(addr.column))
    }

    pub fn block_info(&self, addr: BlockAddress) -> Result<BlockInfo> {
        let reader = self.reader(addr.segment_id)?;
        let reader = reader.lock();
        reader.block_info(addr.column, addr.block).cloned()
    }

    /// Read and decode one block. Decompression happens inside the reader;
    /// callers never observe compressed bytes.
    pub fn read_block(&self, addr: BlockAddress) -> Result<Vec<Value>> {
        let reader = self.reader(addr.segment_id)?;
        let mut reader = reader.lock();
        reader.read_block(addr.column, addr.block)
    }

    /// Number of segment files currently held open.
    pub fn num_open_segments(&self) -> usize {
        self.inner.lock().segments.len()
    }

    fn reader(&self, segment_id: u64) -> Result<Arc<Mutex<SegmentReader>>> {
        let inner = self.inner.lock();
        inner
            .segments
            .get(&segment_id)
            .map(|h| h.reader.clone())
            .ok_or_else(|| FrameError::new(format!("segment {segment_id} is not open")))
    }
}

/// One physical (file, column) pair a cursor iterates over.
#[derive(Debug, Clone)]
pub struct CursorPart {
    pub path: String,
    pub column: usize,
}

/// Streaming cursor over the blocks of a logical column spanning one or
/// more segments.
///
/// Advancing past the last block of a segment closes its handle, opens the
/// next segment and transparently skips segments with zero blocks. The
/// current handle is released on drop, so an abandoned cursor never leaks
/// an open file.
#[derive(Debug)]
pub struct ColumnCursor {
    manager: Arc<BlockManager>,
    parts: Vec<CursorPart>,
    part_idx: usize,
    block_idx: usize,
    current: Option<(ColumnAddress, usize)>,
    finished: bool,
}

impl ColumnCursor {
    pub fn new(manager: Arc<BlockManager>, parts: Vec<CursorPart>) -> Self {
        let finished = parts.is_empty();
        ColumnCursor {
            manager,
            parts,
            part_idx: 0,
            block_idx: 0,
            current: None,
            finished,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Read and decode the next block, or None when the column is
    /// exhausted.
    pub fn next_block(&mut self) -> Result<Option<Vec<Value>>> {
        match self.advance()? {
            Some(addr) => {
                self.block_idx += 1;
                Ok(Some(self.manager.read_block(addr)?))
            }
            None => Ok(None),
        }
    }

    /// Advance past the next block without decoding it, returning its
    /// element count. Used to skip rows cheaply.
    pub fn skip_block(&mut self) -> Result<Option<u64>> {
        match self.advance()? {
            Some(addr) => {
                self.block_idx += 1;
                Ok(Some(self.manager.block_info(addr)?.num_elem))
            }
            None => Ok(None),
        }
    }

    /// Element count of the next block without consuming it.
    pub fn peek_block_elems(&mut self) -> Result<Option<u64>> {
        match self.advance()? {
            Some(addr) => Ok(Some(self.manager.block_info(addr)?.num_elem)),
            None => Ok(None),
        }
    }

    /// Position on the next readable block, opening/closing segments as
    /// needed, without consuming it. Returns None once all segments are
    /// exhausted.
    fn advance(&mut self) -> Result<Option<BlockAddress>> {
        if self.finished {
            return Ok(None);
        }

        loop {
            let (addr, num_blocks) = match self.current {
                Some(cur) => cur,
                None => {
                    if self.part_idx >= self.parts.len() {
                        self.finished = true;
                        return Ok(None);
                    }
                    let part = &self.parts[self.part_idx];
                    let addr = self.manager.open_column(&part.path, part.column)?;
                    let num_blocks = self.manager.num_blocks_in_column(addr)?;
                    self.block_idx = 0;
                    self.current = Some((addr, num_blocks));
                    (addr, num_blocks)
                }
            };

            if self.block_idx < num_blocks {
                return Ok(Some(BlockAddress {
                    segment_id: addr.segment_id,
                    column: addr.column,
                    block: self.block_idx,
                }));
            }

            // Current segment exhausted (possibly zero blocks). Close it and
            // move on without consuming a logical element.
            self.manager.close_column(addr);
            self.current = None;
            self.part_idx += 1;
        }
    }
}

impl Drop for ColumnCursor {
    fn drop(&mut self) {
        if let Some((addr, _)) = self.current.take() {
            self.manager.close_column(addr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::block_file::SegmentWriter;

    fn write_segment(dir: &std::path::Path, name: &str, blocks: &[Vec<Value>]) -> String {
        let path = dir.join(name);
        let mut writer = SegmentWriter::create(&path, 1).unwrap();
        for block in blocks {
            writer.write_block(0, block).unwrap();
        }
        writer.close().unwrap();
        path.display().to_string()
    }

    #[test]
    fn shared_handles_are_refcounted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_segment(dir.path(), "seg", &[vec![Value::Int64(1)]]);

        let manager = BlockManager::new();
        let a = manager.open_column(&path, 0).unwrap();
        let b = manager.open_column(&path, 0).unwrap();
        assert_eq!(a.segment_id, b.segment_id);
        assert_eq!(manager.num_open_segments(), 1);

        manager.close_column(a);
        assert_eq!(manager.num_open_segments(), 1);
        manager.close_column(b);
        assert_eq!(manager.num_open_segments(), 0);
    }

    #[test]
    fn open_out_of_range_column_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_segment(dir.path(), "seg", &[vec![Value::Int64(1)]]);

        let manager = BlockManager::new();
        assert!(manager.open_column(&path, 3).is_err());
        assert_eq!(manager.num_open_segments(), 0);
    }

    #[test]
    fn cursor_crosses_segments_and_skips_empty_ones() {
        let dir = tempfile::tempdir().unwrap();
        let s1 = write_segment(
            dir.path(),
            "s1",
            &[vec![Value::Int64(1), Value::Int64(2)], vec![Value::Int64(3)]],
        );
        let s2 = write_segment(dir.path(), "s2", &[]);
        let s3 = write_segment(dir.path(), "s3", &[vec![Value::Int64(4)]]);

        let manager = Arc::new(BlockManager::new());
        let mut cursor = ColumnCursor::new(
            manager.clone(),
            [&s1, &s2, &s3]
                .iter()
                .map(|p| CursorPart {
                    path: p.to_string(),
                    column: 0,
                })
                .collect(),
        );

        let mut values = Vec::new();
        while let Some(block) = cursor.next_block().unwrap() {
            values.extend(block);
        }
        assert_eq!(
            values,
            vec![
                Value::Int64(1),
                Value::Int64(2),
                Value::Int64(3),
                Value::Int64(4)
            ]
        );
        assert!(cursor.is_finished());
        assert_eq!(manager.num_open_segments(), 0);
    }

    #[test]
    fn dropped_cursor_releases_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_segment(dir.path(), "seg", &[vec![Value::Int64(1)], vec![]]);

        let manager = Arc::new(BlockManager::new());
        let mut cursor = ColumnCursor::new(
            manager.clone(),
            vec![CursorPart { path, column: 0 }],
        );
        cursor.next_block().unwrap();
        assert_eq!(manager.num_open_segments(), 1);
        drop(cursor);
        assert_eq!(manager.num_open_segments(), 0);
    }

    #[test]
    fn skip_block_reports_element_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_segment(
            dir.path(),
            "seg",
            &[vec![Value::Int64(1), Value::Int64(2)], vec![Value::Int64(3)]],
        );

        let manager = Arc::new(BlockManager::new());
        let mut cursor =
            ColumnCursor::new(manager, vec![CursorPart { path, column: 0 }]);
        assert_eq!(cursor.skip_block().unwrap(), Some(2));
        assert_eq!(cursor.next_block().unwrap(), Some(vec![Value::Int64(3)]));
        assert_eq!(cursor.next_block().unwrap(), None);
    }
}
