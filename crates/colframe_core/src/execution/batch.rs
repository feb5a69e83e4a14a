//! Row batches: the unit of data flow between pipeline stages.

use crate::values::Value;

/// A fixed-capacity columnar buffer of decoded rows.
///
/// A batch is produced by exactly one stage and owned by the execution
/// context until consumed; it is never referenced by two stages at once.
/// Consumed batches go back to a [`BatchPool`] for reuse.
#[derive(Debug, Clone, PartialEq)]
pub struct RowBatch {
    columns: Vec<Vec<Value>>,
    capacity: usize,
}

impl RowBatch {
    pub fn new(num_columns: usize, capacity: usize) -> Self {
        assert!(capacity > 0, "batch capacity must be non-zero");
        RowBatch {
            columns: (0..num_columns)
                .map(|_| Vec::with_capacity(capacity))
                .collect(),
            capacity,
        }
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    pub fn is_full(&self) -> bool {
        self.num_rows() >= self.capacity
    }

    pub fn columns(&self) -> &[Vec<Value>] {
        &self.columns
    }

    pub fn column(&self, idx: usize) -> &[Value] {
        &self.columns[idx]
    }

    pub fn column_mut(&mut self, idx: usize) -> &mut Vec<Value> {
        &mut self.columns[idx]
    }

    /// Append one row. Panics if the batch is full or the row width does
    /// not match; callers check `is_full` first.
    pub fn push_row(&mut self, row: &[Value]) {
        assert!(!self.is_full(), "push into full batch");
        assert_eq!(row.len(), self.columns.len(), "row width mismatch");
        for (col, val) in self.columns.iter_mut().zip(row) {
            col.push(val.clone());
        }
    }

    pub fn row(&self, idx: usize) -> Vec<Value> {
        self.columns.iter().map(|c| c[idx].clone()).collect()
    }

    pub fn rows(&self) -> impl Iterator<Item = Vec<Value>> + '_ {
        (0..self.num_rows()).map(|i| self.row(i))
    }

    /// Keep only the rows at indices where `keep` is true.
    pub fn retain_rows(&mut self, keep: &[bool]) {
        assert_eq!(keep.len(), self.num_rows());
        for col in &mut self.columns {
            let mut i = 0;
            col.retain(|_| {
                let k = keep[i];
                i += 1;
                k
            });
        }
    }

    /// Truncate to the first `n` rows.
    pub fn truncate(&mut self, n: usize) {
        for col in &mut self.columns {
            col.truncate(n);
        }
    }

    pub fn clear(&mut self) {
        for col in &mut self.columns {
            col.clear();
        }
    }
}

/// Pool of reusable batches, all with the same shape.
#[derive(Debug)]
pub struct BatchPool {
    num_columns: usize,
    capacity: usize,
    free: Vec<RowBatch>,
}

impl BatchPool {
    pub fn new(num_columns: usize, capacity: usize) -> Self {
        BatchPool {
            num_columns,
            capacity,
            free: Vec::new(),
        }
    }

    pub fn take(&mut self) -> RowBatch {
        match self.free.pop() {
            Some(mut batch) => {
                batch.clear();
                batch
            }
            None => RowBatch::new(self.num_columns, self.capacity),
        }
    }

    /// Return a consumed batch for reuse. Batches of a different shape are
    /// simply dropped.
    pub fn put_back(&mut self, batch: RowBatch) {
        if batch.num_columns() == self.num_columns && batch.capacity() == self.capacity {
            self.free.push(batch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_retain() {
        let mut batch = RowBatch::new(2, 8);
        batch.push_row(&[Value::Int64(1), Value::Utf8("a".into())]);
        batch.push_row(&[Value::Int64(2), Value::Utf8("b".into())]);
        batch.push_row(&[Value::Int64(3), Value::Utf8("c".into())]);
        batch.retain_rows(&[true, false, true]);
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.row(1), vec![Value::Int64(3), Value::Utf8("c".into())]);
    }

    #[test]
    fn pool_reuses_cleared_batches() {
        let mut pool = BatchPool::new(1, 4);
        let mut batch = pool.take();
        batch.push_row(&[Value::Int64(9)]);
        pool.put_back(batch);
        let batch = pool.take();
        assert!(batch.is_empty());
        assert_eq!(batch.capacity(), 4);
    }
}
