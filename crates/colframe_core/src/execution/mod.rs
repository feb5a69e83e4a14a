//! Pull-based execution runtime.
//!
//! A compiled plan is a tree of [`ExecutionNode`]s (the planner DAG's
//! shared subtrees are materialized during compilation). One logical
//! thread drives the root: each call to `get_next` recursively pulls
//! batches from upstream operators. There is no async model; leaf nodes
//! block directly on file I/O and do their own block read-ahead.

pub mod batch;
pub mod context;
pub mod operators;

use std::fmt;

use colframe_error::Result;

pub use self::batch::{BatchPool, RowBatch};

/// Signal from a consumer back to the driver after each emitted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitState {
    /// The consumer wants more input.
    NeedsMore,
    /// The consumer has everything it needs; stop pulling and finalize
    /// normally.
    Satisfied,
    /// The consumer terminated early (short-circuit). Producers must stop
    /// pulling upstream promptly to avoid wasted I/O.
    Done,
}

impl EmitState {
    /// The state a consumer assumes before it has been emitted anything.
    pub fn initial() -> EmitState {
        EmitState::NeedsMore
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, EmitState::NeedsMore)
    }
}

/// Split borrow of an execution node handed to its operator: the node's
/// children and its output buffer pool.
pub struct NodeContext<'a> {
    pub children: &'a mut [ExecutionNode],
    pub pool: &'a mut BatchPool,
}

impl<'a> NodeContext<'a> {
    /// Pull the next batch from input `n`.
    pub fn get_next(&mut self, n: usize) -> Result<Option<RowBatch>> {
        self.children[n].get_next()
    }

    /// Advance input `n` by one batch without materializing it.
    pub fn skip_next(&mut self, n: usize) -> Result<bool> {
        self.children[n].skip_next()
    }

    /// Return a consumed input batch to the child that produced it.
    pub fn recycle(&mut self, n: usize, batch: RowBatch) {
        self.children[n].recycle(batch);
    }

    /// Grab a reusable output buffer for this node.
    pub fn output_buffer(&mut self) -> RowBatch {
        self.pool.take()
    }
}

/// A compiled operator instance.
pub trait Operator: fmt::Debug + Send {
    fn name(&self) -> &'static str;

    /// Number of columns in this operator's output batches.
    fn output_width(&self) -> usize;

    /// Whether row order is preserved end-to-end through this operator.
    /// Operators that cannot preserve order must override this, and
    /// downstream consumers must not assume order across them.
    fn preserves_order(&self) -> bool {
        true
    }

    /// Produce the next output batch, pulling inputs as needed. `None`
    /// means the operator is exhausted.
    fn next(&mut self, ctx: &mut NodeContext) -> Result<Option<RowBatch>>;

    /// Advance by one output batch without materializing it. Returns false
    /// once exhausted. The default materializes and discards.
    fn skip(&mut self, ctx: &mut NodeContext) -> Result<bool> {
        match self.next(ctx)? {
            Some(batch) => {
                ctx.pool.put_back(batch);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// A live node in a compiled pipeline: one operator instance plus its
/// input nodes and reusable output-buffer pool.
#[derive(Debug)]
pub struct ExecutionNode {
    operator: Box<dyn Operator>,
    children: Vec<ExecutionNode>,
    pool: BatchPool,
    exhausted: bool,
    cancelled: bool,
}

impl ExecutionNode {
    pub fn new(
        operator: Box<dyn Operator>,
        children: Vec<ExecutionNode>,
        batch_size: usize,
    ) -> Self {
        let pool = BatchPool::new(operator.output_width(), batch_size);
        ExecutionNode {
            operator,
            children,
            pool,
            exhausted: false,
            cancelled: false,
        }
    }

    pub fn operator_name(&self) -> &'static str {
        self.operator.name()
    }

    pub fn preserves_order(&self) -> bool {
        self.operator.preserves_order()
            && self.children.iter().all(|c| c.preserves_order())
    }

    /// Pull the next output batch. Returns None once exhausted or
    /// cancelled; errors propagate synchronously up the pull chain.
    pub fn get_next(&mut self) -> Result<Option<RowBatch>> {
        if self.exhausted || self.cancelled {
            return Ok(None);
        }
        let ExecutionNode {
            operator,
            children,
            pool,
            ..
        } = self;
        let mut ctx = NodeContext { children, pool };
        match operator.next(&mut ctx)? {
            Some(batch) => Ok(Some(batch)),
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    /// Advance by one batch without materializing it.
    pub fn skip_next(&mut self) -> Result<bool> {
        if self.exhausted || self.cancelled {
            return Ok(false);
        }
        let ExecutionNode {
            operator,
            children,
            pool,
            ..
        } = self;
        let mut ctx = NodeContext { children, pool };
        let advanced = operator.skip(&mut ctx)?;
        if !advanced {
            self.exhausted = true;
        }
        Ok(advanced)
    }

    /// Cooperatively cancel this node and everything upstream. Checked
    /// before each pull; there is no preemptive cancellation.
    pub fn cancel(&mut self) {
        self.cancelled = true;
        for child in &mut self.children {
            child.cancel();
        }
    }

    /// Hand a reusable output buffer to callers that build batches on this
    /// node's behalf.
    pub fn get_output_buffer(&mut self) -> RowBatch {
        self.pool.take()
    }

    /// Return a consumed batch to this node's pool.
    pub fn recycle(&mut self, batch: RowBatch) {
        self.pool.put_back(batch);
    }
}
