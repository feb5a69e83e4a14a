//! Compilation of planner graphs into live pipelines, and the driver loop
//! that materializes them.

use std::sync::Arc;

use colframe_error::{FrameError, Result};
use hashbrown::HashMap;
use tracing::debug;

use super::operators::{
    BinaryTransformOperator,
    FilterOperator,
    HeadOperator,
    RangeOperator,
    ScanOperator,
    TransformOperator,
};
use super::{EmitState, ExecutionNode};
use crate::config::ExecutionConfig;
use crate::frame::Frame;
use crate::plan::{strip_identity, OperatorKind, PlanNode};
use crate::sink::{RowSink, SegmentSink};
use crate::storage::block_manager::BlockManager;
use crate::util::unique_segment_path;

/// Default output column names (`X1`, `X2`, ...) for materializations that
/// don't specify any.
pub fn default_column_names(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("X{i}")).collect()
}

/// Compiles planner subgraphs into pipelines and drives them.
///
/// One context owns the block manager shared by every cursor it creates.
/// A single compiled pipeline is driven synchronously by one logical
/// thread; parallelism happens across independent pipelines.
#[derive(Debug)]
pub struct QueryContext {
    config: ExecutionConfig,
    manager: Arc<BlockManager>,
}

impl QueryContext {
    pub fn new(config: ExecutionConfig) -> Self {
        QueryContext {
            config,
            manager: Arc::new(BlockManager::new()),
        }
    }

    pub fn with_manager(config: ExecutionConfig, manager: Arc<BlockManager>) -> Self {
        QueryContext { config, manager }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<BlockManager> {
        &self.manager
    }

    /// Compile a plan into a live pipeline.
    ///
    /// Identity nodes are rewritten away first. Subtrees referenced by
    /// more than one parent are materialized once and re-scanned, since an
    /// operator instance must never be pulled by two consumers.
    pub fn compile(&self, plan: &Arc<PlanNode>) -> Result<ExecutionNode> {
        let plan = strip_identity(plan);
        let mut parent_counts = HashMap::new();
        count_parents(&plan, &mut parent_counts);
        let mut materialized = HashMap::new();
        self.build(&plan, &parent_counts, &mut materialized)
    }

    fn build(
        &self,
        node: &Arc<PlanNode>,
        parent_counts: &HashMap<*const PlanNode, usize>,
        materialized: &mut HashMap<*const PlanNode, Frame>,
    ) -> Result<ExecutionNode> {
        let key = Arc::as_ptr(node);
        let shared = parent_counts.get(&key).copied().unwrap_or(0) > 1;

        // A shared non-leaf subtree is computed once into a temporary
        // frame; every parent scans that frame independently.
        if shared && node.num_inputs() > 0 {
            let frame = match materialized.get(&key) {
                Some(frame) => frame.clone(),
                None => {
                    debug!(kind = node.kind().name(), "materializing shared subtree");
                    let names = default_column_names(node.infer_type().len());
                    let frame = self.materialize(node, &names)?;
                    materialized.insert(key, frame.clone());
                    frame
                }
            };
            return Ok(self.scan_node(&frame));
        }

        let batch_size = self.config.batch_size;
        let node = match node.kind() {
            OperatorKind::Scan { frame } => self.scan_node(frame),
            OperatorKind::Range { start, stop } => ExecutionNode::new(
                Box::new(RangeOperator::new(*start, *stop, batch_size)),
                Vec::new(),
                batch_size,
            ),
            OperatorKind::Transform { func, output } => {
                let child = self.build(&node.inputs()[0], parent_counts, materialized)?;
                ExecutionNode::new(
                    Box::new(TransformOperator::new(func.clone(), output.len())),
                    vec![child],
                    batch_size,
                )
            }
            OperatorKind::BinaryTransform { func, output } => {
                let left = self.build(&node.inputs()[0], parent_counts, materialized)?;
                let right = self.build(&node.inputs()[1], parent_counts, materialized)?;
                ExecutionNode::new(
                    Box::new(BinaryTransformOperator::new(func.clone(), output.len())),
                    vec![left, right],
                    batch_size,
                )
            }
            OperatorKind::Filter { predicate } => {
                let width = node.infer_type().len();
                let child = self.build(&node.inputs()[0], parent_counts, materialized)?;
                ExecutionNode::new(
                    Box::new(FilterOperator::new(predicate.clone(), width)),
                    vec![child],
                    batch_size,
                )
            }
            OperatorKind::Head { limit } => {
                let width = node.infer_type().len();
                let child = self.build(&node.inputs()[0], parent_counts, materialized)?;
                ExecutionNode::new(
                    Box::new(HeadOperator::new(*limit, width)),
                    vec![child],
                    batch_size,
                )
            }
            // Logical-only node: must have been rewritten before compilation.
            OperatorKind::Identity => {
                panic!("identity node reached the execution runtime")
            }
        };
        Ok(node)
    }

    fn scan_node(&self, frame: &Frame) -> ExecutionNode {
        let batch_size = self.config.batch_size;
        ExecutionNode::new(
            Box::new(ScanOperator::new(self.manager.clone(), frame, batch_size)),
            Vec::new(),
            batch_size,
        )
    }

    /// Drive a plan to completion, emitting every batch into `sink`.
    pub fn run(&self, plan: &Arc<PlanNode>, sink: &mut dyn RowSink) -> Result<()> {
        let mut root = self.compile(plan)?;
        let mut state = sink.initial_state();
        while !state.is_terminal() {
            match root.get_next()? {
                Some(batch) => {
                    state = sink.push_batch(&batch)?;
                    if state == EmitState::Done {
                        root.cancel();
                    }
                    root.recycle(batch);
                }
                None => break,
            }
        }
        sink.finish()
    }

    /// Materialize a plan into a new frame with the given column names.
    ///
    /// The output segment is written under the configured spill directory.
    /// On failure the partial segment is deleted and never linked into an
    /// index.
    pub fn materialize(&self, plan: &Arc<PlanNode>, names: &[String]) -> Result<Frame> {
        let dtypes = plan.infer_type();
        if names.len() != dtypes.len() {
            return Err(FrameError::new(format!(
                "materialize got {} column names for {} columns",
                names.len(),
                dtypes.len()
            )));
        }

        let path = unique_segment_path(&self.config.spill_dir, "materialize");
        let mut sink =
            SegmentSink::create(&path, dtypes, self.config.rows_per_block())?;
        match self.run(plan, &mut sink) {
            Ok(()) => sink.into_frame(names),
            Err(err) => {
                sink.discard();
                Err(err)
            }
        }
    }
}

/// Count how many parents reference each node (edges, not paths).
fn count_parents(node: &Arc<PlanNode>, counts: &mut HashMap<*const PlanNode, usize>) {
    for input in node.inputs() {
        let key = Arc::as_ptr(input);
        let count = counts.entry(key).or_insert(0);
        *count += 1;
        if *count == 1 {
            count_parents(input, counts);
        }
    }
}
