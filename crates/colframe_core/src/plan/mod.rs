//! The planner graph: an immutable, shared DAG of operation nodes
//! describing a deferred computation over columns.
//!
//! Nodes are reference counted and may have multiple parents (diamond
//! shapes). Node equality is identity, never structure. Nodes are
//! constructed once, read by the execution runtime during
//! materialization, and dropped when nothing references them.

use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;

use crate::frame::Frame;
use crate::values::{DataType, Value};

/// In-place row transform. Receives one row and rewrites it; the output
/// row may have a different width (see `output` types on the node).
pub type UnaryFn = Arc<dyn Fn(&mut Vec<Value>) + Send + Sync>;

/// Binary in-place transform: the first operand row is rewritten, the
/// second is a read-only auxiliary operand aligned by row position.
pub type BinaryFn = Arc<dyn Fn(&mut Vec<Value>, &[Value]) + Send + Sync>;

/// Row predicate for filters.
pub type PredicateFn = Arc<dyn Fn(&[Value]) -> bool + Send + Sync>;

/// The closed set of operator kinds.
pub enum OperatorKind {
    /// Leaf: stream a materialized frame's segments. 0 inputs.
    Scan { frame: Frame },
    /// Leaf: generate the integer sequence `[start, stop)`. 0 inputs.
    Range { start: i64, stop: i64 },
    /// Unary transform computed in place over its single input.
    Transform {
        func: UnaryFn,
        output: Vec<DataType>,
    },
    /// Binary transform; the first input's buffer is reused as the output
    /// buffer, the second input is an auxiliary operand.
    BinaryTransform {
        func: BinaryFn,
        output: Vec<DataType>,
    },
    /// Unary filter; output length is unknown until execution.
    Filter { predicate: PredicateFn },
    /// Emit at most `limit` rows, then terminate the pull chain early.
    Head { limit: u64 },
    /// Logical-only pass-through used for optimizer bookkeeping. Has no
    /// physical execution form; reaching the runtime un-rewritten is an
    /// engine bug.
    Identity,
}

impl OperatorKind {
    /// Arity of the operator: 0 = source, 1 = unary, 2 = binary.
    pub fn num_inputs(&self) -> usize {
        match self {
            OperatorKind::Scan { .. } | OperatorKind::Range { .. } => 0,
            OperatorKind::Transform { .. }
            | OperatorKind::Filter { .. }
            | OperatorKind::Head { .. }
            | OperatorKind::Identity => 1,
            OperatorKind::BinaryTransform { .. } => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OperatorKind::Scan { .. } => "scan",
            OperatorKind::Range { .. } => "range",
            OperatorKind::Transform { .. } => "transform",
            OperatorKind::BinaryTransform { .. } => "binary_transform",
            OperatorKind::Filter { .. } => "filter",
            OperatorKind::Head { .. } => "head",
            OperatorKind::Identity => "identity",
        }
    }
}

impl fmt::Debug for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One node of the planner DAG.
pub struct PlanNode {
    kind: OperatorKind,
    inputs: Vec<Arc<PlanNode>>,
}

impl fmt::Debug for PlanNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanNode")
            .field("kind", &self.kind.name())
            .field("inputs", &self.inputs)
            .finish()
    }
}

impl PlanNode {
    fn new(kind: OperatorKind, inputs: Vec<Arc<PlanNode>>) -> Arc<PlanNode> {
        assert_eq!(
            kind.num_inputs(),
            inputs.len(),
            "operator '{}' expects {} inputs, got {}",
            kind.name(),
            kind.num_inputs(),
            inputs.len()
        );
        Arc::new(PlanNode { kind, inputs })
    }

    pub fn scan(frame: Frame) -> Arc<PlanNode> {
        PlanNode::new(OperatorKind::Scan { frame }, Vec::new())
    }

    pub fn range(start: i64, stop: i64) -> Arc<PlanNode> {
        PlanNode::new(OperatorKind::Range { start, stop }, Vec::new())
    }

    pub fn transform(
        input: Arc<PlanNode>,
        output: Vec<DataType>,
        func: UnaryFn,
    ) -> Arc<PlanNode> {
        PlanNode::new(OperatorKind::Transform { func, output }, vec![input])
    }

    pub fn binary_transform(
        left: Arc<PlanNode>,
        right: Arc<PlanNode>,
        output: Vec<DataType>,
        func: BinaryFn,
    ) -> Arc<PlanNode> {
        PlanNode::new(
            OperatorKind::BinaryTransform { func, output },
            vec![left, right],
        )
    }

    pub fn filter(input: Arc<PlanNode>, predicate: PredicateFn) -> Arc<PlanNode> {
        PlanNode::new(OperatorKind::Filter { predicate }, vec![input])
    }

    pub fn head(input: Arc<PlanNode>, limit: u64) -> Arc<PlanNode> {
        PlanNode::new(OperatorKind::Head { limit }, vec![input])
    }

    pub fn identity(input: Arc<PlanNode>) -> Arc<PlanNode> {
        PlanNode::new(OperatorKind::Identity, vec![input])
    }

    pub fn kind(&self) -> &OperatorKind {
        &self.kind
    }

    pub fn inputs(&self) -> &[Arc<PlanNode>] {
        &self.inputs
    }

    pub fn num_inputs(&self) -> usize {
        self.kind.num_inputs()
    }

    /// Ordered output column types of this node.
    pub fn infer_type(&self) -> Vec<DataType> {
        match &self.kind {
            OperatorKind::Scan { frame } => frame.dtypes(),
            OperatorKind::Range { .. } => vec![DataType::Int64],
            OperatorKind::Transform { output, .. }
            | OperatorKind::BinaryTransform { output, .. } => output.clone(),
            OperatorKind::Filter { .. } | OperatorKind::Identity => {
                self.inputs[0].infer_type()
            }
            OperatorKind::Head { .. } => self.inputs[0].infer_type(),
        }
    }

    /// Row count of this node's output, or None when it cannot be known
    /// before execution (e.g. below a filter).
    pub fn infer_length(&self) -> Option<u64> {
        match &self.kind {
            OperatorKind::Scan { frame } => Some(frame.num_rows()),
            OperatorKind::Range { start, stop } => Some((stop - start).max(0) as u64),
            OperatorKind::Transform { .. } | OperatorKind::Identity => {
                self.inputs[0].infer_length()
            }
            OperatorKind::BinaryTransform { .. } => self.inputs[0].infer_length(),
            OperatorKind::Filter { .. } => None,
            OperatorKind::Head { limit } => {
                self.inputs[0].infer_length().map(|len| len.min(*limit))
            }
        }
    }
}

/// Rewrite a plan, removing `Identity` nodes while preserving DAG sharing.
///
/// Must run before compilation; the execution runtime asserts that no
/// identity node reaches it.
pub fn strip_identity(node: &Arc<PlanNode>) -> Arc<PlanNode> {
    fn rewrite(
        node: &Arc<PlanNode>,
        memo: &mut HashMap<*const PlanNode, Arc<PlanNode>>,
    ) -> Arc<PlanNode> {
        let key = Arc::as_ptr(node);
        if let Some(done) = memo.get(&key) {
            return done.clone();
        }

        let rewritten = if matches!(node.kind, OperatorKind::Identity) {
            rewrite(&node.inputs[0], memo)
        } else {
            let inputs: Vec<_> = node.inputs.iter().map(|i| rewrite(i, memo)).collect();
            if inputs
                .iter()
                .zip(&node.inputs)
                .all(|(a, b)| Arc::ptr_eq(a, b))
            {
                node.clone()
            } else {
                Arc::new(PlanNode {
                    kind: clone_kind(&node.kind),
                    inputs,
                })
            }
        };

        memo.insert(key, rewritten.clone());
        rewritten
    }

    fn clone_kind(kind: &OperatorKind) -> OperatorKind {
        match kind {
            OperatorKind::Scan { frame } => OperatorKind::Scan {
                frame: frame.clone(),
            },
            OperatorKind::Range { start, stop } => OperatorKind::Range {
                start: *start,
                stop: *stop,
            },
            OperatorKind::Transform { func, output } => OperatorKind::Transform {
                func: func.clone(),
                output: output.clone(),
            },
            OperatorKind::BinaryTransform { func, output } => {
                OperatorKind::BinaryTransform {
                    func: func.clone(),
                    output: output.clone(),
                }
            }
            OperatorKind::Filter { predicate } => OperatorKind::Filter {
                predicate: predicate.clone(),
            },
            OperatorKind::Head { limit } => OperatorKind::Head { limit: *limit },
            OperatorKind::Identity => OperatorKind::Identity,
        }
    }

    let mut memo = HashMap::new();
    rewrite(node, &mut memo)
}
