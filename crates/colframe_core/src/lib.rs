//! Columnar, out-of-core frame storage and query execution.
//!
//! Data lives in immutable, block-compressed segment files; a frame is an
//! ordered set of named columns referencing those segments. Queries are
//! built as lazy plan graphs and driven by a pull-based runtime, and the
//! heavyweight operations (sort, group-by, join, shuffle) stream through
//! bounded memory with transparent spill to disk.

pub mod algorithms;
pub mod cache;
pub mod config;
pub mod execution;
pub mod frame;
pub mod plan;
pub mod sink;
pub mod statistics;
pub mod storage;
pub mod util;
pub mod values;

pub use colframe_error::{FrameError, Result, ResultExt};

pub use crate::algorithms::{group_by, join, shuffle, sort, AggregateSpec, Aggregation, JoinType};
pub use crate::config::ExecutionConfig;
pub use crate::execution::context::QueryContext;
pub use crate::frame::{Column, Frame, SegmentRef};
pub use crate::plan::PlanNode;
pub use crate::sink::{FnSink, RowSink, SegmentSink, VecSink};
pub use crate::values::{DataType, Value};
