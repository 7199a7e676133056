//! Node execution runtime
//!
//! This crate resolves node types through the registry, runs nodes, and
//! provides the fan-out executor, the batch accumulator and the batching
//! helpers that iterating and streaming nodes are built on.

mod accumulator;
mod batching;
mod dispatcher;
mod executor;
mod registry;
mod runtime;

pub use accumulator::{
    sink_fn, AccumulatorConfig, AccumulatorStats, BatchAccumulator, BatchSink, FnSink,
};
pub use batching::{
    batch_by_count, batch_by_size, batch_with_timeout, chunk_stream, process_batches_parallel,
    process_batches_sequential,
};
pub use dispatcher::NodeDispatcher;
pub use executor::{
    BreakPredicate, FanOutExecutor, FanOutOptions, FanOutReport, FanOutState, IterationResult,
    IterationStatus,
};
pub use registry::{FnFactory, NodeFactory, NodeRegistry, NodeTypeInfo, PortDefinition};
pub use runtime::{FlowRuntime, NodeRun, RuntimeConfig};
