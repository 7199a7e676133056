//! Standard node library
//!
//! Collection of built-in nodes, plus the row reductions behind the data
//! nodes.

pub mod data;
mod debug;
mod flow;
mod reduce;
mod time;

pub use debug::{DebugNode, DebugNodeFactory};
pub use flow::{LoopNode, LoopNodeFactory};
pub use reduce::{AggregateNode, AggregateNodeFactory, DedupeNode, DedupeNodeFactory};
pub use time::{DelayNode, DelayNodeFactory};
use flowruntime::NodeRegistry;

use std::sync::Arc;

/// Register all standard nodes with a registry
pub fn register_all(registry: &NodeRegistry) {
    registry.register(Arc::new(debug::DebugNodeFactory));
    registry.register(Arc::new(flow::LoopNodeFactory));
    registry.register(Arc::new(reduce::AggregateNodeFactory));
    registry.register(Arc::new(reduce::DedupeNodeFactory));
    registry.register(Arc::new(time::DelayNodeFactory));
}
