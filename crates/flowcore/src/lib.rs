//! Core abstractions for the flow engine
//!
//! This crate provides the value model, the node contract and the error
//! taxonomy that every other crate builds on. It knows nothing about how
//! node types are registered or scheduled.

mod cancel;
pub mod coerce;
mod condition;
mod error;
pub mod events;
mod node;
mod spec;
mod value;

pub use cancel::CancelScope;
pub use condition::{Condition, Operator};
pub use error::{DispatchError, FlowError, NodeError};
pub use events::{EventBus, EventEmitter, ExecutionEvent, ExecutionId, NodeEvent};
pub use node::{Node, NodeContext, NodeId, NodeMetadata, NodeOutput};
pub use spec::NodeSpec;
pub use value::{overlay, Row, Value, ValueMap};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
