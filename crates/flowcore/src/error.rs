use crate::coerce::CoercionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Cancelled")]
    Cancelled,

    #[error("No valid values: {0}")]
    EmptyInput(String),
}

impl NodeError {
    pub fn invalid_input(field: impl Into<String>, expected: &str, err: &CoercionError) -> Self {
        NodeError::InvalidInputType {
            field: field.into(),
            expected: expected.to_string(),
            actual: err.actual.to_string(),
        }
    }
}

/// Failures resolving a type identifier into a node instance.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("Unknown node type: {0}")]
    UnknownType(String),

    #[error("Invalid configuration for '{node_type}': {source}")]
    InvalidConfig {
        node_type: String,
        #[source]
        source: NodeError,
    },
}

impl From<DispatchError> for NodeError {
    fn from(err: DispatchError) -> Self {
        NodeError::Configuration(err.to_string())
    }
}
