//! Row reductions: aggregation and deduplication over `&[Row]`.
//!
//! Every function here is pure. Input rows are never mutated, and fields
//! that are missing or hold the wrong kind of value are skipped rather than
//! treated as zero.

mod aggregate;
mod dedupe;

pub use aggregate::{
    average, count, count_distinct, group_by, max, median, min, percentile, sum, AggregateMethod,
};
pub use dedupe::{count_duplicates, dedupe, find_duplicates, DedupeKey, KeepPolicy, KeyFn};

use flowcore::NodeError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ReduceError {
    #[error("no valid numeric values for field '{field}'")]
    EmptyInput { field: String },

    #[error("percentile must be between 0 and 100, got {0}")]
    InvalidPercentile(f64),

    #[error("unknown aggregation method: {0}")]
    UnknownMethod(String),
}

impl From<ReduceError> for NodeError {
    fn from(err: ReduceError) -> Self {
        match err {
            ReduceError::EmptyInput { field } => NodeError::EmptyInput(field),
            other => NodeError::Configuration(other.to_string()),
        }
    }
}
