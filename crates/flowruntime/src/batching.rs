//! Splitting item sequences into batches and running a processor over them.
//!
//! These complement [`BatchAccumulator`](crate::BatchAccumulator): the
//! accumulator batches a stream as it arrives, these work on data that is
//! already in hand.

use flowcore::NodeError;
use futures::stream::{self, Stream};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Consecutive batches of at most `size` items. A zero size yields a single
/// batch holding everything.
pub fn batch_by_size<T: Clone>(items: &[T], size: usize) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }
    if size == 0 {
        return vec![items.to_vec()];
    }
    items.chunks(size).map(<[T]>::to_vec).collect()
}

/// Splits `items` into at most `count` batches of near-equal size; only the
/// last batch may be shorter.
pub fn batch_by_count<T: Clone>(items: &[T], count: usize) -> Vec<Vec<T>> {
    if count == 0 {
        return batch_by_size(items, 0);
    }
    batch_by_size(items, items.len().div_ceil(count))
}

/// Yields the batches of `batch_by_size` one at a time.
pub fn chunk_stream<T>(items: Vec<T>, size: usize) -> impl Stream<Item = Vec<T>> {
    let size = if size == 0 { items.len().max(1) } else { size };
    let mut items = items.into_iter().peekable();
    stream::iter(std::iter::from_fn(move || {
        items.peek()?;
        Some(items.by_ref().take(size).collect())
    }))
}

/// Runs `processor` over the batches in order, stopping at the first error.
pub async fn process_batches_sequential<T, F, Fut>(batches: Vec<Vec<T>>, processor: F) -> Result<(), NodeError>
where
    F: Fn(Vec<T>) -> Fut,
    Fut: Future<Output = Result<(), NodeError>>,
{
    for batch in batches {
        processor(batch).await?;
    }
    Ok(())
}

/// Runs `processor` over every batch, at most `max_concurrency` at a time.
///
/// All batches run even when one fails; the error of the lowest-numbered
/// failing batch is returned.
pub async fn process_batches_parallel<T, F, Fut>(
    batches: Vec<Vec<T>>,
    max_concurrency: usize,
    processor: F,
) -> Result<(), NodeError>
where
    T: Send + 'static,
    F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), NodeError>> + Send + 'static,
{
    let permits = max_concurrency.clamp(1, batches.len().max(1));
    let gate = Arc::new(Semaphore::new(permits));
    let processor = Arc::new(processor);
    let mut running = JoinSet::new();

    for (index, batch) in batches.into_iter().enumerate() {
        let gate = gate.clone();
        let processor = processor.clone();
        running.spawn(async move {
            let Ok(_permit) = gate.acquire_owned().await else {
                return (index, Err(NodeError::Cancelled));
            };
            (index, processor(batch).await)
        });
    }

    let mut first_error: Option<(usize, NodeError)> = None;
    while let Some(joined) = running.join_next().await {
        let (index, outcome) = match joined {
            Ok(finished) => finished,
            Err(e) => (
                usize::MAX,
                Err(NodeError::ExecutionFailed(format!("batch task failed: {}", e))),
            ),
        };
        if let Err(e) = outcome {
            tracing::error!("Batch {} failed: {}", index, e);
            if first_error.as_ref().map_or(true, |(first, _)| index < *first) {
                first_error = Some((index, e));
            }
        }
    }

    match first_error {
        Some((_, e)) => Err(e),
        None => Ok(()),
    }
}

/// Runs `processor` on one batch, failing with `Timeout` once `timeout`
/// passes.
pub async fn batch_with_timeout<T, F, Fut>(batch: Vec<T>, timeout: Duration, processor: F) -> Result<(), NodeError>
where
    F: FnOnce(Vec<T>) -> Fut,
    Fut: Future<Output = Result<(), NodeError>>,
{
    tokio::time::timeout(timeout, processor(batch))
        .await
        .map_err(|_| NodeError::Timeout {
            millis: timeout.as_millis() as u64,
        })?
}
