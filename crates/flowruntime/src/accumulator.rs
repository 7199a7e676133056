//! Size- and time-triggered batching in front of an async sink.

use async_trait::async_trait;
use flowcore::NodeError;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

/// Downstream consumer of flushed batches
#[async_trait]
pub trait BatchSink<T>: Send + Sync {
    async fn write_batch(&self, items: Vec<T>) -> Result<(), NodeError>;
}

/// Adapter turning an async closure into a [`BatchSink`].
pub struct FnSink<F>(F);

#[async_trait]
impl<T, F, Fut> BatchSink<T> for FnSink<F>
where
    T: Send + 'static,
    F: Fn(Vec<T>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), NodeError>> + Send,
{
    async fn write_batch(&self, items: Vec<T>) -> Result<(), NodeError> {
        (self.0)(items).await
    }
}

pub fn sink_fn<T, F, Fut>(f: F) -> Arc<dyn BatchSink<T>>
where
    T: Send + 'static,
    F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), NodeError>> + Send + 'static,
{
    Arc::new(FnSink(f))
}

#[derive(Debug, Clone)]
pub struct AccumulatorConfig {
    /// Buffer length that triggers an immediate flush
    pub batch_size: usize,
    /// Quiet period after the last `add` that triggers a flush
    pub flush_interval: Duration,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccumulatorStats {
    pub batches_flushed: usize,
    pub items_flushed: usize,
    pub failed_batches: usize,
}

/// Collects items and hands them to a sink in batches.
///
/// A flush happens when the buffer reaches `batch_size`, or when
/// `flush_interval` passes without a new `add` (the timer restarts on every
/// add). The sink runs on its own task, outside the buffer lock. Must be
/// used from within a Tokio runtime.
pub struct BatchAccumulator<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for BatchAccumulator<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<T> {
    config: AccumulatorConfig,
    sink: Arc<dyn BatchSink<T>>,
    state: Mutex<State<T>>,
    tracker: TaskTracker,
    batches_flushed: AtomicUsize,
    items_flushed: AtomicUsize,
    failed_batches: AtomicUsize,
}

struct State<T> {
    buffer: Vec<T>,
    timer: Option<JoinHandle<()>>,
    // bumped on every add so a stale timer can tell it was superseded
    generation: u64,
    closed: bool,
}

impl<T> State<T> {
    /// Swap out the buffer and disarm the timer, in one critical section.
    fn take(&mut self) -> Vec<T> {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        std::mem::take(&mut self.buffer)
    }
}

impl<T: Send + 'static> BatchAccumulator<T> {
    pub fn new(config: AccumulatorConfig, sink: Arc<dyn BatchSink<T>>) -> Self {
        let config = AccumulatorConfig {
            batch_size: config.batch_size.max(1),
            ..config
        };
        let capacity = config.batch_size;
        Self {
            inner: Arc::new(Inner {
                config,
                sink,
                state: Mutex::new(State {
                    buffer: Vec::with_capacity(capacity),
                    timer: None,
                    generation: 0,
                    closed: false,
                }),
                tracker: TaskTracker::new(),
                batches_flushed: AtomicUsize::new(0),
                items_flushed: AtomicUsize::new(0),
                failed_batches: AtomicUsize::new(0),
            }),
        }
    }

    pub fn add(&self, item: T) -> Result<(), NodeError> {
        let batch = {
            let mut state = self.inner.lock();
            if state.closed {
                return Err(NodeError::ExecutionFailed("accumulator closed".to_string()));
            }
            state.buffer.push(item);
            state.generation += 1;

            if state.buffer.len() >= self.inner.config.batch_size {
                Some(state.take())
            } else {
                self.inner.arm_timer(&mut state);
                None
            }
        };

        if let Some(batch) = batch {
            self.inner.dispatch(batch);
        }
        Ok(())
    }

    /// Hand everything buffered to the sink now. Returns the batch length.
    pub fn flush(&self) -> usize {
        let batch = self.inner.lock().take();
        let len = batch.len();
        self.inner.dispatch(batch);
        len
    }

    /// Flush the remainder, refuse further items and wait for every
    /// in-flight sink call to finish.
    pub async fn close(&self) {
        let batch = {
            let mut state = self.inner.lock();
            state.closed = true;
            state.take()
        };
        self.inner.dispatch(batch);
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    pub fn pending(&self) -> usize {
        self.inner.lock().buffer.len()
    }

    pub fn stats(&self) -> AccumulatorStats {
        AccumulatorStats {
            batches_flushed: self.inner.batches_flushed.load(Ordering::Acquire),
            items_flushed: self.inner.items_flushed.load(Ordering::Acquire),
            failed_batches: self.inner.failed_batches.load(Ordering::Acquire),
        }
    }
}

impl<T: Send + 'static> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm_timer(self: &Arc<Self>, state: &mut State<T>) {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        let generation = state.generation;
        let interval = self.config.flush_interval;
        let inner = self.clone();
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            inner.flush_if_current(generation);
        }));
    }

    fn flush_if_current(self: &Arc<Self>, generation: u64) {
        let batch = {
            let mut state = self.lock();
            if state.generation != generation {
                return;
            }
            // this is the running timer; drop its handle instead of aborting
            state.timer = None;
            state.take()
        };
        tracing::debug!("Flush interval elapsed with {} items buffered", batch.len());
        self.dispatch(batch);
    }

    fn dispatch(self: &Arc<Self>, batch: Vec<T>) {
        if batch.is_empty() {
            return;
        }
        let inner = self.clone();
        self.tracker.spawn(async move {
            let size = batch.len();
            match inner.sink.write_batch(batch).await {
                Ok(()) => {
                    inner.batches_flushed.fetch_add(1, Ordering::AcqRel);
                    inner.items_flushed.fetch_add(size, Ordering::AcqRel);
                    tracing::debug!("Flushed batch of {} items", size);
                }
                Err(e) => {
                    inner.failed_batches.fetch_add(1, Ordering::AcqRel);
                    tracing::error!("Batch flush of {} items failed: {}", size, e);
                }
            }
        });
    }
}
