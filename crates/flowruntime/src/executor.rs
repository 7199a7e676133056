//! Bounded-concurrency fan-out over a sequence of items.
//!
//! Every item produces exactly one [`IterationResult`], in input order,
//! except when a break predicate stops the run early: then the results end
//! at the first matching item.

use chrono::{DateTime, Utc};
use flowcore::{CancelScope, NodeError, Value, ValueMap};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Predicate evaluated on each finished item; `true` stops the run.
pub type BreakPredicate = Arc<dyn Fn(&IterationResult) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationStatus {
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

/// Outcome of processing one item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IterationResult {
    pub index: usize,
    pub item: Value,
    pub result: Value,
    pub status: IterationStatus,
    pub error: Option<String>,
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
}

impl IterationResult {
    fn cancelled(index: usize, item: Value) -> Self {
        Self {
            index,
            item,
            result: Value::Null,
            status: IterationStatus::Cancelled,
            error: Some("cancelled".to_string()),
            duration: Duration::ZERO,
            timestamp: Utc::now(),
        }
    }

    fn failed(index: usize, item: Value, error: String) -> Self {
        Self {
            index,
            item,
            result: Value::Null,
            status: IterationStatus::Failed,
            error: Some(error),
            duration: Duration::ZERO,
            timestamp: Utc::now(),
        }
    }

    fn finish(
        index: usize,
        item: Value,
        outcome: Result<Value, NodeError>,
        duration: Duration,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let (result, status, error) = match outcome {
            Ok(value) => (value, IterationStatus::Succeeded, None),
            Err(NodeError::Cancelled) => (Value::Null, IterationStatus::Cancelled, Some("cancelled".to_string())),
            Err(NodeError::Timeout { .. }) => (Value::Null, IterationStatus::TimedOut, Some("timeout".to_string())),
            Err(e) => (Value::Null, IterationStatus::Failed, Some(e.to_string())),
        };
        Self {
            index,
            item,
            result,
            status,
            error,
            duration,
            timestamp,
        }
    }

    pub fn success(&self) -> bool {
        self.status == IterationStatus::Succeeded
    }

    pub fn to_value(&self) -> Value {
        let mut map = ValueMap::new();
        map.insert("index".into(), Value::from(self.index));
        map.insert("item".into(), self.item.clone());
        map.insert("result".into(), self.result.clone());
        map.insert("success".into(), Value::from(self.success()));
        map.insert(
            "error".into(),
            self.error.clone().map(Value::String).unwrap_or(Value::Null),
        );
        map.insert("processing_time".into(), Value::from(self.duration.as_secs_f64()));
        map.insert("timestamp".into(), Value::from(self.timestamp.to_rfc3339()));
        Value::Object(map)
    }
}

/// Lifecycle of one fan-out call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanOutState {
    Pending,
    Running,
    Completed,
    Cancelled,
    BrokeEarly,
}

impl FanOutState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FanOutState::Pending => "pending",
            FanOutState::Running => "running",
            FanOutState::Completed => "completed",
            FanOutState::Cancelled => "cancelled",
            FanOutState::BrokeEarly => "broke_early",
        }
    }
}

/// Aggregated outcome of a fan-out call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanOutReport {
    /// Ordered by `index`, matching the input order
    pub results: Vec<IterationResult>,
    pub success_count: usize,
    pub failure_count: usize,
    /// Sum of per-item processing time
    pub total_duration: Duration,
    /// Wall-clock time of the whole call
    pub elapsed: Duration,
    pub outcome: FanOutState,
}

impl FanOutReport {
    fn new(results: Vec<IterationResult>, elapsed: Duration, outcome: FanOutState) -> Self {
        let success_count = results.iter().filter(|r| r.success()).count();
        let failure_count = results.len() - success_count;
        let total_duration = results.iter().map(|r| r.duration).sum();
        Self {
            results,
            success_count,
            failure_count,
            total_duration,
            elapsed,
            outcome,
        }
    }

    /// Mean processing time per result; zero for an empty report.
    pub fn average_duration(&self) -> Duration {
        match u32::try_from(self.results.len()) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total_duration / n,
            Err(_) => Duration::from_secs_f64(
                self.total_duration.as_secs_f64() / self.results.len() as f64,
            ),
        }
    }

    /// Outputs of the successful items, in order.
    pub fn successful_outputs(&self) -> Vec<Value> {
        self.results
            .iter()
            .filter(|r| r.success())
            .map(|r| r.result.clone())
            .collect()
    }
}

/// Options for a fan-out call
#[derive(Clone)]
pub struct FanOutOptions {
    /// Maximum number of items processed at once; 1 means strictly serial
    pub concurrency: usize,
    /// Deadline for each item, bounded by the caller's deadline
    pub item_timeout: Option<Duration>,
    pub break_when: Option<BreakPredicate>,
}

impl FanOutOptions {
    pub fn serial() -> Self {
        Self::default()
    }

    pub fn parallel(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.clamp(1, Semaphore::MAX_PERMITS),
            ..Self::default()
        }
    }

    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = Some(timeout);
        self
    }

    pub fn with_break<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&IterationResult) -> bool + Send + Sync + 'static,
    {
        self.break_when = Some(Arc::new(predicate));
        self
    }
}

impl Default for FanOutOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            item_timeout: None,
            break_when: None,
        }
    }
}

impl fmt::Debug for FanOutOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanOutOptions")
            .field("concurrency", &self.concurrency)
            .field("item_timeout", &self.item_timeout)
            .field("break_when", &self.break_when.is_some())
            .finish()
    }
}

/// Runs a per-item processor over a sequence of items
#[derive(Debug, Clone, Default)]
pub struct FanOutExecutor {
    options: FanOutOptions,
}

impl FanOutExecutor {
    pub fn new(options: FanOutOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &FanOutOptions {
        &self.options
    }

    /// Process every item and collect the ordered report.
    ///
    /// `process` receives the item index, the item and a child scope that
    /// carries the item deadline. A failing item never aborts its siblings.
    pub async fn run<F, Fut>(&self, scope: &CancelScope, items: Vec<Value>, process: F) -> FanOutReport
    where
        F: Fn(usize, Value, CancelScope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, NodeError>> + Send + 'static,
    {
        let started = Instant::now();
        let total = items.len();
        // more permits than items buys nothing
        let concurrency = self.options.concurrency.clamp(1, total.max(1));
        tracing::debug!(items = total, concurrency, state = FanOutState::Running.as_str(), "Fan-out");
        let (results, outcome) = if concurrency == 1 {
            self.run_serial(scope, items, &process).await
        } else {
            self.run_parallel(scope, items, Arc::new(process), concurrency).await
        };

        let report = FanOutReport::new(results, started.elapsed(), outcome);
        tracing::debug!(
            items = total,
            succeeded = report.success_count,
            failed = report.failure_count,
            state = outcome.as_str(),
            "Fan-out finished in {}ms",
            report.elapsed.as_millis()
        );
        report
    }

    async fn run_serial<F, Fut>(
        &self,
        scope: &CancelScope,
        items: Vec<Value>,
        process: &F,
    ) -> (Vec<IterationResult>, FanOutState)
    where
        F: Fn(usize, Value, CancelScope) -> Fut,
        Fut: Future<Output = Result<Value, NodeError>>,
    {
        let mut results = Vec::with_capacity(items.len());
        let mut items = items.into_iter().enumerate();

        while let Some((index, item)) = items.next() {
            if scope.is_cancelled() {
                // every remaining item is still accounted for
                results.push(IterationResult::cancelled(index, item));
                results.extend(items.by_ref().map(|(i, item)| IterationResult::cancelled(i, item)));
                return (results, FanOutState::Cancelled);
            }

            let result = run_item(index, item, scope, self.options.item_timeout, process).await;
            let stop = self.should_break(&result);
            results.push(result);
            if stop {
                return (results, FanOutState::BrokeEarly);
            }
        }

        let outcome = outcome_of(&results);
        (results, outcome)
    }

    async fn run_parallel<F, Fut>(
        &self,
        scope: &CancelScope,
        items: Vec<Value>,
        process: Arc<F>,
        concurrency: usize,
    ) -> (Vec<IterationResult>, FanOutState)
    where
        F: Fn(usize, Value, CancelScope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, NodeError>> + Send + 'static,
    {
        let gate = Arc::new(Semaphore::new(concurrency));
        // lowest index whose result matched the break predicate
        let break_at = Arc::new(AtomicUsize::new(usize::MAX));
        // dropping the set aborts every item still in flight
        let mut running = JoinSet::new();

        for (index, item) in items.iter().cloned().enumerate() {
            let gate = gate.clone();
            let process = process.clone();
            let scope = scope.clone();
            let break_at = break_at.clone();
            let break_when = self.options.break_when.clone();
            let item_timeout = self.options.item_timeout;

            running.spawn(async move {
                let Ok(_permit) = gate.acquire_owned().await else {
                    return (index, None);
                };
                if index > break_at.load(Ordering::Acquire) {
                    return (index, None);
                }
                let work = run_item(index, item.clone(), &scope, item_timeout, process.as_ref());
                let result = match AssertUnwindSafe(work).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        tracing::error!(index, "Fan-out item panicked: {}", message);
                        IterationResult::failed(index, item, format!("task failed: {}", message))
                    }
                };
                if break_when.as_ref().is_some_and(|matches| matches(&result)) {
                    break_at.fetch_min(index, Ordering::AcqRel);
                }
                (index, Some(result))
            });
        }

        let mut slots: Vec<Option<IterationResult>> = (0..items.len()).map(|_| None).collect();
        while let Some(joined) = running.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = result,
                Err(e) => tracing::error!("Fan-out task failed: {}", e),
            }
        }

        let break_at = break_at.load(Ordering::Acquire);
        let (limit, outcome) = if break_at == usize::MAX {
            (items.len(), None)
        } else {
            // indices up to the match were never skipped
            (break_at + 1, Some(FanOutState::BrokeEarly))
        };
        let results: Vec<IterationResult> = slots
            .into_iter()
            .zip(items)
            .enumerate()
            .take(limit)
            .map(|(index, (slot, item))| {
                slot.unwrap_or_else(|| IterationResult::failed(index, item, "task failed".to_string()))
            })
            .collect();
        let outcome = outcome.unwrap_or_else(|| outcome_of(&results));
        (results, outcome)
    }

    fn should_break(&self, result: &IterationResult) -> bool {
        self.options
            .break_when
            .as_ref()
            .is_some_and(|matches| matches(result))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}

fn outcome_of(results: &[IterationResult]) -> FanOutState {
    if results.iter().any(|r| r.status == IterationStatus::Cancelled) {
        FanOutState::Cancelled
    } else {
        FanOutState::Completed
    }
}

async fn run_item<F, Fut>(
    index: usize,
    item: Value,
    scope: &CancelScope,
    item_timeout: Option<Duration>,
    process: &F,
) -> IterationResult
where
    F: Fn(usize, Value, CancelScope) -> Fut,
    Fut: Future<Output = Result<Value, NodeError>>,
{
    if scope.is_cancelled() {
        return IterationResult::cancelled(index, item);
    }

    let timestamp = Utc::now();
    let started = Instant::now();
    // a deadline past the end of the clock is no deadline
    let item_deadline = item_timeout.and_then(|timeout| started.checked_add(timeout));
    let item_scope = scope.child(item_deadline);
    let work = process(index, item.clone(), item_scope.clone());

    // parent cancellation wins over the item deadline when both have passed
    let outcome = tokio::select! {
        biased;
        _ = scope.cancelled() => Err(NodeError::Cancelled),
        _ = sleep_until(item_deadline) => Err(NodeError::Timeout {
            millis: item_timeout.map_or(0, |t| t.as_millis() as u64),
        }),
        outcome = work => outcome,
    };
    item_scope.cancel();

    IterationResult::finish(index, item, outcome, started.elapsed(), timestamp)
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
