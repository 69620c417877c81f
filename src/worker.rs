use crate::{ConversionError, ConversionPipeline, ConversionRequest, ConversionResult, SourceLocation};
use futures::future::join_all;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle of one item in a batch. `Succeeded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ItemFailure {
    /// Position of the request in the submitted batch
    pub index: usize,
    pub source: SourceLocation,
    pub error: ConversionError,
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item {} ({}): {}", self.index, self.source, self.error)
    }
}

#[derive(Debug, Clone)]
pub struct WorkerStats {
    pub id: usize,
    pub processed_count: usize,
    pub error_count: usize,
}

/// Result of one `run_batch` call
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub items_attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// First failure reported, in completion order. Nondeterministic when
    /// more than one worker is running.
    pub first_error: Option<ItemFailure>,
    /// Every failure, ordered by item index
    pub failures: Vec<ItemFailure>,
    pub item_states: Vec<ItemState>,
    pub worker_stats: Vec<WorkerStats>,
    pub source_bytes: u64,
    pub output_bytes: u64,
    pub elapsed: Duration,
}

impl BatchOutcome {
    pub fn empty() -> Self {
        Self {
            items_attempted: 0,
            succeeded: 0,
            failed: 0,
            first_error: None,
            failures: Vec::new(),
            item_states: Vec::new(),
            worker_stats: Vec::new(),
            source_bytes: 0,
            output_bytes: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_success(&self) -> bool {
        self.first_error.is_none()
    }

    /// Items completed per second over the whole batch
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.items_attempted as f64 / secs
        } else {
            0.0
        }
    }

    pub fn into_result(self) -> Result<BatchOutcome, ItemFailure> {
        match self.first_error {
            Some(failure) => Err(failure),
            None => Ok(self),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressInfo {
    pub total: usize,
    pub completed: usize,
    pub errors: usize,
    pub elapsed: Duration,
    pub rate: f64,
}

#[derive(Debug)]
struct BatchState {
    item_states: Vec<ItemState>,
    succeeded: usize,
    failed: usize,
    first_error: Option<ItemFailure>,
    failures: Vec<ItemFailure>,
    source_bytes: u64,
    output_bytes: u64,
}

/// Shared accounting for one batch
///
/// Every worker reports into the same accumulator; all updates go through a
/// single lock so concurrent completions never lose counts.
#[derive(Debug)]
pub struct BatchAccumulator {
    state: Mutex<BatchState>,
    start_time: Instant,
}

impl BatchAccumulator {
    pub fn new(total: usize) -> Self {
        Self {
            state: Mutex::new(BatchState {
                item_states: vec![ItemState::Pending; total],
                succeeded: 0,
                failed: 0,
                first_error: None,
                failures: Vec::new(),
                source_bytes: 0,
                output_bytes: 0,
            }),
            start_time: Instant::now(),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut BatchState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub fn mark_running(&self, index: usize) {
        self.with_state(|state| {
            if let Some(item) = state.item_states.get_mut(index) {
                *item = ItemState::Running;
            }
        });
    }

    pub fn record_success(&self, index: usize, source_len: usize, output_len: usize) {
        self.with_state(|state| {
            if let Some(item) = state.item_states.get_mut(index) {
                *item = ItemState::Succeeded;
            }
            state.succeeded += 1;
            state.source_bytes += source_len as u64;
            state.output_bytes += output_len as u64;
        });
    }

    pub fn record_failure(&self, failure: ItemFailure, source_len: usize) {
        self.with_state(|state| {
            if let Some(item) = state.item_states.get_mut(failure.index) {
                *item = ItemState::Failed;
            }
            state.failed += 1;
            state.source_bytes += source_len as u64;
            if state.first_error.is_none() {
                state.first_error = Some(failure.clone());
            }
            state.failures.push(failure);
        });
    }

    pub fn progress(&self) -> ProgressInfo {
        self.with_state(|state| {
            let completed = state.succeeded + state.failed;
            let elapsed = self.start_time.elapsed();
            ProgressInfo {
                total: state.item_states.len(),
                completed,
                errors: state.failed,
                elapsed,
                rate: if elapsed.as_secs_f64() > 0.0 {
                    completed as f64 / elapsed.as_secs_f64()
                } else {
                    0.0
                },
            }
        })
    }

    pub fn is_complete(&self) -> bool {
        let progress = self.progress();
        progress.completed >= progress.total
    }

    pub fn snapshot(&self, worker_stats: Vec<WorkerStats>) -> BatchOutcome {
        let elapsed = self.start_time.elapsed();
        self.with_state(|state| {
            let mut failures = state.failures.clone();
            failures.sort_by_key(|failure| failure.index);

            BatchOutcome {
                items_attempted: state.succeeded + state.failed,
                succeeded: state.succeeded,
                failed: state.failed,
                first_error: state.first_error.clone(),
                failures,
                item_states: state.item_states.clone(),
                worker_stats,
                source_bytes: state.source_bytes,
                output_bytes: state.output_bytes,
                elapsed,
            }
        })
    }
}

struct WorkItem {
    index: usize,
    request: ConversionRequest,
}

type SharedQueue = Arc<AsyncMutex<mpsc::UnboundedReceiver<WorkItem>>>;

struct ConversionWorker {
    id: usize,
    pipeline: ConversionPipeline,
    cancel: CancellationToken,
}

impl ConversionWorker {
    fn new(id: usize, pipeline: ConversionPipeline, cancel: CancellationToken) -> Self {
        Self {
            id,
            pipeline,
            cancel,
        }
    }

    async fn run(self, requests: SharedQueue, accumulator: Arc<BatchAccumulator>) -> WorkerStats {
        debug!("Starting conversion worker {}", self.id);
        self.pipeline.metrics().worker_started();

        let mut stats = WorkerStats {
            id: self.id,
            processed_count: 0,
            error_count: 0,
        };

        loop {
            let item = {
                let mut receiver = requests.lock().await;
                receiver.recv().await
            };

            let Some(WorkItem { index, request }) = item else {
                break;
            };

            accumulator.mark_running(index);
            let source = request.source.clone();
            let result = self.process_request(request).await;
            stats.processed_count += 1;

            match result.error {
                None => {
                    debug!("Worker {} converted item {} ({})", self.id, index, source);
                    accumulator.record_success(
                        index,
                        result.source_bytes.len(),
                        result.output_bytes.len(),
                    );
                }
                Some(error) => {
                    stats.error_count += 1;
                    warn!("Worker {} failed item {} ({}): {}", self.id, index, source, error);
                    accumulator.record_failure(
                        ItemFailure {
                            index,
                            source,
                            error,
                        },
                        result.source_bytes.len(),
                    );
                }
            }
        }

        self.pipeline.metrics().worker_stopped();
        debug!("Conversion worker {} stopped", self.id);
        stats
    }

    /// Runs one pipeline invocation in its own task so a panic fails only
    /// the item that caused it.
    async fn process_request(&self, request: ConversionRequest) -> ConversionResult {
        let pipeline = self.pipeline.clone();
        let cancel = self.cancel.clone();
        let start = Instant::now();

        match tokio::spawn(async move { pipeline.convert(request, &cancel).await }).await {
            Ok(result) => result,
            Err(e) => {
                error!("Worker {} task failed: {}", self.id, e);
                let error = ConversionError::from(e);
                let duration = start.elapsed();
                self.pipeline.metrics().record_failure(duration, 0, &error);
                ConversionResult::failure(Vec::new(), error, duration)
            }
        }
    }
}

/// Bounded-concurrency batch driver
///
/// # Examples
///
/// ```rust,no_run
/// use std::num::NonZeroUsize;
/// use topng::{BatchRunner, Config, ConversionPipeline, ConversionRequest};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let runner = BatchRunner::new(ConversionPipeline::new(&Config::default())?);
///     let requests = vec![
///         ConversionRequest::local("a.jpg", "a.png"),
///         ConversionRequest::local("b.jpg", "b.png"),
///     ];
///
///     let outcome = runner.run_batch(requests, NonZeroUsize::new(4).unwrap()).await;
///     if let Some(failure) = &outcome.first_error {
///         eprintln!("batch failed: {failure}");
///     }
///     Ok(())
/// }
/// ```
pub struct BatchRunner {
    pipeline: ConversionPipeline,
    cancel: CancellationToken,
}

impl BatchRunner {
    pub fn new(pipeline: ConversionPipeline) -> Self {
        Self::with_cancellation(pipeline, CancellationToken::new())
    }

    pub fn with_cancellation(pipeline: ConversionPipeline, cancel: CancellationToken) -> Self {
        Self { pipeline, cancel }
    }

    /// Makes every item that has not started yet fail with `Canceled`.
    /// Items already running are not interrupted.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run_batch(
        &self,
        requests: Vec<ConversionRequest>,
        concurrency_limit: NonZeroUsize,
    ) -> BatchOutcome {
        let accumulator = Arc::new(BatchAccumulator::new(requests.len()));
        self.run_batch_with(requests, concurrency_limit, accumulator)
            .await
    }

    /// Like [`run_batch`](Self::run_batch), reporting into a caller-owned
    /// accumulator so progress can be observed while the batch runs.
    pub async fn run_batch_with(
        &self,
        requests: Vec<ConversionRequest>,
        concurrency_limit: NonZeroUsize,
        accumulator: Arc<BatchAccumulator>,
    ) -> BatchOutcome {
        let total = requests.len();
        if total == 0 {
            return BatchOutcome::empty();
        }

        let worker_count = concurrency_limit.get().min(total);
        info!(
            "Processing batch of {} requests with {} workers",
            total, worker_count
        );

        let (sender, receiver) = mpsc::unbounded_channel();
        for (index, request) in requests.into_iter().enumerate() {
            // The receiver is alive until the workers drain it.
            let _ = sender.send(WorkItem { index, request });
        }
        drop(sender);

        let shared_receiver: SharedQueue = Arc::new(AsyncMutex::new(receiver));

        let handles: Vec<_> = (0..worker_count)
            .map(|id| {
                let worker =
                    ConversionWorker::new(id, self.pipeline.clone(), self.cancel.clone());
                let rx = shared_receiver.clone();
                let accumulator = accumulator.clone();

                tokio::spawn(worker.run(rx, accumulator))
            })
            .collect();

        let mut worker_stats = Vec::with_capacity(worker_count);
        for joined in join_all(handles).await {
            match joined {
                Ok(stats) => worker_stats.push(stats),
                Err(e) => error!("Conversion worker terminated abnormally: {}", e),
            }
        }

        let outcome = accumulator.snapshot(worker_stats);
        info!(
            "Batch processing completed. Succeeded: {}, Failed: {}",
            outcome.succeeded, outcome.failed
        );
        outcome
    }
}
