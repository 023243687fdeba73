//! # Worker Pool
//!
//! A fixed set of worker threads pulling jobs from one shared bounded queue
//! and pushing results onto another.
//!
//! ```text
//!                        ┌──────────┐
//!                   ┌───►│ worker 1 │───┐
//!     submit ──►[ jobs ]─┼──►│ worker 2 │───┼──►[ results ]──► recv / iter
//!                   └───►│ worker W │───┘
//!                        └──────────┘
//!                             │
//!                       in-flight map (job id → worker, start time)
//! ```
//!
//! ## Lifecycle
//!
//! 1. `submit` jobs (blocks while the job queue is full)
//! 2. `close` once the last job is submitted
//! 3. workers drain the queue, then exit
//! 4. `recv` returns `Ok(None)` once every worker has exited
//!
//! Every job submitted before `close` is processed exactly once. Results
//! arrive in completion order; correlate them by [`JobId`].
//!
//! ## Failure Handling
//!
//! A handler error or panic becomes a [`JobFailure`] inside that job's
//! [`JobResult`]; the worker moves on to the next job. Forgetting to call
//! `close` would leave `recv` waiting forever on an idle pool, so after
//! `stall_timeout_ms` with nothing outstanding it reports
//! [`ToolkitError::Stalled`] instead.
//!
//! The mirror image is a producer that submits more than both queues hold
//! before anyone reads a result. `submit` reports the same error once the job
//! queue has stayed full for `stall_timeout_ms` while the result queue is full
//! and no job has finished.

use super::config::DispatcherConfig;
use super::error::{JobFailure, Result, ToolkitError};
use super::limiter::RateLimiter;
use super::metrics::DispatcherStats;
use super::select::CancelToken;
use super::utils::{panic_message, spawn_named, CacheAligned};
use ahash::RandomState;
use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Select, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Identifier of a submitted job.
pub type JobId = u64;

/// A unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job<P> {
    /// Identifier echoed back in the result.
    pub id: JobId,
    /// Input handed to the handler.
    pub payload: P,
}

impl<P> Job<P> {
    /// Creates a job with a caller-chosen id.
    pub fn new(id: JobId, payload: P) -> Self {
        Self { id, payload }
    }
}

/// The outcome of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult<R, E> {
    /// Id of the job this result belongs to.
    pub job_id: JobId,
    /// Worker that ran the job (1-based).
    pub worker_id: usize,
    /// What the handler produced.
    pub outcome: std::result::Result<R, JobFailure<E>>,
    /// Time spent inside the handler.
    pub elapsed: Duration,
}

impl<R, E> JobResult<R, E> {
    /// Returns true if the handler returned `Ok`.
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// The handler's value, if it succeeded.
    pub fn value(&self) -> Option<&R> {
        self.outcome.as_ref().ok()
    }
}

/// A job currently running on a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlightJob {
    /// The job.
    pub job_id: JobId,
    /// Worker running it.
    pub worker_id: usize,
    /// When the worker picked it up.
    pub started: Instant,
}

impl InFlightJob {
    /// How long the job has been running.
    pub fn running_for(&self) -> Duration {
        self.started.elapsed()
    }
}

type InFlightMap = DashMap<JobId, InFlightJob, RandomState>;

#[derive(Debug)]
struct PoolCounters {
    submitted: CacheAligned<AtomicU64>,
    submitting: CacheAligned<AtomicU64>,
    succeeded: CacheAligned<AtomicU64>,
    failed: CacheAligned<AtomicU64>,
    abandoned: CacheAligned<AtomicU64>,
}

impl PoolCounters {
    fn new() -> Self {
        Self {
            submitted: CacheAligned::new(AtomicU64::new(0)),
            submitting: CacheAligned::new(AtomicU64::new(0)),
            succeeded: CacheAligned::new(AtomicU64::new(0)),
            failed: CacheAligned::new(AtomicU64::new(0)),
            abandoned: CacheAligned::new(AtomicU64::new(0)),
        }
    }

    fn finished(&self) -> u64 {
        self.succeeded.load(Ordering::Acquire)
            + self.failed.load(Ordering::Acquire)
            + self.abandoned.load(Ordering::Acquire)
    }

    fn outstanding(&self) -> u64 {
        self.submitted
            .load(Ordering::Acquire)
            .saturating_sub(self.finished())
    }
}

// Marks a producer as inside `submit` until dropped.
struct SubmitGuard<'a>(&'a AtomicU64);

impl<'a> SubmitGuard<'a> {
    fn enter(counter: &'a AtomicU64) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A pool of worker threads running one handler over submitted payloads.
///
/// ## Example
///
/// ```rust
/// use corral::{Dispatcher, DispatcherConfig};
///
/// let pool = Dispatcher::spawn(DispatcherConfig::with_workers(3), |n: u64| {
///     Ok::<_, String>(n * 2)
/// })
/// .unwrap();
///
/// for n in 1..=5 {
///     pool.submit(n).unwrap();
/// }
/// pool.close().unwrap();
///
/// let mut doubled: Vec<u64> = pool
///     .iter()
///     .map(|r| *r.unwrap().value().unwrap())
///     .collect();
/// doubled.sort();
/// assert_eq!(doubled, vec![2, 4, 6, 8, 10]);
/// ```
pub struct Dispatcher<P, R, E> {
    input: Mutex<Option<Sender<Job<P>>>>,
    queue: Receiver<Job<P>>,
    results: Receiver<JobResult<R, E>>,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<PoolCounters>,
    in_flight: Arc<InFlightMap>,
    next_id: AtomicU64,
    limiter: Option<Arc<RateLimiter>>,
    cancel: CancelToken,
    config: DispatcherConfig,
}

impl<P, R, E> Dispatcher<P, R, E>
where
    P: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    /// Starts `config.workers` threads running `handler`.
    pub fn spawn<H>(config: DispatcherConfig, handler: H) -> Result<Self>
    where
        H: Fn(P) -> std::result::Result<R, E> + Send + Sync + 'static,
    {
        Self::spawn_with(config, handler, None, CancelToken::never())
    }

    /// Starts the pool with an optional rate limiter gating `submit` and a
    /// cancellation token the workers watch.
    pub fn spawn_with<H>(
        config: DispatcherConfig,
        handler: H,
        limiter: Option<Arc<RateLimiter>>,
        cancel: CancelToken,
    ) -> Result<Self>
    where
        H: Fn(P) -> std::result::Result<R, E> + Send + Sync + 'static,
    {
        config.validate()?;

        let (input, queue) = bounded(config.queue_capacity);
        let (results_tx, results) = bounded(config.result_capacity);
        let counters = Arc::new(PoolCounters::new());
        let shards = config.workers.next_power_of_two().clamp(4, 64);
        let in_flight = Arc::new(DashMap::with_capacity_and_hasher_and_shard_amount(
            config.workers,
            RandomState::new(),
            shards,
        ));
        let handler = Arc::new(handler);

        let mut workers = Vec::with_capacity(config.workers);
        for id in 1..=config.workers {
            let worker = Worker {
                id,
                jobs: queue.clone(),
                results: results_tx.clone(),
                counters: counters.clone(),
                in_flight: in_flight.clone(),
                cancel: cancel.clone(),
            };
            let handler = handler.clone();
            let name = format!("{}-{}", config.thread_name, id);
            // A failed spawn drops `input`, so the workers already running drain and exit.
            workers.push(spawn_named(name, move || worker.run(&*handler))?);
        }

        info!(
            "Started worker pool with {} workers (queue: {}, results: {})",
            config.workers, config.queue_capacity, config.result_capacity
        );

        Ok(Self {
            input: Mutex::new(Some(input)),
            queue,
            results,
            workers,
            counters,
            in_flight,
            next_id: AtomicU64::new(1),
            limiter,
            cancel,
            config,
        })
    }

    /// Enqueues `payload` under the next free id and returns that id.
    ///
    /// Blocks while the job queue is full, and first waits for a permit
    /// if the pool has a rate limiter.
    ///
    /// # Errors
    ///
    /// - [`ToolkitError::QueueClosed`] after [`close`](Self::close)
    /// - [`ToolkitError::Cancelled`] once the pool's cancel token has fired
    /// - [`ToolkitError::Stalled`] if both queues stay full with no job
    ///   finishing for `stall_timeout_ms`; the payload is dropped
    pub fn submit(&self, payload: P) -> Result<JobId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.submit_job(Job { id, payload })?;
        Ok(id)
    }

    /// Enqueues a job with a caller-chosen id.
    pub fn submit_job(&self, job: Job<P>) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ToolkitError::Cancelled);
        }
        let _submitting = SubmitGuard::enter(&self.counters.submitting);

        let sender = self
            .input
            .lock()
            .as_ref()
            .cloned()
            .ok_or(ToolkitError::QueueClosed)?;

        if let Some(limiter) = &self.limiter {
            let _permit = limiter.acquire_or_cancel(&self.cancel)?;
        }

        // Counted before the send so a worker can never finish a job the
        // counters do not know about yet.
        self.counters.submitted.fetch_add(1, Ordering::AcqRel);
        let sent = self.send_job(&sender, job);
        if sent.is_err() {
            self.counters.submitted.fetch_sub(1, Ordering::AcqRel);
        }
        sent
    }

    fn send_job(&self, sender: &Sender<Job<P>>, job: Job<P>) -> Result<()> {
        let slice = Duration::from_millis(self.config.stall_check_interval_ms);
        let stall_timeout = Duration::from_millis(self.config.stall_timeout_ms);
        let mut idle = Duration::ZERO;
        let mut last_finished = self.counters.finished();

        let mut sel = Select::new();
        let send_index = sel.send(sender);
        let cancel_index = sel.recv(self.cancel.signal());

        loop {
            match sel.select_timeout(slice) {
                Ok(oper) if oper.index() == send_index => {
                    return oper.send(sender, job).map_err(|_| ToolkitError::QueueClosed);
                }
                Ok(oper) => {
                    debug_assert_eq!(oper.index(), cancel_index);
                    let _ = oper.recv(self.cancel.signal());
                    return Err(ToolkitError::Cancelled);
                }
                Err(_) => {
                    let finished = self.counters.finished();
                    if self.results.is_full() && finished == last_finished {
                        idle += slice;
                        if idle >= stall_timeout {
                            warn!(
                                "Producer waited {:?} on full job and result queues; \
                                 are results being received?",
                                idle
                            );
                            return Err(ToolkitError::Stalled { waited: idle });
                        }
                    } else {
                        idle = Duration::ZERO;
                    }
                    last_finished = finished;
                }
            }
        }
    }

    /// Signals that no more jobs will be submitted.
    ///
    /// Workers finish everything already queued before they exit.
    ///
    /// # Errors
    ///
    /// [`ToolkitError::AlreadyClosed`] if the pool was closed before.
    pub fn close(&self) -> Result<()> {
        match self.input.lock().take() {
            Some(_) => {
                debug!(
                    "Job queue closed after {} submissions",
                    self.counters.submitted.load(Ordering::Relaxed)
                );
                Ok(())
            }
            None => Err(ToolkitError::AlreadyClosed),
        }
    }

    /// Returns true once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.input.lock().is_none()
    }

    /// Next result in completion order.
    ///
    /// Returns `Ok(None)` once the pool is closed and every worker has exited.
    ///
    /// # Errors
    ///
    /// [`ToolkitError::Stalled`] if the pool stays open with no outstanding
    /// work for `stall_timeout_ms`; nothing could ever arrive.
    pub fn recv(&self) -> Result<Option<JobResult<R, E>>> {
        let slice = Duration::from_millis(self.config.stall_check_interval_ms);
        let stall_timeout = Duration::from_millis(self.config.stall_timeout_ms);
        let mut idle = Duration::ZERO;

        loop {
            match self.results.recv_timeout(slice) {
                Ok(result) => return Ok(Some(result)),
                Err(RecvTimeoutError::Disconnected) => return Ok(None),
                Err(RecvTimeoutError::Timeout) => {
                    if self.is_idle_and_open() {
                        idle += slice;
                        if idle >= stall_timeout {
                            warn!(
                                "Consumer waited {:?} on an open pool with no outstanding jobs; \
                                 was close() forgotten?",
                                idle
                            );
                            return Err(ToolkitError::Stalled { waited: idle });
                        }
                    } else {
                        idle = Duration::ZERO;
                    }
                }
            }
        }
    }

    /// Waits at most `timeout` for the next result.
    ///
    /// `Ok(None)` means the pool is closed and drained.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<JobResult<R, E>>> {
        match self.results.recv_timeout(timeout) {
            Ok(result) => Ok(Some(result)),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
            Err(RecvTimeoutError::Timeout) => Err(ToolkitError::TimedOut(timeout)),
        }
    }

    /// Takes a result only if one is already waiting.
    pub fn try_recv(&self) -> Option<JobResult<R, E>> {
        self.results.try_recv().ok()
    }

    /// Iterates over results until the pool is drained. A stall ends the
    /// iteration after yielding the error.
    pub fn iter(&self) -> ResultIter<'_, P, R, E> {
        ResultIter {
            pool: self,
            done: false,
        }
    }

    fn is_idle_and_open(&self) -> bool {
        !self.is_closed()
            && !self.cancel.is_cancelled()
            && self.counters.submitting.load(Ordering::Acquire) == 0
            && self.counters.outstanding() == 0
            && self.queue.is_empty()
    }

    /// Jobs currently running, oldest first.
    pub fn in_flight(&self) -> Vec<InFlightJob> {
        let mut jobs: Vec<InFlightJob> = self
            .in_flight
            .iter()
            .map(|entry| *entry.value())
            .collect();
        jobs.sort_by_key(|job| job.started);
        jobs
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Snapshot of the pool's counters.
    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            workers: self.workers.len(),
            submitted: self.counters.submitted.load(Ordering::Acquire),
            succeeded: self.counters.succeeded.load(Ordering::Acquire),
            failed: self.counters.failed.load(Ordering::Acquire),
            abandoned: self.counters.abandoned.load(Ordering::Acquire),
            queued: self.queue.len(),
            in_flight: self.in_flight.len(),
        }
    }

    /// Closes the pool if still open, waits for every worker to exit and
    /// returns the final counters.
    ///
    /// Results nobody received are discarded. Jobs left in the queue after a
    /// cancellation are counted as abandoned.
    pub fn shutdown(mut self) -> DispatcherStats {
        let _ = self.close();

        // Workers block on a full result queue; keep it moving until they are gone.
        while self.results.recv().is_ok() {}

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("Worker thread panicked outside a job");
            }
        }

        let mut abandoned = 0u64;
        while self.queue.try_recv().is_ok() {
            abandoned += 1;
        }
        if abandoned > 0 {
            self.counters.abandoned.fetch_add(abandoned, Ordering::AcqRel);
        }

        let stats = DispatcherStats {
            workers: self.config.workers,
            ..self.stats()
        };
        info!("Worker pool shut down: {}", stats);
        stats
    }
}

impl<P, R, E> Drop for Dispatcher<P, R, E> {
    fn drop(&mut self) {
        // Workers exit once the queue drains or the result queue is dropped.
        self.input.lock().take();
    }
}

impl<P, R, E> std::fmt::Debug for Dispatcher<P, R, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.workers.len())
            .field("queued", &self.queue.len())
            .field("in_flight", &self.in_flight.len())
            .field("closed", &self.input.lock().is_none())
            .finish()
    }
}

/// Iterator returned by [`Dispatcher::iter`].
#[derive(Debug)]
pub struct ResultIter<'a, P, R, E> {
    pool: &'a Dispatcher<P, R, E>,
    done: bool,
}

impl<P, R, E> Iterator for ResultIter<'_, P, R, E>
where
    P: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    type Item = Result<JobResult<R, E>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.pool.recv() {
            Ok(Some(result)) => Some(Ok(result)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

struct Worker<P, R, E> {
    id: usize,
    jobs: Receiver<Job<P>>,
    results: Sender<JobResult<R, E>>,
    counters: Arc<PoolCounters>,
    in_flight: Arc<InFlightMap>,
    cancel: CancelToken,
}

impl<P, R, E> Worker<P, R, E> {
    fn run<H>(self, handler: &H)
    where
        H: Fn(P) -> std::result::Result<R, E>,
    {
        debug!("Worker {} started", self.id);
        let mut processed = 0u64;

        loop {
            let job = select! {
                recv(self.jobs) -> job => match job {
                    Ok(job) => job,
                    Err(_) => break,
                },
                recv(self.cancel.signal()) -> _ => break,
            };

            // Both branches may have been ready; cancellation wins.
            if self.cancel.is_cancelled() {
                self.counters.abandoned.fetch_add(1, Ordering::AcqRel);
                break;
            }

            let result = self.execute(handler, job);
            processed += 1;

            select! {
                send(self.results, result) -> sent => {
                    if sent.is_err() {
                        debug!("Worker {}: result receiver gone", self.id);
                        break;
                    }
                }
                recv(self.cancel.signal()) -> _ => break,
            }
        }

        debug!("Worker {} stopped after {} jobs", self.id, processed);
    }

    fn execute<H>(&self, handler: &H, job: Job<P>) -> JobResult<R, E>
    where
        H: Fn(P) -> std::result::Result<R, E>,
    {
        let Job { id, payload } = job;
        let started = Instant::now();
        self.in_flight.insert(
            id,
            InFlightJob {
                job_id: id,
                worker_id: self.id,
                started,
            },
        );

        let outcome = match catch_unwind(AssertUnwindSafe(|| handler(payload))) {
            Ok(Ok(value)) => {
                self.counters.succeeded.fetch_add(1, Ordering::AcqRel);
                Ok(value)
            }
            Ok(Err(err)) => {
                self.counters.failed.fetch_add(1, Ordering::AcqRel);
                Err(JobFailure::Failed(err))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!("Worker {}: job {} panicked: {}", self.id, id, message);
                self.counters.failed.fetch_add(1, Ordering::AcqRel);
                Err(JobFailure::Panicked(message))
            }
        };

        self.in_flight.remove(&id);

        JobResult {
            job_id: id,
            worker_id: self.id,
            outcome,
            elapsed: started.elapsed(),
        }
    }
}

/// Runs `handler` over every payload on a fresh pool and collects all results.
///
/// Results are returned in completion order.
///
/// ```rust
/// use corral::{process_all, DispatcherConfig};
///
/// let results = process_all(DispatcherConfig::with_workers(2), |s: &str| {
///     s.parse::<i32>().map_err(|e| e.to_string())
/// }, vec!["1", "x", "3"])
/// .unwrap();
///
/// assert_eq!(results.len(), 3);
/// assert_eq!(results.iter().filter(|r| r.is_success()).count(), 2);
/// ```
pub fn process_all<P, R, E, H, I>(
    config: DispatcherConfig,
    handler: H,
    payloads: I,
) -> Result<Vec<JobResult<R, E>>>
where
    P: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
    H: Fn(P) -> std::result::Result<R, E> + Send + Sync + 'static,
    I: IntoIterator<Item = P>,
{
    let pool = Dispatcher::spawn(config, handler)?;
    let mut results = Vec::new();

    // Collect while submitting so a small result queue never blocks the workers.
    for payload in payloads {
        pool.submit(payload)?;
        while let Some(result) = pool.try_recv() {
            results.push(result);
        }
    }
    pool.close()?;

    while let Some(result) = pool.recv()? {
        results.push(result);
    }
    Ok(results)
}
