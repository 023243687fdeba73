//! # Corral - Thread Coordination Toolkit for Rust
//!
//! A small set of building blocks for programs that run many threads and need
//! them to cooperate: hand work to a pool, share state without data races,
//! pace requests, and wait on several things at once.
//!
//! Everything is built on message passing over bounded channels. Threads
//! block only themselves; no component ever busy-waits.
//!
//! ## The Components
//!
//! ```text
//!     ┌────────────────────┐   ┌────────────────────┐
//!     │     Dispatcher     │   │     StateActor     │
//!     │  jobs ─► W workers │   │  one owner thread  │
//!     │  ─► results        │   │  reads | writes    │
//!     └─────────┬──────────┘   └────────────────────┘
//!               │ optional gate
//!     ┌─────────▼──────────┐   ┌────────────────────┐
//!     │    RateLimiter     │   │  Selector / recv_* │
//!     │  fixed or bursty   │   │  one ready wins    │
//!     └────────────────────┘   └────────────────────┘
//! ```
//!
//! - **Dispatcher** - a worker pool. Submit jobs, close, collect results until
//!   the terminal `None`.
//! - **StateActor** - a map owned by one thread; other threads read and write
//!   it through request messages.
//! - **RateLimiter** - permits arriving at a fixed interval, optionally with a
//!   pre-filled burst.
//! - **Selector** and `recv_with` - multi-way waits with timeouts and
//!   cancellation.
//!
//! ## Quick Start
//!
//! ### Worker Pool
//!
//! ```rust
//! use corral::DispatcherBuilder;
//!
//! let pool = DispatcherBuilder::new()
//!     .workers(3)
//!     .spawn(|job: u32| Ok::<_, String>(job * 2))
//!     .unwrap();
//!
//! for job in 1..=10 {
//!     pool.submit(job).unwrap();
//! }
//! pool.close().unwrap();
//!
//! let total: u32 = pool.iter().filter_map(|r| r.ok()?.value().copied()).sum();
//! assert_eq!(total, 110);
//! ```
//!
//! ### Bursty Rate Limiting
//!
//! ```rust
//! use corral::RateLimiter;
//! use std::time::{Duration, Instant};
//!
//! let limiter = RateLimiter::bursty(200, 3).unwrap();
//! let start = Instant::now();
//!
//! for _ in 0..3 {
//!     let _permit = limiter.acquire().unwrap();
//! }
//! assert!(start.elapsed() < Duration::from_millis(150));
//! ```
//!
//! ### Stateful Thread
//!
//! ```rust
//! use corral::{ActorConfig, StateActor};
//!
//! let actor = StateActor::<&str, i32>::spawn(ActorConfig::default()).unwrap();
//! let handle = actor.handle();
//!
//! std::thread::spawn(move || handle.write("answer", 42).unwrap())
//!     .join()
//!     .unwrap();
//!
//! assert_eq!(actor.read("answer").unwrap(), Some(42));
//! ```
//!
//! ### Timeouts
//!
//! ```rust
//! use corral::{run_with_timeout, Outcome};
//! use std::time::Duration;
//!
//! let outcome = run_with_timeout(
//!     || {
//!         std::thread::sleep(Duration::from_millis(200));
//!         "slow"
//!     },
//!     Duration::from_millis(20),
//! )
//! .unwrap();
//!
//! assert_eq!(outcome, Outcome::TimedOut);
//! ```
//!
//! ## Thread Safety
//!
//! - `RateLimiter` - share via `Arc<RateLimiter>`
//! - `Dispatcher` - `submit` and `recv` take `&self`; share via `Arc` to
//!   submit from several threads
//! - `StateHandle` - clone one per thread
//! - `CancelToken` - clone one per waiter
//!
//! ## Logging
//!
//! Components emit `tracing` events (pool start and shutdown at `info`,
//! worker and refill lifecycle at `debug`, stalls and caught panics at
//! `warn`). Install any subscriber to see them.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    missing_debug_implementations
)]
#![forbid(unsafe_code)]

// Internal module
mod coordination;

// Public re-exports
pub use coordination::{
    offer, poll, process_all, recv_or_cancel, recv_timeout, recv_with, run_with_timeout,
    ActorConfig, CancelSource, CancelToken, Dispatcher, DispatcherConfig, DispatcherStats,
    HealthStatus, InFlightJob, Job, JobFailure, JobId, JobResult, LimiterConfig, LockedState,
    Outcome, RateLimiter, RateLimiterMetrics, ReadOp, Result, ResultIter, Selected, Selector,
    StateActor, StateHandle, StateStats, StateStore, Token, ToolkitError, WriteOp,
    CACHE_LINE_SIZE, DEFAULT_QUEUE_CAPACITY, DEFAULT_RESULT_CAPACITY,
};

use std::sync::Arc;

/// A rate limiter wrapped in `Arc` for sharing between producers.
///
/// # Example
/// ```rust
/// use corral::{RateLimiter, SharedRateLimiter};
/// use std::sync::Arc;
///
/// let shared: SharedRateLimiter = Arc::new(RateLimiter::bursty(100, 2).unwrap());
///
/// let limiter = shared.clone();
/// std::thread::spawn(move || limiter.try_acquire().is_some())
///     .join()
///     .unwrap();
/// ```
pub type SharedRateLimiter = Arc<RateLimiter>;

/// Version information for the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Minimum supported Rust version.
///
/// `let ... else` and `AtomicU64::fetch_max` set the floor.
pub const MSRV: &str = "1.70.0";

/// Prelude module for convenient imports.
///
/// ```rust
/// use corral::prelude::*;
/// ```
pub mod prelude {
    //! Common imports for typical coordination code.
    //!
    //! # Example
    //! ```rust
    //! use corral::prelude::*;
    //!
    //! let limiter = RateLimiter::fixed(100).unwrap();
    //! let config = DispatcherConfig::with_workers(2);
    //! let status = HealthStatus::Healthy;
    //! ```

    pub use crate::{
        ActorConfig, CancelSource, CancelToken, Dispatcher, DispatcherBuilder, DispatcherConfig,
        HealthStatus, JobFailure, JobResult, LimiterConfig, LockedState, Outcome, RateLimiter,
        Selected, Selector, SharedRateLimiter, StateActor, StateHandle, StateStore, ToolkitError,
    };
}

/// Builder for worker pools.
///
/// Wraps a [`DispatcherConfig`] plus the optional rate limiter and
/// cancellation token, and validates everything when the pool is spawned.
///
/// # Example
///
/// ```rust
/// use corral::{CancelSource, DispatcherBuilder, RateLimiter};
/// use std::sync::Arc;
///
/// let cancel = CancelSource::new();
/// let pool = DispatcherBuilder::new()
///     .workers(4)
///     .queue_capacity(16)
///     .rate_limiter(Arc::new(RateLimiter::bursty(10, 8).unwrap()))
///     .cancel_token(cancel.token())
///     .thread_name("fetcher")
///     .spawn(|url: String| Ok::<_, String>(url.len()))
///     .unwrap();
///
/// pool.submit("https://example.com".to_string()).unwrap();
/// pool.close().unwrap();
/// assert_eq!(pool.iter().count(), 1);
///
/// // Invalid settings are rejected
/// let invalid = DispatcherBuilder::new()
///     .workers(0)
///     .spawn(|n: u8| Ok::<_, ()>(n));
/// assert!(invalid.is_err());
/// ```
#[derive(Debug, Clone)]
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    limiter: Option<Arc<RateLimiter>>,
    cancel: Option<CancelToken>,
}

impl DispatcherBuilder {
    /// Creates a builder with [`DispatcherConfig::default`].
    pub fn new() -> Self {
        Self {
            config: DispatcherConfig::default(),
            limiter: None,
            cancel: None,
        }
    }

    /// Starts from an existing configuration.
    pub fn from_config(config: DispatcherConfig) -> Self {
        Self {
            config,
            ..Self::new()
        }
    }

    /// Sets the number of worker threads (must be > 0).
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Sets how many jobs may wait in the input queue.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Sets how many results may wait for the consumer.
    pub fn result_capacity(mut self, capacity: usize) -> Self {
        self.config.result_capacity = capacity;
        self
    }

    /// Sets how long `recv` tolerates an open, idle pool before reporting
    /// a stall.
    pub fn stall_timeout_ms(mut self, ms: u64) -> Self {
        self.config.stall_timeout_ms = ms;
        self
    }

    /// Gates `submit` on a shared rate limiter.
    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Lets the workers be stopped early through `token`.
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Sets the worker thread name prefix.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    /// The configuration built so far.
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Validates the configuration and starts the pool.
    ///
    /// # Errors
    ///
    /// [`ToolkitError::InvalidConfig`] for unusable settings, or
    /// [`ToolkitError::Spawn`] if a worker thread cannot be started.
    pub fn spawn<P, R, E, H>(self, handler: H) -> Result<Dispatcher<P, R, E>>
    where
        P: Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
        H: Fn(P) -> std::result::Result<R, E> + Send + Sync + 'static,
    {
        Dispatcher::spawn_with(
            self.config,
            handler,
            self.limiter,
            self.cancel.unwrap_or_else(CancelToken::never),
        )
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_basic_functionality() {
        let pool = DispatcherBuilder::new()
            .workers(2)
            .spawn(|n: u64| Ok::<_, ()>(n + 1))
            .unwrap();

        for n in 0..10 {
            pool.submit(n).unwrap();
        }
        pool.close().unwrap();

        let results: Vec<_> = pool.iter().map(|r| r.unwrap()).collect();
        assert_eq!(results.len(), 10);

        let stats = pool.stats();
        assert_eq!(stats.submitted, 10);
        assert_eq!(stats.succeeded, 10);
    }

    #[test]
    fn test_builder() {
        let builder = DispatcherBuilder::new()
            .workers(3)
            .queue_capacity(8)
            .result_capacity(4)
            .stall_timeout_ms(1_000)
            .thread_name("test-pool");

        let config = builder.config();
        assert_eq!(config.workers, 3);
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.result_capacity, 4);
        assert_eq!(config.stall_timeout_ms, 1_000);
        assert_eq!(config.thread_name, "test-pool");

        let pool = builder.spawn(|n: u8| Ok::<_, ()>(n)).unwrap();
        assert_eq!(pool.workers(), 3);
    }

    #[test]
    fn test_builder_validation() {
        let result = DispatcherBuilder::new()
            .queue_capacity(0)
            .spawn(|n: u8| Ok::<_, ()>(n));

        assert!(matches!(result, Err(ToolkitError::InvalidConfig(_))));
    }

    #[test]
    fn test_worker_thread_names() {
        let pool = DispatcherBuilder::new()
            .workers(2)
            .thread_name("named")
            .spawn(|_: ()| Ok::<_, ()>(thread::current().name().map(str::to_string)))
            .unwrap();

        for _ in 0..4 {
            pool.submit(()).unwrap();
        }
        pool.close().unwrap();

        for result in pool.iter() {
            let name = result.unwrap().outcome.unwrap().unwrap();
            assert!(name == "named-1" || name == "named-2", "unexpected name {}", name);
        }
    }

    #[test]
    fn test_builder_with_cancel() {
        let cancel = CancelSource::new();
        let pool = DispatcherBuilder::new()
            .workers(1)
            .cancel_token(cancel.token())
            .spawn(|n: u8| Ok::<_, ()>(n))
            .unwrap();

        cancel.cancel();
        assert_eq!(pool.submit(1), Err(ToolkitError::Cancelled));
        assert_eq!(pool.recv_timeout(Duration::from_secs(2)).unwrap(), None);
    }

    #[test]
    fn test_prelude_imports() {
        use crate::prelude::*;

        let _limiter = RateLimiter::fixed(50).unwrap();
        let _config = LimiterConfig::default();
        let _state: LockedState<u8, u8> = LockedState::new();
        let _status = HealthStatus::Healthy;
    }

    #[test]
    fn test_shared_types() {
        let shared: SharedRateLimiter = Arc::new(RateLimiter::bursty(1_000, 2).unwrap());
        let clone = shared.clone();

        let granted = thread::spawn(move || clone.try_acquire().is_some())
            .join()
            .unwrap();
        assert!(granted);
        assert_eq!(shared.available(), 1);
    }

    #[test]
    fn test_constants() {
        assert!(!VERSION.is_empty());
        assert_eq!(MSRV, "1.70.0");
    }

    #[test]
    fn test_builder_default() {
        let builder = DispatcherBuilder::default();
        assert!(builder.config().validate().is_ok());
    }
}
