//! # Configuration
//!
//! Settings for the three long-lived components. Each config is a plain struct
//! with public fields, a `Default`, a few named constructors and a `validate()`
//! that every component calls before it spawns anything.
//!
//! ## Token Bucket Parameters
//!
//! ```text
//!     LimiterConfig:
//!
//!     ┌──────────────────────────────┐
//!     │   burst (capacity B)         │ ← tokens that may be spent back-to-back
//!     │   ┌─────────────────────┐    │
//!     │   │ ● ● ●               │    │ ← pre-filled when `prefill` is set
//!     │   └─────────────────────┘    │
//!     │                              │
//!     │   interval_ms: 400           │ ← one token added per interval
//!     └──────────────────────────────┘
//! ```
//!
//! ## Worker Pool Parameters
//!
//! ```text
//!     submit ──► [ job queue: queue_capacity ] ──► workers ──► [ results: result_capacity ] ──► recv
//! ```

use super::error::{Result, ToolkitError};

/// Default number of jobs that can wait in the input queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default number of results that can wait for the consumer.
pub const DEFAULT_RESULT_CAPACITY: usize = 100;

/// Configuration for a token-bucket rate limiter.
///
/// ```rust
/// use corral::LimiterConfig;
///
/// // One request every 400ms, no burst
/// let fixed = LimiterConfig::fixed(400);
/// assert_eq!(fixed.burst, 1);
///
/// // Up to 3 back-to-back, then one every 400ms
/// let bursty = LimiterConfig::bursty(400, 3);
/// assert!(bursty.prefill);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterConfig {
    /// Milliseconds between two refills.
    pub interval_ms: u64,

    /// Capacity of the token buffer. Tokens arriving while it is full are discarded.
    pub burst: usize,

    /// Whether the buffer starts full. A fixed-rate limiter starts empty,
    /// so its first permit arrives one interval after creation.
    pub prefill: bool,
}

impl Default for LimiterConfig {
    /// Ten permits per second, no burst.
    fn default() -> Self {
        Self::fixed(100)
    }
}

impl LimiterConfig {
    /// One token per `interval_ms` into a capacity-1 buffer that starts empty.
    pub fn fixed(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            burst: 1,
            prefill: false,
        }
    }

    /// A buffer of `burst` tokens, pre-filled, topped up by one per `interval_ms`.
    pub fn bursty(interval_ms: u64, burst: usize) -> Self {
        Self {
            interval_ms,
            burst,
            prefill: true,
        }
    }

    /// Fixed-rate limiting expressed as permits per second.
    ///
    /// A rate of zero produces an interval of zero, which `validate` rejects.
    ///
    /// ```rust
    /// use corral::LimiterConfig;
    ///
    /// assert_eq!(LimiterConfig::per_second(4).interval_ms, 250);
    /// assert!(LimiterConfig::per_second(0).validate().is_err());
    /// ```
    pub fn per_second(permits: u32) -> Self {
        let interval_ms = if permits == 0 {
            0
        } else {
            (1000 / permits as u64).max(1)
        };
        Self::fixed(interval_ms)
    }

    /// Sets the burst capacity and pre-fills the buffer.
    pub fn with_burst(mut self, burst: usize) -> Self {
        self.burst = burst;
        self.prefill = true;
        self
    }

    /// Checks that the interval and capacity are usable.
    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(ToolkitError::InvalidConfig("interval_ms must be greater than 0"));
        }
        if self.burst == 0 {
            return Err(ToolkitError::InvalidConfig("burst must be greater than 0"));
        }
        Ok(())
    }

    /// Sustained permits per second once the initial burst is spent.
    pub fn effective_rate_per_second(&self) -> f64 {
        if self.interval_ms == 0 {
            0.0
        } else {
            1000.0 / self.interval_ms as f64
        }
    }

    /// Upper bound on permits granted over a window of `window_ms`:
    /// `floor(window / interval) + burst`.
    pub fn max_permits_in(&self, window_ms: u64) -> u64 {
        if self.interval_ms == 0 {
            return u64::MAX;
        }
        (window_ms / self.interval_ms).saturating_add(self.burst as u64)
    }
}

/// Configuration for a worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Number of worker threads. Must be at least 1.
    pub workers: usize,

    /// Capacity of the job queue. `submit` blocks while it is full.
    pub queue_capacity: usize,

    /// Capacity of the result queue. Workers block while it is full.
    pub result_capacity: usize,

    /// How long `recv` tolerates an open, idle pool before reporting a stall.
    pub stall_timeout_ms: u64,

    /// Slice length `recv` waits before re-checking for a stall.
    pub stall_check_interval_ms: u64,

    /// Prefix for worker thread names; workers are named `{prefix}-{id}`.
    pub thread_name: String,
}

impl Default for DispatcherConfig {
    /// One worker per available core, 100-slot queues, 5s stall timeout.
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            workers,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            result_capacity: DEFAULT_RESULT_CAPACITY,
            stall_timeout_ms: 5_000,
            stall_check_interval_ms: 50,
            thread_name: "corral-worker".to_string(),
        }
    }
}

impl DispatcherConfig {
    /// Default settings with an explicit worker count.
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Default::default()
        }
    }

    /// Checks worker count, capacities and stall timings.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ToolkitError::InvalidConfig("workers must be greater than 0"));
        }
        if self.queue_capacity == 0 {
            return Err(ToolkitError::InvalidConfig("queue_capacity must be greater than 0"));
        }
        if self.result_capacity == 0 {
            return Err(ToolkitError::InvalidConfig("result_capacity must be greater than 0"));
        }
        if self.stall_check_interval_ms == 0 {
            return Err(ToolkitError::InvalidConfig(
                "stall_check_interval_ms must be greater than 0",
            ));
        }
        if self.stall_timeout_ms < self.stall_check_interval_ms {
            return Err(ToolkitError::InvalidConfig(
                "stall_timeout_ms must not be shorter than stall_check_interval_ms",
            ));
        }
        Ok(())
    }
}

/// Configuration for a state actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorConfig {
    /// Capacity of the read and write inboxes. Zero makes them rendezvous
    /// channels: a sender blocks until the actor takes the message.
    pub inbox_capacity: usize,

    /// Name of the actor thread.
    pub thread_name: String,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: 0,
            thread_name: "corral-state".to_string(),
        }
    }
}

impl ActorConfig {
    /// Default settings with buffered inboxes.
    pub fn buffered(inbox_capacity: usize) -> Self {
        Self {
            inbox_capacity,
            ..Default::default()
        }
    }

    /// Checks the thread name.
    pub fn validate(&self) -> Result<()> {
        if self.thread_name.is_empty() {
            return Err(ToolkitError::InvalidConfig("thread_name must not be empty"));
        }
        Ok(())
    }
}
