//! # Coordination Module
//!
//! Internal implementation of the four coordination components and the
//! pieces they share.
//!
//! ## Module Structure
//!
//! ```text
//!     coordination/
//!     ├── mod.rs          (You are here - Module organization)
//!     ├── config.rs       (Settings and validation)
//!     ├── error.rs        (ToolkitError and JobFailure)
//!     ├── select.rs       (Multi-way waits, timeouts, cancellation)
//!     ├── limiter.rs      (Channel-backed token bucket)
//!     ├── pool.rs         (Worker pool)
//!     ├── actor.rs        (Single-owner state)
//!     ├── state.rs        (StateStore trait and the mutex backend)
//!     ├── metrics.rs      (Snapshots and health)
//!     └── utils.rs        (Thread spawning, cache alignment)
//! ```
//!
//! ## Dependency Flow
//!
//! ```text
//!     ┌──────────┐   ┌──────────┐   ┌──────────┐
//!     │   pool   │   │  state   │   │          │
//!     └──┬────┬──┘   └────┬─────┘   │          │
//!        │    │           ▼         │          │
//!        │    │      ┌──────────┐   │ metrics  │
//!        │    │      │  actor   │   │  config  │
//!        │    ▼      └──────────┘   │  error   │
//!        │ ┌──────────┐             │  utils   │
//!        │ │ limiter  │             │          │
//!        │ └────┬─────┘             │          │
//!        ▼      ▼                   │          │
//!     ┌─────────────┐               │          │
//!     │   select    │               │          │
//!     └─────────────┘               └──────────┘
//! ```
//!
//! ## Component Responsibilities
//!
//! - **select**: racing a source against a deadline or a cancel signal
//! - **limiter**: handing out permits at a steady rate with optional burst
//! - **pool**: running one handler over many jobs on a fixed set of threads
//! - **actor / state**: sharing a map without letting two threads touch it at once

mod actor;
mod config;
mod error;
mod limiter;
mod metrics;
mod pool;
mod select;
mod state;
mod utils;

/// Settings for every component
pub use config::{
    ActorConfig, DispatcherConfig, LimiterConfig, DEFAULT_QUEUE_CAPACITY, DEFAULT_RESULT_CAPACITY,
};

/// Error types
pub use error::{JobFailure, Result, ToolkitError};

/// Multi-way waits and cancellation
pub use select::{
    offer, poll, recv_or_cancel, recv_timeout, recv_with, run_with_timeout, CancelSource,
    CancelToken, Outcome, Selected, Selector,
};

/// Token-bucket rate limiting
pub use limiter::{RateLimiter, Token};

/// Worker pool
pub use pool::{process_all, Dispatcher, InFlightJob, Job, JobId, JobResult, ResultIter};

/// Single-owner state
pub use actor::{ReadOp, StateActor, StateHandle, WriteOp};

/// Swappable state backends
pub use state::{LockedState, StateStore};

/// Snapshots and health monitoring
pub use metrics::{DispatcherStats, HealthStatus, RateLimiterMetrics, StateStats};

/// Cache line size of the target architecture
pub use utils::CACHE_LINE_SIZE;
