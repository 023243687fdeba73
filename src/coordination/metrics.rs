//! # Metrics and Health
//!
//! Point-in-time snapshots for each component, built from atomic counters
//! the components bump as they work. Snapshots are plain values: cheap to
//! copy around, log, or assert on.
//!
//! ```text
//!     RateLimiter  ──► RateLimiterMetrics  ──┐
//!     Dispatcher   ──► DispatcherStats     ──┼──► HealthStatus
//!     StateStore   ──► StateStats            │
//!                                            └──► summary() / Display
//! ```

use std::fmt;

/// Snapshot of a rate limiter's activity.
///
/// ```rust
/// use corral::RateLimiter;
///
/// let limiter = RateLimiter::bursty(1_000, 3).unwrap();
/// limiter.acquire().unwrap();
///
/// let metrics = limiter.metrics();
/// assert_eq!(metrics.total_acquired, 1);
/// assert_eq!(metrics.capacity, 3);
/// println!("{}", metrics.summary());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterMetrics {
    /// Tokens handed out by any acquire variant.
    pub total_acquired: u64,

    /// Non-blocking attempts that found the buffer empty, plus bounded
    /// waits that gave up.
    pub total_rejected: u64,

    /// Tokens placed in the buffer, including the initial fill.
    pub tokens_issued: u64,

    /// Refill ticks dropped because the buffer was already full.
    pub tokens_discarded: u64,

    /// Tokens waiting in the buffer right now.
    pub current_tokens: u64,

    /// Buffer capacity (the burst size).
    pub capacity: u64,

    /// Longest time a caller spent blocked in an acquire, in nanoseconds.
    pub max_wait_time_ns: u64,
}

impl RateLimiterMetrics {
    /// Fraction of acquisition attempts that got a token (1.0 when idle).
    #[inline]
    pub fn success_rate(&self) -> f64 {
        let total = self.total_acquired + self.total_rejected;
        if total == 0 {
            1.0
        } else {
            self.total_acquired as f64 / total as f64
        }
    }

    /// Fraction of acquisition attempts that came back empty-handed.
    #[inline]
    pub fn rejection_rate(&self) -> f64 {
        1.0 - self.success_rate()
    }

    /// How much of the buffer is spent: 0.0 full, 1.0 empty.
    #[inline]
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            1.0 - (self.current_tokens as f64 / self.capacity as f64)
        }
    }

    /// Fraction of refill ticks that were thrown away. A high value means the
    /// limiter is mostly idle.
    #[inline]
    pub fn discard_ratio(&self) -> f64 {
        let ticks = self.tokens_issued + self.tokens_discarded;
        if ticks == 0 {
            0.0
        } else {
            self.tokens_discarded as f64 / ticks as f64
        }
    }

    /// Longest blocked acquire in milliseconds.
    #[inline]
    pub fn max_wait_time_ms(&self) -> f64 {
        self.max_wait_time_ns as f64 / 1_000_000.0
    }

    /// The buffer is empty or most attempts fail.
    #[inline]
    pub fn is_under_pressure(&self) -> bool {
        self.current_tokens == 0 || self.success_rate() < 0.5
    }

    /// More than 30% of attempts are being turned away.
    #[inline]
    pub fn is_under_sustained_pressure(&self) -> bool {
        self.rejection_rate() > 0.3
    }

    /// Three-level assessment of the limiter.
    pub fn health_status(&self) -> HealthStatus {
        if self.is_under_sustained_pressure() {
            HealthStatus::Critical
        } else if self.is_under_pressure() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Multi-line report suitable for logs.
    pub fn summary(&self) -> String {
        format!(
            "RateLimiter Metrics:\n\
             ├─ Permits:\n\
             │  ├─ Acquired: {}\n\
             │  ├─ Rejected: {}\n\
             │  └─ Max Wait Time: {:.3}ms\n\
             ├─ Buffer:\n\
             │  ├─ Tokens: {}/{}\n\
             │  ├─ Issued: {}\n\
             │  └─ Discarded: {} ({:.2}%)\n\
             └─ Health: {:?}",
            self.total_acquired,
            self.total_rejected,
            self.max_wait_time_ms(),
            self.current_tokens,
            self.capacity,
            self.tokens_issued,
            self.tokens_discarded,
            self.discard_ratio() * 100.0,
            self.health_status(),
        )
    }
}

impl fmt::Display for RateLimiterMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

/// Snapshot of a worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Worker threads started.
    pub workers: usize,

    /// Jobs accepted by `submit`.
    pub submitted: u64,

    /// Jobs whose handler returned `Ok`.
    pub succeeded: u64,

    /// Jobs whose handler returned `Err` or panicked.
    pub failed: u64,

    /// Jobs left in the queue when the pool was cancelled.
    pub abandoned: u64,

    /// Jobs waiting in the queue.
    pub queued: usize,

    /// Jobs currently inside a handler.
    pub in_flight: usize,
}

impl DispatcherStats {
    /// Jobs that reached a terminal state.
    #[inline]
    pub fn finished(&self) -> u64 {
        self.succeeded + self.failed + self.abandoned
    }

    /// Jobs submitted but not yet finished.
    #[inline]
    pub fn outstanding(&self) -> u64 {
        self.submitted.saturating_sub(self.finished())
    }

    /// Fraction of processed jobs that failed.
    #[inline]
    pub fn failure_rate(&self) -> f64 {
        let processed = self.succeeded + self.failed;
        if processed == 0 {
            0.0
        } else {
            self.failed as f64 / processed as f64
        }
    }

    /// Healthy below 10% failures, critical above 50% or after any abandonment.
    pub fn health_status(&self) -> HealthStatus {
        let rate = self.failure_rate();
        if rate > 0.5 || self.abandoned > 0 {
            HealthStatus::Critical
        } else if rate > 0.1 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Multi-line report suitable for logs.
    pub fn summary(&self) -> String {
        format!(
            "Dispatcher Stats:\n\
             ├─ Workers: {}\n\
             ├─ Jobs:\n\
             │  ├─ Submitted: {}\n\
             │  ├─ Succeeded: {}\n\
             │  ├─ Failed: {} ({:.2}%)\n\
             │  └─ Abandoned: {}\n\
             ├─ Backlog:\n\
             │  ├─ Queued: {}\n\
             │  └─ In Flight: {}\n\
             └─ Health: {:?}",
            self.workers,
            self.submitted,
            self.succeeded,
            self.failed,
            self.failure_rate() * 100.0,
            self.abandoned,
            self.queued,
            self.in_flight,
            self.health_status(),
        )
    }
}

impl fmt::Display for DispatcherStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

/// Read/write counters of a state store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateStats {
    /// Acknowledged reads.
    pub reads: u64,
    /// Acknowledged writes.
    pub writes: u64,
}

impl StateStats {
    /// Reads plus writes.
    pub fn total_ops(&self) -> u64 {
        self.reads + self.writes
    }
}

impl fmt::Display for StateStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reads: {}, writes: {}", self.reads, self.writes)
    }
}

/// Health indicator shared by the component snapshots.
///
/// ```text
///     Healthy ──────► normal operation
///        │
///     Degraded ─────► some pressure, monitor closely
///        │
///     Critical ─────► intervention needed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Operating normally.
    Healthy,
    /// Under some pressure but functional.
    Degraded,
    /// Under severe pressure or losing work.
    Critical,
}

impl HealthStatus {
    /// Returns true for anything but `Healthy`.
    pub fn is_unhealthy(&self) -> bool {
        !matches!(self, Self::Healthy)
    }

    /// Operator guidance for the status.
    pub fn suggested_action(&self) -> &'static str {
        match self {
            Self::Healthy => "No action needed",
            Self::Degraded => "Monitor closely, consider adding capacity",
            Self::Critical => "Immediate action required: reduce load or inspect failures",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter_metrics() -> RateLimiterMetrics {
        RateLimiterMetrics {
            total_acquired: 80,
            total_rejected: 20,
            tokens_issued: 90,
            tokens_discarded: 10,
            current_tokens: 1,
            capacity: 4,
            max_wait_time_ns: 2_500_000,
        }
    }

    fn dispatcher_stats() -> DispatcherStats {
        DispatcherStats {
            workers: 3,
            submitted: 10,
            succeeded: 6,
            failed: 0,
            abandoned: 0,
            queued: 2,
            in_flight: 2,
        }
    }

    #[test]
    fn test_limiter_rates() {
        let metrics = limiter_metrics();
        assert_eq!(metrics.success_rate(), 0.8);
        assert!((metrics.rejection_rate() - 0.2).abs() < 1e-9);
        assert_eq!(metrics.utilization(), 0.75);
        assert_eq!(metrics.discard_ratio(), 0.1);
        assert_eq!(metrics.max_wait_time_ms(), 2.5);
        assert_eq!(metrics.health_status(), HealthStatus::Healthy);
    }

    #[test]
    fn test_limiter_health_levels() {
        let empty = RateLimiterMetrics {
            current_tokens: 0,
            ..limiter_metrics()
        };
        assert_eq!(empty.health_status(), HealthStatus::Degraded);

        let starved = RateLimiterMetrics {
            total_acquired: 10,
            total_rejected: 90,
            ..limiter_metrics()
        };
        assert_eq!(starved.health_status(), HealthStatus::Critical);
        assert!(starved.health_status().is_unhealthy());
    }

    #[test]
    fn test_limiter_idle_defaults() {
        let idle = RateLimiterMetrics {
            total_acquired: 0,
            total_rejected: 0,
            tokens_issued: 0,
            tokens_discarded: 0,
            current_tokens: 0,
            capacity: 0,
            max_wait_time_ns: 0,
        };
        assert_eq!(idle.success_rate(), 1.0);
        assert_eq!(idle.utilization(), 0.0);
        assert_eq!(idle.discard_ratio(), 0.0);
    }

    #[test]
    fn test_limiter_summary() {
        let summary = limiter_metrics().to_string();
        assert!(summary.contains("Acquired: 80"));
        assert!(summary.contains("Tokens: 1/4"));
        assert!(summary.contains("Health: Healthy"));
    }

    #[test]
    fn test_dispatcher_counts() {
        let stats = dispatcher_stats();
        assert_eq!(stats.finished(), 6);
        assert_eq!(stats.outstanding(), 4);
        assert_eq!(stats.failure_rate(), 0.0);
        assert_eq!(stats.health_status(), HealthStatus::Healthy);
        assert!(stats.summary().contains("In Flight: 2"));
    }

    #[test]
    fn test_dispatcher_health_levels() {
        let some_failures = DispatcherStats {
            succeeded: 8,
            failed: 2,
            ..dispatcher_stats()
        };
        assert_eq!(some_failures.health_status(), HealthStatus::Degraded);

        let abandoned = DispatcherStats {
            abandoned: 1,
            ..dispatcher_stats()
        };
        assert_eq!(abandoned.health_status(), HealthStatus::Critical);
    }

    #[test]
    fn test_state_stats() {
        let stats = StateStats { reads: 7, writes: 3 };
        assert_eq!(stats.total_ops(), 10);
        assert_eq!(stats.to_string(), "reads: 7, writes: 3");
    }

    #[test]
    fn test_health_status_helpers() {
        assert!(!HealthStatus::Healthy.is_unhealthy());
        assert_eq!(HealthStatus::Healthy.suggested_action(), "No action needed");
        assert!(HealthStatus::Critical.suggested_action().contains("Immediate"));
    }
}
