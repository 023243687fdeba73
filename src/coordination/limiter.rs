//! # Token-Bucket Rate Limiter
//!
//! Permits are real values travelling through a bounded channel. A background
//! refill thread drops one [`Token`] into the buffer every interval; callers
//! take one out before doing rate-limited work.
//!
//! ```text
//!     refill thread                      buffer (capacity B)          callers
//!
//!     tick ──► try_send ──► room? ──yes──► [ ● ● ● ] ──► acquire() ──► Token
//!                             │
//!                             no
//!                             ▼
//!                          discard (never queued unbounded)
//! ```
//!
//! ## Variants
//!
//! - **Fixed-rate**: capacity 1, starts empty. Two acquisitions complete at
//!   least one interval apart, and the first one waits a full interval.
//! - **Bursty**: capacity B, starts full. Up to B callers proceed back-to-back,
//!   then throughput settles at one per interval.
//!
//! Over any window of `T` milliseconds at most `floor(T / interval) + B`
//! acquisitions complete.

use super::config::LimiterConfig;
use super::error::{Result, ToolkitError};
use super::metrics::RateLimiterMetrics;
use super::select::{recv_with, CancelSource, CancelToken, Outcome};
use super::utils::{saturating_nanos, spawn_named};
use crossbeam_channel::{bounded, select, tick, Receiver, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Permission to proceed.
///
/// A token is moved out of the limiter's buffer when it is acquired. It is
/// neither `Clone` nor `Copy`, so the same permit can never be spent twice.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a token is the permit to proceed; dropping it unused wastes a slot"]
pub struct Token {
    issued_at: Instant,
}

impl Token {
    /// When the token was placed in the buffer.
    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    /// How long the token sat in the buffer before being looked at.
    pub fn age(&self) -> Duration {
        self.issued_at.elapsed()
    }
}

#[derive(Debug, Default)]
struct LimiterCounters {
    acquired: AtomicU64,
    rejected: AtomicU64,
    issued: AtomicU64,
    discarded: AtomicU64,
    max_wait_ns: AtomicU64,
}

/// Blocking token-bucket rate limiter.
///
/// ## Example
///
/// ```rust
/// use corral::RateLimiter;
///
/// // 3 requests may go immediately, then one every 50ms
/// let limiter = RateLimiter::bursty(50, 3).unwrap();
///
/// for request in 1..=5 {
///     let _permit = limiter.acquire().unwrap();
///     println!("request {request}");
/// }
/// ```
///
/// The refill thread is stopped and joined when the limiter is dropped.
/// Share a limiter across threads with `Arc<RateLimiter>`.
pub struct RateLimiter {
    tokens: Receiver<Token>,
    counters: Arc<LimiterCounters>,
    config: LimiterConfig,
    stop: CancelSource,
    refill: Option<JoinHandle<()>>,
}

impl RateLimiter {
    /// One permit every `interval_ms`, no burst. The first permit arrives
    /// one interval after creation.
    pub fn fixed(interval_ms: u64) -> Result<Self> {
        Self::with_config(LimiterConfig::fixed(interval_ms))
    }

    /// `burst` permits available immediately, then one every `interval_ms`.
    pub fn bursty(interval_ms: u64, burst: usize) -> Result<Self> {
        Self::with_config(LimiterConfig::bursty(interval_ms, burst))
    }

    /// Builds a limiter from a validated configuration and starts its refill thread.
    pub fn with_config(config: LimiterConfig) -> Result<Self> {
        config.validate()?;

        let (tx, tokens) = bounded(config.burst);
        let counters = Arc::new(LimiterCounters::default());

        if config.prefill {
            let now = Instant::now();
            for _ in 0..config.burst {
                if tx.try_send(Token { issued_at: now }).is_err() {
                    break;
                }
                counters.issued.fetch_add(1, Ordering::Relaxed);
            }
        }

        let stop = CancelSource::new();
        let refill = spawn_named("corral-refill", {
            let interval = Duration::from_millis(config.interval_ms);
            let stop = stop.token();
            let counters = counters.clone();
            move || refill_loop(tx, interval, stop, counters)
        })?;

        debug!(
            "Started rate limiter (interval: {}ms, burst: {}, prefilled: {})",
            config.interval_ms, config.burst, config.prefill
        );

        Ok(Self {
            tokens,
            counters,
            config,
            stop,
            refill: Some(refill),
        })
    }

    /// Blocks until a token is available and takes it.
    ///
    /// # Errors
    ///
    /// [`ToolkitError::LimiterStopped`] if the refill thread died and the
    /// buffer is empty; no token would ever arrive.
    pub fn acquire(&self) -> Result<Token> {
        let started = Instant::now();
        match self.tokens.recv() {
            Ok(token) => {
                self.on_acquired(started.elapsed());
                Ok(token)
            }
            Err(_) => Err(ToolkitError::LimiterStopped),
        }
    }

    /// Takes a token only if one is waiting; never blocks.
    pub fn try_acquire(&self) -> Option<Token> {
        match self.tokens.try_recv() {
            Ok(token) => {
                self.on_acquired(Duration::ZERO);
                Some(token)
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Blocks for at most `timeout` waiting for a token.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<Token> {
        let started = Instant::now();
        let outcome = recv_with(&self.tokens, None, Some(timeout));
        self.resolve(outcome, started, timeout)
    }

    /// Blocks until a token arrives or `cancel` fires.
    ///
    /// If both are ready at once either may win.
    pub fn acquire_or_cancel(&self, cancel: &CancelToken) -> Result<Token> {
        let started = Instant::now();
        let outcome = recv_with(&self.tokens, Some(cancel), None);
        self.resolve(outcome, started, Duration::ZERO)
    }

    fn resolve(&self, outcome: Outcome<Token>, started: Instant, timeout: Duration) -> Result<Token> {
        match outcome {
            Outcome::Ready(token) => {
                self.on_acquired(started.elapsed());
                Ok(token)
            }
            Outcome::TimedOut => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Err(ToolkitError::TimedOut(timeout))
            }
            Outcome::Cancelled => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Err(ToolkitError::Cancelled)
            }
            Outcome::Closed | Outcome::NotReady => Err(ToolkitError::LimiterStopped),
        }
    }

    #[inline]
    fn on_acquired(&self, waited: Duration) {
        self.counters.acquired.fetch_add(1, Ordering::Relaxed);
        self.counters
            .max_wait_ns
            .fetch_max(saturating_nanos(waited), Ordering::Relaxed);
    }

    /// Tokens currently waiting in the buffer.
    pub fn available(&self) -> usize {
        self.tokens.len()
    }

    /// Buffer capacity (the burst size).
    pub fn capacity(&self) -> usize {
        self.config.burst
    }

    /// The configuration the limiter was built from.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Snapshot of the limiter's counters.
    pub fn metrics(&self) -> RateLimiterMetrics {
        RateLimiterMetrics {
            total_acquired: self.counters.acquired.load(Ordering::Relaxed),
            total_rejected: self.counters.rejected.load(Ordering::Relaxed),
            tokens_issued: self.counters.issued.load(Ordering::Relaxed),
            tokens_discarded: self.counters.discarded.load(Ordering::Relaxed),
            current_tokens: self.tokens.len() as u64,
            capacity: self.config.burst as u64,
            max_wait_time_ns: self.counters.max_wait_ns.load(Ordering::Relaxed),
        }
    }
}

fn refill_loop(
    tx: Sender<Token>,
    interval: Duration,
    stop: CancelToken,
    counters: Arc<LimiterCounters>,
) {
    let ticker = tick(interval);

    loop {
        select! {
            recv(ticker) -> tick => {
                let Ok(issued_at) = tick else { break };
                match tx.try_send(Token { issued_at }) {
                    Ok(()) => {
                        counters.issued.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Full(_)) => {
                        counters.discarded.fetch_add(1, Ordering::Relaxed);
                        debug!("Token buffer full, discarding tick");
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
            recv(stop.signal()) -> _ => break,
        }
    }

    debug!("Refill thread stopping");
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.stop.cancel();
        if let Some(handle) = self.refill.take() {
            if handle.join().is_err() {
                warn!("Refill thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("interval_ms", &self.config.interval_ms)
            .field("burst", &self.config.burst)
            .field("available", &self.available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_bursty_allows_burst_then_throttles() {
        let start = Instant::now();
        let limiter = RateLimiter::bursty(400, 3).unwrap();

        for _ in 0..3 {
            let _token = limiter.acquire().unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(200));

        let _fourth = limiter.acquire().unwrap();
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(350), "4th permit after {:?}", waited);
        assert!(waited < Duration::from_millis(1_500), "4th permit after {:?}", waited);
    }

    #[test]
    fn test_fixed_first_permit_waits_an_interval() {
        let start = Instant::now();
        let limiter = RateLimiter::fixed(60).unwrap();
        assert_eq!(limiter.available(), 0);

        let _token = limiter.acquire().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_fixed_spacing() {
        let limiter = RateLimiter::fixed(40).unwrap();
        let mut previous = limiter.acquire().unwrap().issued_at();

        for _ in 0..3 {
            let token = limiter.acquire().unwrap();
            // Ticks are issued at least one interval apart (minus scheduler jitter).
            assert!(token.issued_at().duration_since(previous) >= Duration::from_millis(30));
            previous = token.issued_at();
        }
    }

    #[test]
    fn test_surplus_ticks_are_discarded() {
        let limiter = RateLimiter::bursty(10, 2).unwrap();
        thread::sleep(Duration::from_millis(120));

        let metrics = limiter.metrics();
        assert_eq!(limiter.available(), 2);
        assert!(metrics.tokens_discarded > 0);
        assert_eq!(metrics.current_tokens, 2);
    }

    #[test]
    fn test_try_acquire() {
        let limiter = RateLimiter::bursty(10_000, 1).unwrap();
        assert!(limiter.try_acquire().is_some());
        assert!(limiter.try_acquire().is_none());

        let metrics = limiter.metrics();
        assert_eq!(metrics.total_acquired, 1);
        assert_eq!(metrics.total_rejected, 1);
    }

    #[test]
    fn test_acquire_timeout() {
        let limiter = RateLimiter::fixed(10_000).unwrap();
        let timeout = Duration::from_millis(30);
        assert_eq!(
            limiter.acquire_timeout(timeout),
            Err(ToolkitError::TimedOut(timeout))
        );

        let fast = RateLimiter::fixed(10).unwrap();
        assert!(fast.acquire_timeout(Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn test_acquire_or_cancel() {
        let limiter = RateLimiter::fixed(10_000).unwrap();
        let source = CancelSource::new();
        source.cancel();

        assert_eq!(
            limiter.acquire_or_cancel(&source.token()),
            Err(ToolkitError::Cancelled)
        );
    }

    #[test]
    fn test_tokens_shared_across_threads() {
        let limiter = Arc::new(RateLimiter::bursty(10_000, 4).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                thread::spawn(move || limiter.try_acquire().is_some())
            })
            .collect();

        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|granted| *granted)
            .count();
        assert_eq!(granted, 4);
    }

    #[test]
    fn test_drop_stops_refill_thread() {
        let limiter = RateLimiter::fixed(10_000).unwrap();
        let start = Instant::now();
        drop(limiter);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            RateLimiter::fixed(0),
            Err(ToolkitError::InvalidConfig(_))
        ));
        assert!(RateLimiter::bursty(100, 0).is_err());
    }

    #[test]
    fn test_debug_impl() {
        let limiter = RateLimiter::bursty(250, 3).unwrap();
        let debug_str = format!("{:?}", limiter);

        assert!(debug_str.contains("RateLimiter"));
        assert!(debug_str.contains("interval_ms: 250"));
        assert!(debug_str.contains("burst: 3"));
    }
}
