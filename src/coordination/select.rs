//! # Multi-way Wait
//!
//! Racing several waitable sources and proceeding with whichever becomes ready
//! first. Everything here sits on `crossbeam_channel`'s selection machinery.
//!
//! ```text
//!     result ────┐
//!                │
//!     deadline ──┼──► select ──► exactly one branch fires,
//!                │                only that source is consumed
//!     cancel ────┘
//! ```
//!
//! ## Tie-break
//!
//! When several sources are ready at the same moment the winner is chosen at
//! random. Callers must not rely on declaration order: a loop that keeps
//! selecting over two busy channels will serve both of them.
//!
//! Deadlines are the exception. A wait whose deadline has already passed
//! resolves to [`Outcome::TimedOut`] without touching the source, so a zero
//! timeout never takes a value that is sitting in the channel.
//!
//! ## Cancellation
//!
//! A [`CancelSource`] owns the sending half of a channel nobody ever sends on.
//! Cancelling drops it, which makes the receiving half permanently ready in every
//! [`CancelToken`] clone, so any number of waits can include it as a branch.
//!
//! ## Abandoned producers
//!
//! After a timeout the losing producer may still try to deliver. Use a channel
//! with room for its single value (see [`run_with_timeout`]) so that send never
//! blocks, or drain the source yourself; otherwise the producer thread hangs.

use super::error::{Result, ToolkitError};
use super::utils::spawn_named;
use crossbeam_channel::{
    after, bounded, never, select, Receiver, RecvTimeoutError, Select, SelectedOperation, Sender,
    TryRecvError,
};
use parking_lot::Mutex;
use std::convert::Infallible;
use std::time::Duration;
use tracing::debug;

/// How a single-source wait resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The source delivered a value.
    Ready(T),
    /// The deadline elapsed first.
    TimedOut,
    /// The cancellation signal fired first.
    Cancelled,
    /// The source's senders are all gone and it is empty.
    Closed,
    /// Non-blocking poll found nothing.
    NotReady,
}

impl<T> Outcome<T> {
    /// Returns true if the source delivered a value.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Returns true if the deadline won.
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }

    /// The delivered value, if any.
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            _ => None,
        }
    }
}

/// Which source of a [`Selector`] fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selected<T> {
    /// Source `index` delivered `value`.
    Ready {
        /// Position of the source, as returned by [`Selector::add`].
        index: usize,
        /// The consumed value.
        value: T,
    },
    /// Source `index` is disconnected and drained. It will keep winning
    /// selections until it is removed.
    Closed {
        /// Position of the source.
        index: usize,
    },
}

impl<T> Selected<T> {
    /// Position of the source that fired.
    pub fn index(&self) -> usize {
        match self {
            Self::Ready { index, .. } | Self::Closed { index } => *index,
        }
    }
}

/// The cancelling side of a cancellation signal.
///
/// Dropping the source cancels as well, so a token can never wait on an
/// owner that has gone away.
///
/// ```rust
/// use corral::CancelSource;
///
/// let source = CancelSource::new();
/// let token = source.token();
/// assert!(!token.is_cancelled());
///
/// assert!(source.cancel());
/// assert!(token.is_cancelled());
/// assert!(!source.cancel()); // already cancelled
/// ```
#[derive(Debug)]
pub struct CancelSource {
    trigger: Mutex<Option<Sender<Infallible>>>,
    token: CancelToken,
}

impl CancelSource {
    /// Creates an uncancelled source.
    pub fn new() -> Self {
        let (trigger, signal) = bounded(0);
        Self {
            trigger: Mutex::new(Some(trigger)),
            token: CancelToken { signal },
        }
    }

    /// A token observing this source.
    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }

    /// Fires the signal. Returns false if it had already fired.
    pub fn cancel(&self) -> bool {
        let fired = self.trigger.lock().take().is_some();
        if fired {
            debug!("cancellation requested");
        }
        fired
    }

    /// Returns true once `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// The observing side of a cancellation signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelToken {
    signal: Receiver<Infallible>,
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        Self { signal: never() }
    }

    /// Returns true if the source has fired or been dropped.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.signal.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Blocks until cancelled.
    pub fn wait(&self) {
        let _ = self.signal.recv();
    }

    /// Blocks until cancelled or `timeout` elapses. Returns true if cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        matches!(
            self.signal.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    /// The channel to include as a branch of a multi-way wait.
    pub(crate) fn signal(&self) -> &Receiver<Infallible> {
        &self.signal
    }
}

/// Waits on `source`, optionally racing a cancellation token and a deadline.
///
/// Exactly one branch fires; the source is consumed only when it wins. A
/// zero `timeout` returns [`Outcome::TimedOut`] immediately, even if a value
/// is already waiting.
///
/// ```rust
/// use corral::{recv_with, Outcome};
/// use std::time::Duration;
///
/// let (tx, rx) = crossbeam_channel::bounded(1);
/// tx.send("done").unwrap();
/// assert_eq!(recv_with(&rx, None, Some(Duration::from_secs(1))), Outcome::Ready("done"));
/// ```
pub fn recv_with<T>(
    source: &Receiver<T>,
    cancel: Option<&CancelToken>,
    timeout: Option<Duration>,
) -> Outcome<T> {
    if timeout == Some(Duration::ZERO) {
        return Outcome::TimedOut;
    }

    let deadline = timeout.map(after).unwrap_or_else(never);
    let cancelled = cancel.map(|token| token.signal.clone()).unwrap_or_else(never);

    select! {
        recv(source) -> msg => match msg {
            Ok(value) => Outcome::Ready(value),
            Err(_) => Outcome::Closed,
        },
        recv(cancelled) -> _ => Outcome::Cancelled,
        recv(deadline) -> _ => Outcome::TimedOut,
    }
}

/// Waits on `source` for at most `timeout`.
pub fn recv_timeout<T>(source: &Receiver<T>, timeout: Duration) -> Outcome<T> {
    recv_with(source, None, Some(timeout))
}

/// Waits on `source` until it delivers or `cancel` fires.
pub fn recv_or_cancel<T>(source: &Receiver<T>, cancel: &CancelToken) -> Outcome<T> {
    recv_with(source, Some(cancel), None)
}

/// Takes a value if one is already waiting; never blocks.
pub fn poll<T>(source: &Receiver<T>) -> Outcome<T> {
    match source.try_recv() {
        Ok(value) => Outcome::Ready(value),
        Err(TryRecvError::Empty) => Outcome::NotReady,
        Err(TryRecvError::Disconnected) => Outcome::Closed,
    }
}

/// Sends only if there is room right now; hands the value back otherwise.
pub fn offer<T>(sink: &Sender<T>, value: T) -> std::result::Result<(), T> {
    sink.try_send(value).map_err(|err| err.into_inner())
}

/// Runs `f` on its own thread and waits at most `timeout` for its value.
///
/// The producer sends into a channel with room for exactly one value, so
/// when the deadline wins its late send fails immediately instead of
/// blocking, and the thread exits as soon as `f` returns.
pub fn run_with_timeout<T, F>(f: F, timeout: Duration) -> Result<Outcome<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = bounded(1);
    spawn_named("corral-producer", move || {
        if tx.send(f()).is_err() {
            debug!("producer finished after its consumer gave up");
        }
    })?;

    Ok(recv_timeout(&rx, timeout))
}

/// A dynamic set of same-typed sources for repeated multi-way waits.
///
/// ```rust
/// use corral::{Selected, Selector};
///
/// let (tx_a, rx_a) = crossbeam_channel::unbounded::<&str>();
/// let (_tx_b, rx_b) = crossbeam_channel::unbounded::<&str>();
///
/// let mut selector = Selector::new();
/// let a = selector.add(rx_a);
/// selector.add(rx_b);
///
/// tx_a.send("one").unwrap();
/// assert_eq!(selector.wait().unwrap(), Selected::Ready { index: a, value: "one" });
/// assert!(selector.poll().is_none());
/// ```
#[derive(Debug)]
pub struct Selector<T> {
    sources: Vec<Receiver<T>>,
}

impl<T> Selector<T> {
    /// Creates an empty selector.
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    /// Adds a source and returns its index.
    pub fn add(&mut self, source: Receiver<T>) -> usize {
        self.sources.push(source);
        self.sources.len() - 1
    }

    /// Removes the source at `index`. Sources after it shift down by one.
    pub fn remove(&mut self, index: usize) -> Option<Receiver<T>> {
        (index < self.sources.len()).then(|| self.sources.remove(index))
    }

    /// Number of sources.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Returns true if there are no sources.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Blocks until one source is ready.
    ///
    /// An empty selector would block forever; that is reported as
    /// [`ToolkitError::NoSources`] instead.
    pub fn wait(&self) -> Result<Selected<T>> {
        self.wait_with(None, None)
    }

    /// Blocks until one source is ready or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Selected<T>> {
        self.wait_with(None, Some(timeout))
    }

    /// Blocks until one source is ready, `cancel` fires, or `timeout` elapses.
    pub fn wait_with(
        &self,
        cancel: Option<&CancelToken>,
        timeout: Option<Duration>,
    ) -> Result<Selected<T>> {
        if self.sources.is_empty() && cancel.is_none() {
            return match timeout {
                Some(timeout) => {
                    std::thread::sleep(timeout);
                    Err(ToolkitError::TimedOut(timeout))
                }
                None => Err(ToolkitError::NoSources),
            };
        }

        let mut sel = Select::new();
        for source in &self.sources {
            sel.recv(source);
        }
        let cancel_index = cancel.map(|token| sel.recv(token.signal()));

        let op = match timeout {
            Some(timeout) => sel
                .select_timeout(timeout)
                .map_err(|_| ToolkitError::TimedOut(timeout))?,
            None => sel.select(),
        };

        if let (Some(token), Some(cancel_index)) = (cancel, cancel_index) {
            if op.index() == cancel_index {
                let _ = op.recv(token.signal());
                return Err(ToolkitError::Cancelled);
            }
        }

        Ok(self.complete(op))
    }

    /// Takes from one ready source without blocking; `None` if none is ready.
    pub fn poll(&self) -> Option<Selected<T>> {
        if self.sources.is_empty() {
            return None;
        }
        let mut sel = self.arm();
        let op = sel.try_select().ok()?;
        Some(self.complete(op))
    }

    fn arm(&self) -> Select<'_> {
        let mut sel = Select::new();
        for source in &self.sources {
            sel.recv(source);
        }
        sel
    }

    fn complete(&self, op: SelectedOperation<'_>) -> Selected<T> {
        let index = op.index();
        match op.recv(&self.sources[index]) {
            Ok(value) => Selected::Ready { index, value },
            Err(_) => Selected::Closed { index },
        }
    }
}

impl<T> Default for Selector<T> {
    fn default() -> Self {
        Self::new()
    }
}
