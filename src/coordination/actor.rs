//! # State Actor
//!
//! A key-value map owned by exactly one thread. Nobody else ever touches it;
//! callers send request messages and block on a private reply channel.
//!
//! ```text
//!     handle.read(k) ──► ReadOp{k, reply} ──┐
//!                                            │     ┌──────────────────┐
//!     handle.write(k,v) ► WriteOp{..} ──────┼────►│  actor thread    │
//!                                            │     │  select! over    │
//!     snapshot / shutdown ► Control ────────┘     │  reads | writes  │
//!                                                  │  | control       │
//!          ◄──────── reply (capacity 1) ─────────  │  HashMap<K, V>   │
//!                                                  └──────────────────┘
//! ```
//!
//! Each inbox is FIFO, but when several inboxes have messages waiting the
//! actor picks among them at random. A reader racing a writer on a different
//! thread therefore has no ordering guarantee; a reader that waits for the
//! write's acknowledgement first always sees it.

use super::config::ActorConfig;
use super::error::{Result, ToolkitError};
use super::metrics::StateStats;
use super::utils::spawn_named;
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// Request to read one key. The reply channel has room for the single answer.
#[derive(Debug)]
pub struct ReadOp<K, V> {
    /// Key to look up.
    pub key: K,
    /// Where the actor sends the value.
    pub reply: Sender<Option<V>>,
}

/// Request to store one value. The actor acknowledges on `reply` once applied.
#[derive(Debug)]
pub struct WriteOp<K, V> {
    /// Key to store under.
    pub key: K,
    /// Value to store.
    pub value: V,
    /// Acknowledgement channel.
    pub reply: Sender<()>,
}

enum Control<K, V> {
    Snapshot(Sender<HashMap<K, V>>),
    Shutdown,
}

struct Inbox<K, V> {
    reads: Sender<ReadOp<K, V>>,
    writes: Sender<WriteOp<K, V>>,
    control: Sender<Control<K, V>>,
}

#[derive(Debug, Default)]
struct OpCounters {
    reads: AtomicU64,
    writes: AtomicU64,
}

/// Cloneable handle for talking to a [`StateActor`] from any thread.
pub struct StateHandle<K, V> {
    inbox: Arc<Inbox<K, V>>,
    counters: Arc<OpCounters>,
}

impl<K, V> Clone for StateHandle<K, V> {
    fn clone(&self) -> Self {
        Self {
            inbox: self.inbox.clone(),
            counters: self.counters.clone(),
        }
    }
}

impl<K, V> StateHandle<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Reads `key`, blocking until the actor answers.
    ///
    /// # Errors
    ///
    /// [`ToolkitError::ActorStopped`] if the actor exited before answering.
    pub fn read(&self, key: K) -> Result<Option<V>> {
        let (reply, answer) = bounded(1);
        self.inbox
            .reads
            .send(ReadOp { key, reply })
            .map_err(|_| ToolkitError::ActorStopped)?;

        let value = answer.recv().map_err(|_| ToolkitError::ActorStopped)?;
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        Ok(value)
    }

    /// Stores `value` under `key`, blocking until the actor acknowledges.
    pub fn write(&self, key: K, value: V) -> Result<()> {
        let (reply, ack) = bounded(1);
        self.inbox
            .writes
            .send(WriteOp { key, value, reply })
            .map_err(|_| ToolkitError::ActorStopped)?;

        ack.recv().map_err(|_| ToolkitError::ActorStopped)?;
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// A copy of the whole map as the actor sees it right now.
    pub fn snapshot(&self) -> Result<HashMap<K, V>> {
        let (reply, answer) = bounded(1);
        self.inbox
            .control
            .send(Control::Snapshot(reply))
            .map_err(|_| ToolkitError::ActorStopped)?;

        answer.recv().map_err(|_| ToolkitError::ActorStopped)
    }

    /// Acknowledged operations issued through this handle and all its clones.
    pub fn stats(&self) -> StateStats {
        StateStats {
            reads: self.counters.reads.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
        }
    }
}

impl<K, V> std::fmt::Debug for StateHandle<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateHandle")
            .field("reads", &self.counters.reads.load(Ordering::Relaxed))
            .field("writes", &self.counters.writes.load(Ordering::Relaxed))
            .finish()
    }
}

/// Owner of a `HashMap<K, V>` running on its own thread.
///
/// ## Example
///
/// ```rust
/// use corral::{ActorConfig, StateActor};
///
/// let actor = StateActor::<u32, String>::spawn(ActorConfig::default()).unwrap();
/// let handle = actor.handle();
///
/// handle.write(1, "one".to_string()).unwrap();
/// assert_eq!(actor.read(1).unwrap().as_deref(), Some("one"));
///
/// let final_state = actor.shutdown().unwrap();
/// assert_eq!(final_state.len(), 1);
/// ```
pub struct StateActor<K, V> {
    handle: StateHandle<K, V>,
    thread: Option<JoinHandle<HashMap<K, V>>>,
}

impl<K, V> StateActor<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Starts an actor over an empty map.
    pub fn spawn(config: ActorConfig) -> Result<Self> {
        Self::spawn_with(config, HashMap::new())
    }

    /// Starts an actor that takes ownership of `initial`.
    pub fn spawn_with(config: ActorConfig, initial: HashMap<K, V>) -> Result<Self> {
        config.validate()?;

        let (reads_tx, reads) = bounded(config.inbox_capacity);
        let (writes_tx, writes) = bounded(config.inbox_capacity);
        let (control_tx, control) = unbounded();

        let thread = spawn_named(config.thread_name.clone(), move || {
            serve(initial, reads, writes, control)
        })?;

        debug!(
            "Started state actor `{}` (inbox capacity: {})",
            config.thread_name, config.inbox_capacity
        );

        Ok(Self {
            handle: StateHandle {
                inbox: Arc::new(Inbox {
                    reads: reads_tx,
                    writes: writes_tx,
                    control: control_tx,
                }),
                counters: Arc::new(OpCounters::default()),
            },
            thread: Some(thread),
        })
    }

    /// A handle that can be moved to other threads.
    pub fn handle(&self) -> StateHandle<K, V> {
        self.handle.clone()
    }

    /// See [`StateHandle::read`].
    pub fn read(&self, key: K) -> Result<Option<V>> {
        self.handle.read(key)
    }

    /// See [`StateHandle::write`].
    pub fn write(&self, key: K, value: V) -> Result<()> {
        self.handle.write(key, value)
    }

    /// See [`StateHandle::snapshot`].
    pub fn snapshot(&self) -> Result<HashMap<K, V>> {
        self.handle.snapshot()
    }

    /// See [`StateHandle::stats`].
    pub fn stats(&self) -> StateStats {
        self.handle.stats()
    }

    /// Stops the actor once it has served every request already queued,
    /// and returns the final map.
    ///
    /// Handles that outlive the actor get [`ToolkitError::ActorStopped`].
    pub fn shutdown(mut self) -> Result<HashMap<K, V>> {
        let thread = self.thread.take().ok_or(ToolkitError::ActorStopped)?;
        // The actor may already be gone; joining still yields its map.
        let _ = self.handle.inbox.control.send(Control::Shutdown);
        thread.join().map_err(|_| ToolkitError::ActorStopped)
    }
}

impl<K, V> Drop for StateActor<K, V> {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.handle.inbox.control.send(Control::Shutdown);
            if thread.join().is_err() {
                warn!("State actor thread panicked");
            }
        }
    }
}

impl<K, V> std::fmt::Debug for StateActor<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateActor")
            .field("handle", &self.handle)
            .field("running", &self.thread.is_some())
            .finish()
    }
}

fn serve<K, V>(
    mut state: HashMap<K, V>,
    reads: Receiver<ReadOp<K, V>>,
    writes: Receiver<WriteOp<K, V>>,
    control: Receiver<Control<K, V>>,
) -> HashMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    loop {
        select! {
            recv(reads) -> op => match op {
                Ok(op) => answer_read(&state, op),
                Err(_) => break,
            },
            recv(writes) -> op => match op {
                Ok(op) => apply_write(&mut state, op),
                Err(_) => break,
            },
            recv(control) -> msg => match msg {
                Ok(Control::Snapshot(reply)) => {
                    let _ = reply.try_send(state.clone());
                }
                Ok(Control::Shutdown) | Err(_) => {
                    drain(&mut state, &reads, &writes);
                    break;
                }
            },
        }
    }

    debug!("State actor stopping with {} keys", state.len());
    state
}

// Serves whatever was already queued when shutdown arrived.
fn drain<K, V>(
    state: &mut HashMap<K, V>,
    reads: &Receiver<ReadOp<K, V>>,
    writes: &Receiver<WriteOp<K, V>>,
) where
    K: Eq + Hash,
    V: Clone,
{
    while let Ok(op) = writes.try_recv() {
        apply_write(state, op);
    }
    while let Ok(op) = reads.try_recv() {
        answer_read(state, op);
    }
}

#[inline]
fn answer_read<K: Eq + Hash, V: Clone>(state: &HashMap<K, V>, op: ReadOp<K, V>) {
    // The reply channel has room for exactly this answer, so this never blocks.
    let _ = op.reply.try_send(state.get(&op.key).cloned());
}

#[inline]
fn apply_write<K: Eq + Hash, V>(state: &mut HashMap<K, V>, op: WriteOp<K, V>) {
    state.insert(op.key, op.value);
    let _ = op.reply.try_send(());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_write_then_read() {
        let actor = StateActor::<u32, u32>::spawn(ActorConfig::default()).unwrap();

        assert_eq!(actor.read(7).unwrap(), None);
        actor.write(7, 49).unwrap();
        assert_eq!(actor.read(7).unwrap(), Some(49));

        let stats = actor.stats();
        assert_eq!(stats.reads, 2);
        assert_eq!(stats.writes, 1);
    }

    #[test]
    fn test_spawn_with_initial_state() {
        let initial: HashMap<_, _> = (0..5).map(|k| (k, k * 10)).collect();
        let actor = StateActor::spawn_with(ActorConfig::buffered(4), initial).unwrap();

        assert_eq!(actor.read(3).unwrap(), Some(30));
        assert_eq!(actor.snapshot().unwrap().len(), 5);
    }

    #[test]
    fn test_snapshot_with_owned_keys() {
        let actor = StateActor::<String, Vec<u8>>::spawn(ActorConfig::default()).unwrap();
        actor.write("a".to_string(), vec![1]).unwrap();
        actor.write("b".to_string(), vec![2, 3]).unwrap();

        let snapshot = actor.handle().snapshot().unwrap();
        assert_eq!(snapshot.get("b"), Some(&vec![2, 3]));
        assert_eq!(actor.shutdown().unwrap(), snapshot);
    }

    #[test]
    fn test_acknowledged_write_visible_to_other_thread() {
        let actor = StateActor::<u32, u32>::spawn(ActorConfig::default()).unwrap();

        for round in 0..100 {
            let writer = actor.handle();
            let (acked_tx, acked) = bounded(1);
            thread::spawn(move || {
                writer.write(round % 4, round).unwrap();
                acked_tx.send(()).unwrap();
            });

            acked.recv().unwrap();
            let reader = actor.handle();
            let seen = thread::spawn(move || reader.read(round % 4).unwrap())
                .join()
                .unwrap();
            assert_eq!(seen, Some(round));
        }
    }

    #[test]
    fn test_concurrent_handles() {
        let actor = StateActor::<usize, usize>::spawn(ActorConfig::default()).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let handle = actor.handle();
                thread::spawn(move || {
                    for i in 0..50 {
                        let key = t * 100 + i;
                        handle.write(key, i).unwrap();
                        assert_eq!(handle.read(key).unwrap(), Some(i));
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        let stats = actor.stats();
        assert_eq!(stats.reads, 400);
        assert_eq!(stats.writes, 400);
        assert_eq!(actor.shutdown().unwrap().len(), 400);
    }

    #[test]
    fn test_handle_after_shutdown() {
        let actor = StateActor::<u8, u8>::spawn(ActorConfig::default()).unwrap();
        let handle = actor.handle();
        handle.write(1, 1).unwrap();

        let state = actor.shutdown().unwrap();
        assert_eq!(state.get(&1), Some(&1));

        assert_eq!(handle.read(1), Err(ToolkitError::ActorStopped));
        assert_eq!(handle.write(2, 2), Err(ToolkitError::ActorStopped));
        assert_eq!(handle.snapshot(), Err(ToolkitError::ActorStopped));
    }

    #[test]
    fn test_shutdown_serves_queued_writes() {
        let actor = StateActor::<u32, u32>::spawn(ActorConfig::buffered(64)).unwrap();

        // Queue writes straight into the inbox without waiting for acks.
        let acks: Vec<_> = (0..32)
            .map(|k| {
                let (reply, ack) = bounded(1);
                actor
                    .handle
                    .inbox
                    .writes
                    .send(WriteOp { key: k, value: k, reply })
                    .unwrap();
                ack
            })
            .collect();

        let state = actor.shutdown().unwrap();
        assert_eq!(state.len(), 32);
        for ack in acks {
            assert!(ack.recv_timeout(Duration::from_secs(1)).is_ok());
        }
    }

    #[test]
    fn test_invalid_config() {
        let config = ActorConfig {
            thread_name: String::new(),
            ..Default::default()
        };
        assert!(StateActor::<u8, u8>::spawn(config).is_err());
    }
}
