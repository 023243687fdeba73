//! # Shared State Backends
//!
//! Two ways of sharing a key-value map between threads behind one trait:
//!
//! - [`StateActor`] / [`StateHandle`]: one owner thread, requests by message.
//! - [`LockedState`]: a mutex held only for the single map access.
//!
//! Code written against [`StateStore`] can switch between them freely.

use super::actor::{StateActor, StateHandle};
use super::error::Result;
use super::metrics::StateStats;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

/// Read/write access to a shared key-value map.
///
/// After `write(k, v)` returns `Ok`, any `read(k)` that starts afterwards
/// observes `v` or a later write.
pub trait StateStore<K, V>: Send + Sync {
    /// Current value for `key`.
    fn read(&self, key: &K) -> Result<Option<V>>;

    /// Stores `value` under `key`.
    fn write(&self, key: K, value: V) -> Result<()>;

    /// Operation counters.
    fn stats(&self) -> StateStats;
}

/// Mutex-guarded map.
///
/// ```rust
/// use corral::{LockedState, StateStore};
///
/// let state = LockedState::<&str, u32>::new();
/// state.write("hits", 1).unwrap();
/// assert_eq!(state.read(&"hits").unwrap(), Some(1));
/// ```
#[derive(Debug)]
pub struct LockedState<K, V> {
    map: Mutex<HashMap<K, V>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl<K, V> LockedState<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// An empty map.
    pub fn new() -> Self {
        Self::from_map(HashMap::new())
    }

    /// Wraps an existing map.
    pub fn from_map(map: HashMap<K, V>) -> Self {
        Self {
            map: Mutex::new(map),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// A copy of the whole map.
    pub fn snapshot(&self) -> HashMap<K, V>
    where
        K: Clone,
    {
        self.map.lock().clone()
    }

    /// Consumes the store and returns the map.
    pub fn into_inner(self) -> HashMap<K, V> {
        self.map.into_inner()
    }
}

impl<K, V> Default for LockedState<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> StateStore<K, V> for LockedState<K, V>
where
    K: Eq + Hash + Send,
    V: Clone + Send,
{
    fn read(&self, key: &K) -> Result<Option<V>> {
        let value = self.map.lock().get(key).cloned();
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(value)
    }

    fn write(&self, key: K, value: V) -> Result<()> {
        self.map.lock().insert(key, value);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn stats(&self) -> StateStats {
        StateStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}

impl<K, V> StateStore<K, V> for StateHandle<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    fn read(&self, key: &K) -> Result<Option<V>> {
        StateHandle::read(self, key.clone())
    }

    fn write(&self, key: K, value: V) -> Result<()> {
        StateHandle::write(self, key, value)
    }

    fn stats(&self) -> StateStats {
        StateHandle::stats(self)
    }
}

impl<K, V> StateStore<K, V> for StateActor<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    fn read(&self, key: &K) -> Result<Option<V>> {
        StateActor::read(self, key.clone())
    }

    fn write(&self, key: K, value: V) -> Result<()> {
        StateActor::write(self, key, value)
    }

    fn stats(&self) -> StateStats {
        StateActor::stats(self)
    }
}
