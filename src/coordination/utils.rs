//! # Utilities
//!
//! Thread spawning, panic payload rendering and a cache-line wrapper for
//! counters that several threads bump at once.

use super::error::{Result, ToolkitError};
use std::any::Any;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Cache line size for x86_64 processors.
#[cfg(target_arch = "x86_64")]
pub const CACHE_LINE_SIZE: usize = 64;

/// Cache line size for ARM64 processors.
#[cfg(target_arch = "aarch64")]
pub const CACHE_LINE_SIZE: usize = 128;

/// Assumed cache line size elsewhere.
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub const CACHE_LINE_SIZE: usize = 64;

/// Spawns a named OS thread, turning the I/O failure into a [`ToolkitError`].
///
/// Every background thread in the crate goes through here so that they all
/// show up with a recognizable name in debuggers and panic messages.
pub(crate) fn spawn_named<F, T>(name: impl Into<String>, f: F) -> Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let name = name.into();
    thread::Builder::new()
        .name(name.clone())
        .spawn(f)
        .map_err(|err| ToolkitError::Spawn {
            name,
            reason: err.to_string(),
        })
}

/// Renders a panic payload caught by `catch_unwind`.
///
/// `panic!("literal")` carries a `&str`, `panic!("{x}")` a `String`;
/// anything else is reported generically.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Nanoseconds in `d`, saturating at `u64::MAX`.
#[inline]
pub(crate) fn saturating_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Keeps a value on its own cache line.
///
/// The pool's `submitted` counter is bumped by producers while `finished`
/// is bumped by every worker; sharing a line would make each increment
/// invalidate the other side's cache.
#[cfg_attr(target_arch = "aarch64", repr(C, align(128)))]
#[cfg_attr(not(target_arch = "aarch64"), repr(C, align(64)))]
pub(crate) struct CacheAligned<T>(T);

impl<T> CacheAligned<T> {
    #[inline(always)]
    pub(crate) const fn new(value: T) -> Self {
        Self(value)
    }
}

impl<T> std::ops::Deref for CacheAligned<T> {
    type Target = T;

    #[inline(always)]
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for CacheAligned<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_cache_line_size() {
        assert!(CACHE_LINE_SIZE.is_power_of_two());
        assert!(std::mem::align_of::<CacheAligned<AtomicU64>>() >= 64);
    }

    #[test]
    fn test_cache_aligned_deref() {
        let counter = CacheAligned::new(AtomicU64::new(41));
        counter.fetch_add(1, Ordering::Relaxed);
        assert_eq!(counter.load(Ordering::Relaxed), 42);
        assert_eq!(format!("{:?}", CacheAligned::new(7u8)), "7");
    }

    #[test]
    fn test_spawn_named() {
        let handle = spawn_named("corral-test", || {
            thread::current().name().map(str::to_string)
        })
        .unwrap();

        assert_eq!(handle.join().unwrap().as_deref(), Some("corral-test"));
    }

    #[test]
    fn test_panic_message() {
        let literal = std::panic::catch_unwind(|| panic!("literal")).unwrap_err();
        assert_eq!(panic_message(literal.as_ref()), "literal");

        let formatted = std::panic::catch_unwind(|| panic!("job {}", 7)).unwrap_err();
        assert_eq!(panic_message(formatted.as_ref()), "job 7");

        let other = std::panic::catch_unwind(|| std::panic::panic_any(5u8)).unwrap_err();
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }

    #[test]
    fn test_saturating_nanos() {
        assert_eq!(saturating_nanos(Duration::from_micros(3)), 3_000);
        assert_eq!(saturating_nanos(Duration::MAX), u64::MAX);
    }
}
