//! Shared state example: many readers and writers against one map, through
//! a single-owner actor and through a mutex.
//!
//! Run with `cargo run --example stateful`.

use corral::{ActorConfig, LockedState, StateActor, StateStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const READERS: usize = 100;
const WRITERS: usize = 10;
const RUN_FOR: Duration = Duration::from_secs(1);

fn main() -> corral::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("=== Shared State Example ===\n");

    println!("1. State owned by an actor thread:");
    let actor = StateActor::<u32, u32>::spawn(ActorConfig::default())?;
    let stats = hammer(Arc::new(actor.handle()));
    println!("   {}", stats);
    println!("   final state: {:?}", actor.shutdown()?);

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    println!("2. State behind a mutex:");
    let locked = Arc::new(LockedState::<u32, u32>::new());
    let stats = hammer(locked.clone());
    println!("   {}", stats);
    println!("   final state: {:?}", locked.snapshot());

    Ok(())
}

fn hammer(store: Arc<dyn StateStore<u32, u32>>) -> corral::StateStats {
    let running = Arc::new(AtomicBool::new(true));
    let mut threads = Vec::with_capacity(READERS + WRITERS);

    for seed in 0..READERS {
        let store = store.clone();
        let running = running.clone();
        threads.push(thread::spawn(move || {
            let mut state = seed as u32 + 1;
            while running.load(Ordering::Relaxed) {
                if store.read(&next_key(&mut state)).is_err() {
                    break;
                }
                thread::sleep(Duration::from_millis(1));
            }
        }));
    }

    for seed in 0..WRITERS {
        let store = store.clone();
        let running = running.clone();
        threads.push(thread::spawn(move || {
            let mut state = (seed as u32 + 1) * 7919;
            while running.load(Ordering::Relaxed) {
                let key = next_key(&mut state);
                if store.write(key, state % 100).is_err() {
                    break;
                }
                thread::sleep(Duration::from_millis(1));
            }
        }));
    }

    thread::sleep(RUN_FOR);
    running.store(false, Ordering::Relaxed);
    for t in threads {
        let _ = t.join();
    }

    store.stats()
}

// xorshift step mapped onto five keys
fn next_key(state: &mut u32) -> u32 {
    *state ^= *state << 13;
    *state ^= *state >> 17;
    *state ^= *state << 5;
    *state % 5
}
