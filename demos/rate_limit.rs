//! Rate limiting example: a fixed limiter and a bursty one.
//!
//! Run with `RUST_LOG=debug cargo run --example rate_limit` to see refill events.

use corral::{CancelSource, RateLimiter};
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> corral::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("=== Rate Limiter Example ===\n");

    fixed_rate()?;

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    bursty()?;

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    cancelled_wait()?;

    Ok(())
}

fn fixed_rate() -> corral::Result<()> {
    println!("1. Fixed rate, one request every 200ms:");

    let limiter = RateLimiter::fixed(200)?;
    let start = Instant::now();

    for request in 1..=5 {
        let _permit = limiter.acquire()?;
        println!("   request {} at {:?}", request, start.elapsed());
    }
    Ok(())
}

fn bursty() -> corral::Result<()> {
    println!("2. Burst of 3, then one every 200ms:");

    let limiter = RateLimiter::bursty(200, 3)?;
    let start = Instant::now();

    for request in 1..=5 {
        let _permit = limiter.acquire()?;
        println!("   request {} at {:?}", request, start.elapsed());
    }

    thread::sleep(Duration::from_millis(1_000));
    let metrics = limiter.metrics();
    println!("\n{}", metrics.summary());
    Ok(())
}

fn cancelled_wait() -> corral::Result<()> {
    println!("3. Giving up on a permit:");

    let limiter = RateLimiter::fixed(60_000)?;
    let cancel = CancelSource::new();
    let token = cancel.token();

    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        cancel.cancel();
    });

    match limiter.acquire_or_cancel(&token) {
        Ok(_) => println!("   got a permit"),
        Err(err) => println!("   {}", err),
    }

    let _ = canceller.join();
    Ok(())
}
