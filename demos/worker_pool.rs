//! Worker pool example: three workers, ten jobs, one result per job.
//!
//! Run with `RUST_LOG=debug cargo run --example worker_pool` to see worker lifecycle events.

use corral::{DispatcherBuilder, JobFailure};
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

    println!("=== Worker Pool Example ===\n");

    basic_pool()?;

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    failing_jobs()?;

    Ok(())
}

fn basic_pool() -> corral::Result<()> {
    println!("1. Three workers, ten one-second jobs:");

    let pool = DispatcherBuilder::new()
        .workers(3)
        .spawn(|job: u64| {
            thread::sleep(Duration::from_millis(1_000));
            Ok::<_, String>(job * 2)
        })?;

    let start = Instant::now();
    for job in 1..=10 {
        pool.submit(job)?;
    }
    pool.close()?;

    for result in pool.iter() {
        let result = result?;
        println!(
            "   worker {} finished job {} -> {:?} ({:?})",
            result.worker_id,
            result.job_id,
            result.outcome,
            result.elapsed
        );
    }

    // 10 jobs over 3 workers take 4 rounds
    println!("   All jobs done in {:?}", start.elapsed());

    let stats = pool.shutdown();
    println!("\n{}", stats.summary());
    Ok(())
}

fn failing_jobs() -> corral::Result<()> {
    println!("2. Errors and panics stay inside their job:");

    let results = corral::process_all(
        corral::DispatcherConfig::with_workers(2),
        |input: &str| {
            if input.is_empty() {
                panic!("empty input");
            }
            input.parse::<i64>().map_err(|e| e.to_string())
        },
        vec!["42", "forty-two", "", "7"],
    )?;

    for result in results {
        match result.outcome {
            Ok(value) => println!("   job {}: parsed {}", result.job_id, value),
            Err(JobFailure::Failed(err)) => println!("   job {}: error: {}", result.job_id, err),
            Err(JobFailure::Panicked(msg)) => {
                println!("   job {}: panicked: {}", result.job_id, msg)
            }
        }
    }
    Ok(())
}
