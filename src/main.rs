use taskpool::{Executor, TaskError};
use std::{thread, time::{Duration, Instant}};
use tracing::info;
use tracing_subscriber::EnvFilter;


fn heavy_task(id: u64) -> Result<u64, TaskError> {
    let millis = 10 + (id * 37) % 200;
    info!(id, millis, "task started");
    thread::sleep(Duration::from_millis(millis));
    Ok(id)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    let now = Instant::now();
    let executor = Executor::new(Some(5), Duration::from_secs(1), None)?;

    let futures = (0..20)
        .map(|id| executor.submit(move || heavy_task(id)))
        .collect::<Result<Vec<_>, _>>()?;

    let mut done = Vec::with_capacity(futures.len());
    for future in &futures {
        if let Some(id) = future.get(None)? {
            done.push(id);
        }
    }
    info!(?done, elapsed = ?now.elapsed(), "all tasks finished");

    let failing = executor.submit(|| 1_i64.checked_div(0).ok_or_else(|| TaskError::failed("division by zero")))?;
    info!(result = ?failing.get_safe(None), "failing task");

    executor.shutdown();
    info!(metrics = ?executor.metrics(), "executor shut down");
    Ok(())
}
