use std::sync::Arc;
use std::time::{Duration, Instant};

use wasmide::runner::Supervisor;
use wasmide::types::{ExecutionOutcome, ResourceLimits, SERVER_BUSY, TIME_LIMIT_EXCEEDED};

use super::{fixture_source, test_config};

#[tokio::test]
async fn test_infinite_loop_times_out() {
    let supervisor = Supervisor::new(test_config()).unwrap();
    let limits = ResourceLimits::unset().with_wall_time_limit(1.0);

    let started = Instant::now();
    let outcome = supervisor
        .execute_with_limits(&fixture_source("infinite_loop.wat"), "", Some(&limits))
        .await;
    let elapsed = started.elapsed();

    assert_eq!(outcome.render(), TIME_LIMIT_EXCEEDED);
    assert!(elapsed >= Duration::from_secs(1), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "returned late: {elapsed:?}");
}

#[tokio::test]
async fn test_worker_is_reclaimed_after_timeout() {
    let mut config = test_config();
    config.pool.workers = 1;
    config.pool.queue_capacity = 1;
    let supervisor = Supervisor::new(config).unwrap();
    let limits = ResourceLimits::unset().with_wall_time_limit(0.5);

    let outcome = supervisor
        .execute_with_limits(&fixture_source("infinite_loop.wat"), "", Some(&limits))
        .await;
    assert_eq!(outcome, ExecutionOutcome::TimedOut);

    // the only worker must be free again once cancellation lands
    let output = supervisor
        .execute_program(&fixture_source("hello.wat"), "")
        .await;
    assert_eq!(output, "Hello, World!\n");
}

#[tokio::test]
async fn test_concurrent_runs_do_not_share_io() {
    let supervisor = Arc::new(Supervisor::new(test_config()).unwrap());
    let source = Arc::new(fixture_source("echo.wat"));

    let handles: Vec<_> = (0..5)
        .map(|i| {
            let supervisor = Arc::clone(&supervisor);
            let source = Arc::clone(&source);
            tokio::spawn(async move {
                let input = format!("payload {i}\n").repeat(50);
                let output = supervisor.execute_program(&source, &input).await;
                (input, output)
            })
        })
        .collect();

    for handle in handles {
        let (input, output) = handle.await.unwrap();
        assert_eq!(output, input);
    }
}

#[tokio::test]
async fn test_saturated_pool_rejects() {
    let mut config = test_config();
    config.pool.workers = 1;
    config.pool.queue_capacity = 1;
    let supervisor = Arc::new(Supervisor::new(config).unwrap());
    let spin = Arc::new(fixture_source("infinite_loop.wat"));
    let limits = ResourceLimits::unset().with_wall_time_limit(1.0);

    let spawn = |supervisor: &Arc<Supervisor>| {
        let supervisor = Arc::clone(supervisor);
        let spin = Arc::clone(&spin);
        let limits = limits.clone();
        tokio::spawn(async move {
            supervisor
                .execute_with_limits(&spin, "", Some(&limits))
                .await
        })
    };

    // occupies the worker
    let running = spawn(&supervisor);
    tokio::time::sleep(Duration::from_millis(300)).await;
    // occupies the queue slot
    let queued = spawn(&supervisor);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    let rejected = supervisor.execute_program(&spin, "").await;
    assert_eq!(rejected, SERVER_BUSY);
    assert!(started.elapsed() < Duration::from_millis(500));

    assert_eq!(running.await.unwrap(), ExecutionOutcome::TimedOut);
    assert_eq!(queued.await.unwrap(), ExecutionOutcome::TimedOut);
}

#[tokio::test]
async fn test_supervisor_keeps_serving_after_fault() {
    let supervisor = Supervisor::new(test_config()).unwrap();

    for _ in 0..3 {
        let output = supervisor
            .execute_program(&fixture_source("boom.wat"), "")
            .await;
        assert_eq!(output, "boom");
    }

    let output = supervisor
        .execute_program(&fixture_source("hello.wat"), "")
        .await;
    assert_eq!(output, "Hello, World!\n");
}

#[tokio::test]
async fn test_shutdown_interrupts_waiting_request() {
    let mut config = test_config();
    config.limits.wall_time_limit = Some(30.0);
    let supervisor = Arc::new(Supervisor::new(config).unwrap());

    let waiting = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        async move {
            supervisor
                .execute(&fixture_source("infinite_loop.wat"), "")
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    supervisor.shutdown();
    assert_eq!(waiting.await.unwrap(), ExecutionOutcome::Interrupted);
    assert!(started.elapsed() < Duration::from_secs(5));

    assert_eq!(
        supervisor
            .execute(&fixture_source("hello.wat"), "")
            .await,
        ExecutionOutcome::Interrupted
    );
}

#[tokio::test]
async fn test_negative_deadline_override_uses_configured_limit() {
    let supervisor = Supervisor::new(test_config()).unwrap();
    let limits = ResourceLimits::unset().with_wall_time_limit(-1.0);

    let started = Instant::now();
    let outcome = tokio::time::timeout(
        Duration::from_secs(6),
        supervisor.execute_with_limits(&fixture_source("infinite_loop.wat"), "", Some(&limits)),
    )
    .await
    .expect("request must end at the configured deadline");

    assert_eq!(outcome, ExecutionOutcome::TimedOut);
    assert!(started.elapsed() >= Duration::from_secs(2));
}

#[tokio::test]
async fn test_abandoned_request_releases_worker() {
    let mut config = test_config();
    config.pool.workers = 1;
    config.pool.queue_capacity = 1;
    config.limits.wall_time_limit = Some(30.0);
    let supervisor = Supervisor::new(config).unwrap();

    // the caller gives up long before the configured deadline
    let abandoned = tokio::time::timeout(
        Duration::from_millis(200),
        supervisor.execute(&fixture_source("infinite_loop.wat"), ""),
    )
    .await;
    assert!(abandoned.is_err());

    let limits = ResourceLimits::unset().with_wall_time_limit(2.0);
    let outcome = supervisor
        .execute_with_limits(&fixture_source("hello.wat"), "", Some(&limits))
        .await;
    assert_eq!(outcome, ExecutionOutcome::Completed("Hello, World!\n".to_owned()));
}
