//! Integration tests for `wait_for_passing`.
//!
//! Runs on a paused tokio clock, so every budget below is exercised without
//! real sleeping.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use kafkaesque_testkit::ensure;
use kafkaesque_testkit::prelude::*;

fn policy(timeout_ms: u64, interval_ms: u64) -> RetryPolicy {
    RetryPolicy::new(
        Duration::from_millis(timeout_ms),
        Duration::from_millis(interval_ms),
    )
}

/// A check that fails `k` times with a numbered message, then passes.
fn failing_k_times(
    k: u32,
    calls: Arc<AtomicU32>,
) -> impl FnMut() -> std::pin::Pin<Box<dyn std::future::Future<Output = std::result::Result<u32, CheckError>> + Send>>
{
    move || {
        let calls = calls.clone();
        Box::pin(async move {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            ensure!(call > k, "failure #{}", call);
            Ok(call)
        })
    }
}

// ============================================================================
// Attempt Counting
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_passes_after_k_failures_with_k_plus_one_calls() {
    for k in [0u32, 1, 2, 5, 9] {
        let calls = Arc::new(AtomicU32::new(0));
        let value = wait_for_passing(policy(3000, 300), failing_k_times(k, calls.clone()))
            .await
            .unwrap();

        assert_eq!(value, k + 1, "k = {}", k);
        assert_eq!(calls.load(Ordering::SeqCst), k + 1, "k = {}", k);
    }
}

#[tokio::test(start_paused = true)]
async fn test_budget_is_floor_of_timeout_over_interval() {
    // 1000 / 300 = 3 attempts; a check needing a 4th never gets it.
    let calls = Arc::new(AtomicU32::new(0));
    let err = wait_for_passing(policy(1000, 300), failing_k_times(3, calls.clone()))
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(matches!(err, Error::ConditionNotMet { attempts: 3, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_surfaces_last_message() {
    let calls = Arc::new(AtomicU32::new(0));
    let err = wait_for_passing(policy(15_000, 300), failing_k_times(u32::MAX, calls.clone()))
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 50);
    assert_eq!(err.to_string(), "failure #50");
}

#[tokio::test(start_paused = true)]
async fn test_total_wait_stays_within_timeout() {
    let start = tokio::time::Instant::now();
    let _ = wait_for_passing(policy(3000, 300), || async {
        Err::<(), _>(CheckError::unmet("never"))
    })
    .await;

    // 10 attempts, 9 sleeps.
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(2700), "elapsed {:?}", elapsed);
    assert!(elapsed <= Duration::from_millis(3000), "elapsed {:?}", elapsed);
}

// ============================================================================
// Failure Classification
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_crate_error_inside_check_is_fatal() {
    let calls = AtomicU32::new(0);
    let err = wait_for_passing(policy(3000, 300), || async {
        calls.fetch_add(1, Ordering::SeqCst);
        let endpoint: ServiceEndpoint = "localhost:0".parse()?;
        Ok::<_, CheckError>(endpoint)
    })
    .await
    .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(err, Error::Fatal { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_policies_never_call_the_check() {
    let calls = AtomicU32::new(0);
    let check = || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok::<_, CheckError>(())
    };

    assert!(matches!(
        wait_for_passing(policy(200, 300), check).await,
        Err(Error::TimeoutTooShort { .. })
    ));
    assert!(matches!(
        wait_for_passing(policy(1000, 0), check).await,
        Err(Error::InvalidPolicy(_))
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
