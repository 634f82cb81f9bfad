//! Retry utilities for rate-limited provider calls.
//!
//! Provides rate-limit classification and the backoff executor that wraps a
//! single unit of work.

use super::policy::RateLimitPolicy;
use crate::error::GenerateError;
use std::future::Future;
use std::time::Duration;

/// Message fragments providers use to signal throttling or quota exhaustion.
const RATE_LIMIT_PATTERNS: &[&str] = &[
    "429",
    "rate limit",
    "rate-limit",
    "ratelimit",
    "resource exhausted",
    "resource_exhausted",
    "too many requests",
];

/// Whether a response status or error message indicates throttling.
pub fn is_rate_limit_signal(status_code: Option<u16>, message: &str) -> bool {
    if status_code == Some(429) {
        return true;
    }
    let lower = message.to_lowercase();
    RATE_LIMIT_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Only rate-limit failures are worth retrying.
pub fn is_retryable(error: &GenerateError) -> bool {
    matches!(error, GenerateError::RateLimited { .. })
}

/// Run `action`, retrying rate-limited failures with exponential backoff.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RateLimitPolicy,
    action: F,
) -> Result<T, GenerateError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GenerateError>>,
{
    run_with_retry_notify(policy, action, |_, _| {}).await
}

/// Like [`run_with_retry`], calling `on_retry(attempt, backoff)` before each wait.
///
/// Performs at most `policy.max_retries + 1` calls. The wait before retry `k`
/// is `policy.backoff_for(k)`. Non-retryable errors return immediately; after
/// the last attempt the last error is returned.
pub async fn run_with_retry_notify<T, F, Fut, R>(
    policy: &RateLimitPolicy,
    mut action: F,
    mut on_retry: R,
) -> Result<T, GenerateError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GenerateError>>,
    R: FnMut(u32, Duration),
{
    let mut attempt = 0u32;

    loop {
        let error = match action().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !is_retryable(&error) || attempt >= policy.max_retries {
            if is_retryable(&error) {
                tracing::warn!(
                    "Giving up after {} attempt(s): {error}",
                    attempt.saturating_add(1)
                );
            }
            return Err(error);
        }

        attempt += 1;
        let backoff = policy.backoff_for(attempt);
        tracing::debug!(
            "Retry {attempt}/{} after {backoff:?}: {error}",
            policy.max_retries
        );
        on_retry(attempt, backoff);
        tokio::time::sleep(backoff).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    fn rate_limited() -> GenerateError {
        GenerateError::RateLimited {
            provider: "mock".to_string(),
            message: "HTTP 429".to_string(),
            status_code: Some(429),
        }
    }

    fn policy(max_retries: u32) -> RateLimitPolicy {
        RateLimitPolicy {
            min_spacing_ms: 1,
            max_retries,
            initial_backoff_ms: 100,
            max_backoff_ms: 1000,
            backoff_multiplier: 3.0,
        }
    }

    #[test]
    fn test_status_429_is_rate_limit() {
        assert!(is_rate_limit_signal(Some(429), "anything"));
    }

    #[test]
    fn test_message_patterns_are_rate_limit() {
        assert!(is_rate_limit_signal(None, "Rate limit exceeded"));
        assert!(is_rate_limit_signal(Some(400), "RESOURCE_EXHAUSTED: quota"));
        assert!(is_rate_limit_signal(None, "Resource exhausted"));
        assert!(is_rate_limit_signal(None, "Too Many Requests"));
        assert!(is_rate_limit_signal(None, "upstream returned 429"));
    }

    #[test]
    fn test_other_errors_are_not_rate_limit() {
        assert!(!is_rate_limit_signal(Some(401), "unauthorized"));
        assert!(!is_rate_limit_signal(Some(500), "internal error"));
        assert!(!is_retryable(&GenerateError::network("connection refused")));
        assert!(!is_retryable(&GenerateError::QueueCleared));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_returns_immediately() {
        let calls = AtomicU32::new(0);
        let result = run_with_retry(&policy(3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, GenerateError>("done") }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_retries_with_capped_backoff() {
        for max_retries in [0u32, 1, 3, 5] {
            let calls = AtomicU32::new(0);
            let waits = Arc::new(Mutex::new(Vec::new()));
            let waits_clone = waits.clone();
            let policy = policy(max_retries);

            let result: Result<(), _> = run_with_retry_notify(
                &policy,
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(rate_limited()) }
                },
                move |attempt, backoff| waits_clone.lock().unwrap().push((attempt, backoff)),
            )
            .await;

            assert_eq!(result.unwrap_err(), rate_limited());
            assert_eq!(calls.load(Ordering::SeqCst), max_retries + 1);

            let waits = waits.lock().unwrap();
            assert_eq!(waits.len() as u32, max_retries);
            for (attempt, backoff) in waits.iter() {
                assert_eq!(*backoff, policy.backoff_for(*attempt));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sequence_is_exponential_then_capped() {
        let waits = Arc::new(Mutex::new(Vec::new()));
        let waits_clone = waits.clone();
        let _: Result<(), _> = run_with_retry_notify(
            &policy(5),
            || async { Err(rate_limited()) },
            move |_, backoff| waits_clone.lock().unwrap().push(backoff.as_millis()),
        )
        .await;
        assert_eq!(*waits.lock().unwrap(), vec![100, 300, 900, 1000, 1000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_actual_sleep_matches_backoff() {
        let start = tokio::time::Instant::now();
        let _: Result<(), _> =
            run_with_retry(&policy(2), || async { Err(rate_limited()) }).await;
        // 100ms + 300ms of backoff on the paused clock
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(400), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(450), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_calls_once() {
        let calls = AtomicU32::new(0);
        let retries = AtomicU32::new(0);
        let result: Result<(), _> = run_with_retry_notify(
            &policy(3),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(GenerateError::Provider {
                        provider: "mock".to_string(),
                        message: "unauthorized".to_string(),
                        status_code: Some(401),
                    })
                }
            },
            |_, _| {
                retries.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;

        assert!(matches!(result, Err(GenerateError::Provider { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(retries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_rate_limit() {
        let calls = AtomicU32::new(0);
        let result = run_with_retry(&policy(3), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(rate_limited())
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
