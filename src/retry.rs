//! Bounded retry with jittered exponential backoff for store operations.
//!
//! Only errors classified transient (connection loss, lock contention,
//! serialization failure) are retried; everything else surfaces immediately.
//! A spent retry budget becomes [`CoreError::Unavailable`].

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

/// Whether the error is worth another attempt.
pub fn is_transient(err: &CoreError) -> bool {
    let CoreError::Other(inner) = err else {
        return false;
    };

    if let Some(sqlx_err) = inner.downcast_ref::<sqlx::Error>() {
        match sqlx_err {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => return true,
            sqlx::Error::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    // SQLite BUSY/LOCKED; Postgres serialization failure,
                    // deadlock, too many connections, cannot connect now.
                    return matches!(
                        code.as_ref(),
                        "5" | "6" | "40001" | "40P01" | "53300" | "57P03"
                    );
                }
            }
            _ => {}
        }
    }

    let msg = inner.to_string().to_lowercase();
    msg.contains("database is locked")
        || msg.contains("deadlock")
        || msg.contains("serialization failure")
        || msg.contains("connection refused")
        || msg.contains("connection reset")
}

/// Run `operation` until it succeeds, fails non-transiently, or the policy's
/// attempt budget runs out.
pub async fn with_retry<T, F, Fut>(
    operation_name: &str,
    policy: RetryPolicy,
    mut operation: F,
) -> CoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CoreResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1u32;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if is_transient(&err) => {
                if attempt >= max_attempts {
                    return Err(CoreError::Unavailable {
                        attempts: max_attempts,
                        source: anyhow::Error::new(err),
                    });
                }
                let delay = backoff_delay(attempt, policy.base_delay_ms, policy.max_delay_ms);
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    delay_ms = delay,
                    error = %err,
                    "transient store error, retrying"
                );
                sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Exponential backoff capped at `max_ms`, plus 0-25% random jitter.
fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> u64 {
    use rand::RngExt;
    let exp = base_ms.saturating_mul(2u64.saturating_pow(attempt - 1));
    let capped = exp.min(max_ms);
    let jitter = rand::rng().random_range(0..=capped / 4);
    capped.saturating_add(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn locked_error() -> CoreError {
        CoreError::Other(anyhow::anyhow!("database is locked"))
    }

    #[test]
    fn backoff_grows_and_caps() {
        for _ in 0..50 {
            let d1 = backoff_delay(1, 100, 2000);
            let d3 = backoff_delay(3, 100, 2000);
            let d6 = backoff_delay(6, 100, 2000);
            assert!((100..=125).contains(&d1));
            assert!((400..=500).contains(&d3));
            assert!((2000..=2500).contains(&d6));
        }
    }

    #[test]
    fn classifies_transient_errors() {
        assert!(is_transient(&locked_error()));
        assert!(is_transient(&CoreError::Other(anyhow::anyhow!(
            "deadlock detected"
        ))));
        assert!(!is_transient(&CoreError::NotFound));
        assert!(!is_transient(&CoreError::AliasConflict));
        assert!(!is_transient(&CoreError::Other(anyhow::anyhow!(
            "syntax error"
        ))));
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
        };

        let result = with_retry("test_op", policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(locked_error())
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_budget_becomes_unavailable() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
        };

        let result: CoreResult<()> = with_retry("test_op", policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(locked_error()) }
        })
        .await;

        match result {
            Err(CoreError::Unavailable { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("expected Unavailable, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_transient_errors_surface_immediately() {
        let calls = AtomicU32::new(0);

        let result: CoreResult<()> = with_retry("test_op", RetryPolicy::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CoreError::NotFound) }
        })
        .await;

        assert!(matches!(result, Err(CoreError::NotFound)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
