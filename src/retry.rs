use std::future::Future;

use rand::Rng as _;
use thiserror::Error;

use crate::photos::{ApiError, FailureClass};
use crate::quota::{QuotaLimit, QuotaTracker};
use crate::state::BackupState;

/// Exponential backoff configuration with jitter.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 2,
            max_delay_secs: 60,
        }
    }
}

impl RetryConfig {
    /// Compute the delay for a given retry attempt (0-indexed).
    ///
    /// Formula: `min(base_delay * 2^retry, max_delay) + random_jitter(0..base_delay)`
    pub fn delay_for_retry(&self, retry: u32) -> std::time::Duration {
        let exp_delay = self
            .base_delay_secs
            .saturating_mul(1u64.checked_shl(retry).unwrap_or(u64::MAX));
        let capped = exp_delay.min(self.max_delay_secs);
        let jitter = if self.base_delay_secs > 0 {
            rand::thread_rng().gen_range(0..self.base_delay_secs)
        } else {
            0
        };
        std::time::Duration::from_secs(capped + jitter)
    }
}

/// Why a metered call did not produce a value.
#[derive(Debug, Error)]
pub enum CallError {
    /// Refused before the call was made; nothing was spent.
    #[error("{0}")]
    QuotaReserve(QuotaLimit),

    /// The service reported its daily quota as used up.
    #[error("Daily API quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("{0}")]
    Terminal(String),

    #[error("{last_error} (gave up after {attempts} attempts)")]
    RetriesExhausted { last_error: String, attempts: u32 },
}

/// Run one remote operation under the quota and retry rules.
///
/// Before every attempt `cost` is reserved against `quota`; a refusal returns
/// [`CallError::QuotaReserve`] without calling `operation`. Every attempt that
/// reached the service is committed exactly once, whatever its outcome.
/// Retryable failures are retried up to `config.max_retries` more times with
/// backoff; quota exhaustion and authentication failures are never retried.
pub async fn execute<F, Fut, T>(
    config: &RetryConfig,
    quota: &QuotaTracker,
    state: &mut BackupState,
    cost: u64,
    context: &str,
    operation: F,
) -> Result<T, CallError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let total_attempts = config.max_retries + 1; // 1 initial + max_retries retries

    for attempt in 0..total_attempts {
        quota
            .reserve(state, cost)
            .map_err(CallError::QuotaReserve)?;

        let result = operation().await;
        let err = match result {
            Ok(val) => {
                quota.commit(state, cost);
                return Ok(val);
            }
            Err(e) => e,
        };
        if err.reached_remote() {
            quota.commit(state, cost);
        }

        match err.class() {
            FailureClass::QuotaExhausted => {
                return Err(CallError::QuotaExhausted(err.to_string()));
            }
            FailureClass::Auth => return Err(CallError::Auth(err.to_string())),
            FailureClass::Terminal => {
                return Err(CallError::Terminal(err.to_string()));
            }
            FailureClass::Retryable => {
                if attempt + 1 >= total_attempts {
                    return Err(CallError::RetriesExhausted {
                        last_error: err.to_string(),
                        attempts: total_attempts,
                    });
                }
                let delay = config.delay_for_retry(attempt);
                tracing::warn!(
                    "{}: retryable error (attempt {}/{}), retrying in {}s: {}",
                    context,
                    attempt + 1,
                    total_attempts,
                    delay.as_secs(),
                    err
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    // total_attempts >= 1, so the loop always returns.
    Err(CallError::RetriesExhausted {
        last_error: format!("{}: no attempt made", context),
        attempts: 0,
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::auth::AuthError;
    use crate::quota::QuotaLimits;

    fn no_delay(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay_secs: 0,
            max_delay_secs: 0,
        }
    }

    fn setup(session_limit: u64) -> (QuotaTracker, BackupState) {
        let quota = QuotaTracker::new(QuotaLimits {
            max_session_requests: session_limit,
            max_daily_requests: 10_000,
        });
        let state = BackupState::new(PathBuf::from("/photos"), quota.today());
        (quota, state)
    }

    fn server_error() -> ApiError {
        ApiError::Http {
            status: 503,
            message: "unavailable".into(),
        }
    }

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay_secs, 2);
        assert_eq!(config.max_delay_secs, 60);
    }

    #[test]
    fn test_delay_exponential_backoff() {
        let config = RetryConfig {
            max_retries: 5,
            base_delay_secs: 2,
            max_delay_secs: 60,
        };
        // retry 0: base=2*1=2, jitter in 0..2, total in 2..4
        let d = config.delay_for_retry(0);
        assert!(d.as_secs() >= 2 && d.as_secs() < 4);

        // retry 2: base=2*4=8, jitter in 0..2, total in 8..10
        let d = config.delay_for_retry(2);
        assert!(d.as_secs() >= 8 && d.as_secs() < 10);
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = RetryConfig {
            max_retries: 10,
            base_delay_secs: 5,
            max_delay_secs: 30,
        };
        let d = config.delay_for_retry(10);
        assert!(d.as_secs() >= 30 && d.as_secs() < 35);
    }

    #[test]
    fn test_delay_zero_base() {
        assert_eq!(no_delay(3).delay_for_retry(0).as_secs(), 0);
    }

    #[tokio::test]
    async fn test_success_commits_once() {
        let (quota, mut state) = setup(100);
        let result = execute(&no_delay(3), &quota, &mut state, 1, "op", || async {
            Ok::<_, ApiError>(42)
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(state.session.requests_count, 1);
        assert_eq!(state.daily_quota.total_requests, 1);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds_committing_each_attempt() {
        let (quota, mut state) = setup(100);
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = execute(&no_delay(3), &quota, &mut state, 1, "op", || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(server_error())
                } else {
                    Ok(99)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 99);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(state.session.requests_count, 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let (quota, mut state) = setup(100);
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), _> = execute(&no_delay(2), &quota, &mut state, 1, "op", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(server_error())
            }
        })
        .await;
        match result {
            Err(CallError::RetriesExhausted { attempts, last_error }) => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("503"));
            }
            other => panic!("unexpected {other:?}"),
        }
        // 1 initial + 2 retries = 3 attempts
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(state.session.requests_count, 3);
    }

    #[tokio::test]
    async fn test_terminal_not_retried() {
        let (quota, mut state) = setup(100);
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), _> = execute(&no_delay(3), &quota, &mut state, 1, "op", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::Http {
                    status: 400,
                    message: "bad request".into(),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(CallError::Terminal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.session.requests_count, 1);
    }

    #[tokio::test]
    async fn test_quota_exhausted_not_retried() {
        let (quota, mut state) = setup(100);
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), _> = execute(&no_delay(3), &quota, &mut state, 1, "op", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(ApiError::QuotaExhausted("requests per day".into()))
            }
        })
        .await;
        assert!(matches!(result, Err(CallError::QuotaExhausted(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_auth_failure_not_retried_or_charged() {
        let (quota, mut state) = setup(100);
        let result: Result<(), _> = execute(&no_delay(3), &quota, &mut state, 1, "op", || async {
            Err(ApiError::Auth(AuthError::InvalidToken("revoked".into())))
        })
        .await;
        assert!(matches!(result, Err(CallError::Auth(_))));
        assert_eq!(state.session.requests_count, 0);
    }

    #[tokio::test]
    async fn test_reserve_refusal_skips_call() {
        let (quota, mut state) = setup(2);
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), _> = execute(&no_delay(3), &quota, &mut state, 3, "op", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;
        assert!(matches!(
            result,
            Err(CallError::QuotaReserve(QuotaLimit::Session))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(state.session.requests_count, 0);
    }

    #[tokio::test]
    async fn test_quota_runs_out_between_retries() {
        let (quota, mut state) = setup(2);
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), _> = execute(&no_delay(5), &quota, &mut state, 1, "op", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(server_error())
            }
        })
        .await;
        assert!(matches!(
            result,
            Err(CallError::QuotaReserve(QuotaLimit::Session))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(state.session.requests_count, 2);
    }
}
