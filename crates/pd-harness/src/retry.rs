use std::future::Future;
use std::time::Duration;

use pd_core::config::RetrySettings;
use pd_core::store::StoreError;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// How a single step is retried. Plain data: it is attached to each step
/// invocation and never mutated by the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
    /// Growth factor applied per further retry.
    pub backoff_multiplier: f64,
    /// Total attempts, including the first.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10 * 60),
            backoff_multiplier: 2.0,
            max_attempts: 3,
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(s: &RetrySettings) -> Self {
        Self {
            initial_backoff: Duration::from_millis(s.initial_backoff_ms),
            max_backoff: Duration::from_millis(s.max_backoff_ms),
            backoff_multiplier: s.backoff_multiplier,
            max_attempts: s.max_attempts.max(1),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after the `retry`-th failure (0-based):
    /// `initial_backoff * multiplier^retry`, capped at `max_backoff`.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exp = i32::try_from(retry).unwrap_or(i32::MAX);
        let base = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exp);
        let capped = base.min(self.max_backoff.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_backoff
        }
    }
}

/// Per-invocation options for [`run_step`].
#[derive(Debug, Clone, PartialEq)]
pub struct StepOptions {
    pub policy: RetryPolicy,
    /// Budget for each individual attempt.
    pub timeout: Duration,
}

impl Default for StepOptions {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::default(),
            timeout: Duration::from_secs(5 * 60),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Classifies errors returned by a step attempt.
pub trait Retryable {
    /// Whether another attempt may succeed. Defaults to `true`.
    fn is_retryable(&self) -> bool {
        true
    }
}

// Store writes and reads are idempotent, so transient store failures may be
// retried. Conflicts on daily writes are resolved by the store step before they
// get here.
impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        !self.is_permanent()
    }
}

/// Why a single attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError<E> {
    #[error("{0}")]
    Failed(E),
    #[error("attempt timed out after {0:?}")]
    TimedOut(Duration),
}

/// A step gave up: either the attempt budget ran out or the last error was
/// not retryable.
#[derive(Debug, thiserror::Error)]
#[error("{step} failed after {attempts} attempt(s): {last}")]
pub struct StepFailure<E> {
    pub step: String,
    pub attempts: u32,
    pub last: AttemptError<E>,
}

impl<E> StepFailure<E> {
    /// Map the inner error type, keeping the attempt bookkeeping.
    pub fn map_err<F>(self, f: impl FnOnce(E) -> F) -> StepFailure<F> {
        StepFailure {
            step: self.step,
            attempts: self.attempts,
            last: match self.last {
                AttemptError::Failed(e) => AttemptError::Failed(f(e)),
                AttemptError::TimedOut(d) => AttemptError::TimedOut(d),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Run `f` under `opts`: each attempt is bounded by `opts.timeout`; failed or
/// timed-out attempts are retried after the policy's backoff until
/// `max_attempts` is reached. Non-retryable errors stop immediately.
pub async fn run_step<F, Fut, T, E>(
    step: &str,
    opts: &StepOptions,
    mut f: F,
) -> Result<T, StepFailure<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let max_attempts = opts.policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let failure = match tokio::time::timeout(opts.timeout, f(attempt)).await {
            Ok(Ok(value)) => {
                if attempt > 1 {
                    debug!(step, attempt, "step succeeded after retry");
                }
                return Ok(value);
            }
            Ok(Err(e)) => AttemptError::Failed(e),
            Err(_elapsed) => AttemptError::TimedOut(opts.timeout),
        };

        let retryable = match &failure {
            AttemptError::Failed(e) => e.is_retryable(),
            AttemptError::TimedOut(_) => true,
        };
        if !retryable || attempt >= max_attempts {
            warn!(
                step,
                attempt,
                max_attempts,
                retryable,
                error = %failure,
                "step giving up"
            );
            return Err(StepFailure {
                step: step.to_string(),
                attempts: attempt,
                last: failure,
            });
        }

        let backoff = opts.policy.backoff_for(attempt - 1);
        warn!(
            step,
            attempt,
            max_attempts,
            backoff_ms = backoff.as_millis() as u64,
            error = %failure,
            "step attempt failed, retrying"
        );
        tokio::time::sleep(backoff).await;
        attempt += 1;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_step_contract() {
        let p = RetryPolicy::default();
        assert_eq!(p.initial_backoff, Duration::from_secs(1));
        assert_eq!(p.max_backoff, Duration::from_secs(600));
        assert_eq!(p.backoff_multiplier, 2.0);
        assert_eq!(p.max_attempts, 3);
    }

    #[test]
    fn backoff_grows_geometrically() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff_for(0), Duration::from_secs(1));
        assert_eq!(p.backoff_for(1), Duration::from_secs(2));
        assert_eq!(p.backoff_for(2), Duration::from_secs(4));
        assert_eq!(p.backoff_for(5), Duration::from_secs(32));
    }

    #[test]
    fn backoff_is_capped() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff_for(10), Duration::from_secs(600));
        assert_eq!(p.backoff_for(u32::MAX), Duration::from_secs(600));
    }

    #[test]
    fn settings_convert_to_policy() {
        let settings = RetrySettings {
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
            backoff_multiplier: 3.0,
            max_attempts: 0,
        };
        let p = RetryPolicy::from(&settings);
        assert_eq!(p.initial_backoff, Duration::from_millis(250));
        assert_eq!(p.max_backoff, Duration::from_secs(2));
        assert_eq!(p.max_attempts, 1, "zero attempts is clamped to one");
    }

    #[test]
    fn out_of_range_store_values_are_not_retried() {
        assert!(StoreError::Database("locked".into()).is_retryable());
        assert!(!StoreError::OutOfRange("total_requests".into()).is_retryable());
    }

    #[test]
    fn failure_display_names_step_and_attempts() {
        let failure: StepFailure<String> = StepFailure {
            step: "fetch".into(),
            attempts: 3,
            last: AttemptError::Failed("boom".into()),
        };
        assert_eq!(failure.to_string(), "fetch failed after 3 attempt(s): boom");
    }
}
