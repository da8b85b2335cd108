use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};

/// How the wait between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Wait `delay` between every attempt.
    #[default]
    Fixed,
    /// Wait `delay * 2^(n-1)` after the n-th failed attempt, capped at `max_delay`.
    Exponential,
}

/// Bounded retry parameters for resource-locked failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Values below 1 behave like 1.
    pub max_attempts: u32,
    /// Base wait between attempts.
    pub delay: Duration,
    pub strategy: BackoffStrategy,
    /// Upper bound for a single wait.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(1),
            strategy: BackoffStrategy::Fixed,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Wait before the attempt that follows failed attempt number `failed_attempt` (1-based).
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let wait = match self.strategy {
            BackoffStrategy::Fixed => self.delay,
            BackoffStrategy::Exponential => {
                let shift = failed_attempt.saturating_sub(1).min(31);
                self.delay.saturating_mul(1u32 << shift)
            }
        };
        wait.min(self.max_delay.max(self.delay))
    }
}

/// Blocking wait used for debounce and backoff.
///
/// Tests inject [`NoopSleeper`] or a recording implementation instead of real sleeps.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Returns immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSleeper;

impl Sleeper for NoopSleeper {
    fn sleep(&self, _duration: Duration) {}
}

/// Records every requested wait without sleeping.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// All waits requested so far, in order.
    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        if let Ok(mut waits) = self.waits.lock() {
            waits.push(duration);
        }
    }
}

/// Result of [`retry_while_locked`].
#[derive(Debug)]
pub enum RetryOutcome<T> {
    /// The operation succeeded on attempt number `attempts`.
    Succeeded { value: T, attempts: u32 },
    /// Every attempt hit a resource-locked failure.
    Exhausted { attempts: u32, last_error: PipelineError },
    /// A failure that is not a lock ended the loop early.
    Aborted { attempts: u32, error: PipelineError },
}

impl<T> RetryOutcome<T> {
    /// Attempts made, successful or not.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts, .. }
            | RetryOutcome::Exhausted { attempts, .. }
            | RetryOutcome::Aborted { attempts, .. } => *attempts,
        }
    }

    /// Convert into a plain result, keeping the attempt count on both sides.
    pub fn into_result(self) -> Result<(T, u32), (PipelineError, u32)> {
        match self {
            RetryOutcome::Succeeded { value, attempts } => Ok((value, attempts)),
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => Err((last_error, attempts)),
            RetryOutcome::Aborted { attempts, error } => Err((error, attempts)),
        }
    }
}

impl<T> fmt::Display for RetryOutcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryOutcome::Succeeded { attempts, .. } => write!(f, "succeeded after {attempts} attempt(s)"),
            RetryOutcome::Exhausted { attempts, .. } => write!(f, "still locked after {attempts} attempt(s)"),
            RetryOutcome::Aborted { attempts, .. } => write!(f, "aborted on attempt {attempts}"),
        }
    }
}

/// Run `op`, retrying only while it fails with a resource-locked error.
///
/// The loop is bounded by `policy.max_attempts`; no wait follows the last attempt.
pub fn retry_while_locked<T, F>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    operation: &str,
    mut op: F,
) -> RetryOutcome<T>
where
    F: FnMut() -> PipelineResult<T>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op() {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "lock released");
                }
                return RetryOutcome::Succeeded {
                    value,
                    attempts: attempt,
                };
            }
            Err(err) if err.is_resource_locked() => {
                if attempt >= max_attempts {
                    return RetryOutcome::Exhausted {
                        attempts: attempt,
                        last_error: err,
                    };
                }
                let wait = policy.delay_after(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    wait_ms = wait.as_millis() as u64,
                    error = %err,
                    "resource locked, retrying"
                );
                sleeper.sleep(wait);
            }
            Err(err) => {
                return RetryOutcome::Aborted {
                    attempts: attempt,
                    error: err,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::time::Duration;

    use super::{BackoffStrategy, RecordingSleeper, RetryOutcome, RetryPolicy, retry_while_locked};
    use crate::error::PipelineError;

    fn locked() -> PipelineError {
        PipelineError::Io(io::Error::from(io::ErrorKind::PermissionDenied))
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::from_millis(100),
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn succeeds_once_lock_clears_within_budget() {
        let sleeper = RecordingSleeper::new();
        let mut calls = 0;
        let outcome = retry_while_locked(&policy(5), &sleeper, "save", || {
            calls += 1;
            if calls <= 3 { Err(locked()) } else { Ok(calls) }
        });

        assert!(matches!(outcome, RetryOutcome::Succeeded { value: 4, attempts: 4 }));
        assert_eq!(sleeper.waits(), vec![Duration::from_millis(100); 3]);
    }

    #[test]
    fn gives_up_after_max_attempts_without_trailing_wait() {
        let sleeper = RecordingSleeper::new();
        let mut calls = 0;
        let outcome: RetryOutcome<()> = retry_while_locked(&policy(5), &sleeper, "save", || {
            calls += 1;
            Err(locked())
        });

        assert_eq!(calls, 5);
        assert!(matches!(outcome, RetryOutcome::Exhausted { attempts: 5, .. }));
        assert_eq!(sleeper.waits().len(), 4);
    }

    #[test]
    fn non_lock_errors_abort_immediately() {
        let sleeper = RecordingSleeper::new();
        let mut calls = 0;
        let outcome: RetryOutcome<()> = retry_while_locked(&policy(5), &sleeper, "remove", || {
            calls += 1;
            Err(PipelineError::Io(io::Error::from(io::ErrorKind::InvalidData)))
        });

        assert_eq!(calls, 1);
        assert!(matches!(outcome, RetryOutcome::Aborted { attempts: 1, .. }));
        assert!(sleeper.waits().is_empty());
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let sleeper = RecordingSleeper::new();
        let outcome = retry_while_locked(&policy(0), &sleeper, "save", || Ok(()));
        assert_eq!(outcome.attempts(), 1);
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_attempts: 8,
            delay: Duration::from_secs(1),
            strategy: BackoffStrategy::Exponential,
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(p.delay_after(1), Duration::from_secs(1));
        assert_eq!(p.delay_after(2), Duration::from_secs(2));
        assert_eq!(p.delay_after(3), Duration::from_secs(4));
        assert_eq!(p.delay_after(4), Duration::from_secs(5));
        assert_eq!(p.delay_after(40), Duration::from_secs(5));
    }
}
