//! Exponential backoff policy and a generic async retry helper.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Exponential backoff schedule.
///
/// Attempt `n` (1-based) is followed by a delay of
/// `initial_delay * multiplier^(n-1)`, clamped to `max_delay` when set.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Option<Duration>,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: None,
            max_attempts: 3,
        }
    }
}

impl BackoffPolicy {
    pub fn new(initial_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let delay = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// Sum of all delays a fully failing run would sleep.
    pub fn total_delay(&self) -> Duration {
        (1..self.max_attempts.max(1)).map(|a| self.delay_for(a)).sum()
    }
}

/// Why a retried operation gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The operation failed with an error it should not be retried on.
    Fatal { attempts: u32, error: E },
    /// The attempt budget ran out; carries the last error.
    Exhausted { attempts: u32, error: E },
    /// The token fired while waiting between attempts.
    Cancelled { attempts: u32, error: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Fatal { attempts, .. }
            | RetryError::Exhausted { attempts, .. }
            | RetryError::Cancelled { attempts, .. } => *attempts,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::Fatal { error, .. }
            | RetryError::Exhausted { error, .. }
            | RetryError::Cancelled { error, .. } => error,
        }
    }
}

/// Run `op` until it succeeds, fails fatally, or the policy is exhausted.
///
/// `op` receives the 1-based attempt number. `should_retry` decides whether a
/// failure is worth another attempt.
pub async fn retry<T, E, F, Fut>(
    policy: &BackoffPolicy,
    cancel: &CancellationToken,
    mut op: F,
    should_retry: impl Fn(&E) -> bool,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let error = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !should_retry(&error) {
            return Err(RetryError::Fatal {
                attempts: attempt,
                error,
            });
        }
        if attempt >= max_attempts {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                error,
            });
        }

        let delay = policy.delay_for(attempt);
        debug!(attempt, ?delay, "attempt failed, backing off");

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(RetryError::Cancelled { attempts: attempt, error });
            }
            _ = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
    }
}
