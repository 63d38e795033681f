//! Bounded exponential backoff around a single external call.
//!
//! Stages route every collaborator call through [`with_retry`]. Retryable
//! error classes are re-attempted with `base * multiplier^(attempt-1)`
//! plus jitter; non-retryable classes fail immediately. Exhaustion hands
//! the last typed error back to the stage, which applies its fallback
//! policy — retries never unwind the pipeline.

use crate::collaborators::CollaboratorError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// The job-level cutoff, shared by every stage of one job. External
/// calls past the cutoff return [`CollaboratorError::Cancelled`], which
/// is non-retryable, so stages fall through to their fallback deltas
/// and the job finishes from whatever state it accumulated.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(duration: Duration) -> Self {
        Self(Instant::now() + duration)
    }

    /// A deadline that never arrives, for callers that bound work some
    /// other way.
    pub fn never() -> Self {
        Self(Instant::now() + Duration::from_secs(86_400 * 365))
    }

    /// Time left before the cutoff, `None` once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.0.checked_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_none()
    }
}

/// Retry configuration for one external call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    /// Upper bound of the uniform jitter added to each delay.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry (attempt is 1-based; the first retry
    /// follows attempt 1).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let backoff = self.base_delay.mul_f64(exp);
        let jitter_ms = if self.jitter.is_zero() {
            0
        } else {
            rand::rng().random_range(0..=self.jitter.as_millis() as u64)
        };
        backoff + Duration::from_millis(jitter_ms)
    }
}

/// Run `op` under the policy. Returns the first success, the first
/// non-retryable error, or the last error after exhausting attempts.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, CollaboratorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => {
                tracing::warn!("{label}: non-retryable failure: {err}");
                return Err(err);
            }
            Err(err) if attempt >= policy.max_attempts => {
                tracing::warn!(
                    "{label}: giving up after {} attempts: {err}",
                    policy.max_attempts
                );
                return Err(err);
            }
            Err(err) => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    "{label}: attempt {attempt}/{} failed ({err}), retrying in {:?}",
                    policy.max_attempts,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Apply a per-call deadline, mapping expiry to [`CollaboratorError::Timeout`]
/// so the retry classification sees it as transient.
pub async fn with_deadline<T, Fut>(
    deadline: Duration,
    fut: Fut,
) -> Result<T, CollaboratorError>
where
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Timeout),
    }
}

/// Apply both the per-call deadline and the job-level cutoff. A call
/// whose time limit was set by the cutoff (or that starts after it)
/// maps to `Cancelled` instead of `Timeout`: cancellation must not be
/// retried, a slow provider may be.
pub async fn with_cutoff<T, Fut>(
    per_call: Duration,
    cutoff: Deadline,
    fut: Fut,
) -> Result<T, CollaboratorError>
where
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    let Some(remaining) = cutoff.remaining() else {
        return Err(CollaboratorError::Cancelled);
    };
    match tokio::time::timeout(per_call.min(remaining), fut).await {
        Ok(result) => result,
        Err(_) if cutoff.is_expired() => Err(CollaboratorError::Cancelled),
        Err(_) => Err(CollaboratorError::Timeout),
    }
}
