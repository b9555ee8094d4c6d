//! Write-then-verify with bounded retries.
//!
//! The device accepts a write and may still clamp or drop values, so a write
//! only counts once the echoed copy matches what was sent. The policy here is
//! generic over the submitted and echoed types and knows nothing about HTTP:
//! the caller hands in a closure that performs one write attempt.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{FieldMismatch, WriteError};

/// Compares a submitted value against the device's echo of it.
pub trait Echoes<E> {
    /// Every field whose echoed value differs from the submitted one.
    fn mismatches(&self, echo: &E) -> Vec<FieldMismatch>;
}

/// Outcome of a single write attempt, before verification.
#[derive(Debug, Clone)]
pub struct WriteAck<E> {
    pub success: bool,
    pub echo: Option<E>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::new(3, Duration::from_millis(500))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_step: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            backoff_step,
        }
    }

    /// Delay after the given (1-based) failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }

    /// Runs `attempt` until the echo matches `submitted` or attempts run out.
    ///
    /// Transport failures, a falsy success flag, a missing echo and echo
    /// mismatches are all treated as a failed attempt. The last failure is
    /// wrapped in [`WriteError::Exhausted`].
    pub async fn write_verified<P, E, F, Fut>(
        &self,
        submitted: &P,
        mut attempt: F,
    ) -> Result<E, WriteError>
    where
        P: Echoes<E>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<WriteAck<E>, WriteError>>,
    {
        let mut last_error = None;

        for n in 1..=self.max_attempts {
            match self.verify(submitted, attempt().await, n) {
                Ok(echo) => {
                    debug!(attempt = n, "write verified");
                    return Ok(echo);
                }
                Err(err) => {
                    if n < self.max_attempts {
                        let delay = self.backoff(n);
                        warn!(
                            attempt = n,
                            max_attempts = self.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "write attempt failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        warn!(attempt = n, error = %err, "final write attempt failed");
                    }
                    last_error = Some(err);
                }
            }
        }

        Err(WriteError::Exhausted {
            attempts: self.max_attempts,
            last: Box::new(last_error.unwrap_or(WriteError::Rejected)),
        })
    }

    fn verify<P, E>(
        &self,
        submitted: &P,
        result: Result<WriteAck<E>, WriteError>,
        attempt: u32,
    ) -> Result<E, WriteError>
    where
        P: Echoes<E>,
    {
        let ack = result?;
        if !ack.success {
            return Err(WriteError::Rejected);
        }
        let echo = ack.echo.ok_or(WriteError::MissingEcho)?;
        let fields = submitted.mismatches(&echo);
        if fields.is_empty() {
            Ok(echo)
        } else {
            Err(WriteError::Mismatch {
                attempts: attempt,
                fields,
            })
        }
    }
}
