use crate::config::PublisherConfig;
use crate::error::PublishError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Result of a single transfer attempt
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    Success(T),
    /// Network or server trouble; worth another try
    Transient(String),
    /// The remote host will never accept this request
    Permanent(PublishError),
    /// The remote host reports the quota spent
    QuotaExceeded(String),
}

/// Where a bounded retry loop ended
#[derive(Debug)]
pub enum RetryResult<T> {
    Succeeded { value: T, attempts: u32 },
    /// Transient failures used up every retry
    Exhausted { reason: String, attempts: u32 },
    Rejected { error: PublishError, attempts: u32 },
    /// Stopped early for quota or shutdown; the work is still owed
    Deferred { reason: String, attempts: u32 },
}

/// Exponential backoff with jitter and a fixed retry budget
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_retries,
            base,
            max,
            jitter: true,
        }
    }

    pub fn from_config(config: &PublisherConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.base_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        )
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let delay = self.base.saturating_mul(1u32 << exponent).min(self.max);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let spread = delay.as_millis() as u64 / 4;
        let extra = rand::thread_rng().gen_range(0..=spread);
        (delay + Duration::from_millis(extra)).min(self.max)
    }

    /// Drive `attempt` until it succeeds, fails for good, or runs out of retries
    ///
    /// `attempt` receives the 1-based attempt number. Cancellation is honored
    /// between attempts only, so a transfer in progress is never cut short.
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> RetryResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = AttemptOutcome<T>>,
    {
        let mut number = 1;
        loop {
            match attempt(number).await {
                AttemptOutcome::Success(value) => {
                    return RetryResult::Succeeded {
                        value,
                        attempts: number,
                    }
                }
                AttemptOutcome::Permanent(error) => {
                    return RetryResult::Rejected {
                        error,
                        attempts: number,
                    }
                }
                AttemptOutcome::QuotaExceeded(reason) => {
                    return RetryResult::Deferred {
                        reason,
                        attempts: number,
                    }
                }
                AttemptOutcome::Transient(reason) => {
                    if number >= self.max_attempts() {
                        return RetryResult::Exhausted {
                            reason,
                            attempts: number,
                        };
                    }

                    let delay = self.delay_for(number);
                    warn!(
                        "{}: attempt {}/{} failed ({}), retrying in {:?}",
                        label,
                        number,
                        self.max_attempts(),
                        reason,
                        delay
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {
                            debug!("{}: retry abandoned for shutdown", label);
                            return RetryResult::Deferred {
                                reason: "shutdown requested".to_string(),
                                attempts: number,
                            };
                        }
                    }
                    number += 1;
                }
            }
        }
    }
}
