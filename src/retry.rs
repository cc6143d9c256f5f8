use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::clock::Clock;

/// Classifies an error as transient. The default treats every error as retryable.
pub trait Retryable {
    fn is_retryable(&self) -> bool {
        true
    }
}

impl Retryable for anyhow::Error {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Upper bound on a single wait. 0 = uncapped.
    #[serde(default)]
    pub max_delay_ms: u64,
    #[serde(default)]
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: 0,
            jitter_ms: 0,
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl RetryPolicy {
    /// Run `operation`, retrying errors for which `E::is_retryable` holds.
    pub async fn run<F, Fut, T, E>(&self, clock: &dyn Clock, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        self.run_if(clock, operation, E::is_retryable).await
    }

    /// Run `operation`, retrying errors accepted by `retryable`.
    ///
    /// Non-retryable errors return immediately without consuming budget. After
    /// `max_attempts` failed attempts the last error is returned.
    pub async fn run_if<F, Fut, T, E, P>(
        &self,
        clock: &dyn Clock,
        mut operation: F,
        retryable: P,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        P: Fn(&E) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !retryable(&err) {
                debug!(attempt, error = %err, "non-retryable error, giving up");
                return Err(err);
            }

            if attempt >= max_attempts {
                error!(
                    attempt,
                    max_attempts,
                    error = %err,
                    "retries exhausted"
                );
                return Err(err);
            }

            let wait = self.backoff(attempt);
            warn!(
                attempt,
                max_attempts,
                error = %err,
                "Attempt {}/{} failed. Retrying in {:?}...",
                attempt,
                max_attempts,
                wait
            );
            clock.sleep(wait).await;
        }
    }

    /// Delay after the given (1-based) failed attempt:
    /// `initial_delay * multiplier^(attempt - 1)`, capped, plus jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let raw = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = if self.max_delay_ms > 0 {
            raw.min(self.max_delay_ms as f64)
        } else {
            raw
        };

        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };

        // float-to-int casts saturate, so an overflowing backoff lands on u64::MAX
        Duration::from_millis((capped.max(0.0) as u64).saturating_add(jitter))
    }
}
