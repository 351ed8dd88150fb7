//! Timing policies: reconnect backoff for watches and pacing for submissions.
//!
//! Watches that fail transiently are re-established with exponential backoff
//! and jitter. Child submissions are separated by a fixed minimum interval
//! that stands in for the admission latency a real control plane would have.

use std::time::Duration;

use rand::Rng;

/// Reconnect policy for watch subscriptions.
#[derive(Clone, Debug)]
pub struct BackoffPolicy {
    /// Maximum number of consecutive reconnect attempts (0 = never reconnect)
    pub max_attempts: u32,
    /// Delay before the first reconnect
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier applied after every attempt
    pub backoff_multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Policy allowing at most `attempts` consecutive reconnects
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Policy that gives up on the first stream failure
    pub fn never() -> Self {
        Self::with_max_attempts(0)
    }

    /// Whether another reconnect is allowed after `attempt` failures
    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }

    /// Un-jittered delay before reconnect number `attempt` (1-based), capped at `max_delay`
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Delay before reconnect number `attempt` with 0.5x..1.5x jitter
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if base.is_zero() {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        Duration::from_secs_f64(base.as_secs_f64() * jitter)
    }
}

/// Minimum interval observed before each child submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pacing {
    interval: Duration,
}

impl Pacing {
    /// Pacing with the given interval
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// No delay between submissions
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Configured interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait out the interval
    pub async fn wait(&self) {
        if !self.interval.is_zero() {
            tokio::time::sleep(self.interval).await;
        }
    }
}
