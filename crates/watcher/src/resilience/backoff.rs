use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

/// Exponential backoff parameters for one class of storage calls
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,

    /// Total attempts, the first call included
    pub max_attempts: u32,

    /// Give up once this much time has passed since the first attempt
    pub max_elapsed: Option<Duration>,

    /// Each delay is drawn from `interval * [1 - factor, 1 + factor]`
    pub randomization_factor: f64,
}

impl BackoffPolicy {
    /// Definition, settings and cadence reads: keep trying for hours rather than lose a cycle
    pub const fn relational() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            multiplier: 2.0,
            max_interval: Duration::from_secs(20),
            max_attempts: 15,
            max_elapsed: Some(Duration::from_secs(2 * 60 * 60)),
            randomization_factor: 0.5,
        }
    }

    /// Status writes and reads
    pub const fn search() -> Self {
        Self {
            initial_interval: Duration::from_millis(200),
            multiplier: 2.0,
            max_interval: Duration::from_secs(60),
            max_attempts: 20,
            max_elapsed: None,
            randomization_factor: 0.5,
        }
    }

    /// No retries at all
    pub const fn none() -> Self {
        Self {
            initial_interval: Duration::ZERO,
            multiplier: 1.0,
            max_interval: Duration::ZERO,
            max_attempts: 1,
            max_elapsed: None,
            randomization_factor: 0.0,
        }
    }

    pub fn start(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(*self)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::relational()
    }
}

/// Backoff state for one logical operation
#[derive(Debug)]
pub struct ExponentialBackoff {
    policy: BackoffPolicy,
    current_interval: Duration,
    attempts: u32,
    started: Instant,
}

impl ExponentialBackoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            current_interval: policy.initial_interval,
            attempts: 1,
            started: Instant::now(),
        }
    }

    /// Attempts made so far, counting the first one
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay before the next attempt, or `None` once the policy is exhausted
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempts >= self.policy.max_attempts {
            return None;
        }

        let delay = randomize(self.current_interval, self.policy.randomization_factor);
        if let Some(max_elapsed) = self.policy.max_elapsed {
            if self.started.elapsed() + delay > max_elapsed {
                return None;
            }
        }

        self.attempts += 1;
        self.current_interval = self
            .current_interval
            .mul_f64(self.policy.multiplier)
            .min(self.policy.max_interval);

        Some(delay)
    }
}

fn randomize(interval: Duration, factor: f64) -> Duration {
    if factor <= 0.0 || interval.is_zero() {
        return interval;
    }
    let factor = factor.min(1.0);
    let scale = rand::thread_rng().gen_range(1.0 - factor..=1.0 + factor);
    interval.mul_f64(scale)
}
