/// Exponential backoff with symmetric jitter
use rand::Rng;
use std::time::{Duration, Instant};

/// Doubling backoff capped at `max`, with ±25% jitter so that a fleet of
/// consumers does not reconnect in lockstep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay for the first attempt
    pub base: Duration,
    /// Ceiling for the deterministic part of the delay
    pub max: Duration,
    /// Apply jitter of `delay / 4` in both directions
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(3),
            max: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter: true,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Deterministic part of the delay: `base * 2^(attempt - 1)`, capped at `max`.
    ///
    /// Attempts are numbered from 1; attempt 0 is treated as the first one.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay to wait before retry number `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        if !self.jitter {
            return delay;
        }

        let range = (delay / 4).as_nanos() as i64;
        if range <= 0 {
            return delay;
        }

        let jitter = rand::thread_rng().gen_range(-range..=range);
        if jitter >= 0 {
            delay.saturating_add(Duration::from_nanos(jitter as u64))
        } else {
            delay.saturating_sub(Duration::from_nanos(jitter.unsigned_abs()))
        }
    }
}

/// Attempt counter and start time of one retry episode.
///
/// Owned by a single caller; reset it after a success.
#[derive(Debug)]
pub struct RetryState {
    attempt: u32,
    started: Instant,
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryState {
    pub fn new() -> Self {
        Self {
            attempt: 0,
            started: Instant::now(),
        }
    }

    /// Record a failed attempt and return how long to wait before the next one.
    pub fn next_delay(&mut self, policy: &BackoffPolicy) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        policy.delay(self.attempt)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
        self.started = Instant::now();
    }
}
