/*
[INPUT]:  Reconnect policy (base delay, growth factor, ceiling, jitter)
[OUTPUT]: Bounded, jittered delay per reconnect attempt
[POS]:    WebSocket layer - retry pacing for the reconnection controller
[UPDATE]: When changing the backoff curve or jitter strategy
*/

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with a delay ceiling and random jitter.
///
/// Jitter spreads simultaneous clients over a small window so a server
/// recovering from an outage is not hit by a reconnection storm.
#[derive(Debug)]
pub(crate) struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    factor: f64,
    jitter: Duration,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration, factor: f64, jitter: Duration) -> Self {
        Self {
            base,
            max,
            factor: factor.max(1.0),
            jitter,
            attempt: 0,
        }
    }

    /// Attempts consumed since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Called on a successful connect so the next failure starts small again
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Consume one attempt and return how long to wait before it
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let exponent = self.attempt.saturating_sub(1).min(63) as i32;
        let raw = self.base.as_secs_f64() * self.factor.powi(exponent);
        let capped = Duration::from_secs_f64(raw.min(self.max.as_secs_f64()));
        let delay = capped + self.random_jitter();
        delay.min(self.max)
    }

    fn random_jitter(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}
