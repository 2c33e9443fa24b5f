//! Backoff delay carried through one retry sequence.

use std::time::Duration;

/// Upper bound for the inter-attempt delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_millis(10_000);
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 1.5;

/// Current delay of one call sequence.
///
/// The delay only grows and never passes `max`. Each sequence owns its own
/// value, so a shared [`RetryConfig`](super::RetryConfig) is never mutated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    current: Duration,
    multiplier: f64,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, multiplier: f64, max: Duration) -> Self {
        let multiplier = if multiplier.is_finite() && multiplier >= 1.0 {
            multiplier
        } else {
            1.0
        };
        Self {
            current: initial.min(max),
            multiplier,
            max,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Grow the delay and return the new value.
    pub fn advance(&mut self) -> Duration {
        self.current = self.current.mul_f64(self.multiplier).min(self.max);
        self.current
    }

    /// Delays a sequence of `attempts` calls would sleep between attempts.
    pub fn schedule(mut self, attempts: u32) -> Vec<Duration> {
        let gaps = attempts.saturating_sub(1) as usize;
        let mut delays = Vec::with_capacity(gaps);
        for _ in 0..gaps {
            delays.push(self.current);
            self.advance();
        }
        delays
    }
}
