use std::time::Duration;

/// Exponential backoff between Phase D attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    /// Delay after failed attempt `attempt` (1-based): `initial * 2^(attempt-1)`,
    /// capped at `max`
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial
            .saturating_mul(2u32.pow(exponent))
            .min(self.max)
    }
}
