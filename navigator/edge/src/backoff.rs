use rand::Rng;
use std::time::Duration;

/// Jittered exponential backoff for the manager connection.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

// === impl Backoff ===

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempt: 0,
        }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// The next delay: exponential in the attempt count, capped, with the
    /// actual wait drawn uniformly from the upper half of the step.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        let step = self.base.saturating_mul(factor).min(self.cap);

        let low = step.as_millis() as u64 / 2;
        let high = (step.as_millis() as u64).max(1);
        Duration::from_millis(rand::thread_rng().gen_range(low..=high))
    }
}
