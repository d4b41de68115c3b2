use std::time::Duration;

use celfs_config::BackoffConfig;
use rand::Rng;

/// Randomized exponential backoff.
///
/// Each delay is a uniformly random fraction of the current maximum, which
/// then doubles until it reaches the cap.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    next_max: Duration,
    cap: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, cap: Duration) -> Self {
        Self {
            next_max: initial.min(cap),
            cap,
        }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.initial(), config.cap())
    }

    pub fn next_delay(&mut self) -> Duration {
        let fraction: f64 = rand::rng().random();
        let delay = self.next_max.mul_f64(fraction);
        self.next_max = (self.next_max * 2).min(self.cap);
        delay
    }

    /// Sleep for the next delay.
    pub fn back_off(&mut self) {
        std::thread::sleep(self.next_delay());
    }
}
