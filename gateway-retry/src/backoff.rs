//! Backoff/jitter strategies, grounded in
//! `tower-retry-plus::backoff`'s `IntervalFunction` family.

use std::time::Duration;

pub trait IntervalFunction: Send + Sync {
    fn next_interval(&self, attempt: usize) -> Duration;
}

/// Exponential backoff with randomization, used for
/// `RetryableTransient`/`RetryableRateLimit` classifications (§4.8).
#[derive(Debug, Clone)]
pub struct ExponentialRandomBackoff {
    initial_interval: Duration,
    multiplier: f64,
    randomization_factor: f64,
    max_interval: Duration,
}

impl ExponentialRandomBackoff {
    pub fn new(initial_interval: Duration, max_interval: Duration) -> Self {
        Self {
            initial_interval,
            multiplier: 2.0,
            randomization_factor: 0.2,
            max_interval,
        }
    }

    pub fn randomization_factor(mut self, factor: f64) -> Self {
        self.randomization_factor = factor.clamp(0.0, 1.0);
        self
    }

    fn randomize(&self, duration: Duration) -> Duration {
        use rand::Rng;
        let mut rng = rand::rng();
        let delta = duration.as_secs_f64() * self.randomization_factor;
        let min = (duration.as_secs_f64() - delta).max(0.0);
        let max = duration.as_secs_f64() + delta;
        let randomized = rng.random_range(min..=max);
        Duration::from_secs_f64(randomized)
    }
}

impl IntervalFunction for ExponentialRandomBackoff {
    fn next_interval(&self, attempt: usize) -> Duration {
        let multiplier = self.multiplier.powi(attempt as i32);
        let interval = self.initial_interval.mul_f64(multiplier).min(self.max_interval);
        self.randomize(interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_and_caps() {
        let b = ExponentialRandomBackoff::new(Duration::from_millis(100), Duration::from_millis(500))
            .randomization_factor(0.0);
        assert_eq!(b.next_interval(0), Duration::from_millis(100));
        assert_eq!(b.next_interval(1), Duration::from_millis(200));
        assert_eq!(b.next_interval(2), Duration::from_millis(400));
        assert_eq!(b.next_interval(3), Duration::from_millis(500));
    }

    #[test]
    fn randomization_stays_in_range() {
        let b = ExponentialRandomBackoff::new(Duration::from_millis(100), Duration::from_secs(10))
            .randomization_factor(0.5);
        for _ in 0..20 {
            let d = b.next_interval(1);
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(300));
        }
    }
}
