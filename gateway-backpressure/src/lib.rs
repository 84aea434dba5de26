//! Backpressure (C4): samples queue depth and rolling success rate at a
//! fixed cadence and scales `max_concurrent` multiplicatively (§4.4).

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::Utc;
use gateway_core::model::{BackpressureState, LoadLevel};

const WINDOW: usize = 200;

struct Inner {
    baseline_concurrency: usize,
    outcomes: VecDeque<bool>,
    last_state: BackpressureState,
}

/// Samples load on demand (`sample`) rather than running its own task, so
/// callers decide the cadence — typically a `tokio::time::interval` loop
/// in `gateway-cli`.
pub struct Backpressure {
    inner: Mutex<Inner>,
}

impl Backpressure {
    pub fn new(baseline_concurrency: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                baseline_concurrency,
                outcomes: VecDeque::with_capacity(WINDOW),
                last_state: BackpressureState {
                    level: LoadLevel::Normal,
                    queue_depth_ratio: 0.0,
                    rolling_success_rate: 1.0,
                    sampled_at: Utc::now(),
                },
            }),
        }
    }

    pub fn record_outcome(&self, success: bool) {
        let mut inner = self.inner.lock().unwrap();
        if inner.outcomes.len() == WINDOW {
            inner.outcomes.pop_front();
        }
        inner.outcomes.push_back(success);
    }

    fn load_level(queue_depth_ratio: f64, success_rate: f64) -> LoadLevel {
        if queue_depth_ratio > 0.90 || success_rate < 0.5 {
            LoadLevel::Critical
        } else if queue_depth_ratio >= 0.75 {
            LoadLevel::High
        } else if queue_depth_ratio >= 0.50 {
            LoadLevel::Elevated
        } else {
            LoadLevel::Normal
        }
    }

    /// Recomputes the load level from the current queue depth ratio and
    /// rolling success rate, returning the new `max_concurrent` budget.
    pub fn sample(&self, queue_depth: usize, max_queue_depth: usize) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let queue_depth_ratio = if max_queue_depth == 0 {
            0.0
        } else {
            queue_depth as f64 / max_queue_depth as f64
        };
        let success_rate = if inner.outcomes.is_empty() {
            1.0
        } else {
            inner.outcomes.iter().filter(|s| **s).count() as f64 / inner.outcomes.len() as f64
        };
        let level = Self::load_level(queue_depth_ratio, success_rate);
        inner.last_state = BackpressureState {
            level,
            queue_depth_ratio,
            rolling_success_rate: success_rate,
            sampled_at: Utc::now(),
        };
        (inner.baseline_concurrency as f64 * level.scale_factor()).max(1.0) as usize
    }

    pub fn state(&self) -> BackpressureState {
        self.inner.lock().unwrap().last_state.clone()
    }

    /// `false` in the stressed tiers (High/Critical); the HTTP layer
    /// consults this before enqueue (§4.4).
    pub fn should_accept_request(&self) -> (bool, Option<String>) {
        let state = self.state();
        match state.level {
            LoadLevel::High | LoadLevel::Critical => (
                false,
                Some(format!("gateway under {:?} load", state.level)),
            ),
            _ => (true, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_load_scales_to_full_baseline() {
        let bp = Backpressure::new(100);
        let limit = bp.sample(10, 100);
        assert_eq!(limit, 100);
    }

    #[test]
    fn high_load_scales_down() {
        let bp = Backpressure::new(100);
        let limit = bp.sample(80, 100);
        assert_eq!(limit, 50);
    }

    #[test]
    fn critical_load_from_low_success_rate() {
        let bp = Backpressure::new(100);
        for _ in 0..10 {
            bp.record_outcome(false);
        }
        let limit = bp.sample(10, 100);
        assert_eq!(limit, 25);
    }

    #[test]
    fn should_accept_false_under_high_load() {
        let bp = Backpressure::new(100);
        bp.sample(80, 100);
        let (accept, reason) = bp.should_accept_request();
        assert!(!accept);
        assert!(reason.is_some());
    }
}
