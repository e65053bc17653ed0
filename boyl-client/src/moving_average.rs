use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Mean of the samples added within the last `window`.
pub struct MovingAverage {
    window: Duration,
    samples: Mutex<VecDeque<(f64, Instant)>>,
}

impl MovingAverage {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: Mutex::new(VecDeque::new()),
        }
    }

    pub fn add(&self, value: f64) {
        self.add_at(value, Instant::now());
    }

    /// Mean of the live samples, or `0.0` when there are none.
    pub fn get(&self) -> f64 {
        self.get_at(Instant::now())
    }

    fn add_at(&self, value: f64, now: Instant) {
        let mut samples = self.lock();
        samples.push_back((value, now));
        Self::expire(&mut samples, self.window, now);
    }

    fn get_at(&self, now: Instant) -> f64 {
        let mut samples = self.lock();
        Self::expire(&mut samples, self.window, now);
        if samples.is_empty() {
            return 0.0;
        }
        samples.iter().map(|(v, _)| v).sum::<f64>() / samples.len() as f64
    }

    fn expire(samples: &mut VecDeque<(f64, Instant)>, window: Duration, now: Instant) {
        while let Some((_, at)) = samples.front() {
            if now.duration_since(*at) <= window {
                break;
            }
            samples.pop_front();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<(f64, Instant)>> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
