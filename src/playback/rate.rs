use std::time::{Duration, Instant};

/// Weight of the previous average is `1 - 1/SMOOTHING` per observed tick.
const SMOOTHING: f64 = 50.0;

/// Exponential moving average of the observed tick rate, in ticks per
/// second. The engine never reads it.
#[derive(Debug, Clone)]
pub struct RateEstimator {
    average: f64,
    last: Option<Instant>,
}

impl RateEstimator {
    /// Seed the average with the nominal rate of `tick_period`.
    pub fn new(tick_period: Duration) -> Self {
        Self {
            average: 1.0 / tick_period.as_secs_f64(),
            last: None,
        }
    }

    /// Current smoothed rate in ticks per second.
    pub fn rate(&self) -> f64 {
        self.average
    }

    /// Forget the previous timestamp, e.g. after a pause.
    pub fn restart(&mut self, now: Instant) {
        self.last = Some(now);
    }

    /// Record a tick at `now`. The first call only stores the timestamp.
    pub fn observe(&mut self, now: Instant) {
        if let Some(last) = self.last {
            self.observe_interval(now.duration_since(last));
        }
        self.last = Some(now);
    }

    pub fn observe_interval(&mut self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return;
        }
        self.average += (1.0 / secs - self.average) / SMOOTHING;
    }

    /// Displayed localization throughput for a given `frames_per_update`.
    pub fn localizations_per_second(&self, frames_per_update: i64) -> f64 {
        self.average * frames_per_update as f64
    }

    /// `frames_per_update` that yields `per_second` localizations at the
    /// current rate, never below one.
    pub fn frames_for_rate(&self, per_second: f64) -> i64 {
        ((per_second / self.average).round() as i64).max(1)
    }
}
