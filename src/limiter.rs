use std::time::Instant;

/// Adaptive concurrency limit for the download orchestrator.
///
/// Direct port of `_AdaptiveConcurrency` in
/// `examples/original_source/tardis_client/data_downloader.py`: starts at a
/// ceiling, floored at 1; every successful drain bumps the limit by one (up
/// to the ceiling); every HTTP 429 cuts it to 70%, debounced to at most once
/// every two seconds so a burst of 429s doesn't collapse the limit (spec.md
/// §4.4, §9).
#[derive(Debug)]
pub struct AdaptiveLimiter {
    limit: usize,
    minimum: usize,
    maximum: usize,
    last_throttle: Option<Instant>,
}

impl AdaptiveLimiter {
    pub fn new(maximum: usize) -> Self {
        Self {
            limit: maximum,
            minimum: 1,
            maximum,
            last_throttle: None,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Called once per successfully-drained in-flight task.
    pub fn on_success(&mut self) {
        self.limit = (self.limit + 1).min(self.maximum);
    }

    /// Called on every observed HTTP 429; a no-op within 2s of the last cut.
    pub fn on_throttle(&mut self, now: Instant) {
        if let Some(last) = self.last_throttle {
            if now.duration_since(last).as_secs_f64() < 2.0 {
                return;
            }
        }
        self.last_throttle = Some(now);
        self.limit = (self.limit * 7 / 10).max(self.minimum);
    }
}
