use std::time::{Duration, Instant};

/// Wall-clock delta source for the render loop.
#[derive(Debug, Clone, Copy)]
pub struct FrameClock {
    start: Instant,
    last: Instant,
    delta: Duration,
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameClock {
    pub fn new() -> Self {
        let now = Instant::now();
        Self { start: now, last: now, delta: Duration::ZERO }
    }

    /// Advances to now and returns the seconds since the previous tick.
    pub fn tick(&mut self) -> f32 {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> f32 {
        self.delta = now.saturating_duration_since(self.last);
        self.last = now;
        self.delta.as_secs_f32()
    }

    pub fn delta_seconds(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    pub fn elapsed_seconds(&self) -> f32 {
        self.last.duration_since(self.start).as_secs_f32()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_reports_delta_since_previous_tick() {
        let mut clock = FrameClock::new();
        let base = clock.last;
        assert!((clock.tick_at(base + Duration::from_millis(16)) - 0.016).abs() < 1e-6);
        assert!((clock.tick_at(base + Duration::from_millis(48)) - 0.032).abs() < 1e-6);
        assert!((clock.elapsed_seconds() - 0.048).abs() < 1e-6);
    }

    #[test]
    fn clock_never_goes_backwards() {
        let mut clock = FrameClock::new();
        let base = clock.last;
        clock.tick_at(base + Duration::from_millis(10));
        assert_eq!(clock.tick_at(base), 0.0);
    }
}
