//! Frame clock with a rolling frame-time average

use std::collections::VecDeque;
use std::time::Instant;

/// Longest frame the camera integrates over, in seconds
pub const MAX_DELTA: f64 = 0.25;

const AVERAGE_WINDOW: usize = 120;

/// Tracks frame delta time and the average used by the settings readout
pub struct FrameClock {
    /// Total elapsed time in seconds
    pub total_time: f64,
    /// Time since last frame in seconds
    pub delta_time: f64,
    last_instant: Instant,
    first_tick: bool,
    samples: VecDeque<f64>,
    sample_sum: f64,
}

impl Default for FrameClock {
    fn default() -> Self {
        Self {
            total_time: 0.0,
            delta_time: 0.0,
            last_instant: Instant::now(),
            first_tick: true,
            samples: VecDeque::with_capacity(AVERAGE_WINDOW),
            sample_sum: 0.0,
        }
    }
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock. Call once per frame.
    pub fn tick(&mut self) {
        let now = Instant::now();
        if self.first_tick {
            self.first_tick = false;
            self.last_instant = now;
            self.delta_time = 0.0;
            return;
        }
        let elapsed = now.duration_since(self.last_instant).as_secs_f64();
        self.last_instant = now;
        self.advance(elapsed);
    }

    /// Advance by a measured frame duration
    pub fn advance(&mut self, elapsed: f64) {
        let elapsed = elapsed.max(0.0);
        self.delta_time = elapsed.min(MAX_DELTA);
        self.total_time += self.delta_time;

        if self.samples.len() == AVERAGE_WINDOW {
            if let Some(old) = self.samples.pop_front() {
                self.sample_sum -= old;
            }
        }
        self.samples.push_back(elapsed);
        self.sample_sum += elapsed;
    }

    pub fn delta_seconds(&self) -> f32 {
        self.delta_time as f32
    }

    /// Average frame time in milliseconds over the recent window
    pub fn average_frame_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.sample_sum / self.samples.len() as f64 * 1000.0
    }

    pub fn average_fps(&self) -> f64 {
        let ms = self.average_frame_ms();
        if ms > 0.0 {
            1000.0 / ms
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_tick_has_zero_delta() {
        let mut clock = FrameClock::new();
        clock.tick();
        assert_eq!(clock.delta_time, 0.0);
        assert_eq!(clock.average_frame_ms(), 0.0);
        assert_eq!(clock.average_fps(), 0.0);
    }

    #[test]
    fn test_delta_is_clamped() {
        let mut clock = FrameClock::new();
        clock.advance(2.0);
        assert_eq!(clock.delta_time, MAX_DELTA);
        assert_eq!(clock.total_time, MAX_DELTA);
    }

    #[test]
    fn test_average_over_window() {
        let mut clock = FrameClock::new();
        for _ in 0..10 {
            clock.advance(0.010);
        }
        assert!((clock.average_frame_ms() - 10.0).abs() < 1e-9);
        assert!((clock.average_fps() - 100.0).abs() < 1e-6);

        // Old samples fall out once the window is full
        for _ in 0..AVERAGE_WINDOW {
            clock.advance(0.020);
        }
        assert!((clock.average_frame_ms() - 20.0).abs() < 1e-9);
    }
}
