//! Frame timing and scoped profiling
//!
//! `GameTimer` feeds the simulations their elapsed time; `ProfilerScope`
//! reports how long a block took when it goes out of scope.

use std::time::{Duration, Instant};

use tracing::debug;

/// Accumulates simulated time frame by frame.
///
/// Time is advanced explicitly with [`GameTimer::tick`] so headless runs and
/// tests are deterministic; [`GameTimer::tick_wall`] uses the real clock.
#[derive(Debug, Clone)]
pub struct GameTimer {
    total: f64,
    delta: f32,
    frames: u64,
    last_wall: Option<Instant>,
}

impl GameTimer {
    /// Timer at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            total: 0.0,
            delta: 0.0,
            frames: 0,
            last_wall: None,
        }
    }

    /// Advance by a fixed `dt` seconds.
    pub fn tick(&mut self, dt: f32) {
        let dt = dt.max(0.0);
        self.delta = dt;
        self.total += f64::from(dt);
        self.frames += 1;
    }

    /// Advance by the wall-clock time since the previous call.
    ///
    /// The first call records the start instant and advances by zero.
    pub fn tick_wall(&mut self) {
        let now = Instant::now();
        let dt = self
            .last_wall
            .map_or(0.0, |last| now.duration_since(last).as_secs_f32());
        self.last_wall = Some(now);
        self.tick(dt);
    }

    /// Seconds since the timer started.
    #[must_use]
    pub fn total_time(&self) -> f32 {
        self.total as f32
    }

    /// Length of the most recent tick in seconds.
    #[must_use]
    pub fn delta_time(&self) -> f32 {
        self.delta
    }

    /// Number of ticks so far.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frames
    }
}

impl Default for GameTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Measures elapsed time until dropped, then logs it at debug level.
pub struct ProfilerScope {
    start: Instant,
    name: &'static str,
}

impl ProfilerScope {
    /// Start timing `name`.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    /// Time since the scope was opened.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time since the scope was opened, in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for ProfilerScope {
    fn drop(&mut self) {
        debug!(scope = self.name, elapsed_ms = self.elapsed_ms(), "profiler scope");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::thread;

    #[test]
    fn test_profiler_scope_measures_time() {
        let scope = ProfilerScope::new("test");
        thread::sleep(Duration::from_millis(10));
        let elapsed = scope.elapsed_ms();
        assert!(elapsed >= 10.0, "Expected at least 10ms, got {elapsed}");
    }

    #[test]
    fn test_game_timer_ticks() {
        let mut timer = GameTimer::new();
        assert_eq!(timer.total_time(), 0.0);

        timer.tick(0.25);
        timer.tick(0.5);
        assert_relative_eq!(timer.total_time(), 0.75);
        assert_relative_eq!(timer.delta_time(), 0.5);
        assert_eq!(timer.frame_count(), 2);

        // Negative deltas are clamped
        timer.tick(-1.0);
        assert_relative_eq!(timer.total_time(), 0.75);
    }

    #[test]
    fn test_wall_tick_starts_at_zero() {
        let mut timer = GameTimer::new();
        timer.tick_wall();
        assert_eq!(timer.delta_time(), 0.0);
        thread::sleep(Duration::from_millis(2));
        timer.tick_wall();
        assert!(timer.delta_time() > 0.0);
    }
}
