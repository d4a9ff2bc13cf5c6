use std::time::{Duration, Instant};

use stowage_bundles::CacheProvider;
use stowage_core::profiling::{self, profile_function};

/// Measures frame deltas and feeds them to a [`CacheProvider`].
///
/// Deltas are capped so a long hitch (a debugger break, a stalled frame)
/// does not expire every retain window at once.
///
/// # Example
/// ```ignore
/// let mut clock = FrameClock::new();
/// loop {
///     clock.drive(&mut cache);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct FrameClock {
    /// Delta of the last frame, capped, unscaled
    delta: Duration,
    /// Sum of all capped deltas
    elapsed: Duration,
    frame_count: u64,
    /// Multiplier applied to the delta handed to the cache (0.0 = frozen)
    time_scale: f32,
    max_delta: Duration,
    last_frame_time: Instant,
}

impl FrameClock {
    /// A clock starting now, with a 250ms delta cap and unit time scale.
    pub fn new() -> Self {
        Self {
            delta: Duration::ZERO,
            elapsed: Duration::ZERO,
            frame_count: 0,
            time_scale: 1.0,
            max_delta: Duration::from_millis(250),
            last_frame_time: Instant::now(),
        }
    }

    /// Start a frame from the wall clock.
    pub fn update(&mut self) {
        profile_function!();
        let now = Instant::now();
        let raw = now.duration_since(self.last_frame_time);
        self.last_frame_time = now;
        self.advance(raw);
    }

    /// Start a frame that lasted `raw`, without reading the wall clock.
    pub fn advance(&mut self, raw: Duration) {
        if raw > self.max_delta {
            tracing::debug!("Frame took {:?}, capping delta to {:?}", raw, self.max_delta);
        }
        self.delta = raw.min(self.max_delta);
        self.elapsed += self.delta;
        self.frame_count += 1;
    }

    /// Start a frame from the wall clock and tick the cache with its delta.
    pub fn drive(&mut self, cache: &mut CacheProvider) {
        profiling::new_frame();
        self.update();
        cache.tick(self.delta_seconds());
    }

    /// Like [`drive`](Self::drive) with a fixed frame length.
    pub fn drive_by(&mut self, cache: &mut CacheProvider, raw: Duration) {
        self.advance(raw);
        cache.tick(self.delta_seconds());
    }

    #[inline]
    pub fn delta(&self) -> Duration {
        self.delta
    }

    /// Scaled delta in seconds, as handed to the cache.
    #[inline]
    pub fn delta_seconds(&self) -> f32 {
        self.delta.as_secs_f32() * self.time_scale
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    #[inline]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    #[inline]
    pub fn time_scale(&self) -> f32 {
        self.time_scale
    }

    /// Negative scales clamp to zero.
    pub fn set_time_scale(&mut self, scale: f32) {
        self.time_scale = scale.max(0.0);
    }

    /// Freeze retain timers while still pumping completions.
    pub fn pause(&mut self) {
        self.time_scale = 0.0;
    }

    pub fn resume(&mut self) {
        self.time_scale = 1.0;
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        self.time_scale == 0.0
    }

    #[inline]
    pub fn max_delta(&self) -> Duration {
        self.max_delta
    }

    pub fn set_max_delta(&mut self, max_delta: Duration) {
        self.max_delta = max_delta;
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_creation() {
        let clock = FrameClock::new();
        assert_eq!(clock.frame_count(), 0);
        assert_eq!(clock.delta(), Duration::ZERO);
        assert_eq!(clock.time_scale(), 1.0);
        assert!(!clock.is_paused());
    }

    #[test]
    fn test_advance_caps_delta() {
        let mut clock = FrameClock::new();
        clock.set_max_delta(Duration::from_millis(100));

        clock.advance(Duration::from_millis(40));
        assert_eq!(clock.delta(), Duration::from_millis(40));

        clock.advance(Duration::from_secs(3));
        assert_eq!(clock.delta(), Duration::from_millis(100));
        assert_eq!(clock.elapsed(), Duration::from_millis(140));
        assert_eq!(clock.frame_count(), 2);
    }

    #[test]
    fn test_time_scale() {
        let mut clock = FrameClock::new();
        clock.advance(Duration::from_millis(100));

        clock.set_time_scale(2.0);
        assert!((clock.delta_seconds() - 0.2).abs() < 1e-6);

        clock.set_time_scale(-1.0);
        assert!(clock.is_paused());
        assert_eq!(clock.delta_seconds(), 0.0);

        clock.resume();
        assert!((clock.delta_seconds() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_update_reads_wall_clock() {
        let mut clock = FrameClock::new();
        std::thread::sleep(Duration::from_millis(5));
        clock.update();
        assert_eq!(clock.frame_count(), 1);
        assert!(clock.delta() > Duration::ZERO);
    }
}
