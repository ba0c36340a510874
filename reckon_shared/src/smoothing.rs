//! Smoothing-window computation.
//!
//! When fresh ground truth arrives for a remote entity, snapping the
//! displayed pose to it pops visually. Instead the correction is blended in
//! over a bounded window. The window adapts to how often the sender actually
//! publishes: smoothing over roughly one inter-update interval means the
//! blend finishes just as the next update tends to arrive.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Tuning for the smoothing window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SmoothingConfig {
    /// Shortest allowed window, seconds.
    pub min_window: f32,
    /// Longest allowed window, seconds. Also the fallback before any
    /// inter-update interval has been observed.
    pub max_window: f32,
    /// Positional error at or beyond which the pose snaps instead of blending.
    pub teleport_distance: f32,
    /// Number of inter-update intervals averaged for the base window.
    pub interval_history: usize,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            min_window: 0.05,
            max_window: 0.6,
            teleport_distance: 25.0,
            interval_history: 8,
        }
    }
}

/// Running average of the time between accepted updates.
#[derive(Debug, Default)]
pub struct UpdateIntervalTracker {
    last_arrival: Option<f64>,
    intervals: VecDeque<f32>,
    capacity: usize,
}

impl UpdateIntervalTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            last_arrival: None,
            intervals: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Records an update arrival at local time `now` (seconds).
    pub fn observe(&mut self, now: f64) {
        if let Some(last) = self.last_arrival {
            let dt = (now - last) as f32;
            if dt > 0.0 {
                self.intervals.push_back(dt);
                while self.intervals.len() > self.capacity {
                    self.intervals.pop_front();
                }
            }
        }
        self.last_arrival = Some(now);
    }

    /// Average observed interval, or `None` until two updates have arrived.
    pub fn average(&self) -> Option<f32> {
        if self.intervals.is_empty() {
            return None;
        }
        Some(self.intervals.iter().sum::<f32>() / self.intervals.len() as f32)
    }
}

/// Computes the smoothing window for a newly accepted update.
///
/// `translation_error` is the distance between the displayed pose and the
/// new ground truth; `speed` is the magnitude of the new reported velocity.
///
/// The base window is the average update interval clamped to the configured
/// range. A fast mover gets a shorter window: a correction should never take
/// longer to play out than the entity itself would take to cover it, so the
/// window is clamped to `translation_error / speed`. An error at or past the
/// teleport distance returns a zero window (snap).
pub fn smoothing_window(
    cfg: &SmoothingConfig,
    avg_interval: Option<f32>,
    translation_error: f32,
    speed: f32,
) -> f32 {
    if translation_error >= cfg.teleport_distance {
        return 0.0;
    }
    if translation_error <= 0.0 {
        return 0.0;
    }

    let mut window = avg_interval
        .unwrap_or(cfg.max_window)
        .clamp(cfg.min_window, cfg.max_window);

    const SPEED_EPSILON: f32 = 1e-3;
    if speed > SPEED_EPSILON {
        let catch_up = translation_error / speed;
        if catch_up < window {
            window = catch_up.max(0.0);
        }
    }

    window
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_tracker_averages() {
        let mut tracker = UpdateIntervalTracker::new(4);
        assert_eq!(tracker.average(), None);
        tracker.observe(0.0);
        assert_eq!(tracker.average(), None);
        tracker.observe(0.1);
        tracker.observe(0.3);
        let avg = tracker.average().unwrap();
        assert!((avg - 0.15).abs() < 1e-5);
    }

    #[test]
    fn interval_tracker_drops_old_samples() {
        let mut tracker = UpdateIntervalTracker::new(2);
        for i in 0..10 {
            tracker.observe(i as f64);
        }
        // Only the last two one-second intervals remain.
        assert!((tracker.average().unwrap() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn window_clamps_to_configured_range() {
        let cfg = SmoothingConfig::default();
        let w = smoothing_window(&cfg, Some(10.0), 1.0, 0.0);
        assert!((w - cfg.max_window).abs() < 1e-6);
        let w = smoothing_window(&cfg, Some(0.001), 1.0, 0.0);
        assert!((w - cfg.min_window).abs() < 1e-6);
    }

    #[test]
    fn fast_mover_shrinks_window() {
        let cfg = SmoothingConfig::default();
        // 0.1 m of error at 10 m/s: the mover covers it in 0.01 s.
        let w = smoothing_window(&cfg, Some(0.5), 0.1, 10.0);
        assert!((w - 0.01).abs() < 1e-5);
    }

    #[test]
    fn slow_mover_keeps_base_window() {
        let cfg = SmoothingConfig::default();
        let w = smoothing_window(&cfg, Some(0.2), 5.0, 0.01);
        assert!((w - 0.2).abs() < 1e-6);
    }

    #[test]
    fn teleport_snaps() {
        let cfg = SmoothingConfig::default();
        assert_eq!(smoothing_window(&cfg, Some(0.2), 25.0, 1.0), 0.0);
        assert_eq!(smoothing_window(&cfg, Some(0.2), 100.0, 1.0), 0.0);
    }

    #[test]
    fn zero_error_needs_no_window() {
        let cfg = SmoothingConfig::default();
        assert_eq!(smoothing_window(&cfg, Some(0.2), 0.0, 1.0), 0.0);
    }
}
