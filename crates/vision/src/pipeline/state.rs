//! The single piece of shared mutable state: the latest detection snapshot.
//!
//! Snapshots are immutable and published by swapping one `Arc` under a lock,
//! so a reader holds either the previous or the next snapshot and never a
//! partially written list. The critical section is a pointer swap or clone.

use std::{
    sync::{Arc, Mutex, PoisonError, RwLock},
    time::Instant,
};

use chrono::Utc;
use ml_core::Detection;

/// Number of publishes per FPS measurement window.
pub const FPS_WINDOW: u32 = 30;

#[derive(Debug, Clone, Default)]
pub struct DetectionSnapshot {
    /// Detector output order, already filtered.
    pub detections: Vec<Detection>,
    /// Inference throughput as of this publish.
    pub fps: f32,
    /// Publish counter, 0 for the initial empty snapshot.
    pub sequence: u64,
    pub timestamp_ms: i64,
}

/// Windowed throughput estimate.
///
/// The value only changes once every `window` ticks:
/// `fps = window / seconds_since_window_start`.
#[derive(Debug)]
pub struct FpsCounter {
    window: u32,
    count: u32,
    window_start: Instant,
    fps: f32,
}

impl FpsCounter {
    pub fn new(window: u32, start: Instant) -> Self {
        Self {
            window: window.max(1),
            count: 0,
            window_start: start,
            fps: 0.0,
        }
    }

    pub fn tick(&mut self, now: Instant) -> f32 {
        self.count += 1;
        if self.count >= self.window {
            let elapsed = now.saturating_duration_since(self.window_start).as_secs_f64();
            if elapsed > 0.0 {
                self.fps = (self.count as f64 / elapsed) as f32;
            }
            self.count = 0;
            self.window_start = now;
        }
        self.fps
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }
}

pub struct DetectionState {
    current: RwLock<Arc<DetectionSnapshot>>,
    fps: Mutex<FpsCounter>,
}

impl Default for DetectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionState {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// State whose first FPS window opens at `start`.
    pub fn starting_at(start: Instant) -> Self {
        Self {
            current: RwLock::new(Arc::new(DetectionSnapshot::default())),
            fps: Mutex::new(FpsCounter::new(FPS_WINDOW, start)),
        }
    }

    /// Replace the stored detections wholesale and feed the FPS estimator.
    pub fn publish(&self, detections: Vec<Detection>) -> Arc<DetectionSnapshot> {
        self.publish_at(detections, Instant::now())
    }

    pub fn publish_at(&self, detections: Vec<Detection>, now: Instant) -> Arc<DetectionSnapshot> {
        let fps = self
            .fps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tick(now);

        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let next = Arc::new(DetectionSnapshot {
            detections,
            fps,
            sequence: current.sequence + 1,
            timestamp_ms: Utc::now().timestamp_millis(),
        });
        *current = next.clone();
        next
    }

    /// Current snapshot. Cloning the `Arc` is the whole critical section.
    pub fn snapshot(&self) -> Arc<DetectionSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn fps(&self) -> f32 {
        self.snapshot().fps
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ml_core::{BoundingBox, ClassTable};

    use super::*;

    fn detection(class_id: usize) -> Detection {
        Detection::new(
            class_id,
            0.9,
            BoundingBox::new(1, 2, 3, 4),
            &ClassTable::default(),
        )
    }

    #[test]
    fn snapshot_returns_last_publish() {
        let state = DetectionState::new();
        assert!(state.snapshot().detections.is_empty());
        assert_eq!(state.snapshot().sequence, 0);

        let published = vec![detection(0), detection(3)];
        state.publish(published.clone());
        let snap = state.snapshot();
        assert_eq!(snap.detections, published);
        assert_eq!(snap.sequence, 1);
        assert_eq!(state.snapshot().detections, published);

        state.publish(Vec::new());
        assert!(state.snapshot().detections.is_empty());
        assert_eq!(state.snapshot().sequence, 2);
    }

    #[test]
    fn held_snapshot_is_not_mutated_by_later_publish() {
        let state = DetectionState::new();
        state.publish(vec![detection(1)]);
        let held = state.snapshot();
        state.publish(vec![detection(2), detection(2)]);
        assert_eq!(held.detections.len(), 1);
        assert_eq!(held.detections[0].class_id, 1);
    }

    #[test]
    fn fps_after_full_window() {
        let start = Instant::now();
        let state = DetectionState::starting_at(start);
        let step = Duration::from_millis(50);
        for cycle in 1..=FPS_WINDOW {
            state.publish_at(Vec::new(), start + step * cycle);
        }
        let expected = FPS_WINDOW as f32 / (step * FPS_WINDOW).as_secs_f32();
        assert!((state.fps() - expected).abs() < 1e-3, "fps {}", state.fps());
    }

    #[test]
    fn fps_is_zero_before_first_window() {
        let start = Instant::now();
        let state = DetectionState::starting_at(start);
        for cycle in 1..FPS_WINDOW {
            state.publish_at(Vec::new(), start + Duration::from_millis(10) * cycle);
        }
        assert_eq!(state.fps(), 0.0);
    }

    #[test]
    fn fps_keeps_previous_value_within_window() {
        let start = Instant::now();
        let mut counter = FpsCounter::new(FPS_WINDOW, start);
        let mut now = start;
        for _ in 0..FPS_WINDOW {
            now += Duration::from_millis(100);
            counter.tick(now);
        }
        let first = counter.fps();
        assert!((first - 10.0).abs() < 1e-3);

        for _ in 0..FPS_WINDOW - 1 {
            now += Duration::from_millis(10);
            assert_eq!(counter.tick(now), first);
        }
        now += Duration::from_millis(10);
        let second = counter.tick(now);
        assert!((second - 100.0).abs() < 1e-2, "second window {second}");
    }
}
