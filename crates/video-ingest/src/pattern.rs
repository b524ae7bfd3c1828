//! Synthetic source used when no camera is attached.

use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

use chrono::Utc;

use crate::{
    FrameSource,
    types::{CaptureError, DualResolution, Frame, FrameFormat, Resolution},
};

const SWEEP_PERIOD: Duration = Duration::from_secs(4);
const TARGET_RGB: [u8; 3] = [255, 255, 0];

struct PatternClock {
    started: Instant,
    last_low: Option<Instant>,
    last_full: Option<Instant>,
}

/// Renders a yellow square sweeping across a dark gradient.
///
/// Both streams are drawn from the same scene description in normalised
/// coordinates, so a box found in the low-resolution frame lands on the
/// square once scaled to the full-resolution frame.
pub struct TestPatternSource {
    resolutions: DualResolution,
    frame_interval: Duration,
    clock: Mutex<Option<PatternClock>>,
}

impl TestPatternSource {
    pub fn new(resolutions: DualResolution, framerate: u32) -> Self {
        let framerate = framerate.max(1);
        Self {
            resolutions,
            frame_interval: Duration::from_secs_f64(1.0 / framerate as f64),
            clock: Mutex::new(None),
        }
    }

    /// Corner box `(x0, y0, x1, y1)` of the square at `elapsed` for a frame of `size`.
    pub fn target_bounds(size: Resolution, elapsed: Duration) -> (i32, i32, i32, i32) {
        let side = (size.width.min(size.height) / 4).max(1);
        let phase = (elapsed.as_secs_f64() % SWEEP_PERIOD.as_secs_f64())
            / SWEEP_PERIOD.as_secs_f64();
        let sweep = if phase < 0.5 {
            phase * 2.0
        } else {
            2.0 - phase * 2.0
        };
        let x0 = (sweep * (size.width - side) as f64).round() as i32;
        let y0 = (size.height - side) / 2;
        (x0, y0, x0 + side - 1, y0 + side - 1)
    }

    /// Draw the scene at `elapsed` into a fresh frame.
    pub fn render(size: Resolution, elapsed: Duration) -> Frame {
        let (x0, y0, x1, y1) = Self::target_bounds(size, elapsed);
        let width = size.width.max(1);
        let height = size.height.max(1);
        let mut data = Vec::with_capacity(Frame::expected_len(width, height, FrameFormat::Rgb8));
        for y in 0..height {
            for x in 0..width {
                if x >= x0 && x <= x1 && y >= y0 && y <= y1 {
                    data.extend_from_slice(&TARGET_RGB);
                } else {
                    data.push((x * 48 / width) as u8);
                    data.push((y * 48 / height) as u8);
                    data.push(40);
                }
            }
        }
        Frame {
            data,
            width,
            height,
            timestamp_ms: Utc::now().timestamp_millis(),
            format: FrameFormat::Rgb8,
        }
    }

    fn capture(&self, low: bool) -> Result<Option<Frame>, CaptureError> {
        let mut guard = self
            .clock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let clock = guard.as_mut().ok_or(CaptureError::NotInitialised)?;
        let now = Instant::now();
        let last = if low {
            &mut clock.last_low
        } else {
            &mut clock.last_full
        };
        if let Some(previous) = *last {
            if now.duration_since(previous) < self.frame_interval {
                return Ok(None);
            }
        }
        *last = Some(now);
        let elapsed = now.duration_since(clock.started);
        drop(guard);

        let size = if low {
            self.resolutions.low
        } else {
            self.resolutions.full
        };
        Ok(Some(Self::render(size, elapsed)))
    }
}

impl FrameSource for TestPatternSource {
    fn name(&self) -> &str {
        "test-pattern"
    }

    fn resolutions(&self) -> DualResolution {
        self.resolutions
    }

    fn initialize(&self) -> Result<(), CaptureError> {
        let mut guard = self
            .clock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = Some(PatternClock {
            started: Instant::now(),
            last_low: None,
            last_full: None,
        });
        Ok(())
    }

    fn capture_low_res(&self) -> Result<Option<Frame>, CaptureError> {
        self.capture(true)
    }

    fn capture_full_res(&self) -> Result<Option<Frame>, CaptureError> {
        self.capture(false)
    }

    fn release(&self) {
        let mut guard = self
            .clock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = None;
    }
}
