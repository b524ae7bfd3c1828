use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use chrono::Local;
use ml_core::Detection;
use serde::Serialize;

use crate::pipeline::{
    hub::FrameHub,
    state::DetectionState,
    watchdog::{PipelineHealth, WatchdogState},
};

/// Handles shared by the pipeline threads and the HTTP handlers.
#[derive(Clone)]
pub struct PipelineContext {
    pub state: Arc<DetectionState>,
    pub hub: Arc<FrameHub>,
    /// Cleared once at shutdown; every loop and stream polls it.
    pub running: Arc<AtomicBool>,
    pub health: Arc<PipelineHealth>,
    pub watchdog: Arc<WatchdogState>,
    pub detector_name: Arc<str>,
    pub jpeg_quality: u8,
}

impl PipelineContext {
    pub fn new(detector_name: &str, jpeg_quality: u8) -> Self {
        Self {
            state: Arc::new(DetectionState::new()),
            hub: Arc::new(FrameHub::new()),
            running: Arc::new(AtomicBool::new(true)),
            health: Arc::new(PipelineHealth::new()),
            watchdog: Arc::new(WatchdogState::new()),
            detector_name: Arc::from(detector_name),
            jpeg_quality,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> StatusResponse {
        let running = self.is_running();
        StatusResponse {
            status: if running { "running" } else { "stopped" },
            running,
            fps: self.state.fps(),
            timestamp: Local::now().to_rfc3339(),
            detector: self.detector_name.to_string(),
            viewers: self.hub.viewers(),
            frames: self.hub.sequence(),
            stalled: self.watchdog.stalled().map(|component| component.label()),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub running: bool,
    pub fps: f32,
    /// RFC 3339 local time of the query.
    pub timestamp: String,
    pub detector: String,
    pub viewers: usize,
    /// Annotated frames produced so far.
    pub frames: u64,
    /// Stage the watchdog currently reports as stalled.
    pub stalled: Option<&'static str>,
}

#[derive(Serialize)]
pub struct DetectionsResponse<'a> {
    pub sequence: u64,
    pub timestamp_ms: i64,
    pub fps: f32,
    pub detections: &'a [Detection],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_running_flag() {
        let ctx = PipelineContext::new("color-blob", 85);
        let status = ctx.status();
        assert_eq!(status.status, "running");
        assert!(status.running);
        assert_eq!(status.detector, "color-blob");
        assert!(chrono::DateTime::parse_from_rfc3339(&status.timestamp).is_ok());

        ctx.running.store(false, Ordering::SeqCst);
        let status = ctx.status();
        assert_eq!(status.status, "stopped");
        assert!(!status.running);
    }
}
