//! Background inference loop.
//!
//! One dedicated thread pulls low-resolution frames, runs the detector, and
//! publishes filtered results into `DetectionState`. A failing cycle logs,
//! publishes an empty list, and continues; only `stop` ends the loop.

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Result, anyhow};
use crossbeam_channel::{SendError, bounded};
use ml_core::Detection;
use tracing::{debug, error, info, warn};
use video_ingest::{Frame, FrameSource};

use crate::pipeline::{
    filter::DetectionFilter,
    resources::DetectorGuard,
    state::DetectionState,
    telemetry,
    watchdog::{HealthComponent, PipelineHealth},
};

/// Sleep when the source has no new frame.
pub const NO_FRAME_BACKOFF: Duration = Duration::from_millis(20);
/// Sleep after a capture failure.
pub const CAPTURE_ERROR_BACKOFF: Duration = Duration::from_millis(100);
/// Yield between completed cycles.
pub const CYCLE_YIELD: Duration = Duration::from_millis(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopPhase {
    Idle = 0,
    Capturing = 1,
    Inferring = 2,
    Publishing = 3,
    Stopped = 4,
}

impl LoopPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => LoopPhase::Capturing,
            2 => LoopPhase::Inferring,
            3 => LoopPhase::Publishing,
            4 => LoopPhase::Stopped,
            _ => LoopPhase::Idle,
        }
    }
}

#[derive(Default)]
struct PhaseCell(AtomicU8);

impl PhaseCell {
    fn set(&self, phase: LoopPhase) {
        self.0.store(phase as u8, Ordering::Release);
    }

    fn get(&self) -> LoopPhase {
        LoopPhase::from_u8(self.0.load(Ordering::Acquire))
    }
}

/// Everything the inference thread needs besides the detector itself.
#[derive(Clone)]
pub struct InferenceInputs {
    pub source: Arc<dyn FrameSource>,
    pub state: Arc<DetectionState>,
    pub filter: DetectionFilter,
    pub running: Arc<AtomicBool>,
    pub health: Arc<PipelineHealth>,
}

/// The inference thread could not be started.
///
/// The detector comes back untouched so the caller can release it in the
/// right order relative to the frame source.
pub struct StartFailure {
    pub error: anyhow::Error,
    pub detector: DetectorGuard,
}

impl fmt::Debug for StartFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartFailure")
            .field("error", &self.error)
            .field("detector", &self.detector.name())
            .finish()
    }
}

/// Handle to the running inference thread.
pub struct InferenceLoop {
    running: Arc<AtomicBool>,
    phase: Arc<PhaseCell>,
    handle: Option<thread::JoinHandle<Option<DetectorGuard>>>,
}

impl InferenceLoop {
    /// Spawn the loop. It runs until `inputs.running` clears.
    ///
    /// The detector is handed to the thread only once it is running, so a
    /// spawn failure returns it instead of dropping it.
    pub fn start(inputs: InferenceInputs, detector: DetectorGuard) -> Result<Self, StartFailure> {
        let running = inputs.running.clone();
        let phase = Arc::new(PhaseCell::default());
        let thread_phase = phase.clone();
        let (handoff_tx, handoff_rx) = bounded::<DetectorGuard>(1);
        let spawned = telemetry::spawn_thread("vision-inference", move || {
            let detector = handoff_rx.recv().ok()?;
            Some(inference_loop(inputs, detector, &thread_phase))
        });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                return Err(StartFailure {
                    error: anyhow::Error::new(err).context("Failed to spawn inference thread"),
                    detector,
                });
            }
        };
        if let Err(SendError(detector)) = handoff_tx.send(detector) {
            let _ = handle.join();
            return Err(StartFailure {
                error: anyhow!("inference thread exited before taking the detector"),
                detector,
            });
        }

        info!("Inference loop started");
        Ok(Self {
            running,
            phase,
            handle: Some(handle),
        })
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase.get()
    }

    /// Clear the running flag and wait for the current cycle to finish.
    ///
    /// Returns the detector so the caller decides when it is released.
    pub fn stop(mut self) -> Result<DetectorGuard> {
        self.running.store(false, Ordering::SeqCst);
        let handle = self
            .handle
            .take()
            .ok_or_else(|| anyhow!("inference loop already stopped"))?;
        let detector = handle
            .join()
            .map_err(|_| anyhow!("inference thread panicked"))?
            .ok_or_else(|| anyhow!("inference thread never received the detector"))?;
        info!("Inference loop stopped");
        Ok(detector)
    }
}

impl Drop for InferenceLoop {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.running.store(false, Ordering::SeqCst);
            let _ = handle.join();
        }
    }
}

fn inference_loop(
    inputs: InferenceInputs,
    mut detector: DetectorGuard,
    phase: &PhaseCell,
) -> DetectorGuard {
    let InferenceInputs {
        source,
        state,
        filter,
        running,
        health,
    } = inputs;
    let worker_span = tracing::info_span!("inference.worker", detector = %detector.name());
    let _worker_guard = worker_span.enter();

    while running.load(Ordering::Relaxed) {
        phase.set(LoopPhase::Capturing);
        let frame = match source.capture_low_res() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                thread::sleep(NO_FRAME_BACKOFF);
                continue;
            }
            Err(err) => {
                warn!("Low-resolution capture failed: {err}");
                metrics::counter!("vision_capture_errors_total", "stream" => "low").increment(1);
                thread::sleep(CAPTURE_ERROR_BACKOFF);
                continue;
            }
        };

        phase.set(LoopPhase::Inferring);
        let started = Instant::now();
        let detections = tracing::info_span!("inference.cycle", frame_ts = frame.timestamp_ms)
            .in_scope(|| detect(&mut detector, &frame));
        metrics::histogram!("vision_inference_seconds").record(started.elapsed().as_secs_f64());
        let detections = filter.apply(detections);

        phase.set(LoopPhase::Publishing);
        let snapshot = state.publish(detections);
        health.beat(HealthComponent::Inference);
        metrics::gauge!("vision_inference_fps").set(snapshot.fps as f64);
        if !snapshot.detections.is_empty() {
            debug!(
                "Cycle {}: {} detection(s), first {} {}%",
                snapshot.sequence,
                snapshot.detections.len(),
                snapshot.detections[0].class_name,
                snapshot.detections[0].confidence_percent()
            );
        }

        thread::sleep(CYCLE_YIELD);
    }

    phase.set(LoopPhase::Stopped);
    detector
}

/// One detector call. Errors and panics both yield an empty list.
fn detect(detector: &mut DetectorGuard, frame: &Frame) -> Vec<Detection> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        detector
            .detector()
            .run(&frame.data, frame.width, frame.height)
    }));
    match outcome {
        Ok(Ok(detections)) => detections,
        Ok(Err(err)) => {
            error!("Detection error: {err}");
            metrics::counter!("vision_inference_errors_total").increment(1);
            Vec::new()
        }
        Err(_) => {
            error!("Detector panicked; continuing with empty detections");
            metrics::counter!("vision_inference_errors_total").increment(1);
            Vec::new()
        }
    }
}
