//! Real-time object detection streamed as annotated MJPEG.
//!
//! Detection runs on a low-resolution stream in the background while every
//! full-resolution frame is annotated with the latest results, so viewers get
//! full frame rate at full resolution regardless of inference speed.

pub mod pipeline;

/// Re-export pipeline settings so callers can configure runs without reaching
/// into submodules.
pub use pipeline::config::{DetectorKind, TelemetryOptions, VisionCliArgs, VisionConfig};
pub use pipeline::{
    annotation::{OverlayRenderer, ScaleRatio},
    controller::{ControllerSettings, PipelineController},
    data::{PipelineContext, StatusResponse},
    encoding::StreamEncoder,
    filter::DetectionFilter,
    hub::FrameHub,
    inference::{InferenceInputs, InferenceLoop, LoopPhase, StartFailure},
    resources::DetectorGuard,
    runner::{ProbeReport, build_detector, probe, run, start_pipeline},
    server::HttpSettings,
    state::{DetectionSnapshot, DetectionState},
};
