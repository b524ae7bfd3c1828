//! Process-level entry points: serve until Ctrl+C, or probe one frame.

use std::{
    sync::{
        Arc, Once,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow, bail};
use ml_core::{ColorBlobDetector, ColorRange, Detection, Detector};
use serde::Serialize;
use tracing::{info, warn};
use video_ingest::{CaptureConfig, DualResolution, Resolution};

use crate::pipeline::{
    config::{DetectorKind, VisionConfig},
    controller::{ControllerSettings, PipelineController},
    filter::DetectionFilter,
    resources::{DetectorGuard, SourceGuard},
    telemetry,
};

/// How long `probe` waits for the first inference frame.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Run the pipeline until Ctrl+C.
pub fn run(config: VisionConfig) -> Result<()> {
    static CTRL_HANDLER: Once = Once::new();

    let _telemetry_guard = telemetry::init_tracing(&config.telemetry);
    telemetry::init_metrics_recorder();

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = shutdown.clone();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler(move || {
            handler_shutdown.store(true, Ordering::SeqCst);
        }) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });

    let pipeline_span = tracing::info_span!(
        "vision.pipeline",
        source = %config.source_uri,
        display = %config.resolution,
        detector = config.detector.label(),
        detector_size = %config.detector_size,
        port = config.port,
    );
    let _pipeline_guard = pipeline_span.enter();

    let detector =
        DetectorGuard::new(build_detector(&config).context("Failed to initialise detector")?);
    let mut controller = start_pipeline(&config, detector)?;
    if let Some(addr) = controller.local_addr() {
        info!("Streaming at http://{addr}/video_feed");
    }

    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(SHUTDOWN_POLL);
    }
    info!("Shutdown requested");
    controller.shutdown();
    Ok(())
}

/// Open the configured source sized to the detector input and start the
/// pipeline. The detector is released on every failure path.
pub fn start_pipeline(
    config: &VisionConfig,
    detector: DetectorGuard,
) -> Result<PipelineController> {
    let source = video_ingest::open_source(&capture_config(config, detector.input_size()))
        .with_context(|| format!("Failed to open video source {}", config.source_uri))?;
    PipelineController::start(ControllerSettings::from(config), source, detector)
}

/// One-shot check of the source and detector, printed by the CLI as JSON.
#[derive(Debug, Serialize)]
pub struct ProbeReport {
    pub source: String,
    pub detector: String,
    pub display: String,
    pub inference: String,
    pub inference_ms: f64,
    pub detections: Vec<Detection>,
}

/// Capture a single inference frame and run the detector on it.
pub fn probe(config: VisionConfig) -> Result<ProbeReport> {
    let _telemetry_guard = telemetry::init_tracing(&config.telemetry);

    let mut detector =
        DetectorGuard::new(build_detector(&config).context("Failed to initialise detector")?);
    let capture = capture_config(&config, detector.input_size());
    let source: Arc<dyn video_ingest::FrameSource> = Arc::from(
        video_ingest::open_source(&capture)
            .with_context(|| format!("Failed to open video source {}", config.source_uri))?,
    );
    source
        .initialize()
        .with_context(|| format!("Failed to initialise frame source {}", source.name()))?;
    let mut source_guard = SourceGuard::new(source.clone());

    let deadline = Instant::now() + PROBE_TIMEOUT;
    let frame = loop {
        match source.capture_low_res() {
            Ok(Some(frame)) => break frame,
            Ok(None) => {}
            Err(err) => warn!("Probe capture failed: {err}"),
        }
        if Instant::now() >= deadline {
            bail!(
                "No frame from {} within {}ms",
                config.source_uri,
                PROBE_TIMEOUT.as_millis()
            );
        }
        thread::sleep(Duration::from_millis(10));
    };

    let started = Instant::now();
    let raw = detector
        .detector()
        .run(&frame.data, frame.width, frame.height)
        .map_err(|err| anyhow!("Detector run failed: {err}"))?;
    let inference_ms = started.elapsed().as_secs_f64() * 1_000.0;
    let filter = DetectionFilter::new(
        config.confidence_threshold,
        config.class_filter.iter().cloned(),
        config.max_detections,
    );

    let report = ProbeReport {
        source: source.name().to_string(),
        detector: detector.name().to_string(),
        display: capture.resolutions.full.to_string(),
        inference: capture.resolutions.low.to_string(),
        inference_ms,
        detections: filter.apply(raw),
    };
    source_guard.release();
    detector.release();
    Ok(report)
}

/// Construct the detector selected by `config.detector`.
pub fn build_detector(config: &VisionConfig) -> Result<Box<dyn Detector>> {
    let size = config.detector_size;
    match config.detector {
        DetectorKind::Color => {
            let min_area = ((size.width * size.height) as usize / 400).max(16);
            Ok(Box::new(ColorBlobDetector::new(
                ColorRange::YELLOW,
                (size.width, size.height),
                min_area,
                0,
                config.class_names.clone(),
            )))
        }
        DetectorKind::Torch => torch_detector(config, size),
    }
}

#[cfg(feature = "with-tch")]
fn torch_detector(config: &VisionConfig, size: Resolution) -> Result<Box<dyn Detector>> {
    use ml_core::{
        TorchDetector,
        tch::{Cuda, Device},
    };

    let model_path = config
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("--detector torch requires --model"))?;
    let device = if config.use_cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available()
    };
    info!(
        "Loading TorchScript model {} on {device:?} (CUDA devices: {})",
        model_path.display(),
        Cuda::device_count()
    );
    let detector = TorchDetector::new(
        model_path,
        device,
        (size.width as i64, size.height as i64),
        config.confidence_threshold,
        config.class_names.clone(),
    )?;
    Ok(Box::new(detector))
}

#[cfg(not(feature = "with-tch"))]
fn torch_detector(_config: &VisionConfig, _size: Resolution) -> Result<Box<dyn Detector>> {
    bail!("Detector `torch` requires building with the `with-tch` feature")
}

/// Size the low-resolution stream from the detector input.
fn capture_config(config: &VisionConfig, (width, height): (i32, i32)) -> CaptureConfig {
    CaptureConfig {
        uri: config.source_uri.clone(),
        resolutions: DualResolution {
            full: config.resolution,
            low: Resolution::new(width, height),
        },
        framerate: config.framerate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_detector_uses_configured_size() {
        let config = VisionConfig::default();
        let detector = build_detector(&config).unwrap();
        assert_eq!(detector.input_size(), (320, 240));
        assert_eq!(detector.name(), "color-blob");
    }

    #[cfg(not(feature = "with-tch"))]
    #[test]
    fn torch_without_feature_is_rejected() {
        let config = VisionConfig {
            detector: DetectorKind::Torch,
            ..VisionConfig::default()
        };
        assert!(build_detector(&config).is_err());
    }

    #[test]
    fn probe_finds_test_pattern_target() {
        let config = VisionConfig {
            resolution: Resolution::new(160, 120),
            detector_size: Resolution::new(80, 60),
            ..VisionConfig::default()
        };
        let report = probe(config).unwrap();
        assert_eq!(report.source, "test-pattern");
        assert_eq!(report.inference, "80x60");
        assert_eq!(report.detections.len(), 1);
        assert_eq!(report.detections[0].class_name, "person");
    }
}
