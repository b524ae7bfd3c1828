//! Pipeline lifecycle: ordered startup, status, and ordered shutdown.
//!
//! Startup order is source, inference, capture, encoder and watchdog, then
//! HTTP. Shutdown reverses it: the HTTP listener stops, the inference thread
//! is joined, the source is released, and the detector is released last. Each
//! release happens exactly once, including when startup fails halfway.

use std::{net::SocketAddr, sync::Arc, sync::atomic::Ordering, thread};

use anyhow::{Context, Result, bail};
use tracing::{error, info};
use video_ingest::FrameSource;

use crate::pipeline::{
    annotation::{OverlayRenderer, ScaleRatio},
    capture::spawn_capture_loop,
    config::{DEFAULT_JPEG_QUALITY, DEFAULT_PALETTE, VisionConfig},
    data::{PipelineContext, StatusResponse},
    encoding::spawn_encode_worker,
    filter::DetectionFilter,
    inference::{InferenceInputs, InferenceLoop, LoopPhase},
    resources::{DetectorGuard, SourceGuard},
    server::{HttpSettings, PreviewServer, spawn_preview_server},
    watchdog::spawn_watchdog,
};

/// Knobs the controller needs beyond the source and detector.
#[derive(Clone, Debug)]
pub struct ControllerSettings {
    pub filter: DetectionFilter,
    pub palette: Vec<[u8; 3]>,
    pub jpeg_quality: u8,
    /// `None` runs the pipeline without an HTTP listener.
    pub http: Option<HttpSettings>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            filter: DetectionFilter::default(),
            palette: DEFAULT_PALETTE.to_vec(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            http: None,
        }
    }
}

impl From<&VisionConfig> for ControllerSettings {
    fn from(config: &VisionConfig) -> Self {
        Self {
            filter: DetectionFilter::new(
                config.confidence_threshold,
                config.class_filter.iter().cloned(),
                config.max_detections,
            ),
            palette: config.palette.clone(),
            jpeg_quality: config.jpeg_quality,
            http: Some(HttpSettings {
                host: config.host.clone(),
                port: config.port,
            }),
        }
    }
}

pub struct PipelineController {
    ctx: PipelineContext,
    source: Option<SourceGuard>,
    /// Held here only while no inference thread owns it.
    detector: Option<DetectorGuard>,
    inference: Option<InferenceLoop>,
    capture: Option<thread::JoinHandle<()>>,
    encoder: Option<thread::JoinHandle<()>>,
    watchdog: Option<thread::JoinHandle<()>>,
    server: Option<PreviewServer>,
    stopped: bool,
}

impl PipelineController {
    /// Bring the pipeline up. Any failure releases what was already acquired.
    pub fn start(
        settings: ControllerSettings,
        source: Box<dyn FrameSource>,
        detector: DetectorGuard,
    ) -> Result<Self> {
        let source: Arc<dyn FrameSource> = Arc::from(source);
        let resolutions = source.resolutions();
        let (input_w, input_h) = detector.input_size();
        if (input_w, input_h) != (resolutions.low.width, resolutions.low.height) {
            bail!(
                "Detector {} expects {input_w}x{input_h} input but source {} delivers {}",
                detector.name(),
                source.name(),
                resolutions.low
            );
        }

        tracing::info_span!("pipeline.start", stage = "source")
            .in_scope(|| source.initialize())
            .with_context(|| format!("Failed to initialise frame source {}", source.name()))?;
        info!(
            "Frame source {} ready (display {}, inference {})",
            source.name(),
            resolutions.full,
            resolutions.low
        );

        let ctx = PipelineContext::new(detector.name(), settings.jpeg_quality);
        let mut controller = Self {
            ctx: ctx.clone(),
            source: Some(SourceGuard::new(source.clone())),
            detector: None,
            inference: None,
            capture: None,
            encoder: None,
            watchdog: None,
            server: None,
            stopped: false,
        };

        let inputs = InferenceInputs {
            source: source.clone(),
            state: ctx.state.clone(),
            filter: settings.filter,
            running: ctx.running.clone(),
            health: ctx.health.clone(),
        };
        match InferenceLoop::start(inputs, detector) {
            Ok(inference) => controller.inference = Some(inference),
            Err(failure) => {
                controller.detector = Some(failure.detector);
                return Err(failure.error);
            }
        }

        let renderer = OverlayRenderer::new(
            ScaleRatio::between(resolutions.low, resolutions.full),
            settings.palette,
            resolutions.full,
        );
        controller.capture = Some(spawn_capture_loop(source, renderer, ctx.clone())?);
        controller.encoder = Some(spawn_encode_worker(
            ctx.hub.clone(),
            ctx.running.clone(),
            ctx.jpeg_quality,
        )?);
        controller.watchdog = Some(
            spawn_watchdog(ctx.health.clone(), ctx.running.clone(), ctx.watchdog.clone())
                .context("Failed to spawn watchdog thread")?,
        );

        if let Some(http) = settings.http.as_ref() {
            controller.server = Some(
                spawn_preview_server(ctx.clone(), http).context("Failed to start HTTP server")?,
            );
        }

        info!("Vision pipeline running");
        Ok(controller)
    }

    pub fn status(&self) -> StatusResponse {
        self.ctx.status()
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    pub fn is_running(&self) -> bool {
        self.ctx.running.load(Ordering::SeqCst)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().and_then(PreviewServer::local_addr)
    }

    pub fn inference_phase(&self) -> LoopPhase {
        self.inference
            .as_ref()
            .map_or(LoopPhase::Stopped, InferenceLoop::phase)
    }

    /// Stop everything in order. Calling it again is a no-op.
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        info!("Stopping vision pipeline");
        self.ctx.running.store(false, Ordering::SeqCst);

        if let Some(server) = self.server.take() {
            server.stop();
        }

        let detector = self
            .inference
            .take()
            .and_then(|inference| {
                inference
                    .stop()
                    .map_err(|err| error!("Failed to stop inference loop: {err:#}"))
                    .ok()
            })
            .or_else(|| self.detector.take());

        for handle in [self.capture.take(), self.encoder.take(), self.watchdog.take()]
            .into_iter()
            .flatten()
        {
            if handle.join().is_err() {
                error!("Pipeline thread panicked during shutdown");
            }
        }

        if let Some(mut source) = self.source.take() {
            source.release();
        }
        if let Some(mut detector) = detector {
            detector.release();
        }
        info!("Vision pipeline stopped");
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
