//! Display-stream loop: pull a full-resolution frame, overlay the latest
//! detections, and hand it to the frame hub.

use std::{
    sync::{Arc, atomic::Ordering},
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use tracing::{debug, warn};
use video_ingest::{CaptureError, FrameSource};

use crate::pipeline::{
    annotation::OverlayRenderer, data::PipelineContext, telemetry, watchdog::HealthComponent,
};

/// Sleep when the source has no new display frame.
pub const NO_FRAME_BACKOFF: Duration = Duration::from_millis(5);
/// Sleep after a capture failure.
pub const CAPTURE_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Annotate and publish one display frame.
///
/// Returns the hub sequence of the published frame, or `None` when the source
/// had nothing new.
pub fn capture_step(
    source: &dyn FrameSource,
    renderer: &OverlayRenderer,
    ctx: &PipelineContext,
) -> Result<Option<u64>, CaptureError> {
    let Some(mut frame) = source.capture_full_res()? else {
        return Ok(None);
    };
    let snapshot = ctx.state.snapshot();
    let started = Instant::now();
    tracing::info_span!("capture.frame", detections = snapshot.detections.len())
        .in_scope(|| renderer.render(&mut frame, &snapshot));
    metrics::histogram!("vision_overlay_seconds").record(started.elapsed().as_secs_f64());

    let sequence = ctx.hub.publish(frame);
    ctx.health.beat(HealthComponent::Capture);
    metrics::counter!("vision_frames_rendered_total").increment(1);
    Ok(Some(sequence))
}

pub(crate) fn spawn_capture_loop(
    source: Arc<dyn FrameSource>,
    renderer: OverlayRenderer,
    ctx: PipelineContext,
) -> Result<thread::JoinHandle<()>> {
    telemetry::spawn_thread("vision-capture", move || {
        let _span = tracing::info_span!("capture.worker", source = %source.name()).entered();
        while ctx.running.load(Ordering::Relaxed) {
            match capture_step(source.as_ref(), &renderer, &ctx) {
                Ok(Some(sequence)) => {
                    if sequence % 300 == 0 {
                        debug!("Rendered {sequence} frames");
                    }
                }
                Ok(None) => thread::sleep(NO_FRAME_BACKOFF),
                Err(err) => {
                    warn!("Full-resolution capture failed: {err}");
                    metrics::counter!("vision_capture_errors_total", "stream" => "full")
                        .increment(1);
                    thread::sleep(CAPTURE_ERROR_BACKOFF);
                }
            }
        }
    })
    .context("Failed to spawn capture thread")
}
