//! OpenCV-backed camera capture.
//!
//! One reader thread owns the `VideoCapture`. Every frame it reads is
//! converted to RGB at display size and also resized to the detector input
//! size, and both copies land in single-entry slots the pipeline drains.

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use chrono::Utc;
use opencv::{
    core::{self, MatTraitConstManual},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait},
};
use tracing::{debug, error, warn};

use crate::{
    CaptureConfig, FrameSource,
    reads::{EmptyReads, MAX_EMPTY_READS},
    slot::LatestFrame,
    types::{CaptureError, DualResolution, Frame, FrameFormat, Resolution},
};

struct Reader {
    running: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

/// Dual-resolution source reading from a V4L device, file, or network URI.
pub struct CameraSource {
    config: CaptureConfig,
    low: Arc<LatestFrame>,
    full: Arc<LatestFrame>,
    failure: Arc<Mutex<Option<String>>>,
    reader: Mutex<Option<Reader>>,
}

impl CameraSource {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            low: Arc::new(LatestFrame::new()),
            full: Arc::new(LatestFrame::new()),
            failure: Arc::new(Mutex::new(None)),
            reader: Mutex::new(None),
        }
    }

    fn take(&self, slot: &LatestFrame) -> Result<Option<Frame>, CaptureError> {
        if let Some(message) = self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(CaptureError::Closed(message));
        }
        if self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
        {
            return Err(CaptureError::NotInitialised);
        }
        Ok(slot.take())
    }
}

impl FrameSource for CameraSource {
    fn name(&self) -> &str {
        "opencv-camera"
    }

    fn resolutions(&self) -> DualResolution {
        self.config.resolutions
    }

    fn initialize(&self) -> Result<(), CaptureError> {
        let mut reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
        if reader.is_some() {
            return Ok(());
        }

        let mut cap = open_video_capture(&self.config.uri)?;
        configure_camera(
            &mut cap,
            self.config.resolutions.full,
            self.config.framerate as f64,
        );

        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let low = self.low.clone();
        let full = self.full.clone();
        let failure = self.failure.clone();
        let resolutions = self.config.resolutions;
        let handle = thread::Builder::new()
            .name("video-ingest-camera".into())
            .spawn(move || {
                if let Err(err) = capture_loop(cap, resolutions, &thread_running, &low, &full) {
                    error!("camera reader stopped: {err}");
                    *failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(err.to_string());
                }
            })
            .map_err(|err| CaptureError::Other(err.into()))?;

        *reader = Some(Reader { running, handle });
        debug!(
            uri = %self.config.uri,
            full = %resolutions.full,
            low = %resolutions.low,
            "camera reader started"
        );
        Ok(())
    }

    fn capture_low_res(&self) -> Result<Option<Frame>, CaptureError> {
        self.take(&self.low)
    }

    fn capture_full_res(&self) -> Result<Option<Frame>, CaptureError> {
        self.take(&self.full)
    }

    fn release(&self) {
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reader) = reader {
            reader.running.store(false, Ordering::SeqCst);
            if reader.handle.join().is_err() {
                warn!("camera reader thread panicked");
            }
        }
        self.low.clear();
        self.full.clear();
    }
}

fn capture_loop(
    mut cap: VideoCapture,
    resolutions: DualResolution,
    running: &AtomicBool,
    low: &LatestFrame,
    full: &LatestFrame,
) -> Result<(), CaptureError> {
    let mut frame = Mat::default();
    let mut resized = Mat::default();
    let mut rgb = Mat::default();
    let mut empty_reads = EmptyReads::new(MAX_EMPTY_READS);

    while running.load(Ordering::Relaxed) {
        let grabbed = cap
            .read(&mut frame)
            .map_err(|e| CaptureError::Other(e.into()))?;
        if !grabbed || frame.size().map_err(|e| CaptureError::Other(e.into()))?.width <= 0 {
            match empty_reads.miss() {
                Ok(backoff) => {
                    thread::sleep(backoff);
                    continue;
                }
                Err(err) => {
                    let _ = cap.release();
                    return Err(err);
                }
            }
        }
        empty_reads.hit();
        let timestamp_ms = Utc::now().timestamp_millis();

        full.publish(to_rgb_frame(&frame, resolutions.full, timestamp_ms, &mut resized, &mut rgb)?);
        low.publish(to_rgb_frame(&frame, resolutions.low, timestamp_ms, &mut resized, &mut rgb)?);
    }

    let _ = cap.release();
    Ok(())
}

fn to_rgb_frame(
    bgr: &Mat,
    target: Resolution,
    timestamp_ms: i64,
    scratch: &mut Mat,
    rgb: &mut Mat,
) -> Result<Frame, CaptureError> {
    let size = bgr.size().map_err(|e| CaptureError::Other(e.into()))?;
    let working = if size.width != target.width || size.height != target.height {
        imgproc::resize(
            bgr,
            scratch,
            core::Size {
                width: target.width,
                height: target.height,
            },
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )
        .map_err(|e| CaptureError::Other(e.into()))?;
        &*scratch
    } else {
        bgr
    };
    imgproc::cvt_color(working, rgb, imgproc::COLOR_BGR2RGB, 0)
        .map_err(|e| CaptureError::Other(e.into()))?;

    let data = rgb
        .data_bytes()
        .map_err(|e| CaptureError::Other(e.into()))?
        .to_vec();
    Frame::new(
        data,
        target.width,
        target.height,
        timestamp_ms,
        FrameFormat::Rgb8,
    )
}

fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    uri.strip_prefix("/dev/video")
        .filter(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
        .and_then(|digits| digits.parse::<i32>().ok())
}

fn open_video_capture(uri: &str) -> Result<VideoCapture, CaptureError> {
    if let Some(index) = parse_device_index(uri) {
        for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
            match VideoCapture::new(index, backend) {
                Ok(cap) => {
                    if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                        return Ok(cap);
                    }
                }
                Err(err) => {
                    warn!("failed to open device #{index} with backend {backend}: {err}");
                }
            }
        }
    }

    for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
        match VideoCapture::from_file(uri, backend) {
            Ok(cap) => {
                if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                    return Ok(cap);
                }
            }
            Err(err) => {
                warn!("failed to open {uri} with backend {backend}: {err}");
            }
        }
    }

    Err(CaptureError::Open {
        uri: uri.to_string(),
    })
}

fn configure_camera(cap: &mut VideoCapture, size: Resolution, fps: f64) {
    if let Ok(fourcc) = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G') {
        let _ = cap.set(videoio::CAP_PROP_FOURCC, fourcc as f64);
    }
    let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, size.width as f64);
    let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, size.height as f64);
    let _ = cap.set(videoio::CAP_PROP_FPS, fps);
}

#[cfg(test)]
mod tests {
    use super::parse_device_index;

    #[test]
    fn device_indices_are_recognised() {
        assert_eq!(parse_device_index("0"), Some(0));
        assert_eq!(parse_device_index("/dev/video2"), Some(2));
        assert_eq!(parse_device_index("/dev/video"), None);
        assert_eq!(parse_device_index("rtsp://cam/stream"), None);
    }
}
