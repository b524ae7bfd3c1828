//! JPEG encoding and per-client multipart MJPEG streams.
//!
//! Encoding runs on a dedicated thread that drains the frame hub; stream
//! clients only copy already encoded bytes, so the HTTP workers never spend
//! time inside the JPEG encoder.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use actix_web::web::Bytes;
use anyhow::{Context, Result, anyhow};
use async_stream::stream;
use futures_util::Stream;
use image::{ImageBuffer, Rgb, codecs::jpeg::JpegEncoder};
use tracing::{debug, error, info};
use video_ingest::Frame;

use crate::pipeline::{
    hub::{EncodedFrame, FrameHub, ViewerGuard},
    telemetry,
};

/// Multipart boundary shared by the response header and every part.
pub const BOUNDARY: &str = "frame";
/// Wait when the pipeline has not produced any frame yet.
pub const NO_FRAME_WAIT: Duration = Duration::from_millis(100);
/// Poll interval while waiting for the next frame.
pub const FRAME_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// How long the encoder waits for a frame before rechecking the running flag.
pub const ENCODE_WAIT: Duration = Duration::from_millis(100);

/// Encode an RGB frame as baseline JPEG.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let image = ImageBuffer::<Rgb<u8>, &[u8]>::from_raw(
        frame.width.max(0) as u32,
        frame.height.max(0) as u32,
        frame.data.as_slice(),
    )
    .ok_or_else(|| {
        anyhow!(
            "frame buffer of {} bytes does not fit {}x{}",
            frame.data.len(),
            frame.width,
            frame.height
        )
    })?;
    let mut buffer = Vec::with_capacity(frame.data.len() / 8);
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(&image)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(buffer)
}

/// Wrap one JPEG as a multipart part.
pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );
    let mut payload = Vec::with_capacity(header.len() + jpeg.len() + 2);
    payload.extend_from_slice(header.as_bytes());
    payload.extend_from_slice(jpeg);
    payload.extend_from_slice(b"\r\n");
    Bytes::from(payload)
}

/// Encode the next pending hub frame, waiting up to `wait` for one.
///
/// Returns the sequence stored in the hub, `None` when nothing arrived, or
/// the encode error for a frame that had to be skipped.
pub fn encode_step(hub: &FrameHub, quality: u8, wait: Duration) -> Result<Option<u64>> {
    let Some((sequence, frame)) = hub.next_pending(wait) else {
        return Ok(None);
    };
    let started = Instant::now();
    let jpeg = encode_jpeg(&frame, quality)
        .inspect_err(|_| metrics::counter!("vision_encoding_errors_total").increment(1))
        .with_context(|| format!("Failed to encode frame {sequence}"))?;
    metrics::histogram!("vision_encoding_seconds").record(started.elapsed().as_secs_f64());

    hub.store_encoded(EncodedFrame {
        sequence,
        timestamp_ms: frame.timestamp_ms,
        jpeg: Bytes::from(jpeg),
    });
    Ok(Some(sequence))
}

/// Spawn the encoder thread. It runs until `running` clears.
pub fn spawn_encode_worker(
    hub: Arc<FrameHub>,
    running: Arc<AtomicBool>,
    quality: u8,
) -> Result<thread::JoinHandle<()>> {
    telemetry::spawn_thread("vision-encoding", move || {
        let _span = tracing::info_span!("encoding.worker", quality).entered();
        info!("JPEG encoder started");
        while running.load(Ordering::Relaxed) {
            if let Err(err) = encode_step(&hub, quality, ENCODE_WAIT) {
                error!("{err:#}; skipping frame");
            }
        }
        debug!("JPEG encoder stopped");
    })
    .context("Failed to spawn encoding thread")
}

/// One viewer's MJPEG sequence.
///
/// Each client tracks the last frame it sent, so clients never share
/// iteration state and a new client starts at the current frame.
pub struct StreamEncoder {
    hub: Arc<FrameHub>,
    running: Arc<AtomicBool>,
    last_sequence: u64,
    _viewer: ViewerGuard,
}

impl StreamEncoder {
    pub fn new(hub: Arc<FrameHub>, running: Arc<AtomicBool>) -> Self {
        let viewer = hub.attach();
        Self {
            hub,
            running,
            last_sequence: 0,
            _viewer: viewer,
        }
    }

    /// Next part if a newer encoded frame is ready.
    pub fn poll_chunk(&mut self) -> Option<Bytes> {
        let encoded = self.hub.encoded_after(self.last_sequence)?;
        self.last_sequence = encoded.sequence;
        Some(multipart_part(&encoded.jpeg))
    }

    /// Wait for the next part. Returns `None` once the pipeline stops.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        loop {
            if !self.running.load(Ordering::Relaxed) {
                return None;
            }
            if let Some(chunk) = self.poll_chunk() {
                return Some(chunk);
            }
            let wait = if self.hub.sequence() == 0 {
                NO_FRAME_WAIT
            } else {
                FRAME_POLL_INTERVAL
            };
            actix_web::rt::time::sleep(wait).await;
        }
    }

    /// Body stream for a streaming HTTP response.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, actix_web::Error>> {
        let mut encoder = self;
        let span = tracing::info_span!("stream.client", viewers = encoder.hub.viewers());
        stream! {
            while let Some(chunk) = encoder.next_chunk().await {
                yield Ok::<Bytes, actix_web::Error>(chunk);
            }
            debug!(parent: &span, "Stream ended: pipeline stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(true))
    }

    fn publish_encoded(hub: &FrameHub, frame: Frame) {
        hub.publish(frame);
        encode_step(hub, 80, Duration::ZERO).unwrap();
    }

    #[test]
    fn jpeg_has_soi_and_eoi_markers() {
        let jpeg = encode_jpeg(&Frame::filled(32, 16, [10, 200, 30]), 85).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn part_framing() {
        let part = multipart_part(b"JPEGDATA");
        let text = String::from_utf8_lossy(&part);
        assert!(text.starts_with("--frame\r\nContent-Type: image/jpeg\r\n"));
        assert!(text.contains("Content-Length: 8\r\n\r\nJPEGDATA\r\n"));
        assert!(text.ends_with("JPEGDATA\r\n"));
    }

    #[test]
    fn encode_step_stores_jpeg_for_newest_frame() {
        let hub = FrameHub::new();
        assert_eq!(encode_step(&hub, 80, Duration::ZERO).unwrap(), None);

        hub.publish(Frame::filled(16, 8, [200, 10, 10]));
        hub.publish(Frame::filled(16, 8, [10, 200, 10]));
        assert_eq!(encode_step(&hub, 80, Duration::ZERO).unwrap(), Some(2));
        let encoded = hub.encoded().unwrap();
        assert_eq!(encoded.sequence, 2);
        assert_eq!(&encoded.jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn clients_track_frames_independently() {
        let hub = Arc::new(FrameHub::new());
        let flag = running();
        publish_encoded(&hub, Frame::filled(8, 8, [0, 0, 255]));

        let mut first = StreamEncoder::new(hub.clone(), flag.clone());
        assert!(first.poll_chunk().is_some());
        assert!(first.poll_chunk().is_none());

        let mut second = StreamEncoder::new(hub.clone(), flag.clone());
        assert!(second.poll_chunk().is_some());

        publish_encoded(&hub, Frame::filled(8, 8, [0, 255, 0]));
        assert!(first.poll_chunk().is_some());
        assert!(second.poll_chunk().is_some());
        assert_eq!(hub.viewers(), 2);
    }

    #[test]
    fn clients_never_encode_on_their_own() {
        let hub = Arc::new(FrameHub::new());
        let mut client = StreamEncoder::new(hub.clone(), running());
        hub.publish(Frame::filled(8, 8, [4, 4, 4]));
        assert!(client.poll_chunk().is_none());

        encode_step(&hub, 80, Duration::ZERO).unwrap();
        assert!(client.poll_chunk().is_some());
    }

    #[test]
    fn failed_encode_skips_only_that_frame() {
        let hub = Arc::new(FrameHub::new());
        let mut client = StreamEncoder::new(hub.clone(), running());

        let mut broken = Frame::filled(8, 8, [0, 0, 0]);
        broken.data.truncate(3);
        hub.publish(broken);
        assert!(encode_step(&hub, 80, Duration::ZERO).is_err());
        assert!(client.poll_chunk().is_none());

        publish_encoded(&hub, Frame::filled(8, 8, [9, 9, 9]));
        assert!(client.poll_chunk().is_some());
    }

    #[test]
    fn worker_encodes_published_frames_until_stopped() {
        let hub = Arc::new(FrameHub::new());
        let flag = running();
        let worker = spawn_encode_worker(hub.clone(), flag.clone(), 80).unwrap();

        hub.publish(Frame::filled(16, 16, [30, 60, 90]));
        let deadline = Instant::now() + Duration::from_secs(3);
        while hub.encoded().is_none() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(hub.encoded().map(|e| e.sequence), Some(1));

        flag.store(false, Ordering::SeqCst);
        worker.join().unwrap();
    }

    #[actix_web::test]
    async fn next_chunk_ends_when_stopped() {
        let hub = Arc::new(FrameHub::new());
        let flag = running();
        let mut client = StreamEncoder::new(hub.clone(), flag.clone());
        publish_encoded(&hub, Frame::filled(8, 8, [1, 1, 1]));
        assert!(client.next_chunk().await.is_some());

        flag.store(false, Ordering::SeqCst);
        assert!(client.next_chunk().await.is_none());
    }
}
