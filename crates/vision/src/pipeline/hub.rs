//! Latest annotated frame, shared by every stream client.
//!
//! The capture thread publishes one frame at a time and queues it for the
//! encoder thread. Only the newest frame waits in the queue; an older one
//! still pending is replaced. Clients read the most recent JPEG without ever
//! encoding on the request path, so every frame is encoded once no matter
//! how many viewers are attached.

use std::{
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use actix_web::web::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use tracing::info;
use video_ingest::Frame;

#[derive(Clone, Debug)]
pub struct EncodedFrame {
    pub sequence: u64,
    pub timestamp_ms: i64,
    pub jpeg: Bytes,
}

/// Annotated frame waiting for the encoder.
pub type PendingFrame = (u64, Arc<Frame>);

pub struct FrameHub {
    latest: Mutex<Option<PendingFrame>>,
    sequence: AtomicU64,
    pending_tx: Sender<PendingFrame>,
    pending_rx: Receiver<PendingFrame>,
    encoded: RwLock<Option<EncodedFrame>>,
    viewers: AtomicUsize,
}

impl Default for FrameHub {
    fn default() -> Self {
        let (pending_tx, pending_rx) = bounded(1);
        Self {
            latest: Mutex::new(None),
            sequence: AtomicU64::new(0),
            pending_tx,
            pending_rx,
            encoded: RwLock::new(None),
            viewers: AtomicUsize::new(0),
        }
    }
}

impl FrameHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new annotated frame and queue it for encoding, returning its
    /// sequence number (from 1).
    pub fn publish(&self, frame: Frame) -> u64 {
        let frame = Arc::new(frame);
        let sequence = {
            let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
            let sequence = self.sequence.load(Ordering::Relaxed) + 1;
            *latest = Some((sequence, frame.clone()));
            self.sequence.store(sequence, Ordering::Release);
            sequence
        };

        match self.pending_tx.try_send((sequence, frame)) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(job)) => {
                let _ = self.pending_rx.try_recv();
                let _ = self.pending_tx.try_send(job);
            }
        }
        sequence
    }

    /// Sequence of the newest frame, 0 before the first publish.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    pub fn latest(&self) -> Option<PendingFrame> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Wait up to `timeout` for a frame the encoder has not seen yet.
    pub fn next_pending(&self, timeout: Duration) -> Option<PendingFrame> {
        match self.pending_rx.recv_timeout(timeout) {
            Ok(job) => Some(job),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Replace the served JPEG unless a newer one is already stored.
    pub fn store_encoded(&self, encoded: EncodedFrame) {
        let mut slot = self.encoded.write().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_none_or(|current| current.sequence < encoded.sequence) {
            *slot = Some(encoded);
        }
    }

    /// Most recent JPEG, if any frame has been encoded.
    pub fn encoded(&self) -> Option<EncodedFrame> {
        self.encoded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Most recent JPEG if it is newer than `after`.
    pub fn encoded_after(&self, after: u64) -> Option<EncodedFrame> {
        self.encoded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|encoded| encoded.sequence > after)
            .cloned()
    }

    pub fn viewers(&self) -> usize {
        self.viewers.load(Ordering::Relaxed)
    }

    /// Register a stream client for the lifetime of the returned guard.
    pub fn attach(self: &Arc<Self>) -> ViewerGuard {
        let count = self.viewers.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::gauge!("vision_stream_clients").set(count as f64);
        info!("Stream client connected ({count} active)");
        ViewerGuard { hub: self.clone() }
    }
}

pub struct ViewerGuard {
    hub: Arc<FrameHub>,
}

impl Drop for ViewerGuard {
    fn drop(&mut self) {
        let count = self.hub.viewers.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        metrics::gauge!("vision_stream_clients").set(count as f64);
        info!("Stream client disconnected ({count} active)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(sequence: u64) -> EncodedFrame {
        EncodedFrame {
            sequence,
            timestamp_ms: 0,
            jpeg: Bytes::from_static(b"jpeg"),
        }
    }

    #[test]
    fn sequences_start_at_one() {
        let hub = FrameHub::new();
        assert_eq!(hub.sequence(), 0);
        assert!(hub.latest().is_none());
        assert_eq!(hub.publish(Frame::filled(4, 4, [1, 2, 3])), 1);
        assert_eq!(hub.publish(Frame::filled(4, 4, [1, 2, 3])), 2);
        assert_eq!(hub.latest().map(|(seq, _)| seq), Some(2));
    }

    #[test]
    fn only_newest_frame_waits_for_the_encoder() {
        let hub = FrameHub::new();
        assert!(hub.next_pending(Duration::ZERO).is_none());

        hub.publish(Frame::filled(4, 4, [1, 1, 1]));
        hub.publish(Frame::filled(4, 4, [2, 2, 2]));
        hub.publish(Frame::filled(4, 4, [3, 3, 3]));

        let (sequence, frame) = hub.next_pending(Duration::ZERO).unwrap();
        assert_eq!(sequence, 3);
        assert_eq!(frame.data[0], 3);
        assert!(hub.next_pending(Duration::ZERO).is_none());
    }

    #[test]
    fn publishing_never_encodes() {
        let hub = FrameHub::new();
        hub.publish(Frame::filled(16, 8, [200, 10, 10]));
        assert!(hub.encoded().is_none());
        assert!(hub.encoded_after(0).is_none());
    }

    #[test]
    fn encoded_after_returns_only_newer_frames() {
        let hub = FrameHub::new();
        hub.store_encoded(encoded(2));
        assert_eq!(hub.encoded_after(0).map(|e| e.sequence), Some(2));
        assert_eq!(hub.encoded_after(1).map(|e| e.sequence), Some(2));
        assert!(hub.encoded_after(2).is_none());
    }

    #[test]
    fn stale_encode_does_not_replace_newer_one() {
        let hub = FrameHub::new();
        hub.store_encoded(encoded(5));
        hub.store_encoded(encoded(4));
        assert_eq!(hub.encoded().map(|e| e.sequence), Some(5));
    }

    #[test]
    fn viewer_guard_tracks_count() {
        let hub = Arc::new(FrameHub::new());
        let first = hub.attach();
        let second = hub.attach();
        assert_eq!(hub.viewers(), 2);
        drop(first);
        assert_eq!(hub.viewers(), 1);
        drop(second);
        assert_eq!(hub.viewers(), 0);
    }
}
