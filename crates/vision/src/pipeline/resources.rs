//! Ownership wrappers guaranteeing each external resource is released once.

use std::sync::Arc;

use ml_core::Detector;
use tracing::info;
use video_ingest::FrameSource;

/// Owns the detector for the lifetime of the inference thread.
///
/// `release` runs at most once, either explicitly or on drop.
pub struct DetectorGuard {
    inner: Box<dyn Detector>,
    released: bool,
}

impl DetectorGuard {
    pub fn new(detector: Box<dyn Detector>) -> Self {
        Self {
            inner: detector,
            released: false,
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn input_size(&self) -> (i32, i32) {
        self.inner.input_size()
    }

    pub fn detector(&mut self) -> &mut dyn Detector {
        self.inner.as_mut()
    }

    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.inner.release();
        info!("Detector {} released", self.inner.name());
    }
}

impl Drop for DetectorGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Owns the release of an initialised frame source shared with worker threads.
pub struct SourceGuard {
    source: Arc<dyn FrameSource>,
    released: bool,
}

impl SourceGuard {
    pub fn new(source: Arc<dyn FrameSource>) -> Self {
        Self {
            source,
            released: false,
        }
    }

    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.source.release();
        info!("Frame source {} released", self.source.name());
    }
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        self.release();
    }
}
