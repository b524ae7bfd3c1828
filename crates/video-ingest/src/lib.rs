//! Frame sources for the vision pipeline.
//!
//! A source delivers two streams of the same scene: a full-resolution stream
//! that is annotated and shown to viewers, and a low-resolution stream sized
//! to the detector input. Both are pulled on demand and each frame is handed
//! out at most once.

#[cfg(feature = "opencv")]
mod camera;
mod pattern;
#[cfg(any(feature = "opencv", test))]
mod reads;
#[cfg(feature = "opencv")]
mod slot;
mod types;

#[cfg(feature = "opencv")]
pub use camera::CameraSource;
pub use pattern::TestPatternSource;
pub use types::{CaptureError, DualResolution, Frame, FrameFormat, Resolution};

/// URI scheme selecting the built-in synthetic source.
pub const TEST_PATTERN_SCHEME: &str = "test://";

/// Capture settings shared by every backend.
#[derive(Clone, Debug)]
pub struct CaptureConfig {
    pub uri: String,
    pub resolutions: DualResolution,
    pub framerate: u32,
}

/// A camera-like producer of paired low/full resolution frames.
///
/// Methods take `&self` so that the inference thread and the capture thread
/// can pull from one shared source.
pub trait FrameSource: Send + Sync {
    fn name(&self) -> &str;

    fn resolutions(&self) -> DualResolution;

    /// Acquire the underlying device. Failure here is fatal for the pipeline.
    fn initialize(&self) -> Result<(), CaptureError>;

    /// Next unseen inference frame, or `None` when the source has nothing new.
    fn capture_low_res(&self) -> Result<Option<Frame>, CaptureError>;

    /// Next unseen display frame, or `None` when the source has nothing new.
    fn capture_full_res(&self) -> Result<Option<Frame>, CaptureError>;

    fn release(&self);
}

/// Build the backend matching `config.uri`. The source is returned unopened.
pub fn open_source(config: &CaptureConfig) -> Result<Box<dyn FrameSource>, CaptureError> {
    if config.uri.starts_with(TEST_PATTERN_SCHEME) {
        return Ok(Box::new(TestPatternSource::new(
            config.resolutions,
            config.framerate,
        )));
    }

    #[cfg(feature = "opencv")]
    {
        Ok(Box::new(CameraSource::new(config.clone())))
    }

    #[cfg(not(feature = "opencv"))]
    {
        Err(CaptureError::Unsupported {
            uri: config.uri.clone(),
            feature: "opencv",
        })
    }
}
