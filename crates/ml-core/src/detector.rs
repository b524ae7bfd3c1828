use std::path::PathBuf;

use thiserror::Error;

use crate::detection::Detection;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("failed to load model {path:?}: {message}")]
    Load { path: PathBuf, message: String },
    #[error("failed to read class labels {path:?}: {source}")]
    Labels {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("frame {actual_width}x{actual_height} ({actual_len} bytes) does not match detector input {width}x{height}")]
    InputMismatch {
        width: i32,
        height: i32,
        actual_width: i32,
        actual_height: i32,
        actual_len: usize,
    },
    #[error("inference failed: {0}")]
    Inference(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Maps a raw RGB image to a list of detections.
///
/// Implementations are constructed fully initialised; construction failure is
/// the fatal "detector could not start" case. `run` may be slow (tens of
/// milliseconds) and is only ever called from one thread at a time.
pub trait Detector: Send {
    fn name(&self) -> &str;

    /// `(width, height)` of the frames the model expects. The pipeline sizes
    /// its low-resolution stream from this.
    fn input_size(&self) -> (i32, i32);

    /// Run inference on a packed RGB8 buffer. Boxes are returned in the
    /// coordinate space of the input frame.
    fn run(
        &mut self,
        rgb: &[u8],
        width: i32,
        height: i32,
    ) -> Result<Vec<Detection>, DetectorError>;

    /// Free accelerator resources. Called once during shutdown.
    fn release(&mut self) {}
}

/// Shared input validation for detectors with a fixed input size.
pub(crate) fn check_input(
    expected: (i32, i32),
    rgb: &[u8],
    width: i32,
    height: i32,
) -> Result<(), DetectorError> {
    let (in_w, in_h) = expected;
    let expected_len = (in_w.max(0) as usize) * (in_h.max(0) as usize) * 3;
    if (width, height) != expected || rgb.len() != expected_len {
        return Err(DetectorError::InputMismatch {
            width: in_w,
            height: in_h,
            actual_width: width,
            actual_height: height,
            actual_len: rgb.len(),
        });
    }
    Ok(())
}
