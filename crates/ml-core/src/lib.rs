//! Detector capability and the detection data model shared by the pipeline.
//!
//! Enable the `with-tch` feature to pull in the TorchScript-backed detector.

pub mod color;
pub mod detection;
pub mod detector;
#[cfg(feature = "with-tch")]
pub mod torch;

pub use color::{ColorBlobDetector, ColorRange};
pub use detection::{BoundingBox, ClassTable, Detection, UNKNOWN_CLASS};
pub use detector::{Detector, DetectorError};
#[cfg(feature = "with-tch")]
pub use tch;
#[cfg(feature = "with-tch")]
pub use torch::TorchDetector;
