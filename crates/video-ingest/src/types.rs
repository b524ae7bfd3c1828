use anyhow::Error;
use thiserror::Error;

/// Raw RGB frame captured from a video source.
#[derive(Clone, Debug)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: i32,
    pub height: i32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Rgb8,
}

impl FrameFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            FrameFormat::Rgb8 => 3,
        }
    }
}

impl Frame {
    /// Wrap a pixel buffer, checking it matches the stated dimensions.
    pub fn new(
        data: Vec<u8>,
        width: i32,
        height: i32,
        timestamp_ms: i64,
        format: FrameFormat,
    ) -> Result<Self, CaptureError> {
        if width <= 0 || height <= 0 {
            return Err(CaptureError::ZeroDimensions { width, height });
        }
        let expected = Self::expected_len(width, height, format);
        if data.len() != expected {
            return Err(CaptureError::InvalidBuffer {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp_ms,
            format,
        })
    }

    /// Solid-colour RGB frame.
    pub fn filled(width: i32, height: i32, rgb: [u8; 3]) -> Self {
        let pixels = (width.max(0) as usize) * (height.max(0) as usize);
        let mut data = Vec::with_capacity(pixels * 3);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self {
            data,
            width,
            height,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            format: FrameFormat::Rgb8,
        }
    }

    pub fn expected_len(width: i32, height: i32, format: FrameFormat) -> usize {
        (width.max(0) as usize) * (height.max(0) as usize) * format.bytes_per_pixel()
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Pixel at (x, y), or `None` outside the frame.
    pub fn pixel(&self, x: i32, y: i32) -> Option<&[u8]> {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return None;
        }
        let bpp = self.format.bytes_per_pixel();
        let index = (y as usize * self.width as usize + x as usize) * bpp;
        self.data.get(index..index + bpp)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub width: i32,
    pub height: i32,
}

impl Resolution {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Sizes of the two streams a source delivers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DualResolution {
    /// Display stream that receives the overlay.
    pub full: Resolution,
    /// Inference stream sized to the detector input.
    pub low: Resolution,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("video source {uri:?} requires the `{feature}` feature")]
    Unsupported { uri: String, feature: &'static str },
    #[error("frame buffer holds {actual} bytes, expected {expected}")]
    InvalidBuffer { expected: usize, actual: usize },
    #[error("frame dimensions must be positive, got {width}x{height}")]
    ZeroDimensions { width: i32, height: i32 },
    #[error("video source is not initialised")]
    NotInitialised,
    #[error("video source closed: {0}")]
    Closed(String),
    #[error(transparent)]
    Other(#[from] Error),
}
