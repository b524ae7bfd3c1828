//! Configuration parsing for the vision pipeline.
//!
//! This module owns translation of CLI arguments into a `VisionConfig` struct
//! which downstream stages use without re-parsing flags.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, ValueEnum};
use ml_core::ClassTable;
use video_ingest::Resolution;

pub const DEFAULT_SOURCE: &str = "test://pattern";
pub const DEFAULT_WIDTH: i32 = 640;
pub const DEFAULT_HEIGHT: i32 = 480;
pub const DEFAULT_FRAMERATE: u32 = 30;
pub const DEFAULT_CONFIDENCE: f32 = 0.5;
pub const DEFAULT_MAX_DETECTIONS: usize = 100;
pub const DEFAULT_JPEG_QUALITY: u8 = 85;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;

/// Box colours cycled by class id: red, green, blue, yellow, magenta, cyan,
/// orange, purple.
pub const DEFAULT_PALETTE: [[u8; 3]; 8] = [
    [255, 0, 0],
    [0, 255, 0],
    [0, 0, 255],
    [255, 255, 0],
    [255, 0, 255],
    [0, 255, 255],
    [255, 165, 0],
    [128, 0, 128],
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
/// Detector backend selected at startup.
pub enum DetectorKind {
    /// HSV colour-threshold detector, no model file required.
    Color,
    /// TorchScript module (requires the `with-tch` feature).
    Torch,
}

impl DetectorKind {
    pub fn label(self) -> &'static str {
        match self {
            DetectorKind::Color => "color",
            DetectorKind::Torch => "torch",
        }
    }
}

#[derive(Clone, Debug)]
/// Canonical configuration shared by every stage in the pipeline.
pub struct VisionConfig {
    /// Camera URI, device index, file path, or `test://pattern`.
    pub source_uri: String,
    /// Display stream resolution.
    pub resolution: Resolution,
    pub framerate: u32,
    pub detector: DetectorKind,
    /// TorchScript model path, required for `DetectorKind::Torch`.
    pub model_path: Option<PathBuf>,
    /// Detector input size; also the low-resolution capture size.
    pub detector_size: Resolution,
    /// Force CPU inference for the torch detector.
    pub use_cpu: bool,
    pub confidence_threshold: f32,
    pub max_detections: usize,
    /// Class names to keep; empty keeps every class.
    pub class_filter: Vec<String>,
    pub class_names: ClassTable,
    pub palette: Vec<[u8; 3]>,
    pub jpeg_quality: u8,
    pub host: String,
    pub port: u16,
    /// Telemetry and instrumentation options.
    pub telemetry: TelemetryOptions,
}

impl Default for VisionConfig {
    fn default() -> Self {
        let resolution = Resolution::new(DEFAULT_WIDTH, DEFAULT_HEIGHT);
        Self {
            source_uri: DEFAULT_SOURCE.to_string(),
            resolution,
            framerate: DEFAULT_FRAMERATE,
            detector: DetectorKind::Color,
            model_path: None,
            detector_size: Self::default_detector_size(DetectorKind::Color, resolution),
            use_cpu: false,
            confidence_threshold: DEFAULT_CONFIDENCE,
            max_detections: DEFAULT_MAX_DETECTIONS,
            class_filter: Vec::new(),
            class_names: ClassTable::default(),
            palette: DEFAULT_PALETTE.to_vec(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            telemetry: TelemetryOptions::default(),
        }
    }
}

#[derive(Clone, Debug, Default)]
/// Optional telemetry knobs for tracing.
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing pipeline spans.
    pub chrome_trace_path: Option<PathBuf>,
    /// Default the log filter to `debug` when `RUST_LOG` is unset.
    pub verbose: bool,
}

/// CLI arguments accepted by the `serve` and `probe` subcommands.
#[derive(Debug, Args)]
pub struct VisionCliArgs {
    /// Camera index, device path, video file, or `test://pattern`.
    #[arg(long = "source", value_name = "URI", default_value = DEFAULT_SOURCE)]
    pub source_uri: String,
    /// Display width in pixels.
    #[arg(long = "width", value_name = "PX", default_value_t = DEFAULT_WIDTH)]
    pub width: i32,
    /// Display height in pixels.
    #[arg(long = "height", value_name = "PX", default_value_t = DEFAULT_HEIGHT)]
    pub height: i32,
    /// Requested capture framerate.
    #[arg(long = "framerate", value_name = "FPS", default_value_t = DEFAULT_FRAMERATE)]
    pub framerate: u32,
    /// Detector backend.
    #[arg(long = "detector", value_enum, default_value_t = DetectorKind::Color)]
    pub detector: DetectorKind,
    /// TorchScript model path (torch detector only).
    #[arg(long = "model", value_name = "PATH")]
    pub model_path: Option<PathBuf>,
    /// Detector input width in pixels.
    #[arg(long = "detector-width", value_name = "PX")]
    pub detector_width: Option<i32>,
    /// Detector input height in pixels.
    #[arg(long = "detector-height", value_name = "PX")]
    pub detector_height: Option<i32>,
    /// Force CPU inference.
    #[arg(long = "cpu", action = clap::ArgAction::SetTrue)]
    pub use_cpu: bool,
    /// Minimum detection confidence (0.0-1.0).
    #[arg(long = "confidence", value_name = "SCORE", default_value_t = DEFAULT_CONFIDENCE)]
    pub confidence: f32,
    /// Maximum detections kept per cycle.
    #[arg(long = "max-detections", value_name = "N", default_value_t = DEFAULT_MAX_DETECTIONS)]
    pub max_detections: usize,
    /// Only keep these class names (comma separated).
    #[arg(long = "classes", value_name = "NAMES", value_delimiter = ',')]
    pub classes: Vec<String>,
    /// Class label file, one name per line.
    #[arg(long = "labels", value_name = "PATH")]
    pub labels: Option<PathBuf>,
    /// Box palette as `r,g,b;r,g,b;...`.
    #[arg(long = "palette", value_name = "COLORS")]
    pub palette: Option<String>,
    /// JPEG quality used by the stream encoder (1-100).
    #[arg(long = "jpeg-quality", value_name = "QUALITY")]
    pub jpeg_quality: Option<i32>,
    /// Address the HTTP server binds to.
    #[arg(long = "host", value_name = "HOST", default_value = DEFAULT_HOST)]
    pub host: String,
    /// Port the HTTP server binds to.
    #[arg(long = "port", value_name = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Enable verbose logging.
    #[arg(long = "verbose", action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
}

impl TryFrom<VisionCliArgs> for VisionConfig {
    type Error = anyhow::Error;

    fn try_from(args: VisionCliArgs) -> Result<Self> {
        if args.width <= 0 || args.height <= 0 {
            bail!("Capture width and height must be positive integers");
        }
        if args.framerate == 0 {
            bail!("--framerate must be at least 1");
        }
        let resolution = Resolution::new(args.width, args.height);

        let detector_size = match (args.detector_width, args.detector_height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Resolution::new(w, h),
            (None, None) => Self::default_detector_size(args.detector, resolution),
            _ => bail!(
                "--detector-width and --detector-height must be given together as positive integers"
            ),
        };

        if args.detector == DetectorKind::Torch && args.model_path.is_none() {
            bail!("Missing model path. Provide --model <path> with --detector torch.");
        }

        if !(0.0..=1.0).contains(&args.confidence) {
            bail!("--confidence must be between 0.0 and 1.0");
        }
        if args.max_detections == 0 {
            bail!("--max-detections must be at least 1");
        }

        let jpeg_quality = args.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY as i32);
        if !(1..=100).contains(&jpeg_quality) {
            bail!("--jpeg-quality must be an integer between 1 and 100");
        }

        let class_names = match args.labels.as_ref() {
            Some(path) => ClassTable::from_file(path)
                .with_context(|| format!("Failed to load class labels from {}", path.display()))?,
            None => ClassTable::default(),
        };

        let palette = match args.palette.as_deref() {
            Some(raw) => parse_palette(raw)?,
            None => DEFAULT_PALETTE.to_vec(),
        };

        let class_filter = args
            .classes
            .into_iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();

        Ok(Self {
            source_uri: args.source_uri,
            resolution,
            framerate: args.framerate,
            detector: args.detector,
            model_path: args.model_path,
            detector_size,
            use_cpu: args.use_cpu,
            confidence_threshold: args.confidence,
            max_detections: args.max_detections,
            class_filter,
            class_names,
            palette,
            jpeg_quality: jpeg_quality as u8,
            host: args.host,
            port: args.port,
            telemetry: TelemetryOptions {
                chrome_trace_path: args.chrome_trace,
                verbose: args.verbose,
            },
        })
    }
}

impl VisionConfig {
    /// Half the display size for the colour detector, and a square rounded up
    /// to 32-pixel alignment for model input.
    fn default_detector_size(kind: DetectorKind, resolution: Resolution) -> Resolution {
        match kind {
            DetectorKind::Color => {
                Resolution::new((resolution.width / 2).max(1), (resolution.height / 2).max(1))
            }
            DetectorKind::Torch => {
                let max_dim = resolution.width.max(resolution.height).max(32);
                let aligned = ((max_dim + 31) / 32) * 32;
                Resolution::new(aligned, aligned)
            }
        }
    }
}

/// Parse `r,g,b;r,g,b;...` into palette entries.
pub fn parse_palette(value: &str) -> Result<Vec<[u8; 3]>> {
    let mut palette = Vec::new();
    for entry in value.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let channels: Vec<&str> = entry.split(',').map(str::trim).collect();
        if channels.len() != 3 {
            bail!("Palette entry `{entry}` must have exactly three channels");
        }
        let mut color = [0u8; 3];
        for (slot, channel) in color.iter_mut().zip(channels) {
            *slot = channel.parse::<u8>().map_err(|err| {
                anyhow!("Palette entry `{entry}`: invalid channel `{channel}` ({err})")
            })?;
        }
        palette.push(color);
    }
    if palette.is_empty() {
        bail!("--palette must contain at least one colour");
    }
    Ok(palette)
}
