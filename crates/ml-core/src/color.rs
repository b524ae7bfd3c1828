//! Colour-threshold detector that needs no model file.
//!
//! Pixels are converted to HSV (all channels scaled to a byte) and tested
//! against an inclusive range. The detection is the bounding box of every
//! matching pixel; confidence is how much of that box the matches fill.

use crate::{
    detection::{BoundingBox, ClassTable, Detection},
    detector::{Detector, DetectorError, check_input},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl ColorRange {
    /// Saturated yellows.
    pub const YELLOW: ColorRange = ColorRange {
        lower: [30, 100, 100],
        upper: [50, 255, 255],
    };

    pub fn in_range(&self, h: u8, s: u8, v: u8) -> bool {
        h >= self.lower[0]
            && h <= self.upper[0]
            && s >= self.lower[1]
            && s <= self.upper[1]
            && v >= self.lower[2]
            && v <= self.upper[2]
    }
}

// Converts an RGB triple to HSV components scaled to bytes.
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let r = r as f32 / 255.0;
    let g = g as f32 / 255.0;
    let b = b as f32 / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta) % 6.0)
    } else if max == g {
        60.0 * (((b - r) / delta) + 2.0)
    } else {
        60.0 * (((r - g) / delta) + 4.0)
    };

    let h = if h < 0.0 { h + 360.0 } else { h };
    let h_byte = (h * 255.0 / 360.0).round() as u8;

    let s = if max == 0.0 { 0.0 } else { delta / max };
    let s_byte = (s * 255.0).round() as u8;
    let v_byte = (max * 255.0).round() as u8;

    (h_byte, s_byte, v_byte)
}

pub struct ColorBlobDetector {
    range: ColorRange,
    input_size: (i32, i32),
    min_area: usize,
    class_id: usize,
    classes: ClassTable,
}

impl ColorBlobDetector {
    pub fn new(
        range: ColorRange,
        input_size: (i32, i32),
        min_area: usize,
        class_id: usize,
        classes: ClassTable,
    ) -> Self {
        Self {
            range,
            input_size,
            min_area: min_area.max(1),
            class_id,
            classes,
        }
    }
}

impl Detector for ColorBlobDetector {
    fn name(&self) -> &str {
        "color-blob"
    }

    fn input_size(&self) -> (i32, i32) {
        self.input_size
    }

    fn run(
        &mut self,
        rgb: &[u8],
        width: i32,
        height: i32,
    ) -> Result<Vec<Detection>, DetectorError> {
        check_input(self.input_size, rgb, width, height)?;

        let mut matched = 0usize;
        let (mut x0, mut y0, mut x1, mut y1) = (i32::MAX, i32::MAX, i32::MIN, i32::MIN);
        for (index, px) in rgb.chunks_exact(3).enumerate() {
            let (h, s, v) = rgb_to_hsv(px[0], px[1], px[2]);
            if !self.range.in_range(h, s, v) {
                continue;
            }
            let x = (index % width as usize) as i32;
            let y = (index / width as usize) as i32;
            x0 = x0.min(x);
            y0 = y0.min(y);
            x1 = x1.max(x);
            y1 = y1.max(y);
            matched += 1;
        }

        if matched < self.min_area {
            return Ok(Vec::new());
        }

        let box_area = ((x1 - x0 + 1) as usize) * ((y1 - y0 + 1) as usize);
        let confidence = matched as f32 / box_area as f32;
        Ok(vec![Detection::new(
            self.class_id,
            confidence,
            BoundingBox::new(x0, y0, x1, y1),
            &self.classes,
        )])
    }
}
