//! CPU overlay drawing onto full-resolution RGB frames.
//!
//! Detection boxes arrive in detector (low-resolution) pixel space and are
//! mapped per axis before drawing. Text uses a built-in 5x7 bitmap font.

use image::{ImageBuffer, Rgb};
use ml_core::{BoundingBox, Detection};
use video_ingest::{Frame, Resolution};

use crate::pipeline::{config::DEFAULT_PALETTE, state::DetectionSnapshot};

/// Box outline thickness in pixels.
pub const BOX_THICKNESS: i32 = 2;
const GLYPH_ADVANCE: i32 = 6;
const GLYPH_HEIGHT: i32 = 7;
const FPS_COLOR: [u8; 3] = [0, 255, 0];
const TEXT_BACKING: [u8; 3] = [0, 0, 0];

/// Full-resolution pixels per low-resolution pixel, per axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScaleRatio {
    pub x: f64,
    pub y: f64,
}

impl ScaleRatio {
    pub const IDENTITY: ScaleRatio = ScaleRatio { x: 1.0, y: 1.0 };

    pub fn between(low: Resolution, full: Resolution) -> Self {
        let axis = |full: i32, low: i32| {
            if low > 0 && full > 0 {
                full as f64 / low as f64
            } else {
                1.0
            }
        };
        Self {
            x: axis(full.width, low.width),
            y: axis(full.height, low.height),
        }
    }

    pub fn scale(&self, bbox: BoundingBox) -> BoundingBox {
        let sx = |v: i32| (v as f64 * self.x).round() as i32;
        let sy = |v: i32| (v as f64 * self.y).round() as i32;
        BoundingBox::new(sx(bbox.x0), sy(bbox.y0), sx(bbox.x1), sy(bbox.y1))
    }
}

pub struct OverlayRenderer {
    ratio: ScaleRatio,
    palette: Vec<[u8; 3]>,
    text_scale: i32,
}

impl OverlayRenderer {
    /// An empty palette falls back to the default eight colours.
    pub fn new(ratio: ScaleRatio, palette: Vec<[u8; 3]>, full: Resolution) -> Self {
        let palette = if palette.is_empty() {
            DEFAULT_PALETTE.to_vec()
        } else {
            palette
        };
        Self {
            ratio,
            palette,
            text_scale: (full.width / 640).max(1),
        }
    }

    pub fn color_for(&self, class_id: usize) -> [u8; 3] {
        self.palette[class_id % self.palette.len()]
    }

    pub fn label_for(detection: &Detection) -> String {
        format!(
            "{} {}%",
            detection.class_name,
            detection.confidence_percent()
        )
    }

    pub fn fps_text(fps: f32) -> String {
        format!("FPS: {fps:.1}")
    }

    /// Draw every detection and the FPS readout in place.
    ///
    /// Frames whose buffer does not match their dimensions are left untouched.
    pub fn render(&self, frame: &mut Frame, snapshot: &DetectionSnapshot) {
        let (width, height) = (frame.width.max(0) as u32, frame.height.max(0) as u32);
        let Some(mut canvas) =
            ImageBuffer::<Rgb<u8>, &mut [u8]>::from_raw(width, height, frame.data.as_mut_slice())
        else {
            return;
        };

        for detection in &snapshot.detections {
            let color = Rgb(self.color_for(detection.class_id));
            let bbox = self.ratio.scale(detection.bbox);
            draw_rectangle(&mut canvas, bbox, BOX_THICKNESS, color);
            draw_label(
                &mut canvas,
                bbox.x0 + BOX_THICKNESS + 3,
                bbox.y0 + BOX_THICKNESS + 3,
                &Self::label_for(detection),
                color,
                self.text_scale,
            );
        }

        let info = Self::fps_text(snapshot.fps);
        let scale = self.text_scale;
        let info_width = info.chars().count() as i32 * GLYPH_ADVANCE * scale;
        fill_rect(
            &mut canvas,
            BoundingBox::new(6, 6, 10 + info_width + 2, 10 + GLYPH_HEIGHT * scale + 2),
            Rgb(TEXT_BACKING),
        );
        draw_label(&mut canvas, 10, 10, &info, Rgb(FPS_COLOR), scale);
    }
}

type Canvas<'a> = ImageBuffer<Rgb<u8>, &'a mut [u8]>;

/// Outline `bbox` inward by `thickness` pixels, clipped to the canvas.
fn draw_rectangle(image: &mut Canvas<'_>, bbox: BoundingBox, thickness: i32, color: Rgb<u8>) {
    for inset in 0..thickness {
        let (left, top) = (bbox.x0 + inset, bbox.y0 + inset);
        let (right, bottom) = (bbox.x1 - inset, bbox.y1 - inset);
        if left > right || top > bottom {
            break;
        }
        fill_rect(image, BoundingBox::new(left, top, right, top), color);
        fill_rect(image, BoundingBox::new(left, bottom, right, bottom), color);
        fill_rect(image, BoundingBox::new(left, top, left, bottom), color);
        fill_rect(image, BoundingBox::new(right, top, right, bottom), color);
    }
}

fn fill_rect(image: &mut Canvas<'_>, bbox: BoundingBox, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    if width == 0 || height == 0 {
        return;
    }
    if bbox.x1 < 0 || bbox.y1 < 0 || bbox.x0 >= width || bbox.y0 >= height {
        return;
    }
    let left = bbox.x0.clamp(0, width - 1);
    let right = bbox.x1.clamp(0, width - 1);
    let top = bbox.y0.clamp(0, height - 1);
    let bottom = bbox.y1.clamp(0, height - 1);

    for y in top..=bottom {
        for x in left..=right {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}

fn draw_label(image: &mut Canvas<'_>, mut x: i32, y: i32, text: &str, color: Rgb<u8>, scale: i32) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        let glyph = glyph_bits(ch).unwrap_or(UNKNOWN_GLYPH);
        for (row, pattern) in glyph.iter().enumerate() {
            for col in 0..5 {
                if (pattern >> (4 - col)) & 1 == 0 {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        let px = x + col * scale + dx;
                        let py = y + row as i32 * scale + dy;
                        if px >= 0 && px < width && py >= 0 && py < height {
                            image.put_pixel(px as u32, py as u32, color);
                        }
                    }
                }
            }
        }
        x += GLYPH_ADVANCE * scale;
    }
}

const UNKNOWN_GLYPH: [u8; 7] = [
    0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b00000, 0b00100,
];

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    match ch {
        'A' => Some([
            0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001,
        ]),
        'B' => Some([
            0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110,
        ]),
        'C' => Some([
            0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110,
        ]),
        'D' => Some([
            0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110,
        ]),
        'E' => Some([
            0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111,
        ]),
        'F' => Some([
            0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000,
        ]),
        'G' => Some([
            0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111,
        ]),
        'H' => Some([
            0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001,
        ]),
        'I' => Some([
            0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110,
        ]),
        'J' => Some([
            0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100,
        ]),
        'K' => Some([
            0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001,
        ]),
        'L' => Some([
            0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111,
        ]),
        'M' => Some([
            0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001,
        ]),
        'N' => Some([
            0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001,
        ]),
        'O' => Some([
            0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110,
        ]),
        'P' => Some([
            0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000,
        ]),
        'Q' => Some([
            0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101,
        ]),
        'R' => Some([
            0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001,
        ]),
        'S' => Some([
            0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110,
        ]),
        'T' => Some([
            0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100,
        ]),
        'U' => Some([
            0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110,
        ]),
        'V' => Some([
            0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100,
        ]),
        'W' => Some([
            0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010,
        ]),
        'X' => Some([
            0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001,
        ]),
        'Y' => Some([
            0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100,
        ]),
        'Z' => Some([
            0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111,
        ]),
        '0' => Some([
            0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110,
        ]),
        '1' => Some([
            0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110,
        ]),
        '2' => Some([
            0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111,
        ]),
        '3' => Some([
            0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110,
        ]),
        '4' => Some([
            0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010,
        ]),
        '5' => Some([
            0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110,
        ]),
        '6' => Some([
            0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110,
        ]),
        '7' => Some([
            0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000,
        ]),
        '8' => Some([
            0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110,
        ]),
        '9' => Some([
            0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100,
        ]),
        '%' => Some([
            0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0b00000,
        ]),
        ':' => Some([0, 0b01100, 0b01100, 0, 0b01100, 0b01100, 0]),
        '-' => Some([0, 0, 0, 0b11111, 0, 0, 0]),
        '_' => Some([0, 0, 0, 0, 0, 0, 0b11111]),
        '/' => Some([
            0b00001, 0b00010, 0b00010, 0b00100, 0b01000, 0b01000, 0b10000,
        ]),
        '.' => Some([0, 0, 0, 0, 0, 0b00110, 0b00110]),
        ' ' => Some([0, 0, 0, 0, 0, 0, 0]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use ml_core::ClassTable;

    use super::*;

    fn detection(class_id: usize, confidence: f32, bbox: BoundingBox) -> Detection {
        Detection::new(class_id, confidence, bbox, &ClassTable::default())
    }

    fn snapshot(detections: Vec<Detection>, fps: f32) -> DetectionSnapshot {
        DetectionSnapshot {
            detections,
            fps,
            ..Default::default()
        }
    }

    #[test]
    fn ratio_is_per_axis() {
        let ratio = ScaleRatio::between(Resolution::new(320, 240), Resolution::new(1280, 480));
        assert_eq!(ratio, ScaleRatio { x: 4.0, y: 2.0 });
        assert_eq!(
            ratio.scale(BoundingBox::new(10, 20, 30, 40)),
            BoundingBox::new(40, 40, 120, 80)
        );
    }

    #[test]
    fn label_uses_truncated_percent() {
        let det = detection(0, 0.876, BoundingBox::default());
        assert_eq!(OverlayRenderer::label_for(&det), "person 87%");
        assert_eq!(OverlayRenderer::fps_text(29.96), "FPS: 30.0");
    }

    #[test]
    fn palette_cycles_by_class_id() {
        let renderer = OverlayRenderer::new(
            ScaleRatio::IDENTITY,
            DEFAULT_PALETTE.to_vec(),
            Resolution::new(64, 64),
        );
        assert_eq!(renderer.color_for(0), [255, 0, 0]);
        assert_eq!(renderer.color_for(8), [255, 0, 0]);
        assert_eq!(renderer.color_for(11), [255, 255, 0]);
    }

    #[test]
    fn draws_scaled_box_in_class_color() {
        let mut frame = Frame::filled(200, 100, [0, 0, 0]);
        let renderer = OverlayRenderer::new(
            ScaleRatio::between(Resolution::new(100, 50), Resolution::new(200, 100)),
            vec![[10, 20, 30], [200, 100, 50]],
            frame.resolution(),
        );
        let snap = snapshot(vec![detection(1, 0.9, BoundingBox::new(40, 20, 80, 45))], 12.0);
        renderer.render(&mut frame, &snap);

        // Scaled box is (80, 40)-(160, 90); edges carry the class colour.
        assert_eq!(frame.pixel(120, 40), Some(&[200, 100, 50][..]));
        assert_eq!(frame.pixel(120, 41), Some(&[200, 100, 50][..]));
        assert_eq!(frame.pixel(160, 70), Some(&[200, 100, 50][..]));
        assert_eq!(frame.pixel(120, 89), Some(&[200, 100, 50][..]));
        // Interior away from the label stays untouched.
        assert_eq!(frame.pixel(140, 80), Some(&[0, 0, 0][..]));
        // Outside the box is untouched.
        assert_eq!(frame.pixel(60, 70), Some(&[0, 0, 0][..]));
    }

    #[test]
    fn boxes_past_the_edge_are_clipped() {
        let mut frame = Frame::filled(32, 32, [0, 0, 0]);
        let renderer = OverlayRenderer::new(ScaleRatio::IDENTITY, Vec::new(), frame.resolution());
        let snap = snapshot(
            vec![detection(2, 0.5, BoundingBox::new(-10, 20, 50, 60))],
            0.0,
        );
        renderer.render(&mut frame, &snap);
        assert_eq!(frame.data.len(), 32 * 32 * 3);
        assert_eq!(frame.pixel(31, 20), Some(&[0, 0, 255][..]));
    }

    #[test]
    fn fps_readout_is_drawn_without_detections() {
        let mut frame = Frame::filled(120, 40, [90, 90, 90]);
        let renderer = OverlayRenderer::new(ScaleRatio::IDENTITY, Vec::new(), frame.resolution());
        renderer.render(&mut frame, &snapshot(Vec::new(), 30.0));
        let touched = (6..20)
            .flat_map(|y| (6..60).map(move |x| (x, y)))
            .filter(|&(x, y)| frame.pixel(x, y) == Some(&FPS_COLOR[..]))
            .count();
        assert!(touched > 0);
    }

    #[test]
    fn mismatched_buffer_is_left_alone() {
        let mut frame = Frame::filled(10, 10, [1, 2, 3]);
        frame.data.truncate(10);
        let renderer = OverlayRenderer::new(ScaleRatio::IDENTITY, Vec::new(), frame.resolution());
        renderer.render(&mut frame, &snapshot(Vec::new(), 1.0));
        assert_eq!(frame.data, vec![1, 2, 3, 1, 2, 3, 1, 2, 3, 1]);
    }
}
