use std::{convert::TryFrom, path::Path};

use tch::{self, Device, Kind, Tensor};

use crate::{
    detection::{BoundingBox, ClassTable, Detection},
    detector::{Detector, DetectorError, check_input},
};

const MAX_ROWS: usize = 512;

/// TorchScript-backed detector.
///
/// The module is expected to emit `[1, C, N]` with rows of
/// `(cx, cy, w, h, conf[, class])` in input pixel space.
pub struct TorchDetector {
    module: tch::CModule,
    device: Device,
    input_size: (i64, i64),
    confidence_threshold: f32,
    classes: ClassTable,
}

impl TorchDetector {
    /// Load a TorchScript module onto `device`.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        device: Device,
        input_size: (i64, i64),
        confidence_threshold: f32,
        classes: ClassTable,
    ) -> Result<Self, DetectorError> {
        let path = model_path.as_ref();
        let module =
            tch::CModule::load_on_device(path, device).map_err(|err| DetectorError::Load {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        Ok(Self {
            module,
            device,
            input_size,
            confidence_threshold,
            classes,
        })
    }

    /// Converts a packed RGB frame (height, width) into a normalised NCHW tensor.
    fn rgb_to_tensor(&self, rgb: &[u8]) -> Tensor {
        let (in_w, in_h) = self.input_size;
        Tensor::from_slice(rgb)
            .to_device(self.device)
            .to_kind(Kind::Float)
            .view([1, in_h, in_w, 3])
            .permute([0, 3, 1, 2])
            / 255.0
    }

    /// Executes the module and applies confidence filtering.
    fn infer(&self, input: &Tensor) -> Result<Vec<Detection>, DetectorError> {
        let output = self
            .module
            .forward_ts(&[input])
            .map_err(|err| DetectorError::Inference(err.to_string()))?;
        let shape = output.size();
        if shape.len() != 3 {
            return Err(DetectorError::Inference(format!(
                "unexpected detector output shape: {shape:?}"
            )));
        }
        if shape[0] != 1 {
            return Err(DetectorError::Inference(format!(
                "detector expected batch=1 but received {}",
                shape[0]
            )));
        }
        if shape[1] < 5 {
            return Err(DetectorError::Inference(format!(
                "detector output requires at least 5 channels (x,y,w,h,conf), got {}",
                shape[1]
            )));
        }

        let preds = output
            .to_device(Device::Cpu)
            .squeeze_dim(0)
            .permute([1, 0])
            .contiguous();
        let rows: Vec<Vec<f32>> = Vec::<Vec<f32>>::try_from(&preds)
            .map_err(|err| DetectorError::Inference(err.to_string()))?;

        let (in_w, in_h) = (self.input_size.0 as f32, self.input_size.1 as f32);
        let mut detections = Vec::new();
        for row in rows {
            if row.len() < 5 {
                continue;
            }
            let score = row[4];
            if score < self.confidence_threshold {
                continue;
            }
            let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
            let bbox = BoundingBox::new(
                (cx - w / 2.0).clamp(0.0, in_w - 1.0) as i32,
                (cy - h / 2.0).clamp(0.0, in_h - 1.0) as i32,
                (cx + w / 2.0).clamp(0.0, in_w - 1.0) as i32,
                (cy + h / 2.0).clamp(0.0, in_h - 1.0) as i32,
            );
            let class_id = if row.len() > 5 { row[5].max(0.0) as usize } else { 0 };
            detections.push(Detection::new(class_id, score, bbox, &self.classes));
            if detections.len() >= MAX_ROWS {
                break;
            }
        }

        Ok(detections)
    }
}

impl Detector for TorchDetector {
    fn name(&self) -> &str {
        "torchscript"
    }

    fn input_size(&self) -> (i32, i32) {
        (self.input_size.0 as i32, self.input_size.1 as i32)
    }

    fn run(
        &mut self,
        rgb: &[u8],
        width: i32,
        height: i32,
    ) -> Result<Vec<Detection>, DetectorError> {
        check_input(self.input_size(), rgb, width, height)?;
        let input = tch::no_grad(|| self.rgb_to_tensor(rgb));
        tch::no_grad(|| self.infer(&input))
    }
}
