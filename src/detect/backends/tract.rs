#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::RawFrame;

/// Tract-based backend for YOLOv8 ONNX models.
///
/// Loads a local model file with a fixed `1x3xHxW` input. Frames are resized
/// to the model input with nearest-neighbour sampling, and boxes are mapped
/// back to frame-pixel space. No network I/O.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_width: u32,
    input_height: u32,
    candidate_floor: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_width: u32, input_height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_height as usize, input_width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_width,
            input_height,
            candidate_floor: 0.05,
        })
    }

    /// Minimum class score for a raw candidate to leave the backend.
    pub fn with_candidate_floor(mut self, floor: f32) -> Self {
        self.candidate_floor = floor;
        self
    }

    fn build_input(&self, frame: &RawFrame) -> Result<Tensor> {
        let expected_len = frame
            .expected_rgb_len()
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if frame.byte_len() != expected_len || expected_len == 0 {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected_len,
                frame.byte_len()
            ));
        }

        let pixels = frame.pixels();
        let src_w = frame.width as usize;
        let src_h = frame.height as usize;
        let dst_w = self.input_width as usize;
        let dst_h = self.input_height as usize;

        let input = tract_ndarray::Array4::from_shape_fn((1, 3, dst_h, dst_w), |(_, c, y, x)| {
            let sx = (x * src_w / dst_w).min(src_w - 1);
            let sy = (y * src_h / dst_h).min(src_h - 1);
            pixels[(sy * src_w + sx) * 3 + c] as f32 / 255.0
        });

        Ok(input.into_tensor())
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &RawFrame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;

        let shape = view.shape();
        if shape.len() != 3 || shape[0] != 1 || shape[1] < 5 {
            return Err(anyhow!("unexpected YOLOv8 output shape {:?}", shape));
        }
        let channels = shape[1];
        let anchors = shape[2];
        let data: Vec<f32> = view.iter().copied().collect();

        let scale_x = frame.width as f32 / self.input_width as f32;
        let scale_y = frame.height as f32 / self.input_height as f32;
        Ok(decode_yolov8(
            &data,
            channels,
            anchors,
            scale_x,
            scale_y,
            self.candidate_floor,
        ))
    }
}

/// Decode a row-major `[4 + classes, anchors]` YOLOv8 head.
///
/// Rows 0..4 hold `cx, cy, w, h` in model-input pixels; the remaining rows
/// hold per-class scores. Each anchor yields its best class if that score
/// reaches `floor`.
pub fn decode_yolov8(
    data: &[f32],
    channels: usize,
    anchors: usize,
    scale_x: f32,
    scale_y: f32,
    floor: f32,
) -> Vec<Detection> {
    if channels < 5 || data.len() < channels * anchors {
        return Vec::new();
    }
    let at = |row: usize, col: usize| data[row * anchors + col];

    let mut out = Vec::new();
    for a in 0..anchors {
        let mut best_class = 0usize;
        let mut best_score = f32::NEG_INFINITY;
        for class in 0..channels - 4 {
            let score = at(4 + class, a);
            if score > best_score {
                best_score = score;
                best_class = class;
            }
        }
        if !(best_score >= floor) {
            continue;
        }

        let bbox = BoundingBox::from_center(
            at(0, a) * scale_x,
            at(1, a) * scale_y,
            at(2, a) * scale_x,
            at(3, a) * scale_y,
        );
        out.push(Detection::new(bbox, best_class as u32, best_score.min(1.0)));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_best_class_and_rescales() {
        // 2 classes, 2 anchors.
        #[rustfmt::skip]
        let data = [
            320.0, 10.0,  // cx
            320.0, 10.0,  // cy
            64.0,  4.0,   // w
            128.0, 4.0,   // h
            0.9,   0.01,  // class 0
            0.2,   0.02,  // class 1
        ];
        let out = decode_yolov8(&data, 6, 2, 2.0, 1.125, 0.25);
        assert_eq!(out.len(), 1);
        let d = &out[0];
        assert_eq!(d.class_id, 0);
        assert!((d.bbox.x1 - 576.0).abs() < 1e-3);
        assert!((d.bbox.x2 - 704.0).abs() < 1e-3);
        assert!((d.bbox.y2 - 432.0).abs() < 1e-3);
    }

    #[test]
    fn rejects_short_buffers() {
        assert!(decode_yolov8(&[0.0; 4], 5, 1, 1.0, 1.0, 0.0).is_empty());
    }
}
