#![cfg(feature = "backend-tract")]

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::config::DetectorSettings;
use crate::detect::backend::Detector;
use crate::detect::nms::non_max_suppression;
use crate::detect::result::{BoundingBox, Detection, TrafficClass};
use crate::frame::Frame;

/// Loaded YOLOv8-style ONNX model, shared by every stream's backend.
pub struct TractModel {
    plan: TypedRunnableModel<TypedModel>,
    input_size: u32,
}

impl TractModel {
    /// Load an ONNX model from disk and prepare it for square RGB input.
    pub fn load<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = input_size as usize;
        let plan = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, f32::fact([1, 3, size, size]).into())
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;
        log::info!(
            "loaded detector model {} ({}x{})",
            model_path.display(),
            input_size,
            input_size
        );
        Ok(Self { plan, input_size })
    }
}

/// Tract-based backend for YOLOv8 ONNX exports.
///
/// Frames are stretched to the model input, the `[1, 4 + classes, anchors]`
/// output is thresholded, mapped from COCO ids to traffic classes, filtered
/// and suppressed per class, then scaled back to frame pixels.
pub struct TractBackend {
    model: Arc<TractModel>,
    conf_threshold: f32,
    iou_threshold: f32,
    classes: Vec<TrafficClass>,
}

impl TractBackend {
    pub fn new(model: Arc<TractModel>, settings: &DetectorSettings) -> Self {
        Self {
            model,
            conf_threshold: settings.conf_threshold,
            iou_threshold: settings.iou_threshold,
            classes: settings.classes.clone(),
        }
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let size = self.model.input_size;
        let resized = imageops::resize(frame.image(), size, size, FilterType::Triangle);
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, size as usize, size as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        input.into_tensor()
    }

    fn decode(&self, output: &Tensor, frame: &Frame) -> Result<Vec<Detection>> {
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(anyhow!("unexpected model output shape {:?}", shape));
        }
        // Exports differ on whether attributes or anchors come first.
        let channels_first = shape[1] < shape[2];
        let (attrs, anchors) = if channels_first {
            (shape[1], shape[2])
        } else {
            (shape[2], shape[1])
        };
        if attrs <= 4 {
            return Err(anyhow!("model output has no class scores ({:?})", shape));
        }
        let at = |attr: usize, anchor: usize| -> f32 {
            if channels_first {
                view[[0, attr, anchor]]
            } else {
                view[[0, anchor, attr]]
            }
        };

        let scale_x = frame.width() as f32 / self.model.input_size as f32;
        let scale_y = frame.height() as f32 / self.model.input_size as f32;
        let mut detections = Vec::new();
        for anchor in 0..anchors {
            let (class_id, score) = (4..attrs)
                .map(|attr| (attr - 4, at(attr, anchor)))
                .fold((0usize, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                });
            if !score.is_finite() || score < self.conf_threshold {
                continue;
            }
            let Some(class) = TrafficClass::from_coco_id(class_id) else {
                continue;
            };
            if !self.classes.contains(&class) {
                continue;
            }
            let (cx, cy, w, h) = (
                at(0, anchor),
                at(1, anchor),
                at(2, anchor),
                at(3, anchor),
            );
            let bbox = BoundingBox::new(
                ((cx - w / 2.0) * scale_x).round() as i32,
                ((cy - h / 2.0) * scale_y).round() as i32,
                ((cx + w / 2.0) * scale_x).round() as i32,
                ((cy + h / 2.0) * scale_y).round() as i32,
            )
            .clamp_to(frame.width(), frame.height());
            detections.push(Detection::new(bbox, score, class));
        }
        non_max_suppression(&mut detections, self.iou_threshold);
        Ok(detections)
    }
}

impl Detector for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(anyhow!("frame has no pixels"));
        }
        let input = self.build_input(frame);
        let outputs = self
            .model
            .plan
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        self.decode(output, frame)
    }
}
