#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::{InferenceBackend, NETWORK_INPUT_SIZE};
use crate::detect::result::Proposal;
use crate::frame::Frame;

/// Tract-based backend for ONNX inference.
///
/// Loads a local model file once and runs forward passes on canonical
/// frames. The model is expected to emit YOLO-style rows of
/// `[cx, cy, w, h, objectness, class scores...]` in normalized
/// coordinates.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn load<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = NETWORK_INPUT_SIZE as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size: NETWORK_INPUT_SIZE,
        })
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let size = self.input_size;
        let resized = imageops::resize(frame.image(), size, size, FilterType::Triangle);
        let size = size as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, size, size),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32).0[channel] as f32 / 255.0,
        );
        input.into_tensor()
    }

    fn decode_outputs(&self, outputs: TVec<TValue>) -> Result<Vec<Proposal>> {
        const CXYWH_OFFSET: usize = 5;

        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;

        // Accept (rows, attrs) or (1, rows, attrs).
        let rows = match view.ndim() {
            2 => view.into_dimensionality::<tract_ndarray::Ix2>()?,
            3 => view
                .into_dimensionality::<tract_ndarray::Ix3>()?
                .index_axis_move(tract_ndarray::Axis(0), 0),
            other => return Err(anyhow!("unexpected output rank {}", other)),
        };

        let mut proposals = Vec::new();
        for row in rows.outer_iter() {
            if row.len() <= CXYWH_OFFSET {
                return Err(anyhow!("output row too short: {}", row.len()));
            }
            let (class_id, &confidence) = row
                .iter()
                .skip(CXYWH_OFFSET)
                .enumerate()
                .reduce(|max, x| if x.1 > max.1 { x } else { max })
                .ok_or_else(|| anyhow!("output row has no class scores"))?;

            proposals.push(Proposal {
                class_id,
                confidence,
                cx: row[0],
                cy: row[1],
                w: row[2],
                h: row[3],
            });
        }
        Ok(proposals)
    }
}

impl InferenceBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn forward(&mut self, frame: &Frame) -> Result<Vec<Proposal>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode_outputs(outputs)
    }
}
