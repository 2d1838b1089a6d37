//! YuNet head decoding.
//!
//! YuNet predicts from three feature maps (strides 8, 16, 32). Every map
//! carries four heads, one row per grid cell:
//! - cls: `[1, H*W, 1]` class score
//! - obj: `[1, H*W, 1]` objectness
//! - bbox: `[1, H*W, 4]` `(dx, dy, log_w, log_h)` in stride units
//! - kps: `[1, H*W, 10]` five landmark offsets in stride units
//!
//! The session emits them grouped by head, then by stride:
//! `cls_8, cls_16, cls_32, obj_8, ..., kps_32`. Only boxes are decoded;
//! crops are taken from the bounding box, so the kps heads are not read.

use anyhow::{bail, Result};
use ndarray::{ArrayView2, Axis};

pub const STRIDES: [usize; 3] = [8, 16, 32];

/// Detection in input-canvas pixels, before undoing the letterbox.
#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
}

/// The box-related head tensors of one stride.
#[derive(Debug)]
pub struct StrideHeads<'a> {
    pub stride: usize,
    pub cls: ArrayView2<'a, f32>,
    pub obj: ArrayView2<'a, f32>,
    pub bbox: ArrayView2<'a, f32>,
}

fn head_view<'a>(
    outputs: &'a [(Vec<i64>, Vec<f32>)],
    index: usize,
    cells: usize,
    width: usize,
) -> Result<ArrayView2<'a, f32>> {
    let Some((shape, data)) = outputs.get(index) else {
        bail!("YuNet output {} missing ({} outputs)", index, outputs.len());
    };
    let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
    if dims != [1, cells, width] {
        bail!(
            "YuNet output {} has shape {:?}, expected [1, {}, {}]",
            index,
            shape,
            cells,
            width
        );
    }
    Ok(ArrayView2::from_shape((cells, width), data.as_slice())?)
}

/// Group the raw outputs by stride. All twelve must be present; the cls, obj
/// and bbox heads are shape-checked.
pub fn split_heads(
    outputs: &[(Vec<i64>, Vec<f32>)],
    input_size: usize,
) -> Result<Vec<StrideHeads<'_>>> {
    if outputs.len() != 4 * STRIDES.len() {
        bail!("YuNet produced {} outputs, expected 12", outputs.len());
    }

    STRIDES
        .iter()
        .enumerate()
        .map(|(i, &stride)| -> Result<StrideHeads> {
            let side = input_size / stride;
            let cells = side * side;
            Ok(StrideHeads {
                stride,
                cls: head_view(outputs, i, cells, 1)?,
                obj: head_view(outputs, i + 3, cells, 1)?,
                bbox: head_view(outputs, i + 6, cells, 4)?,
            })
        })
        .collect()
}

/// Combined confidence, as the reference YuNet post-processing computes it.
pub fn face_score(cls: f32, obj: f32) -> f32 {
    (cls.clamp(0.0, 1.0) * obj.clamp(0.0, 1.0)).sqrt()
}

/// Decode every grid cell scoring at least `score_threshold`.
pub fn decode(
    heads: &[StrideHeads<'_>],
    score_threshold: f32,
    input_size: usize,
) -> Vec<RawDetection> {
    let mut detections = Vec::new();

    for head in heads {
        let side = input_size / head.stride;
        let stride = head.stride as f32;

        for (idx, bbox) in head.bbox.axis_iter(Axis(0)).enumerate() {
            let score = face_score(head.cls[[idx, 0]], head.obj[[idx, 0]]);
            if score < score_threshold {
                continue;
            }

            let col = (idx % side) as f32;
            let row = (idx / side) as f32;

            let cx = (col + bbox[0]) * stride;
            let cy = (row + bbox[1]) * stride;
            let w = bbox[2].exp() * stride;
            let h = bbox[3].exp() * stride;

            detections.push(RawDetection {
                bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                score,
            });
        }
    }

    detections
}
