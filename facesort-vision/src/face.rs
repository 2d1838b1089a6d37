use crate::yunet;
use anyhow::{bail, Result};
use image::{DynamicImage, GenericImageView};
use ndarray::{Array1, Array4};
use ort::{session::Session, value::Value};

/// YuNet input canvas side, in pixels.
pub const DETECTOR_INPUT_SIZE: u32 = 640;
/// SFace input side, in pixels.
pub const RECOGNIZER_INPUT_SIZE: u32 = 112;

/// Axis-aligned face box in source-image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl FaceBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn iou(&self, other: &FaceBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let inter = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// A detected face.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: FaceBox,
    pub score: f32,
}

impl Detection {
    pub fn from_box(bbox: FaceBox) -> Self {
        Self {
            bbox,
            score: 1.0,
        }
    }
}

/// Face embedding. Dimension is whatever the recognizer emits.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Array1<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            vector: Array1::from(values),
        }
    }

    pub fn dim(&self) -> usize {
        self.vector.len()
    }
}

/// Planar BGR float tensor `[1, 3, H, W]` from an RGB image, values in [0, 255].
fn bgr_planes(rgb: &image::RgbImage) -> Result<Array4<f32>> {
    let (w, h) = rgb.dimensions();
    let pixel_count = (w * h) as usize;
    let mut data = vec![0.0f32; 3 * pixel_count];

    let (b_plane, rest) = data.split_at_mut(pixel_count);
    let (g_plane, r_plane) = rest.split_at_mut(pixel_count);
    for (i, px) in rgb.as_raw().chunks_exact(3).enumerate() {
        r_plane[i] = px[0] as f32;
        g_plane[i] = px[1] as f32;
        b_plane[i] = px[2] as f32;
    }

    Ok(Array4::from_shape_vec((1, 3, h as usize, w as usize), data)?)
}

/// Detect faces with YuNet. Results are sorted by descending score.
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    let target = DETECTOR_INPUT_SIZE;
    let (orig_width, orig_height) = img.dimensions();
    if orig_width == 0 || orig_height == 0 {
        bail!("image has no pixels");
    }

    // Letterbox onto a square canvas to avoid distortion
    let scale = target as f32 / orig_width.max(orig_height) as f32;
    let new_width = ((orig_width as f32 * scale) as u32).clamp(1, target);
    let new_height = ((orig_height as f32 * scale) as u32).clamp(1, target);
    let resized = img.resize_exact(new_width, new_height, image::imageops::FilterType::Triangle);

    let mut canvas = DynamicImage::new_rgb8(target, target);
    let offset_x = (target - new_width) / 2;
    let offset_y = (target - new_height) / 2;
    image::imageops::overlay(&mut canvas, &resized, offset_x as i64, offset_y as i64);

    let input_tensor = Value::from_array(bgr_planes(&canvas.to_rgb8())?)?;
    let outputs = session.run(ort::inputs![input_tensor])?;

    let mut raw_outputs: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        raw_outputs.push((shape.iter().copied().collect(), data.to_vec()));
    }

    let heads = yunet::split_heads(&raw_outputs, target as usize)?;
    let raw = yunet::decode(&heads, score_threshold, target as usize);

    // Undo letterbox: canvas pixels -> source pixels
    let (ox, oy) = (offset_x as f32, offset_y as f32);
    let detections: Vec<Detection> = raw
        .into_iter()
        .map(|d| Detection {
            bbox: FaceBox::new(
                (d.bbox[0] - ox) / scale,
                (d.bbox[1] - oy) / scale,
                d.bbox[2] / scale,
                d.bbox[3] / scale,
            ),
            score: d.score,
        })
        .collect();

    Ok(nms(&detections, nms_threshold))
}

/// Non-maximum suppression. Output is sorted by descending score, which is
/// the priority order callers rely on ("first face").
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    if iou_threshold >= 1.0 {
        return sorted;
    }

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in sorted {
        if keep
            .iter()
            .all(|kept| kept.bbox.iou(&candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

/// Crop a face box out of an image. The box is rounded to whole pixels and
/// clamped to the image bounds.
pub fn crop_face(img: &DynamicImage, bbox: &FaceBox) -> Result<DynamicImage> {
    let (img_w, img_h) = img.dimensions();

    let x0 = bbox.x.round().clamp(0.0, img_w as f32) as u32;
    let y0 = bbox.y.round().clamp(0.0, img_h as f32) as u32;
    let x1 = (bbox.x + bbox.width).round().clamp(0.0, img_w as f32) as u32;
    let y1 = (bbox.y + bbox.height).round().clamp(0.0, img_h as f32) as u32;

    if x1 <= x0 || y1 <= y0 {
        bail!(
            "face box {:?} does not intersect the {}x{} image",
            bbox,
            img_w,
            img_h
        );
    }

    Ok(img.crop_imm(x0, y0, x1 - x0, y1 - y0))
}

pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Encode a face crop with SFace. The crop is resized to 112x112.
pub fn encode_face(session: &mut Session, face_img: &DynamicImage) -> Result<Embedding> {
    let size = RECOGNIZER_INPUT_SIZE;
    let face_rgb = face_img
        .resize_exact(size, size, image::imageops::FilterType::Triangle)
        .to_rgb8();

    let input_tensor = Value::from_array(bgr_planes(&face_rgb)?)?;
    let outputs = session.run(ort::inputs![input_tensor])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    // Expecting [1, 128]
    let embedding_size = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    if embedding_size == 0 || embedding_size > data.len() {
        bail!("recognizer returned an unusable tensor of shape {:?}", shape);
    }

    let mut values = data[..embedding_size].to_vec();
    l2_normalize(&mut values);
    Ok(Embedding::new(values))
}
