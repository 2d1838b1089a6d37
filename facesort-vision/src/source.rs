use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;
use std::path::Path;

use crate::face::{self, Detection, Embedding};

/// Face detection and embedding capability.
///
/// Detection order is significant: callers treat the first returned face as
/// the most relevant one.
pub trait EmbeddingSource {
    fn detect_faces(&mut self, image: &DynamicImage) -> Result<Vec<Detection>>;

    /// Embed an already cropped face. Identical pixels give identical vectors.
    fn embed(&mut self, face: &DynamicImage) -> Result<Embedding>;

    /// Crop the detection out of `image` and embed it.
    fn embed_detection(
        &mut self,
        image: &DynamicImage,
        detection: &Detection,
    ) -> Result<Embedding> {
        let crop = face::crop_face(image, &detection.bbox).context("cropping face")?;
        self.embed(&crop).context("encoding face")
    }
}

impl<S: EmbeddingSource + ?Sized> EmbeddingSource for Box<S> {
    fn detect_faces(&mut self, image: &DynamicImage) -> Result<Vec<Detection>> {
        (**self).detect_faces(image)
    }

    fn embed(&mut self, face: &DynamicImage) -> Result<Embedding> {
        (**self).embed(face)
    }
}

/// YuNet detector + SFace encoder on ONNX Runtime.
pub struct OnnxEmbeddingSource {
    pub detector: Session,
    pub encoder: Session,
    score_threshold: f32,
    nms_threshold: f32,
}

impl OnnxEmbeddingSource {
    pub fn new(
        detector_model: &Path,
        recognizer_model: &Path,
        score_threshold: f32,
        nms_threshold: f32,
    ) -> Result<Self> {
        Ok(Self {
            detector: crate::model::detector_session(detector_model)?,
            encoder: crate::model::recog_session(recognizer_model)?,
            score_threshold,
            nms_threshold,
        })
    }
}

impl EmbeddingSource for OnnxEmbeddingSource {
    fn detect_faces(&mut self, image: &DynamicImage) -> Result<Vec<Detection>> {
        face::detect_faces(
            &mut self.detector,
            image,
            self.score_threshold,
            self.nms_threshold,
        )
        .context("detecting faces")
    }

    fn embed(&mut self, face: &DynamicImage) -> Result<Embedding> {
        face::encode_face(&mut self.encoder, face)
    }
}
