pub mod face;
pub mod model;
pub mod source;
pub mod yunet;

// Re-export commonly used types
pub use face::{crop_face, Detection, Embedding, FaceBox};
pub use source::{EmbeddingSource, OnnxEmbeddingSource};
