pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod matcher;
pub mod storage;
pub mod triage;

// Re-export vision types for convenience
pub use facesort_vision::{Detection, Embedding, EmbeddingSource, FaceBox, OnnxEmbeddingSource};
