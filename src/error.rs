use std::path::PathBuf;
use thiserror::Error;

/// Conditions that stop a run before any file is touched.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("setting `{0}` is not configured")]
    MissingSetting(&'static str),
    #[error("threshold {0} must be within (0, 2]")]
    InvalidThreshold(f32),
    #[error("reference folder not found: {}", .0.display())]
    ReferenceRootMissing(PathBuf),
    #[error("no reference embeddings were built from {}", .0.display())]
    EmptyCatalog(PathBuf),
    #[error("cannot read probe folder {}: {reason}", .path.display())]
    ProbeRootUnreadable { path: PathBuf, reason: String },
}
