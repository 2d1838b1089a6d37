use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::FatalError;

pub static CONFIG_PATH: Lazy<&'static Path> =
    Lazy::new(|| Path::new(option_env!("FACESORT_CONFIG_PATH").unwrap_or("facesort.toml")));

pub const DEFAULT_THRESHOLD: f32 = 0.45;

/// What to do when the destination file already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    #[default]
    Overwrite,
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Folder holding one reference collection ("turma") per subfolder.
    pub reference_root: Option<PathBuf>,
    /// Folder with the photos to sort.
    pub probe_root: Option<PathBuf>,
    /// Folder receiving one subfolder per matched identity.
    pub output_root: Option<PathBuf>,
    /// Cosine distance below which a face counts as a match.
    pub threshold: f32,
    pub detector_model: PathBuf,
    pub recognizer_model: PathBuf,
    /// Detector confidence cutoff.
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub on_conflict: ConflictPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reference_root: None,
            probe_root: None,
            output_root: None,
            threshold: DEFAULT_THRESHOLD,
            detector_model: PathBuf::from("models/face_detection_yunet_2023mar.onnx"),
            recognizer_model: PathBuf::from("models/face_recognition_sface_2021dec.onnx"),
            score_threshold: 0.6,
            nms_threshold: 0.3,
            on_conflict: ConflictPolicy::default(),
        }
    }
}

/// The three folders a run works on, after the turma has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub reference_dir: PathBuf,
    pub probe_root: PathBuf,
    pub output_root: PathBuf,
}

impl Config {
    pub fn resolve(&self, turma: &str) -> Result<ResolvedPaths, FatalError> {
        fn required(value: &Option<PathBuf>, key: &'static str) -> Result<PathBuf, FatalError> {
            match value {
                Some(p) if !p.as_os_str().is_empty() => Ok(p.clone()),
                _ => Err(FatalError::MissingSetting(key)),
            }
        }

        let reference_root = required(&self.reference_root, "reference_root")?;
        Ok(ResolvedPaths {
            reference_dir: reference_root.join(turma),
            probe_root: required(&self.probe_root, "probe_root")?,
            output_root: required(&self.output_root, "output_root")?,
        })
    }

    pub fn validate(&self) -> Result<(), FatalError> {
        if !self.threshold.is_finite() || self.threshold <= 0.0 || self.threshold > 2.0 {
            return Err(FatalError::InvalidThreshold(self.threshold));
        }
        Ok(())
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}
